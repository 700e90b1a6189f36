use std::{borrow::Cow, fmt, future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::maintenance::{self, LeakHook};
use crate::metrics::{bump, Counters};
use crate::registry::{AcquireStep, Registry, ReleaseOutcome, Wakeup};
use crate::slot::LeaseTag;
use crate::{
    Manager, Object, PoolBuilder, PoolConfig, PoolError, PoolMetrics, PoolStatus, TimeoutType,
};

/// Generic connection pool.
///
/// This struct can be cloned and transferred across thread boundaries and uses
/// reference counting for its internal state.
pub struct Pool<M: Manager> {
    pub(crate) inner: Arc<PoolInner<M>>,
}

// Implemented manually to avoid unnecessary trait bounds.
impl<M> fmt::Debug for Pool<M>
where
    M: fmt::Debug + Manager,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("manager", &self.inner.manager)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manager> Pool<M> {
    /// Instantiates a builder for a new [`Pool`].
    ///
    /// This is the only way to create a [`Pool`] instance.
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder::new(manager)
    }

    pub(crate) fn from_builder(builder: PoolBuilder<M>) -> Result<Self, crate::ConfigError> {
        builder.config.validate()?;
        let inner = Arc::new(PoolInner {
            registry: Mutex::new(Registry::new(builder.config.max_size)),
            config: builder.config,
            manager: builder.manager,
            counters: Counters::default(),
            leak_hook: builder.leak_hook,
            created_at: Instant::now(),
            drained: Notify::new(),
            shutdown: Arc::new(Notify::new()),
        });
        tracing::info!(
            max_size = inner.config.max_size,
            min_idle = inner.config.min_idle,
            "connection pool created"
        );
        let _ = tokio::spawn(maintenance::run(Arc::downgrade(&inner)));
        Ok(Self { inner })
    }

    /// Retrieves an [`Object`] from this [`Pool`] or waits for one to
    /// become available, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`PoolError`] for details.
    pub async fn get(&self) -> Result<Object<M>, PoolError<M::Error>> {
        self.acquire(self.inner.config.timeout, None).await
    }

    /// Retrieves an [`Object`] from this [`Pool`] using a different `timeout`
    /// than the configured one.
    ///
    /// # Errors
    ///
    /// See [`PoolError`] for details.
    pub async fn timeout_get(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Object<M>, PoolError<M::Error>> {
        self.acquire(timeout, None).await
    }

    /// Like [`Pool::get()`] but attaches a correlation token to the lease.
    /// The token shows up in leak reports, making it possible to tell which
    /// caller is sitting on a connection.
    ///
    /// # Errors
    ///
    /// See [`PoolError`] for details.
    pub async fn get_tagged(
        &self,
        tag: impl Into<Cow<'static, str>>,
    ) -> Result<Object<M>, PoolError<M::Error>> {
        self.acquire(self.inner.config.timeout, Some(tag.into()))
            .await
    }

    async fn acquire(
        &self,
        timeout: Option<Duration>,
        tag: LeaseTag,
    ) -> Result<Object<M>, PoolError<M::Error>> {
        let deadline = timeout.and_then(|d| Instant::now().checked_add(d));
        let result = self.try_acquire(deadline, &tag).await;
        match &result {
            Ok(_) => bump(&self.inner.counters.checkouts),
            Err(PoolError::Timeout(_)) => bump(&self.inner.counters.checkout_timeouts),
            Err(_) => {}
        }
        result
    }

    async fn try_acquire(
        &self,
        deadline: Option<Instant>,
        tag: &LeaseTag,
    ) -> Result<Object<M>, PoolError<M::Error>> {
        loop {
            let step = {
                self.inner
                    .registry
                    .lock()
                    .begin_acquire(Instant::now(), &self.inner.config, tag)
            };
            match step {
                AcquireStep::Closed => return Err(PoolError::Closed),
                AcquireStep::Claimed { slot, conn } => {
                    if !self.inner.config.test_on_acquire {
                        return Ok(Object::new(conn, slot, &self.inner));
                    }
                    let mut conn = conn;
                    if self.inner.validate_conn(&mut conn).await {
                        let promoted = {
                            self.inner
                                .registry
                                .lock()
                                .promote_validated(slot, Instant::now(), tag)
                        };
                        return match promoted {
                            Ok(()) => Ok(Object::new(conn, slot, &self.inner)),
                            Err(()) => {
                                self.inner.close_conn(conn).await;
                                Err(PoolError::Closed)
                            }
                        };
                    }
                    bump(&self.inner.counters.validation_failures);
                    tracing::debug!(slot, "connection failed validation on acquire, replacing");
                    self.inner.registry.lock().remove(slot, Instant::now());
                    self.inner.close_conn(conn).await;
                }
                AcquireStep::Stale { slot, conn } => {
                    tracing::debug!(slot, "expired idle connection evicted on claim");
                    self.inner.close_conn(conn).await;
                }
                AcquireStep::Reserve { slot } => {
                    return self.open_for(slot, deadline, tag).await;
                }
                AcquireStep::Wait { waiter, mut rx } => {
                    let woken = apply_timeout(TimeoutType::Wait, deadline, async {
                        (&mut rx).await.map_err(|_| PoolError::Closed)
                    })
                    .await;
                    match woken {
                        Ok(Wakeup::Handoff { slot, conn }) => {
                            return Ok(Object::new(conn, slot, &self.inner));
                        }
                        Ok(Wakeup::Create { slot }) => {
                            return self.open_for(slot, deadline, tag).await;
                        }
                        Err(PoolError::Timeout(tt)) => {
                            let removed = self.inner.registry.lock().cancel_waiter(waiter);
                            if !removed {
                                // A wakeup raced the deadline; it is sitting
                                // in the channel and must not be dropped.
                                match rx.try_recv() {
                                    Ok(Wakeup::Handoff { slot, conn }) => {
                                        return Ok(Object::new(conn, slot, &self.inner));
                                    }
                                    Ok(Wakeup::Create { slot }) => {
                                        self.inner
                                            .registry
                                            .lock()
                                            .fail_creating(slot, Instant::now());
                                    }
                                    Err(_) => {}
                                }
                            }
                            return Err(PoolError::Timeout(tt));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Runs the physical open for a `Creating` reservation, retrying failed
    /// attempts up to the configured bound while the deadline permits.
    async fn open_for(
        &self,
        slot: u64,
        deadline: Option<Instant>,
        tag: &LeaseTag,
    ) -> Result<Object<M>, PoolError<M::Error>> {
        let mut failures = 0u32;
        loop {
            match apply_timeout(TimeoutType::Create, deadline, self.inner.manager.open()).await {
                Ok(conn) => {
                    bump(&self.inner.counters.opened);
                    let completed = {
                        self.inner.registry.lock().complete_creating_leased(
                            slot,
                            Instant::now(),
                            tag,
                        )
                    };
                    return match completed {
                        Ok(()) => Ok(Object::new(conn, slot, &self.inner)),
                        Err(()) => {
                            self.inner.close_conn(conn).await;
                            Err(PoolError::Closed)
                        }
                    };
                }
                Err(PoolError::Timeout(tt)) => {
                    self.inner.registry.lock().fail_creating(slot, Instant::now());
                    return Err(PoolError::Timeout(tt));
                }
                Err(err) => {
                    bump(&self.inner.counters.open_failures);
                    failures += 1;
                    let expired = deadline.map_or(false, |d| Instant::now() >= d);
                    if failures > self.inner.config.create_retries || expired {
                        self.inner.registry.lock().fail_creating(slot, Instant::now());
                        return Err(err);
                    }
                    bump(&self.inner.counters.open_retries);
                    tracing::debug!(slot, attempt = failures, "connection open failed, retrying");
                }
            }
        }
    }

    /// Runs one full acquire-validate-release cycle, suitable as a liveness
    /// probe for health check endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Unhealthy`] if the validation fails; the probed
    /// connection is closed and replaced in that case.
    pub async fn ping(&self) -> Result<(), PoolError<M::Error>> {
        let mut conn = self.get().await?;
        if self.inner.validate_conn(&mut conn).await {
            Ok(())
        } else {
            bump(&self.inner.counters.validation_failures);
            Object::discard(conn);
            Err(PoolError::Unhealthy)
        }
    }

    /// Closes this [`Pool`] gracefully.
    ///
    /// New and queued [`Pool::get()`] calls fail with [`PoolError::Closed`]
    /// immediately. Idle connections are closed right away; the call then
    /// waits up to the configured shutdown grace for outstanding leases to
    /// be released. Leases still out after the grace are reported as leaks
    /// and their connections are closed whenever they finally return.
    pub async fn close(&self) {
        let idle = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return;
            }
            registry.begin_close()
        };
        // Ask the maintenance task to stop. A pass already in flight runs
        // to completion; its open/validate results observe the closed flag
        // and route their connections to close.
        self.inner.shutdown.notify_one();
        for conn in idle {
            self.inner.close_conn(conn).await;
        }

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        loop {
            if self.inner.registry.lock().is_drained() {
                break;
            }
            let released = tokio::time::timeout_at(deadline, self.inner.drained.notified()).await;
            if released.is_err() {
                let leaks = self
                    .inner
                    .registry
                    .lock()
                    .outstanding_leases(Instant::now());
                tracing::warn!(
                    outstanding = leaks.len(),
                    "pool closed with leases still outstanding"
                );
                for report in &leaks {
                    maintenance::report_leak(&self.inner, report);
                }
                break;
            }
        }
        tracing::info!("connection pool closed");
    }

    /// Indicates whether this [`Pool`] has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.registry.lock().closed
    }

    /// Retrieves [`PoolStatus`] of this [`Pool`] from a single consistent
    /// snapshot of the slot table.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.registry.lock().snapshot()
    }

    /// Retrieves the cumulative [`PoolMetrics`] of this [`Pool`].
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner
            .counters
            .snapshot(self.inner.created_at.elapsed())
    }

    /// Returns [`Manager`] of this [`Pool`].
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

pub(crate) struct PoolInner<M: Manager> {
    pub(crate) registry: Mutex<Registry<M::Connection>>,
    pub(crate) config: PoolConfig,
    pub(crate) manager: M,
    pub(crate) counters: Counters,
    pub(crate) leak_hook: Option<LeakHook>,
    created_at: Instant,
    /// Signalled on every slot removal after close, so a graceful shutdown
    /// can wait for the table to drain without polling.
    drained: Notify,
    /// Stops the maintenance task between passes. Shared so the task can
    /// wait on it without keeping the pool alive.
    pub(crate) shutdown: Arc<Notify>,
}

impl<M: Manager> PoolInner<M> {
    /// Returns a leased connection to the registry. Runs on the [`Object`]
    /// drop path, so all state transitions are synchronous; a connection
    /// routed to close is handed to a background task.
    pub(crate) fn release(self: &Arc<Self>, slot: u64, conn: M::Connection, discard: bool) {
        let (outcome, closed) = {
            let mut registry = self.registry.lock();
            let outcome = registry.release(slot, conn, discard, Instant::now(), &self.config);
            (outcome, registry.closed)
        };
        match outcome {
            ReleaseOutcome::Parked => {}
            ReleaseOutcome::HandedOff => bump(&self.counters.handoffs),
            ReleaseOutcome::Close(conn) => self.spawn_close(conn),
        }
        if closed {
            self.drained.notify_one();
        }
    }

    /// Removes a slot whose connection was taken out of the pool for good.
    pub(crate) fn detach(self: &Arc<Self>, slot: u64) {
        let closed = {
            let mut registry = self.registry.lock();
            registry.remove(slot, Instant::now());
            registry.closed
        };
        if closed {
            self.drained.notify_one();
        }
    }

    /// Closes a connection from a synchronous context by handing it to the
    /// runtime. Without a runtime the connection is dropped unclosed, which
    /// matches the policy of abandoning rather than retrying closes.
    fn spawn_close(self: &Arc<Self>, conn: M::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                let _ = handle.spawn(async move {
                    inner.close_conn(conn).await;
                });
            }
            Err(_) => {
                tracing::warn!("no runtime available, dropping connection without closing");
                drop(conn);
            }
        }
    }

    pub(crate) async fn close_conn(&self, conn: M::Connection) {
        self.manager.close(conn).await;
        bump(&self.counters.closed);
    }

    /// Runs the backend validation bounded by `validation_timeout`; an
    /// overrun counts as a failed validation.
    pub(crate) async fn validate_conn(&self, conn: &mut M::Connection) -> bool {
        tokio::time::timeout(self.config.validation_timeout, self.manager.validate(conn))
            .await
            .unwrap_or(false)
    }
}

async fn apply_timeout<O, E>(
    timeout_type: TimeoutType,
    deadline: Option<Instant>,
    future: impl Future<Output = Result<O, impl Into<PoolError<E>>>>,
) -> Result<O, PoolError<E>> {
    match deadline {
        None => future.await.map_err(Into::into),
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| PoolError::Timeout(timeout_type))?
            .map_err(Into::into),
    }
}
