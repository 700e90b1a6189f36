//! Background maintenance: lifetime and idle-timeout eviction, proactive
//! refill toward the minimum idle target, keepalive validation and leak
//! detection. One task runs per pool; it holds only a weak reference so an
//! abandoned pool can still drop.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use tokio::time::Instant;

use crate::metrics::bump;
use crate::pool::PoolInner;
use crate::registry::EvictReason;
use crate::Manager;

/// Diagnostic event describing a lease held past the configured leak
/// threshold. Emitted at most once per maintenance tick per leaked slot,
/// through `tracing` and the optional handler installed with
/// [`PoolBuilder::on_leak()`].
///
/// The lease is never reclaimed: the caller still references the physical
/// handle, and yanking it out from under them would allow concurrent use.
///
/// [`PoolBuilder::on_leak()`]: crate::PoolBuilder::on_leak
#[derive(Clone, Debug)]
pub struct LeakReport {
    /// Identifier of the leaked slot.
    pub slot: u64,

    /// Correlation token the caller attached to the lease, if any.
    pub tag: Option<Cow<'static, str>>,

    /// How long the lease has been held.
    pub held: Duration,
}

/// Handler invoked for every [`LeakReport`].
pub type LeakHook = Arc<dyn Fn(&LeakReport) + Send + Sync>;

pub(crate) fn report_leak<M: Manager>(inner: &PoolInner<M>, report: &LeakReport) {
    tracing::warn!(
        slot = report.slot,
        tag = report.tag.as_deref().unwrap_or("-"),
        held_ms = report.held.as_millis() as u64,
        "connection lease held past leak threshold"
    );
    bump(&inner.counters.leaks_reported);
    if let Some(hook) = &inner.leak_hook {
        hook(report);
    }
}

/// Maintenance task entry point, spawned by [`PoolBuilder::build()`].
///
/// [`PoolBuilder::build()`]: crate::PoolBuilder::build
pub(crate) async fn run<M: Manager>(pool: Weak<PoolInner<M>>) {
    let (interval, shutdown) = match pool.upgrade() {
        Some(inner) => (
            inner.config.maintenance_interval,
            Arc::clone(&inner.shutdown),
        ),
        None => return,
    };
    let mut ticker = tokio::time::interval(interval);
    // The first tick of a fresh interval fires immediately, which doubles
    // as the eager initial refill toward `min_idle`.
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = shutdown.notified() => return,
        }
        let inner = match pool.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        if inner.registry.lock().closed {
            return;
        }
        maintain(&inner).await;
    }
}

/// One maintenance pass. The plan is computed under a single short lock;
/// every physical open, close and validation runs outside it and the
/// results are applied back under the lock.
async fn maintain<M: Manager>(inner: &Arc<PoolInner<M>>) {
    let now = Instant::now();
    let plan = inner.registry.lock().plan_maintenance(now, &inner.config);

    if plan.retired > 0 {
        tracing::debug!(
            count = plan.retired,
            "in-use connections marked for retirement on release"
        );
    }

    for (slot, conn, reason) in plan.evict {
        match reason {
            EvictReason::Lifetime => tracing::debug!(slot, "evicting connection past max lifetime"),
            EvictReason::IdleTimeout => tracing::debug!(slot, "evicting idle connection"),
        }
        inner.close_conn(conn).await;
    }

    for slot in plan.refill {
        match inner.manager.open().await {
            Ok(conn) => {
                bump(&inner.counters.opened);
                let parked = {
                    inner
                        .registry
                        .lock()
                        .complete_creating_idle(slot, conn, Instant::now())
                };
                if let Err(conn) = parked {
                    inner.close_conn(conn).await;
                }
            }
            Err(_) => {
                bump(&inner.counters.open_failures);
                tracing::warn!(slot, "refill connection open failed");
                inner.registry.lock().fail_creating(slot, Instant::now());
            }
        }
    }

    for (slot, mut conn) in plan.revalidate {
        if inner.validate_conn(&mut conn).await {
            let parked = {
                inner
                    .registry
                    .lock()
                    .complete_validating_idle(slot, conn, Instant::now())
            };
            if let Err(conn) = parked {
                inner.close_conn(conn).await;
            }
        } else {
            bump(&inner.counters.validation_failures);
            tracing::debug!(slot, "idle connection failed keepalive validation");
            inner.registry.lock().remove(slot, Instant::now());
            inner.close_conn(conn).await;
        }
    }

    for report in &plan.leaks {
        report_leak(inner, report);
    }
}
