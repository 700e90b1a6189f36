use std::{fmt, sync::Arc, time::Duration};

use crate::maintenance::{LeakHook, LeakReport};

use super::{ConfigError, Manager, Pool, PoolConfig};

/// Builder for [`Pool`]s.
///
/// Instances of this are created by calling the [`Pool::builder()`] method.
#[must_use = "builder does nothing itself, use `.build()` to build it"]
pub struct PoolBuilder<M: Manager> {
    pub(crate) manager: M,
    pub(crate) config: PoolConfig,
    pub(crate) leak_hook: Option<LeakHook>,
}

// Implemented manually to avoid a trait bound on the leak hook.
impl<M> fmt::Debug for PoolBuilder<M>
where
    M: fmt::Debug + Manager,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("manager", &self.manager)
            .field("config", &self.config)
            .finish()
    }
}

impl<M: Manager> PoolBuilder<M> {
    pub(crate) fn new(manager: M) -> Self {
        Self {
            manager,
            config: PoolConfig::default(),
            leak_hook: None,
        }
    }

    /// Builds the [`Pool`] and spawns its maintenance task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`ConfigError`] for details.
    pub fn build(self) -> Result<Pool<M>, ConfigError> {
        Pool::from_builder(self)
    }

    /// Sets a [`PoolConfig`] to build the [`Pool`] with.
    pub fn config(mut self, value: PoolConfig) -> Self {
        self.config = value;
        self
    }

    /// Sets the [`PoolConfig::max_size`].
    pub fn max_size(mut self, value: usize) -> Self {
        self.config.max_size = value;
        self
    }

    /// Sets the [`PoolConfig::min_idle`].
    pub fn min_idle(mut self, value: usize) -> Self {
        self.config.min_idle = value;
        self
    }

    /// Sets the [`PoolConfig::timeout`].
    pub fn timeout(mut self, value: Option<Duration>) -> Self {
        self.config.timeout = value;
        self
    }

    /// Sets the [`PoolConfig::max_lifetime`].
    pub fn max_lifetime(mut self, value: Option<Duration>) -> Self {
        self.config.max_lifetime = value;
        self
    }

    /// Sets the [`PoolConfig::idle_timeout`].
    pub fn idle_timeout(mut self, value: Option<Duration>) -> Self {
        self.config.idle_timeout = value;
        self
    }

    /// Sets the [`PoolConfig::validation_timeout`].
    pub fn validation_timeout(mut self, value: Duration) -> Self {
        self.config.validation_timeout = value;
        self
    }

    /// Sets the [`PoolConfig::leak_threshold`].
    pub fn leak_threshold(mut self, value: Option<Duration>) -> Self {
        self.config.leak_threshold = value;
        self
    }

    /// Sets the [`PoolConfig::maintenance_interval`].
    pub fn maintenance_interval(mut self, value: Duration) -> Self {
        self.config.maintenance_interval = value;
        self
    }

    /// Sets the [`PoolConfig::keepalive`].
    pub fn keepalive(mut self, value: Option<Duration>) -> Self {
        self.config.keepalive = value;
        self
    }

    /// Sets the [`PoolConfig::test_on_acquire`].
    pub fn test_on_acquire(mut self, value: bool) -> Self {
        self.config.test_on_acquire = value;
        self
    }

    /// Sets the [`PoolConfig::create_retries`].
    pub fn create_retries(mut self, value: u32) -> Self {
        self.config.create_retries = value;
        self
    }

    /// Sets the [`PoolConfig::shutdown_grace`].
    pub fn shutdown_grace(mut self, value: Duration) -> Self {
        self.config.shutdown_grace = value;
        self
    }

    /// Installs a handler invoked for every [`LeakReport`] the leak monitor
    /// emits, in addition to the `tracing` output.
    pub fn on_leak(mut self, hook: impl Fn(&LeakReport) + Send + Sync + 'static) -> Self {
        self.leak_hook = Some(Arc::new(hook));
        self
    }
}
