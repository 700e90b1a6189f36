use std::time::Duration;

use crate::ConfigError;

/// [`Pool`] configuration.
///
/// All durations are wall-clock bounds enforced by the pool; the backend is
/// never consulted about them. Fields set to [`None`] disable the
/// corresponding policy.
///
/// [`Pool`]: super::Pool
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PoolConfig {
    /// Maximum number of concurrent physical connections. Slots in any
    /// state count against this bound.
    ///
    /// [`Pool`]: super::Pool
    pub max_size: usize,

    /// Minimum number of idle connections the maintenance task tries to
    /// keep available, never exceeding [`max_size`]. `0` disables
    /// proactive refill.
    ///
    /// [`max_size`]: Self::max_size
    pub min_idle: usize,

    /// Default deadline for [`Pool::get()`]. [`None`] waits forever.
    ///
    /// [`Pool::get()`]: super::Pool::get
    pub timeout: Option<Duration>,

    /// Connections older than this are evicted once idle; in-use
    /// connections are retired on release instead of being interrupted.
    pub max_lifetime: Option<Duration>,

    /// Connections idle for longer than this are evicted, but never below
    /// [`min_idle`] idle connections remaining.
    ///
    /// [`min_idle`]: Self::min_idle
    pub idle_timeout: Option<Duration>,

    /// Upper bound on a single [`Manager::validate()`] call. A validation
    /// that overruns counts as failed.
    ///
    /// [`Manager::validate()`]: super::Manager::validate
    pub validation_timeout: Duration,

    /// Leases held longer than this are reported as suspected leaks, once
    /// per maintenance tick. [`None`] disables the leak monitor.
    pub leak_threshold: Option<Duration>,

    /// Period of the background maintenance task.
    pub maintenance_interval: Duration,

    /// Idle connections untouched for longer than this are re-validated in
    /// the background. [`None`] disables keepalive validation.
    pub keepalive: Option<Duration>,

    /// Run [`Manager::validate()`] before handing out an idle connection.
    /// Off by default; the hot path hands out idle connections untested.
    ///
    /// [`Manager::validate()`]: super::Manager::validate
    pub test_on_acquire: bool,

    /// Number of immediate re-attempts after a failed [`Manager::open()`]
    /// within a single [`Pool::get()`] call, deadline permitting.
    ///
    /// [`Manager::open()`]: super::Manager::open
    /// [`Pool::get()`]: super::Pool::get
    pub create_retries: u32,

    /// How long [`Pool::close()`] waits for outstanding leases to be
    /// released before reporting them as leaked.
    ///
    /// [`Pool::close()`]: super::Pool::close
    pub shutdown_grace: Duration,
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`] with the provided `max_size` and
    /// defaults for everything else.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            min_idle: 0,
            timeout: Some(Duration::from_secs(20)),
            max_lifetime: Some(Duration::from_secs(20 * 60)),
            idle_timeout: Some(Duration::from_secs(5 * 60)),
            validation_timeout: Duration::from_secs(5),
            leak_threshold: Some(Duration::from_secs(60)),
            maintenance_interval: Duration::from_secs(30),
            keepalive: None,
            test_on_acquire: false,
            create_retries: 2,
            shutdown_grace: Duration::from_secs(10),
        }
    }

    /// Checks the configuration for combinations the pool cannot operate
    /// with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_size` is zero, `min_idle` exceeds
    /// `max_size` or the maintenance interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError("max_size must be greater than zero"));
        }
        if self.min_idle > self.max_size {
            return Err(ConfigError("min_idle must not exceed max_size"));
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigError("maintenance_interval must be non-zero"));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Creates a new [`PoolConfig`] with the `max_size` being set to
    /// `cpu_count * 4` ignoring any logical CPUs (Hyper-Threading).
    fn default() -> Self {
        Self::new(num_cpus::get_physical() * 4)
    }
}
