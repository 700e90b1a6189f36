use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time counts derived from a single locked view of the slot
/// table, so they always sum consistently even under concurrent mutation.
#[derive(Clone, Copy, Debug)]
#[must_use]
pub struct PoolStatus {
    /// Slots currently leased to callers.
    pub active: usize,

    /// Slots holding a ready-to-use connection.
    pub idle: usize,

    /// Slots with a physical open in flight.
    pub creating: usize,

    /// Slots undergoing an out-of-band validation.
    pub validating: usize,

    /// Callers parked waiting for a slot.
    pub waiting: usize,

    /// Maximum number of concurrent connections.
    pub max_size: usize,
}

impl PoolStatus {
    /// Total number of slots counting against capacity.
    #[must_use]
    pub fn total(&self) -> usize {
        self.active + self.idle + self.creating + self.validating
    }

    /// Fraction of capacity currently leased, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.active as f64 / self.max_size as f64
    }
}

/// Cumulative counters since pool creation.
#[derive(Clone, Copy, Debug)]
#[must_use]
pub struct PoolMetrics {
    /// Physical connections opened.
    pub connections_opened: u64,

    /// Physical connections closed.
    pub connections_closed: u64,

    /// Failed physical opens, including retried attempts.
    pub open_failures: u64,

    /// Open attempts that were retried within an acquire call.
    pub open_retries: u64,

    /// Connections that failed (or timed out) validation.
    pub validation_failures: u64,

    /// Successful acquisitions.
    pub checkouts: u64,

    /// Acquisitions that failed with a timeout.
    pub checkout_timeouts: u64,

    /// Released connections handed directly to a parked waiter.
    pub handoffs: u64,

    /// Leak reports emitted by the maintenance task.
    pub leaks_reported: u64,

    /// Time since the pool was built.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Fraction of acquisitions that succeeded, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts + self.checkout_timeouts;
        if total == 0 {
            return 1.0;
        }
        self.checkouts as f64 / total as f64
    }
}

/// Lock-free counter cells shared by the acquire path, the drop path and
/// the maintenance task.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) opened: AtomicU64,
    pub(crate) closed: AtomicU64,
    pub(crate) open_failures: AtomicU64,
    pub(crate) open_retries: AtomicU64,
    pub(crate) validation_failures: AtomicU64,
    pub(crate) checkouts: AtomicU64,
    pub(crate) checkout_timeouts: AtomicU64,
    pub(crate) handoffs: AtomicU64,
    pub(crate) leaks_reported: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self, uptime: Duration) -> PoolMetrics {
        PoolMetrics {
            connections_opened: self.opened.load(Ordering::Relaxed),
            connections_closed: self.closed.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            open_retries: self.open_retries.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkout_timeouts: self.checkout_timeouts.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            leaks_reported: self.leaks_reported.load(Ordering::Relaxed),
            uptime,
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    let _ = counter.fetch_add(1, Ordering::Relaxed);
}
