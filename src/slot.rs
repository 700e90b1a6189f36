use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Diagnostic token identifying the holder of a lease.
pub(crate) type LeaseTag = Option<Cow<'static, str>>;

/// An active lease on a slot.
#[derive(Debug)]
pub(crate) struct Lease {
    /// When the slot transitioned to `InUse`.
    pub(crate) started_at: Instant,

    /// Correlation token supplied by the caller, if any.
    pub(crate) tag: LeaseTag,
}

/// State of a single slot.
///
/// The connection is owned by whoever the state says owns it: the registry
/// while `Idle`, the caller's [`Object`] while `InUse`, and the task running
/// the physical open or validation while `Creating`/`Validating`. Closing is
/// not a state; a slot being closed has already left the registry.
///
/// [`Object`]: crate::Object
pub(crate) enum SlotState<C> {
    /// A capacity unit is reserved and a physical open is in flight.
    Creating,

    /// The connection is parked in the pool, ready to be handed out.
    Idle { conn: C },

    /// The connection is leased to a caller.
    InUse { lease: Lease },

    /// The connection is undergoing an out-of-band validation.
    Validating,
}

impl<C> fmt::Debug for SlotState<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => f.write_str("Creating"),
            Self::Idle { .. } => f.write_str("Idle"),
            Self::InUse { lease } => f.debug_struct("InUse").field("lease", lease).finish(),
            Self::Validating => f.write_str("Validating"),
        }
    }
}

/// One capacity unit tracking a single physical connection.
#[derive(Debug)]
pub(crate) struct Slot<C> {
    /// Stable identifier, unique for the lifetime of the pool.
    pub(crate) id: u64,

    pub(crate) state: SlotState<C>,

    /// When the physical open completed. Drives max-lifetime eviction.
    pub(crate) created_at: Instant,

    /// When the slot last returned to `Idle`. Drives idle-timeout eviction.
    pub(crate) last_used_at: Instant,

    /// Set when the slot outlived `max_lifetime` while leased. Checked on
    /// release and on claim so the slot is closed instead of reused.
    pub(crate) retire: bool,
}

impl<C> Slot<C> {
    pub(crate) fn new(id: u64, state: SlotState<C>, now: Instant) -> Self {
        Self {
            id,
            state,
            created_at: now,
            last_used_at: now,
            retire: false,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.state, SlotState::Idle { .. })
    }

    pub(crate) fn lifetime_expired(&self, now: Instant, max_lifetime: Option<Duration>) -> bool {
        match max_lifetime {
            Some(limit) => now.saturating_duration_since(self.created_at) >= limit,
            None => false,
        }
    }

    pub(crate) fn idle_expired(&self, now: Instant, idle_timeout: Option<Duration>) -> bool {
        match idle_timeout {
            Some(limit) => now.saturating_duration_since(self.last_used_at) >= limit,
            None => false,
        }
    }

    /// Takes the connection out of an `Idle` or `Validating`-bound slot.
    ///
    /// Panics if the slot does not currently own its connection; all calls
    /// are guarded by state checks under the registry lock.
    pub(crate) fn take_conn(&mut self, next: SlotState<C>) -> C {
        match std::mem::replace(&mut self.state, next) {
            SlotState::Idle { conn } => conn,
            state => unreachable!("slot {} does not own its connection: {:?}", self.id, state),
        }
    }

    pub(crate) fn lease(&self) -> Option<&Lease> {
        match &self.state {
            SlotState::InUse { lease } => Some(lease),
            _ => None,
        }
    }
}
