use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::maintenance::LeakReport;
use crate::slot::{Lease, LeaseTag, Slot, SlotState};
use crate::{PoolConfig, PoolStatus};

/// Message delivered to a parked waiter. The sender performs the state
/// transition before sending, so the woken caller never has to re-scan the
/// pool and can never race another caller for the same slot.
#[derive(Debug)]
pub(crate) enum Wakeup<C> {
    /// A released connection was handed directly to this waiter; its slot is
    /// already `InUse` on the waiter's behalf.
    Handoff { slot: u64, conn: C },

    /// A capacity unit freed up without a connection attached. The slot is
    /// reserved in `Creating` state; the waiter runs the physical open.
    Create { slot: u64 },
}

#[derive(Debug)]
struct Waiter<C> {
    id: u64,
    tag: LeaseTag,
    tx: oneshot::Sender<Wakeup<C>>,
}

/// First step of an acquisition, decided under the registry lock.
pub(crate) enum AcquireStep<C> {
    /// An idle slot was claimed. With `test_on_acquire` the slot is parked
    /// in `Validating` and must be promoted or removed by the caller;
    /// otherwise it is already `InUse`.
    Claimed { slot: u64, conn: C },

    /// An idle slot had expired and was removed instead of handed out. The
    /// caller closes the connection and tries again.
    Stale { slot: u64, conn: C },

    /// Capacity headroom existed; a `Creating` reservation was made and the
    /// caller runs the physical open.
    Reserve { slot: u64 },

    /// The pool is saturated; the caller parks on the returned channel.
    Wait {
        waiter: u64,
        rx: oneshot::Receiver<Wakeup<C>>,
    },

    /// The pool has been closed.
    Closed,
}

/// Outcome of returning a leased connection.
pub(crate) enum ReleaseOutcome<C> {
    /// The connection was parked back into the idle set.
    Parked,

    /// The connection was handed directly to the oldest waiter.
    HandedOff,

    /// The slot left the registry; the caller must close the connection.
    Close(C),
}

/// Work computed by one maintenance pass under the lock. All physical I/O
/// implied by the plan happens outside the lock.
pub(crate) struct MaintenancePlan<C> {
    /// Evicted slots, already removed from the registry.
    pub(crate) evict: Vec<(u64, C, EvictReason)>,

    /// `Creating` reservations made to refill toward `min_idle`.
    pub(crate) refill: Vec<u64>,

    /// Idle slots moved to `Validating` for keepalive checks.
    pub(crate) revalidate: Vec<(u64, C)>,

    /// Leases held past the leak threshold.
    pub(crate) leaks: Vec<LeakReport>,

    /// Number of in-use slots newly marked for retirement.
    pub(crate) retired: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum EvictReason {
    Lifetime,
    IdleTimeout,
}

/// The slot table and waiter queue. Lives behind a single short-held mutex
/// in [`PoolInner`]; every method is a quick, non-blocking state transition.
/// Physical opens, closes and validations never run while this is locked.
///
/// [`PoolInner`]: crate::pool::PoolInner
pub(crate) struct Registry<C> {
    slots: Vec<Slot<C>>,
    waiters: VecDeque<Waiter<C>>,
    next_slot_id: u64,
    next_waiter_id: u64,
    max_size: usize,
    pub(crate) closed: bool,
}

impl<C> Registry<C> {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_size),
            waiters: VecDeque::new(),
            next_slot_id: 1,
            next_waiter_id: 1,
            max_size,
            closed: false,
        }
    }

    fn index_of(&self, slot: u64) -> Option<usize> {
        self.slots.iter().position(|s| s.id == slot)
    }

    fn insert_creating(&mut self, now: Instant) -> u64 {
        debug_assert!(self.slots.len() < self.max_size);
        let id = self.next_slot_id;
        self.next_slot_id += 1;
        self.slots.push(Slot::new(id, SlotState::Creating, now));
        id
    }

    /// Offers a freed capacity unit to the oldest live waiter by reserving a
    /// `Creating` slot on its behalf. Waiters that gave up are skipped.
    fn grant_capacity_to_waiter(&mut self, now: Instant) {
        while let Some(waiter) = self.waiters.pop_front() {
            let Waiter { tx, .. } = waiter;
            let slot = self.insert_creating(now);
            match tx.send(Wakeup::Create { slot }) {
                Ok(()) => return,
                Err(_) => {
                    let idx = self.index_of(slot).unwrap();
                    let _ = self.slots.swap_remove(idx);
                }
            }
        }
    }

    /// First step of `Acquire`: claim an idle slot, reserve a capacity unit
    /// or park behind the waiter queue. New callers never overtake already
    /// parked waiters.
    pub(crate) fn begin_acquire(
        &mut self,
        now: Instant,
        config: &PoolConfig,
        tag: &LeaseTag,
    ) -> AcquireStep<C> {
        if self.closed {
            return AcquireStep::Closed;
        }

        if self.waiters.is_empty() {
            // Prefer the most recently used idle slot; colder ones age
            // toward idle-timeout eviction instead of being kept warm.
            let idle = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_idle())
                .max_by_key(|(_, s)| s.last_used_at)
                .map(|(idx, _)| idx);

            if let Some(idx) = idle {
                let slot = &mut self.slots[idx];
                let id = slot.id;
                if slot.retire
                    || slot.lifetime_expired(now, config.max_lifetime)
                    || slot.idle_expired(now, config.idle_timeout)
                {
                    let slot = self.slots.swap_remove(idx);
                    let conn = match slot.state {
                        SlotState::Idle { conn } => conn,
                        _ => unreachable!(),
                    };
                    return AcquireStep::Stale { slot: id, conn };
                }
                let next = if config.test_on_acquire {
                    SlotState::Validating
                } else {
                    SlotState::InUse {
                        lease: Lease {
                            started_at: now,
                            tag: tag.clone(),
                        },
                    }
                };
                let conn = slot.take_conn(next);
                return AcquireStep::Claimed { slot: id, conn };
            }

            if self.slots.len() < self.max_size {
                let slot = self.insert_creating(now);
                return AcquireStep::Reserve { slot };
            }
        }

        let (tx, rx) = oneshot::channel();
        let waiter = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter {
            id: waiter,
            tag: tag.clone(),
            tx,
        });
        AcquireStep::Wait { waiter, rx }
    }

    /// Removes a waiter whose deadline elapsed. Returns `false` if the
    /// waiter was already gone, meaning a wakeup raced in and is sitting in
    /// the waiter's channel.
    pub(crate) fn cancel_waiter(&mut self, waiter: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == waiter) {
            Some(idx) => {
                let _ = self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Completes a `Creating` reservation on behalf of the acquiring caller.
    /// The slot transitions straight to `InUse`; the caller keeps the
    /// connection. Fails if the pool closed while the open was in flight.
    pub(crate) fn complete_creating_leased(
        &mut self,
        slot: u64,
        now: Instant,
        tag: &LeaseTag,
    ) -> Result<(), ()> {
        if self.closed {
            if let Some(idx) = self.index_of(slot) {
                let _ = self.slots.swap_remove(idx);
            }
            return Err(());
        }
        let idx = self.index_of(slot).expect("creating slot disappeared");
        let entry = &mut self.slots[idx];
        debug_assert!(matches!(entry.state, SlotState::Creating));
        entry.created_at = now;
        entry.last_used_at = now;
        entry.state = SlotState::InUse {
            lease: Lease {
                started_at: now,
                tag: tag.clone(),
            },
        };
        Ok(())
    }

    /// Completes a `Creating` reservation made by the maintenance refill.
    /// The connection is handed to the oldest waiter if one is parked,
    /// otherwise parked idle. Returns the connection back if the pool
    /// closed meanwhile.
    pub(crate) fn complete_creating_idle(
        &mut self,
        slot: u64,
        conn: C,
        now: Instant,
    ) -> Result<(), C> {
        if self.closed {
            if let Some(idx) = self.index_of(slot) {
                let _ = self.slots.swap_remove(idx);
            }
            return Err(conn);
        }
        let idx = self.index_of(slot).expect("creating slot disappeared");
        self.slots[idx].created_at = now;
        self.park_or_handoff(idx, conn, now);
        Ok(())
    }

    /// Drops a `Creating` reservation after a failed or abandoned open and
    /// offers the freed capacity unit to the next waiter.
    pub(crate) fn fail_creating(&mut self, slot: u64, now: Instant) {
        if let Some(idx) = self.index_of(slot) {
            debug_assert!(matches!(self.slots[idx].state, SlotState::Creating));
            let _ = self.slots.swap_remove(idx);
            if !self.closed {
                self.grant_capacity_to_waiter(now);
            }
        }
    }

    /// Promotes a slot that passed its pre-use validation to `InUse`.
    /// Fails if the pool closed while the validation was in flight; the
    /// caller closes the connection.
    pub(crate) fn promote_validated(
        &mut self,
        slot: u64,
        now: Instant,
        tag: &LeaseTag,
    ) -> Result<(), ()> {
        if self.closed {
            if let Some(idx) = self.index_of(slot) {
                let _ = self.slots.swap_remove(idx);
            }
            return Err(());
        }
        let idx = self.index_of(slot).expect("validating slot disappeared");
        let entry = &mut self.slots[idx];
        debug_assert!(matches!(entry.state, SlotState::Validating));
        entry.state = SlotState::InUse {
            lease: Lease {
                started_at: now,
                tag: tag.clone(),
            },
        };
        Ok(())
    }

    /// Parks a slot that passed its keepalive validation back into the idle
    /// set (or hands it to a waiter). Returns the connection back if the
    /// pool closed meanwhile.
    pub(crate) fn complete_validating_idle(
        &mut self,
        slot: u64,
        conn: C,
        now: Instant,
    ) -> Result<(), C> {
        if self.closed {
            if let Some(idx) = self.index_of(slot) {
                let _ = self.slots.swap_remove(idx);
            }
            return Err(conn);
        }
        let idx = self.index_of(slot).expect("validating slot disappeared");
        self.park_or_handoff(idx, conn, now);
        Ok(())
    }

    /// Removes a slot whose connection failed validation or was detached
    /// via [`Object::take`]. Frees the capacity unit for the next waiter.
    ///
    /// [`Object::take`]: crate::Object::take
    pub(crate) fn remove(&mut self, slot: u64, now: Instant) {
        if let Some(idx) = self.index_of(slot) {
            let _ = self.slots.swap_remove(idx);
            if !self.closed {
                self.grant_capacity_to_waiter(now);
            }
        }
    }

    /// Returns a leased connection, either parking it idle, handing it to
    /// the oldest waiter, or routing it to close when the caller flagged it
    /// unhealthy, the slot was retired, its lifetime expired, or the pool
    /// has closed.
    pub(crate) fn release(
        &mut self,
        slot: u64,
        conn: C,
        discard: bool,
        now: Instant,
        config: &PoolConfig,
    ) -> ReleaseOutcome<C> {
        let idx = match self.index_of(slot) {
            Some(idx) => idx,
            // Slot already removed (e.g. forced out at shutdown).
            None => return ReleaseOutcome::Close(conn),
        };
        debug_assert!(matches!(self.slots[idx].state, SlotState::InUse { .. }));

        if self.closed {
            let _ = self.slots.swap_remove(idx);
            return ReleaseOutcome::Close(conn);
        }

        let entry = &self.slots[idx];
        if discard || entry.retire || entry.lifetime_expired(now, config.max_lifetime) {
            let _ = self.slots.swap_remove(idx);
            self.grant_capacity_to_waiter(now);
            return ReleaseOutcome::Close(conn);
        }

        if self.park_or_handoff(idx, conn, now) {
            ReleaseOutcome::HandedOff
        } else {
            ReleaseOutcome::Parked
        }
    }

    /// Hands the connection to the oldest live waiter, or parks the slot
    /// idle when no waiter takes it. Returns `true` on a hand-off.
    fn park_or_handoff(&mut self, idx: usize, mut conn: C, now: Instant) -> bool {
        let id = self.slots[idx].id;
        while let Some(waiter) = self.waiters.pop_front() {
            let Waiter { tag, tx, .. } = waiter;
            match tx.send(Wakeup::Handoff { slot: id, conn }) {
                Ok(()) => {
                    let entry = &mut self.slots[idx];
                    entry.state = SlotState::InUse {
                        lease: Lease {
                            started_at: now,
                            tag,
                        },
                    };
                    entry.last_used_at = now;
                    return true;
                }
                Err(Wakeup::Handoff { conn: back, .. }) => conn = back,
                Err(Wakeup::Create { .. }) => unreachable!(),
            }
        }
        let entry = &mut self.slots[idx];
        entry.state = SlotState::Idle { conn };
        entry.last_used_at = now;
        entry.retire = false;
        false
    }

    /// One maintenance pass: retire or evict slots violating lifetime and
    /// idle policy, reserve refill capacity toward `min_idle`, pull stale
    /// idle slots out for keepalive validation and scan for leaked leases.
    pub(crate) fn plan_maintenance(
        &mut self,
        now: Instant,
        config: &PoolConfig,
    ) -> MaintenancePlan<C> {
        let mut plan = MaintenancePlan {
            evict: Vec::new(),
            refill: Vec::new(),
            revalidate: Vec::new(),
            leaks: Vec::new(),
            retired: 0,
        };
        if self.closed {
            return plan;
        }

        // Lifetime policy. Idle victims leave immediately; in-use slots are
        // only marked and closed on release.
        let mut idx = 0;
        while idx < self.slots.len() {
            let expired = self.slots[idx].lifetime_expired(now, config.max_lifetime);
            if expired && self.slots[idx].is_idle() {
                let slot = self.slots.swap_remove(idx);
                let id = slot.id;
                if let SlotState::Idle { conn } = slot.state {
                    plan.evict.push((id, conn, EvictReason::Lifetime));
                }
                continue;
            }
            if expired {
                let slot = &mut self.slots[idx];
                if slot.lease().is_some() && !slot.retire {
                    slot.retire = true;
                    plan.retired += 1;
                }
            }
            idx += 1;
        }

        // Idle timeout, never dropping the idle count below `min_idle`.
        if config.idle_timeout.is_some() {
            let mut idle_count = self.slots.iter().filter(|s| s.is_idle()).count();
            let mut victims: Vec<(Instant, u64)> = self
                .slots
                .iter()
                .filter(|s| s.is_idle() && s.idle_expired(now, config.idle_timeout))
                .map(|s| (s.last_used_at, s.id))
                .collect();
            victims.sort_by_key(|&(last_used, _)| last_used);
            for (_, id) in victims {
                if idle_count <= config.min_idle {
                    break;
                }
                let idx = self.index_of(id).unwrap();
                let slot = self.slots.swap_remove(idx);
                if let SlotState::Idle { conn } = slot.state {
                    plan.evict.push((id, conn, EvictReason::IdleTimeout));
                    idle_count -= 1;
                }
            }
        }

        // Keepalive: pull stale idle slots out for background validation.
        if let Some(staleness) = config.keepalive {
            for slot in &mut self.slots {
                if slot.is_idle() && now.saturating_duration_since(slot.last_used_at) >= staleness
                {
                    let conn = slot.take_conn(SlotState::Validating);
                    plan.revalidate.push((slot.id, conn));
                }
            }
        }

        // Refill toward `min_idle`. Slots already on their way back to the
        // idle set count toward the target so back-to-back ticks do not
        // over-create.
        let incoming = self
            .slots
            .iter()
            .filter(|s| !matches!(s.state, SlotState::InUse { .. }))
            .count();
        let need = config.min_idle.saturating_sub(incoming);
        let headroom = self.max_size - self.slots.len();
        for _ in 0..need.min(headroom) {
            plan.refill.push(self.insert_creating(now));
        }

        // Leak scan. Reported once per tick per leaked lease; reclaiming a
        // handle the caller still references is never safe, so report only.
        if let Some(threshold) = config.leak_threshold {
            for slot in &self.slots {
                if let Some(lease) = slot.lease() {
                    let held = now.saturating_duration_since(lease.started_at);
                    if held >= threshold {
                        plan.leaks.push(LeakReport {
                            slot: slot.id,
                            tag: lease.tag.clone(),
                            held,
                        });
                    }
                }
            }
        }

        plan
    }

    /// Marks the pool closed: fails all parked waiters and removes every
    /// slot except the `InUse` ones, returning the idle connections for
    /// closing. `Creating` and `Validating` entries are dropped outright;
    /// the tasks running their physical I/O observe the close on completion
    /// and route the connection to close themselves. Only leased slots keep
    /// the table non-empty, so a graceful shutdown waits for leases and
    /// nothing else.
    pub(crate) fn begin_close(&mut self) -> Vec<C> {
        self.closed = true;
        // Dropping the senders wakes every parked waiter with `Closed`.
        self.waiters.clear();
        let mut conns = Vec::new();
        let mut idx = 0;
        while idx < self.slots.len() {
            match self.slots[idx].state {
                SlotState::InUse { .. } => idx += 1,
                _ => {
                    let slot = self.slots.swap_remove(idx);
                    if let SlotState::Idle { conn } = slot.state {
                        conns.push(conn);
                    }
                }
            }
        }
        conns
    }

    /// Leases still outstanding, for the shutdown-grace leak report.
    pub(crate) fn outstanding_leases(&self, now: Instant) -> Vec<LeakReport> {
        self.slots
            .iter()
            .filter_map(|slot| {
                slot.lease().map(|lease| LeakReport {
                    slot: slot.id,
                    tag: lease.tag.clone(),
                    held: now.saturating_duration_since(lease.started_at),
                })
            })
            .collect()
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.slots.is_empty()
    }

    /// Point-in-time counts, all derived from one locked view so they
    /// always sum consistently.
    pub(crate) fn snapshot(&self) -> PoolStatus {
        let mut status = PoolStatus {
            active: 0,
            idle: 0,
            creating: 0,
            validating: 0,
            waiting: self.waiters.len(),
            max_size: self.max_size,
        };
        for slot in &self.slots {
            match slot.state {
                SlotState::Creating => status.creating += 1,
                SlotState::Idle { .. } => status.idle += 1,
                SlotState::InUse { .. } => status.active += 1,
                SlotState::Validating => status.validating += 1,
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(max_size: usize) -> PoolConfig {
        let mut config = PoolConfig::new(max_size);
        config.maintenance_interval = Duration::from_millis(10);
        config
    }

    fn leased(registry: &mut Registry<&'static str>, config: &PoolConfig) -> u64 {
        match registry.begin_acquire(Instant::now(), config, &None) {
            AcquireStep::Reserve { slot } => {
                registry
                    .complete_creating_leased(slot, Instant::now(), &None)
                    .unwrap();
                slot
            }
            AcquireStep::Claimed { slot, .. } => slot,
            _ => panic!("expected an immediate claim"),
        }
    }

    #[test]
    fn acquire_reserves_then_claims_idle() {
        let config = config(2);
        let mut registry = Registry::new(2);
        let now = Instant::now();

        let slot = leased(&mut registry, &config);
        assert_eq!(registry.snapshot().active, 1);

        match registry.release(slot, "conn", false, now, &config) {
            ReleaseOutcome::Parked => {}
            _ => panic!("no waiters, release should park"),
        }
        assert_eq!(registry.snapshot().idle, 1);

        match registry.begin_acquire(now, &config, &None) {
            AcquireStep::Claimed { slot: claimed, conn } => {
                assert_eq!(claimed, slot);
                assert_eq!(conn, "conn");
            }
            _ => panic!("idle slot should be claimed"),
        }
    }

    #[test]
    fn saturated_acquire_parks_fifo() {
        let config = config(1);
        let mut registry = Registry::new(1);
        let now = Instant::now();
        let slot = leased(&mut registry, &config);

        let first = registry.begin_acquire(now, &config, &None);
        let second = registry.begin_acquire(now, &config, &None);
        let (mut rx1, mut rx2) = match (first, second) {
            (AcquireStep::Wait { rx: rx1, .. }, AcquireStep::Wait { rx: rx2, .. }) => (rx1, rx2),
            _ => panic!("saturated pool should park"),
        };

        match registry.release(slot, "conn", false, now, &config) {
            ReleaseOutcome::HandedOff => {}
            _ => panic!("release should hand off to the oldest waiter"),
        }
        assert!(matches!(rx1.try_recv(), Ok(Wakeup::Handoff { conn: "conn", .. })));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn discard_grants_create_to_waiter() {
        let config = config(1);
        let mut registry = Registry::new(1);
        let now = Instant::now();
        let slot = leased(&mut registry, &config);

        let mut rx = match registry.begin_acquire(now, &config, &None) {
            AcquireStep::Wait { rx, .. } => rx,
            _ => panic!("saturated pool should park"),
        };

        match registry.release(slot, "conn", true, now, &config) {
            ReleaseOutcome::Close(conn) => assert_eq!(conn, "conn"),
            _ => panic!("discard should close"),
        }
        match rx.try_recv() {
            Ok(Wakeup::Create { slot: reserved }) => assert_ne!(reserved, slot),
            other => panic!("waiter should get a create grant, got {:?}", other),
        }
    }

    #[test]
    fn retired_slot_not_handed_out() {
        let mut config = config(1);
        config.max_lifetime = Some(Duration::from_secs(0));
        let mut registry = Registry::new(1);
        let now = Instant::now();
        let slot = leased(&mut registry, &config);

        // Zero max lifetime: the slot expires the moment it is released.
        match registry.release(slot, "conn", false, now, &config) {
            ReleaseOutcome::Close(_) => {}
            _ => panic!("expired slot should route to close on release"),
        }
        assert!(registry.is_drained());
    }

    #[test]
    fn idle_expired_slot_not_handed_out() {
        let mut config = config(1);
        config.max_lifetime = None;
        config.idle_timeout = Some(Duration::from_millis(10));
        let mut registry = Registry::new(1);
        let now = Instant::now();
        let slot = leased(&mut registry, &config);
        let _ = registry.release(slot, "conn", false, now, &config);

        let later = now + Duration::from_millis(20);
        match registry.begin_acquire(later, &config, &None) {
            AcquireStep::Stale { conn, .. } => assert_eq!(conn, "conn"),
            _ => panic!("idle-expired slot must not be claimed"),
        }
        assert!(registry.is_drained());
    }

    #[test]
    fn idle_floor_respected() {
        let mut config = config(4);
        config.min_idle = 2;
        config.idle_timeout = Some(Duration::from_millis(1));
        config.max_lifetime = None;
        let mut registry = Registry::new(4);
        let now = Instant::now();

        let slots: Vec<u64> = (0..4).map(|_| leased(&mut registry, &config)).collect();
        for slot in slots {
            let _ = registry.release(slot, "conn", false, now, &config);
        }
        assert_eq!(registry.snapshot().idle, 4);

        let later = now + Duration::from_millis(5);
        let plan = registry.plan_maintenance(later, &config);
        assert_eq!(plan.evict.len(), 2);
        assert!(plan
            .evict
            .iter()
            .all(|(_, _, reason)| *reason == EvictReason::IdleTimeout));
        assert_eq!(registry.snapshot().idle, 2);
    }

    #[test]
    fn refill_reserves_up_to_min_idle() {
        let mut config = config(4);
        config.min_idle = 3;
        let mut registry = Registry::<&'static str>::new(4);
        let now = Instant::now();

        let plan = registry.plan_maintenance(now, &config);
        assert_eq!(plan.refill.len(), 3);
        assert_eq!(registry.snapshot().creating, 3);

        // A second pass must not over-create while the opens are in flight.
        let plan = registry.plan_maintenance(now, &config);
        assert!(plan.refill.is_empty());
    }

    #[test]
    fn leak_scan_reports_held_leases() {
        let mut config = config(2);
        config.leak_threshold = Some(Duration::from_millis(50));
        let mut registry = Registry::new(2);
        let now = Instant::now();
        let slot = leased(&mut registry, &config);

        let plan = registry.plan_maintenance(now + Duration::from_millis(10), &config);
        assert!(plan.leaks.is_empty());

        let plan = registry.plan_maintenance(now + Duration::from_millis(60), &config);
        assert_eq!(plan.leaks.len(), 1);
        assert_eq!(plan.leaks[0].slot, slot);
        assert!(plan.leaks[0].held >= Duration::from_millis(50));
    }

    #[test]
    fn close_drains_idle_slots() {
        let config = config(2);
        let mut registry = Registry::new(2);
        let now = Instant::now();
        let slot = leased(&mut registry, &config);
        let _ = registry.release(slot, "idle", false, now, &config);

        let conns = registry.begin_close();
        assert_eq!(conns, vec!["idle"]);
        assert!(registry.is_drained());
        assert!(matches!(
            registry.begin_acquire(now, &config, &None),
            AcquireStep::Closed
        ));
    }

    #[test]
    fn close_drops_creating_reservations() {
        let config = config(2);
        let mut registry = Registry::<&'static str>::new(2);
        let now = Instant::now();
        let slot = match registry.begin_acquire(now, &config, &None) {
            AcquireStep::Reserve { slot } => slot,
            _ => panic!("empty pool should reserve"),
        };

        assert!(registry.begin_close().is_empty());
        assert!(registry.is_drained());
        // The in-flight open learns about the close on completion.
        assert!(registry.complete_creating_leased(slot, now, &None).is_err());
    }

    #[test]
    fn close_fails_waiters_and_outstanding_leases_route_to_close() {
        let config = config(1);
        let mut registry = Registry::new(1);
        let now = Instant::now();
        let slot = leased(&mut registry, &config);

        let mut rx = match registry.begin_acquire(now, &config, &None) {
            AcquireStep::Wait { rx, .. } => rx,
            _ => panic!("saturated pool should park"),
        };

        assert!(registry.begin_close().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.outstanding_leases(now).len(), 1);

        match registry.release(slot, "held", false, now, &config) {
            ReleaseOutcome::Close(conn) => assert_eq!(conn, "held"),
            _ => panic!("release after close must close the connection"),
        }
        assert!(registry.is_drained());
    }
}
