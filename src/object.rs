use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Weak},
};

use crate::{pool::PoolInner, Manager, Pool};

/// Wrapper around the actual pooled connection which implements [`Deref`],
/// [`DerefMut`] and [`Drop`] traits.
///
/// Use this object just as if it was of type [`Manager::Connection`] and upon
/// leaving a scope the [`Drop::drop()`] will take care of returning it to the
/// pool.
#[must_use]
pub struct Object<M: Manager> {
    /// The actual connection. `None` only after `discard`/`take` or during
    /// drop.
    conn: Option<M::Connection>,

    /// Registry slot backing this lease.
    slot: u64,

    /// Whether the caller flagged the connection unhealthy.
    discard: bool,

    /// Pool to return the connection to.
    pool: Weak<PoolInner<M>>,
}

impl<M> fmt::Debug for Object<M>
where
    M: Manager,
    M::Connection: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("conn", &self.conn)
            .field("slot", &self.slot)
            .finish()
    }
}

impl<M: Manager> Object<M> {
    pub(crate) fn new(conn: M::Connection, slot: u64, pool: &Arc<PoolInner<M>>) -> Self {
        Self {
            conn: Some(conn),
            slot,
            discard: false,
            pool: Arc::downgrade(pool),
        }
    }

    /// Returns this [`Object`] to its [`Pool`] flagged as unhealthy. The
    /// slot is removed and the physical connection closed instead of being
    /// parked for reuse; the freed capacity unit goes to the oldest waiter.
    pub fn discard(mut this: Self) {
        this.discard = true;
    }

    /// Takes this [`Object`] from its [`Pool`] permanently. The slot is
    /// removed, freeing a capacity unit, and the connection is never closed
    /// by the pool.
    #[must_use]
    pub fn take(mut this: Self) -> M::Connection {
        let conn = this.conn.take().unwrap();
        if let Some(pool) = this.pool.upgrade() {
            pool.detach(this.slot);
        }
        conn
    }

    /// Identifier of the slot backing this lease, stable for the slot's
    /// lifetime and unique within the pool.
    #[must_use]
    pub fn slot_id(this: &Self) -> u64 {
        this.slot
    }

    /// Returns the [`Pool`] this [`Object`] belongs to.
    ///
    /// Since [`Object`]s only hold a [`Weak`] reference to the [`Pool`] they
    /// come from, this can fail and return [`None`] instead.
    pub fn pool(this: &Self) -> Option<Pool<M>> {
        this.pool.upgrade().map(|inner| Pool { inner })
    }
}

impl<M: Manager> Drop for Object<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.release(self.slot, conn, self.discard);
            }
        }
    }
}

impl<M: Manager> Deref for Object<M> {
    type Target = M::Connection;
    fn deref(&self) -> &M::Connection {
        self.conn.as_ref().unwrap()
    }
}

impl<M: Manager> DerefMut for Object<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap()
    }
}

impl<M: Manager> AsRef<M::Connection> for Object<M> {
    fn as_ref(&self) -> &M::Connection {
        self
    }
}

impl<M: Manager> AsMut<M::Connection> for Object<M> {
    fn as_mut(&mut self) -> &mut M::Connection {
        self
    }
}
