use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use slotpool::{Manager, Object, Pool};

struct Counting {
    opened: AtomicU64,
    closed: AtomicU64,
    valid: AtomicBool,
}

impl Counting {
    fn new() -> Self {
        Self {
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            valid: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Manager for Counting {
    type Connection = u64;
    type Error = Infallible;

    async fn open(&self) -> Result<u64, Infallible> {
        Ok(self.opened.fetch_add(1, Ordering::SeqCst))
    }

    async fn close(&self, _conn: u64) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn validate(&self, _conn: &mut u64) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn expired_idle_slot_is_replaced_on_claim() {
    // Maintenance is effectively off; the claim path alone must refuse to
    // hand out a slot past its lifetime.
    let pool = Pool::builder(Counting::new())
        .max_size(1)
        .max_lifetime(Some(Duration::from_millis(100)))
        .maintenance_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let a = pool.get().await.unwrap();
    let first = Object::slot_id(&a);
    drop(a);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let b = pool.get().await.unwrap();
    assert_ne!(Object::slot_id(&b), first);
    assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 2);
    assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_expired_slot_is_replaced_on_claim() {
    // As above, maintenance is parked; idle-timeout staleness must be
    // caught on the claim path too.
    let pool = Pool::builder(Counting::new())
        .max_size(1)
        .max_lifetime(None)
        .idle_timeout(Some(Duration::from_millis(50)))
        .maintenance_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    let a = pool.get().await.unwrap();
    let first = Object::slot_id(&a);
    drop(a);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let b = pool.get().await.unwrap();
    assert_ne!(Object::slot_id(&b), first);
    assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 2);
    assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_eviction_respects_the_min_idle_floor() {
    let pool = Pool::builder(Counting::new())
        .max_size(4)
        .min_idle(2)
        .idle_timeout(Some(Duration::from_millis(50)))
        .max_lifetime(None)
        .maintenance_interval(Duration::from_millis(25))
        .build()
        .unwrap();

    let held: Vec<_> = get_n(&pool, 4).await;
    drop(held);
    assert_eq!(pool.status().idle, 4);

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Two evicted, never dropping below the floor; no churn afterwards.
    let status = pool.status();
    assert_eq!(status.idle, 2);
    assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 2);
    assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn pool_refills_toward_min_idle() {
    let pool = Pool::builder(Counting::new())
        .max_size(4)
        .min_idle(2)
        .maintenance_interval(Duration::from_millis(10))
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    let status = pool.status();
    assert_eq!(status.idle, 2);
    assert_eq!(status.total(), 2);
    assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn lifetime_eviction_of_in_use_slot_waits_for_release() {
    let pool = Pool::builder(Counting::new())
        .max_size(2)
        .max_lifetime(Some(Duration::from_millis(50)))
        .maintenance_interval(Duration::from_millis(20))
        .build()
        .unwrap();

    let a = pool.get().await.unwrap();
    let first = Object::slot_id(&a);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The lease is never interrupted.
    assert_eq!(pool.status().active, 1);
    assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 0);

    // On release the retired slot is closed instead of parked.
    drop(a);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.status().idle, 0);

    let b = pool.get().await.unwrap();
    assert_ne!(Object::slot_id(&b), first);
}

#[tokio::test(start_paused = true)]
async fn keepalive_failure_closes_the_idle_slot() {
    let pool = Pool::builder(Counting::new())
        .max_size(2)
        .keepalive(Some(Duration::from_millis(50)))
        .maintenance_interval(Duration::from_millis(20))
        .build()
        .unwrap();

    let a = pool.get().await.unwrap();
    drop(a);
    assert_eq!(pool.status().idle, 1);

    pool.manager().valid.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.metrics().validation_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn keepalive_success_keeps_the_slot() {
    let pool = Pool::builder(Counting::new())
        .max_size(2)
        .keepalive(Some(Duration::from_millis(50)))
        .idle_timeout(None)
        .maintenance_interval(Duration::from_millis(20))
        .build()
        .unwrap();

    let a = pool.get().await.unwrap();
    let slot = Object::slot_id(&a);
    drop(a);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.status().idle, 1);
    assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 0);

    let b = pool.get().await.unwrap();
    assert_eq!(Object::slot_id(&b), slot);
}

#[tokio::test]
async fn test_on_acquire_replaces_invalid_connections() {
    let pool = Pool::builder(Counting::new())
        .max_size(2)
        .test_on_acquire(true)
        .build()
        .unwrap();

    let a = pool.get().await.unwrap();
    let first = Object::slot_id(&a);
    drop(a);

    // The parked connection now fails its pre-use validation; the next get
    // must replace it transparently instead of failing.
    pool.manager().valid.store(false, Ordering::SeqCst);
    let b = pool.get().await.unwrap();
    assert_ne!(Object::slot_id(&b), first);
    assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 2);
    assert_eq!(pool.metrics().validation_failures, 1);
}

async fn get_n(pool: &Pool<Counting>, n: usize) -> Vec<Object<Counting>> {
    let mut held = Vec::with_capacity(n);
    for _ in 0..n {
        held.push(pool.get().await.unwrap());
    }
    held
}
