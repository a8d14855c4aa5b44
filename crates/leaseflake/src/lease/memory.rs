use core::time::Duration;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use portable_atomic::{AtomicU64, Ordering};

use crate::lease::MachineIdRepo;

/// Errors returned by [`MemoryRepo`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MemoryStoreError {
    /// Every machine ID in the store's range is leased.
    #[error("no available machine ID in 0-{max}")]
    Exhausted { max: u64 },

    /// The caller does not hold a live lease on the machine ID.
    #[error("machine ID {machine_id} is not leased by this owner")]
    NotLeased { machine_id: u64 },

    /// The lease table lock was poisoned.
    #[error("lease table poisoned")]
    Poisoned,
}

/// Call counters of a [`MemoryStore`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub acquire: u64,
    pub renew: u64,
    pub release: u64,
}

#[derive(Debug)]
struct Lease {
    owner: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct StoreInner {
    leases: Mutex<HashMap<u64, Lease>>,
    max_machine_id: u64,
    next_owner: AtomicU64,
    acquire_calls: AtomicU64,
    renew_calls: AtomicU64,
    release_calls: AtomicU64,
}

/// An in-process lease table with TTL expiry.
///
/// The store stands in for an external coordination store in tests, benches
/// and single-host tools. Each [`MemoryRepo`] handed out by [`MemoryStore::repo`]
/// is a distinct owner: it can only renew the leases it acquired itself, and
/// an expired lease can be taken over by anyone.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use leaseflake::{MachineIdRepo, MemoryStore};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let a = store.repo();
/// let b = store.repo();
///
/// let ttl = Duration::from_secs(30);
/// assert_eq!(a.acquire_machine_id(ttl).await.unwrap(), 0);
/// assert_eq!(b.acquire_machine_id(ttl).await.unwrap(), 1);
/// assert!(b.renew_machine_id(0, ttl).await.is_err());
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store handing out machine IDs `0..=65535`.
    pub fn new() -> Self {
        Self::with_max_machine_id(u64::from(u16::MAX))
    }

    /// Creates a store handing out machine IDs `0..=max_machine_id`.
    pub fn with_max_machine_id(max_machine_id: u64) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                leases: Mutex::new(HashMap::new()),
                max_machine_id,
                next_owner: AtomicU64::new(0),
                acquire_calls: AtomicU64::new(0),
                renew_calls: AtomicU64::new(0),
                release_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a client acting as a new, distinct lease owner.
    pub fn repo(&self) -> MemoryRepo {
        MemoryRepo {
            inner: Arc::clone(&self.inner),
            owner: self.inner.next_owner.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Machine IDs with a live lease, in ascending order.
    pub fn leased(&self) -> Vec<u64> {
        let now = Instant::now();
        let leases = self
            .inner
            .leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<u64> = leases
            .iter()
            .filter(|(_, lease)| lease.expires_at > now)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            acquire: self.inner.acquire_calls.load(Ordering::Relaxed),
            renew: self.inner.renew_calls.load(Ordering::Relaxed),
            release: self.inner.release_calls.load(Ordering::Relaxed),
        }
    }
}

/// One lease owner's view of a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryRepo {
    inner: Arc<StoreInner>,
    owner: u64,
}

impl MemoryRepo {
    fn acquire(&self, ttl: Duration) -> Result<u64, MemoryStoreError> {
        let now = Instant::now();
        let mut leases = self
            .inner
            .leases
            .lock()
            .map_err(|_| MemoryStoreError::Poisoned)?;

        let machine_id = (0..=self.inner.max_machine_id)
            .find(|id| leases.get(id).is_none_or(|lease| lease.expires_at <= now))
            .ok_or(MemoryStoreError::Exhausted {
                max: self.inner.max_machine_id,
            })?;

        leases.insert(
            machine_id,
            Lease {
                owner: self.owner,
                expires_at: now + ttl,
            },
        );
        Ok(machine_id)
    }

    fn renew(&self, machine_id: u64, ttl: Duration) -> Result<(), MemoryStoreError> {
        let now = Instant::now();
        let mut leases = self
            .inner
            .leases
            .lock()
            .map_err(|_| MemoryStoreError::Poisoned)?;

        match leases.get_mut(&machine_id) {
            Some(lease) if lease.owner == self.owner && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(MemoryStoreError::NotLeased { machine_id }),
        }
    }

    fn release(&self, machine_id: u64) -> Result<(), MemoryStoreError> {
        let mut leases = self
            .inner
            .leases
            .lock()
            .map_err(|_| MemoryStoreError::Poisoned)?;

        if leases
            .get(&machine_id)
            .is_some_and(|lease| lease.owner == self.owner)
        {
            leases.remove(&machine_id);
        }
        Ok(())
    }
}

impl MachineIdRepo for MemoryRepo {
    type Error = MemoryStoreError;

    async fn acquire_machine_id(&self, ttl: Duration) -> Result<u64, Self::Error> {
        self.inner.acquire_calls.fetch_add(1, Ordering::Relaxed);
        self.acquire(ttl)
    }

    async fn renew_machine_id(&self, machine_id: u64, ttl: Duration) -> Result<(), Self::Error> {
        self.inner.renew_calls.fetch_add(1, Ordering::Relaxed);
        self.renew(machine_id, ttl)
    }

    async fn release_machine_id(&self, machine_id: u64) -> Result<(), Self::Error> {
        self.inner.release_calls.fetch_add(1, Ordering::Relaxed);
        self.release(machine_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn acquire_hands_out_lowest_free_id() {
        let store = MemoryStore::new();
        let a = store.repo();
        let b = store.repo();

        assert_eq!(a.acquire_machine_id(TTL).await, Ok(0));
        assert_eq!(b.acquire_machine_id(TTL).await, Ok(1));
        a.release_machine_id(0).await.unwrap();
        assert_eq!(b.acquire_machine_id(TTL).await, Ok(0));
        assert_eq!(store.leased(), vec![0, 1]);
    }

    #[tokio::test]
    async fn exhausted_range_is_an_error() {
        let store = MemoryStore::with_max_machine_id(1);
        let repo = store.repo();
        repo.acquire_machine_id(TTL).await.unwrap();
        repo.acquire_machine_id(TTL).await.unwrap();
        assert_eq!(
            repo.acquire_machine_id(TTL).await,
            Err(MemoryStoreError::Exhausted { max: 1 })
        );
    }

    #[tokio::test]
    async fn renew_requires_ownership() {
        let store = MemoryStore::new();
        let owner = store.repo();
        let other = store.repo();

        let id = owner.acquire_machine_id(TTL).await.unwrap();
        assert_eq!(owner.renew_machine_id(id, TTL).await, Ok(()));
        assert_eq!(
            other.renew_machine_id(id, TTL).await,
            Err(MemoryStoreError::NotLeased { machine_id: id })
        );
        assert_eq!(
            owner.renew_machine_id(id + 1, TTL).await,
            Err(MemoryStoreError::NotLeased { machine_id: id + 1 })
        );
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over_and_cannot_be_renewed() {
        let store = MemoryStore::new();
        let first = store.repo();
        let second = store.repo();
        let short = Duration::from_millis(20);

        let id = first.acquire_machine_id(short).await.unwrap();
        tokio::time::sleep(short * 2).await;

        assert!(store.leased().is_empty());
        assert_eq!(second.acquire_machine_id(TTL).await, Ok(id));
        assert!(first.renew_machine_id(id, TTL).await.is_err());
    }

    #[tokio::test]
    async fn release_is_idempotent_and_ignores_foreign_leases() {
        let store = MemoryStore::new();
        let owner = store.repo();
        let other = store.repo();

        let id = owner.acquire_machine_id(TTL).await.unwrap();
        assert_eq!(other.release_machine_id(id).await, Ok(()));
        assert_eq!(store.leased(), vec![id]);

        assert_eq!(owner.release_machine_id(id).await, Ok(()));
        assert_eq!(owner.release_machine_id(id).await, Ok(()));
        assert!(store.leased().is_empty());
        assert_eq!(
            store.stats(),
            StoreStats {
                acquire: 1,
                renew: 0,
                release: 3,
            }
        );
    }

    #[tokio::test]
    async fn leased_survives_a_poisoned_table() {
        let store = MemoryStore::new();
        let repo = store.repo();
        let id = repo.acquire_machine_id(TTL).await.unwrap();

        let inner = Arc::clone(&store.inner);
        let panicked = std::thread::spawn(move || {
            let _guard = inner.leases.lock().unwrap();
            panic!("poison the lease table");
        })
        .join();
        assert!(panicked.is_err());
        assert!(store.inner.leases.is_poisoned());

        assert_eq!(store.leased(), vec![id]);
    }
}
