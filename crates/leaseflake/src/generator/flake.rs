use core::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    error::Result,
    generator::{Encoder, GeneratorBuilder},
    id::{BitLayout, Decomposed, FlakeId},
    lease::{LeaseManager, LeaseState, MachineIdRepo},
    time::{MonotonicClock, TimeSource},
};

/// An identifier generator backed by a leased machine ID.
///
/// A `Generator` owns an [`Encoder`] and the [`LeaseManager`] holding the
/// encoder's machine ID. Generation is synchronous and never touches the
/// store; the lease is renewed by a background task until [`Generator::stop`].
///
/// ## Features
/// - ✅ Thread-safe: share it behind an `Arc` and call `next_id` from any
///   thread or task
/// - ✅ No store round trip per identifier
/// - ✅ Exactly-once release, however many times `stop` is called
///
/// ## Lifecycle
/// 1. [`Generator::builder`] validates the configuration and leases a
///    machine ID.
/// 2. [`Generator::next_id`] mints identifiers.
/// 3. [`Generator::stop`] stops renewal and releases the machine ID. Call it
///    before shutdown; a dropped generator leaves its lease to expire.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use leaseflake::{Generator, MemoryStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
/// let generator = Generator::builder()
///     .repo(store.repo())
///     .lease_ttl(Duration::from_secs(30))
///     .renewal_interval(Duration::from_secs(10))
///     .build()
///     .await
///     .unwrap();
///
/// let id = generator.next_id().unwrap();
/// let parts = generator.decompose(id);
/// assert_eq!(parts.machine_id, generator.machine_id());
///
/// generator.stop().await.unwrap();
/// assert!(store.leased().is_empty());
/// # });
/// ```
#[derive(Debug)]
pub struct Generator<R, T = MonotonicClock>
where
    R: MachineIdRepo,
    T: TimeSource,
{
    encoder: Encoder<T>,
    lease: LeaseManager<R>,
}

impl<R> Generator<R, MonotonicClock>
where
    R: MachineIdRepo,
{
    /// Returns a builder with production defaults.
    pub fn builder() -> GeneratorBuilder<R, MonotonicClock> {
        GeneratorBuilder::new()
    }

    /// Builds a generator with default settings on top of `repo`.
    ///
    /// # Errors
    ///
    /// See [`GeneratorBuilder::build`].
    pub async fn new(repo: R) -> Result<Self> {
        Self::builder().repo(repo).build().await
    }
}

impl<R, T> Generator<R, T>
where
    R: MachineIdRepo,
    T: TimeSource,
{
    pub(crate) const fn from_parts(encoder: Encoder<T>, lease: LeaseManager<R>) -> Self {
        Self { encoder, lease }
    }

    /// Generates the next identifier.
    ///
    /// May block the calling thread for up to one time unit when the
    /// sequence of the current unit is exhausted.
    ///
    /// # Errors
    ///
    /// [`Error::ClockBeforeEpoch`] or [`Error::TimeOverflow`] for this call
    /// only, or [`Error::LockPoisoned`]. The generator stays usable.
    ///
    /// [`Error::ClockBeforeEpoch`]: crate::Error::ClockBeforeEpoch
    /// [`Error::TimeOverflow`]: crate::Error::TimeOverflow
    /// [`Error::LockPoisoned`]: crate::Error::LockPoisoned
    pub fn next_id(&self) -> Result<FlakeId> {
        self.encoder.next_id()
    }

    /// Returns the start of the time unit `id` was minted in.
    pub fn to_time(&self, id: FlakeId) -> SystemTime {
        self.encoder.to_time(id)
    }

    /// Splits `id` into its fields.
    pub const fn decompose(&self, id: FlakeId) -> Decomposed {
        self.encoder.decompose(id)
    }

    /// Stops lease renewal and releases the machine ID.
    ///
    /// Idempotent and safe to call concurrently: the release runs once and
    /// every caller gets its result. Identifiers minted after `stop` carry a
    /// machine ID that may already be leased elsewhere.
    ///
    /// # Errors
    ///
    /// [`Error::ReleaseMachineId`] if the store could not release the lease.
    /// The generator is stopped regardless.
    ///
    /// [`Error::ReleaseMachineId`]: crate::Error::ReleaseMachineId
    pub async fn stop(&self) -> Result<()> {
        self.lease.stop().await
    }

    pub const fn machine_id(&self) -> u64 {
        self.encoder.machine_id()
    }

    pub const fn layout(&self) -> BitLayout {
        self.encoder.layout()
    }

    pub const fn time_unit(&self) -> Duration {
        self.encoder.time_unit()
    }

    pub fn start_time(&self) -> SystemTime {
        UNIX_EPOCH + self.encoder.epoch()
    }

    pub const fn lease_ttl(&self) -> Duration {
        self.lease.terms().ttl
    }

    pub const fn renewal_interval(&self) -> Duration {
        self.lease.terms().renewal_interval
    }

    pub fn lease_state(&self) -> LeaseState {
        self.lease.state()
    }

    /// Consecutive failed renewals; see [`LeaseManager::renewal_failures`].
    pub fn renewal_failures(&self) -> u32 {
        self.lease.renewal_failures()
    }

    /// The coordination store the machine ID is leased from.
    pub fn repo(&self) -> &R {
        self.lease.repo()
    }
}
