use core::time::Duration;
use std::sync::Arc;

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A type-erased error returned by a [`MachineIdRepo`].
///
/// Store errors are reference counted so that a single `stop` outcome can be
/// handed to every caller.
///
/// [`MachineIdRepo`]: crate::MachineIdRepo
pub type StoreError = Arc<dyn core::error::Error + Send + Sync + 'static>;

/// All error variants that `leaseflake` can emit.
///
/// Configuration variants are only produced while building a
/// [`Generator`](crate::Generator), before any lease is taken.
/// [`Error::ClockBeforeEpoch`] and [`Error::TimeOverflow`] are per-call
/// failures of `next_id` and leave the generator usable.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No coordination store was supplied to the builder.
    #[error("a machine ID repository is required")]
    MissingRepo,

    /// The start time is not strictly in the past.
    #[error("start time must be in the past")]
    InvalidStartTime,

    /// The time unit is shorter than one millisecond, or the generator's
    /// lifetime cannot be represented.
    #[error("time unit must be at least 1ms, got {0:?}")]
    InvalidTimeUnit(Duration),

    /// The lease TTL is zero.
    #[error("lease ttl must be positive")]
    InvalidLeaseTtl,

    /// The renewal interval is zero.
    #[error("renewal interval must be positive")]
    InvalidRenewalInterval,

    /// The renewal interval does not leave room for a renewal before expiry.
    #[error("renewal interval {interval:?} must be less than lease ttl {ttl:?}")]
    RenewalNotBelowTtl { interval: Duration, ttl: Duration },

    /// The store call timeout is zero.
    #[error("store timeout must be positive")]
    InvalidStoreTimeout,

    /// The requested field widths cannot form a 63-bit identifier.
    #[error(
        "invalid bit layout: {sequence_bits} sequence bits, {machine_id_bits} machine ID bits"
    )]
    InvalidBitLayout {
        sequence_bits: u8,
        machine_id_bits: u8,
    },

    /// The store failed to hand out a machine ID, or did not answer in time.
    #[error("failed to acquire machine ID")]
    AcquireMachineId(#[source] StoreError),

    /// The leased machine ID does not fit in the machine ID field. The lease
    /// has already been handed back when this is returned.
    #[error("machine ID {machine_id} exceeds bit space (0-{max})")]
    MachineIdOutOfRange { machine_id: u64, max: u64 },

    /// The store failed to release the machine ID during `stop`.
    #[error("failed to release machine ID {machine_id}")]
    ReleaseMachineId {
        machine_id: u64,
        #[source]
        source: StoreError,
    },

    /// The clock reads earlier than the configured epoch.
    #[error("clock moved before the epoch")]
    ClockBeforeEpoch,

    /// The elapsed time no longer fits in the time field.
    #[error("time field exhausted: elapsed {elapsed} exceeds {max}")]
    TimeOverflow { elapsed: u128, max: u64 },

    /// The generator state lock was poisoned by a panicking thread.
    ///
    /// Not produced when the `parking-lot` feature is enabled, since its
    /// mutexes do not poison.
    #[error("generator lock poisoned")]
    LockPoisoned,
}

/// Raised in place of a store error when a store call outlives its deadline.
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("store call timed out after {0:?}")]
pub struct StoreTimeout(pub Duration);

#[cfg(not(feature = "parking-lot"))]
use crate::generator::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
