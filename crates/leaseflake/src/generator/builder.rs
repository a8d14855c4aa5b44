use core::time::Duration;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{Error, Result},
    generator::{Encoder, Generator, MIN_TIME_UNIT, encoder::lifetime_end},
    id::{BitLayout, DEFAULT_MACHINE_ID_BITS, DEFAULT_SEQUENCE_BITS},
    lease::{LeaseManager, LeaseTerms, MachineIdRepo},
    time::{DEFAULT_EPOCH, MonotonicClock, TimeSource},
};

/// Default resolution of the time field.
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_millis(10);

/// Configures and builds a [`Generator`].
///
/// Every option has a production default:
///
/// | Option | Default |
/// |---|---|
/// | [`start_time`](Self::start_time) | 2025-01-01T00:00:00Z |
/// | [`time_unit`](Self::time_unit) | 10ms |
/// | [`lease_ttl`](Self::lease_ttl) | 30s |
/// | [`renewal_interval`](Self::renewal_interval) | 10s |
/// | [`store_timeout`](Self::store_timeout) | 5s |
/// | [`bits`](Self::bits) | 8 sequence bits, 16 machine ID bits |
/// | [`clock`](Self::clock) | [`MonotonicClock`] |
///
/// Options are only checked by [`build`](Self::build), all of them before
/// the store is contacted.
#[derive(Debug)]
pub struct GeneratorBuilder<R, T = MonotonicClock> {
    repo: Option<R>,
    start_time: SystemTime,
    time_unit: Duration,
    terms: LeaseTerms,
    sequence_bits: u8,
    machine_id_bits: u8,
    clock: T,
}

impl<R> Default for GeneratorBuilder<R, MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> GeneratorBuilder<R, MonotonicClock> {
    pub fn new() -> Self {
        Self {
            repo: None,
            start_time: UNIX_EPOCH + DEFAULT_EPOCH,
            time_unit: DEFAULT_TIME_UNIT,
            terms: LeaseTerms::default(),
            sequence_bits: DEFAULT_SEQUENCE_BITS,
            machine_id_bits: DEFAULT_MACHINE_ID_BITS,
            clock: MonotonicClock::new(),
        }
    }
}

impl<R, T> GeneratorBuilder<R, T> {
    /// Sets the coordination store machine IDs are leased from. Required.
    #[must_use]
    pub fn repo(mut self, repo: R) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Sets the epoch. Must be strictly in the past; a recent epoch leaves
    /// more of the time field for the future.
    #[must_use]
    pub fn start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = start_time;
        self
    }

    /// Sets the resolution of the time field. Must be at least 1ms. Smaller
    /// units shorten the generator's lifetime.
    #[must_use]
    pub fn time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = time_unit;
        self
    }

    /// Sets the lease duration requested from the store.
    #[must_use]
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.terms.ttl = ttl;
        self
    }

    /// Sets how often the lease is renewed. Must be shorter than the TTL.
    #[must_use]
    pub fn renewal_interval(mut self, interval: Duration) -> Self {
        self.terms.renewal_interval = interval;
        self
    }

    /// Sets the deadline applied to each acquire, renew and release call.
    #[must_use]
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.terms.store_timeout = timeout;
        self
    }

    /// Sets the field widths. Every process sharing the ID space must use the
    /// same values.
    #[must_use]
    pub fn bits(mut self, sequence_bits: u8, machine_id_bits: u8) -> Self {
        self.sequence_bits = sequence_bits;
        self.machine_id_bits = machine_id_bits;
        self
    }

    /// Sets the field widths from an existing layout.
    #[must_use]
    pub fn layout(self, layout: BitLayout) -> Self {
        self.bits(layout.sequence_bits(), layout.machine_id_bits())
    }

    /// Replaces the clock sampled by `next_id`.
    #[must_use]
    pub fn clock<C>(self, clock: C) -> GeneratorBuilder<R, C>
    where
        C: TimeSource,
    {
        GeneratorBuilder {
            repo: self.repo,
            start_time: self.start_time,
            time_unit: self.time_unit,
            terms: self.terms,
            sequence_bits: self.sequence_bits,
            machine_id_bits: self.machine_id_bits,
            clock,
        }
    }
}

impl<R, T> GeneratorBuilder<R, T>
where
    R: MachineIdRepo,
    T: TimeSource,
{
    /// Checks every option and returns the epoch and layout to build with.
    fn validate(&self) -> Result<(Duration, BitLayout)> {
        if self.repo.is_none() {
            return Err(Error::MissingRepo);
        }

        let epoch = self
            .start_time
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::InvalidStartTime)?;
        if epoch >= self.clock.now() {
            return Err(Error::InvalidStartTime);
        }

        if self.time_unit < MIN_TIME_UNIT {
            return Err(Error::InvalidTimeUnit(self.time_unit));
        }

        self.terms.validate()?;

        let layout = BitLayout::new(self.sequence_bits, self.machine_id_bits)?;
        lifetime_end(epoch, self.time_unit, layout)?;

        Ok((epoch, layout))
    }

    /// Validates the configuration, leases a machine ID and starts renewing
    /// it.
    ///
    /// Must be awaited within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - A configuration error ([`Error::MissingRepo`],
    ///   [`Error::InvalidStartTime`], [`Error::InvalidTimeUnit`],
    ///   [`Error::InvalidLeaseTtl`], [`Error::InvalidRenewalInterval`],
    ///   [`Error::RenewalNotBelowTtl`], [`Error::InvalidStoreTimeout`],
    ///   [`Error::InvalidBitLayout`]) before the store is contacted.
    /// - [`Error::AcquireMachineId`] if no machine ID could be leased.
    /// - [`Error::MachineIdOutOfRange`] if the leased ID does not fit the
    ///   layout. The ID has been released again.
    pub async fn build(self) -> Result<Generator<R, T>> {
        let (epoch, layout) = self.validate()?;
        let repo = self.repo.ok_or(Error::MissingRepo)?;

        let lease =
            LeaseManager::acquire(Arc::new(repo), self.terms, layout.max_machine_id()).await?;

        match Encoder::new(lease.machine_id(), epoch, self.time_unit, layout, self.clock) {
            Ok(encoder) => Ok(Generator::from_parts(encoder, lease)),
            Err(e) => {
                // A failed build must not keep the lease.
                if let Err(_release) = lease.stop().await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        machine_id = lease.machine_id(),
                        "failed to release machine ID after a failed build: {_release}"
                    );
                }
                Err(e)
            }
        }
    }
}
