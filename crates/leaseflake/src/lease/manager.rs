//! Machine ID lease lifecycle.
//!
//! A [`LeaseManager`] takes a machine ID from a [`MachineIdRepo`] once,
//! renews it from a background Tokio task on a fixed cadence, and hands it
//! back exactly once on [`LeaseManager::stop`]:
//!
//! ```text
//! Unleased --acquire--> Renewing --stop--> Stopping --release--> Released
//! ```
//!
//! Renewal never blocks identifier generation and its failures are only
//! logged and counted; the store's TTL is the safety margin. Shutdown cancels the renewal
//! task and waits for it to exit before releasing, so no renewal can race
//! with or follow the release.

use core::time::Duration;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use portable_atomic::{AtomicU32, Ordering};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result, StoreError, StoreTimeout},
    lease::MachineIdRepo,
};

/// Default lease duration.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Default renewal cadence, a third of [`DEFAULT_LEASE_TTL`].
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// The lease settings a [`LeaseManager`] runs with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeaseTerms {
    /// Lease duration requested from the store.
    pub ttl: Duration,
    /// Time between two renewals. Always shorter than `ttl`.
    pub renewal_interval: Duration,
    /// Deadline for each acquire, renew and release call.
    pub store_timeout: Duration,
}

impl Default for LeaseTerms {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LEASE_TTL,
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl LeaseTerms {
    /// Checks the terms before anything is leased.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidLeaseTtl`] or [`Error::InvalidRenewalInterval`] for
    ///   zero durations.
    /// - [`Error::RenewalNotBelowTtl`] unless `renewal_interval < ttl`.
    /// - [`Error::InvalidStoreTimeout`] for a zero store timeout.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::InvalidLeaseTtl);
        }
        if self.renewal_interval.is_zero() {
            return Err(Error::InvalidRenewalInterval);
        }
        if self.renewal_interval >= self.ttl {
            return Err(Error::RenewalNotBelowTtl {
                interval: self.renewal_interval,
                ttl: self.ttl,
            });
        }
        if self.store_timeout.is_zero() {
            return Err(Error::InvalidStoreTimeout);
        }
        Ok(())
    }
}

/// Observable phase of a lease.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaseState {
    /// The lease is held and renewed in the background.
    Renewing,
    /// Shutdown has begun; the lease is being handed back.
    Stopping,
    /// The renewal task has exited and release was attempted. A failed
    /// release still ends here; the store expires the lease on its own.
    Released,
}

type ShutdownFuture = Shared<BoxFuture<'static, Result<()>>>;

/// Owner of one leased machine ID.
///
/// Dropping the manager without calling [`LeaseManager::stop`] cancels the
/// renewal task but does not release the lease, which then lapses after its
/// TTL.
pub struct LeaseManager<R>
where
    R: MachineIdRepo,
{
    repo: Arc<R>,
    machine_id: u64,
    terms: LeaseTerms,
    token: CancellationToken,
    renewal_failures: Arc<AtomicU32>,
    shutdown: ShutdownFuture,
}

impl<R> LeaseManager<R>
where
    R: MachineIdRepo,
{
    /// Leases a machine ID no larger than `max_machine_id` and starts
    /// renewing it.
    ///
    /// Must be called from within a Tokio runtime; the renewal task is
    /// spawned onto it.
    ///
    /// # Errors
    ///
    /// - Any error of [`LeaseTerms::validate`], before the store is
    ///   contacted.
    /// - [`Error::AcquireMachineId`] if the store fails or exceeds
    ///   `terms.store_timeout`. Nothing is leased in that case.
    /// - [`Error::MachineIdOutOfRange`] if the store hands out an ID that does
    ///   not fit. The ID is released again before returning.
    pub async fn acquire(repo: Arc<R>, terms: LeaseTerms, max_machine_id: u64) -> Result<Self> {
        terms.validate()?;

        let machine_id = bounded(terms.store_timeout, repo.acquire_machine_id(terms.ttl))
            .await
            .map_err(Error::AcquireMachineId)?;

        if machine_id > max_machine_id {
            #[cfg(feature = "tracing")]
            tracing::error!(machine_id, max_machine_id, "leased machine ID does not fit, releasing it");
            if let Err(_e) =
                bounded(terms.store_timeout, repo.release_machine_id(machine_id)).await
            {
                #[cfg(feature = "tracing")]
                tracing::warn!(machine_id, "failed to release out-of-range machine ID: {_e}");
            }
            return Err(Error::MachineIdOutOfRange {
                machine_id,
                max: max_machine_id,
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            machine_id,
            ttl = ?terms.ttl,
            renewal_interval = ?terms.renewal_interval,
            "machine ID leased"
        );

        let token = CancellationToken::new();
        let renewal_failures = Arc::new(AtomicU32::new(0));
        let renewer = tokio::spawn(renew_loop(
            Arc::clone(&repo),
            machine_id,
            terms,
            token.clone(),
            Arc::clone(&renewal_failures),
        ));
        let shutdown = shutdown(Arc::clone(&repo), machine_id, terms, token.clone(), renewer);

        Ok(Self {
            repo,
            machine_id,
            terms,
            token,
            renewal_failures,
            shutdown,
        })
    }

    pub const fn machine_id(&self) -> u64 {
        self.machine_id
    }

    pub const fn terms(&self) -> LeaseTerms {
        self.terms
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Number of renewals that failed since the last successful one.
    ///
    /// Renewal failures are never returned to callers; export this to
    /// metrics to notice a store that stopped answering.
    pub fn renewal_failures(&self) -> u32 {
        self.renewal_failures.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> LeaseState {
        if self.shutdown.peek().is_some() {
            LeaseState::Released
        } else if self.token.is_cancelled() {
            LeaseState::Stopping
        } else {
            LeaseState::Renewing
        }
    }

    /// Stops renewing and releases the machine ID.
    ///
    /// The renewal task is cancelled and awaited before the release call, and
    /// the release runs exactly once no matter how many times, or from how
    /// many tasks, this is called. Every caller receives the outcome of that
    /// single release.
    ///
    /// # Errors
    ///
    /// [`Error::ReleaseMachineId`] if the store fails or exceeds the store
    /// timeout. The lease is considered stopped either way.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.clone().await
    }
}

impl<R> Drop for LeaseManager<R>
where
    R: MachineIdRepo,
{
    fn drop(&mut self) {
        if self.shutdown.peek().is_none() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                machine_id = self.machine_id,
                "lease dropped without stop, it will lapse after its ttl"
            );
        }
        self.token.cancel();
    }
}

impl<R> core::fmt::Debug for LeaseManager<R>
where
    R: MachineIdRepo,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LeaseManager")
            .field("machine_id", &self.machine_id)
            .field("terms", &self.terms)
            .field("state", &self.state())
            .field("renewal_failures", &self.renewal_failures())
            .finish_non_exhaustive()
    }
}

/// Builds the one-shot shutdown sequence. Nothing runs until it is polled.
fn shutdown<R>(
    repo: Arc<R>,
    machine_id: u64,
    terms: LeaseTerms,
    token: CancellationToken,
    renewer: JoinHandle<()>,
) -> ShutdownFuture
where
    R: MachineIdRepo,
{
    async move {
        token.cancel();
        if let Err(_e) = renewer.await {
            #[cfg(feature = "tracing")]
            tracing::warn!(machine_id, "renewal task ended abnormally: {_e}");
        }

        match bounded(terms.store_timeout, repo.release_machine_id(machine_id)).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::info!(machine_id, "machine ID released");
                Ok(())
            }
            Err(source) => {
                #[cfg(feature = "tracing")]
                tracing::error!(machine_id, "failed to release machine ID: {source}");
                Err(Error::ReleaseMachineId { machine_id, source })
            }
        }
    }
    .boxed()
    .shared()
}

/// Renews the lease every `terms.renewal_interval` until `token` is
/// cancelled. The first renewal happens one interval after start.
async fn renew_loop<R>(
    repo: Arc<R>,
    machine_id: u64,
    terms: LeaseTerms,
    token: CancellationToken,
    failures: Arc<AtomicU32>,
) where
    R: MachineIdRepo,
{
    let period = terms.renewal_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_renewed = Instant::now();

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // An in-flight renewal is allowed to finish; `stop` waits for it.
        match bounded(terms.store_timeout, repo.renew_machine_id(machine_id, terms.ttl)).await {
            Ok(()) => {
                let _previous = failures.swap(0, Ordering::Relaxed);
                #[cfg(feature = "tracing")]
                {
                    if _previous > 0 {
                        tracing::info!(machine_id, failures = _previous, "lease renewal recovered");
                    } else {
                        tracing::trace!(machine_id, "lease renewed");
                    }
                }
                last_renewed = Instant::now();
            }
            Err(_e) => {
                let _failures = failures.fetch_add(1, Ordering::Relaxed) + 1;
                let _overdue = last_renewed.elapsed() >= terms.ttl;
                #[cfg(feature = "tracing")]
                {
                    tracing::warn!(machine_id, failures = _failures, "lease renewal failed: {_e}");
                    if _overdue {
                        tracing::error!(
                            machine_id,
                            failures = _failures,
                            "no successful renewal within the lease ttl, the lease has likely expired"
                        );
                    }
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(machine_id, "lease renewal stopped");
}

/// Runs a store call under `limit`, erasing its error type.
async fn bounded<T, E>(
    limit: Duration,
    call: impl Future<Output = core::result::Result<T, E>>,
) -> core::result::Result<T, StoreError>
where
    E: core::error::Error + Send + Sync + 'static,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Arc::new(e)),
        Err(_) => Err(Arc::new(StoreTimeout(limit))),
    }
}
