use core::time::Duration;
use std::sync::Arc;

/// The coordination store that arbitrates machine ID ownership.
///
/// Implementations typically sit on top of a key-value store with TTL or
/// lease semantics (etcd, Consul, Redis). Callers bound every call with a
/// deadline by dropping the returned future, so implementations must be
/// cancel-safe with respect to their own bookkeeping.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use leaseflake::MachineIdRepo;
///
/// /// Hands out a fixed machine ID; useful when IDs are assigned by the
/// /// deployment rather than leased.
/// struct Static(u64);
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("unreachable")]
/// struct Never;
///
/// impl MachineIdRepo for Static {
///     type Error = Never;
///
///     async fn acquire_machine_id(&self, _ttl: Duration) -> Result<u64, Never> {
///         Ok(self.0)
///     }
///
///     async fn renew_machine_id(&self, _id: u64, _ttl: Duration) -> Result<(), Never> {
///         Ok(())
///     }
///
///     async fn release_machine_id(&self, _id: u64) -> Result<(), Never> {
///         Ok(())
///     }
/// }
/// ```
pub trait MachineIdRepo: Send + Sync + 'static {
    /// Error reported by the store.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Leases a machine ID that is not currently leased elsewhere, for `ttl`.
    fn acquire_machine_id(
        &self,
        ttl: Duration,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Extends the lease on `machine_id` by `ttl`.
    ///
    /// Must fail, rather than silently succeed, when the lease no longer
    /// belongs to the caller.
    fn renew_machine_id(
        &self,
        machine_id: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Gives up the lease on `machine_id`. Releasing an already released ID
    /// may succeed.
    fn release_machine_id(
        &self,
        machine_id: u64,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<R> MachineIdRepo for Arc<R>
where
    R: MachineIdRepo,
{
    type Error = R::Error;

    fn acquire_machine_id(
        &self,
        ttl: Duration,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send {
        (**self).acquire_machine_id(ttl)
    }

    fn renew_machine_id(
        &self,
        machine_id: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        (**self).renew_machine_id(machine_id, ttl)
    }

    fn release_machine_id(
        &self,
        machine_id: u64,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        (**self).release_machine_id(machine_id)
    }
}
