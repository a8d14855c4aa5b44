use core::time::Duration;

/// Default epoch: Wednesday, January 1, 2025 00:00:00 UTC
pub const DEFAULT_EPOCH: Duration = Duration::from_millis(1_735_689_600_000);

/// A trait for clocks that report the current time as a [`Duration`] since
/// the Unix epoch.
///
/// This abstraction allows you to plug in the default [`MonotonicClock`], the
/// raw system clock, or a scripted clock in tests.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use leaseflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn now(&self) -> Duration {
///         Duration::from_millis(1234)
///     }
/// }
///
/// assert_eq!(FixedTime.now().as_millis(), 1234);
/// ```
///
/// [`MonotonicClock`]: crate::MonotonicClock
pub trait TimeSource {
    /// Returns the time elapsed since 1970-01-01 UTC.
    fn now(&self) -> Duration;
}
