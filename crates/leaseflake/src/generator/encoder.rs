use core::{cmp::Ordering, time::Duration};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{Error, Result},
    generator::Mutex,
    id::{BitLayout, Decomposed, FlakeId},
    time::TimeSource,
};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Smallest time unit an encoder accepts.
pub const MIN_TIME_UNIT: Duration = Duration::from_millis(1);

/// Mutable part of the encoder, only touched under its lock.
#[derive(Debug)]
struct EncoderState {
    last_elapsed: u64,
    sequence: u64,
}

/// A lock-based identifier encoder for one machine ID.
///
/// The encoder turns a clock reading into elapsed time units since its epoch
/// and packs them with the machine ID and a per-unit sequence. The whole
/// read-compare-pack step runs under a single [`Mutex`], so concurrent
/// callers always receive distinct, increasing identifiers.
///
/// When the sequence is exhausted within a time unit, [`Encoder::next_id`]
/// blocks the calling thread until the clock reaches the next unit. Under a
/// monotonic clock that wait is shorter than one time unit.
///
/// The encoder knows nothing about leases. [`Generator`] pairs it with a
/// leased machine ID; use it directly when machine IDs are assigned
/// statically.
///
/// [`Generator`]: crate::Generator
#[derive(Debug)]
pub struct Encoder<T>
where
    T: TimeSource,
{
    state: Mutex<EncoderState>,
    clock: T,
    epoch: Duration,
    time_unit: Duration,
    machine_id: u64,
    layout: BitLayout,
    lifetime_end: SystemTime,
}

impl<T> Encoder<T>
where
    T: TimeSource,
{
    /// Creates an encoder for `machine_id`.
    ///
    /// # Parameters
    ///
    /// - `machine_id`: The ID embedded in every identifier. Must fit the
    ///   layout's machine ID field.
    /// - `epoch`: The origin of the time field, as a [`Duration`] since
    ///   1970-01-01 UTC.
    /// - `time_unit`: The resolution of the time field, at least 1ms.
    /// - `layout`: Field widths shared by every process in the ID space.
    /// - `clock`: The [`TimeSource`] sampled on every call.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTimeUnit`] if `time_unit` is below 1ms or the last
    ///   representable instant overflows the system time.
    /// - [`Error::MachineIdOutOfRange`] if `machine_id` does not fit.
    ///
    /// # Example
    ///
    /// ```
    /// use core::time::Duration;
    /// use leaseflake::{BitLayout, DEFAULT_EPOCH, Encoder, MonotonicClock};
    ///
    /// let encoder = Encoder::new(
    ///     7,
    ///     DEFAULT_EPOCH,
    ///     Duration::from_millis(10),
    ///     BitLayout::default(),
    ///     MonotonicClock::new(),
    /// )
    /// .unwrap();
    ///
    /// let id = encoder.next_id().unwrap();
    /// assert_eq!(encoder.decompose(id).machine_id, 7);
    /// ```
    pub fn new(
        machine_id: u64,
        epoch: Duration,
        time_unit: Duration,
        layout: BitLayout,
        clock: T,
    ) -> Result<Self> {
        let lifetime_end = lifetime_end(epoch, time_unit, layout)?;
        if machine_id > layout.max_machine_id() {
            return Err(Error::MachineIdOutOfRange {
                machine_id,
                max: layout.max_machine_id(),
            });
        }

        Ok(Self {
            state: Mutex::new(EncoderState {
                last_elapsed: 0,
                // Wraps to zero on the first call, so the first ID of a unit
                // always carries sequence 0.
                sequence: layout.max_sequence(),
            }),
            clock,
            epoch,
            time_unit,
            machine_id,
            layout,
            lifetime_end,
        })
    }

    pub const fn machine_id(&self) -> u64 {
        self.machine_id
    }

    pub const fn layout(&self) -> BitLayout {
        self.layout
    }

    pub const fn time_unit(&self) -> Duration {
        self.time_unit
    }

    /// The epoch as a [`Duration`] since 1970-01-01 UTC.
    pub const fn epoch(&self) -> Duration {
        self.epoch
    }

    /// Generates the next identifier.
    ///
    /// Identifiers from one encoder are strictly increasing. If the clock
    /// steps backward, the encoder keeps counting on its last time unit
    /// rather than reusing an earlier one.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockBeforeEpoch`] if the clock reads before the epoch.
    /// - [`Error::TimeOverflow`] once the time field is exhausted.
    /// - [`Error::LockPoisoned`] if another caller panicked while holding the
    ///   lock (std mutex only).
    ///
    /// Each failure is local to the call; the encoder state is left as it
    /// was.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next_id(&self) -> Result<FlakeId> {
        let mut state = {
            #[cfg(feature = "parking-lot")]
            {
                self.state.lock()
            }
            #[cfg(not(feature = "parking-lot"))]
            {
                self.state.lock()?
            }
        };

        let current = self.current_elapsed()?;
        match current.cmp(&state.last_elapsed) {
            Ordering::Greater => {
                state.last_elapsed = current;
                state.sequence = 0;
            }
            Ordering::Equal | Ordering::Less => {
                let sequence = (state.sequence + 1) & self.layout.max_sequence();
                if sequence == 0 {
                    let next = self.cold_wait_for_next_unit(state.last_elapsed)?;
                    state.last_elapsed = next;
                }
                state.sequence = sequence;
            }
        }

        Ok(self
            .layout
            .pack(state.last_elapsed, self.machine_id, state.sequence))
    }

    /// Returns the start of the time unit an identifier was minted in.
    ///
    /// Every identifier from the same unit maps to the same instant.
    pub fn to_time(&self, id: FlakeId) -> SystemTime {
        let nanos = self.time_unit.as_nanos() * u128::from(self.layout.elapsed(id));
        self.epoch
            .checked_add(duration_from_nanos(nanos))
            .and_then(|since_unix| UNIX_EPOCH.checked_add(since_unix))
            .unwrap_or(self.lifetime_end)
    }

    /// Splits an identifier into its fields using this encoder's layout.
    pub const fn decompose(&self, id: FlakeId) -> Decomposed {
        self.layout.decompose(id)
    }

    fn current_elapsed(&self) -> Result<u64> {
        elapsed_units(self.clock.now(), self.epoch, self.time_unit, self.layout)
    }

    /// Blocks until the clock reaches the unit after `last_elapsed` and
    /// returns it.
    #[cold]
    #[inline(never)]
    fn cold_wait_for_next_unit(&self, last_elapsed: u64) -> Result<u64> {
        let next = last_elapsed + 1;
        if next > self.layout.max_elapsed() {
            return Err(Error::TimeOverflow {
                elapsed: u128::from(next),
                max: self.layout.max_elapsed(),
            });
        }

        let target = self
            .epoch
            .saturating_add(duration_from_nanos(
                self.time_unit.as_nanos() * u128::from(next),
            ));
        loop {
            let now = self.clock.now();
            if elapsed_units(now, self.epoch, self.time_unit, self.layout)? >= next {
                return Ok(next);
            }
            let remaining = target.saturating_sub(now);
            if remaining.is_zero() {
                core::hint::spin_loop();
            } else {
                std::thread::sleep(remaining);
            }
        }
    }
}

/// Converts a clock reading into whole time units since `epoch`.
fn elapsed_units(
    now: Duration,
    epoch: Duration,
    time_unit: Duration,
    layout: BitLayout,
) -> Result<u64> {
    let since_epoch = now.checked_sub(epoch).ok_or(Error::ClockBeforeEpoch)?;
    let elapsed = since_epoch.as_nanos() / time_unit.as_nanos();
    match u64::try_from(elapsed) {
        Ok(units) if units <= layout.max_elapsed() => Ok(units),
        _ => Err(Error::TimeOverflow {
            elapsed,
            max: layout.max_elapsed(),
        }),
    }
}

/// Returns the start of the last time unit the layout can encode, checking
/// that it is representable.
pub(crate) fn lifetime_end(
    epoch: Duration,
    time_unit: Duration,
    layout: BitLayout,
) -> Result<SystemTime> {
    if time_unit < MIN_TIME_UNIT {
        return Err(Error::InvalidTimeUnit(time_unit));
    }
    let span = time_unit.as_nanos() * u128::from(layout.max_elapsed());
    u64::try_from(span / NANOS_PER_SEC)
        .ok()
        .map(|_| duration_from_nanos(span))
        .and_then(|span| epoch.checked_add(span))
        .and_then(|since_unix| UNIX_EPOCH.checked_add(since_unix))
        .ok_or(Error::InvalidTimeUnit(time_unit))
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    let subsec = (nanos % NANOS_PER_SEC) as u32;
    Duration::new(secs, subsec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::DEFAULT_EPOCH;
    use portable_atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::{collections::HashSet, sync::Arc, thread::scope};

    const UNIT: Duration = Duration::from_millis(10);

    struct FixedTime(Duration);

    impl TimeSource for FixedTime {
        fn now(&self) -> Duration {
            self.0
        }
    }

    /// Reports `start` for the first `stall_for` readings, then one unit later.
    struct StallingTime {
        start: Duration,
        stall_for: u64,
        reads: AtomicU64,
    }

    impl TimeSource for StallingTime {
        fn now(&self) -> Duration {
            let read = self.reads.fetch_add(1, AtomicOrdering::Relaxed);
            if read < self.stall_for {
                self.start
            } else {
                self.start + UNIT
            }
        }
    }

    fn encoder<T: TimeSource>(clock: T) -> Encoder<T> {
        Encoder::new(1, DEFAULT_EPOCH, UNIT, BitLayout::default(), clock).unwrap()
    }

    #[test]
    fn sequence_increments_within_same_unit() {
        let encoder = encoder(FixedTime(DEFAULT_EPOCH + UNIT * 42));
        let id1 = encoder.next_id().unwrap();
        let id2 = encoder.next_id().unwrap();
        let id3 = encoder.next_id().unwrap();

        for (id, seq) in [(id1, 0), (id2, 1), (id3, 2)] {
            let parts = encoder.decompose(id);
            assert_eq!(parts.time, 42);
            assert_eq!(parts.machine_id, 1);
            assert_eq!(parts.sequence, seq);
        }
        assert!(id1 < id2 && id2 < id3);
    }

    #[test]
    fn sequence_wraparound_moves_to_next_unit() {
        let layout = BitLayout::default();
        let per_unit = layout.max_sequence() + 1;
        let clock = StallingTime {
            start: DEFAULT_EPOCH + UNIT * 42,
            stall_for: per_unit + 1,
            reads: AtomicU64::new(0),
        };
        let encoder = encoder(clock);

        let mut seen = HashSet::new();
        for i in 0..per_unit {
            let id = encoder.next_id().unwrap();
            let parts = encoder.decompose(id);
            assert_eq!(parts.time, 42);
            assert_eq!(parts.sequence, i);
            assert!(seen.insert(id));
        }

        let id = encoder.next_id().unwrap();
        let parts = encoder.decompose(id);
        assert_eq!(parts.time, 43);
        assert_eq!(parts.sequence, 0);
        assert!(seen.insert(id));
    }

    #[test]
    fn clock_behind_keeps_counting_on_last_unit() {
        let clock = Arc::new(AtomicU64::new(50));
        struct SharedTime(Arc<AtomicU64>);
        impl TimeSource for SharedTime {
            fn now(&self) -> Duration {
                DEFAULT_EPOCH + UNIT * self.0.load(AtomicOrdering::Relaxed) as u32
            }
        }

        let encoder = encoder(SharedTime(Arc::clone(&clock)));
        let first = encoder.next_id().unwrap();
        clock.store(40, AtomicOrdering::Relaxed);
        let second = encoder.next_id().unwrap();

        assert!(second > first);
        assert_eq!(encoder.decompose(second).time, 50);
        assert_eq!(encoder.decompose(second).sequence, 1);
    }

    #[test]
    fn clock_before_epoch_is_a_per_call_error() {
        let encoder = encoder(FixedTime(DEFAULT_EPOCH - UNIT));
        assert!(matches!(encoder.next_id(), Err(Error::ClockBeforeEpoch)));
        assert!(matches!(encoder.next_id(), Err(Error::ClockBeforeEpoch)));
    }

    #[test]
    fn exhausted_time_field_is_reported() {
        let layout = BitLayout::default();
        let past_end = DEFAULT_EPOCH + duration_from_nanos(UNIT.as_nanos() << layout.time_bits());
        let encoder = encoder(FixedTime(past_end));
        assert!(matches!(
            encoder.next_id(),
            Err(Error::TimeOverflow { max, .. }) if max == layout.max_elapsed()
        ));
    }

    #[test]
    fn to_time_returns_start_of_unit() {
        let encoder = encoder(FixedTime(DEFAULT_EPOCH + UNIT * 7 + Duration::from_millis(3)));
        let id = encoder.next_id().unwrap();
        assert_eq!(
            encoder.to_time(id),
            UNIX_EPOCH + DEFAULT_EPOCH + UNIT * 7
        );
    }

    #[test]
    fn rejects_out_of_range_machine_id() {
        let result = Encoder::new(
            1 << 16,
            DEFAULT_EPOCH,
            UNIT,
            BitLayout::default(),
            FixedTime(DEFAULT_EPOCH),
        );
        assert!(matches!(
            result,
            Err(Error::MachineIdOutOfRange { machine_id: 65_536, max: 65_535 })
        ));
    }

    #[test]
    fn rejects_sub_millisecond_unit() {
        let result = Encoder::new(
            0,
            DEFAULT_EPOCH,
            Duration::from_micros(500),
            BitLayout::default(),
            FixedTime(DEFAULT_EPOCH),
        );
        assert!(matches!(result, Err(Error::InvalidTimeUnit(_))));
    }

    #[test]
    fn threaded_generation_is_unique() {
        const THREADS: usize = 8;
        const IDS_PER_THREAD: usize = 2_000;

        let encoder = Encoder::new(
            3,
            DEFAULT_EPOCH,
            MIN_TIME_UNIT,
            BitLayout::default(),
            crate::time::MonotonicClock::new(),
        )
        .unwrap();
        let seen = std::sync::Mutex::new(HashSet::with_capacity(THREADS * IDS_PER_THREAD));

        scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let mut last = None;
                    for _ in 0..IDS_PER_THREAD {
                        let id = encoder.next_id().unwrap();
                        assert!(last.is_none_or(|last| id > last));
                        last = Some(id);
                        assert!(seen.lock().unwrap().insert(id));
                    }
                });
            }
        });

        assert_eq!(seen.lock().unwrap().len(), THREADS * IDS_PER_THREAD);
    }
}
