use crate::{
    error::{Error, Result},
    id::FlakeId,
};

/// Total number of usable bits in a [`FlakeId`]. The sign bit stays clear.
pub const ID_BITS: u8 = 63;

/// Default width of the sequence field.
pub const DEFAULT_SEQUENCE_BITS: u8 = 8;

/// Default width of the machine ID field.
pub const DEFAULT_MACHINE_ID_BITS: u8 = 16;

const MAX_FIELD_BITS: u8 = 30;
const MIN_TIME_BITS: u8 = 32;

/// Field widths of a [`FlakeId`].
///
/// Every process sharing an ID space must agree on the layout. The time field
/// takes whatever the sequence and machine ID fields leave of the 63 usable
/// bits, so the default layout is 39 / 16 / 8.
///
/// # Example
///
/// ```
/// use leaseflake::BitLayout;
///
/// let layout = BitLayout::default();
/// assert_eq!(layout.time_bits(), 39);
///
/// let id = layout.pack(1000, 7, 3);
/// assert_eq!(layout.elapsed(id), 1000);
/// assert_eq!(layout.machine_id(id), 7);
/// assert_eq!(layout.sequence(id), 3);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitLayout {
    sequence_bits: u8,
    machine_id_bits: u8,
}

impl Default for BitLayout {
    fn default() -> Self {
        Self {
            sequence_bits: DEFAULT_SEQUENCE_BITS,
            machine_id_bits: DEFAULT_MACHINE_ID_BITS,
        }
    }
}

impl BitLayout {
    /// Creates a layout with the given sequence and machine ID widths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBitLayout`] unless both widths are within
    /// `1..=30` and at least 32 bits remain for the time field.
    pub fn new(sequence_bits: u8, machine_id_bits: u8) -> Result<Self> {
        let field_ok = |bits: u8| (1..=MAX_FIELD_BITS).contains(&bits);
        let time_ok = ID_BITS
            .checked_sub(sequence_bits)
            .and_then(|rest| rest.checked_sub(machine_id_bits))
            .is_some_and(|time_bits| time_bits >= MIN_TIME_BITS);

        if !field_ok(sequence_bits) || !field_ok(machine_id_bits) || !time_ok {
            return Err(Error::InvalidBitLayout {
                sequence_bits,
                machine_id_bits,
            });
        }

        Ok(Self {
            sequence_bits,
            machine_id_bits,
        })
    }

    pub const fn sequence_bits(&self) -> u8 {
        self.sequence_bits
    }

    pub const fn machine_id_bits(&self) -> u8 {
        self.machine_id_bits
    }

    pub const fn time_bits(&self) -> u8 {
        ID_BITS - self.sequence_bits - self.machine_id_bits
    }

    /// Largest value the time field can hold.
    pub const fn max_elapsed(&self) -> u64 {
        (1 << self.time_bits()) - 1
    }

    /// Largest machine ID that fits in the layout.
    pub const fn max_machine_id(&self) -> u64 {
        (1 << self.machine_id_bits) - 1
    }

    /// Largest sequence value within one time unit.
    pub const fn max_sequence(&self) -> u64 {
        (1 << self.sequence_bits) - 1
    }

    const fn machine_id_shift(&self) -> u8 {
        self.sequence_bits
    }

    const fn elapsed_shift(&self) -> u8 {
        self.sequence_bits + self.machine_id_bits
    }

    /// Packs the three fields into an ID. Values wider than their field are
    /// truncated to it.
    pub const fn pack(&self, elapsed: u64, machine_id: u64, sequence: u64) -> FlakeId {
        let elapsed = (elapsed & self.max_elapsed()) << self.elapsed_shift();
        let machine_id = (machine_id & self.max_machine_id()) << self.machine_id_shift();
        let sequence = sequence & self.max_sequence();
        FlakeId::from_raw(elapsed | machine_id | sequence)
    }

    /// Extracts the elapsed time units.
    pub const fn elapsed(&self, id: FlakeId) -> u64 {
        (id.to_raw() >> self.elapsed_shift()) & self.max_elapsed()
    }

    /// Extracts the machine ID.
    pub const fn machine_id(&self, id: FlakeId) -> u64 {
        (id.to_raw() >> self.machine_id_shift()) & self.max_machine_id()
    }

    /// Extracts the sequence.
    pub const fn sequence(&self, id: FlakeId) -> u64 {
        id.to_raw() & self.max_sequence()
    }

    /// Splits an ID into all of its fields.
    pub const fn decompose(&self, id: FlakeId) -> Decomposed {
        Decomposed {
            id,
            time: self.elapsed(id),
            machine_id: self.machine_id(id),
            sequence: self.sequence(id),
        }
    }
}

/// The fields of a [`FlakeId`], for diagnostics.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decomposed {
    /// The identifier that was taken apart.
    pub id: FlakeId,
    /// Elapsed time units since the generator's epoch.
    pub time: u64,
    /// The machine ID leased by the generator that minted the ID.
    pub machine_id: u64,
    /// Position of the ID within its time unit.
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_39_16_8() {
        let layout = BitLayout::default();
        assert_eq!(layout.time_bits(), 39);
        assert_eq!(layout.machine_id_bits(), 16);
        assert_eq!(layout.sequence_bits(), 8);
        assert_eq!(layout.max_machine_id(), 65_535);
        assert_eq!(layout.max_sequence(), 255);
        assert_eq!(layout.max_elapsed(), (1 << 39) - 1);
    }

    #[test]
    fn fields_occupy_expected_bits() {
        let layout = BitLayout::default();
        let id = layout.pack(1, 1, 1);
        assert_eq!(id.to_raw(), (1 << 24) | (1 << 8) | 1);
    }

    #[test]
    fn maxed_fields_keep_sign_bit_clear() {
        let layout = BitLayout::default();
        let id = layout.pack(
            layout.max_elapsed(),
            layout.max_machine_id(),
            layout.max_sequence(),
        );
        assert_eq!(id.to_raw(), u64::MAX >> 1);
        assert_eq!(layout.elapsed(id), layout.max_elapsed());
        assert_eq!(layout.machine_id(id), layout.max_machine_id());
        assert_eq!(layout.sequence(id), layout.max_sequence());
    }

    #[test]
    fn oversized_values_are_truncated_to_their_field() {
        let layout = BitLayout::default();
        let id = layout.pack(0, 1 << 16, 256);
        assert_eq!(id.to_raw(), 0);
    }

    #[test]
    fn decompose_reports_every_field() {
        let layout = BitLayout::new(12, 10).unwrap();
        let id = layout.pack(123_456, 513, 4000);
        assert_eq!(
            layout.decompose(id),
            Decomposed {
                id,
                time: 123_456,
                machine_id: 513,
                sequence: 4000,
            }
        );
    }

    #[test]
    fn rejects_unusable_widths() {
        assert!(BitLayout::new(0, 16).is_err());
        assert!(BitLayout::new(8, 0).is_err());
        assert!(BitLayout::new(31, 1).is_err());
        assert!(BitLayout::new(16, 16).is_err());
        assert!(matches!(
            BitLayout::new(30, 30),
            Err(Error::InvalidBitLayout {
                sequence_bits: 30,
                machine_id_bits: 30
            })
        ));
        assert!(BitLayout::new(15, 16).is_ok());
    }

    #[test]
    fn ids_from_different_machines_never_collide() {
        let layout = BitLayout::default();
        for elapsed in [0, 1, 99] {
            for sequence in 0..=layout.max_sequence() {
                assert_ne!(
                    layout.pack(elapsed, 3, sequence),
                    layout.pack(elapsed, 4, sequence)
                );
            }
        }
    }
}
