use core::fmt;

/// A packed 63-bit identifier.
///
/// The most significant bit is always zero. The remaining bits hold the
/// elapsed time units, the machine ID and the sequence, in that order from
/// MSB to LSB. Field widths are not carried by the ID itself; use the
/// [`BitLayout`] the ID was minted with to take it apart.
///
/// ```text
///  Bit Index:  63           63 62          M+S M+S-1         S S-1            0
///              +--------------+----------------+-------------+---------------+
///  Field:      | reserved (1) | elapsed (63-M-S)| machine (M) | sequence (S)  |
///              +--------------+----------------+-------------+---------------+
///              |<----------- MSB ---------- 64 bits ----------- LSB -------->|
/// ```
///
/// [`BitLayout`]: crate::BitLayout
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FlakeId {
    id: u64,
}

impl FlakeId {
    /// Wraps a raw value. The reserved top bit is cleared.
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            id: raw & (u64::MAX >> 1),
        }
    }

    /// Returns the raw packed value.
    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Returns the raw value as a signed integer, for stores that only speak
    /// `BIGINT`. Always non-negative.
    pub const fn to_i64(&self) -> i64 {
        self.id as i64
    }
}

impl From<FlakeId> for u64 {
    fn from(id: FlakeId) -> Self {
        id.to_raw()
    }
}

impl fmt::Display for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FlakeId").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_clears_sign_bit() {
        let id = FlakeId::from_raw(u64::MAX);
        assert_eq!(id.to_raw(), u64::MAX >> 1);
        assert!(id.to_i64() > 0);
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(FlakeId::from_raw(1) < FlakeId::from_raw(2));
        assert_eq!(FlakeId::from_raw(42).to_string(), "42");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_plain_integer() {
        let id = FlakeId::from_raw(1234);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "1234");
        let back: FlakeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
