//! Time-ordered 63-bit identifiers whose machine ID is leased from a
//! coordination store.
//!
//! A [`Generator`] packs three fields into the low 63 bits of a `u64`:
//!
//! ```text
//!  Bit Index:  62            24 23             8 7          0
//!              +----------------+----------------+------------+
//!  Field:      | time (39 bits) | machine (16)   | seq (8)    |
//!              +----------------+----------------+------------+
//!              |<----- MSB ---------- 63 bits ---------- LSB -->|
//! ```
//!
//! - `time` counts [time units](GeneratorBuilder::time_unit) since the
//!   configured start time (10ms by default).
//! - `machine` is leased from a [`MachineIdRepo`] when the generator is
//!   built, renewed in the background and released by [`Generator::stop`].
//! - `seq` distinguishes identifiers minted within one time unit.
//!
//! Identifiers from one generator are strictly increasing and unique; across
//! generators uniqueness follows from the store never leasing one machine ID
//! to two holders at once.
//!
//! # Example
//!
//! ```
//! use leaseflake::{Generator, MemoryStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let store = MemoryStore::new();
//! let generator = Generator::new(store.repo()).await.unwrap();
//!
//! let a = generator.next_id().unwrap();
//! let b = generator.next_id().unwrap();
//! assert!(a < b);
//!
//! generator.stop().await.unwrap();
//! # });
//! ```

mod error;
mod generator;
mod id;
mod lease;
mod time;

pub use crate::error::*;
pub use crate::generator::*;
pub use crate::id::*;
pub use crate::lease::*;
pub use crate::time::*;
