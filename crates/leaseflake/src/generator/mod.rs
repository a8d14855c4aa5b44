mod builder;
mod encoder;
mod flake;
mod mutex;

pub use builder::*;
pub use encoder::{Encoder, MIN_TIME_UNIT};
pub use flake::*;
pub(crate) use mutex::*;
