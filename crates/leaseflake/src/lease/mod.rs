mod interface;
mod manager;
mod memory;

pub use interface::*;
pub use manager::*;
pub use memory::*;
