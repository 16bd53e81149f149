//! Command implementations.

mod flash;
mod info;
mod memory;

pub use flash::flash;
pub use info::info;
pub use memory::{dump, erase, go, list_ports, read};
