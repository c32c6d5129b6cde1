//! Re-export parallel building blocks.

pub mod collective;
pub mod communicator;
pub mod partition;
pub mod wire;

pub use collective::{Collective, ELECTED_RANK};
pub use partition::assign;
