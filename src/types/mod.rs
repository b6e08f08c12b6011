//! Core types for steploop.

pub mod generation;
pub mod stream;
pub mod turn;
pub mod usage;

pub use generation::*;
pub use stream::*;
pub use turn::*;
pub use usage::*;
