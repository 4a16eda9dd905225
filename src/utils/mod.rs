//! Small helpers shared across modules.

pub mod panic;
pub mod serde;
