//! Process-level plumbing shared by the library and the binary.

pub mod logging;
pub mod stats;
