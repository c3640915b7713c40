//! Process-level helpers shared by binaries.

pub mod bootstrap;
pub mod retry;
