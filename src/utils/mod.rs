//! Process-level helpers.
pub mod logger;
