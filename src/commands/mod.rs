//! CLI command implementations

pub mod converge;
