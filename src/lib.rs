//! invctl - provision and converge inventory application instances
//!
//! Given a declarative description of named instances, invctl computes and
//! applies the ordered system-state changes needed to reach it: OS identity,
//! filesystem layout, rendered configuration, service run-state, and an
//! optional git deployment channel per instance. Re-running is always safe;
//! every action is guarded by inspection of the managed system.

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod resource;
pub mod runner;
pub mod spec;
pub mod ui;

/// Global context for command execution
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}
