//! Concrete resources for managed instance state
//!
//! Each resource implements [`crate::engine::Resource`]: inspect, compare,
//! converge, with all idempotency decided by inspecting the managed system.

pub mod account;
pub mod config_file;
pub mod directory;
pub mod git;
pub mod service;

pub use account::{InstanceGroup, InstanceUser};
pub use config_file::{ConfFile, render_conf};
pub use directory::Dir;
pub use git::{BareRepo, NamedRemote, PostReceiveHook, WorkingCopy};
pub use service::ApiService;
