//! Resource trait for declarative state convergence
//!
//! Every piece of managed instance state (accounts, directories, config
//! files, services, git plumbing) is a Resource: it can inspect its current
//! state, knows its desired state, and can converge the difference. All
//! idempotency decisions are made by inspecting the managed system itself;
//! the engine keeps no persistent memory of its own.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists/is configured as desired
    Present { details: Option<String> },
    /// Resource does not exist
    Absent,
    /// Resource exists but differs from desired
    Modified { from: String, to: String },
    /// State cannot be determined
    Unknown,
}

impl ResourceState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Result of applying a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// Already converged; nothing done
    NoChange,
    /// Resource was created
    Created,
    /// Resource was brought back in line with the spec
    Modified,
    /// Apply was skipped (dry run, or a guard declined to act)
    Skipped { reason: String },
}

impl ApplyResult {
    /// Whether the system was actually mutated
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified)
    }
}

/// Context threaded through one instance's pipeline
///
/// Carries the run options plus cross-step notifications: the config-file
/// resource flags a pending refresh that the service resource consumes, so
/// a content change restarts an already-running service.
#[derive(Debug)]
pub struct ApplyContext {
    pub dry_run: bool,
    pub verbose: bool,
    service_refresh: bool,
}

impl ApplyContext {
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self {
            dry_run,
            verbose,
            service_refresh: false,
        }
    }

    /// Mark the instance service for a restart (config content changed)
    pub fn notify_service_refresh(&mut self) {
        self.service_refresh = true;
    }

    pub fn service_refresh_pending(&self) -> bool {
        self.service_refresh
    }
}

/// Core trait for all managed instance state
pub trait Resource: Send + Sync + fmt::Debug {
    /// Stable identifier, unique within the resource type
    /// (e.g. "group:inventory-testinv", "/etc/inventory-system/testinv.conf")
    fn id(&self) -> String;

    /// Human-readable description of what this resource ensures
    fn description(&self) -> String;

    /// Resource type category (e.g. "group", "directory", "git_bare_repo")
    fn resource_type(&self) -> &'static str;

    /// Inspect the managed system for the resource's current state
    fn current_state(&self) -> Result<ResourceState>;

    /// The state this resource converges towards
    fn desired_state(&self) -> ResourceState;

    /// Check if the resource needs changes to reach desired state
    fn needs_apply(&self) -> Result<bool> {
        let current = self.current_state()?;
        let desired = self.desired_state();
        Ok(current != desired)
    }

    /// Converge current state to desired state
    ///
    /// Must be guarded: re-applying an already-converged resource returns
    /// `NoChange` without side effects, and `ctx.dry_run` is always honored.
    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult>;

    /// Whether applying this resource must be serialized process-wide
    ///
    /// Account-database writers return true so UID/GID allocation never
    /// races across concurrently converging instances.
    fn exclusive(&self) -> bool {
        false
    }
}

/// A boxed resource for type-erased pipelines
pub type BoxedResource = Box<dyn Resource>;
