//! systemd service resource - per-instance API unit
//!
//! Declares desired run-state only: the template unit file itself is
//! deployed by the surrounding packaging, and no health checks are
//! performed here.

use anyhow::{Result, bail};

use crate::engine::{ApplyContext, ApplyResult, Resource, ResourceState};
use crate::runner;

/// The instance's API service, instantiated from the template unit
/// (`inventory-api@<name>.service`), kept running and enabled at boot
#[derive(Debug, Clone)]
pub struct ApiService {
    pub unit: String,
}

impl ApiService {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
        }
    }

    fn is_active(&self) -> bool {
        runner::run_quiet("systemctl", &["is-active", "--quiet", &self.unit])
    }

    fn is_enabled(&self) -> bool {
        runner::run_quiet("systemctl", &["is-enabled", "--quiet", &self.unit])
    }

    /// The template unit must exist before run-state can be declared
    fn unit_known(&self) -> bool {
        runner::run_quiet("systemctl", &["cat", &self.unit])
    }
}

impl Resource for ApiService {
    fn id(&self) -> String {
        format!("service:{}", self.unit)
    }

    fn description(&self) -> String {
        format!("Service {} running and enabled", self.unit)
    }

    fn resource_type(&self) -> &'static str {
        "service"
    }

    fn current_state(&self) -> Result<ResourceState> {
        let active = self.is_active();
        let enabled = self.is_enabled();
        if active && enabled {
            Ok(ResourceState::Present { details: None })
        } else if !active && !enabled {
            Ok(ResourceState::Absent)
        } else {
            Ok(ResourceState::Modified {
                from: format!(
                    "{}, {}",
                    if active { "active" } else { "inactive" },
                    if enabled { "enabled" } else { "disabled" }
                ),
                to: "active, enabled".to_string(),
            })
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if !self.unit_known() {
            bail!("Unit {} not found (is the service template deployed?)", self.unit);
        }

        let mut changed = false;

        if !self.is_enabled() {
            runner::run_capture("systemctl", &["enable", &self.unit])?;
            changed = true;
        }

        if !self.is_active() {
            runner::run_capture("systemctl", &["start", &self.unit])?;
            return Ok(ApplyResult::Created);
        }

        // Already running: restart only when the config content changed
        if ctx.service_refresh_pending() {
            runner::run_capture("systemctl", &["restart", &self.unit])?;
            return Ok(ApplyResult::Modified);
        }

        if changed {
            Ok(ApplyResult::Modified)
        } else {
            Ok(ApplyResult::NoChange)
        }
    }
}
