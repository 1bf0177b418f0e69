//! Observed-vs-desired diffing
//!
//! Pure inspection: `plan` and `status` are built on these diffs and never
//! mutate the managed system.

use crate::engine::resource::{Resource, ResourceState};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A difference between current and desired state of one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDiff {
    pub resource_id: String,
    pub resource_type: String,
    pub description: String,
    pub current: ResourceState,
    pub desired: ResourceState,
}

impl StateDiff {
    /// Diff a resource, returning None when already converged
    pub fn from_resource(resource: &dyn Resource) -> Result<Option<Self>> {
        let current = resource.current_state()?;
        let desired = resource.desired_state();

        if current == desired {
            return Ok(None);
        }

        Ok(Some(Self {
            resource_id: resource.id(),
            resource_type: resource.resource_type().to_string(),
            description: resource.description(),
            current,
            desired,
        }))
    }

    pub fn is_creation(&self) -> bool {
        self.current.is_absent() && self.desired.is_present()
    }
}

/// Diff a list of resources, keeping only the ones that would change
///
/// Inspection failures surface as errors; a diff must never silently hide
/// a resource it could not inspect.
pub fn compute_diffs(resources: &[Box<dyn Resource>]) -> Result<Vec<StateDiff>> {
    resources
        .iter()
        .filter_map(|r| StateDiff::from_resource(r.as_ref()).transpose())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::resource::{ApplyContext, ApplyResult};

    #[derive(Debug)]
    struct StubResource {
        converged: bool,
    }

    impl Resource for StubResource {
        fn id(&self) -> String {
            "stub".to_string()
        }

        fn description(&self) -> String {
            "Stub resource".to_string()
        }

        fn resource_type(&self) -> &'static str {
            "stub"
        }

        fn current_state(&self) -> Result<ResourceState> {
            if self.converged {
                Ok(ResourceState::Present { details: None })
            } else {
                Ok(ResourceState::Absent)
            }
        }

        fn desired_state(&self) -> ResourceState {
            ResourceState::Present { details: None }
        }

        fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
            Ok(ApplyResult::NoChange)
        }
    }

    #[test]
    fn test_no_diff_when_converged() {
        let diff = StateDiff::from_resource(&StubResource { converged: true }).unwrap();
        assert!(diff.is_none());
    }

    #[test]
    fn test_diff_reports_creation() {
        let diff = StateDiff::from_resource(&StubResource { converged: false })
            .unwrap()
            .unwrap();
        assert!(diff.is_creation());
        assert_eq!(diff.resource_type, "stub");
    }

    #[test]
    fn test_compute_diffs_filters_converged() {
        let resources: Vec<Box<dyn Resource>> = vec![
            Box::new(StubResource { converged: true }),
            Box::new(StubResource { converged: false }),
        ];
        let diffs = compute_diffs(&resources).unwrap();
        assert_eq!(diffs.len(), 1);
    }
}
