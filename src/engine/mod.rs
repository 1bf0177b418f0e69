//! Instance convergence engine
//!
//! Declarative core: resources declare desired state, inspect current
//! state, and converge the difference. Plans fix the per-instance step
//! order; the executor fans instances out in parallel with failure
//! isolation per instance.

pub mod diff;
pub mod executor;
pub mod plan;
pub mod report;
pub mod resource;

pub use diff::{StateDiff, compute_diffs};
pub use executor::{ConvergeOptions, apply_shared, converge};
pub use plan::{Component, InstancePlan, Step, shared_resources};
pub use report::{GitOutcome, InstanceReport, Outcome, StepFailure};
pub use resource::{ApplyContext, ApplyResult, BoxedResource, Resource, ResourceState};
