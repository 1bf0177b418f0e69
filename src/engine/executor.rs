//! Convergence executor
//!
//! Instances converge independently and in parallel; steps within one
//! instance are strictly sequential. Account-database writers take a
//! process-wide lock so UID/GID allocation never races. A core-step failure
//! halts that instance's pipeline (git subgraph not attempted); a git-step
//! failure is isolated to that instance's git subgraph. Other instances
//! continue regardless.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::sync::{Mutex, PoisonError};

use crate::engine::plan::{InstancePlan, Step};
use crate::engine::report::{GitOutcome, InstanceReport, Outcome, StepFailure};
use crate::engine::resource::{ApplyContext, ApplyResult, BoxedResource};

/// Serializes all account-database mutation across worker threads
static ACCOUNT_DB_LOCK: Mutex<()> = Mutex::new(());

/// Options for a convergence run
#[derive(Debug, Clone)]
pub struct ConvergeOptions {
    /// Parallel instance pipelines
    pub jobs: usize,
    pub verbose: bool,
}

impl Default for ConvergeOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            verbose: false,
        }
    }
}

/// Ensure host-wide shared resources, sequentially, before instance fan-out
pub fn apply_shared(resources: &[BoxedResource], opts: &ConvergeOptions) -> Result<usize> {
    let mut ctx = ApplyContext::new(false, opts.verbose);
    let mut changes = 0;
    for resource in resources {
        let result = resource
            .apply(&mut ctx)
            .with_context(|| format!("Shared resource {} failed", resource.id()))?;
        if result.is_change() {
            log::info!("shared: {} {:?}", resource.id(), result);
            changes += 1;
        }
    }
    Ok(changes)
}

/// Converge all instance plans, one report per instance
pub fn converge(plans: &[InstancePlan], opts: &ConvergeOptions) -> Result<Vec<InstanceReport>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .context("Failed to create worker pool")?;

    Ok(pool.install(|| {
        plans
            .par_iter()
            .map(|plan| converge_instance(plan, opts))
            .collect()
    }))
}

fn converge_instance(plan: &InstancePlan, opts: &ConvergeOptions) -> InstanceReport {
    let mut ctx = ApplyContext::new(false, opts.verbose);
    let mut changes = 0;

    for step in &plan.core {
        match apply_step(&plan.name, step, &mut ctx) {
            Ok(result) => {
                if result.is_change() {
                    changes += 1;
                }
            }
            Err(failure) => {
                return InstanceReport {
                    name: plan.name.clone(),
                    core: Outcome::Failed { failure },
                    git: if plan.git.is_empty() {
                        GitOutcome::Disabled
                    } else {
                        GitOutcome::NotAttempted
                    },
                };
            }
        }
    }

    let git = if plan.git.is_empty() {
        GitOutcome::Disabled
    } else {
        converge_git(plan, &mut ctx)
    };

    InstanceReport {
        name: plan.name.clone(),
        core: Outcome::Converged { changes },
        git,
    }
}

fn converge_git(plan: &InstancePlan, ctx: &mut ApplyContext) -> GitOutcome {
    let mut changes = 0;
    for step in &plan.git {
        match apply_step(&plan.name, step, ctx) {
            Ok(result) => {
                if result.is_change() {
                    changes += 1;
                }
            }
            Err(failure) => return GitOutcome::Failed { failure },
        }
    }
    GitOutcome::Converged { changes }
}

fn apply_step(
    instance: &str,
    step: &Step,
    ctx: &mut ApplyContext,
) -> Result<ApplyResult, StepFailure> {
    log::debug!("{}: applying {}", instance, step.resource.id());

    let result = if step.resource.exclusive() {
        let _guard = ACCOUNT_DB_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        step.resource.apply(ctx)
    } else {
        step.resource.apply(ctx)
    };

    match result {
        Ok(result) => {
            if result.is_change() {
                log::info!("{}: {} {:?}", instance, step.resource.id(), result);
            }
            Ok(result)
        }
        Err(e) => {
            log::warn!("{}: {} failed: {:#}", instance, step.resource.id(), e);
            Err(StepFailure {
                component: step.component,
                step: step.resource.id(),
                error: format!("{:#}", e),
            })
        }
    }
}
