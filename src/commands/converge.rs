//! Convergence commands: validate, plan, status, apply

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use std::path::Path;

use crate::Context;
use crate::config::HostConfig;
use crate::runner;
use crate::engine::{
    self, ConvergeOptions, GitOutcome, InstancePlan, Outcome, StateDiff,
};
use crate::spec::{EffectiveSpec, resolve_registry};
use crate::ui;

/// Load the host config and resolve/validate the instance registry
fn load_registry(config_path: &Path) -> Result<(HostConfig, Vec<EffectiveSpec>)> {
    let config = HostConfig::load(config_path)?;
    let specs = resolve_registry(&config).context("Instance registry validation failed")?;
    Ok((config, specs))
}

/// `invctl validate` - parse + invariants only
pub fn validate(_ctx: &Context, config_path: &Path) -> Result<()> {
    let (_, specs) = load_registry(config_path)?;
    ui::success(&format!(
        "Configuration valid: {} instance(s) declared",
        specs.len()
    ));
    Ok(())
}

/// `invctl plan` - observed-vs-desired preview, no mutation
pub fn plan(ctx: &Context, config_path: &Path, instance: Option<&str>) -> Result<()> {
    let (config, specs) = load_registry(config_path)?;

    if !ctx.quiet {
        ui::header("Convergence Plan");
    }

    let mut total = 0;

    let shared = engine::shared_resources(&specs, &config.defaults);
    let shared_diffs = engine::compute_diffs(&shared)?;
    if !shared_diffs.is_empty() {
        ui::section("shared");
        for diff in &shared_diffs {
            print_diff(diff);
            total += 1;
        }
    }

    for spec in specs.iter().filter(|s| filter(s, instance)) {
        let plan = InstancePlan::build(spec);
        let mut shown_header = false;

        for step in plan.core.iter().chain(plan.git.iter()) {
            if let Some(diff) = StateDiff::from_resource(step.resource.as_ref())? {
                if !shown_header {
                    ui::section(&spec.name);
                    shown_header = true;
                }
                print_diff(&diff);
                total += 1;
            }
        }

        if !spec.manage_git && !ctx.quiet {
            ui::dim(&format!("{}: git deployment disabled", spec.name));
        }
    }

    if total == 0 {
        ui::success("Everything converged; nothing to do");
    } else {
        println!();
        ui::info(&format!("{} resource(s) would change", total));
    }
    Ok(())
}

/// `invctl status` - per-instance drift summary
pub fn status(ctx: &Context, config_path: &Path) -> Result<()> {
    let (config, specs) = load_registry(config_path)?;

    if !ctx.quiet {
        ui::header("Instance Status");
    }

    let shared = engine::shared_resources(&specs, &config.defaults);
    let shared_drift = engine::compute_diffs(&shared)?.len();
    if shared_drift > 0 {
        ui::warn(&format!("shared directories: {} drifted", shared_drift));
    }

    for spec in &specs {
        let plan = InstancePlan::build(spec);
        let mut drifted = 0;
        for step in plan.core.iter().chain(plan.git.iter()) {
            if StateDiff::from_resource(step.resource.as_ref())?.is_some() {
                drifted += 1;
            }
        }

        let git_note = if spec.manage_git { "" } else { " (git disabled)" };
        if drifted == 0 {
            ui::success(&format!("{}: converged{}", spec.name, git_note));
        } else {
            ui::warn(&format!(
                "{}: {} resource(s) drifted{}",
                spec.name, drifted, git_note
            ));
        }
    }

    Ok(())
}

/// `invctl apply` - converge the host to the declared instance set
pub fn apply(
    ctx: &Context,
    config_path: &Path,
    dry_run: bool,
    jobs: usize,
    yes: bool,
    json: bool,
) -> Result<()> {
    if dry_run {
        return plan(ctx, config_path, None);
    }

    let (config, specs) = load_registry(config_path)?;
    if specs.is_empty() {
        ui::info("No instances declared; nothing to do");
        return Ok(());
    }

    if !running_as_root() {
        ui::warn("Not running as root; account, ownership, and service changes will fail");
    }
    if specs.iter().any(|s| s.manage_git) && !runner::command_exists("git") {
        ui::warn("git not found on PATH; git deployment steps will fail");
    }

    if !yes
        && !dialoguer::Confirm::new()
            .with_prompt(format!("Converge {} instance(s)?", specs.len()))
            .default(false)
            .interact()?
    {
        ui::info("Aborted");
        return Ok(());
    }

    let opts = ConvergeOptions {
        jobs,
        verbose: ctx.verbose > 0,
    };

    // Shared directories first; everything per-instance depends on them
    let shared = engine::shared_resources(&specs, &config.defaults);
    engine::apply_shared(&shared, &opts)?;

    let plans: Vec<InstancePlan> = specs.iter().map(InstancePlan::build).collect();
    let reports = engine::converge(&plans, &opts)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }

    let failed = reports.iter().filter(|r| r.core_failed()).count();
    if failed > 0 {
        bail!("{} instance(s) failed to converge", failed);
    }
    Ok(())
}

fn filter(spec: &EffectiveSpec, instance: Option<&str>) -> bool {
    instance.is_none_or(|name| spec.name == name)
}

fn print_diff(diff: &StateDiff) {
    let marker = if diff.is_creation() { "+" } else { "~" };
    println!("  {} {}", marker.cyan(), diff.description);
}

fn print_reports(reports: &[engine::InstanceReport]) {
    ui::header("Convergence Report");

    for report in reports {
        match &report.core {
            Outcome::Converged { changes } => {
                ui::success(&format!("{}: converged ({} change(s))", report.name, changes));
            }
            Outcome::Failed { failure } => {
                ui::error(&format!("{}: failed {}", report.name, failure));
            }
        }

        match &report.git {
            GitOutcome::Disabled => ui::dim("git: disabled"),
            GitOutcome::Converged { changes } => {
                ui::dim(&format!("git: converged ({} change(s))", changes));
            }
            GitOutcome::Failed { failure } => {
                ui::error(&format!("{}: git {}", report.name, failure));
            }
            GitOutcome::NotAttempted => ui::dim("git: not attempted"),
        }
    }
}

#[allow(unsafe_code)]
fn running_as_root() -> bool {
    // geteuid cannot fail
    unsafe { libc::geteuid() == 0 }
}
