//! Per-instance convergence plans
//!
//! The component topology is small and fixed, so a plan is two ordered step
//! lists rather than a general task graph: the mandatory core pipeline
//! (Identity -> Filesystem -> Config -> Service) and the git deployment
//! subgraph (BareRepo -> Hook -> WorkingCopy -> Remote), present only when
//! the instance has git management enabled.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::resource::BoxedResource;
use crate::resource::{
    ApiService, BareRepo, ConfFile, Dir, InstanceGroup, InstanceUser, NamedRemote,
    PostReceiveHook, WorkingCopy,
};
use crate::resource::git::EXTERNAL_REMOTE;
use crate::spec::EffectiveSpec;

/// The component a step belongs to, for failure attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    Identity,
    Filesystem,
    Config,
    Service,
    Git,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Filesystem => write!(f, "filesystem"),
            Self::Config => write!(f, "config"),
            Self::Service => write!(f, "service"),
            Self::Git => write!(f, "git"),
        }
    }
}

/// One ordered convergence step
#[derive(Debug)]
pub struct Step {
    pub component: Component,
    pub resource: BoxedResource,
}

impl Step {
    pub fn new(component: Component, resource: BoxedResource) -> Self {
        Self {
            component,
            resource,
        }
    }
}

/// The ordered convergence pipeline for one instance
#[derive(Debug)]
pub struct InstancePlan {
    pub name: String,
    /// Mandatory steps, strictly sequential
    pub core: Vec<Step>,
    /// Git deployment steps; empty when git management is disabled.
    /// Strictly sequential, and only started once the core converged.
    pub git: Vec<Step>,
}

impl InstancePlan {
    /// Build the pipeline from an effective spec; pure, inspects nothing
    pub fn build(spec: &EffectiveSpec) -> Self {
        let mut core = Vec::new();

        core.push(Step::new(
            Component::Identity,
            Box::new(InstanceGroup::new(
                &spec.group,
                spec.derived_group,
                spec.additional_members.clone(),
            )),
        ));
        core.push(Step::new(
            Component::Identity,
            Box::new(InstanceUser::new(
                &spec.user,
                &spec.group,
                &spec.data_dir,
                &spec.shell,
            )),
        ));
        core.push(Step::new(
            Component::Filesystem,
            Box::new(
                Dir::new(&spec.data_dir)
                    .owned_by(&spec.user, &spec.group)
                    .mode(0o2775),
            ),
        ));
        core.push(Step::new(
            Component::Config,
            Box::new(ConfFile::for_instance(spec)),
        ));
        core.push(Step::new(
            Component::Service,
            Box::new(ApiService::new(&spec.service_unit)),
        ));

        let mut git = Vec::new();
        if spec.manage_git {
            git.push(Step::new(
                Component::Git,
                Box::new(BareRepo::new(&spec.bare_repo).owned_by(&spec.user, &spec.group)),
            ));
            git.push(Step::new(
                Component::Git,
                Box::new(
                    PostReceiveHook::new(&spec.bare_repo, &spec.data_dir)
                        .owned_by(&spec.user, &spec.group),
                ),
            ));
            git.push(Step::new(
                Component::Git,
                Box::new(
                    WorkingCopy::new(
                        &spec.data_dir,
                        &spec.bare_repo,
                        &spec.commit_name,
                        &spec.commit_email,
                    )
                    .owned_by(&spec.user, &spec.group),
                ),
            ));
            if let Some(url) = &spec.git_remote {
                git.push(Step::new(
                    Component::Git,
                    Box::new(NamedRemote::new(&spec.data_dir, EXTERNAL_REMOTE, url)),
                ));
            }
        }

        Self {
            name: spec.name.clone(),
            core,
            git,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.core.len() + self.git.len()
    }
}

/// Host-wide directories ensured once, before any instance work starts
///
/// The shared config directory is always required; the git root only when
/// at least one instance in the set has git management enabled.
pub fn shared_resources(
    specs: &[EffectiveSpec],
    defaults: &crate::config::Defaults,
) -> Vec<BoxedResource> {
    let mut resources: Vec<BoxedResource> = Vec::new();
    if specs.is_empty() {
        return resources;
    }

    resources.push(Box::new(Dir::new(&defaults.config_dir).mode(0o755)));

    if specs.iter().any(|s| s.manage_git) {
        resources.push(Box::new(Dir::new(&defaults.git_root).mode(0o755)));
    }

    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, HostConfig};
    use crate::spec::resolve_registry;

    fn specs(toml: &str) -> Vec<EffectiveSpec> {
        let config: HostConfig = toml::from_str(toml).unwrap();
        resolve_registry(&config).unwrap()
    }

    #[test]
    fn test_core_component_order() {
        let specs = specs(
            r#"
            [instances.testinv]
            data_dir = "/var/www/inventory/testinv"
            "#,
        );
        let plan = InstancePlan::build(&specs[0]);

        let components: Vec<Component> = plan.core.iter().map(|s| s.component).collect();
        assert_eq!(
            components,
            vec![
                Component::Identity,
                Component::Identity,
                Component::Filesystem,
                Component::Config,
                Component::Service,
            ]
        );
    }

    #[test]
    fn test_git_steps_present_by_default() {
        let specs = specs(
            r#"
            [instances.testinv]
            data_dir = "/var/www/inventory/testinv"
            "#,
        );
        let plan = InstancePlan::build(&specs[0]);
        // bare repo, hook, working copy; no external remote configured
        assert_eq!(plan.git.len(), 3);
        assert!(plan.git.iter().all(|s| s.component == Component::Git));
    }

    #[test]
    fn test_git_remote_adds_fourth_step() {
        let specs = specs(
            r#"
            [instances.testinv]
            data_dir = "/var/www/inventory/testinv"
            git_remote = "git@github.com:user/inventory.git"
            "#,
        );
        let plan = InstancePlan::build(&specs[0]);
        assert_eq!(plan.git.len(), 4);
    }

    #[test]
    fn test_manage_git_false_skips_subgraph() {
        let specs = specs(
            r#"
            [instances.x]
            data_dir = "/data/x"
            manage_git = false
            git_remote = "git@github.com:user/inventory.git"
            "#,
        );
        let plan = InstancePlan::build(&specs[0]);
        assert!(plan.git.is_empty());
        assert_eq!(plan.total_steps(), 5);
    }

    #[test]
    fn test_shared_git_root_follows_instance_set() {
        let defaults = Defaults::default();

        let all_disabled = specs(
            r#"
            [instances.x]
            data_dir = "/data/x"
            manage_git = false
            "#,
        );
        // Config dir only; no git root when nothing needs it
        assert_eq!(shared_resources(&all_disabled, &defaults).len(), 1);

        let mixed = specs(
            r#"
            [instances.x]
            data_dir = "/data/x"
            manage_git = false
            [instances.y]
            data_dir = "/data/y"
            "#,
        );
        assert_eq!(shared_resources(&mixed, &defaults).len(), 2);
    }
}
