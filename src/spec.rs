//! Effective instance specs
//!
//! The declared instance set is resolved exactly once per run into read-only
//! [`EffectiveSpec`] values: identity names, paths, ports, and the service
//! unit are all fixed here before any resource is built or applied. Registry
//! invariants are validated over the resolved set; a failure aborts the run
//! with zero mutations.

use crate::config::{Defaults, HostConfig, InstanceConfig};
use crate::error::ValidationError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Fully resolved, immutable description of one managed instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSpec {
    pub name: String,
    pub user: String,
    pub group: String,
    /// Whether the group name was derived (derived groups get a GID
    /// auto-allocated in the reserved 3000+ range)
    pub derived_group: bool,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub api_port: u16,
    pub api_host: String,
    pub additional_members: BTreeSet<String>,
    /// Tri-state secret: absent / empty / set. Only a non-empty value is
    /// ever rendered into the config file.
    pub anthropic_api_key: Option<String>,
    pub shell: String,
    pub service_unit: String,
    pub manage_git: bool,
    pub bare_repo: PathBuf,
    pub git_remote: Option<String>,
    pub commit_name: String,
    pub commit_email: String,
}

impl EffectiveSpec {
    /// Resolve one declared instance against the host defaults
    ///
    /// `index` is the instance's position in sorted-name order; it seeds
    /// port auto-allocation for instances without an explicit `api_port`.
    pub fn resolve(
        name: &str,
        config: &InstanceConfig,
        defaults: &Defaults,
        index: usize,
    ) -> Result<Self, ValidationError> {
        if !is_valid_name(name) {
            return Err(ValidationError::InvalidName(name.to_string()));
        }

        let derived_account = format!("{}-{}", defaults.account_prefix, name);
        let group = config.group.clone().unwrap_or_else(|| derived_account.clone());
        let user = config.user.clone().unwrap_or(derived_account);

        let data_dir = expand_path(&config.data_dir);
        if !data_dir.is_absolute() {
            return Err(ValidationError::RelativeDataDir {
                name: name.to_string(),
                path: data_dir,
            });
        }

        let api_port = match config.api_port {
            Some(port) => port,
            None => defaults
                .api_port_base
                .checked_add(u16::try_from(index).unwrap_or(u16::MAX))
                .ok_or_else(|| ValidationError::PortOverflow(name.to_string()))?,
        };

        let bare_repo = config
            .git_bare_repo
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(|| defaults.git_root.join(format!("{}.git", name)));

        Ok(Self {
            name: name.to_string(),
            derived_group: config.group.is_none(),
            conf_path: defaults.config_dir.join(format!("{}.conf", name)),
            api_port,
            api_host: config
                .api_host
                .clone()
                .unwrap_or_else(|| defaults.api_host.clone()),
            additional_members: config.additional_members.iter().cloned().collect(),
            anthropic_api_key: config
                .anthropic_api_key
                .clone()
                .or_else(|| defaults.anthropic_api_key.clone()),
            shell: defaults.shell.clone(),
            service_unit: format!("{}@{}.service", defaults.service_template, name),
            manage_git: config.manage_git,
            bare_repo,
            git_remote: config.git_remote.clone(),
            commit_name: defaults.commit_name.clone(),
            commit_email: defaults.commit_email.clone(),
            user,
            group,
            data_dir,
        })
    }
}

/// Resolve and validate the full instance set
///
/// Returns specs in sorted name order. Any invariant violation aborts the
/// run before a single resource is touched.
pub fn resolve_registry(config: &HostConfig) -> Result<Vec<EffectiveSpec>, ValidationError> {
    let specs = config
        .instances
        .iter()
        .enumerate()
        .map(|(index, (name, instance))| {
            EffectiveSpec::resolve(name, instance, &config.defaults, index)
        })
        .collect::<Result<Vec<_>, _>>()?;

    validate_specs(&specs)?;
    Ok(specs)
}

/// How a path is used by an instance; data dirs and bare repos share one
/// namespace since a bare repo initialized inside a data dir would clobber it
#[derive(Clone, Copy)]
enum PathRole {
    DataDir,
    BareRepo,
}

/// Cross-instance invariants: unique names, accounts, paths, and ports
pub fn validate_specs(specs: &[EffectiveSpec]) -> Result<(), ValidationError> {
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();
    let mut users: BTreeMap<&str, &str> = BTreeMap::new();
    let mut groups: BTreeMap<&str, &str> = BTreeMap::new();
    let mut paths: BTreeMap<&Path, (&str, PathRole)> = BTreeMap::new();
    let mut ports: BTreeMap<u16, &str> = BTreeMap::new();

    for spec in specs {
        if names.insert(&spec.name, &spec.name).is_some() {
            return Err(ValidationError::DuplicateName(spec.name.clone()));
        }

        if let Some(first) = users.insert(&spec.user, &spec.name) {
            return Err(ValidationError::AccountCollision {
                first: first.to_string(),
                second: spec.name.clone(),
                kind: "user",
                account: spec.user.clone(),
            });
        }

        if let Some(first) = groups.insert(&spec.group, &spec.name) {
            return Err(ValidationError::AccountCollision {
                first: first.to_string(),
                second: spec.name.clone(),
                kind: "group",
                account: spec.group.clone(),
            });
        }

        if let Some((first, role)) = paths.insert(
            spec.data_dir.as_path(),
            (spec.name.as_str(), PathRole::DataDir),
        ) {
            return Err(match role {
                PathRole::DataDir => ValidationError::DataDirCollision {
                    first: first.to_string(),
                    second: spec.name.clone(),
                    path: spec.data_dir.clone(),
                },
                PathRole::BareRepo => ValidationError::PathReuse {
                    first: first.to_string(),
                    second: spec.name.clone(),
                    path: spec.data_dir.clone(),
                },
            });
        }

        if let Some(first) = ports.insert(spec.api_port, &spec.name) {
            return Err(ValidationError::PortCollision {
                first: first.to_string(),
                second: spec.name.clone(),
                port: spec.api_port,
            });
        }

        // Bare repos only exist for git-managed instances
        if spec.manage_git
            && let Some((first, role)) = paths.insert(
                spec.bare_repo.as_path(),
                (spec.name.as_str(), PathRole::BareRepo),
            )
        {
            return Err(match role {
                PathRole::BareRepo => ValidationError::BareRepoCollision {
                    first: first.to_string(),
                    second: spec.name.clone(),
                    path: spec.bare_repo.clone(),
                },
                PathRole::DataDir => ValidationError::PathReuse {
                    first: first.to_string(),
                    second: spec.name.clone(),
                    path: spec.bare_repo.clone(),
                },
            });
        }
    }

    Ok(())
}

/// Instance names become account names, paths, and unit template parameters
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy().into_owned();
    let expanded = shellexpand::tilde(&raw);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(data_dir: &str) -> InstanceConfig {
        InstanceConfig {
            data_dir: PathBuf::from(data_dir),
            api_port: None,
            api_host: None,
            user: None,
            group: None,
            additional_members: Vec::new(),
            anthropic_api_key: None,
            manage_git: true,
            git_bare_repo: None,
            git_remote: None,
        }
    }

    fn resolve(name: &str, config: &InstanceConfig) -> EffectiveSpec {
        EffectiveSpec::resolve(name, config, &Defaults::default(), 0).unwrap()
    }

    #[test]
    fn test_derived_identity_and_paths() {
        let spec = resolve("testinv", &instance("/var/www/inventory/testinv"));
        assert_eq!(spec.user, "inventory-testinv");
        assert_eq!(spec.group, "inventory-testinv");
        assert!(spec.derived_group);
        assert_eq!(
            spec.conf_path,
            PathBuf::from("/etc/inventory-system/testinv.conf")
        );
        assert_eq!(
            spec.bare_repo,
            PathBuf::from("/var/lib/inventory-system/testinv.git")
        );
        assert_eq!(spec.service_unit, "inventory-api@testinv.service");
        assert_eq!(spec.api_host, "127.0.0.1");
    }

    #[test]
    fn test_identity_overrides() {
        let mut config = instance("/data/x");
        config.user = Some("invuser".to_string());
        config.group = Some("invgroup".to_string());
        let spec = resolve("x", &config);
        assert_eq!(spec.user, "invuser");
        assert_eq!(spec.group, "invgroup");
        assert!(!spec.derived_group);
    }

    #[test]
    fn test_port_auto_allocation_sorted_order() {
        let config: HostConfig = toml::from_str(
            r#"
            [instances.bravo]
            data_dir = "/data/bravo"
            [instances.alpha]
            data_dir = "/data/alpha"
            [instances.charlie]
            data_dir = "/data/charlie"
            api_port = 9000
            "#,
        )
        .unwrap();

        let specs = resolve_registry(&config).unwrap();
        assert_eq!(specs[0].name, "alpha");
        assert_eq!(specs[0].api_port, 8600);
        assert_eq!(specs[1].name, "bravo");
        assert_eq!(specs[1].api_port, 8601);
        assert_eq!(specs[2].api_port, 9000);
    }

    #[test]
    fn test_global_secret_fallback() {
        let mut defaults = Defaults::default();
        defaults.anthropic_api_key = Some("sk-ant-global".to_string());

        let spec =
            EffectiveSpec::resolve("myinv", &instance("/data/myinv"), &defaults, 0).unwrap();
        assert_eq!(spec.anthropic_api_key.as_deref(), Some("sk-ant-global"));

        let mut config = instance("/data/myinv");
        config.anthropic_api_key = Some("sk-ant-local".to_string());
        let spec = EffectiveSpec::resolve("myinv", &config, &defaults, 0).unwrap();
        assert_eq!(spec.anthropic_api_key.as_deref(), Some("sk-ant-local"));
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "-leading", "UPPER", "has space", "dot.name"] {
            let err = EffectiveSpec::resolve(name, &instance("/data/x"), &Defaults::default(), 0)
                .unwrap_err();
            assert_eq!(err, ValidationError::InvalidName(name.to_string()));
        }
    }

    #[test]
    fn test_relative_data_dir_rejected() {
        let err = EffectiveSpec::resolve(
            "inv",
            &instance("relative/path"),
            &Defaults::default(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::RelativeDataDir { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let a = resolve("same", &instance("/data/a"));
        let mut b = resolve("same", &instance("/data/b"));
        // Distinct ports/accounts would normally come from resolution; force
        // them apart so only the name collides.
        b.api_port = 9999;
        b.user = "other".to_string();
        b.group = "other".to_string();
        b.bare_repo = PathBuf::from("/srv/other.git");

        let err = validate_specs(&[a, b]).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateName("same".to_string()));
    }

    #[test]
    fn test_data_dir_collision_rejected() {
        let a = resolve("one", &instance("/shared/dir"));
        let mut b = resolve("two", &instance("/shared/dir"));
        b.api_port = 9999;

        let err = validate_specs(&[a, b]).unwrap_err();
        assert!(matches!(err, ValidationError::DataDirCollision { .. }));
    }

    #[test]
    fn test_bare_repo_collision_rejected() {
        let mut one = instance("/data/one");
        one.git_bare_repo = Some(PathBuf::from("/srv/git/shared.git"));
        let mut two = instance("/data/two");
        two.git_bare_repo = Some(PathBuf::from("/srv/git/shared.git"));

        let defaults = Defaults::default();
        let a = EffectiveSpec::resolve("one", &one, &defaults, 0).unwrap();
        let b = EffectiveSpec::resolve("two", &two, &defaults, 1).unwrap();

        let err = validate_specs(&[a, b]).unwrap_err();
        assert!(matches!(err, ValidationError::BareRepoCollision { .. }));
    }

    #[test]
    fn test_bare_repo_colliding_with_sibling_data_dir_rejected() {
        let mut one = instance("/data/one");
        one.git_bare_repo = Some(PathBuf::from("/data/two"));
        let two = instance("/data/two");

        let defaults = Defaults::default();
        let a = EffectiveSpec::resolve("one", &one, &defaults, 0).unwrap();
        let b = EffectiveSpec::resolve("two", &two, &defaults, 1).unwrap();

        let err = validate_specs(&[a, b]).unwrap_err();
        assert!(matches!(err, ValidationError::PathReuse { .. }));
    }

    #[test]
    fn test_bare_repo_colliding_with_own_data_dir_rejected() {
        let mut one = instance("/data/one");
        one.git_bare_repo = Some(PathBuf::from("/data/one"));

        let spec = resolve("one", &one);
        let err = validate_specs(&[spec]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::PathReuse { ref first, ref second, .. } if first == second
        ));
    }

    #[test]
    fn test_tilde_paths_expand_to_absolute() {
        let mut config = instance("~/inventory/x");
        config.git_bare_repo = Some(PathBuf::from("~/repos/x.git"));
        let spec = resolve("x", &config);

        assert!(spec.data_dir.is_absolute());
        assert!(!spec.data_dir.to_string_lossy().contains('~'));
        assert!(!spec.bare_repo.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_bare_repo_collision_ignored_when_git_disabled() {
        let mut one = instance("/data/one");
        one.git_bare_repo = Some(PathBuf::from("/srv/git/shared.git"));
        one.manage_git = false;
        let mut two = instance("/data/two");
        two.git_bare_repo = Some(PathBuf::from("/srv/git/shared.git"));

        let defaults = Defaults::default();
        let a = EffectiveSpec::resolve("one", &one, &defaults, 0).unwrap();
        let b = EffectiveSpec::resolve("two", &two, &defaults, 1).unwrap();

        assert!(validate_specs(&[a, b]).is_ok());
    }

    #[test]
    fn test_port_collision_rejected() {
        let mut one = instance("/data/one");
        one.api_port = Some(8765);
        let mut two = instance("/data/two");
        two.api_port = Some(8765);

        let defaults = Defaults::default();
        let a = EffectiveSpec::resolve("one", &one, &defaults, 0).unwrap();
        let b = EffectiveSpec::resolve("two", &two, &defaults, 1).unwrap();

        let err = validate_specs(&[a, b]).unwrap_err();
        assert!(matches!(err, ValidationError::PortCollision { port: 8765, .. }));
    }

    #[test]
    fn test_additional_members_collapse_duplicates() {
        let mut config = instance("/data/x");
        config.additional_members =
            vec!["alice".to_string(), "bob".to_string(), "alice".to_string()];
        let spec = resolve("x", &config);
        assert_eq!(
            spec.additional_members,
            BTreeSet::from(["alice".to_string(), "bob".to_string()])
        );
    }
}
