//! Host configuration schema
//!
//! The declared instance set lives in a single TOML file: a `[defaults]`
//! table with host-wide conventions plus one `[instances.<name>]` table per
//! managed instance. Parsing is lossless; derivation of effective per-instance
//! values happens in [`crate::spec`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the host configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/invctl.toml";

/// The full host configuration: defaults plus the declared instance set
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub defaults: Defaults,

    /// Instance name -> declaration. TOML table keys guarantee uniqueness
    /// at parse time; name well-formedness is checked during resolution.
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceConfig>,
}

impl HostConfig {
    /// Load and parse the host configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))
    }
}

/// Host-wide conventions shared by all instances
#[derive(Debug, Serialize, Deserialize)]
pub struct Defaults {
    /// Shared directory holding the per-instance config files
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Shared root directory for bare deployment repositories
    #[serde(default = "default_git_root")]
    pub git_root: PathBuf,

    /// Bind address used when an instance does not override it
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// Base port for auto-allocated API ports (instances in sorted name order)
    #[serde(default = "default_api_port_base")]
    pub api_port_base: u16,

    /// systemd template unit prefix; instances run as `<prefix>@<name>.service`
    #[serde(default = "default_service_template")]
    pub service_template: String,

    /// Prefix for derived user/group names (`<prefix>-<name>`)
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,

    /// Login shell for instance accounts
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Commit identity configured on instance working copies
    #[serde(default = "default_commit_name")]
    pub commit_name: String,

    #[serde(default = "default_commit_email")]
    pub commit_email: String,

    /// Host-wide secret default; instances may override it
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            git_root: default_git_root(),
            api_host: default_api_host(),
            api_port_base: default_api_port_base(),
            service_template: default_service_template(),
            account_prefix: default_account_prefix(),
            shell: default_shell(),
            commit_name: default_commit_name(),
            commit_email: default_commit_email(),
            anthropic_api_key: None,
        }
    }
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/inventory-system")
}

fn default_git_root() -> PathBuf {
    PathBuf::from("/var/lib/inventory-system")
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port_base() -> u16 {
    8600
}

fn default_service_template() -> String {
    "inventory-api".to_string()
}

fn default_account_prefix() -> String {
    "inventory".to_string()
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_commit_name() -> String {
    "Inventory Deploy".to_string()
}

fn default_commit_email() -> String {
    "inventory@localhost".to_string()
}

/// One declared instance, as written in the config file
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InstanceConfig {
    /// Instance data directory; must be absolute
    pub data_dir: PathBuf,

    /// TCP port for the API service; auto-allocated when absent
    #[serde(default)]
    pub api_port: Option<u16>,

    /// Bind address override
    #[serde(default)]
    pub api_host: Option<String>,

    /// Identity overrides; derived from the instance name when absent
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    /// Extra OS users ensured present in the instance group (union semantics)
    #[serde(default)]
    pub additional_members: Vec<String>,

    /// Instance secret; overrides the host-wide default
    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    /// Gates the whole git deployment subgraph for this instance
    #[serde(default = "default_manage_git")]
    pub manage_git: bool,

    /// Bare repository location override
    #[serde(default)]
    pub git_bare_repo: Option<PathBuf>,

    /// Optional external push remote added to the working copy
    #[serde(default)]
    pub git_remote: Option<String>,
}

fn default_manage_git() -> bool {
    true
}
