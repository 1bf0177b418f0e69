//! Rendered per-instance configuration file
//!
//! Flat KEY=VALUE format consumed by the inventory service via
//! EnvironmentFile. Rendering is deterministic so re-rendering an unchanged
//! spec is byte-identical and the file resource converges to a no-op.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::PathBuf;

use crate::engine::{ApplyContext, ApplyResult, Resource, ResourceState};
use crate::runner;
use crate::spec::EffectiveSpec;

/// Render the instance config file content
///
/// Key order is fixed: INVENTORY_PATH, API_PORT, API_HOST, then
/// ANTHROPIC_API_KEY if and only if the secret is a non-empty string. An
/// absent or empty secret emits no line at all, not a placeholder.
pub fn render_conf(spec: &EffectiveSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "INVENTORY_PATH={}", spec.data_dir.display());
    let _ = writeln!(out, "API_PORT={}", spec.api_port);
    let _ = writeln!(out, "API_HOST={}", spec.api_host);
    if let Some(key) = spec.anthropic_api_key.as_deref()
        && !key.is_empty()
    {
        let _ = writeln!(out, "ANTHROPIC_API_KEY={}", key);
    }
    out
}

/// Ensure a file with exact content, ownership, and mode
///
/// The instance config file is `root:<group>` mode 0640 so the secret line
/// is never world-readable. A content change flags the instance service for
/// a restart through the apply context.
#[derive(Debug, Clone)]
pub struct ConfFile {
    pub path: PathBuf,
    pub content: String,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: u32,
}

#[derive(Debug)]
enum FileState {
    Missing,
    Drifted(String),
    Converged,
}

impl ConfFile {
    pub fn new(path: impl Into<PathBuf>, content: String) -> Self {
        Self {
            path: path.into(),
            content,
            owner: None,
            group: None,
            mode: 0o640,
        }
    }

    pub fn owned_by(mut self, owner: &str, group: &str) -> Self {
        self.owner = Some(owner.to_string());
        self.group = Some(group.to_string());
        self
    }

    /// Build the config-file resource for one instance
    pub fn for_instance(spec: &EffectiveSpec) -> Self {
        Self::new(&spec.conf_path, render_conf(spec)).owned_by("root", &spec.group)
    }

    fn resolve_ids(&self) -> Result<(Option<u32>, Option<u32>)> {
        let uid = match &self.owner {
            Some(name) => Some(
                runner::lookup_user(name)?
                    .with_context(|| format!("Owner '{}' does not exist", name))?
                    .uid,
            ),
            None => None,
        };
        let gid = match &self.group {
            Some(name) => Some(
                runner::lookup_group(name)?
                    .with_context(|| format!("Group '{}' does not exist", name))?
                    .gid,
            ),
            None => None,
        };
        Ok((uid, gid))
    }

    fn check_current(&self) -> Result<FileState> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileState::Missing),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Could not stat {}", self.path.display()));
            }
        };

        let current = fs::read_to_string(&self.path)
            .with_context(|| format!("Could not read {}", self.path.display()))?;
        if current != self.content {
            return Ok(FileState::Drifted("content".to_string()));
        }

        if metadata.permissions().mode() & 0o7777 != self.mode {
            return Ok(FileState::Drifted(format!(
                "mode {:04o}",
                metadata.permissions().mode() & 0o7777
            )));
        }

        let (uid, gid) = self.resolve_ids()?;
        if let Some(uid) = uid
            && metadata.uid() != uid
        {
            return Ok(FileState::Drifted(format!("owner uid {}", metadata.uid())));
        }
        if let Some(gid) = gid
            && metadata.gid() != gid
        {
            return Ok(FileState::Drifted(format!("group gid {}", metadata.gid())));
        }

        Ok(FileState::Converged)
    }

    fn converge(&self) -> Result<()> {
        fs::write(&self.path, &self.content)
            .with_context(|| format!("Could not write {}", self.path.display()))?;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.mode))
            .with_context(|| format!("Could not chmod {}", self.path.display()))?;

        let (uid, gid) = self.resolve_ids()?;
        if uid.is_some() || gid.is_some() {
            std::os::unix::fs::chown(&self.path, uid, gid)
                .with_context(|| format!("Could not chown {}", self.path.display()))?;
        }

        Ok(())
    }
}

impl Resource for ConfFile {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("Config file {}", self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        "config_file"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.check_current()? {
            FileState::Converged => Ok(ResourceState::Present { details: None }),
            FileState::Missing => Ok(ResourceState::Absent),
            FileState::Drifted(drift) => Ok(ResourceState::Modified {
                from: drift,
                to: "rendered content".to_string(),
            }),
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

        match self.check_current()? {
            FileState::Converged => Ok(ApplyResult::NoChange),
            FileState::Missing => {
                self.converge()?;
                ctx.notify_service_refresh();
                Ok(ApplyResult::Created)
            }
            FileState::Drifted(drift) => {
                self.converge()?;
                // Only a content change warrants a service restart;
                // mode/ownership repairs do not.
                if drift == "content" {
                    ctx.notify_service_refresh();
                }
                Ok(ApplyResult::Modified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, InstanceConfig};
    use tempfile::TempDir;

    fn testinv_spec(anthropic_api_key: Option<&str>) -> EffectiveSpec {
        let config = InstanceConfig {
            data_dir: PathBuf::from("/var/www/inventory/testinv"),
            api_port: Some(8765),
            api_host: None,
            user: None,
            group: None,
            additional_members: Vec::new(),
            anthropic_api_key: anthropic_api_key.map(str::to_string),
            manage_git: true,
            git_bare_repo: None,
            git_remote: None,
        };
        EffectiveSpec::resolve("testinv", &config, &Defaults::default(), 0).unwrap()
    }

    #[test]
    fn test_render_without_secret() {
        let content = render_conf(&testinv_spec(None));
        assert_eq!(
            content,
            "INVENTORY_PATH=/var/www/inventory/testinv\n\
             API_PORT=8765\n\
             API_HOST=127.0.0.1\n"
        );
        assert!(!content.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_render_with_secret() {
        let content = render_conf(&testinv_spec(Some("sk-ant-secret")));
        assert!(content.ends_with("ANTHROPIC_API_KEY=sk-ant-secret\n"));
    }

    #[test]
    fn test_render_empty_secret_emits_no_line() {
        let content = render_conf(&testinv_spec(Some("")));
        assert!(!content.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let spec = testinv_spec(Some("sk-ant-secret"));
        assert_eq!(render_conf(&spec), render_conf(&spec));
    }

    #[test]
    fn test_write_and_reapply_is_noop() {
        let tmp = TempDir::new().unwrap();
        let file = ConfFile::new(tmp.path().join("testinv.conf"), "API_PORT=8765\n".to_string());

        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(file.apply(&mut ctx).unwrap(), ApplyResult::Created);
        assert!(ctx.service_refresh_pending());

        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(file.apply(&mut ctx).unwrap(), ApplyResult::NoChange);
        assert!(!ctx.service_refresh_pending());
    }

    #[test]
    fn test_content_change_flags_refresh() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("testinv.conf");
        fs::write(&path, "API_PORT=8000\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let file = ConfFile::new(&path, "API_PORT=8765\n".to_string());
        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(file.apply(&mut ctx).unwrap(), ApplyResult::Modified);
        assert!(ctx.service_refresh_pending());
        assert_eq!(fs::read_to_string(&path).unwrap(), "API_PORT=8765\n");
    }

    #[test]
    fn test_mode_repair_does_not_flag_refresh() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("testinv.conf");
        fs::write(&path, "API_PORT=8765\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let file = ConfFile::new(&path, "API_PORT=8765\n".to_string());
        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(file.apply(&mut ctx).unwrap(), ApplyResult::Modified);
        assert!(!ctx.service_refresh_pending());
    }
}
