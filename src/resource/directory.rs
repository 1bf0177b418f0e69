//! Directory resource - existence, ownership, and mode

use anyhow::{Context, Result, bail};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::PathBuf;

use crate::engine::{ApplyContext, ApplyResult, Resource, ResourceState};
use crate::runner;

/// A directory to ensure, optionally with ownership and a full mode
/// (including setgid/setuid bits, e.g. `0o2775` for instance data dirs)
#[derive(Debug, Clone)]
pub struct Dir {
    pub path: PathBuf,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

#[derive(Debug)]
enum DirState {
    Missing,
    Drifted(String),
    Converged,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: None,
            group: None,
            mode: None,
        }
    }

    pub fn owned_by(mut self, owner: &str, group: &str) -> Self {
        self.owner = Some(owner.to_string());
        self.group = Some(group.to_string());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Resolve the configured owner/group to numeric ids
    ///
    /// Fails when a configured account does not exist; identity convergence
    /// runs earlier in the pipeline, so by apply time it must.
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

    fn check_current(&self) -> Result<DirState> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DirState::Missing),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Could not stat {}", self.path.display()));
            }
        };

        if !metadata.is_dir() {
            bail!("{} exists but is not a directory", self.path.display());
        }

        if let Some(mode) = self.mode
            && metadata.permissions().mode() & 0o7777 != mode
        {
            return Ok(DirState::Drifted(format!(
                "mode {:04o}",
                metadata.permissions().mode() & 0o7777
            )));
        }

        let (uid, gid) = self.resolve_ids()?;
        if let Some(uid) = uid
            && metadata.uid() != uid
        {
            return Ok(DirState::Drifted(format!("owner uid {}", metadata.uid())));
        }
        if let Some(gid) = gid
            && metadata.gid() != gid
        {
            return Ok(DirState::Drifted(format!("group gid {}", metadata.gid())));
        }

        Ok(DirState::Converged)
    }

    fn converge(&self) -> Result<()> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("Could not create {}", self.path.display()))?;

        if let Some(mode) = self.mode {
            fs::set_permissions(&self.path, fs::Permissions::from_mode(mode))
                .with_context(|| format!("Could not chmod {}", self.path.display()))?;
        }

        let (uid, gid) = self.resolve_ids()?;
        if uid.is_some() || gid.is_some() {
            std::os::unix::fs::chown(&self.path, uid, gid)
                .with_context(|| format!("Could not chown {}", self.path.display()))?;
        }

        Ok(())
    }
}

impl Resource for Dir {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        match (&self.owner, self.mode) {
            (Some(owner), Some(mode)) => format!(
                "Directory {} ({}:{}, {:04o})",
                self.path.display(),
                owner,
                self.group.as_deref().unwrap_or(owner),
                mode
            ),
            _ => format!("Directory {}", self.path.display()),
        }
    }

    fn resource_type(&self) -> &'static str {
        "directory"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.check_current()? {
            DirState::Converged => Ok(ResourceState::Present { details: None }),
            DirState::Missing => Ok(ResourceState::Absent),
            DirState::Drifted(drift) => Ok(ResourceState::Modified {
                from: drift,
                to: self.description(),
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
            DirState::Converged => Ok(ApplyResult::NoChange),
            DirState::Missing => {
                self.converge()?;
                Ok(ApplyResult::Created)
            }
            DirState::Drifted(_) => {
                self.converge()?;
                Ok(ApplyResult::Modified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_reapply_is_noop() {
        let tmp = TempDir::new().unwrap();
        let dir = Dir::new(tmp.path().join("data")).mode(0o2775);
        let mut ctx = ApplyContext::new(false, false);

        assert_eq!(dir.apply(&mut ctx).unwrap(), ApplyResult::Created);
        assert_eq!(dir.apply(&mut ctx).unwrap(), ApplyResult::NoChange);

        let mode = fs::metadata(tmp.path().join("data"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o2775);
    }

    #[test]
    fn test_mode_drift_is_fixed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        fs::create_dir(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();

        let dir = Dir::new(&path).mode(0o2775);
        assert!(matches!(
            dir.current_state().unwrap(),
            ResourceState::Modified { .. }
        ));

        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(dir.apply(&mut ctx).unwrap(), ApplyResult::Modified);
        assert_eq!(dir.apply(&mut ctx).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        let dir = Dir::new(&path).mode(0o2775);

        let mut ctx = ApplyContext::new(true, false);
        assert!(matches!(
            dir.apply(&mut ctx).unwrap(),
            ApplyResult::Skipped { .. }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data");
        fs::write(&path, b"not a directory").unwrap();

        let dir = Dir::new(&path);
        assert!(dir.current_state().is_err());
    }
}
