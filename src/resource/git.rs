//! Git deployment resources
//!
//! Per instance: a bare push-target repository, a post-receive hook that
//! deploys pushed commits into the data directory, the data directory wired
//! as a working copy of the bare repo, and optionally an external named
//! remote. Every action is guarded by state observable in the repositories
//! themselves; in particular an existing bare repository is never
//! re-initialized (that would clobber history and hooks).

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::engine::{ApplyContext, ApplyResult, Resource, ResourceState};
use crate::runner;

/// Local remote name wiring the working copy to the bare repository
pub const LOCAL_REMOTE: &str = "local";

/// Remote name used for the optional external push target
pub const EXTERNAL_REMOTE: &str = "origin";

fn git(workdir: &Path, args: &[&str]) -> Result<String> {
    let dir = workdir.to_string_lossy();
    let mut full = vec!["-C", dir.as_ref()];
    full.extend_from_slice(args);
    runner::run_capture("git", &full)
}

fn git_quiet(workdir: &Path, args: &[&str]) -> bool {
    let dir = workdir.to_string_lossy();
    let mut full = vec!["-C", dir.as_ref()];
    full.extend_from_slice(args);
    runner::run_quiet("git", &full)
}

fn chown_recursive(path: &Path, owner: &Option<String>, group: &Option<String>) -> Result<()> {
    if let (Some(owner), Some(group)) = (owner, group) {
        let spec = format!("{}:{}", owner, group);
        let p = path.to_string_lossy();
        runner::run_capture("chown", &["-R", &spec, p.as_ref()])?;
    }
    Ok(())
}

// ============================================================================
// Bare repository
// ============================================================================

/// Initialize the bare push-target repository, exactly once
///
/// The guard is the repository's own `config` file: if it exists the
/// repository was initialized at some point and is left strictly alone.
#[derive(Debug, Clone)]
pub struct BareRepo {
    pub path: PathBuf,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl BareRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: None,
            group: None,
        }
    }

    pub fn owned_by(mut self, owner: &str, group: &str) -> Self {
        self.owner = Some(owner.to_string());
        self.group = Some(group.to_string());
        self
    }

    fn initialized(&self) -> bool {
        self.path.join("config").is_file()
    }
}

impl Resource for BareRepo {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("Bare repository {}", self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        "git_bare_repo"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.initialized() {
            Ok(ResourceState::Present { details: None })
        } else {
            Ok(ResourceState::Absent)
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

        if self.initialized() {
            return Ok(ApplyResult::NoChange);
        }

        fs::create_dir_all(&self.path)
            .with_context(|| format!("Could not create {}", self.path.display()))?;
        let p = self.path.to_string_lossy();
        runner::run_capture("git", &["init", "--bare", p.as_ref()])?;
        chown_recursive(&self.path, &self.owner, &self.group)?;

        Ok(ApplyResult::Created)
    }
}

// ============================================================================
// Post-receive hook
// ============================================================================

/// Render the post-receive deploy script
///
/// The hook checks out each pushed branch into the instance data directory;
/// it runs on the managed host when a push lands, outside this engine.
pub fn render_post_receive(data_dir: &Path) -> String {
    format!(
        "#!/bin/sh\n\
         # Deploy pushed commits into the instance working tree.\n\
         set -e\n\
         \n\
         while read -r _oldrev _newrev refname; do\n\
         \tbranch=\"${{refname#refs/heads/}}\"\n\
         \t[ \"$branch\" = \"$refname\" ] && continue\n\
         \tGIT_WORK_TREE=\"{}\" git checkout -f \"$branch\"\n\
         done\n",
        data_dir.display()
    )
}

/// Ensure the post-receive hook is present with the right content,
/// executable, and owned by the instance account
#[derive(Debug, Clone)]
pub struct PostReceiveHook {
    pub bare_repo: PathBuf,
    pub data_dir: PathBuf,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl PostReceiveHook {
    pub fn new(bare_repo: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bare_repo: bare_repo.into(),
            data_dir: data_dir.into(),
            owner: None,
            group: None,
        }
    }

    pub fn owned_by(mut self, owner: &str, group: &str) -> Self {
        self.owner = Some(owner.to_string());
        self.group = Some(group.to_string());
        self
    }

    pub fn hook_path(&self) -> PathBuf {
        self.bare_repo.join("hooks").join("post-receive")
    }

    fn converged(&self) -> Result<bool> {
        let path = self.hook_path();
        if !path.is_file() {
            return Ok(false);
        }
        let current = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        if current != render_post_receive(&self.data_dir) {
            return Ok(false);
        }
        let mode = fs::metadata(&path)?.permissions().mode();
        Ok(mode & 0o7777 == 0o755)
    }
}

impl Resource for PostReceiveHook {
    fn id(&self) -> String {
        self.hook_path().to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("post-receive deploy hook in {}", self.bare_repo.display())
    }

    fn resource_type(&self) -> &'static str {
        "git_hook"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.converged()? {
            Ok(ResourceState::Present { details: None })
        } else if self.hook_path().is_file() {
            Ok(ResourceState::Modified {
                from: "stale hook".to_string(),
                to: "rendered hook".to_string(),
            })
        } else {
            Ok(ResourceState::Absent)
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

        if self.converged()? {
            return Ok(ApplyResult::NoChange);
        }

        let path = self.hook_path();
        let existed = path.is_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        fs::write(&path, render_post_receive(&self.data_dir))
            .with_context(|| format!("Could not write {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        chown_recursive(&path, &self.owner, &self.group)?;

        if existed {
            Ok(ApplyResult::Modified)
        } else {
            Ok(ApplyResult::Created)
        }
    }
}

// ============================================================================
// Working copy
// ============================================================================

/// Wire the data directory as a git working copy of the bare repository
///
/// Three run-once actions, each keyed by a marker observable in the
/// repository itself: init (guard: `.git` absent), commit identity (guard:
/// `user.name` unset), local remote (guard: remote absent). None is ever
/// re-applied on later convergences.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    pub data_dir: PathBuf,
    pub bare_repo: PathBuf,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub commit_name: String,
    pub commit_email: String,
}

impl WorkingCopy {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        bare_repo: impl Into<PathBuf>,
        commit_name: &str,
        commit_email: &str,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            bare_repo: bare_repo.into(),
            owner: None,
            group: None,
            commit_name: commit_name.to_string(),
            commit_email: commit_email.to_string(),
        }
    }

    pub fn owned_by(mut self, owner: &str, group: &str) -> Self {
        self.owner = Some(owner.to_string());
        self.group = Some(group.to_string());
        self
    }

    fn repo_initialized(&self) -> bool {
        self.data_dir.join(".git").exists()
    }

    fn identity_configured(&self) -> bool {
        git_quiet(&self.data_dir, &["config", "--local", "--get", "user.name"])
    }

    fn local_remote_present(&self) -> bool {
        git_quiet(&self.data_dir, &["remote", "get-url", LOCAL_REMOTE])
    }
}

impl Resource for WorkingCopy {
    fn id(&self) -> String {
        format!("worktree:{}", self.data_dir.display())
    }

    fn description(&self) -> String {
        format!(
            "Working copy {} tracking {}",
            self.data_dir.display(),
            self.bare_repo.display()
        )
    }

    fn resource_type(&self) -> &'static str {
        "git_working_copy"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.repo_initialized() {
            return Ok(ResourceState::Absent);
        }
        if self.identity_configured() && self.local_remote_present() {
            Ok(ResourceState::Present { details: None })
        } else {
            Ok(ResourceState::Modified {
                from: "partially linked".to_string(),
                to: "initialized, identity set, local remote wired".to_string(),
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

        let mut initialized = false;
        let mut changed = false;

        if !self.repo_initialized() {
            git(&self.data_dir, &["init"])?;
            chown_recursive(&self.data_dir.join(".git"), &self.owner, &self.group)?;
            initialized = true;
        }

        if !self.identity_configured() {
            git(&self.data_dir, &["config", "--local", "user.name", &self.commit_name])?;
            git(
                &self.data_dir,
                &["config", "--local", "user.email", &self.commit_email],
            )?;
            changed = true;
        }

        if !self.local_remote_present() {
            let bare = self.bare_repo.to_string_lossy();
            git(&self.data_dir, &["remote", "add", LOCAL_REMOTE, bare.as_ref()])?;
            changed = true;
        }

        if initialized {
            Ok(ApplyResult::Created)
        } else if changed {
            Ok(ApplyResult::Modified)
        } else {
            Ok(ApplyResult::NoChange)
        }
    }
}

// ============================================================================
// External remote
// ============================================================================

/// Add a named external remote to the working copy, exactly once
///
/// The guard is the remote's presence under that name: URL drift on an
/// existing remote is deliberately not corrected (run-once semantics).
#[derive(Debug, Clone)]
pub struct NamedRemote {
    pub workdir: PathBuf,
    pub name: String,
    pub url: String,
}

impl NamedRemote {
    pub fn new(workdir: impl Into<PathBuf>, name: &str, url: &str) -> Self {
        Self {
            workdir: workdir.into(),
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    fn present(&self) -> bool {
        git_quiet(&self.workdir, &["remote", "get-url", &self.name])
    }
}

impl Resource for NamedRemote {
    fn id(&self) -> String {
        format!("remote:{}:{}", self.workdir.display(), self.name)
    }

    fn description(&self) -> String {
        format!("Remote {} -> {}", self.name, self.url)
    }

    fn resource_type(&self) -> &'static str {
        "git_remote"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.present() {
            Ok(ResourceState::Present { details: None })
        } else {
            Ok(ResourceState::Absent)
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

        if self.present() {
            return Ok(ApplyResult::NoChange);
        }

        git(&self.workdir, &["remote", "add", &self.name, &self.url])?;
        Ok(ApplyResult::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hook_script_content() {
        let script = render_post_receive(Path::new("/var/www/inventory/testinv"));
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("GIT_WORK_TREE=\"/var/www/inventory/testinv\""));
        assert!(script.contains("refs/heads/"));
        assert!(script.ends_with("done\n"));
    }

    #[test]
    fn test_existing_bare_repo_is_never_reinitialized() {
        // Fixture: a directory that already carries a bare repo's config.
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("testinv.git");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join("config"), "[core]\n\tbare = true\n").unwrap();

        let resource = BareRepo::new(&repo);
        assert!(resource.current_state().unwrap().is_present());

        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(resource.apply(&mut ctx).unwrap(), ApplyResult::NoChange);
        // No re-init side effect: git was never invoked, so no HEAD appeared.
        assert!(!repo.join("HEAD").exists());
    }

    #[test]
    fn test_hook_reapply_is_noop() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("testinv.git");
        let data_dir = PathBuf::from("/var/www/inventory/testinv");

        let hook = PostReceiveHook::new(&repo, &data_dir);
        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(hook.apply(&mut ctx).unwrap(), ApplyResult::Created);

        let mode = fs::metadata(hook.hook_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o755);

        assert_eq!(hook.apply(&mut ctx).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_stale_hook_is_rewritten() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("testinv.git");
        let hook = PostReceiveHook::new(&repo, "/var/www/inventory/testinv");

        fs::create_dir_all(repo.join("hooks")).unwrap();
        fs::write(hook.hook_path(), "#!/bin/sh\nexit 0\n").unwrap();

        assert!(matches!(
            hook.current_state().unwrap(),
            ResourceState::Modified { .. }
        ));

        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(hook.apply(&mut ctx).unwrap(), ApplyResult::Modified);
        assert_eq!(
            fs::read_to_string(hook.hook_path()).unwrap(),
            render_post_receive(Path::new("/var/www/inventory/testinv"))
        );
    }

    #[test]
    fn test_dry_run_initializes_nothing() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("testinv.git");

        let resource = BareRepo::new(&repo);
        let mut ctx = ApplyContext::new(true, false);
        assert!(matches!(
            resource.apply(&mut ctx).unwrap(),
            ApplyResult::Skipped { .. }
        ));
        assert!(!repo.exists());
    }
}
