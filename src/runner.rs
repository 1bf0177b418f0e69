//! Process helpers and account-database inspection
//!
//! All OS mutation in invctl goes through external commands (`groupadd`,
//! `useradd`, `git`, `systemctl`); inspection of the passwd/group databases
//! goes through `getent` so that NSS-backed accounts are visible too.

use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Run a command and capture trimmed stdout, failing on non-zero exit
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    log::debug!("exec: {} {}", cmd, args.join(" "));
    let output = Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{} failed: {}", cmd, stderr.trim())
    }
}

/// Run a command silently, returning success/failure
pub fn run_quiet(cmd: &str, args: &[&str]) -> bool {
    log::debug!("exec (quiet): {} {}", cmd, args.join(" "));
    Command::new(cmd)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check if a command exists on PATH
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

// ============================================================================
// Account database lookups
// ============================================================================

/// One passwd database entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

/// One group database entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: BTreeSet<String>,
}

/// Look up a user by name; `Ok(None)` when the account does not exist
pub fn lookup_user(name: &str) -> Result<Option<PasswdEntry>> {
    lookup("passwd", name)?.map(|line| parse_passwd_line(&line)).transpose()
}

/// Look up a group by name; `Ok(None)` when the group does not exist
pub fn lookup_group(name: &str) -> Result<Option<GroupEntry>> {
    lookup("group", name)?.map(|line| parse_group_line(&line)).transpose()
}

/// Query one key from a getent database
///
/// getent exits 2 when the key is not found; anything else non-zero is an
/// actual failure.
fn lookup(database: &str, key: &str) -> Result<Option<String>> {
    let output = Command::new("getent")
        .args([database, key])
        .output()
        .context("Failed to execute getent")?;

    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    } else if output.status.code() == Some(2) {
        Ok(None)
    } else {
        bail!(
            "getent {} {} failed: {}",
            database,
            key,
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }
}

/// Parse `name:x:uid:gid:gecos:home:shell`
pub fn parse_passwd_line(line: &str) -> Result<PasswdEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
        bail!("Malformed passwd entry: {}", line);
    }
    Ok(PasswdEntry {
        name: fields[0].to_string(),
        uid: fields[2].parse().context("Invalid uid in passwd entry")?,
        gid: fields[3].parse().context("Invalid gid in passwd entry")?,
        home: PathBuf::from(fields[5]),
        shell: fields[6].to_string(),
    })
}

/// Parse `name:x:gid:member1,member2`
pub fn parse_group_line(line: &str) -> Result<GroupEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 4 {
        bail!("Malformed group entry: {}", line);
    }
    let members = fields[3]
        .split(',')
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    Ok(GroupEntry {
        name: fields[0].to_string(),
        gid: fields[2].parse().context("Invalid gid in group entry")?,
        members,
    })
}
