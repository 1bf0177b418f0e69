//! OS identity resources - per-instance group and user
//!
//! Groups for derived identities get a GID auto-allocated in the reserved
//! 3000+ range. Membership is declarative union: configured members are
//! ensured present, externally-added members are never evicted. Both
//! resources are exclusive so UID/GID allocation cannot race across
//! concurrently converging instances.

use anyhow::{Result, bail};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::engine::{ApplyContext, ApplyResult, Resource, ResourceState};
use crate::error::IdentityConflict;
use crate::runner::{self, GroupEntry, PasswdEntry};

/// Start of the reserved GID range for derived instance groups
const RESERVED_GID_MIN: u32 = 3000;

/// Ensure an instance group exists with the configured members present
#[derive(Debug, Clone)]
pub struct InstanceGroup {
    pub name: String,
    /// Allocate the GID in the reserved range (derived group names only)
    pub reserved_range: bool,
    pub members: BTreeSet<String>,
}

impl InstanceGroup {
    pub fn new(name: &str, reserved_range: bool, members: BTreeSet<String>) -> Self {
        Self {
            name: name.to_string(),
            reserved_range,
            members,
        }
    }

    fn create(&self) -> Result<()> {
        let gid_min = format!("GID_MIN={}", RESERVED_GID_MIN);
        let args: Vec<&str> = if self.reserved_range {
            vec!["-K", &gid_min, &self.name]
        } else {
            vec![&self.name]
        };
        runner::run_capture("groupadd", &args)?;
        Ok(())
    }

    fn add_members(&self, missing: &BTreeSet<String>) -> Result<()> {
        for member in missing {
            runner::run_capture("gpasswd", &["-a", member, &self.name])?;
        }
        Ok(())
    }
}

/// Configured members not yet present in the group (union semantics)
fn missing_members(current: &GroupEntry, desired: &BTreeSet<String>) -> BTreeSet<String> {
    desired.difference(&current.members).cloned().collect()
}

impl Resource for InstanceGroup {
    fn id(&self) -> String {
        format!("group:{}", self.name)
    }

    fn description(&self) -> String {
        if self.members.is_empty() {
            format!("Group {}", self.name)
        } else {
            format!(
                "Group {} with members [{}]",
                self.name,
                self.members.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        }
    }

    fn resource_type(&self) -> &'static str {
        "group"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match runner::lookup_group(&self.name)? {
            None => Ok(ResourceState::Absent),
            Some(entry) => {
                let missing = missing_members(&entry, &self.members);
                if missing.is_empty() {
                    Ok(ResourceState::Present { details: None })
                } else {
                    Ok(ResourceState::Modified {
                        from: format!(
                            "missing members [{}]",
                            missing.iter().cloned().collect::<Vec<_>>().join(", ")
                        ),
                        to: self.description(),
                    })
                }
            }
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

        match runner::lookup_group(&self.name)? {
            None => {
                self.create()?;
                self.add_members(&self.members)?;
                Ok(ApplyResult::Created)
            }
            Some(entry) => {
                let missing = missing_members(&entry, &self.members);
                if missing.is_empty() {
                    Ok(ApplyResult::NoChange)
                } else {
                    self.add_members(&missing)?;
                    Ok(ApplyResult::Modified)
                }
            }
        }
    }

    fn exclusive(&self) -> bool {
        true
    }
}

/// Ensure the instance user exists with the right primary group, home, shell
///
/// A pre-existing account with different attributes is a fatal identity
/// conflict for the instance; it is surfaced, never rewritten.
#[derive(Debug, Clone)]
pub struct InstanceUser {
    pub name: String,
    pub group: String,
    pub home: PathBuf,
    pub shell: String,
}

impl InstanceUser {
    pub fn new(name: &str, group: &str, home: impl Into<PathBuf>, shell: &str) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
            home: home.into(),
            shell: shell.to_string(),
        }
    }

    fn create(&self) -> Result<()> {
        let home = self.home.to_string_lossy();
        runner::run_capture(
            "useradd",
            &["-g", &self.group, "-d", &home, "-s", &self.shell, &self.name],
        )?;
        Ok(())
    }

    /// Compare an existing account against the spec
    fn conflict(&self, entry: &PasswdEntry) -> Result<Option<IdentityConflict>> {
        if entry.home != self.home {
            return Ok(Some(self.conflict_on(
                "home directory",
                entry.home.to_string_lossy().into_owned(),
                self.home.to_string_lossy().into_owned(),
            )));
        }
        if entry.shell != self.shell {
            return Ok(Some(self.conflict_on(
                "shell",
                entry.shell.clone(),
                self.shell.clone(),
            )));
        }

        match runner::lookup_group(&self.group)? {
            Some(group) if group.gid == entry.gid => Ok(None),
            _ => Ok(Some(self.conflict_on(
                "primary group",
                format!("gid {}", entry.gid),
                self.group.clone(),
            ))),
        }
    }

    fn conflict_on(&self, field: &'static str, actual: String, expected: String) -> IdentityConflict {
        IdentityConflict {
            kind: "user",
            account: self.name.clone(),
            field,
            actual,
            expected,
        }
    }
}

impl Resource for InstanceUser {
    fn id(&self) -> String {
        format!("user:{}", self.name)
    }

    fn description(&self) -> String {
        format!(
            "User {} (group {}, home {})",
            self.name,
            self.group,
            self.home.display()
        )
    }

    fn resource_type(&self) -> &'static str {
        "user"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match runner::lookup_user(&self.name)? {
            None => Ok(ResourceState::Absent),
            Some(entry) => match self.conflict(&entry)? {
                None => Ok(ResourceState::Present { details: None }),
                Some(conflict) => Ok(ResourceState::Modified {
                    from: format!("{} '{}'", conflict.field, conflict.actual),
                    to: format!("{} '{}'", conflict.field, conflict.expected),
                }),
            },
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

        match runner::lookup_user(&self.name)? {
            None => {
                self.create()?;
                Ok(ApplyResult::Created)
            }
            Some(entry) => match self.conflict(&entry)? {
                None => Ok(ApplyResult::NoChange),
                Some(conflict) => bail!(conflict),
            },
        }
    }

    fn exclusive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_entry(members: &[&str]) -> GroupEntry {
        GroupEntry {
            name: "inventory-test".to_string(),
            gid: 3001,
            members: members.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    #[test]
    fn test_missing_members_union_semantics() {
        // Externally-added members never count against convergence
        let current = group_entry(&["admin", "alice"]);
        let desired = BTreeSet::from(["alice".to_string(), "bob".to_string()]);
        assert_eq!(
            missing_members(&current, &desired),
            BTreeSet::from(["bob".to_string()])
        );
    }

    #[test]
    fn test_no_missing_members_when_superset() {
        let current = group_entry(&["alice", "bob", "carol"]);
        let desired = BTreeSet::from(["alice".to_string(), "bob".to_string()]);
        assert!(missing_members(&current, &desired).is_empty());
    }

    #[test]
    fn test_user_conflict_on_home() {
        let user = InstanceUser::new(
            "inventory-test",
            "inventory-test",
            "/var/www/inventory/test",
            "/bin/bash",
        );
        let entry = PasswdEntry {
            name: "inventory-test".to_string(),
            uid: 3001,
            gid: 3001,
            home: PathBuf::from("/srv/elsewhere"),
            shell: "/bin/bash".to_string(),
        };
        let conflict = user.conflict(&entry).unwrap().unwrap();
        assert_eq!(conflict.field, "home directory");
        assert_eq!(conflict.actual, "/srv/elsewhere");
    }

    #[test]
    fn test_user_conflict_on_shell() {
        let user = InstanceUser::new("inv", "inv", "/data/inv", "/bin/bash");
        let entry = PasswdEntry {
            name: "inv".to_string(),
            uid: 3001,
            gid: 3001,
            home: PathBuf::from("/data/inv"),
            shell: "/usr/sbin/nologin".to_string(),
        };
        let conflict = user.conflict(&entry).unwrap().unwrap();
        assert_eq!(conflict.field, "shell");
    }
}
