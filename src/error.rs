//! Typed errors for the convergence engine
//!
//! Validation failures abort a run before any mutation; identity conflicts
//! are fatal for a single instance's pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Registry-level validation failure
///
/// Raised while resolving the instance set, strictly before any resource
/// is applied. A single validation error aborts the whole run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate instance name '{0}'")]
    DuplicateName(String),

    #[error("invalid instance name '{0}' (expected [a-z0-9][a-z0-9_-]*)")]
    InvalidName(String),

    #[error("instance '{name}': data_dir must be an absolute path: {path}")]
    RelativeDataDir { name: String, path: PathBuf },

    #[error("instances '{first}' and '{second}' share data_dir {path}")]
    DataDirCollision {
        first: String,
        second: String,
        path: PathBuf,
    },

    #[error("instances '{first}' and '{second}' share bare repository {path}")]
    BareRepoCollision {
        first: String,
        second: String,
        path: PathBuf,
    },

    #[error("instances '{first}' and '{second}' use {path} as both a data_dir and a bare repository")]
    PathReuse {
        first: String,
        second: String,
        path: PathBuf,
    },

    #[error("auto-allocated API port overflows for instance '{0}'")]
    PortOverflow(String),

    #[error("instances '{first}' and '{second}' both bind API port {port}")]
    PortCollision {
        first: String,
        second: String,
        port: u16,
    },

    #[error("instances '{first}' and '{second}' share the {kind} name '{account}'")]
    AccountCollision {
        first: String,
        second: String,
        kind: &'static str,
        account: String,
    },
}

/// A pre-existing OS account whose attributes differ from the desired spec
///
/// Surfaced instead of rewriting the account; fatal for that instance only.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{kind} '{account}' already exists with {field} '{actual}', expected '{expected}'")]
pub struct IdentityConflict {
    pub kind: &'static str,
    pub account: String,
    pub field: &'static str,
    pub actual: String,
    pub expected: String,
}
