//! Migration planning errors.

use thiserror::Error;

use crate::core::destination::RejectReasons;

/// Errors returned by destination selection and migration planning.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MigrationError {
    #[error("cannot find usage information for vm '{0}'")]
    VmNotFound(String),

    #[error("vm '{vm}' is already migrating to '{destination}'")]
    AlreadyMigrating { vm: String, destination: String },

    #[error("no candidate destinations for vm '{0}'")]
    NoCandidates(String),

    /// Every candidate was rejected. This is an expected planning outcome, the reasons are aggregated over all
    /// candidates.
    #[error("unable to find destination for vm '{vm}' ({reasons})")]
    NoDestinationAvailable { vm: String, reasons: RejectReasons },

    #[error("failed to create representative job for vm '{vm}': {reason}")]
    ConstructionFailure { vm: String, reason: String },

    #[error("node '{node}' is not valid as a migration source: {reason}")]
    SourceRejected { node: String, reason: String },

    #[error("unknown migration policy '{0}'")]
    UnknownPolicy(String),

    #[error("failed to compute usage snapshot: {0}")]
    Snapshot(String),

    /// Usage ledger does not match the migration decisions. Never retried.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

pub type MigrationResult<T> = Result<T, MigrationError>;
