//! Typed error hierarchy for the relay orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `LedgerError` — append log and snapshot failures
//! - `GovernorError` — resource authorization failures
//! - `MachineError` — run-level outcomes surfaced to the CLI
//!
//! `ErrorKind` is the wire-level taxonomy carried inside a
//! `DelegationResult` and consumed by the recovery controller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recovery::EscalationReport;

/// Classification of a failed delegation, carried in `DelegationResult`.
///
/// The recovery controller keys its retry/escalate/abort decision off this
/// value alone, so every failure path must map to exactly one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Denied before any worker was invoked; recoverable by reducing scope.
    ResourceExceeded,
    /// Worker exceeded its granted deadline; partial output was discarded.
    Timeout,
    /// Worker self-reported success but failed the completion criteria.
    IncompleteOutput,
    /// Worker invocation failed outright (spawn error, bad output, failure status).
    WorkerFailed,
    /// A prerequisite artifact kind has no registered artifacts; retrying
    /// without new input cannot help.
    MissingPrerequisite,
    /// A stale artifact registration; the ledger already holds an
    /// equal-or-higher version for the path.
    VersionConflict,
    /// The append log or snapshot failed an integrity check.
    LedgerCorruption,
}

impl ErrorKind {
    /// Whether retry-with-reduced-scope can ever succeed for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ResourceExceeded
                | ErrorKind::Timeout
                | ErrorKind::IncompleteOutput
                | ErrorKind::WorkerFailed
        )
    }

    /// Integrity errors that must halt the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::VersionConflict | ErrorKind::LedgerCorruption)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ResourceExceeded => "resource_exceeded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::IncompleteOutput => "incomplete_output",
            ErrorKind::WorkerFailed => "worker_failed",
            ErrorKind::MissingPrerequisite => "missing_prerequisite",
            ErrorKind::VersionConflict => "version_conflict",
            ErrorKind::LedgerCorruption => "ledger_corruption",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from the state ledger subsystem.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O failure at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger is locked by another process: {path}")]
    Locked { path: std::path::PathBuf },

    #[error("Ledger corruption: {detail}")]
    Corruption { detail: String },

    #[error("Version conflict for {path}: attempted v{attempted}, registry holds v{existing}")]
    VersionConflict {
        path: String,
        attempted: u32,
        existing: u32,
    },

    #[error("Failed to serialize ledger record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Map to the wire-level taxonomy for delegation results.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::VersionConflict { .. } => ErrorKind::VersionConflict,
            _ => ErrorKind::LedgerCorruption,
        }
    }
}

/// Errors from the resource governor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GovernorError {
    #[error("Requested {resource} = {requested} exceeds ceiling {ceiling}")]
    CeilingExceeded {
        resource: &'static str,
        requested: u64,
        ceiling: u64,
    },

    #[error("Grant already consumed")]
    AlreadyConsumed,

    #[error("Grant queue saturated ({depth} waiters)")]
    QueueSaturated { depth: usize },
}

/// Run-level failures surfaced by the phase state machine.
///
/// Exit-code mapping: `Escalated` → 1, `CeilingViolation` → 2,
/// `Aborted` → 3.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Phase '{phase}' escalated after {attempts} attempt(s): {last_error}")]
    Escalated {
        phase: String,
        attempts: u32,
        last_error: ErrorKind,
        report: Box<EscalationReport>,
    },

    #[error("Resource ceiling violation: {0}")]
    CeilingViolation(#[from] GovernorError),

    #[error("Run aborted ({kind}): {detail}")]
    Aborted { kind: ErrorKind, detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MachineError {
    /// Process exit code for the CLI. An escalation whose terminal failure
    /// was a resource denial counts as a ceiling violation.
    pub fn exit_code(&self) -> i32 {
        match self {
            MachineError::Escalated {
                last_error: ErrorKind::ResourceExceeded,
                ..
            } => 2,
            MachineError::Escalated { .. } => 1,
            MachineError::CeilingViolation(_) => 2,
            MachineError::Aborted { .. } => 3,
            MachineError::Other(_) => 1,
        }
    }
}
