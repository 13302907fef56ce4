//! Failure recovery: bounded retry, escalation, abort.
//!
//! Every retry strictly reduces scope (half the prior file ceiling), so a
//! persistently failing phase terminates after `max_retries` attempts. The
//! controller never force-completes a phase: once retries are spent it
//! escalates with a structured report, and integrity errors abort the run
//! outright.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ErrorKind;
use crate::phase::WorkflowPhase;
use crate::workitem::{DelegationResult, WorkConstraints};

/// How many of the most recent delegation results an escalation carries.
const ESCALATION_HISTORY: usize = 3;

/// The controller's decision for a failed phase.
#[derive(Debug)]
pub enum Recovery {
    /// Re-dispatch the phase under strictly reduced constraints.
    Retry { constraints: WorkConstraints },
    /// Retries exhausted (or retrying cannot help); surface to the operator.
    Escalate(Box<EscalationReport>),
    /// Non-recoverable integrity error; halt the whole run.
    Abort { kind: ErrorKind, detail: String },
}

/// Structured report handed to the operator when a phase is abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationReport {
    pub phase: WorkflowPhase,
    pub attempts: u32,
    pub last_error: ErrorKind,
    /// The most recent delegation results, oldest first.
    pub recent_results: Vec<DelegationResult>,
    pub created_at: DateTime<Utc>,
}

/// Per-run recovery state. One instance per run, owned by the state
/// machine; attempt counters are explicit so no retry loop is open-ended.
pub struct RecoveryController {
    max_retries: u32,
    attempts: HashMap<WorkflowPhase, u32>,
    history: HashMap<WorkflowPhase, VecDeque<DelegationResult>>,
}

impl RecoveryController {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: HashMap::new(),
            history: HashMap::new(),
        }
    }

    /// Record a delegation result for later escalation reporting.
    pub fn record(&mut self, result: &DelegationResult) {
        let history = self.history.entry(result.phase).or_default();
        if history.len() == ESCALATION_HISTORY {
            history.pop_front();
        }
        history.push_back(result.clone());
    }

    /// Retries consumed so far for a phase.
    pub fn attempts(&self, phase: WorkflowPhase) -> u32 {
        self.attempts.get(&phase).copied().unwrap_or(0)
    }

    /// Decide what happens after a phase failure.
    ///
    /// `current` is the constraint set the failed attempt ran under; a
    /// retry halves its file ceiling.
    pub fn recover(
        &mut self,
        phase: WorkflowPhase,
        failure: ErrorKind,
        current: &WorkConstraints,
    ) -> Recovery {
        if failure.is_fatal() {
            return Recovery::Abort {
                kind: failure,
                detail: format!("integrity error in phase '{phase}'"),
            };
        }

        let attempts = self.attempts(phase);

        // Retrying without new upstream input cannot help.
        if failure == ErrorKind::MissingPrerequisite {
            return Recovery::Escalate(Box::new(self.report(phase, attempts, failure)));
        }

        if attempts >= self.max_retries {
            warn!(%phase, attempts, "retries exhausted, escalating");
            return Recovery::Escalate(Box::new(self.report(phase, attempts, failure)));
        }

        self.attempts.insert(phase, attempts + 1);
        Recovery::Retry {
            constraints: current.halved(),
        }
    }

    fn report(&self, phase: WorkflowPhase, attempts: u32, last_error: ErrorKind) -> EscalationReport {
        EscalationReport {
            phase,
            attempts,
            last_error,
            recent_results: self
                .history
                .get(&phase)
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default(),
            created_at: Utc::now(),
        }
    }
}

/// Write an escalation report under the escalations directory and return
/// its path.
pub fn write_report(dir: &Path, report: &EscalationReport) -> Result<PathBuf> {
    fs::create_dir_all(dir).context("Failed to create escalations directory")?;
    let filename = format!(
        "{}_{}.json",
        report.created_at.format("%Y-%m-%dT%H-%M-%S"),
        report.phase
    );
    let path = dir.join(filename);
    let json =
        serde_json::to_string_pretty(report).context("Failed to serialize escalation report")?;
    fs::write(&path, json).context("Failed to write escalation report")?;
    Ok(path)
}
