//! The phase state machine.
//!
//! Phases run strictly in the fixed workflow order. Each tick reads the
//! ledger snapshot, checks prerequisites, constructs bounded work items,
//! dispatches them sequentially, and folds the outcome back into the
//! ledger. The ledger is the sole source of truth: the machine holds no
//! phase state of its own between ticks, so a restart resumes exactly
//! where the log says it should.

use std::sync::Arc;

use tracing::{debug, info};

use crate::artifact::ArtifactRef;
use crate::dispatch::Dispatcher;
use crate::errors::{ErrorKind, MachineError};
use crate::ledger::{Ledger, PhaseStatus};
use crate::phase::WorkflowPhase;
use crate::recovery::{Recovery, RecoveryController, write_report};
use crate::ui::OrchestratorUI;
use crate::workitem::{WorkConstraints, WorkItem};

/// Structural cap on work-item fan-out within one phase. Not configurable:
/// unbounded fan-out is exactly what the machine exists to prevent.
pub const MAX_WORK_ITEMS: usize = 4;

/// What a run should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    /// Run phases from the cursor until the workflow completes.
    All,
    /// Run a single phase. It must be the cursor phase; the linear order
    /// admits no skipping.
    Single(WorkflowPhase),
}

/// Successful run outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase in the target range completed.
    Completed,
    /// The workflow was already past the requested phase; nothing ran.
    AlreadyComplete(WorkflowPhase),
    /// The whole workflow is complete; ticks are no-ops.
    AllComplete,
}

pub struct PhaseStateMachine {
    ledger: Arc<Ledger>,
    dispatcher: Dispatcher,
    recovery: RecoveryController,
    base_constraints: WorkConstraints,
    escalations_dir: std::path::PathBuf,
    ui: Option<Arc<OrchestratorUI>>,
}

impl PhaseStateMachine {
    pub fn new(
        ledger: Arc<Ledger>,
        dispatcher: Dispatcher,
        recovery: RecoveryController,
        base_constraints: WorkConstraints,
        escalations_dir: &std::path::Path,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            recovery,
            base_constraints,
            escalations_dir: escalations_dir.to_path_buf(),
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<OrchestratorUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Drive the machine until the target is met or a failure surfaces.
    /// Only `Escalate` and `Abort` ever leave this function as errors;
    /// work-item failures are contained inside the recovery loop.
    pub async fn run(&mut self, target: RunTarget) -> Result<RunOutcome, MachineError> {
        loop {
            let snapshot = self.ledger.current_snapshot();
            let Some(cursor) = snapshot.cursor_phase() else {
                // Terminal state: further ticks are no-ops.
                return Ok(RunOutcome::AllComplete);
            };

            match target {
                RunTarget::Single(requested) => {
                    if snapshot.phase_record(requested).status == PhaseStatus::Complete {
                        return Ok(RunOutcome::AlreadyComplete(requested));
                    }
                    if requested != cursor {
                        // Activating ahead of the cursor would run with
                        // unmet upstream phases; surface that directly.
                        return self.escalate_missing_prerequisite(requested);
                    }
                    self.run_phase(cursor).await?;
                    return Ok(RunOutcome::Completed);
                }
                RunTarget::All => {
                    self.run_phase(cursor).await?;
                    if self.ledger.current_snapshot().is_all_complete() {
                        return Ok(RunOutcome::Completed);
                    }
                }
            }
        }
    }

    /// Execute one phase through activation, dispatch, and completion.
    async fn run_phase(&mut self, phase: WorkflowPhase) -> Result<(), MachineError> {
        let snapshot = self.ledger.current_snapshot();

        // Fail fast before touching the ledger: a phase whose prerequisite
        // kinds never materialized must not activate with empty inputs.
        let missing: Vec<_> = phase
            .prerequisites()
            .iter()
            .filter(|kind| !snapshot.has_kind(**kind))
            .collect();
        if !missing.is_empty() {
            debug!(%phase, ?missing, "prerequisite artifact kinds absent");
            return self.escalate_missing_prerequisite(phase);
        }

        if let Some(ref ui) = self.ui {
            ui.start_phase(phase.as_str(), phase.display_name());
        }
        info!(%phase, "phase active");
        self.ledger
            .phase_started(phase)
            .map_err(|e| self.abort_on_ledger(e))?;

        let inputs = gather_inputs(&snapshot, phase);
        let mut constraints = self.base_constraints.clone();

        loop {
            let items = build_work_items(phase, &inputs, &constraints);
            let attempt = self.recovery.attempts(phase);
            let mut failure: Option<ErrorKind> = None;

            for (index, item) in items.iter().enumerate() {
                if let Some(ref ui) = self.ui {
                    ui.start_item(index, items.len(), attempt);
                }
                let result = self.dispatcher.dispatch(item).await;
                self.recovery.record(&result);

                if result.success {
                    if let Some(ref ui) = self.ui {
                        ui.item_done(index, result.artifacts.len());
                    }
                } else {
                    let kind = result.error.unwrap_or(ErrorKind::WorkerFailed);
                    if let Some(ref ui) = self.ui {
                        ui.item_failed(index, kind.as_str());
                    }
                    failure = Some(kind);
                    // Remaining items are not dispatched; the phase scope
                    // is re-derived by the recovery decision.
                    break;
                }
            }

            let Some(kind) = failure else {
                self.ledger
                    .phase_completed(phase)
                    .map_err(|e| self.abort_on_ledger(e))?;
                if let Some(ref ui) = self.ui {
                    ui.phase_complete(phase.as_str());
                }
                info!(%phase, "phase complete");
                return Ok(());
            };

            match self.recovery.recover(phase, kind, &constraints) {
                Recovery::Retry {
                    constraints: reduced,
                } => {
                    info!(%phase, max_files = reduced.max_files, "retrying with reduced scope");
                    constraints = reduced;
                }
                Recovery::Escalate(report) => {
                    self.ledger
                        .phase_failed(phase)
                        .map_err(|e| self.abort_on_ledger(e))?;
                    if let Some(ref ui) = self.ui {
                        ui.phase_failed(phase.as_str(), kind.as_str());
                    }
                    let attempts = report.attempts;
                    if let Ok(path) = write_report(&self.escalations_dir, &report) {
                        info!(report = %path.display(), "escalation report written");
                    }
                    return Err(MachineError::Escalated {
                        phase: phase.to_string(),
                        attempts,
                        last_error: kind,
                        report,
                    });
                }
                Recovery::Abort { kind, detail } => {
                    // Best-effort failure mark; the ledger may itself be
                    // the component that failed.
                    let _ = self.ledger.phase_failed(phase);
                    return Err(MachineError::Aborted { kind, detail });
                }
            }
        }
    }

    /// `MissingPrerequisite` escalates immediately and leaves the ledger
    /// untouched, so a failed readiness check is inspectable but free of
    /// side effects.
    fn escalate_missing_prerequisite<T>(
        &mut self,
        phase: WorkflowPhase,
    ) -> Result<T, MachineError> {
        let decision = self.recovery.recover(
            phase,
            ErrorKind::MissingPrerequisite,
            &self.base_constraints,
        );
        match decision {
            Recovery::Escalate(report) => {
                if let Some(ref ui) = self.ui {
                    ui.phase_failed(phase.as_str(), ErrorKind::MissingPrerequisite.as_str());
                }
                let attempts = report.attempts;
                if let Ok(path) = write_report(&self.escalations_dir, &report) {
                    info!(report = %path.display(), "escalation report written");
                }
                Err(MachineError::Escalated {
                    phase: phase.to_string(),
                    attempts,
                    last_error: ErrorKind::MissingPrerequisite,
                    report,
                })
            }
            _ => unreachable!("missing prerequisite always escalates"),
        }
    }

    fn abort_on_ledger(&self, e: crate::errors::LedgerError) -> MachineError {
        MachineError::Aborted {
            kind: e.kind(),
            detail: e.to_string(),
        }
    }
}

/// Latest version of every prerequisite-kind artifact, in stable order.
fn gather_inputs(snapshot: &crate::ledger::Snapshot, phase: WorkflowPhase) -> Vec<ArtifactRef> {
    phase
        .prerequisites()
        .iter()
        .flat_map(|kind| snapshot.latest_of_kind(*kind))
        .collect()
}

/// Chunk the inputs into 1..=MAX_WORK_ITEMS bounded items of at most
/// `max_files` inputs each. Inputs beyond the structural cap are dropped
/// from this activation; a retry at reduced scope narrows further.
fn build_work_items(
    phase: WorkflowPhase,
    inputs: &[ArtifactRef],
    constraints: &WorkConstraints,
) -> Vec<WorkItem> {
    if inputs.is_empty() {
        return vec![WorkItem::new(phase, Vec::new(), constraints.clone())];
    }

    inputs
        .chunks(constraints.max_files.max(1) as usize)
        .take(MAX_WORK_ITEMS)
        .map(|chunk| WorkItem::new(phase, chunk.to_vec(), constraints.clone()))
        .collect()
}
