//! Work items: bounded units of delegated work, and the results that come
//! back from dispatch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{Artifact, ArtifactKind, ArtifactRef};
use crate::errors::ErrorKind;
use crate::phase::WorkflowPhase;

/// Per-item resource ceilings. Always sub-ceilings of the governor's global
/// ceilings; never relaxed for an individual call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkConstraints {
    pub max_files: u32,
    pub max_context_bytes: usize,
    pub max_iterations: u32,
    pub timeout: Duration,
}

impl Default for WorkConstraints {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_context_bytes: 5120,
            max_iterations: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

impl WorkConstraints {
    /// Scope reduction for retries: half the file ceiling, floor of 1.
    /// All other ceilings are carried unchanged.
    pub fn halved(&self) -> Self {
        Self {
            max_files: (self.max_files / 2).max(1),
            ..self.clone()
        }
    }
}

/// What a successful work item must have produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionCriteria {
    pub kind: ArtifactKind,
    pub min_count: u32,
}

impl CompletionCriteria {
    /// The default criteria for a phase: at least one artifact of the kind
    /// the phase produces.
    pub fn for_phase(phase: WorkflowPhase) -> Self {
        Self {
            kind: phase.produces(),
            min_count: 1,
        }
    }

    pub fn satisfied_by(&self, artifacts: &[Artifact]) -> bool {
        let count = artifacts.iter().filter(|a| a.kind == self.kind).count();
        count as u32 >= self.min_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// A bounded unit of delegated work, scoped to one phase.
///
/// Owned by the phase state machine: created on activation, discarded after
/// its result is folded into the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub phase: WorkflowPhase,
    pub inputs: Vec<ArtifactRef>,
    pub constraints: WorkConstraints,
    pub criteria: CompletionCriteria,
    pub status: WorkItemStatus,
}

impl WorkItem {
    pub fn new(phase: WorkflowPhase, inputs: Vec<ArtifactRef>, constraints: WorkConstraints) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase,
            inputs,
            constraints,
            criteria: CompletionCriteria::for_phase(phase),
            status: WorkItemStatus::Pending,
        }
    }
}

/// Resources actually consumed by a dispatched work item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub files_touched: u32,
    pub context_bytes: usize,
    pub iterations: u32,
    pub duration_secs: f64,
}

impl ResourceUsage {
    /// Check the reported usage against the item's constraints. Duration is
    /// allowed a small grace margin since cancellation happens at the
    /// dispatcher boundary, just after the deadline fires.
    pub fn within(&self, constraints: &WorkConstraints) -> bool {
        self.files_touched <= constraints.max_files
            && self.context_bytes <= constraints.max_context_bytes
            && self.iterations <= constraints.max_iterations
            && self.duration_secs <= constraints.timeout.as_secs_f64() + 1.0
    }
}

/// The outcome of dispatching one work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationResult {
    pub work_item_id: Uuid,
    pub phase: WorkflowPhase,
    pub success: bool,
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub usage: ResourceUsage,
    pub finished_at: DateTime<Utc>,
}

impl DelegationResult {
    pub fn success(item: &WorkItem, artifacts: Vec<Artifact>, usage: ResourceUsage) -> Self {
        Self {
            work_item_id: item.id,
            phase: item.phase,
            success: true,
            artifacts,
            error: None,
            usage,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(item: &WorkItem, error: ErrorKind, usage: ResourceUsage) -> Self {
        Self {
            work_item_id: item.id,
            phase: item.phase,
            success: false,
            artifacts: Vec::new(),
            error: Some(error),
            usage,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halved_floors_at_one_file() {
        let constraints = WorkConstraints {
            max_files: 5,
            ..Default::default()
        };
        let once = constraints.halved();
        assert_eq!(once.max_files, 2);
        let twice = once.halved();
        assert_eq!(twice.max_files, 1);
        let thrice = twice.halved();
        assert_eq!(thrice.max_files, 1);
        // Other ceilings are untouched
        assert_eq!(thrice.max_iterations, constraints.max_iterations);
        assert_eq!(thrice.timeout, constraints.timeout);
    }

    #[test]
    fn criteria_for_phase_requires_produced_kind() {
        let criteria = CompletionCriteria::for_phase(WorkflowPhase::Specification);
        assert_eq!(criteria.kind, ArtifactKind::Spec);
        assert_eq!(criteria.min_count, 1);
    }

    #[test]
    fn criteria_satisfied_counts_matching_kind_only() {
        let criteria = CompletionCriteria::for_phase(WorkflowPhase::Specification);
        let wrong_kind = vec![Artifact::new(
            "notes.md",
            ArtifactKind::Doc,
            1,
            WorkflowPhase::Specification,
        )];
        assert!(!criteria.satisfied_by(&wrong_kind));

        let right_kind = vec![Artifact::new(
            "spec/core.md",
            ArtifactKind::Spec,
            1,
            WorkflowPhase::Specification,
        )];
        assert!(criteria.satisfied_by(&right_kind));
    }

    #[test]
    fn usage_within_checks_every_dimension() {
        let constraints = WorkConstraints::default();
        let ok = ResourceUsage {
            files_touched: 5,
            context_bytes: 5120,
            iterations: 5,
            duration_secs: 29.0,
        };
        assert!(ok.within(&constraints));

        let too_many_files = ResourceUsage {
            files_touched: 6,
            ..ok.clone()
        };
        assert!(!too_many_files.within(&constraints));

        let too_many_bytes = ResourceUsage {
            context_bytes: 5121,
            ..ok.clone()
        };
        assert!(!too_many_bytes.within(&constraints));

        let too_many_iterations = ResourceUsage {
            iterations: 6,
            ..ok.clone()
        };
        assert!(!too_many_iterations.within(&constraints));
    }

    #[test]
    fn result_constructors_set_success_flag_and_error() {
        let item = WorkItem::new(
            WorkflowPhase::Clarification,
            Vec::new(),
            WorkConstraints::default(),
        );
        let ok = DelegationResult::success(&item, Vec::new(), ResourceUsage::default());
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.work_item_id, item.id);

        let failed = DelegationResult::failure(&item, ErrorKind::Timeout, ResourceUsage::default());
        assert!(!failed.success);
        assert_eq!(failed.error, Some(ErrorKind::Timeout));
        assert!(failed.artifacts.is_empty());
    }
}
