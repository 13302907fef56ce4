//! State ledger: the append-only, file-based source of truth for workflow
//! state.
//!
//! This module holds the record and snapshot types; `store` implements the
//! checksummed append log and `compaction` the snapshot rewrite policy.
//! No component reads or writes ledger files except through the `Ledger`
//! API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactKind, ArtifactRef};
use crate::phase::WorkflowPhase;

pub mod compaction;
pub mod store;

pub use compaction::CompactionPolicy;
pub use store::Ledger;

/// A phase transition or artifact registration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEvent {
    Started,
    Completed,
    Failed,
    Reset,
    ArtifactRegistered,
}

/// One checksummed record in the append log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub seq: u64,
    pub phase: WorkflowPhase,
    pub event: PhaseEvent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_refs: Vec<ArtifactRef>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Active => "active",
            PhaseStatus::Complete => "complete",
            PhaseStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Per-phase progress derived from the append log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: WorkflowPhase,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub artifacts_produced: u32,
}

impl PhaseRecord {
    fn pending(phase: WorkflowPhase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            artifacts_produced: 0,
        }
    }
}

/// Materialized current state: phase cursor plus the artifact registry.
///
/// Built by replaying the append log on top of the latest compacted
/// snapshot; replay is idempotent (records at or below `last_seq` are
/// skipped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub phase_cursor: usize,
    pub phases: Vec<PhaseRecord>,
    /// Registry keyed by path; versions appear in strictly increasing order.
    pub artifacts: BTreeMap<String, Vec<Artifact>>,
    pub last_seq: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            phase_cursor: 0,
            phases: WorkflowPhase::all()
                .iter()
                .map(|p| PhaseRecord::pending(*p))
                .collect(),
            artifacts: BTreeMap::new(),
            last_seq: 0,
        }
    }

    /// Apply one record. Records at or below `last_seq` are no-ops, which
    /// makes replay over an already-compacted snapshot safe.
    pub fn apply(&mut self, record: &LedgerRecord) {
        if record.seq <= self.last_seq {
            return;
        }
        self.last_seq = record.seq;

        let idx = record.phase.index();
        match record.event {
            PhaseEvent::Started => {
                self.phases[idx].status = PhaseStatus::Active;
                self.phases[idx].started_at = Some(record.timestamp);
            }
            PhaseEvent::Completed => {
                self.phases[idx].status = PhaseStatus::Complete;
                self.phases[idx].completed_at = Some(record.timestamp);
                if idx == self.phase_cursor {
                    self.phase_cursor = idx + 1;
                }
            }
            PhaseEvent::Failed => {
                self.phases[idx].status = PhaseStatus::Failed;
            }
            PhaseEvent::Reset => {
                for j in idx..self.phases.len() {
                    self.phases[j] = PhaseRecord::pending(self.phases[j].phase);
                }
                self.phase_cursor = self.phase_cursor.min(idx);
            }
            PhaseEvent::ArtifactRegistered => {
                for r in &record.artifact_refs {
                    let versions = self.artifacts.entry(r.path.clone()).or_default();
                    let current = versions.last().map(|a| a.version).unwrap_or(0);
                    if r.version > current {
                        versions.push(Artifact {
                            path: r.path.clone(),
                            kind: r.kind,
                            version: r.version,
                            created_at: record.timestamp,
                            producer_phase: record.phase,
                        });
                        self.phases[idx].artifacts_produced += 1;
                    }
                }
            }
        }
    }

    /// The phase the cursor points at, `None` once all phases are complete.
    pub fn cursor_phase(&self) -> Option<WorkflowPhase> {
        WorkflowPhase::at(self.phase_cursor)
    }

    pub fn is_all_complete(&self) -> bool {
        self.phase_cursor >= self.phases.len()
    }

    pub fn phase_record(&self, phase: WorkflowPhase) -> &PhaseRecord {
        &self.phases[phase.index()]
    }

    /// Whether at least one artifact of the kind is registered.
    pub fn has_kind(&self, kind: ArtifactKind) -> bool {
        self.artifacts
            .values()
            .any(|versions| versions.iter().any(|a| a.kind == kind))
    }

    /// Latest version of every path with the given kind, in path order.
    pub fn latest_of_kind(&self, kind: ArtifactKind) -> Vec<ArtifactRef> {
        self.artifacts
            .values()
            .filter_map(|versions| versions.last())
            .filter(|a| a.kind == kind)
            .map(ArtifactRef::from)
            .collect()
    }

    /// Highest registered version for a path, if any.
    pub fn max_version(&self, path: &str) -> Option<u32> {
        self.artifacts
            .get(path)
            .and_then(|versions| versions.last())
            .map(|a| a.version)
    }

    /// The version a fresh registration for this path should carry.
    pub fn next_version(&self, path: &str) -> u32 {
        self.max_version(path).unwrap_or(0) + 1
    }

    /// Total number of registered artifact versions.
    pub fn artifact_count(&self) -> usize {
        self.artifacts.values().map(|v| v.len()).sum()
    }
}
