//! Bounded-context construction.
//!
//! Bounding is the dispatcher's responsibility, not the worker's: inputs
//! that would push the package past the granted byte ceiling are dropped
//! whole and listed in the omitted manifest, so the worker can see what it
//! was not shown.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::artifact::ArtifactRef;
use crate::phase::WorkflowPhase;
use crate::workitem::WorkItem;

/// Budget echo included in the context so workers can self-limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub files: u32,
    pub bytes: usize,
    pub iterations: u32,
    pub timeout_seconds: u64,
}

/// One input artifact with its file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInput {
    pub artifact: ArtifactRef,
    pub content: String,
}

/// The package handed to a worker: inputs within the byte ceiling, the
/// refs that did not fit, and the budget the worker runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedContext {
    pub work_item_id: Uuid,
    pub phase: WorkflowPhase,
    pub inputs: Vec<ContextInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omitted: Vec<ArtifactRef>,
    pub budget: ContextBudget,
}

impl BoundedContext {
    pub fn total_bytes(&self) -> usize {
        self.inputs.iter().map(|i| i.content.len()).sum()
    }
}

/// Build the bounded context for a work item, reading each input artifact
/// from the workspace. Artifacts that are missing on disk or would exceed
/// the byte ceiling are omitted, never truncated mid-file.
pub fn build(project_dir: &Path, item: &WorkItem) -> BoundedContext {
    let ceiling = item.constraints.max_context_bytes;
    let mut inputs = Vec::new();
    let mut omitted = Vec::new();
    let mut used = 0usize;

    for artifact_ref in &item.inputs {
        let path = project_dir.join(&artifact_ref.path);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "input artifact unreadable, omitting");
                omitted.push(artifact_ref.clone());
                continue;
            }
        };
        if used + content.len() > ceiling {
            omitted.push(artifact_ref.clone());
            continue;
        }
        used += content.len();
        inputs.push(ContextInput {
            artifact: artifact_ref.clone(),
            content,
        });
    }

    BoundedContext {
        work_item_id: item.id,
        phase: item.phase,
        inputs,
        omitted,
        budget: ContextBudget {
            files: item.constraints.max_files,
            bytes: ceiling,
            iterations: item.constraints.max_iterations,
            timeout_seconds: item.constraints.timeout.as_secs(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::workitem::WorkConstraints;
    use std::fs;
    use tempfile::tempdir;

    fn input_ref(path: &str) -> ArtifactRef {
        ArtifactRef {
            path: path.to_string(),
            kind: ArtifactKind::Goals,
            version: 1,
        }
    }

    #[test]
    fn build_reads_inputs_within_ceiling() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("goals.md"), "ship an auth service").unwrap();

        let item = WorkItem::new(
            WorkflowPhase::Specification,
            vec![input_ref("goals.md")],
            WorkConstraints::default(),
        );
        let ctx = build(dir.path(), &item);

        assert_eq!(ctx.inputs.len(), 1);
        assert_eq!(ctx.inputs[0].content, "ship an auth service");
        assert!(ctx.omitted.is_empty());
        assert_eq!(ctx.total_bytes(), 20);
        assert_eq!(ctx.budget.files, 5);
        assert_eq!(ctx.budget.timeout_seconds, 30);
    }

    #[test]
    fn build_omits_inputs_past_the_byte_ceiling() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "x".repeat(100)).unwrap();
        fs::write(dir.path().join("b.md"), "y".repeat(100)).unwrap();

        let constraints = WorkConstraints {
            max_context_bytes: 150,
            ..Default::default()
        };
        let item = WorkItem::new(
            WorkflowPhase::Specification,
            vec![input_ref("a.md"), input_ref("b.md")],
            constraints,
        );
        let ctx = build(dir.path(), &item);

        // The first input fits; the second would cross the ceiling and is
        // dropped whole rather than truncated.
        assert_eq!(ctx.inputs.len(), 1);
        assert_eq!(ctx.omitted.len(), 1);
        assert_eq!(ctx.omitted[0].path, "b.md");
        assert!(ctx.total_bytes() <= 150);
    }

    #[test]
    fn build_omits_missing_files() {
        let dir = tempdir().unwrap();
        let item = WorkItem::new(
            WorkflowPhase::Specification,
            vec![input_ref("absent.md")],
            WorkConstraints::default(),
        );
        let ctx = build(dir.path(), &item);
        assert!(ctx.inputs.is_empty());
        assert_eq!(ctx.omitted.len(), 1);
    }

    #[test]
    fn build_with_no_inputs_is_empty_but_budgeted() {
        let dir = tempdir().unwrap();
        let item = WorkItem::new(
            WorkflowPhase::Clarification,
            Vec::new(),
            WorkConstraints::default(),
        );
        let ctx = build(dir.path(), &item);
        assert!(ctx.inputs.is_empty());
        assert!(ctx.omitted.is_empty());
        assert_eq!(ctx.budget.iterations, 5);
    }

    #[test]
    fn context_serializes_for_worker_stdin() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("goals.md"), "goal text").unwrap();
        let item = WorkItem::new(
            WorkflowPhase::Specification,
            vec![input_ref("goals.md")],
            WorkConstraints::default(),
        );
        let ctx = build(dir.path(), &item);
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: BoundedContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}
