//! The fixed, linear delivery workflow.
//!
//! Eight phases run strictly in order; each declares the artifact kinds it
//! consumes and the single kind it produces. The transition table is
//! structural; no configuration can reorder or skip phases.

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;

/// One stage of the delivery workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowPhase {
    Clarification,
    Specification,
    Algorithm,
    Architecture,
    TestGeneration,
    Implementation,
    Verification,
    Documentation,
}

impl WorkflowPhase {
    /// All phases in execution order.
    pub fn all() -> &'static [WorkflowPhase] {
        &[
            WorkflowPhase::Clarification,
            WorkflowPhase::Specification,
            WorkflowPhase::Algorithm,
            WorkflowPhase::Architecture,
            WorkflowPhase::TestGeneration,
            WorkflowPhase::Implementation,
            WorkflowPhase::Verification,
            WorkflowPhase::Documentation,
        ]
    }

    /// Zero-based position in the workflow order.
    pub fn index(&self) -> usize {
        WorkflowPhase::all()
            .iter()
            .position(|p| p == self)
            .expect("phase is always present in the fixed table")
    }

    /// Phase at a cursor position, `None` once the cursor is past the end.
    pub fn at(index: usize) -> Option<WorkflowPhase> {
        WorkflowPhase::all().get(index).copied()
    }

    /// The phase that follows this one, `None` for the last.
    pub fn next(&self) -> Option<WorkflowPhase> {
        WorkflowPhase::at(self.index() + 1)
    }

    /// Artifact kinds that must exist in the registry before this phase
    /// may activate.
    pub fn prerequisites(&self) -> &'static [ArtifactKind] {
        match self {
            WorkflowPhase::Clarification => &[],
            WorkflowPhase::Specification => &[ArtifactKind::Goals],
            WorkflowPhase::Algorithm => &[ArtifactKind::Spec],
            WorkflowPhase::Architecture => &[ArtifactKind::Spec, ArtifactKind::Pseudocode],
            WorkflowPhase::TestGeneration => &[ArtifactKind::Spec, ArtifactKind::Architecture],
            WorkflowPhase::Implementation => &[ArtifactKind::Architecture, ArtifactKind::Test],
            WorkflowPhase::Verification => &[ArtifactKind::Code, ArtifactKind::Test],
            WorkflowPhase::Documentation => &[ArtifactKind::Code],
        }
    }

    /// The artifact kind this phase is expected to produce. Completion
    /// criteria require at least one registered artifact of this kind.
    pub fn produces(&self) -> ArtifactKind {
        match self {
            WorkflowPhase::Clarification => ArtifactKind::Goals,
            WorkflowPhase::Specification => ArtifactKind::Spec,
            WorkflowPhase::Algorithm => ArtifactKind::Pseudocode,
            WorkflowPhase::Architecture => ArtifactKind::Architecture,
            WorkflowPhase::TestGeneration => ArtifactKind::Test,
            WorkflowPhase::Implementation => ArtifactKind::Code,
            WorkflowPhase::Verification => ArtifactKind::Doc,
            WorkflowPhase::Documentation => ArtifactKind::Doc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Clarification => "clarification",
            WorkflowPhase::Specification => "specification",
            WorkflowPhase::Algorithm => "algorithm",
            WorkflowPhase::Architecture => "architecture",
            WorkflowPhase::TestGeneration => "test-generation",
            WorkflowPhase::Implementation => "implementation",
            WorkflowPhase::Verification => "verification",
            WorkflowPhase::Documentation => "documentation",
        }
    }

    /// Human-readable name shown in the status and list views.
    pub fn display_name(&self) -> &'static str {
        match self {
            WorkflowPhase::Clarification => "Requirements clarification",
            WorkflowPhase::Specification => "Specification",
            WorkflowPhase::Algorithm => "Algorithm design",
            WorkflowPhase::Architecture => "Architecture",
            WorkflowPhase::TestGeneration => "Test generation",
            WorkflowPhase::Implementation => "Implementation",
            WorkflowPhase::Verification => "Verification",
            WorkflowPhase::Documentation => "Documentation and maintenance",
        }
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkflowPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clarification" => Ok(WorkflowPhase::Clarification),
            "specification" | "spec" => Ok(WorkflowPhase::Specification),
            "algorithm" | "pseudocode" => Ok(WorkflowPhase::Algorithm),
            "architecture" => Ok(WorkflowPhase::Architecture),
            "test-generation" | "testgen" | "tests" => Ok(WorkflowPhase::TestGeneration),
            "implementation" | "impl" => Ok(WorkflowPhase::Implementation),
            "verification" | "verify" => Ok(WorkflowPhase::Verification),
            "documentation" | "docs" => Ok(WorkflowPhase::Documentation),
            _ => anyhow::bail!(
                "Unknown phase '{}'. Valid phases: {}",
                s,
                WorkflowPhase::all()
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}
