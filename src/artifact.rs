//! Artifact data model: the versioned, typed outputs tracked by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::WorkflowPhase;

/// The kind of a workflow artifact.
///
/// Kinds gate phase readiness: a phase activates only when every
/// prerequisite kind has at least one registered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Goals,
    Spec,
    Pseudocode,
    Architecture,
    Test,
    Code,
    Doc,
}

impl ArtifactKind {
    pub fn all() -> &'static [ArtifactKind] {
        &[
            ArtifactKind::Goals,
            ArtifactKind::Spec,
            ArtifactKind::Pseudocode,
            ArtifactKind::Architecture,
            ArtifactKind::Test,
            ArtifactKind::Code,
            ArtifactKind::Doc,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Goals => "goals",
            ArtifactKind::Spec => "spec",
            ArtifactKind::Pseudocode => "pseudocode",
            ArtifactKind::Architecture => "architecture",
            ArtifactKind::Test => "test",
            ArtifactKind::Code => "code",
            ArtifactKind::Doc => "doc",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "goals" => Ok(ArtifactKind::Goals),
            "spec" => Ok(ArtifactKind::Spec),
            "pseudocode" => Ok(ArtifactKind::Pseudocode),
            "architecture" => Ok(ArtifactKind::Architecture),
            "test" => Ok(ArtifactKind::Test),
            "code" => Ok(ArtifactKind::Code),
            "doc" => Ok(ArtifactKind::Doc),
            _ => anyhow::bail!(
                "Invalid artifact kind '{}'. Valid values: goals, spec, pseudocode, architecture, test, code, doc",
                s
            ),
        }
    }
}

/// A registered workflow artifact. Immutable once registered; corrections
/// register a new version for the same path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Workspace-relative path of the artifact file.
    pub path: String,
    pub kind: ArtifactKind,
    /// Monotonically increasing per path, starting at 1.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub producer_phase: WorkflowPhase,
}

impl Artifact {
    pub fn new(
        path: &str,
        kind: ArtifactKind,
        version: u32,
        producer_phase: WorkflowPhase,
    ) -> Self {
        Self {
            path: path.to_string(),
            kind,
            version,
            created_at: Utc::now(),
            producer_phase,
        }
    }

    /// The `(path, version)` identity under the uniqueness invariant.
    pub fn key(&self) -> (&str, u32) {
        (&self.path, self.version)
    }
}

/// Lightweight reference to an artifact, used in work-item inputs and
/// ledger records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    pub kind: ArtifactKind,
    pub version: u32,
}

impl From<&Artifact> for ArtifactRef {
    fn from(a: &Artifact) -> Self {
        Self {
            path: a.path.clone(),
            kind: a.kind,
            version: a.version,
        }
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{} ({})", self.path, self.version, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ArtifactKind::all() {
            let parsed: ArtifactKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn kind_parse_rejects_unknown() {
        let result = "binary".parse::<ArtifactKind>();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid artifact kind"));
    }

    #[test]
    fn kind_serde_uses_lowercase() {
        let json = serde_json::to_string(&ArtifactKind::Pseudocode).unwrap();
        assert_eq!(json, "\"pseudocode\"");
    }

    #[test]
    fn artifact_ref_from_artifact_preserves_identity() {
        let artifact = Artifact::new("spec/auth.md", ArtifactKind::Spec, 3, WorkflowPhase::Specification);
        let r = ArtifactRef::from(&artifact);
        assert_eq!(r.path, "spec/auth.md");
        assert_eq!(r.version, 3);
        assert_eq!(r.kind, ArtifactKind::Spec);
        assert_eq!(artifact.key(), ("spec/auth.md", 3));
    }

    #[test]
    fn artifact_serde_round_trip() {
        let artifact = Artifact::new("code/main.rs", ArtifactKind::Code, 1, WorkflowPhase::Implementation);
        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(artifact, parsed);
    }
}
