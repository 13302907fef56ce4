//! Unified configuration for relay, read from `.relay/relay.toml`.
//!
//! # Configuration File Format
//!
//! ```toml
//! [limits]
//! max_files_per_op = 5
//! max_context_bytes = 5120
//! max_iterations = 5
//! op_timeout_seconds = 30
//! max_retries_per_phase = 3
//!
//! [governor]
//! max_concurrent_grants = 2
//! max_queue_depth = 8
//!
//! [ledger]
//! compaction_threshold_bytes = 5000000
//! compaction_record_cap = 50
//!
//! [worker]
//! command = "relay-worker"
//! args = ["--json"]
//!
//! [worker.phases.specification]
//! command = "spec-worker"
//! ```
//!
//! Every section and key is optional; unknown top-level keys are reported
//! with a warning and otherwise ignored, so a config written for a newer
//! version still loads.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-operation resource ceilings and the retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_files_per_op")]
    pub max_files_per_op: u32,
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_op_timeout_seconds")]
    pub op_timeout_seconds: u64,
    #[serde(default = "default_max_retries_per_phase")]
    pub max_retries_per_phase: u32,
}

fn default_max_files_per_op() -> u32 {
    5
}

fn default_max_context_bytes() -> usize {
    5120
}

fn default_max_iterations() -> u32 {
    5
}

fn default_op_timeout_seconds() -> u64 {
    30
}

fn default_max_retries_per_phase() -> u32 {
    3
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files_per_op: default_max_files_per_op(),
            max_context_bytes: default_max_context_bytes(),
            max_iterations: default_max_iterations(),
            op_timeout_seconds: default_op_timeout_seconds(),
            max_retries_per_phase: default_max_retries_per_phase(),
        }
    }
}

/// Concurrency ceiling for outstanding grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_max_concurrent_grants")]
    pub max_concurrent_grants: usize,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
}

fn default_max_concurrent_grants() -> usize {
    2
}

fn default_max_queue_depth() -> usize {
    8
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_grants: default_max_concurrent_grants(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

/// Append-log compaction thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_compaction_threshold_bytes")]
    pub compaction_threshold_bytes: u64,
    #[serde(default = "default_compaction_record_cap")]
    pub compaction_record_cap: u64,
}

fn default_compaction_threshold_bytes() -> u64 {
    5_000_000
}

fn default_compaction_record_cap() -> u64 {
    50
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            compaction_threshold_bytes: default_compaction_threshold_bytes(),
            compaction_record_cap: default_compaction_record_cap(),
        }
    }
}

/// Per-phase worker command override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseWorkerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// Worker command configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Default command for every phase. No command, no registered worker.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides keyed by phase name (e.g. `specification`).
    #[serde(default)]
    pub phases: HashMap<String, PhaseWorkerConfig>,
}

impl WorkerConfig {
    /// Resolve the command and args for a phase, preferring the per-phase
    /// override over the default.
    pub fn resolve(&self, phase: &str) -> Option<(String, Vec<String>)> {
        if let Some(override_cfg) = self.phases.get(phase) {
            let command = override_cfg.command.clone().or_else(|| self.command.clone())?;
            let args = override_cfg
                .args
                .clone()
                .unwrap_or_else(|| self.args.clone());
            return Some((command, args));
        }
        self.command
            .clone()
            .map(|command| (command, self.args.clone()))
    }
}

/// The parsed `relay.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayToml {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl RelayToml {
    const KNOWN_SECTIONS: &'static [&'static str] = &["limits", "governor", "ledger", "worker"];

    /// Load from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load `relay.toml` from the relay directory, falling back to defaults
    /// when the file does not exist.
    pub fn load_or_default(relay_dir: &Path) -> Result<Self> {
        let path = relay_dir.join("relay.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = content.parse().context("Invalid TOML")?;
        for key in table.keys() {
            if !Self::KNOWN_SECTIONS.contains(&key.as_str()) {
                warn!(section = %key, "unrecognized config section, ignoring");
            }
        }
        let config: RelayToml = table.try_into().context("Invalid config values")?;
        Ok(config)
    }

    /// Starter config written by `relay init`.
    pub fn default_file_contents() -> &'static str {
        r#"# relay configuration

[limits]
max_files_per_op = 5
max_context_bytes = 5120
max_iterations = 5
op_timeout_seconds = 30
max_retries_per_phase = 3

[governor]
max_concurrent_grants = 2
max_queue_depth = 8

[ledger]
compaction_threshold_bytes = 5000000
compaction_record_cap = 50

# Configure the worker command before running:
# [worker]
# command = "relay-worker"
# args = ["--json"]
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = RelayToml::default();
        assert_eq!(config.limits.max_files_per_op, 5);
        assert_eq!(config.limits.max_context_bytes, 5120);
        assert_eq!(config.limits.max_iterations, 5);
        assert_eq!(config.limits.op_timeout_seconds, 30);
        assert_eq!(config.limits.max_retries_per_phase, 3);
        assert_eq!(config.governor.max_concurrent_grants, 2);
        assert_eq!(config.ledger.compaction_threshold_bytes, 5_000_000);
        assert_eq!(config.ledger.compaction_record_cap, 50);
        assert!(config.worker.command.is_none());
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config = RelayToml::from_toml_str(
            r#"
[limits]
max_files_per_op = 2
"#,
        )
        .unwrap();
        assert_eq!(config.limits.max_files_per_op, 2);
        assert_eq!(config.limits.max_iterations, 5);
        assert_eq!(config.governor.max_queue_depth, 8);
    }

    #[test]
    fn unknown_sections_are_ignored_not_fatal() {
        let config = RelayToml::from_toml_str(
            r#"
[limits]
max_iterations = 4

[telemetry]
endpoint = "http://localhost:4317"
"#,
        )
        .unwrap();
        assert_eq!(config.limits.max_iterations, 4);
    }

    #[test]
    fn invalid_values_fail_with_context() {
        let result = RelayToml::from_toml_str(
            r#"
[limits]
max_files_per_op = "many"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_or_default_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = RelayToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, RelayToml::default());
    }

    #[test]
    fn load_or_default_reads_existing_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("relay.toml"),
            "[governor]\nmax_concurrent_grants = 1\n",
        )
        .unwrap();
        let config = RelayToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.governor.max_concurrent_grants, 1);
    }

    #[test]
    fn worker_resolve_prefers_phase_override() {
        let config: WorkerConfig = toml::from_str(
            r#"
command = "default-worker"
args = ["--a"]

[phases.verification]
command = "verify-worker"
args = ["--strict"]

[phases.documentation]
args = ["--docs"]
"#,
        )
        .unwrap();

        assert_eq!(
            config.resolve("implementation"),
            Some(("default-worker".to_string(), vec!["--a".to_string()]))
        );
        assert_eq!(
            config.resolve("verification"),
            Some(("verify-worker".to_string(), vec!["--strict".to_string()]))
        );
        // Override without a command falls back to the default command.
        assert_eq!(
            config.resolve("documentation"),
            Some(("default-worker".to_string(), vec!["--docs".to_string()]))
        );
    }

    #[test]
    fn worker_resolve_none_without_any_command() {
        let config = WorkerConfig::default();
        assert_eq!(config.resolve("specification"), None);
    }

    #[test]
    fn default_file_contents_parse_cleanly() {
        let config = RelayToml::from_toml_str(RelayToml::default_file_contents()).unwrap();
        assert_eq!(config, RelayToml::default());
    }
}
