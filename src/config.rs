use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::governor::Ceilings;
use crate::ledger::CompactionPolicy;
use crate::relay_config::RelayToml;
use crate::workitem::WorkConstraints;

/// Runtime configuration for relay.
///
/// Bridges the parsed `relay.toml` with the runtime needs of the
/// orchestrator: the `.relay/` path layout and the derived ceiling and
/// constraint values handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub relay_dir: PathBuf,
    pub ledger_dir: PathBuf,
    pub log_dir: PathBuf,
    pub escalations_dir: PathBuf,
    pub verbose: bool,
    pub toml: RelayToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, config_file: Option<PathBuf>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let relay_dir = project_dir.join(crate::init::RELAY_DIR);
        let toml = match config_file {
            Some(path) => RelayToml::load(&path)?,
            None => RelayToml::load_or_default(&relay_dir)?,
        };

        Ok(Self {
            ledger_dir: relay_dir.join("ledger"),
            log_dir: relay_dir.join("logs"),
            escalations_dir: relay_dir.join("escalations"),
            relay_dir,
            project_dir,
            verbose,
            toml,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.ledger_dir).context("Failed to create ledger directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.escalations_dir)
            .context("Failed to create escalations directory")?;
        Ok(())
    }

    /// Global ceilings for the resource governor.
    pub fn ceilings(&self) -> Ceilings {
        Ceilings::from(&self.toml.limits)
    }

    /// Default per-item constraints. Identical to the ceilings, so items
    /// always start at the boundary and only ever shrink on retry.
    pub fn default_constraints(&self) -> WorkConstraints {
        WorkConstraints {
            max_files: self.toml.limits.max_files_per_op,
            max_context_bytes: self.toml.limits.max_context_bytes,
            max_iterations: self.toml.limits.max_iterations,
            timeout: std::time::Duration::from_secs(self.toml.limits.op_timeout_seconds),
        }
    }

    pub fn compaction_policy(&self) -> CompactionPolicy {
        CompactionPolicy::from(&self.toml.ledger)
    }
}
