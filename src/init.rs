//! Initialization for relay projects.
//!
//! `relay init` creates the `.relay/` directory structure:
//!
//! ```text
//! .relay/
//! ├── relay.toml     # Configuration (limits, governor, ledger, worker)
//! ├── ledger/        # Append log + compacted snapshot
//! ├── logs/          # Per-item context and output logs
//! └── escalations/   # Structured escalation reports
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::relay_config::RelayToml;

/// The name of the relay state directory.
pub const RELAY_DIR: &str = ".relay";

/// Result of initializing a relay project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the created .relay directory
    pub relay_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a relay project in the given directory. Idempotent: an
/// existing structure is verified and completed, never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let relay_dir = project_dir.join(RELAY_DIR);
    let created = !relay_dir.exists();

    for sub in ["ledger", "logs", "escalations"] {
        let path = relay_dir.join(sub);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }

    let config_file = relay_dir.join("relay.toml");
    if !config_file.exists() {
        std::fs::write(&config_file, RelayToml::default_file_contents())
            .with_context(|| format!("Failed to create relay.toml: {}", config_file.display()))?;
    }

    Ok(InitResult { relay_dir, created })
}

/// Check whether a project has been initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(RELAY_DIR).is_dir()
}

/// Path to the relay directory for a project.
pub fn get_relay_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(RELAY_DIR)
}
