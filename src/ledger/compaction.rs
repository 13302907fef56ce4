//! Compaction policy for the append log.
//!
//! When the log grows past a byte or record ceiling, the materialized
//! snapshot is rewritten atomically (temp file + rename) and the log is
//! truncated. The snapshot carries the full artifact registry, so
//! compaction can never drop an artifact the phase cursor depends on.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::Snapshot;
use crate::errors::LedgerError;
use crate::relay_config::LedgerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    pub threshold_bytes: u64,
    pub record_cap: u64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            threshold_bytes: 5_000_000,
            record_cap: 50,
        }
    }
}

impl From<&LedgerConfig> for CompactionPolicy {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            threshold_bytes: config.compaction_threshold_bytes,
            record_cap: config.compaction_record_cap,
        }
    }
}

impl CompactionPolicy {
    /// Compact once the log exceeds either ceiling.
    pub fn should_compact(&self, log_bytes: u64, artifact_records: u64) -> bool {
        log_bytes > self.threshold_bytes || artifact_records > self.record_cap
    }
}

/// Write the snapshot next to its final path and rename into place, so a
/// crash mid-write leaves the previous snapshot intact.
pub fn write_snapshot_atomic(path: &Path, snapshot: &Snapshot) -> Result<(), LedgerError> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(&tmp, json).map_err(|source| LedgerError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(last_seq = snapshot.last_seq, "snapshot written");
    Ok(())
}
