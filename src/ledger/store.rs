//! The append-only ledger store.
//!
//! Records are newline-delimited, each line `<json>|<sha256-of-json>`. A
//! crash mid-write leaves a torn tail that recovery truncates back to the
//! last well-formed record. The log file is held under an exclusive
//! advisory lock for the lifetime of the handle; in-process access is
//! serialized through a mutex, so appends are totally ordered.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::compaction::{CompactionPolicy, write_snapshot_atomic};
use super::{LedgerRecord, PhaseEvent, Snapshot};
use crate::artifact::Artifact;
use crate::errors::LedgerError;
use crate::phase::WorkflowPhase;

const LOG_FILE: &str = "ledger.log";
const SNAPSHOT_FILE: &str = "snapshot.json";

struct Inner {
    file: File,
    snapshot: Snapshot,
    log_bytes: u64,
    artifact_records: u64,
}

/// Single-writer handle to the ledger directory.
pub struct Ledger {
    log_path: PathBuf,
    snapshot_path: PathBuf,
    policy: CompactionPolicy,
    inner: Mutex<Inner>,
}

impl Ledger {
    /// Open (or create) the ledger in `dir`, recover from any torn tail,
    /// and take the exclusive writer lock.
    pub fn open(dir: &Path, policy: CompactionPolicy) -> Result<Self, LedgerError> {
        fs::create_dir_all(dir).map_err(|source| LedgerError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let log_path = dir.join(LOG_FILE);
        let snapshot_path = dir.join(SNAPSHOT_FILE);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)
            .map_err(|source| LedgerError::Io {
                path: log_path.clone(),
                source,
            })?;

        file.try_lock_exclusive().map_err(|_| LedgerError::Locked {
            path: log_path.clone(),
        })?;

        let mut snapshot = load_snapshot(&snapshot_path)?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|source| LedgerError::Io {
                path: log_path.clone(),
                source,
            })?;

        let replay = replay_records(&content, &snapshot_path)?;
        if (replay.valid_bytes as usize) < content.len() {
            warn!(
                valid_bytes = replay.valid_bytes,
                file_bytes = content.len(),
                "truncating ledger log to last well-formed record"
            );
            file.set_len(replay.valid_bytes)
                .map_err(|source| LedgerError::Io {
                    path: log_path.clone(),
                    source,
                })?;
        }
        file.seek(SeekFrom::End(0)).map_err(|source| LedgerError::Io {
            path: log_path.clone(),
            source,
        })?;

        let mut artifact_records = 0u64;
        for record in &replay.records {
            if record.event == PhaseEvent::ArtifactRegistered && record.seq > snapshot.last_seq {
                artifact_records += record.artifact_refs.len() as u64;
            }
            snapshot.apply(record);
        }

        debug!(
            last_seq = snapshot.last_seq,
            cursor = snapshot.phase_cursor,
            "ledger opened"
        );

        Ok(Self {
            log_path,
            snapshot_path,
            policy,
            inner: Mutex::new(Inner {
                file,
                snapshot,
                log_bytes: replay.valid_bytes,
                artifact_records,
            }),
        })
    }

    /// Read-only view of the ledger state in `dir`, without taking the
    /// writer lock. Used by the status view; torn tails are skipped, not
    /// repaired.
    pub fn read_state(dir: &Path) -> Result<Snapshot, LedgerError> {
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let mut snapshot = load_snapshot(&snapshot_path)?;

        let log_path = dir.join(LOG_FILE);
        if log_path.exists() {
            let content = fs::read_to_string(&log_path).map_err(|source| LedgerError::Io {
                path: log_path,
                source,
            })?;
            for record in replay_records(&content, &snapshot_path)?.records {
                snapshot.apply(&record);
            }
        }
        Ok(snapshot)
    }

    /// Current materialized state.
    pub fn current_snapshot(&self) -> Snapshot {
        self.inner
            .lock()
            .expect("ledger mutex is never poisoned")
            .snapshot
            .clone()
    }

    pub fn phase_started(&self, phase: WorkflowPhase) -> Result<u64, LedgerError> {
        self.append(phase, PhaseEvent::Started, Vec::new())
    }

    pub fn phase_completed(&self, phase: WorkflowPhase) -> Result<u64, LedgerError> {
        self.append(phase, PhaseEvent::Completed, Vec::new())
    }

    pub fn phase_failed(&self, phase: WorkflowPhase) -> Result<u64, LedgerError> {
        self.append(phase, PhaseEvent::Failed, Vec::new())
    }

    pub fn phase_reset(&self, phase: WorkflowPhase) -> Result<u64, LedgerError> {
        self.append(phase, PhaseEvent::Reset, Vec::new())
    }

    /// Register an artifact, failing with `VersionConflict` when the
    /// registry already holds an equal-or-higher version for the path.
    pub fn register_artifact(&self, artifact: &Artifact) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().expect("ledger mutex is never poisoned");

        if let Some(existing) = inner.snapshot.max_version(&artifact.path)
            && existing >= artifact.version
        {
            return Err(LedgerError::VersionConflict {
                path: artifact.path.clone(),
                attempted: artifact.version,
                existing,
            });
        }

        self.append_locked(
            &mut inner,
            artifact.producer_phase,
            PhaseEvent::ArtifactRegistered,
            vec![artifact.into()],
        )?;
        Ok(())
    }

    fn append(
        &self,
        phase: WorkflowPhase,
        event: PhaseEvent,
        refs: Vec<crate::artifact::ArtifactRef>,
    ) -> Result<u64, LedgerError> {
        let mut inner = self.inner.lock().expect("ledger mutex is never poisoned");
        self.append_locked(&mut inner, phase, event, refs)
    }

    fn append_locked(
        &self,
        inner: &mut Inner,
        phase: WorkflowPhase,
        event: PhaseEvent,
        refs: Vec<crate::artifact::ArtifactRef>,
    ) -> Result<u64, LedgerError> {
        let record = LedgerRecord {
            seq: inner.snapshot.last_seq + 1,
            phase,
            event,
            artifact_refs: refs,
            timestamp: Utc::now(),
        };

        let line = encode_record(&record)?;
        inner
            .file
            .write_all(line.as_bytes())
            .and_then(|_| inner.file.sync_data())
            .map_err(|source| LedgerError::Io {
                path: self.log_path.clone(),
                source,
            })?;

        inner.log_bytes += line.len() as u64;
        if record.event == PhaseEvent::ArtifactRegistered {
            inner.artifact_records += record.artifact_refs.len() as u64;
        }
        inner.snapshot.apply(&record);

        if self.policy.should_compact(inner.log_bytes, inner.artifact_records) {
            self.compact_locked(inner)?;
        }

        Ok(record.seq)
    }

    /// Rewrite the snapshot and truncate the log. The snapshot is written
    /// before the log shrinks, so a crash in between loses nothing.
    fn compact_locked(&self, inner: &mut Inner) -> Result<(), LedgerError> {
        write_snapshot_atomic(&self.snapshot_path, &inner.snapshot)?;
        inner
            .file
            .set_len(0)
            .and_then(|_| inner.file.seek(SeekFrom::Start(0)).map(|_| ()))
            .map_err(|source| LedgerError::Io {
                path: self.log_path.clone(),
                source,
            })?;
        inner.log_bytes = 0;
        inner.artifact_records = 0;
        debug!(last_seq = inner.snapshot.last_seq, "ledger compacted");
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<Snapshot, LedgerError> {
    if !path.exists() {
        return Ok(Snapshot::new());
    }
    let content = fs::read_to_string(path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| LedgerError::Corruption {
        detail: format!("unreadable snapshot {}: {}", path.display(), e),
    })
}

struct ReplayResult {
    records: Vec<LedgerRecord>,
    valid_bytes: u64,
}

/// Scan the log, keeping the longest prefix of well-formed records. A bad
/// checksum or unparsable line ends the scan; everything after it is
/// treated as a torn tail. A decreasing sequence number is corruption, not
/// a torn write, and fails the whole load.
fn replay_records(content: &str, snapshot_path: &Path) -> Result<ReplayResult, LedgerError> {
    let mut records = Vec::new();
    let mut valid_bytes = 0u64;
    let mut prev_seq = 0u64;

    for line in content.split_inclusive('\n') {
        if !line.ends_with('\n') {
            break;
        }
        let record = match decode_record(line.trim_end()) {
            Ok(record) => record,
            Err(detail) => {
                warn!(%detail, "ignoring malformed ledger tail");
                break;
            }
        };
        if record.seq <= prev_seq {
            return Err(LedgerError::Corruption {
                detail: format!(
                    "non-monotonic sequence {} after {} in {}",
                    record.seq,
                    prev_seq,
                    snapshot_path.with_file_name(LOG_FILE).display()
                ),
            });
        }
        prev_seq = record.seq;
        valid_bytes += line.len() as u64;
        records.push(record);
    }

    Ok(ReplayResult {
        records,
        valid_bytes,
    })
}

fn encode_record(record: &LedgerRecord) -> Result<String, LedgerError> {
    let json = serde_json::to_string(record)?;
    Ok(format!("{}|{}\n", json, checksum(&json)))
}

fn decode_record(line: &str) -> Result<LedgerRecord, String> {
    let (json, sum) = line
        .rsplit_once('|')
        .ok_or_else(|| "missing checksum separator".to_string())?;
    if checksum(json) != sum {
        return Err("checksum mismatch".to_string());
    }
    serde_json::from_str(json).map_err(|e| format!("unparsable record: {e}"))
}

fn checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
