//! Delegation dispatcher: the only path from a work item to a worker.
//!
//! The order of operations is fixed and never reversed:
//! grant consumption → worker invocation → ledger mutation. A crash
//! between steps can therefore never leave a ledger entry for work that
//! did not actually run. Timed-out invocations are cancelled here at the
//! dispatcher boundary and their partial output is discarded, never
//! registered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::errors::ErrorKind;
use crate::governor::{GrantRequest, ResourceGovernor};
use crate::ledger::Ledger;
use crate::worker::{WorkerOutput, WorkerRegistry, WorkerStatus};
use crate::workitem::{DelegationResult, ResourceUsage, WorkItem};

pub mod context;

pub use context::BoundedContext;

pub struct Dispatcher {
    governor: Arc<ResourceGovernor>,
    ledger: Arc<Ledger>,
    registry: WorkerRegistry,
    project_dir: PathBuf,
    log_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(
        governor: Arc<ResourceGovernor>,
        ledger: Arc<Ledger>,
        registry: WorkerRegistry,
        project_dir: &Path,
        log_dir: &Path,
    ) -> Self {
        Self {
            governor,
            ledger,
            registry,
            project_dir: project_dir.to_path_buf(),
            log_dir: log_dir.to_path_buf(),
        }
    }

    /// Dispatch one work item. Never panics and never returns `Err`: every
    /// failure mode is folded into the `DelegationResult` taxonomy for the
    /// recovery controller.
    pub async fn dispatch(&self, item: &WorkItem) -> DelegationResult {
        // 1. Authorize. A denial means no worker was ever invoked.
        let grant = match self
            .governor
            .authorize(GrantRequest::from(&item.constraints))
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                warn!(phase = %item.phase, error = %e, "grant denied");
                return DelegationResult::failure(
                    item,
                    ErrorKind::ResourceExceeded,
                    ResourceUsage::default(),
                );
            }
        };

        // 2. Bound the context.
        let ctx = context::build(&self.project_dir, item);
        self.write_item_log(item, "context", &ctx);

        let Some(worker) = self.registry.get(item.phase) else {
            warn!(phase = %item.phase, "no worker registered");
            return DelegationResult::failure(
                item,
                ErrorKind::WorkerFailed,
                ResourceUsage {
                    context_bytes: ctx.total_bytes(),
                    ..Default::default()
                },
            );
        };

        // 3. Consume the grant, then invoke within the granted deadline.
        // The grant is spent before the worker runs; a second consume of
        // the same grant fails closed.
        if let Err(e) = grant.consume() {
            warn!(phase = %item.phase, error = %e, "grant unusable");
            return DelegationResult::failure(
                item,
                ErrorKind::ResourceExceeded,
                ResourceUsage::default(),
            );
        }

        let started = Instant::now();
        let deadline = started + grant.budget().timeout;
        let mut iterations = 0u32;

        let invoked = loop {
            iterations += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(ErrorKind::Timeout);
            }

            match tokio::time::timeout(remaining, worker.invoke(&ctx)).await {
                Err(_) => {
                    // Cancelled at the boundary; whatever the worker had
                    // produced so far is discarded unregistered.
                    warn!(phase = %item.phase, iteration = iterations, "worker timed out");
                    break Err(ErrorKind::Timeout);
                }
                Ok(Err(e)) => {
                    warn!(phase = %item.phase, error = %e, "worker invocation failed");
                    break Err(ErrorKind::WorkerFailed);
                }
                Ok(Ok(output)) => {
                    self.write_item_log(item, &format!("output-{iterations}"), &output);
                    match output.status {
                        WorkerStatus::Failure => break Err(ErrorKind::WorkerFailed),
                        WorkerStatus::Partial if iterations < grant.budget().iterations => {
                            debug!(phase = %item.phase, iteration = iterations, "partial result, re-invoking");
                            continue;
                        }
                        WorkerStatus::Partial => break Err(ErrorKind::IncompleteOutput),
                        WorkerStatus::Success => break Ok(output),
                    }
                }
            }
        };

        let usage = ResourceUsage {
            files_touched: 0,
            context_bytes: ctx.total_bytes(),
            iterations,
            duration_secs: started.elapsed().as_secs_f64(),
        };

        let output = match invoked {
            Ok(output) => output,
            Err(kind) => return DelegationResult::failure(item, kind, usage),
        };

        // 4. Validate declared outputs against the completion criteria.
        // Self-reported success is not enough.
        let artifacts = match self.validate_output(item, &output) {
            Ok(artifacts) => artifacts,
            Err(kind) => return DelegationResult::failure(item, kind, usage),
        };

        // 5. Fold into the ledger before returning.
        for artifact in &artifacts {
            if let Err(e) = self.ledger.register_artifact(artifact) {
                warn!(path = %artifact.path, error = %e, "artifact registration failed");
                return DelegationResult::failure(item, e.kind(), usage);
            }
        }

        let usage = ResourceUsage {
            files_touched: artifacts.len() as u32,
            ..usage
        };
        DelegationResult::success(item, artifacts, usage)
    }

    /// Turn declared outputs into versioned artifacts and check the item's
    /// completion criteria. Duplicate path declarations collapse to one
    /// artifact; output beyond the file ceiling fails the item.
    fn validate_output(
        &self,
        item: &WorkItem,
        output: &WorkerOutput,
    ) -> Result<Vec<Artifact>, ErrorKind> {
        let mut by_path = HashMap::new();
        for produced in &output.artifacts_produced {
            by_path.insert(produced.path.clone(), produced.clone());
        }

        if by_path.len() as u32 > item.constraints.max_files {
            warn!(
                phase = %item.phase,
                declared = by_path.len(),
                ceiling = item.constraints.max_files,
                "worker declared more files than its budget"
            );
            return Err(ErrorKind::IncompleteOutput);
        }

        let snapshot = self.ledger.current_snapshot();
        let mut paths: Vec<_> = by_path.into_values().collect();
        paths.sort_by(|a, b| a.path.cmp(&b.path));
        let artifacts: Vec<Artifact> = paths
            .into_iter()
            .map(|p| Artifact::new(&p.path, p.kind, snapshot.next_version(&p.path), item.phase))
            .collect();

        if !item.criteria.satisfied_by(&artifacts) {
            warn!(
                phase = %item.phase,
                required = %item.criteria.kind,
                "declared outputs do not satisfy completion criteria"
            );
            return Err(ErrorKind::IncompleteOutput);
        }

        Ok(artifacts)
    }

    /// Persist a per-item JSON log file for post-mortem inspection. Log
    /// failures are reported, never fatal.
    fn write_item_log<T: serde::Serialize>(&self, item: &WorkItem, label: &str, value: &T) {
        let name = format!(
            "{}-item-{}-{}.json",
            item.phase,
            &item.id.to_string()[..8],
            label
        );
        let path = self.log_dir.join(name);
        match serde_json::to_string_pretty(value) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "failed to write item log");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize item log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::governor::Ceilings;
    use crate::ledger::CompactionPolicy;
    use crate::phase::WorkflowPhase;
    use crate::relay_config::GovernorConfig;
    use crate::worker::{ProducedArtifact, Worker};
    use crate::workitem::WorkConstraints;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct StaticWorker {
        outputs: Mutex<Vec<WorkerOutput>>,
        invoked: AtomicBool,
        calls: AtomicU32,
        delay: Duration,
    }

    impl StaticWorker {
        fn new(outputs: Vec<WorkerOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                invoked: AtomicBool::new(false),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn slow(outputs: Vec<WorkerOutput>, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(outputs)
            }
        }
    }

    #[async_trait]
    impl Worker for StaticWorker {
        async fn invoke(&self, _ctx: &BoundedContext) -> Result<WorkerOutput> {
            self.invoked.store(true, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                anyhow::bail!("no scripted output left");
            }
            Ok(outputs.remove(0))
        }
    }

    fn success_output(paths: &[&str], kind: ArtifactKind) -> WorkerOutput {
        WorkerOutput {
            artifacts_produced: paths
                .iter()
                .map(|p| ProducedArtifact {
                    path: p.to_string(),
                    kind,
                })
                .collect(),
            status: WorkerStatus::Success,
            summary: "done".to_string(),
        }
    }

    fn partial_output() -> WorkerOutput {
        WorkerOutput {
            artifacts_produced: Vec::new(),
            status: WorkerStatus::Partial,
            summary: "in progress".to_string(),
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        ledger: Arc<Ledger>,
        worker: Arc<StaticWorker>,
        _dir: TempDir,
    }

    fn fixture(phase: WorkflowPhase, worker: StaticWorker) -> Fixture {
        let dir = tempdir().unwrap();
        let ledger =
            Arc::new(Ledger::open(&dir.path().join("ledger"), CompactionPolicy::default()).unwrap());
        let governor = Arc::new(ResourceGovernor::new(
            Ceilings::default(),
            &GovernorConfig::default(),
        ));
        let worker = Arc::new(worker);
        let mut registry = WorkerRegistry::new();
        registry.register(phase, worker.clone());
        let log_dir = dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        let dispatcher = Dispatcher::new(
            governor,
            ledger.clone(),
            registry,
            dir.path(),
            &log_dir,
        );
        Fixture {
            dispatcher,
            ledger,
            worker,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn successful_dispatch_registers_artifacts() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            phase,
            StaticWorker::new(vec![success_output(&["goals.md"], ArtifactKind::Goals)]),
        );
        let item = WorkItem::new(phase, Vec::new(), WorkConstraints::default());

        let result = f.dispatcher.dispatch(&item).await;

        assert!(result.success, "dispatch should succeed: {:?}", result.error);
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].version, 1);
        assert!(result.usage.within(&item.constraints));
        assert_eq!(f.ledger.current_snapshot().max_version("goals.md"), Some(1));
    }

    #[tokio::test]
    async fn denied_grant_never_invokes_the_worker() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            phase,
            StaticWorker::new(vec![success_output(&["goals.md"], ArtifactKind::Goals)]),
        );
        let over_budget = WorkConstraints {
            max_files: 50,
            ..Default::default()
        };
        let item = WorkItem::new(phase, Vec::new(), over_budget);

        let result = f.dispatcher.dispatch(&item).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::ResourceExceeded));
        assert!(!f.worker.invoked.load(Ordering::SeqCst));
        assert_eq!(f.ledger.current_snapshot().artifact_count(), 0);
    }

    #[tokio::test]
    async fn timeout_discards_partial_output() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            phase,
            StaticWorker::slow(
                vec![success_output(&["goals.md"], ArtifactKind::Goals)],
                Duration::from_secs(5),
            ),
        );
        let constraints = WorkConstraints {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let item = WorkItem::new(phase, Vec::new(), constraints);

        let result = f.dispatcher.dispatch(&item).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::Timeout));
        // Nothing from the cancelled invocation reaches the ledger.
        assert_eq!(f.ledger.current_snapshot().artifact_count(), 0);
    }

    #[tokio::test]
    async fn self_reported_success_still_fails_criteria_check() {
        let phase = WorkflowPhase::Specification;
        // Declares a doc, but the phase requires a spec artifact.
        let f = fixture(
            phase,
            StaticWorker::new(vec![success_output(&["notes.md"], ArtifactKind::Doc)]),
        );
        let item = WorkItem::new(phase, Vec::new(), WorkConstraints::default());

        let result = f.dispatcher.dispatch(&item).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::IncompleteOutput));
        assert_eq!(f.ledger.current_snapshot().artifact_count(), 0);
    }

    #[tokio::test]
    async fn worker_failure_status_maps_to_worker_failed() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            phase,
            StaticWorker::new(vec![WorkerOutput {
                artifacts_produced: Vec::new(),
                status: WorkerStatus::Failure,
                summary: "could not proceed".to_string(),
            }]),
        );
        let item = WorkItem::new(phase, Vec::new(), WorkConstraints::default());

        let result = f.dispatcher.dispatch(&item).await;
        assert_eq!(result.error, Some(ErrorKind::WorkerFailed));
    }

    #[tokio::test]
    async fn partial_results_are_re_invoked_up_to_the_iteration_budget() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            phase,
            StaticWorker::new(vec![
                partial_output(),
                partial_output(),
                success_output(&["goals.md"], ArtifactKind::Goals),
            ]),
        );
        let item = WorkItem::new(phase, Vec::new(), WorkConstraints::default());

        let result = f.dispatcher.dispatch(&item).await;

        assert!(result.success);
        assert_eq!(result.usage.iterations, 3);
        assert_eq!(f.worker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn partial_at_iteration_ceiling_is_incomplete_output() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(phase, StaticWorker::new(vec![partial_output()]));
        let constraints = WorkConstraints {
            max_iterations: 1,
            ..Default::default()
        };
        let item = WorkItem::new(phase, Vec::new(), constraints);

        let result = f.dispatcher.dispatch(&item).await;

        assert_eq!(result.error, Some(ErrorKind::IncompleteOutput));
        assert_eq!(result.usage.iterations, 1);
    }

    #[tokio::test]
    async fn output_beyond_the_file_ceiling_fails_validation() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            phase,
            StaticWorker::new(vec![success_output(
                &["a.md", "b.md", "c.md"],
                ArtifactKind::Goals,
            )]),
        );
        let constraints = WorkConstraints {
            max_files: 2,
            ..Default::default()
        };
        let item = WorkItem::new(phase, Vec::new(), constraints);

        let result = f.dispatcher.dispatch(&item).await;

        assert_eq!(result.error, Some(ErrorKind::IncompleteOutput));
        assert_eq!(f.ledger.current_snapshot().artifact_count(), 0);
    }

    #[tokio::test]
    async fn missing_worker_fails_without_ledger_mutation() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            WorkflowPhase::Documentation,
            StaticWorker::new(Vec::new()),
        );
        let item = WorkItem::new(phase, Vec::new(), WorkConstraints::default());

        let result = f.dispatcher.dispatch(&item).await;

        assert_eq!(result.error, Some(ErrorKind::WorkerFailed));
        assert_eq!(f.ledger.current_snapshot().artifact_count(), 0);
    }

    #[tokio::test]
    async fn repeated_dispatch_bumps_artifact_versions() {
        let phase = WorkflowPhase::Clarification;
        let f = fixture(
            phase,
            StaticWorker::new(vec![
                success_output(&["goals.md"], ArtifactKind::Goals),
                success_output(&["goals.md"], ArtifactKind::Goals),
            ]),
        );
        let item = WorkItem::new(phase, Vec::new(), WorkConstraints::default());

        let first = f.dispatcher.dispatch(&item).await;
        let second = f.dispatcher.dispatch(&item).await;

        assert_eq!(first.artifacts[0].version, 1);
        assert_eq!(second.artifacts[0].version, 2);
        assert_eq!(f.ledger.current_snapshot().max_version("goals.md"), Some(2));
    }
}
