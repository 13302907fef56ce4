//! Worker contract and adapters.
//!
//! Workers are opaque collaborators: the orchestrator hands one a bounded
//! context and reads back a declared result. How a worker produces its
//! artifacts is its own business. Per-phase adapters are registered in a
//! `WorkerRegistry` lookup table; the production adapter shells out to a
//! configured command with the context as JSON on stdin.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::artifact::ArtifactKind;
use crate::dispatch::context::BoundedContext;
use crate::phase::WorkflowPhase;
use crate::relay_config::WorkerConfig;

/// Worker-declared outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Success,
    Partial,
    Failure,
}

/// An artifact a worker claims to have produced. Versions are assigned by
/// the dispatcher at registration time, not by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedArtifact {
    pub path: String,
    pub kind: ArtifactKind,
}

/// The declared result of a worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutput {
    #[serde(default)]
    pub artifacts_produced: Vec<ProducedArtifact>,
    pub status: WorkerStatus,
    #[serde(default)]
    pub summary: String,
}

/// The capability interface a phase worker implements.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, ctx: &BoundedContext) -> Result<WorkerOutput>;

    fn name(&self) -> &str {
        "worker"
    }
}

/// Lookup table from phase to its registered worker adapter.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkflowPhase, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: WorkflowPhase, worker: Arc<dyn Worker>) {
        self.workers.insert(phase, worker);
    }

    pub fn get(&self, phase: WorkflowPhase) -> Option<Arc<dyn Worker>> {
        self.workers.get(&phase).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Build the registry from configuration: one `CommandWorker` per
    /// phase, with per-phase command overrides where configured. Phases
    /// without any command stay unregistered.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let mut registry = Self::new();
        for phase in WorkflowPhase::all() {
            let resolved = config.resolve(phase.as_str());
            if let Some((command, args)) = resolved {
                registry.register(*phase, Arc::new(CommandWorker::new(&command, args)));
            }
        }
        registry
    }
}

/// Production adapter: spawns a command, writes the bounded context as JSON
/// to stdin, and parses a `WorkerOutput` from stdout.
pub struct CommandWorker {
    command: String,
    args: Vec<String>,
}

impl CommandWorker {
    pub fn new(command: &str, args: Vec<String>) -> Self {
        Self {
            command: command.to_string(),
            args,
        }
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn invoke(&self, ctx: &BoundedContext) -> Result<WorkerOutput> {
        let payload = serde_json::to_string(ctx).context("Failed to serialize bounded context")?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker command '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .await
                .context("Failed to write context to worker stdin")?;
            stdin.shutdown().await.context("Failed to close worker stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for worker process")?;

        if !output.status.success() {
            anyhow::bail!(
                "Worker '{}' exited with code {}",
                self.command,
                output.status.code().unwrap_or(-1)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_worker_output(&stdout)
    }

    fn name(&self) -> &str {
        &self.command
    }
}

/// Parse a worker's stdout into a `WorkerOutput`, tolerating surrounding
/// prose or markdown fencing around the JSON object.
pub fn parse_worker_output(output: &str) -> Result<WorkerOutput> {
    let json = extract_json(output)
        .ok_or_else(|| anyhow::anyhow!("Worker produced no JSON result object"))?;
    serde_json::from_str(&json).context("Worker result JSON did not match the expected shape")
}

/// Extract a JSON object from output that may contain other text.
fn extract_json(output: &str) -> Option<String> {
    // Fenced block first
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    // Raw object with balanced braces
    if let Some(start) = output.find('{') {
        let mut depth = 0;
        let mut end = start;
        for (i, c) in output[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth == 0 && end > start {
            return Some(output[start..end].to_string());
        }
    }

    None
}
