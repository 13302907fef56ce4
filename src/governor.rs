//! Resource governor: per-operation ceilings and single-use grants.
//!
//! Every delegated unit of work must be authorized before any worker runs.
//! A `Grant` is a single-use capability token; it also holds a semaphore
//! permit, so the number of outstanding grants can never exceed the global
//! concurrency ceiling. Waiters beyond the bounded queue depth are denied
//! instead of piling up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::errors::GovernorError;
use crate::relay_config::{GovernorConfig, LimitsConfig};
use crate::workitem::WorkConstraints;

/// Global per-operation ceilings. Work-item constraints must stay at or
/// below these values; `authorize` fails closed otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ceilings {
    pub max_files: u32,
    pub max_context_bytes: usize,
    pub max_iterations: u32,
    pub max_timeout: Duration,
}

impl Default for Ceilings {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_context_bytes: 5120,
            max_iterations: 5,
            max_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&LimitsConfig> for Ceilings {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_files: limits.max_files_per_op,
            max_context_bytes: limits.max_context_bytes,
            max_iterations: limits.max_iterations,
            max_timeout: Duration::from_secs(limits.op_timeout_seconds),
        }
    }
}

/// What a dispatcher asks for on behalf of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub files: u32,
    pub context_bytes: usize,
    pub iterations: u32,
    pub timeout: Duration,
}

impl From<&WorkConstraints> for GrantRequest {
    fn from(c: &WorkConstraints) -> Self {
        Self {
            files: c.max_files,
            context_bytes: c.max_context_bytes,
            iterations: c.max_iterations,
            timeout: c.timeout,
        }
    }
}

/// A single-use capability token. Dropping the grant releases its
/// concurrency slot; consuming it twice fails with `AlreadyConsumed`.
#[derive(Debug)]
pub struct Grant {
    budget: GrantRequest,
    consumed: AtomicBool,
    _permit: OwnedSemaphorePermit,
}

impl Grant {
    /// Mark the grant as spent. The dispatcher calls this immediately
    /// before invoking the worker; a second call fails closed.
    pub fn consume(&self) -> Result<(), GovernorError> {
        if self.consumed.swap(true, Ordering::SeqCst) {
            return Err(GovernorError::AlreadyConsumed);
        }
        Ok(())
    }

    pub fn budget(&self) -> &GrantRequest {
        &self.budget
    }
}

/// Enforces ceilings and the global concurrency cap for delegated work.
pub struct ResourceGovernor {
    ceilings: Ceilings,
    permits: Arc<Semaphore>,
    waiters: AtomicUsize,
    max_queue_depth: usize,
}

impl ResourceGovernor {
    pub fn new(ceilings: Ceilings, governor: &GovernorConfig) -> Self {
        Self {
            ceilings,
            permits: Arc::new(Semaphore::new(governor.max_concurrent_grants)),
            waiters: AtomicUsize::new(0),
            max_queue_depth: governor.max_queue_depth,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Ceilings::default(), &GovernorConfig::default())
    }

    pub fn ceilings(&self) -> &Ceilings {
        &self.ceilings
    }

    /// Authorize a unit of work, blocking on the bounded queue when all
    /// concurrency slots are taken. Denies when any requested value exceeds
    /// a ceiling, or when the queue itself is full.
    pub async fn authorize(&self, request: GrantRequest) -> Result<Grant, GovernorError> {
        self.check_ceilings(&request)?;

        if self.permits.available_permits() == 0 {
            let depth = self.waiters.load(Ordering::SeqCst);
            if depth >= self.max_queue_depth {
                return Err(GovernorError::QueueSaturated { depth });
            }
        }

        self.waiters.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("grant semaphore is never closed");
        self.waiters.fetch_sub(1, Ordering::SeqCst);

        debug!(
            files = request.files,
            context_bytes = request.context_bytes,
            iterations = request.iterations,
            "grant issued"
        );

        Ok(Grant {
            budget: request,
            consumed: AtomicBool::new(false),
            _permit: permit,
        })
    }

    fn check_ceilings(&self, request: &GrantRequest) -> Result<(), GovernorError> {
        if request.files > self.ceilings.max_files {
            return Err(GovernorError::CeilingExceeded {
                resource: "files",
                requested: request.files as u64,
                ceiling: self.ceilings.max_files as u64,
            });
        }
        if request.context_bytes > self.ceilings.max_context_bytes {
            return Err(GovernorError::CeilingExceeded {
                resource: "context_bytes",
                requested: request.context_bytes as u64,
                ceiling: self.ceilings.max_context_bytes as u64,
            });
        }
        if request.iterations > self.ceilings.max_iterations {
            return Err(GovernorError::CeilingExceeded {
                resource: "iterations",
                requested: request.iterations as u64,
                ceiling: self.ceilings.max_iterations as u64,
            });
        }
        if request.timeout > self.ceilings.max_timeout {
            return Err(GovernorError::CeilingExceeded {
                resource: "timeout_seconds",
                requested: request.timeout.as_secs(),
                ceiling: self.ceilings.max_timeout.as_secs(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GrantRequest {
        GrantRequest {
            files: 3,
            context_bytes: 1024,
            iterations: 2,
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn authorize_within_ceilings_succeeds() {
        let governor = ResourceGovernor::with_defaults();
        let grant = governor.authorize(request()).await.unwrap();
        assert_eq!(grant.budget().files, 3);
    }

    #[tokio::test]
    async fn authorize_denies_each_exceeded_dimension() {
        let governor = ResourceGovernor::with_defaults();

        let over_files = GrantRequest {
            files: 6,
            ..request()
        };
        assert!(matches!(
            governor.authorize(over_files).await,
            Err(GovernorError::CeilingExceeded {
                resource: "files",
                ..
            })
        ));

        let over_bytes = GrantRequest {
            context_bytes: 6000,
            ..request()
        };
        assert!(matches!(
            governor.authorize(over_bytes).await,
            Err(GovernorError::CeilingExceeded {
                resource: "context_bytes",
                ..
            })
        ));

        let over_iterations = GrantRequest {
            iterations: 6,
            ..request()
        };
        assert!(matches!(
            governor.authorize(over_iterations).await,
            Err(GovernorError::CeilingExceeded {
                resource: "iterations",
                ..
            })
        ));

        let over_timeout = GrantRequest {
            timeout: Duration::from_secs(31),
            ..request()
        };
        assert!(matches!(
            governor.authorize(over_timeout).await,
            Err(GovernorError::CeilingExceeded {
                resource: "timeout_seconds",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn grant_is_single_use() {
        let governor = ResourceGovernor::with_defaults();
        let grant = governor.authorize(request()).await.unwrap();
        assert!(grant.consume().is_ok());
        assert_eq!(grant.consume(), Err(GovernorError::AlreadyConsumed));
    }

    #[tokio::test]
    async fn dropping_a_grant_releases_its_slot() {
        let config = GovernorConfig {
            max_concurrent_grants: 1,
            max_queue_depth: 8,
        };
        let governor = ResourceGovernor::new(Ceilings::default(), &config);

        let first = governor.authorize(request()).await.unwrap();
        drop(first);
        // With the slot released, a second authorize completes immediately.
        let second = governor.authorize(request()).await.unwrap();
        second.consume().unwrap();
    }

    #[tokio::test]
    async fn queue_saturation_denies_instead_of_queueing() {
        let config = GovernorConfig {
            max_concurrent_grants: 1,
            max_queue_depth: 0,
        };
        let governor = ResourceGovernor::new(Ceilings::default(), &config);

        let held = governor.authorize(request()).await.unwrap();
        let result = governor.authorize(request()).await;
        assert!(matches!(result, Err(GovernorError::QueueSaturated { .. })));
        drop(held);
    }

    #[tokio::test]
    async fn ceilings_follow_configured_limits() {
        let limits = LimitsConfig {
            max_files_per_op: 2,
            max_context_bytes: 512,
            max_iterations: 1,
            op_timeout_seconds: 5,
            max_retries_per_phase: 3,
        };
        let governor = ResourceGovernor::new(Ceilings::from(&limits), &GovernorConfig::default());
        assert!(governor.authorize(request()).await.is_err());

        let small = GrantRequest {
            files: 2,
            context_bytes: 512,
            iterations: 1,
            timeout: Duration::from_secs(5),
        };
        assert!(governor.authorize(small).await.is_ok());
    }
}
