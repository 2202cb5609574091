//! Conflict resolution policy and the conflict wait loop.
//!
//! After a merge the repository may be left mid-merge. Under
//! [`ConflictPolicyKind::AutoTheirs`] the orchestrator resolves it at once by
//! taking the remote side; under [`ConflictPolicyKind::Interactive`] a human
//! does. Either way, [`ConflictPolicy::wait_until_resolved`] then polls the
//! merge state until it clears, sleeping on tokio's clock between polls.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::config::{ConflictConfig, ConflictPolicyKind};
use crate::errors::ReconcileError;
use crate::oracle::MergeState;

/// How a run treats an unresolved merge. Chosen once per run.
#[derive(Debug, Clone)]
pub struct ConflictPolicy {
    kind: ConflictPolicyKind,
    interval: Duration,
    deadline: Option<Duration>,
}

impl ConflictPolicy {
    pub fn new(kind: ConflictPolicyKind, interval: Duration, deadline: Option<Duration>) -> Self {
        Self {
            kind,
            interval,
            deadline,
        }
    }

    pub fn from_config(config: &ConflictConfig) -> Self {
        Self::new(config.policy, config.poll_interval(), config.timeout())
    }

    pub fn kind(&self) -> ConflictPolicyKind {
        self.kind
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `state` until no merge is in progress. Returns the number of
    /// polls that found the merge still open.
    pub async fn wait_until_resolved<S: MergeState + ?Sized>(
        &self,
        state: &S,
    ) -> Result<u32, ReconcileError> {
        let started = Instant::now();
        let mut open_polls = 0u32;

        while state.is_merge_in_progress() {
            if open_polls == 0 {
                warn!(
                    policy = %self.kind,
                    "merge conflict detected, waiting for resolution"
                );
            }
            open_polls += 1;

            if let Some(deadline) = self.deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    return Err(ReconcileError::ConflictTimeout {
                        waited_secs: elapsed.as_secs(),
                    });
                }
                time::sleep(self.interval.min(deadline - elapsed)).await;
            } else {
                time::sleep(self.interval).await;
            }
        }

        if open_polls > 0 {
            info!(
                waited_ms = started.elapsed().as_millis() as u64,
                "merge conflict resolved"
            );
        }
        Ok(open_polls)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Reports a merge in progress for the first `open_for` polls.
    struct ScriptedMerge {
        open_for: u32,
        polls: AtomicU32,
    }

    impl ScriptedMerge {
        fn new(open_for: u32) -> Self {
            Self {
                open_for,
                polls: AtomicU32::new(0),
            }
        }
    }

    impl MergeState for ScriptedMerge {
        fn is_merge_in_progress(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) < self.open_for
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_merge_does_not_block() {
        let policy = ConflictPolicy::new(
            ConflictPolicyKind::AutoTheirs,
            Duration::from_secs(1),
            None,
        );
        let started = Instant::now();
        let polls = policy.wait_until_resolved(&ScriptedMerge::new(0)).await.unwrap();
        assert_eq!(polls, 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_external_resolution() {
        let policy = ConflictPolicy::new(
            ConflictPolicyKind::Interactive,
            Duration::from_secs(1),
            None,
        );
        let started = Instant::now();
        let polls = policy.wait_until_resolved(&ScriptedMerge::new(5)).await.unwrap();
        assert_eq!(polls, 5);
        assert_eq!(started.elapsed().as_secs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_yields_timeout() {
        let policy = ConflictPolicy::new(
            ConflictPolicyKind::Interactive,
            Duration::from_secs(1),
            Some(Duration::from_secs(3)),
        );
        let err = policy
            .wait_until_resolved(&ScriptedMerge::new(u32::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ConflictTimeout { waited_secs: 3 }));
    }

    #[test]
    fn test_from_config() {
        let config = ConflictConfig {
            policy: ConflictPolicyKind::Interactive,
            poll_interval_ms: 500,
            timeout_secs: Some(60),
        };
        let policy = ConflictPolicy::from_config(&config);
        assert_eq!(policy.kind(), ConflictPolicyKind::Interactive);
        assert_eq!(policy.interval(), Duration::from_millis(500));
    }
}
