//! Outcome reporting for store writes.
//!
//! The managers treat their maps as authoritative and never roll back on a
//! store failure, so a failed write would otherwise vanish. Every write leg
//! ends up here: it is logged, and, if a listener was attached, published
//! as a [`SyncEvent`].

use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::GroupsError;

/// The store operation a sync outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOp {
    CreateGroup,
    DeleteGroup,
    UpdateGroup,
    CreateUser,
    UpdateUser,
    UpdateState,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOp::CreateGroup => "create_group",
            SyncOp::DeleteGroup => "delete_group",
            SyncOp::UpdateGroup => "update_group",
            SyncOp::CreateUser => "create_user",
            SyncOp::UpdateUser => "update_user",
            SyncOp::UpdateState => "update_state",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Completed {
        op: SyncOp,
        key: String,
        /// `None` for operations whose store call reports no row count.
        affected_rows: Option<u64>,
    },
    Failed {
        op: SyncOp,
        key: String,
        error: String,
    },
}

/// What happened to the store leg of an awaited mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// The caller did not ask for persistence.
    Skipped,
    /// The payload could not be encoded, so no store call was made.
    SerializationSkipped,
    Persisted { affected_rows: Option<u64> },
    Failed { error: String },
}

impl SyncStatus {
    pub fn is_persisted(&self) -> bool {
        matches!(self, SyncStatus::Persisted { .. })
    }
}

/// Sink for sync outcomes. Cheap to clone; every manager and every detached
/// task holds its own copy.
#[derive(Clone, Default)]
pub struct SyncReporter {
    events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl SyncReporter {
    /// A reporter that only logs.
    pub fn new() -> Self {
        SyncReporter { events: None }
    }

    pub fn with_events(events: mpsc::UnboundedSender<SyncEvent>) -> Self {
        SyncReporter { events: Some(events) }
    }

    /// Log the outcome of one store write, publish it, and hand it back as
    /// a [`SyncStatus`] for callers that awaited the write.
    pub fn record(
        &self,
        op: SyncOp,
        key: &str,
        outcome: Result<Option<u64>, GroupsError>,
    ) -> SyncStatus {
        let (event, status) = match outcome {
            Ok(affected_rows) => {
                debug!(%op, key, ?affected_rows, "store write completed");
                (
                    SyncEvent::Completed { op, key: key.to_string(), affected_rows },
                    SyncStatus::Persisted { affected_rows },
                )
            }
            Err(err) => {
                warn!(%op, key, error = %err, "store write failed");
                let error = err.to_string();
                (
                    SyncEvent::Failed { op, key: key.to_string(), error: error.clone() },
                    SyncStatus::Failed { error },
                )
            }
        };
        if let Some(events) = &self.events {
            // Nobody listening any more is not our problem.
            let _ = events.send(event);
        }
        status
    }

    /// Run a store write in the background. The caller's continuation does
    /// not wait for it; its outcome goes to [`SyncReporter::record`].
    pub fn spawn_detached<F>(&self, op: SyncOp, key: String, write: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<Option<u64>, GroupsError>> + Send + 'static,
    {
        let reporter = self.clone();
        tokio::spawn(async move {
            let outcome = write.await;
            reporter.record(op, &key, outcome);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test]
    async fn test_detached_failure_is_published() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = SyncReporter::with_events(tx);

        let handle = reporter.spawn_detached(SyncOp::UpdateState, "steve".to_string(), async {
            Err(GroupsError::Store(StoreError::Unavailable))
        });
        handle.await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(SyncEvent::Failed {
                op: SyncOp::UpdateState,
                key: "steve".to_string(),
                error: "Store error: Store unavailable".to_string(),
            })
        );
    }

    #[test]
    fn test_record_without_listener() {
        let reporter = SyncReporter::new();
        let status = reporter.record(SyncOp::CreateGroup, "Admin", Ok(Some(1)));
        assert_eq!(status, SyncStatus::Persisted { affected_rows: Some(1) });
        assert!(status.is_persisted());
    }

    #[test]
    fn test_closed_listener_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reporter = SyncReporter::with_events(tx);
        let status = reporter.record(SyncOp::DeleteGroup, "Admin", Ok(None));
        assert!(status.is_persisted());
    }
}
