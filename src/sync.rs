//! Sync orchestrator: replays the durable queue against the remote data layer,
//! one pass at a time.
use crate::connectivity::{ConnectivityMonitor, Direction, SubscriptionId};
use crate::db::{self, MutationPatch, Pool};
use crate::executor::MutationExecutor;
use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Replaying,
}

/// Tally of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub succeeded: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
}

impl SyncReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Result of asking the orchestrator to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was already in flight; this trigger was dropped.
    Skipped,
    NothingToDo,
    Completed(SyncReport),
    /// The queue store failed; remaining items were left untouched.
    Aborted(String),
}

/// Broadcast once per finished pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    NothingToDo,
    Completed { succeeded: usize, failed: usize },
    Aborted { error: String },
}

/// Marks a pass in flight. At most one exists per orchestrator; dropping it
/// returns the orchestrator to `Idle`.
struct SyncSession<'a> {
    replaying: &'a AtomicBool,
}

impl<'a> SyncSession<'a> {
    fn begin(replaying: &'a AtomicBool) -> Option<Self> {
        replaying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { replaying })
    }
}

impl Drop for SyncSession<'_> {
    fn drop(&mut self) {
        self.replaying.store(false, Ordering::Release);
    }
}

pub struct SyncOrchestrator {
    pool: Pool,
    executor: MutationExecutor,
    replaying: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(pool: Pool, executor: MutationExecutor) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            pool,
            executor,
            replaying: AtomicBool::new(false),
            events,
        }
    }

    pub fn state(&self) -> SyncState {
        if self.replaying.load(Ordering::Acquire) {
            SyncState::Replaying
        } else {
            SyncState::Idle
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.state() == SyncState::Replaying
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Run one replay pass unless one is already running.
    #[instrument(skip_all)]
    pub async fn run_pass(&self) -> PassOutcome {
        let Some(session) = SyncSession::begin(&self.replaying) else {
            debug!("replay already in flight; trigger ignored");
            return PassOutcome::Skipped;
        };

        let (outcome, event) = match self.replay().await {
            Ok(None) => (PassOutcome::NothingToDo, SyncEvent::NothingToDo),
            Ok(Some(report)) => {
                let event = SyncEvent::Completed {
                    succeeded: report.succeeded,
                    failed: report.failed,
                };
                (PassOutcome::Completed(report), event)
            }
            Err(err) => {
                error!(?err, "replay pass aborted: queue storage failure");
                let error = format!("{err:#}");
                (
                    PassOutcome::Aborted(error.clone()),
                    SyncEvent::Aborted { error },
                )
            }
        };
        drop(session);

        // No subscribers is fine.
        let _ = self.events.send(event);
        outcome
    }

    /// Walk the snapshot taken at pass start. Per-item remote failures are
    /// recorded on the item; only store errors escape.
    async fn replay(&self) -> Result<Option<SyncReport>> {
        let snapshot = db::list_mutations(&self.pool).await?;
        if snapshot.is_empty() {
            debug!("mutation queue empty");
            return Ok(None);
        }
        info!(count = snapshot.len(), "replaying queued mutations");

        let mut report = SyncReport::default();
        for record in snapshot {
            match self.executor.execute(&record).await {
                Ok(_) => {
                    db::remove_mutation(&self.pool, &record.id).await?;
                    info!(
                        id = %record.id,
                        resource = %record.resource,
                        operation = %record.operation,
                        "queued mutation applied"
                    );
                    report.succeeded += 1;
                }
                Err(err) => {
                    let attempts = record.retry_count + 1;
                    warn!(
                        ?err,
                        id = %record.id,
                        resource = %record.resource,
                        operation = %record.operation,
                        attempts,
                        "queued mutation failed; kept in queue"
                    );
                    let patch = MutationPatch::failed(format!("{err:#}"), attempts);
                    db::patch_mutation(&self.pool, &record.id, &patch).await?;
                    report.failed += 1;
                    report.failed_ids.push(record.id);
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "replay pass complete"
        );
        Ok(Some(report))
    }

    /// Replay whenever connectivity comes back. Each trigger spawns a pass on
    /// the runtime `attach` was called from, so `report` may come from any
    /// thread; overlapping triggers collapse to one pass.
    pub fn attach(self: &Arc<Self>, monitor: &ConnectivityMonitor) -> SubscriptionId {
        let orchestrator = Arc::clone(self);
        let runtime = tokio::runtime::Handle::try_current().ok();
        monitor.on_transition(Direction::ToOnline, move || {
            let Some(handle) = runtime
                .clone()
                .or_else(|| tokio::runtime::Handle::try_current().ok())
            else {
                warn!("connectivity restored outside a tokio runtime; replay not started");
                return;
            };
            let orchestrator = Arc::clone(&orchestrator);
            handle.spawn(async move {
                orchestrator.run_pass().await;
            });
        })
    }

    /// Startup trigger: replay leftovers from a previous session when the app
    /// launches already online.
    pub async fn start(&self, monitor: &ConnectivityMonitor) -> Option<PassOutcome> {
        if !monitor.is_online() {
            debug!("starting offline; replay deferred until connectivity returns");
            return None;
        }
        Some(self.run_pass().await)
    }
}
