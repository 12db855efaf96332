use crate::connectivity::ConnectivityMonitor;
use crate::db::{self, Pool};
use crate::error::SubmitError;
use crate::executor::MutationExecutor;
use crate::model::{MutationRecord, NewMutation, Operation};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Which path a submitted write took.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Applied remotely; carries the server's view of the row.
    Executed(Value),
    /// Captured offline; carries the queued record.
    Queued(MutationRecord),
}

impl Outcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Outcome::Queued(_))
    }
}

/// Single entry point for application writes. Online writes go straight to the
/// executor, offline writes to the durable queue.
#[derive(Clone)]
pub struct MutationGateway {
    pool: Pool,
    monitor: Arc<ConnectivityMonitor>,
    executor: MutationExecutor,
}

impl MutationGateway {
    pub fn new(pool: Pool, monitor: Arc<ConnectivityMonitor>, executor: MutationExecutor) -> Self {
        Self {
            pool,
            monitor,
            executor,
        }
    }

    pub async fn submit(
        &self,
        resource: impl Into<String>,
        operation: Operation,
        payload: Value,
    ) -> Result<Outcome, SubmitError> {
        self.submit_mutation(NewMutation::new(resource, operation, payload))
            .await
    }

    #[instrument(skip_all, fields(resource = %mutation.resource, operation = %mutation.operation))]
    pub async fn submit_mutation(&self, mutation: NewMutation) -> Result<Outcome, SubmitError> {
        if self.monitor.is_online() {
            let row = self
                .executor
                .execute(&mutation)
                .await
                .map_err(SubmitError::Remote)?;
            info!("write applied");
            return Ok(Outcome::Executed(row));
        }

        let record = db::enqueue_mutation(&self.pool, &mutation)
            .await
            .map_err(SubmitError::Storage)?;
        warn!(id = %record.id, "offline; write saved locally for later sync");
        Ok(Outcome::Queued(record))
    }
}
