#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use offline_sync::db::{self, Pool};
use offline_sync::executor::MutationExecutor;
use offline_sync::remote::RemoteDataLayer;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub async fn file_pool(path: &std::path::Path) -> Pool {
    let pool = db::init_pool(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub verb: &'static str,
    pub resource: String,
    pub key: Option<Value>,
    pub body: Value,
}

/// Remote double that records every call and answers from a script. An
/// exhausted script answers `Ok`.
#[derive(Clone, Default)]
pub struct RecordingRemote {
    responses: Arc<Mutex<VecDeque<Result<Value>>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    delay: Option<Duration>,
}

impl RecordingRemote {
    pub fn with_responses(responses: Vec<Result<Value>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(message: &str) -> Self {
        Self::with_responses(vec![Err(anyhow!(message.to_string()))])
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub fn executor(&self) -> MutationExecutor {
        MutationExecutor::new(Arc::new(self.clone()), "id")
    }

    async fn record(&self, call: Call) -> Result<Value> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let fallback = match call.verb {
            "delete" => json!({ "id": call.key.clone() }),
            _ => call.body.clone(),
        };
        self.calls.lock().await.push(call);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(fallback))
    }
}

#[async_trait]
impl RemoteDataLayer for RecordingRemote {
    async fn insert(&self, resource: &str, payload: &Value) -> Result<Value> {
        self.record(Call {
            verb: "insert",
            resource: resource.to_string(),
            key: None,
            body: payload.clone(),
        })
        .await
    }

    async fn update(&self, resource: &str, key: &Value, changes: &Value) -> Result<Value> {
        self.record(Call {
            verb: "update",
            resource: resource.to_string(),
            key: Some(key.clone()),
            body: changes.clone(),
        })
        .await
    }

    async fn delete(&self, resource: &str, key: &Value) -> Result<Value> {
        self.record(Call {
            verb: "delete",
            resource: resource.to_string(),
            key: Some(key.clone()),
            body: Value::Null,
        })
        .await
    }
}
