use crate::model::{MutationRecord, NewMutation, Operation};
use crate::remote::RemoteDataLayer;
use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::instrument;

/// Anything that can be applied remotely as exactly one write.
pub trait Mutation {
    fn resource(&self) -> &str;
    fn operation(&self) -> Operation;
    fn payload(&self) -> &Value;
}

impl Mutation for NewMutation {
    fn resource(&self) -> &str {
        &self.resource
    }
    fn operation(&self) -> Operation {
        self.operation
    }
    fn payload(&self) -> &Value {
        &self.payload
    }
}

impl Mutation for MutationRecord {
    fn resource(&self) -> &str {
        &self.resource
    }
    fn operation(&self) -> Operation {
        self.operation
    }
    fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Translates a mutation into a single call on the remote data layer. No
/// retries and no knowledge of the queue.
#[derive(Clone)]
pub struct MutationExecutor {
    remote: Arc<dyn RemoteDataLayer>,
    key_field: String,
}

impl MutationExecutor {
    pub fn new(remote: Arc<dyn RemoteDataLayer>, key_field: impl Into<String>) -> Self {
        Self {
            remote,
            key_field: key_field.into(),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    #[instrument(skip_all, fields(resource = mutation.resource(), operation = %mutation.operation()))]
    pub async fn execute<M: Mutation + ?Sized>(&self, mutation: &M) -> Result<Value> {
        let resource = mutation.resource();
        let payload = mutation.payload();
        match mutation.operation() {
            Operation::Create => {
                if !(payload.is_object() || payload.is_array()) {
                    bail!("create payload for {} must be an object or array", resource);
                }
                self.remote.insert(resource, payload).await
            }
            Operation::Update => {
                let (key, changes) = split_key(payload, &self.key_field)?;
                self.remote
                    .update(resource, &key, &Value::Object(changes))
                    .await
            }
            Operation::Delete => {
                let (key, _) = split_key(payload, &self.key_field)?;
                self.remote.delete(resource, &key).await
            }
        }
    }
}

/// Pull the identifying key out of a keyed payload, returning it with the
/// remaining fields.
fn split_key(payload: &Value, key_field: &str) -> Result<(Value, Map<String, Value>)> {
    let Value::Object(fields) = payload else {
        bail!("payload must be an object carrying '{}'", key_field);
    };
    let mut changes = fields.clone();
    let key = changes
        .remove(key_field)
        .filter(|k| !k.is_null())
        .ok_or_else(|| anyhow!("payload is missing key field '{}'", key_field))?;
    Ok((key, changes))
}
