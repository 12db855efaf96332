//! Remote data layer: the backend that queued mutations are eventually
//! applied to.
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::remote::model::ApiErrorBody;

pub mod model;

/// Generic row-level write API of the backend. Every call either succeeds with
/// the server's view of the affected row or fails with a message.
#[async_trait]
pub trait RemoteDataLayer: Send + Sync {
    async fn insert(&self, resource: &str, payload: &Value) -> Result<Value>;

    async fn update(&self, resource: &str, key: &Value, changes: &Value) -> Result<Value>;

    async fn delete(&self, resource: &str, key: &Value) -> Result<Value>;
}

/// HTTP client for a PostgREST-style REST endpoint (`/rest/v1/{table}`).
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    api_key: String,
    key_field: String,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("key_field", &self.key_field)
            .finish()
    }
}

impl RestClient {
    pub fn new(base_url: &str, api_key: String, key_field: String) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("invalid remote base url {base_url}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(concat!("offline-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            key_field,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.remote.base_url,
            cfg.remote.api_key.clone(),
            cfg.remote.key_field.clone(),
        )
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    fn endpoint(&self, resource: &str, key: Option<&Value>) -> Result<Url> {
        if !is_table_name(resource) {
            bail!("invalid resource name '{}'", resource);
        }
        let mut url = self
            .base_url
            .join(&format!("rest/v1/{resource}"))
            .context("invalid remote base URL")?;
        if let Some(key) = key {
            url.query_pairs_mut()
                .append_pair(&self.key_field, &format!("eq.{}", key_filter_value(key)));
        }
        Ok(url)
    }

    pub fn build_request(
        &self,
        method: Method,
        resource: &str,
        key: Option<&Value>,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let url = self.endpoint(resource, key)?;
        let mut builder = self
            .http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.build().context("failed to build remote request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Value> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "remote request");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach remote data layer")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .with_context(|| format!("failed to read remote response ({status})"))?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|e| e.summary())
                .unwrap_or(body);
            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(%method, %url, "rate limited by remote: {}", message);
            } else {
                warn!(%method, %url, %status, "remote error: {}", message);
            }
            return Err(anyhow!("remote error {}: {}", status, message));
        }

        debug!(%method, %url, %status, "remote response");
        parse_representation(&body)
    }
}

/// Table names are plain identifiers; anything else could resolve outside
/// `rest/v1/`.
fn is_table_name(resource: &str) -> bool {
    !resource.is_empty()
        && resource
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a key for a PostgREST `eq.` filter without JSON string quotes.
fn key_filter_value(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A `return=representation` response is an array of affected rows; callers
/// want the single row they wrote.
fn parse_representation(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(body).context("invalid remote response JSON")?;
    Ok(match value {
        Value::Array(mut rows) if rows.len() == 1 => rows.remove(0),
        Value::Array(rows) if rows.is_empty() => Value::Null,
        other => other,
    })
}

#[async_trait]
impl RemoteDataLayer for RestClient {
    async fn insert(&self, resource: &str, payload: &Value) -> Result<Value> {
        let request = self.build_request(Method::POST, resource, None, Some(payload))?;
        self.execute(request).await
    }

    async fn update(&self, resource: &str, key: &Value, changes: &Value) -> Result<Value> {
        let request = self.build_request(Method::PATCH, resource, Some(key), Some(changes))?;
        self.execute(request).await
    }

    async fn delete(&self, resource: &str, key: &Value) -> Result<Value> {
        let request = self.build_request(Method::DELETE, resource, Some(key), None)?;
        self.execute(request).await?;
        let mut row = Map::new();
        row.insert(self.key_field.clone(), key.clone());
        Ok(Value::Object(row))
    }
}
