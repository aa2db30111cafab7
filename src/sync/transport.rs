//! Network edge abstraction. The production `HttpTransport` wraps a
//! blocking `reqwest::Client`; tests substitute `MockTransport`. The Sync
//! Engine is generic over `Transport` the same way the store's own sync
//! scaffolding was generic over a domain applier — one seam, not two.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngramError, PushEntryError, Result};
use crate::model::ChangeOp;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub embedding_model: String,
    pub lore_count: i64,
    pub last_snapshot: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChangeEntry {
    pub sequence: i64,
    pub table_name: String,
    pub entity_id: String,
    pub operation: ChangeOp,
    pub payload: Option<serde_json::Value>,
    pub source_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushRequest {
    pub push_id: String,
    pub source_id: String,
    pub schema_version: i32,
    pub entries: Vec<WireChangeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushAccepted {
    pub accepted: i64,
    pub remote_sequence: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushValidationBody {
    pub accepted: i64,
    pub errors: Vec<PushEntryError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaMismatchBody {
    pub client_version: String,
    pub server_version: String,
    pub detail: String,
}

/// Outcome of one push attempt, already classified per §4.5 step 5.
pub enum PushOutcome {
    Accepted { remote_sequence: i64 },
    IdempotentReplay,
    Validation { errors: Vec<PushEntryError> },
    SchemaMismatch { client_version: String, server_version: String, detail: String },
    Transient(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeltaResponse {
    pub entries: Vec<WireChangeEntry>,
    pub last_sequence: i64,
    pub latest_sequence: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreListItem {
    pub id: String,
    pub record_count: i64,
    pub last_accessed: Option<chrono::DateTime<chrono::Utc>>,
    pub size_bytes: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreListResponse {
    pub stores: Vec<StoreListItem>,
    pub total: i64,
}

/// Outcome of a snapshot request, carrying the `Retry-After` hint when the
/// remote replies 503.
pub enum SnapshotOutcome {
    Body(Vec<u8>),
    Retry { after: Duration },
}

pub trait Transport: Send + Sync {
    fn health(&self) -> Result<HealthResponse>;
    fn snapshot(&self, store_id: &str) -> Result<SnapshotOutcome>;
    fn push(&self, store_id: &str, request: &PushRequest) -> Result<PushOutcome>;
    fn delta(&self, store_id: &str, after: i64, limit: i64) -> Result<DeltaResponse>;
    fn list_stores(&self, prefix: Option<&str>) -> Result<StoreListResponse>;
    fn get_store_info(&self, store_id: &str) -> Result<StoreListItem>;
}

/// Blocking HTTP transport, the production implementation.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
    user_agent: String,
    source_id: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
        source_id: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngramError::Transport(e.to_string()))?;
        Ok(HttpTransport {
            client,
            base_url: base_url.into(),
            api_key,
            user_agent: user_agent.into(),
            source_id,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::blocking::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.client.request(method, url).header("User-Agent", &self.user_agent);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(source_id) = &self.source_id {
            if !source_id.is_empty() {
                req = req.header("X-Recall-Source-ID", source_id);
            }
        }
        req
    }

    fn store_path(store_id: &str, suffix: &str) -> String {
        let encoded = store_id
            .split('/')
            .map(|seg| percent_encoding::utf8_percent_encode(seg, percent_encoding::NON_ALPHANUMERIC).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("/api/v1/stores/{encoded}{suffix}")
    }
}

impl Transport for HttpTransport {
    fn health(&self) -> Result<HealthResponse> {
        let resp = self
            .request(reqwest::Method::GET, "/api/v1/health")
            .send()
            .map_err(|e| EngramError::Transport(e.to_string()))?;
        resp.json().map_err(|e| EngramError::Transport(e.to_string()))
    }

    fn snapshot(&self, store_id: &str) -> Result<SnapshotOutcome> {
        let path = Self::store_path(store_id, "/sync/snapshot");
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .map_err(|e| EngramError::Transport(e.to_string()))?;
        if resp.status().as_u16() == 503 {
            let after = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(60));
            return Ok(SnapshotOutcome::Retry { after });
        }
        let bytes = resp.bytes().map_err(|e| EngramError::Transport(e.to_string()))?;
        Ok(SnapshotOutcome::Body(bytes.to_vec()))
    }

    fn push(&self, store_id: &str, request: &PushRequest) -> Result<PushOutcome> {
        let path = Self::store_path(store_id, "/sync/push");
        let resp = self
            .request(reqwest::Method::POST, &path)
            .json(request)
            .send()
            .map_err(|e| EngramError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let is_replay = resp
            .headers()
            .get("X-Idempotent-Replay")
            .map(|v| v == "true")
            .unwrap_or(false);
        match status {
            200 => {
                if is_replay {
                    return Ok(PushOutcome::IdempotentReplay);
                }
                let body: PushAccepted = resp.json().map_err(|e| EngramError::Transport(e.to_string()))?;
                Ok(PushOutcome::Accepted { remote_sequence: body.remote_sequence })
            }
            409 => {
                let body: SchemaMismatchBody =
                    resp.json().map_err(|e| EngramError::Transport(e.to_string()))?;
                Ok(PushOutcome::SchemaMismatch {
                    client_version: body.client_version,
                    server_version: body.server_version,
                    detail: body.detail,
                })
            }
            422 => {
                let body: PushValidationBody =
                    resp.json().map_err(|e| EngramError::Transport(e.to_string()))?;
                Ok(PushOutcome::Validation { errors: body.errors })
            }
            code if (500..600).contains(&code) => Ok(PushOutcome::Transient(format!("http {code}"))),
            code => Ok(PushOutcome::Transient(format!("unexpected http {code}"))),
        }
    }

    fn delta(&self, store_id: &str, after: i64, limit: i64) -> Result<DeltaResponse> {
        let path = Self::store_path(store_id, &format!("/sync/delta?after={after}&limit={limit}"));
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .map_err(|e| EngramError::Transport(e.to_string()))?;
        resp.json().map_err(|e| EngramError::Transport(e.to_string()))
    }

    fn list_stores(&self, prefix: Option<&str>) -> Result<StoreListResponse> {
        let path = match prefix {
            Some(p) => format!("/api/v1/stores?prefix={}", percent_encoding::utf8_percent_encode(p, percent_encoding::NON_ALPHANUMERIC)),
            None => "/api/v1/stores".to_string(),
        };
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .map_err(|e| EngramError::Transport(e.to_string()))?;
        resp.json().map_err(|e| EngramError::Transport(e.to_string()))
    }

    fn get_store_info(&self, store_id: &str) -> Result<StoreListItem> {
        let path = Self::store_path(store_id, "");
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .map_err(|e| EngramError::Transport(e.to_string()))?;
        resp.json().map_err(|e| EngramError::Transport(e.to_string()))
    }
}
