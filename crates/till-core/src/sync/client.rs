//! HTTP client for the backend sync API
//!
//! All calls use bearer authentication with the stored API key and explicit
//! timeouts. Transport failures and 5xx/408/429 responses are retryable;
//! 401/403 invalidates the key; a 409 on an order is a permanent conflict
//! the drain worker surfaces instead of retrying.

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::models::{DatasetKey, Operation, OperationKind};

/// One page of a delta pull
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetPage {
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub deleted_ids: Vec<i64>,
    /// New high-water mark; empty when the backend leaves cursor
    /// management to the terminal.
    #[serde(default)]
    pub version: String,
}

impl DatasetPage {
    /// The cursor to store: the backend's marker, or the pull instant when
    /// it did not send one.
    pub fn effective_version(&self) -> String {
        if self.version.trim().is_empty() {
            chrono::Utc::now().to_rfc3339()
        } else {
            self.version.clone()
        }
    }
}

/// How the backend answered an operation submit.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// 2xx; server identity attached for reconciliation.
    Accepted {
        server_order_id: Option<String>,
        server_order_number: Option<String>,
        body: String,
    },
    /// 409; never retried automatically.
    Conflict { reason: String, body: String },
    /// Transport error, 5xx, 408 or 429.
    Retryable { detail: String },
    /// Any other 4xx; the error body is kept on the operation row.
    Permanent { status: u16, body: String },
    /// 401/403; the stored API key is no longer valid.
    AuthRejected,
}

#[derive(Debug, Default, Deserialize)]
struct AcceptedBody {
    #[serde(default, alias = "order_id", alias = "id")]
    server_order_id: Option<serde_json::Value>,
    #[serde(default, alias = "order_number")]
    server_order_number: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ConflictBody {
    #[serde(default, alias = "code")]
    reason: Option<String>,
}

/// Client for dataset pulls and operation submits.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn new(config: &CoreConfig, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn with_api_key(&self, api_key: Option<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Verify the stored API key against the identity endpoint.
    ///
    /// `Err(AuthInvalid)` means the key was rejected; transport errors
    /// propagate so the caller can retry later without clearing the key.
    pub async fn verify_identity(&self) -> Result<()> {
        let url = format!("{}/api/pos/identity", self.base_url);
        let response = self.authorized(self.http.get(&url)).send().await?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            401 | 403 => Err(Error::AuthInvalid),
            status => Err(Error::InvalidData(format!(
                "identity endpoint returned {}",
                status
            ))),
        }
    }

    /// Delta pull for one dataset.
    pub async fn pull_dataset(
        &self,
        key: DatasetKey,
        modified_since: Option<&str>,
    ) -> Result<DatasetPage> {
        let url = format!("{}/api/pos/datasets/{}", self.base_url, key.as_str());
        let mut request = self.authorized(self.http.get(&url)).query(&[("sync", "true")]);
        if let Some(cursor) = modified_since {
            request = request.query(&[("modified_since", cursor)]);
        }

        let response = request.send().await?;
        match response.status().as_u16() {
            200..=299 => {
                let page: DatasetPage = response.json().await?;
                debug!(
                    dataset = %key,
                    rows = page.rows.len(),
                    deleted = page.deleted_ids.len(),
                    "Dataset pulled"
                );
                Ok(page)
            }
            401 | 403 => Err(Error::AuthInvalid),
            status => Err(Error::InvalidData(format!(
                "dataset {} pull returned {}",
                key, status
            ))),
        }
    }

    /// Submit one queued operation, carrying the idempotency key and the
    /// device signature.
    pub async fn submit_operation(
        &self,
        operation: &Operation,
        signature: &str,
        terminal_id: &str,
    ) -> SubmitOutcome {
        let path = match operation.kind {
            OperationKind::Order => "orders",
            OperationKind::Inventory => "inventory",
            OperationKind::Approval => "approvals",
        };
        let url = format!("{}/api/pos/operations/{}", self.base_url, path);

        let request = self
            .authorized(self.http.post(&url))
            .header("Idempotency-Key", operation.id.to_string())
            .header("X-Terminal-Id", terminal_id)
            .header("X-Terminal-Signature", signature)
            .json(&operation.payload);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return SubmitOutcome::Retryable {
                    detail: if e.is_timeout() {
                        format!("timeout: {}", e)
                    } else {
                        format!("network error: {}", e)
                    },
                }
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        match status {
            200..=299 => {
                let parsed: AcceptedBody = serde_json::from_str(&body).unwrap_or_default();
                SubmitOutcome::Accepted {
                    server_order_id: parsed.server_order_id.map(value_to_string),
                    server_order_number: parsed.server_order_number.map(value_to_string),
                    body,
                }
            }
            401 | 403 => SubmitOutcome::AuthRejected,
            409 => {
                let parsed: ConflictBody = serde_json::from_str(&body).unwrap_or_default();
                SubmitOutcome::Conflict {
                    reason: parsed.reason.unwrap_or_else(|| "conflict".to_string()),
                    body,
                }
            }
            408 | 429 => SubmitOutcome::Retryable {
                detail: format!("backend returned {}", status),
            },
            500..=599 => SubmitOutcome::Retryable {
                detail: format!("backend returned {}", status),
            },
            _ => SubmitOutcome::Permanent { status, body },
        }
    }
}

/// Server ids arrive as strings or numbers depending on backend version.
fn value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Is an operation submit outcome terminal for the drain pass?
impl SubmitOutcome {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitOutcome::Retryable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_version_falls_back_to_now() {
        let page = DatasetPage::default();
        let version = page.effective_version();
        assert!(chrono::DateTime::parse_from_rfc3339(&version).is_ok());

        let page = DatasetPage {
            version: "2024-01-01T00:00:00Z".to_string(),
            ..Default::default()
        };
        assert_eq!(page.effective_version(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_accepted_body_aliases() {
        let parsed: AcceptedBody =
            serde_json::from_str(r#"{"order_id": 991, "order_number": "A-17"}"#).unwrap();
        assert_eq!(
            parsed.server_order_id.map(value_to_string).as_deref(),
            Some("991")
        );
        assert_eq!(
            parsed.server_order_number.map(value_to_string).as_deref(),
            Some("A-17")
        );
    }
}
