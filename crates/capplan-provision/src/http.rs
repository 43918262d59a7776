//! REST binding of [`ControlPlane`].
//!
//! ```text
//! POST {base}/subscriptions                  creation plan → subscription id
//! GET  {base}/subscriptions/{id}             → status / state
//! POST {base}/subscriptions/{id}/databases   resource spec → database id
//! ```

use async_trait::async_trait;
use capplan_core::{AuthStyle, ControlPlaneConfig, ReservationPlanEntry, ResourceSpec};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult, RemoteError};
use crate::remote::{AggregateState, AggregateStatus, ControlPlane};

const AGGREGATE_ID_KEYS: &[&str] = &["subscription_id", "subscriptionId", "id"];
const RESOURCE_ID_KEYS: &[&str] = &["database_id", "databaseId", "id"];
const MAX_DETAIL_LEN: usize = 512;

#[derive(Serialize)]
struct CreateSubscription<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    account_id: Option<&'a str>,
    cloud_provider: &'a str,
    region: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_method_id: Option<&'a str>,
    creation_plan: &'a [ReservationPlanEntry],
}

pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    auth: AuthStyle,
    api_key: String,
    api_secret: Option<String>,
    account_id: Option<String>,
    cloud_provider: String,
    region: String,
    payment_method_id: Option<String>,
}

impl HttpControlPlane {
    /// Build a client from configuration. The API key, cloud provider and
    /// region must be set.
    pub fn new(config: &ControlPlaneConfig) -> ProvisionResult<Self> {
        let require = |value: &Option<String>, name: &str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ProvisionError::Client(format!("{name} is not set")))
        };
        let api_key = require(&config.api_key, "api key")?;
        let cloud_provider = require(&config.cloud_provider, "cloud provider")?;
        let region = require(&config.region, "region")?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProvisionError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth,
            api_key,
            api_secret: config.api_secret.clone(),
            account_id: config.account_id.clone(),
            cloud_provider,
            region,
            payment_method_id: config.payment_method_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth {
            AuthStyle::Bearer => request.bearer_auth(&self.api_key),
            AuthStyle::ApiKey => {
                let request = request.header("x-api-key", &self.api_key);
                match &self.api_secret {
                    Some(secret) => request.header("x-api-secret-key", secret),
                    None => request,
                }
            }
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        debug!(status = status.as_u16(), bytes = body.len(), "control plane response");

        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| RemoteError::Permanent {
            status: Some(status.as_u16()),
            detail: format!("response is not JSON: {e}"),
        })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create_aggregate(&self, plan: &[ReservationPlanEntry]) -> Result<String, RemoteError> {
        let payload = CreateSubscription {
            account_id: self.account_id.as_deref(),
            cloud_provider: &self.cloud_provider,
            region: &self.region,
            payment_method_id: self.payment_method_id.as_deref(),
            creation_plan: plan,
        };
        let body = self
            .send(self.client.post(self.url("subscriptions")).json(&payload))
            .await?;
        extract_id(&body, AGGREGATE_ID_KEYS)
            .ok_or_else(|| missing_id("subscription", &body))
    }

    async fn aggregate_status(&self, aggregate_id: &str) -> Result<AggregateStatus, RemoteError> {
        let body = self
            .send(self.client.get(self.url(&format!("subscriptions/{aggregate_id}"))))
            .await?;
        Ok(parse_status(&body))
    }

    async fn create_resource(
        &self,
        aggregate_id: &str,
        spec: &ResourceSpec,
    ) -> Result<String, RemoteError> {
        let url = self.url(&format!("subscriptions/{aggregate_id}/databases"));
        let body = self.send(self.client.post(url).json(spec)).await?;
        extract_id(&body, RESOURCE_ID_KEYS).ok_or_else(|| missing_id("database", &body))
    }
}

/// First non-empty id under `keys`, as a string. Numeric ids are accepted.
pub fn extract_id(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match body.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Read `status` (or `state`) from a status response.
pub fn parse_status(body: &Value) -> AggregateStatus {
    let word = ["status", "state"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .unwrap_or_default();
    let state = AggregateState::from_remote(word);
    let mut status = AggregateStatus::new(state);
    if state == AggregateState::Error {
        status.detail = ["error", "message", "description", "detail"]
            .iter()
            .find_map(|k| body.get(*k))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .or_else(|| Some(word.to_string()));
    }
    status
}

/// 408, 429 and 5xx are worth retrying; every other non-2xx is final.
pub fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body.trim()));
    let code = Some(status.as_u16());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        RemoteError::Transient {
            status: code,
            detail,
        }
    } else {
        RemoteError::Permanent {
            status: code,
            detail,
        }
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_builder() {
        RemoteError::permanent(e.to_string())
    } else {
        RemoteError::transient(e.to_string())
    }
}

fn missing_id(what: &str, body: &Value) -> RemoteError {
    RemoteError::permanent(format!(
        "no {what} id in response: {}",
        truncate(&body.to_string())
    ))
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_DETAIL_LEN {
        return s.to_string();
    }
    let mut end = MAX_DETAIL_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
