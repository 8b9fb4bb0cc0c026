use crate::handler::JobHandler;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Forwards a job payload as a JSON POST to an integration endpoint and
/// returns the JSON response body. Any non-2xx status is a failure.
pub struct HttpForwardHandler {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpForwardHandler {
    pub fn new(endpoint: impl Into<String>, request_timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, endpoint))
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        HttpForwardHandler {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl JobHandler for HttpForwardHandler {
    async fn execute(&self, payload: &Value) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.endpoint))?;

        let status = response.status();
        let body = response.bytes().await?;
        debug!(endpoint = %self.endpoint, %status, bytes = body.len(), "Integration responded");

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            bail!("{} returned {}: {}", self.endpoint, status, text.trim());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .with_context(|| format!("{} returned a non-JSON body", self.endpoint))
    }
}
