use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_core::codec::{self, EncodeError};
use relay_core::model::Observation;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

const UPSTREAM_BODY_MAX_BYTES: usize = 512;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("could not reach ingestion api: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("ingestion api returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Destination for decoded observations.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    async fn forward(&self, observation: &Observation) -> Result<(), ForwardError>;
}

#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    endpoint_url: String,
}

impl Forwarder {
    /// Builds a client with reqwest's defaults; no request timeout is set.
    pub fn new(endpoint_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build().context("build reqwest client")?;
        Ok(Self::with_client(client, endpoint_url))
    }

    pub fn with_client(client: Client, endpoint_url: impl Into<String>) -> Self {
        Self {
            client,
            endpoint_url: endpoint_url.into(),
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

#[async_trait]
impl ObservationSink for Forwarder {
    async fn forward(&self, observation: &Observation) -> Result<(), ForwardError> {
        let body = codec::encode(observation)?;

        let response = match self
            .client
            .post(&self.endpoint_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => return Err(ForwardError::Transport(error)),
        };

        let status = response.status();
        if !is_failure_status(status) {
            debug!(status = %status, "ingestion api accepted observation");
            return Ok(());
        }

        let body = match response.text().await {
            Ok(text) => truncate_body(&text, UPSTREAM_BODY_MAX_BYTES),
            Err(error) => format!("<unreadable response body: {error}>"),
        };

        Err(ForwardError::Upstream { status, body })
    }
}

/// 4xx and 5xx are failures; every other status counts as delivered.
fn is_failure_status(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

fn truncate_body(body: &str, limit_bytes: usize) -> String {
    if body.len() <= limit_bytes {
        return body.to_string();
    }

    let mut output = String::new();
    for character in body.chars() {
        if output.len() + character.len_utf8() > limit_bytes.saturating_sub(3) {
            break;
        }
        output.push(character);
    }
    output.push_str("...");
    output
}
