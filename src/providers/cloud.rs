//! Cloud backend: one combined HTTP call per operation.
//!
//! Media chunks are uploaded as multipart parts alongside a JSON metadata
//! part; summarization is a plain JSON call. Rate limits and server
//! errors classify as transient so the retry loop handles them; auth
//! failures surface as configuration errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::credentials::SecretStore;
use crate::error::ProviderError;

use super::{
    DraftCard, Provider, RawObservation, SummarizeRequest, TranscribeRequest,
    SUMMARIZE_INSTRUCTIONS,
};

/// Single-shot HTTP backend.
pub struct CloudProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    credential_key: String,
    secrets: SecretStore,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    cards: Vec<DraftCard>,
}

#[derive(Debug, Serialize)]
struct ChunkMeta {
    offset_secs: f64,
    duration_secs: f64,
}

impl CloudProvider {
    pub fn new(config: &ProviderConfig, secrets: SecretStore) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.call_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            credential_key: config.credential_key.clone(),
            secrets,
        }
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        self.secrets.lookup(&self.credential_key)
    }

    /// Map an HTTP status onto the error taxonomy.
    fn classify_status(status: StatusCode, body: &str) -> ProviderError {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ProviderError::Transient(format!("HTTP {status}: {body}"))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            ProviderError::Configuration(format!("HTTP {status}: check the API key"))
        } else {
            ProviderError::MalformedResponse(format!("HTTP {status}: {body}"))
        }
    }

    fn classify_transport(err: reqwest::Error) -> ProviderError {
        ProviderError::Transient(format!("request failed: {err}"))
    }
}

#[async_trait]
impl Provider for CloudProvider {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<Vec<RawObservation>, ProviderError> {
        let api_key = self.api_key()?;

        let chunk_metas: Vec<ChunkMeta> = request
            .chunks
            .iter()
            .map(|c| ChunkMeta {
                offset_secs: c.offset_secs,
                duration_secs: c.duration_secs,
            })
            .collect();

        let metadata = json!({
            "model": self.model,
            "duration_secs": request.duration_secs,
            "chunks": chunk_metas,
        });

        let mut form = multipart::Form::new().text(
            "metadata",
            serde_json::to_string(&metadata)
                .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?,
        );

        for (index, chunk) in request.chunks.iter().enumerate() {
            let bytes = tokio::fs::read(&chunk.path).await.map_err(|e| {
                ProviderError::Transient(format!(
                    "failed to read chunk {}: {e}",
                    chunk.path.display()
                ))
            })?;
            let file_name = chunk
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("chunk-{index}.mp4"));
            form = form.part(
                format!("chunk_{index}"),
                multipart::Part::bytes(bytes).file_name(file_name),
            );
        }

        debug!(batch_id = %request.batch_id, chunks = request.chunks.len(), "uploading batch for transcription");

        let response = self
            .client
            .post(format!("{}/transcribe", self.endpoint))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(Self::classify_transport)?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        let parsed: TranscribeResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(format!("{e}: {body}")))?;
        Ok(parsed.observations)
    }

    async fn summarize_into_cards(
        &self,
        request: &SummarizeRequest,
    ) -> Result<Vec<DraftCard>, ProviderError> {
        let api_key = self.api_key()?;

        let body = json!({
            "model": self.model,
            "instructions": SUMMARIZE_INSTRUCTIONS,
            "window_start": request.window_start,
            "now": request.now,
            "observations": request.observations.iter().map(|o| json!({
                "start_ts": o.start_ts,
                "end_ts": o.end_ts,
                "text": o.text,
            })).collect::<Vec<_>>(),
            "prior_cards": request.prior_cards.iter().map(|c| json!({
                "start_ts": c.start_ts,
                "end_ts": c.end_ts,
                "title": c.title,
                "summary": c.summary,
                "category": c.category,
            })).collect::<Vec<_>>(),
            "categories": request.categories.iter().map(|c| json!({
                "name": c.name,
                "description": c.description,
            })).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(format!("{}/cards", self.endpoint))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(Self::classify_transport)?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }

        let parsed: SummarizeResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::MalformedResponse(format!("{e}: {text}")))?;
        Ok(parsed.cards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(
            CloudProvider::classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down")
                .is_transient()
        );
        assert!(
            CloudProvider::classify_status(StatusCode::BAD_GATEWAY, "upstream").is_transient()
        );
        assert!(CloudProvider::classify_status(StatusCode::UNAUTHORIZED, "")
            .is_configuration());
        assert!(CloudProvider::classify_status(StatusCode::BAD_REQUEST, "bad payload")
            .is_validation());
    }
}
