//! Local backend: multi-step engine fan-out.
//!
//! Transcription shells out to the local engine once per media chunk and
//! merges the per-chunk results onto the batch origin; summarization is a
//! single engine call with the request piped over stdin. The call count
//! is an implementation detail; above the `Provider` trait this backend
//! looks identical to the cloud one.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::ProviderError;

use super::{
    DraftCard, MediaChunk, Provider, RawObservation, SummarizeRequest, TranscribeRequest,
    SUMMARIZE_INSTRUCTIONS,
};

/// Local engine backend using subprocess calls.
pub struct LocalProvider {
    binary_path: String,
    model: String,
    call_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EngineTranscription {
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct EngineCards {
    cards: Vec<DraftCard>,
}

impl LocalProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            binary_path: config.engine_binary.clone(),
            model: config.model.clone(),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Run one engine invocation, optionally piping `stdin_payload`, and
    /// return stdout.
    async fn run_engine(
        &self,
        args: &[&str],
        stdin_payload: Option<String>,
    ) -> Result<String, ProviderError> {
        let mut command = Command::new(&self.binary_path);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            ProviderError::Configuration(format!(
                "failed to spawn engine '{}': {e}",
                self.binary_path
            ))
        })?;

        if let Some(payload) = stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(payload.as_bytes())
                    .await
                    .map_err(|e| ProviderError::Transient(format!("engine stdin: {e}")))?;
                // Drop stdin to signal EOF
            }
        } else {
            drop(child.stdin.take());
        }

        let output = timeout(self.call_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ProviderError::Transient(format!(
                    "engine call timed out after {:?}",
                    self.call_timeout
                ))
            })?
            .map_err(|e| ProviderError::Transient(format!("engine wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Transient(format!(
                "engine exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| ProviderError::MalformedResponse(format!("engine output not UTF-8: {e}")))
    }

    async fn transcribe_chunk(
        &self,
        chunk: &MediaChunk,
    ) -> Result<Vec<RawObservation>, ProviderError> {
        // The engine writes <stem>.json into the output directory
        let temp_dir = tempfile::tempdir()
            .map_err(|e| ProviderError::Transient(format!("failed to create temp dir: {e}")))?;

        let path = chunk.path.to_string_lossy().to_string();
        let output_dir = temp_dir.path().to_string_lossy().to_string();
        self.run_engine(
            &[
                "transcribe",
                "--model",
                &self.model,
                "--output-dir",
                &output_dir,
                "--output-format",
                "json",
                &path,
            ],
            None,
        )
        .await?;

        let stem = chunk.path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{stem}.json"));
        let content = tokio::fs::read_to_string(&json_path).await.map_err(|e| {
            ProviderError::MalformedResponse(format!(
                "engine wrote no output for {}: {e}",
                chunk.path.display()
            ))
        })?;

        let parsed: EngineTranscription = serde_json::from_str(&content)
            .map_err(|e| ProviderError::MalformedResponse(format!("{e}: {content}")))?;

        // Chunk-relative times are rebased onto the batch origin
        Ok(parsed
            .observations
            .into_iter()
            .map(|obs| RawObservation {
                start_secs: obs.start_secs + chunk.offset_secs,
                end_secs: obs.end_secs + chunk.offset_secs,
                text: obs.text,
            })
            .collect())
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<Vec<RawObservation>, ProviderError> {
        let mut merged = Vec::new();
        for chunk in &request.chunks {
            debug!(
                batch_id = %request.batch_id,
                chunk = %chunk.path.display(),
                offset_secs = chunk.offset_secs,
                "transcribing chunk"
            );
            merged.extend(self.transcribe_chunk(chunk).await?);
        }
        Ok(merged)
    }

    async fn summarize_into_cards(
        &self,
        request: &SummarizeRequest,
    ) -> Result<Vec<DraftCard>, ProviderError> {
        let payload = json!({
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

        let body = serde_json::to_string(&payload)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let stdout = self
            .run_engine(&["summarize", "--model", &self.model], Some(body))
            .await?;

        let parsed: EngineCards = serde_json::from_str(&stdout)
            .map_err(|e| ProviderError::MalformedResponse(format!("{e}: {stdout}")))?;
        Ok(parsed.cards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use chrono::Utc;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn provider_with_binary(binary: &str) -> LocalProvider {
        let config = ProviderConfig {
            engine_binary: binary.to_string(),
            ..Default::default()
        };
        LocalProvider::new(&config)
    }

    #[tokio::test]
    async fn test_missing_binary_is_configuration_error() {
        let provider = provider_with_binary("/nonexistent/dayline-engine");
        let request = TranscribeRequest {
            batch_id: Uuid::new_v4(),
            origin: Utc::now(),
            duration_secs: 15.0,
            chunks: vec![MediaChunk {
                path: PathBuf::from("/tmp/chunk.mp4"),
                offset_secs: 0.0,
                duration_secs: 15.0,
            }],
        };

        let err = provider.transcribe(&request).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chunk_results_rebased_onto_batch_origin() {
        use std::os::unix::fs::PermissionsExt;

        // Fake engine: always reports one observation at [0, 15]s.
        // Arguments: transcribe --model M --output-dir DIR --output-format json FILE
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("engine.sh");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "base=$(basename \"$8\")\n",
                "echo '{\"observations\":[{\"start_secs\":0.0,\"end_secs\":15.0,\"text\":\"editor open\"}]}' > \"$5/${base%.*}.json\"\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let provider = provider_with_binary(&script.to_string_lossy());
        let request = TranscribeRequest {
            batch_id: Uuid::new_v4(),
            origin: Utc::now(),
            duration_secs: 45.0,
            chunks: vec![
                MediaChunk {
                    path: PathBuf::from("/tmp/chunk-0.mp4"),
                    offset_secs: 0.0,
                    duration_secs: 15.0,
                },
                MediaChunk {
                    path: PathBuf::from("/tmp/chunk-2.mp4"),
                    offset_secs: 30.0,
                    duration_secs: 15.0,
                },
            ],
        };

        let observations = provider.transcribe(&request).await.unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].start_secs, 0.0);
        assert_eq!(observations[1].start_secs, 30.0);
        assert_eq!(observations[1].end_secs, 45.0);
    }
}
