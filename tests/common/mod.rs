//! Shared test helpers: a scripted provider and store seeding.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use dayline::domain::Segment;
use dayline::error::ProviderError;
use dayline::providers::{
    DraftCard, Provider, RawObservation, SummarizeRequest, TranscribeRequest,
};
use dayline::store::Database;

/// A provider whose responses are scripted per call, in order.
#[derive(Default)]
pub struct ScriptedProvider {
    transcribe_script: Mutex<VecDeque<Result<Vec<RawObservation>, ProviderError>>>,
    summarize_script: Mutex<VecDeque<Result<Vec<DraftCard>, ProviderError>>>,
    pub transcribe_calls: AtomicU32,
    pub summarize_calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_transcribe(&self, result: Result<Vec<RawObservation>, ProviderError>) {
        self.transcribe_script.lock().unwrap().push_back(result);
    }

    pub fn push_summarize(&self, result: Result<Vec<DraftCard>, ProviderError>) {
        self.summarize_script.lock().unwrap().push_back(result);
    }

    pub fn transcribe_call_count(&self) -> u32 {
        self.transcribe_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_call_count(&self) -> u32 {
        self.summarize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(
        &self,
        _request: &TranscribeRequest,
    ) -> Result<Vec<RawObservation>, ProviderError> {
        self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        self.transcribe_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::MalformedResponse(
                    "unscripted transcribe call".to_string(),
                ))
            })
    }

    async fn summarize_into_cards(
        &self,
        _request: &SummarizeRequest,
    ) -> Result<Vec<DraftCard>, ProviderError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.summarize_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::MalformedResponse(
                    "unscripted summarize call".to_string(),
                ))
            })
    }
}

/// Register `count` contiguous chunk-length segments starting at `base`.
pub async fn seed_contiguous_segments(
    db: &Database,
    base: DateTime<Utc>,
    count: usize,
    chunk_secs: i64,
) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(count);
    for i in 0..count {
        let start = base + Duration::seconds(i as i64 * chunk_secs);
        let segment = Segment::ready(
            start,
            start + Duration::seconds(chunk_secs),
            PathBuf::from(format!("/tmp/dayline-test/chunk-{base}-{i}.mp4")),
        );
        db.register_segment(&segment, None).await.unwrap();
        segments.push(segment);
    }
    segments
}

/// A fast retry policy so transient-failure tests do not sleep.
pub fn fast_retry() -> dayline::providers::RetryPolicy {
    dayline::providers::RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        backoff_multiplier: 2.0,
    }
}
