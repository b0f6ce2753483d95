//! dayline - activity timeline analysis pipeline
//!
//! Continuously ingests short recorded segments of a monitored activity
//! stream, groups them into analysis batches, sends each batch to a
//! pluggable AI transcription/summarization backend, and consolidates
//! the results into a time-ordered set of non-overlapping activity cards
//! representing a user's day.
//!
//! # Architecture
//!
//! Data flows leaf-first through the pipeline:
//! segments → batch builder → provider transcribe → observations →
//! window consolidator (observations + prior cards + categories) →
//! provider summarize → atomic card replacement.
//!
//! State transitions are persisted in SQLite and designed to be
//! resumable: a failed batch can always be reset to `pending`, a stale
//! `processing` batch is reclaimed, and card windows are only ever
//! swapped atomically.
//!
//! # Modules
//!
//! - `ingest`: chunk-file watcher registering ready segments
//! - `pipeline`: batcher, processor, consolidator, scheduler
//! - `providers`: the two-operation backend contract and its backends
//! - `store`: SQLite repositories behind a worker thread
//! - `domain`: data structures (Segment, Batch, Observation, ActivityCard,
//!   CallRecord)
//! - `categories`: category catalog and label normalization
//! - `cli`: command-line interface

pub mod categories;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod providers;
pub mod store;

// Re-export main types at crate root for convenience
pub use categories::{Category, CategoryCatalog};
pub use config::Config;
pub use credentials::SecretStore;
pub use domain::{ActivityCard, Batch, BatchStatus, CallRecord, Observation, Segment};
pub use error::ProviderError;
pub use pipeline::{BatchBuilder, BatchProcessor, Scheduler, WindowConsolidator};
pub use providers::{Provider, ProviderBackend};
pub use store::{Database, InstanceLock};
