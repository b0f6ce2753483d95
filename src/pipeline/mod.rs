//! The batch/analysis pipeline.
//!
//! - `batcher`: groups ready segments into analysis batches
//! - `processor`: runs transcription for claimed batches, with retry and
//!   call-ledger accounting
//! - `consolidator`: merges a trailing window of observations and prior
//!   cards into a replacement card set, swapped in atomically
//! - `scheduler`: the periodic tasks tying the stages together

pub mod batcher;
pub mod consolidator;
pub mod processor;
pub mod scheduler;

pub use batcher::BatchBuilder;
pub use consolidator::{ConsolidationOutcome, WindowConsolidator};
pub use processor::{BatchProcessor, ProcessOutcome};
pub use scheduler::Scheduler;
