//! Domain types for the dayline pipeline.
//!
//! This module contains the core data structures:
//! - Segment: a raw captured recording unit
//! - Batch: a contiguous group of segments submitted for transcription
//! - Observation: time-ranged transcription output for part of a batch
//! - ActivityCard: a consolidated, user-visible activity record
//! - CallRecord: one row per provider call attempt

pub mod batch;
pub mod call_record;
pub mod card;
pub mod observation;
pub mod segment;

// Re-export commonly used types
pub use batch::{Batch, BatchStatus};
pub use call_record::{CallOperation, CallRecord, CallStatus};
pub use card::{day_key_for, ActivityCard, Interruption};
pub use observation::Observation;
pub use segment::{Segment, SegmentStatus};
