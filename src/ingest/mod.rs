//! Segment ingestion from the capture collaborator.
//!
//! The capture side writes fixed-length chunk files into the recordings
//! directory; this module notices them and registers `ready` segments.

pub mod watcher;

pub use watcher::{IngestConfig, ScanResult, SegmentWatcher};
