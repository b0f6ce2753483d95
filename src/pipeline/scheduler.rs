//! Periodic task scheduler.
//!
//! Runs the pipeline's independent ticks: stale-processing reclaim,
//! batch building, the processing loop (each completed batch triggers a
//! consolidation), and the retention sweep. Each tick is short-lived;
//! provider calls are the only long blocks and run inside the processing
//! loop, off any other tick's path.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::categories::CategoryCatalog;
use crate::config::Config;
use crate::pipeline::{BatchBuilder, BatchProcessor, ProcessOutcome, WindowConsolidator};
use crate::providers::Provider;
use crate::store::Database;

/// Owns the periodic pipeline tasks.
pub struct Scheduler {
    db: Database,
    config: Config,
    batcher: BatchBuilder,
    processor: BatchProcessor,
    consolidator: WindowConsolidator,
}

impl Scheduler {
    pub fn new(
        db: Database,
        config: Config,
        provider: Arc<dyn Provider>,
        catalog: Arc<CategoryCatalog>,
    ) -> Self {
        let batcher = BatchBuilder::new(
            db.clone(),
            config.batching.clone(),
            provider.name().to_string(),
            config.provider.model.clone(),
        );
        let processor = BatchProcessor::new(
            db.clone(),
            provider.clone(),
            config.retry.clone(),
            config.transcription.min_coverage,
            config.consolidation.day_start_hour,
            catalog.fallback().name.clone(),
        );
        let consolidator = WindowConsolidator::new(
            db.clone(),
            provider,
            catalog,
            config.retry.clone(),
            config.consolidation.clone(),
        );

        Self {
            db,
            config,
            batcher,
            processor,
            consolidator,
        }
    }

    /// Run until the shutdown flag flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut batch_tick =
            tokio::time::interval(Duration::from_secs(self.config.batching.tick_secs));
        let mut sweep_tick = tokio::time::interval(Duration::from_secs(
            self.config.retention.sweep_interval_secs,
        ));

        info!(
            batch_tick_secs = self.config.batching.tick_secs,
            sweep_secs = self.config.retention.sweep_interval_secs,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
                _ = batch_tick.tick() => {
                    self.batch_cycle(&shutdown).await;
                }
                _ = sweep_tick.tick() => {
                    if let Err(err) = self.retention_sweep().await {
                        warn!(error = %err, "retention sweep failed");
                    }
                }
            }
        }

        Ok(())
    }

    /// One batch tick: reclaim, build, then drain pending batches.
    async fn batch_cycle(&self, shutdown: &watch::Receiver<bool>) {
        let now = Utc::now();

        let stale_cutoff =
            now - chrono::Duration::seconds(self.config.retention.stale_processing_secs as i64);
        match self.db.reclaim_stale_processing(stale_cutoff, now).await {
            Ok(0) => {}
            Ok(reclaimed) => info!(reclaimed, "reclaimed stale processing batches"),
            Err(err) => warn!(error = %err, "stale reclaim failed"),
        }

        if let Err(err) = self.batcher.build_ready_batches(now).await {
            warn!(error = %err, "batch build failed");
        }

        // Drain pending batches one at a time; each completion triggers
        // a consolidation of the trailing window.
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.processor.process_next(Utc::now(), shutdown).await {
                Ok(Some(ProcessOutcome::Completed { batch_id })) => {
                    match self.consolidator.consolidate(batch_id, Utc::now()).await {
                        Ok(outcome) => {
                            info!(batch_id = %batch_id, ?outcome, "consolidation finished")
                        }
                        Err(err) => warn!(batch_id = %batch_id, error = %err, "consolidation failed"),
                    }
                }
                Ok(Some(ProcessOutcome::Failed { .. })) => {}
                Ok(Some(ProcessOutcome::Abandoned { .. })) => break,
                Ok(Some(ProcessOutcome::ReturnedToPending { .. })) => {
                    // Configuration problem; retrying immediately would spin
                    break;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "batch processing failed");
                    break;
                }
            }
        }
    }

    /// Destroy expired segments (rows and chunk files) and sweep chunk
    /// files no live segment references.
    async fn retention_sweep(&self) -> Result<()> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(self.config.retention.segment_ttl_secs as i64);

        let expired = self.db.segments_ended_before(cutoff).await?;
        if !expired.is_empty() {
            let mut ids = Vec::with_capacity(expired.len());
            for segment in &expired {
                match tokio::fs::remove_file(&segment.file_path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        warn!(path = %segment.file_path.display(), error = %err, "failed to remove chunk file");
                        continue;
                    }
                }
                ids.push(segment.id);
            }
            let removed = ids.len();
            self.db.destroy_segments(ids).await?;
            info!(removed, "retention sweep removed expired segments");
        }

        self.sweep_orphan_chunks(cutoff).await;
        Ok(())
    }

    /// Remove old chunk files that no live segment row references
    /// (e.g. written while the pipeline was down and already superseded).
    async fn sweep_orphan_chunks(&self, cutoff: chrono::DateTime<Utc>) {
        let live: HashSet<PathBuf> = match self.db.live_segment_paths().await {
            Ok(paths) => paths.into_iter().collect(),
            Err(err) => {
                warn!(error = %err, "failed to list live segments, skipping orphan sweep");
                return;
            }
        };

        let recordings = self.config.recordings_dir();
        for extension in ["mp4", "mov"] {
            let pattern = format!("{}/*.{extension}", recordings.display());
            let entries = match glob::glob(&pattern) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, "invalid orphan sweep pattern");
                    continue;
                }
            };

            for entry in entries.flatten() {
                if live.contains(&entry) {
                    continue;
                }

                let old_enough = std::fs::metadata(&entry)
                    .and_then(|m| m.modified())
                    .map(|mtime| chrono::DateTime::<Utc>::from(mtime) < cutoff)
                    .unwrap_or(false);

                if old_enough {
                    if let Err(err) = tokio::fs::remove_file(&entry).await {
                        warn!(path = %entry.display(), error = %err, "failed to remove orphan chunk");
                    }
                }
            }
        }
    }
}
