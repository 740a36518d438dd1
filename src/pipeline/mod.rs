//! Pipeline scheduler: a bounded worker pool draining a FIFO of video
//! jobs, with a counting semaphore guarding accelerator-bound work.
//!
//! The queue map is an observation structure keyed by video id; the FIFO
//! channel orders the actual work. They are kept separate on purpose.
//! Enqueue never blocks — the bounded pool is the backpressure.

use crate::catalog::{SqliteCatalog, VideoStatus};
use crate::chunking::ChunkingLimits;
use crate::config::Settings;
use crate::error::KlippError;
use crate::index::Indexer;
use crate::models::ModelRegistry;
use crate::transcription::Transcriber;
use crate::vector_store::VectorStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, instrument, warn};

/// Lifecycle of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Processing,
    Done,
    Error,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Done | QueueStatus::Error)
    }
}

/// An in-memory queue entry (observation only; never persisted).
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub video_id: String,
    pub status: QueueStatus,
    pub title: String,
    pub added_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a queue removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    /// Running jobs cannot be cancelled; they run to completion.
    Processing,
}

/// The scheduler. Create with [`PipelineScheduler::start`].
pub struct PipelineScheduler {
    queue: Mutex<HashMap<String, QueueEntry>>,
    tx: mpsc::UnboundedSender<String>,
}

struct Worker {
    scheduler: Arc<PipelineScheduler>,
    gpu: Arc<Semaphore>,
    transcriber: Arc<Transcriber>,
    indexer: Arc<Indexer>,
    catalog: Arc<SqliteCatalog>,
    registry: Arc<ModelRegistry>,
}

impl PipelineScheduler {
    /// Spawn the worker pool and return the scheduler handle.
    pub fn start(
        catalog: Arc<SqliteCatalog>,
        vectors: Arc<dyn VectorStore>,
        registry: Arc<ModelRegistry>,
        settings: &Settings,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let scheduler = Arc::new(Self {
            queue: Mutex::new(HashMap::new()),
            tx,
        });

        let workers = settings.pipeline.workers.max(1);
        let permits = settings.pipeline.accelerator_permits.max(1).min(workers);
        let gpu = Arc::new(Semaphore::new(permits));

        let transcriber = Arc::new(Transcriber::new(
            catalog.clone(),
            registry.clone(),
            settings.transcription.language.clone(),
        ));
        let indexer = Arc::new(Indexer::new(
            catalog.clone(),
            vectors,
            registry.clone(),
            ChunkingLimits::from(&settings.chunking),
        ));

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..workers {
            let worker = Worker {
                scheduler: scheduler.clone(),
                gpu: gpu.clone(),
                transcriber: transcriber.clone(),
                indexer: indexer.clone(),
                catalog: catalog.clone(),
                registry: registry.clone(),
            };
            let rx = rx.clone();
            tokio::spawn(async move {
                info!("Pipeline worker {} up", worker_id);
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(video_id) => worker.run_job(&video_id).await,
                        None => break,
                    }
                }
            });
        }

        scheduler
    }

    /// Arm a job for a video. Idempotent: entries already waiting or
    /// processing are left alone; absent or terminal entries are
    /// (re)armed. Never blocks.
    pub fn enqueue(&self, video_id: &str, title: &str) -> bool {
        {
            let mut queue = self.queue.lock().unwrap();
            if let Some(entry) = queue.get(video_id) {
                if !entry.status.is_terminal() {
                    return false;
                }
            }
            queue.insert(
                video_id.to_string(),
                QueueEntry {
                    video_id: video_id.to_string(),
                    status: QueueStatus::Waiting,
                    title: if title.is_empty() {
                        video_id.to_string()
                    } else {
                        title.to_string()
                    },
                    added_at: Utc::now().to_rfc3339(),
                    started_at: None,
                    error: None,
                },
            );
        }
        let _ = self.tx.send(video_id.to_string());
        true
    }

    /// Remove an entry that has not started yet.
    pub fn remove(&self, video_id: &str) -> RemoveOutcome {
        let mut queue = self.queue.lock().unwrap();
        match queue.get(video_id) {
            None => RemoveOutcome::NotFound,
            Some(entry) if entry.status == QueueStatus::Processing => RemoveOutcome::Processing,
            Some(_) => {
                queue.remove(video_id);
                RemoveOutcome::Removed
            }
        }
    }

    /// Purge terminal entries; returns how many were removed.
    pub fn clear_terminal(&self) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|_, entry| !entry.status.is_terminal());
        before - queue.len()
    }

    /// Current queue contents, oldest first.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let queue = self.queue.lock().unwrap();
        let mut entries: Vec<QueueEntry> = queue.values().cloned().collect();
        entries.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.video_id.cmp(&b.video_id)));
        entries
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.queue.lock().unwrap().contains_key(video_id)
    }

    fn update(&self, video_id: &str, f: impl FnOnce(&mut QueueEntry)) {
        let mut queue = self.queue.lock().unwrap();
        if let Some(entry) = queue.get_mut(video_id) {
            f(entry);
        }
    }
}

impl Worker {
    /// Run one queued job: transcribe, swap models off the accelerator,
    /// index. The accelerator token is held across both stages.
    #[instrument(skip(self))]
    async fn run_job(&self, video_id: &str) {
        // Removed while waiting: abort silently.
        if !self.scheduler.contains(video_id) {
            return;
        }

        self.scheduler.update(video_id, |entry| {
            entry.status = QueueStatus::Processing;
            entry.started_at = Some(Utc::now().to_rfc3339());
            entry.error = None;
        });

        let permit = match self.gpu.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        info!("Pipeline start: {}", video_id);

        if let Err(e) = self.transcriber.transcribe(video_id).await {
            self.registry.release_asr();
            self.fail(video_id, e, VideoStatus::ErrorTranscribe);
            return;
        }

        // The ASR model and the embedders must not be co-resident.
        self.registry.release_asr();
        self.registry.settle_accelerator().await;

        match self.indexer.index_video(video_id).await {
            Ok(summary) => {
                info!(
                    "Pipeline done: {} ({} chunks)",
                    video_id, summary.chunks
                );
                self.scheduler.update(video_id, |entry| {
                    entry.status = QueueStatus::Done;
                });
            }
            Err(e) => self.fail(video_id, e, VideoStatus::ErrorIndex),
        }

        drop(permit);
    }

    fn fail(&self, video_id: &str, err: KlippError, status: VideoStatus) {
        error!("Pipeline error for {}: {}", video_id, err);
        // A refused precondition is the caller's problem, not a new state
        // for the video.
        if !err.is_client_error() {
            if let Err(e) = self.catalog.set_status(video_id, status) {
                warn!("Could not record failure status for {}: {}", video_id, e);
            }
        }
        self.scheduler.update(video_id, |entry| {
            entry.status = QueueStatus::Error;
            entry.error = Some(err.to_string());
        });
    }
}
