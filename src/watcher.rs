//! Directory watcher: registers new files from the video directory and
//! hands them to the pipeline scheduler.

use crate::catalog::SqliteCatalog;
use crate::config::Settings;
use crate::pipeline::PipelineScheduler;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Spawn the polling watcher. It scans the video directory on an interval
/// and enqueues anything the catalog has not seen.
pub fn start(
    catalog: Arc<SqliteCatalog>,
    scheduler: Arc<PipelineScheduler>,
    settings: Settings,
) -> tokio::task::JoinHandle<()> {
    let video_dir = settings.video_dir();
    let interval = Duration::from_secs(settings.media.watch_interval_secs.max(1));

    tokio::spawn(async move {
        info!("Watching {:?} every {:?}", video_dir, interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = scan_once(&catalog, &scheduler, &settings, &video_dir) {
                warn!("Watcher scan failed: {}", e);
            }
        }
    })
}

fn scan_once(
    catalog: &SqliteCatalog,
    scheduler: &PipelineScheduler,
    settings: &Settings,
    video_dir: &std::path::Path,
) -> crate::error::Result<()> {
    if !video_dir.exists() {
        return Ok(());
    }

    for entry in std::fs::read_dir(video_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !settings.is_video_file(&path) {
            continue;
        }

        let video_id = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        if catalog.get_video(&video_id)?.is_some() {
            continue;
        }

        info!("New video in watch directory: {}", video_id);
        catalog.insert_video(&video_id, &video_id, path.to_str())?;
        scheduler.enqueue(&video_id, &video_id);
    }
    Ok(())
}
