//! HTTP API server.
//!
//! JSON in/out; client faults surface as 4xx with `{"error": "..."}`,
//! everything else as 500.

use crate::catalog::{SqliteCatalog, VideoRecord, VideoStatus};
use crate::chunking::ChunkingLimits;
use crate::clips::ClipCutter;
use crate::config::Settings;
use crate::error::{KlippError, Result};
use crate::index::Indexer;
use crate::models::ModelRegistry;
use crate::pipeline::{PipelineScheduler, RemoveOutcome};
use crate::search::{HybridSearcher, SearchOptions};
use crate::vector_store::{SqliteVectorStore, VectorStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub settings: Settings,
    pub catalog: Arc<SqliteCatalog>,
    pub vectors: Arc<dyn VectorStore>,
    pub registry: Arc<ModelRegistry>,
    pub searcher: HybridSearcher,
    pub scheduler: Arc<PipelineScheduler>,
    pub indexer: Indexer,
    pub cutter: ClipCutter,
}

impl AppState {
    /// Wire up the full production stack from settings.
    pub fn build(settings: Settings) -> Result<Arc<Self>> {
        settings.ensure_dirs()?;

        let catalog = Arc::new(SqliteCatalog::new(&settings.catalog_path())?);
        let vectors: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::new(&settings.vector_dir().join("store.db"))?);
        let registry = Arc::new(ModelRegistry::new(&settings));

        let searcher = HybridSearcher::new(catalog.clone(), vectors.clone(), registry.clone());
        let scheduler =
            PipelineScheduler::start(catalog.clone(), vectors.clone(), registry.clone(), &settings);
        let indexer = Indexer::new(
            catalog.clone(),
            vectors.clone(),
            registry.clone(),
            ChunkingLimits::from(&settings.chunking),
        );
        let cutter = ClipCutter::new(catalog.clone(), &settings);

        Ok(Arc::new(Self {
            settings,
            catalog,
            vectors,
            registry,
            searcher,
            scheduler,
            indexer,
            cutter,
        }))
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/videos/scan", post(scan_videos))
        .route("/videos/process-pending", post(process_pending))
        .route("/videos", get(list_videos).post(add_video))
        .route("/videos/{video_id}/reprocess", post(reprocess_video))
        .route("/videos/{video_id}", delete(delete_video))
        .route("/videos/{video_id}/transcript", get(video_transcript))
        .route("/videos/{video_id}/metrics", get(video_metrics))
        .route("/search", post(search))
        .route("/queue", get(queue_snapshot))
        .route("/queue/{video_id}", delete(queue_remove))
        .route("/queue/clear", post(queue_clear))
        .route("/clips/manual", post(cut_clip))
        .route("/download", post(download))
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server with the watcher alongside.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let state = AppState::build(settings.clone())?;

    crate::watcher::start(state.catalog.clone(), state.scheduler.clone(), settings);

    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// === Request/Response Types ===

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: KlippError) -> Response {
    let status = if e.is_client_error() {
        match e {
            KlippError::VideoNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

#[derive(Deserialize)]
struct ScanParams {
    #[serde(default)]
    process: bool,
}

#[derive(Serialize)]
struct VideoRef {
    video_id: String,
    title: String,
}

#[derive(Serialize)]
struct ScanResponse {
    added: usize,
    already: usize,
    total_files: usize,
    videos: Vec<VideoRef>,
}

#[derive(Serialize)]
struct ProcessPendingResponse {
    enqueued: usize,
    skipped: usize,
    total: usize,
    videos: Vec<VideoRef>,
}

#[derive(Serialize)]
struct VideoSummary {
    video_id: String,
    title: String,
    channel_name: String,
    duration: Option<i64>,
    thumbnail_url: Option<String>,
    uploaded_at: Option<String>,
    source_url: Option<String>,
    local_path: Option<String>,
    segment_count: i64,
    status_download: &'static str,
    status_transcribe: String,
    status_index: &'static str,
    created_at: String,
}

impl From<VideoRecord> for VideoSummary {
    fn from(v: VideoRecord) -> Self {
        let status_transcribe = match v.status {
            VideoStatus::Transcribed | VideoStatus::Indexed => "done".to_string(),
            VideoStatus::Added => "pending".to_string(),
            other => other.as_str().to_string(),
        };
        Self {
            status_download: if v.local_path.is_some() { "done" } else { "pending" },
            status_transcribe,
            status_index: if v.status == VideoStatus::Indexed { "done" } else { "pending" },
            video_id: v.video_id,
            title: v.title,
            channel_name: v.channel_name.unwrap_or_else(|| "Local".to_string()),
            duration: v.duration,
            thumbnail_url: v.thumbnail_url,
            uploaded_at: v.uploaded_at,
            source_url: v.source_url,
            local_path: v.local_path,
            segment_count: v.segment_count,
            created_at: v.created_at,
        }
    }
}

#[derive(Deserialize)]
struct AddVideoRequest {
    /// `file://` url or plain path of a local file.
    url: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    video_ids: Option<Vec<String>>,
    /// Comma-separated channel names.
    #[serde(default)]
    filter_tags: Option<String>,
    /// Set false for the pure dense path.
    #[serde(default = "default_true")]
    use_fts: bool,
}

fn default_top_k() -> usize {
    20
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct SearchResultRow {
    segment_id: String,
    video_id: String,
    start: f64,
    end: f64,
    text: String,
    score: f32,
}

#[derive(Serialize)]
struct TranscriptSegmentRow {
    segment_id: String,
    start: f64,
    end: f64,
    text: String,
    words: Vec<crate::catalog::Word>,
}

#[derive(Serialize)]
struct TranscriptResponse {
    video_id: String,
    title: String,
    duration: f64,
    segments: Vec<TranscriptSegmentRow>,
}

#[derive(Deserialize)]
struct ManualClipRequest {
    video_id: String,
    start: f64,
    end: f64,
}

#[derive(Deserialize)]
struct DownloadRequest {
    url: String,
    #[serde(default = "default_quality")]
    quality: String,
}

fn default_quality() -> String {
    "720p".to_string()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn scan_videos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanParams>,
) -> Response {
    let video_dir = state.settings.video_dir();
    if !video_dir.exists() {
        return Json(ScanResponse {
            added: 0,
            already: 0,
            total_files: 0,
            videos: Vec::new(),
        })
        .into_response();
    }

    let known = match state.catalog.list_videos() {
        Ok(videos) => videos,
        Err(e) => return error_response(e),
    };
    let known_ids: std::collections::HashSet<String> =
        known.iter().map(|v| v.video_id.clone()).collect();

    let mut added = Vec::new();
    let mut already = 0usize;
    let mut total_files = 0usize;

    let entries = match std::fs::read_dir(&video_dir) {
        Ok(entries) => entries,
        Err(e) => return error_response(e.into()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !state.settings.is_video_file(&path) {
            continue;
        }
        total_files += 1;

        let video_id = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        if known_ids.contains(&video_id) {
            already += 1;
            continue;
        }

        match state
            .catalog
            .insert_video(&video_id, &video_id, path.to_str())
        {
            Ok(true) => added.push(VideoRef {
                video_id: video_id.clone(),
                title: video_id,
            }),
            Ok(false) => already += 1,
            Err(e) => return error_response(e),
        }
    }

    if params.process {
        for video in &added {
            state.scheduler.enqueue(&video.video_id, &video.title);
        }
    }

    let count = added.len();
    added.truncate(20);
    Json(ScanResponse {
        added: count,
        already,
        total_files,
        videos: added,
    })
    .into_response()
}

async fn process_pending(State(state): State<Arc<AppState>>) -> Response {
    let all = match state.catalog.list_videos() {
        Ok(videos) => videos,
        Err(e) => return error_response(e),
    };

    let mut enqueued = Vec::new();
    let mut skipped = 0usize;
    let total = all.len();

    for video in all {
        if video.segment_count > 0 || !state.scheduler.enqueue(&video.video_id, &video.title) {
            skipped += 1;
            continue;
        }
        enqueued.push(VideoRef {
            video_id: video.video_id,
            title: video.title,
        });
    }

    let count = enqueued.len();
    enqueued.truncate(20);
    Json(ProcessPendingResponse {
        enqueued: count,
        skipped,
        total,
        videos: enqueued,
    })
    .into_response()
}

async fn list_videos(State(state): State<Arc<AppState>>) -> Response {
    match state.catalog.list_videos() {
        Ok(videos) => {
            let rows: Vec<VideoSummary> = videos.into_iter().map(VideoSummary::from).collect();
            Json(rows).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn add_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddVideoRequest>,
) -> Response {
    let source = std::path::PathBuf::from(req.url.trim_start_matches("file://"));
    if !source.exists() {
        return error_response(KlippError::FileMissing(source.display().to_string()));
    }

    let video_id = match source.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => stem.to_string(),
        None => {
            return error_response(KlippError::InvalidInput(
                "file has no usable name".to_string(),
            ))
        }
    };

    // Bring the file under the watched directory so deletes own it.
    let dest = state.settings.video_dir().join(
        source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("{}.mp4", video_id).into()),
    );
    if !dest.exists() {
        if let Err(e) = std::fs::copy(&source, &dest) {
            return error_response(e.into());
        }
    }

    let title = req.title.unwrap_or_else(|| video_id.clone());
    match state.catalog.insert_video(&video_id, &title, dest.to_str()) {
        Ok(true) => {
            state.scheduler.enqueue(&video_id, &title);
            Json(serde_json::json!({ "status": "processing_started", "video_id": video_id }))
                .into_response()
        }
        Ok(false) => {
            Json(serde_json::json!({ "status": "already_exists", "video_id": video_id }))
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn reprocess_video(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Response {
    match state.catalog.get_video(&video_id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(KlippError::VideoNotFound(video_id)),
        Err(e) => return error_response(e),
    }

    // Clear the transcript so the force path is unambiguous.
    if let Err(e) = state.catalog.delete_segments(&video_id) {
        return error_response(e);
    }
    if let Err(e) = state.catalog.set_status(&video_id, VideoStatus::Added) {
        return error_response(e);
    }

    state.scheduler.enqueue(&video_id, &video_id);
    Json(serde_json::json!({ "status": "reprocessing_started", "video_id": video_id }))
        .into_response()
}

async fn delete_video(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Response {
    let video = match state.catalog.get_video(&video_id) {
        Ok(Some(video)) => video,
        Ok(None) => return error_response(KlippError::VideoNotFound(video_id)),
        Err(e) => return error_response(e),
    };

    let stats = match state.catalog.delete_video(&video_id) {
        Ok(stats) => stats,
        Err(e) => return error_response(e),
    };
    if let Err(e) = state.vectors.delete_by_video(&video_id).await {
        warn!("Could not delete vectors for {}: {}", video_id, e);
    }

    if let Some(path) = video.local_path {
        let path = std::path::PathBuf::from(path);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not delete media file {:?}: {}", path, e);
            }
        }
    }

    Json(serde_json::json!({ "status": "deleted", "stats": stats })).into_response()
}

async fn video_transcript(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Response {
    let video = match state.catalog.get_video(&video_id) {
        Ok(Some(video)) => video,
        Ok(None) => return error_response(KlippError::VideoNotFound(video_id)),
        Err(e) => return error_response(e),
    };

    let segments = match state.catalog.segments_for(&video_id) {
        Ok(segments) => segments,
        Err(e) => return error_response(e),
    };

    let duration = segments.last().map(|s| s.end_sec).unwrap_or(0.0);
    Json(TranscriptResponse {
        video_id: video.video_id,
        title: video.title,
        duration,
        segments: segments
            .into_iter()
            .map(|s| TranscriptSegmentRow {
                segment_id: s.segment_id,
                start: s.start_sec,
                end: s.end_sec,
                text: s.text,
                words: s.words.unwrap_or_default(),
            })
            .collect(),
    })
    .into_response()
}

async fn video_metrics(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Response {
    match state.indexer.video_metrics(&video_id).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => error_response(e),
    }
}

async fn search(State(state): State<Arc<AppState>>, Json(req): Json<SearchRequest>) -> Response {
    // filter_tags names channels; intersect with any explicit video list.
    let mut video_ids = req.video_ids;
    if let Some(tags) = req.filter_tags.as_deref().filter(|t| !t.trim().is_empty()) {
        let channels: Vec<String> = tags
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let channel_ids = match state.catalog.video_ids_for_channels(&channels) {
            Ok(ids) => ids,
            Err(e) => return error_response(e),
        };
        video_ids = Some(match video_ids {
            Some(explicit) => channel_ids
                .into_iter()
                .filter(|id| explicit.contains(id))
                .collect(),
            None => channel_ids,
        });
    }

    let opts = SearchOptions {
        top_k: req.top_k,
        video_ids,
        use_lexical: req.use_fts,
    };

    match state.searcher.search(&req.query, &opts).await {
        Ok(hits) => {
            let rows: Vec<SearchResultRow> = hits
                .into_iter()
                .map(|h| SearchResultRow {
                    segment_id: h.chunk_id,
                    video_id: h.video_id,
                    start: h.start_sec,
                    end: h.end_sec,
                    text: h.text,
                    score: h.score,
                })
                .collect();
            Json(rows).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn queue_snapshot(State(state): State<Arc<AppState>>) -> Response {
    Json(state.scheduler.snapshot()).into_response()
}

async fn queue_remove(
    State(state): State<Arc<AppState>>,
    Path(video_id): Path<String>,
) -> Response {
    match state.scheduler.remove(&video_id) {
        RemoveOutcome::Removed => {
            Json(serde_json::json!({ "status": "removed", "video_id": video_id })).into_response()
        }
        RemoveOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("{} is not queued", video_id),
            }),
        )
            .into_response(),
        RemoveOutcome::Processing => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("{} is already processing", video_id),
            }),
        )
            .into_response(),
    }
}

async fn queue_clear(State(state): State<Arc<AppState>>) -> Response {
    Json(serde_json::json!({ "cleared": state.scheduler.clear_terminal() })).into_response()
}

async fn cut_clip(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManualClipRequest>,
) -> Response {
    match state.cutter.cut(&req.video_id, req.start, req.end).await {
        Ok(clip) => Json(clip).into_response(),
        Err(e) => error_response(e),
    }
}

async fn download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DownloadRequest>,
) -> Response {
    let video_dir = state.settings.video_dir();
    let downloaded = match crate::download::download_video(&req.url, &req.quality, &video_dir).await
    {
        Ok(d) => d,
        Err(e) => return error_response(e),
    };

    if let Err(e) = state.catalog.insert_video(
        &downloaded.video_id,
        &downloaded.title,
        downloaded.path.to_str(),
    ) {
        return error_response(e);
    }
    if let Err(e) = state.catalog.update_video_metadata(
        &downloaded.video_id,
        downloaded.channel.as_deref(),
        Some(&downloaded.source_url),
        downloaded.duration,
        downloaded.thumbnail_url.as_deref(),
    ) {
        warn!("Could not record download metadata: {}", e);
    }

    state
        .scheduler
        .enqueue(&downloaded.video_id, &downloaded.title);
    Json(serde_json::json!({
        "status": "processing_started",
        "video_id": downloaded.video_id,
        "title": downloaded.title,
    }))
    .into_response()
}
