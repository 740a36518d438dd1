//! Clip cutting: a thin FFmpeg wrapper that records cut clips in the
//! catalog.

use crate::catalog::{ClipRecord, SqliteCatalog};
use crate::config::Settings;
use crate::error::{KlippError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Seconds trimmed in front of a requested cut so speech is not clipped
/// mid-word.
const SAFETY_PRE: f64 = 0.3;
/// Seconds appended after a requested cut.
const SAFETY_POST: f64 = 0.5;

/// FFmpeg-backed clip cutter.
pub struct ClipCutter {
    catalog: Arc<SqliteCatalog>,
    clips_dir: PathBuf,
    crf: u32,
    preset: String,
    timeout: Duration,
}

impl ClipCutter {
    pub fn new(catalog: Arc<SqliteCatalog>, settings: &Settings) -> Self {
        Self {
            catalog,
            clips_dir: settings.clips_dir(),
            crf: settings.media.ffmpeg_crf,
            preset: settings.media.ffmpeg_preset.clone(),
            timeout: Duration::from_secs(settings.media.ffmpeg_timeout_secs),
        }
    }

    /// Cut a clip with safety margins and frame-accurate re-encoding.
    #[instrument(skip(self))]
    pub async fn cut(&self, video_id: &str, start_sec: f64, end_sec: f64) -> Result<ClipRecord> {
        self.cut_with(video_id, start_sec, end_sec, true, true).await
    }

    /// Cut an arbitrary range exactly as given (no margins).
    pub async fn cut_manual(&self, video_id: &str, start_sec: f64, end_sec: f64) -> Result<ClipRecord> {
        let s = start_sec.min(end_sec).max(0.0);
        let e = (s + 0.1).max(start_sec.max(end_sec));
        self.cut_with(video_id, s, e, true, false).await
    }

    async fn cut_with(
        &self,
        video_id: &str,
        start_sec: f64,
        end_sec: f64,
        precise: bool,
        with_margins: bool,
    ) -> Result<ClipRecord> {
        let video = self
            .catalog
            .get_video(video_id)?
            .ok_or_else(|| KlippError::VideoNotFound(video_id.to_string()))?;
        let source = video
            .local_path
            .ok_or_else(|| KlippError::FileMissing(format!("{} has no local file", video_id)))?;
        let source = PathBuf::from(source);
        if !source.exists() {
            return Err(KlippError::FileMissing(source.display().to_string()));
        }

        let (start, end) = if with_margins {
            ((start_sec - SAFETY_PRE).max(0.0), end_sec + SAFETY_POST)
        } else {
            (start_sec.max(0.0), end_sec)
        };

        std::fs::create_dir_all(&self.clips_dir)?;
        let clip_id = Uuid::new_v4().to_string()[..8].to_string();
        let dest = self.clips_dir.join(format!("{}_{}.mp4", video_id, clip_id));

        self.run_ffmpeg(&source, &dest, start, end, precise).await?;

        let clip = ClipRecord {
            clip_id,
            video_id: video_id.to_string(),
            start_sec: start,
            end_sec: end,
            path: dest.display().to_string(),
        };
        self.catalog.insert_clip(&clip)?;

        info!("Cut clip {} for {} [{:.2}-{:.2}]", clip.clip_id, video_id, start, end);
        Ok(clip)
    }

    /// precise=true re-encodes (frame accurate, slower); false stream-
    /// copies (fast, snaps to keyframes).
    async fn run_ffmpeg(
        &self,
        source: &Path,
        dest: &Path,
        start: f64,
        end: f64,
        precise: bool,
    ) -> Result<()> {
        let duration = (end - start).max(0.1);

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-ss").arg(format!("{:.3}", start))
            .arg("-i").arg(source)
            .arg("-t").arg(format!("{:.3}", duration));

        if precise {
            cmd.arg("-c:v").arg("libx264")
                .arg("-preset").arg(&self.preset)
                .arg("-crf").arg(self.crf.to_string())
                .arg("-c:a").arg("aac")
                .arg("-b:a").arg("192k");
        } else {
            cmd.arg("-c").arg("copy");
        }
        cmd.arg(dest).stdout(Stdio::null()).stderr(Stdio::piped());

        let result = tokio::time::timeout(self.timeout, cmd.output()).await;

        match result {
            Err(_) => {
                warn!("FFmpeg timed out after {:?}", self.timeout);
                Err(KlippError::ToolFailed(format!(
                    "ffmpeg timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(KlippError::ToolNotFound("ffmpeg".into()))
            }
            Ok(Err(e)) => Err(KlippError::ToolFailed(format!("ffmpeg: {e}"))),
            Ok(Ok(out)) if out.status.success() => Ok(()),
            Ok(Ok(out)) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let head: String = stderr.chars().take(500).collect();
                Err(KlippError::ToolFailed(format!("ffmpeg cut failed: {}", head)))
            }
        }
    }
}
