//! Remote video download: a thin yt-dlp wrapper that fetches metadata,
//! stores the file in the video directory, and hands the rest to the
//! pipeline.

use crate::error::{KlippError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, instrument};
use url::Url;

/// Metadata and location of a downloaded video.
#[derive(Debug, Clone)]
pub struct DownloadedVideo {
    pub video_id: String,
    pub title: String,
    pub path: PathBuf,
    pub duration: Option<i64>,
    pub channel: Option<String>,
    pub thumbnail_url: Option<String>,
    pub source_url: String,
}

/// Fetch remote metadata without downloading.
#[instrument]
pub async fn probe(url: &str) -> Result<serde_json::Value> {
    let url = validate_url(url)?;

    let output = Command::new("yt-dlp")
        .args(["--dump-json", "--no-download", "--no-warnings", "--no-playlist"])
        .arg(url.as_str())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KlippError::ToolNotFound("yt-dlp".to_string())
            } else {
                KlippError::Download(format!("Failed to run yt-dlp: {}", e))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KlippError::Download(format!(
            "yt-dlp metadata fetch failed: {}",
            stderr
        )));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| KlippError::Download(format!("Failed to parse yt-dlp output: {}", e)))?;
    Ok(json)
}

/// Download a remote video into `video_dir` as `{id}.mp4`.
#[instrument(skip(video_dir))]
pub async fn download_video(url: &str, quality: &str, video_dir: &Path) -> Result<DownloadedVideo> {
    let parsed = validate_url(url)?;
    let meta = probe(url).await?;

    let video_id = meta["id"]
        .as_str()
        .ok_or_else(|| KlippError::Download("yt-dlp reported no video id".to_string()))?
        .to_string();
    let title = meta["title"].as_str().unwrap_or(&video_id).to_string();

    std::fs::create_dir_all(video_dir)?;
    let target = video_dir.join(format!("{}.mp4", video_id));

    if !target.exists() {
        info!("Downloading {} ({})", video_id, title);

        let height: u32 = quality.trim_end_matches('p').parse().unwrap_or(720);
        let format = format!("bestvideo[height<={}]+bestaudio/best[height<={}]", height, height);

        let output = Command::new("yt-dlp")
            .arg("--format").arg(&format)
            .arg("--merge-output-format").arg("mp4")
            .arg("--output").arg(video_dir.join("%(id)s.%(ext)s"))
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(parsed.as_str())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    KlippError::ToolNotFound("yt-dlp".to_string())
                } else {
                    KlippError::Download(format!("Failed to run yt-dlp: {}", e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KlippError::Download(format!("yt-dlp failed: {}", stderr)));
        }
        if !target.exists() {
            return Err(KlippError::Download(
                "download finished but the file is missing".to_string(),
            ));
        }
    } else {
        info!("Using cached download for {}", video_id);
    }

    Ok(DownloadedVideo {
        video_id,
        title,
        path: target,
        duration: meta["duration"].as_f64().map(|d| d as i64),
        channel: meta["channel"]
            .as_str()
            .or_else(|| meta["uploader"].as_str())
            .map(|s| s.to_string()),
        thumbnail_url: meta["thumbnail"].as_str().map(|s| s.to_string()),
        source_url: parsed.to_string(),
    })
}

fn validate_url(input: &str) -> Result<Url> {
    Url::parse(input.trim())
        .map_err(|e| KlippError::InvalidInput(format!("not a valid URL: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc123def45").is_ok());
        assert!(validate_url("not a url at all").is_err());
    }
}
