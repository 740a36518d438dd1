//! Configuration settings for Klipp.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub transcription: TranscriptionSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub search: SearchSettings,
    pub pipeline: PipelineSettings,
    pub media: MediaSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory rooting all application data. The `DATA_DIR` environment
    /// variable overrides this at load time.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// ASR model to use.
    pub model: String,
    /// Optional language hint passed to the ASR model.
    pub language: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: None,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Model used for the search index and query embeddings.
    pub model: String,
    /// Dimensions of the search embeddings.
    pub dimensions: u32,
    /// Lighter model used for sentence similarity while chunking.
    pub chunk_model: String,
    /// Dimensions of the chunking embeddings.
    pub chunk_dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            chunk_model: "text-embedding-3-small".to_string(),
            chunk_dimensions: 256,
        }
    }
}

/// Semantic chunking bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Minimum chunk length in characters.
    pub min_chars: usize,
    /// Maximum chunk length in characters.
    pub max_chars: usize,
    /// Minimum chunk duration in seconds.
    pub min_seconds: f64,
    /// Maximum chunk duration in seconds.
    pub max_seconds: f64,
    /// Cosine similarity below which adjacent sentences split.
    pub similarity_threshold: f32,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            min_chars: 80,
            max_chars: 350,
            min_seconds: 5.0,
            max_seconds: 20.0,
            similarity_threshold: 0.55,
        }
    }
}

/// Search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Default number of results.
    pub top_k: usize,
    /// Size of the query-embedding LRU cache.
    pub query_cache_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 20,
            query_cache_size: 512,
        }
    }
}

/// Pipeline scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Number of pipeline workers.
    pub workers: usize,
    /// Accelerator tokens; must not exceed `workers`.
    pub accelerator_permits: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            accelerator_permits: 2,
        }
    }
}

/// Media handling settings (watcher, clip cutting).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// File extensions recognized as video.
    pub video_extensions: Vec<String>,
    /// Seconds between watcher scans of the video directory.
    pub watch_interval_secs: u64,
    /// FFmpeg CRF for precise clip cuts.
    pub ffmpeg_crf: u32,
    /// FFmpeg preset for precise clip cuts.
    pub ffmpeg_preset: String,
    /// Timeout in seconds for a single FFmpeg invocation.
    pub ffmpeg_timeout_secs: u64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            video_extensions: ["mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            watch_interval_secs: 5,
            ffmpeg_crf: 23,
            ffmpeg_preset: "fast".to_string(),
            ffmpeg_timeout_secs: 300,
        }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or the default location if None.
    ///
    /// The `DATA_DIR` environment variable always overrides the configured
    /// data directory.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let mut settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Settings::default()
        };

        if let Ok(dir) = std::env::var("DATA_DIR") {
            if !dir.is_empty() {
                settings.general.data_dir = dir;
            }
        }

        Ok(settings)
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::KlippError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("klipp")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Path of the catalog database file.
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir().join("klipp.db")
    }

    /// Directory holding the persistent vector store.
    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir().join("vectors")
    }

    /// Directory watched for incoming video files.
    pub fn video_dir(&self) -> PathBuf {
        self.data_dir().join("videos")
    }

    /// Directory receiving cut clips.
    pub fn clips_dir(&self) -> PathBuf {
        self.data_dir().join("clips")
    }

    /// Create all data directories.
    pub fn ensure_dirs(&self) -> crate::error::Result<()> {
        for dir in [
            self.data_dir(),
            self.vector_dir(),
            self.video_dir(),
            self.clips_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Whether a path has a recognized video extension.
    pub fn is_video_file(&self, path: &std::path::Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.media.video_extensions.iter().any(|v| v == &e)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.chunking.min_chars, 80);
        assert_eq!(s.chunking.max_chars, 350);
        assert_eq!(s.pipeline.workers, 2);
        assert!(s.pipeline.accelerator_permits <= s.pipeline.workers);
    }

    #[test]
    fn test_video_extension_check() {
        let s = Settings::default();
        assert!(s.is_video_file(std::path::Path::new("talk.MP4")));
        assert!(!s.is_video_file(std::path::Path::new("notes.txt")));
    }
}
