//! Transcription: ASR capability trait plus the pipeline component that
//! persists raw segments.

mod whisper;

pub use whisper::WhisperSpeechToText;

use crate::catalog::{RawSegment, SqliteCatalog, Word};
use crate::error::{KlippError, Result};
use crate::models::ModelRegistry;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

/// One ASR utterance with optional word timings.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub words: Vec<Word>,
}

/// The full output of an ASR run.
#[derive(Debug, Clone)]
pub struct SpeechTranscript {
    pub segments: Vec<SpeechSegment>,
    /// Detected language code, when the model reports one.
    pub language: Option<String>,
    /// Detection confidence in [0, 1], when the model reports one.
    pub language_confidence: Option<f32>,
}

/// Trait for ASR capabilities that produce segments with word timings.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a media file and return segments with timestamps.
    async fn transcribe(&self, media_path: &Path) -> Result<SpeechTranscript>;

    /// Transcribe with a language hint.
    async fn transcribe_with_language(
        &self,
        media_path: &Path,
        language: &str,
    ) -> Result<SpeechTranscript>;
}

/// Summary returned by a successful transcription run.
#[derive(Debug, Clone)]
pub struct TranscribeSummary {
    pub video_id: String,
    pub segments: usize,
    pub language: Option<String>,
    pub duration_sec: f64,
}

/// Pipeline component that runs ASR on a cataloged video and persists the
/// raw segments.
pub struct Transcriber {
    catalog: Arc<SqliteCatalog>,
    registry: Arc<ModelRegistry>,
    language_hint: Option<String>,
}

impl Transcriber {
    pub fn new(
        catalog: Arc<SqliteCatalog>,
        registry: Arc<ModelRegistry>,
        language_hint: Option<String>,
    ) -> Self {
        Self {
            catalog,
            registry,
            language_hint,
        }
    }

    /// Transcribe a video and store its raw segments.
    ///
    /// Refuses to overwrite an existing transcript — callers that want a
    /// fresh run must delete the segments first, which keeps retries
    /// idempotent. The segment write and the status advance to
    /// `transcribed` happen in one transaction. The ASR model is released
    /// before returning so the next stage can claim the accelerator.
    #[instrument(skip(self))]
    pub async fn transcribe(&self, video_id: &str) -> Result<TranscribeSummary> {
        let video = self
            .catalog
            .get_video(video_id)?
            .ok_or_else(|| KlippError::VideoNotFound(video_id.to_string()))?;

        let local_path = video
            .local_path
            .ok_or_else(|| KlippError::FileMissing(format!("{} has no local file", video_id)))?;
        let path = std::path::PathBuf::from(&local_path);
        if !path.exists() {
            return Err(KlippError::FileMissing(local_path));
        }

        let existing = self.catalog.segment_count(video_id)?;
        if existing > 0 {
            return Err(KlippError::InvalidInput(format!(
                "{} already has {} segments; delete them to re-transcribe",
                video_id, existing
            )));
        }

        let asr = self.registry.asr()?;

        let transcript = match &self.language_hint {
            Some(lang) => asr.transcribe_with_language(&path, lang).await,
            None => asr.transcribe(&path).await,
        };
        let transcript = match transcript {
            Ok(t) => t,
            Err(e) => {
                // Failed decode must not pin the model in accelerator memory.
                self.registry.release_asr();
                return Err(e);
            }
        };

        if let Some(lang) = &transcript.language {
            let confidence = transcript
                .language_confidence
                .map(|c| format!(" ({:.0}%)", c * 100.0))
                .unwrap_or_default();
            info!("Detected language '{}'{}", lang, confidence);
        }

        let segments: Vec<RawSegment> = transcript
            .segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .enumerate()
            .map(|(idx, s)| RawSegment {
                segment_id: format!("{}-{}", video_id, idx),
                video_id: video_id.to_string(),
                start_sec: s.start,
                end_sec: s.end,
                text: s.text.trim().to_string(),
                words: if s.words.is_empty() {
                    None
                } else {
                    Some(s.words.clone())
                },
            })
            .collect();

        let duration_sec = segments.last().map(|s| s.end_sec).unwrap_or(0.0);
        let count = self.catalog.insert_segments(video_id, &segments)?;

        self.registry.release_asr();

        info!("Transcribed {} into {} raw segments", video_id, count);
        Ok(TranscribeSummary {
            video_id: video_id.to_string(),
            segments: count,
            language: transcript.language,
            duration_sec,
        })
    }
}
