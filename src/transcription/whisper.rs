//! OpenAI Whisper ASR implementation.

use super::{SpeechSegment, SpeechToText, SpeechTranscript};
use crate::catalog::Word;
use crate::error::{KlippError, Result};
use crate::openai::create_client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    AudioResponseFormat, CreateTranscriptionRequestArgs, TimestampGranularity,
};
use async_openai::Client;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Whisper-backed ASR with word-level timestamps.
///
/// Video containers are not sent directly: the audio track is extracted to
/// MP3 with ffmpeg first.
pub struct WhisperSpeechToText {
    client: Client<OpenAIConfig>,
    model: String,
}

impl WhisperSpeechToText {
    pub fn new(model: &str) -> Self {
        Self {
            client: create_client(),
            model: model.to_string(),
        }
    }

    /// Extract the audio track of a media file to MP3.
    async fn extract_audio(media_path: &Path, out_path: &Path) -> Result<()> {
        debug!("Extracting audio from {:?}", media_path);

        let result = Command::new("ffmpeg")
            .arg("-i").arg(media_path)
            .arg("-vn")
            .arg("-codec:a").arg("libmp3lame")
            .arg("-qscale:a").arg("2")
            .arg("-y")
            .arg("-loglevel").arg("error")
            .arg(out_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => {
                let err = String::from_utf8_lossy(&out.stderr);
                Err(KlippError::ToolFailed(format!("ffmpeg audio extraction failed: {err}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(KlippError::ToolNotFound("ffmpeg".into()))
            }
            Err(e) => Err(KlippError::ToolFailed(format!("ffmpeg: {e}"))),
        }
    }

    async fn transcribe_inner(
        &self,
        media_path: &Path,
        language: Option<&str>,
    ) -> Result<SpeechTranscript> {
        let temp_dir = tempfile::tempdir()?;
        let audio_path = temp_dir.path().join("audio.mp3");
        Self::extract_audio(media_path, &audio_path).await?;

        let file_bytes = tokio::fs::read(&audio_path).await?;

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(async_openai::types::AudioInput::from_vec_u8(
                "audio.mp3".to_string(),
                file_bytes,
            ))
            .model(&self.model)
            .response_format(AudioResponseFormat::VerboseJson)
            .timestamp_granularities(vec![
                TimestampGranularity::Segment,
                TimestampGranularity::Word,
            ]);

        if let Some(lang) = language {
            request_builder.language(lang);
        }

        let request = request_builder
            .build()
            .map_err(|e| KlippError::Transcription(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(|e| KlippError::OpenAI(format!("Whisper API error: {}", e)))?;

        let words: Vec<Word> = response
            .words
            .map(|ws| {
                ws.iter()
                    .map(|w| Word {
                        word: w.word.trim().to_string(),
                        start: w.start as f64,
                        end: w.end as f64,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if words.is_empty() {
            warn!("No word-level timestamps returned by the ASR model");
        }

        let segments: Vec<SpeechSegment> = match response.segments {
            Some(segs) => segs
                .iter()
                .map(|s| {
                    let (start, end) = (s.start as f64, s.end as f64);
                    SpeechSegment {
                        start,
                        end,
                        text: s.text.trim().to_string(),
                        words: slice_words(&words, start, end),
                    }
                })
                .collect(),
            None => vec![SpeechSegment {
                start: 0.0,
                end: response.duration as f64,
                text: response.text.trim().to_string(),
                words: words.clone(),
            }],
        };

        debug!("Transcribed {} segments, {} words", segments.len(), words.len());

        Ok(SpeechTranscript {
            segments,
            language: Some(response.language),
            // The API reports the language but not a confidence.
            language_confidence: None,
        })
    }
}

/// Words whose midpoint falls inside [start, end).
fn slice_words(words: &[Word], start: f64, end: f64) -> Vec<Word> {
    words
        .iter()
        .filter(|w| {
            let mid = (w.start + w.end) / 2.0;
            mid >= start && mid < end
        })
        .cloned()
        .collect()
}

#[async_trait]
impl SpeechToText for WhisperSpeechToText {
    #[instrument(skip(self), fields(media = %media_path.display()))]
    async fn transcribe(&self, media_path: &Path) -> Result<SpeechTranscript> {
        self.transcribe_inner(media_path, None).await
    }

    async fn transcribe_with_language(
        &self,
        media_path: &Path,
        language: &str,
    ) -> Result<SpeechTranscript> {
        self.transcribe_inner(media_path, Some(language)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64) -> Word {
        Word {
            word: text.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn test_slice_words_by_midpoint() {
        let words = vec![
            word("Hello", 0.0, 0.5),
            word("world.", 0.5, 1.0),
            word("Next", 1.0, 1.4),
        ];

        let first = slice_words(&words, 0.0, 1.0);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].word, "Hello");

        let second = slice_words(&words, 1.0, 2.0);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].word, "Next");
    }
}
