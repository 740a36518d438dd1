//! Configuration management for Klipp.

mod settings;

pub use settings::{
    ChunkingSettings, EmbeddingSettings, GeneralSettings, MediaSettings, PipelineSettings,
    SearchSettings, Settings, TranscriptionSettings,
};
