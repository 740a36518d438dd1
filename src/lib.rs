//! Klipp - Video Search & Clipping Engine
//!
//! A self-hosted engine that ingests long-form video, produces time-aligned
//! transcripts, segments them into semantically coherent chunks, indexes the
//! chunks into a dense vector store and a lexical full-text index, and
//! serves hybrid search over the result. Hits carry timestamps a client can
//! play directly or cut into clips.
//!
//! # Architecture
//!
//! - `config` - Configuration management
//! - `catalog` - Durable store for videos, raw segments, clips, and the
//!   full-text index
//! - `vector_store` - Dense index abstraction
//! - `models` - Lazy registry for the ASR model and embedders
//! - `transcription` - Speech-to-text capability and the transcribe stage
//! - `chunking` - Sentence-aligned semantic chunking
//! - `index` - Chunk, embed, and upsert into both indices
//! - `search` - Hybrid dense + lexical retrieval
//! - `pipeline` - Bounded worker pool with an accelerator token
//! - `server` - HTTP API
//! - `watcher` - Directory ingestion
//! - `clips` / `download` - FFmpeg and yt-dlp wrappers
//!
//! # Example
//!
//! ```rust,no_run
//! use klipp::config::Settings;
//! use klipp::search::SearchOptions;
//! use klipp::server::AppState;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let state = AppState::build(settings)?;
//!
//!     let hits = state
//!         .searcher
//!         .search("how do herons hunt", &SearchOptions::default())
//!         .await?;
//!     for hit in hits {
//!         println!("[{}] {:.1}s: {}", hit.video_id, hit.start_sec, hit.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod chunking;
pub mod cli;
pub mod clips;
pub mod config;
pub mod download;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod openai;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod transcription;
pub mod vector_store;
pub mod watcher;

pub use error::{KlippError, Result};
