//! Process-wide model registry.
//!
//! ASR and embedding models are lazy, mutex-guarded singletons: the first
//! caller constructs the instance, later callers get the cached handle.
//! The ASR model and the embedding models must not be co-resident on the
//! accelerator, so `release_asr` is part of the interface rather than a
//! side effect of dropping references, and `settle_accelerator` gives the
//! allocator a moment to reclaim memory between pipeline stages.

use crate::config::Settings;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::Result;
use crate::transcription::{SpeechToText, WhisperSpeechToText};
use lru::LruCache;
use serde::Serialize;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Query-embedding cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Lazy, thread-safe registry for the ASR model and both embedders.
pub struct ModelRegistry {
    asr_model: String,
    dense_model: String,
    dense_dimensions: usize,
    chunk_model: String,
    chunk_dimensions: usize,

    asr: Mutex<Option<Arc<dyn SpeechToText>>>,
    dense: Mutex<Option<Arc<dyn Embedder>>>,
    chunk: Mutex<Option<Arc<dyn Embedder>>>,

    // Injected instances take precedence; tests use these to wire in fakes.
    asr_override: Option<Arc<dyn SpeechToText>>,
    dense_override: Option<Arc<dyn Embedder>>,
    chunk_override: Option<Arc<dyn Embedder>>,

    query_cache: Mutex<LruCache<u64, Vec<f32>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ModelRegistry {
    /// Create a registry that lazily constructs production models.
    pub fn new(settings: &Settings) -> Self {
        Self {
            asr_model: settings.transcription.model.clone(),
            dense_model: settings.embedding.model.clone(),
            dense_dimensions: settings.embedding.dimensions as usize,
            chunk_model: settings.embedding.chunk_model.clone(),
            chunk_dimensions: settings.embedding.chunk_dimensions as usize,
            asr: Mutex::new(None),
            dense: Mutex::new(None),
            chunk: Mutex::new(None),
            asr_override: None,
            dense_override: None,
            chunk_override: None,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(settings.search.query_cache_size)
                    .unwrap_or(NonZeroUsize::MIN),
            )),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Create a registry with injected components (used by tests).
    pub fn with_components(
        settings: &Settings,
        asr: Arc<dyn SpeechToText>,
        dense: Arc<dyn Embedder>,
        chunk: Arc<dyn Embedder>,
    ) -> Self {
        let mut registry = Self::new(settings);
        registry.asr_override = Some(asr);
        registry.dense_override = Some(dense);
        registry.chunk_override = Some(chunk);
        registry
    }

    /// The ASR model, constructing it on first use.
    pub fn asr(&self) -> Result<Arc<dyn SpeechToText>> {
        if let Some(asr) = &self.asr_override {
            return Ok(asr.clone());
        }

        let mut slot = self.asr.lock().unwrap();
        if let Some(asr) = slot.as_ref() {
            return Ok(asr.clone());
        }

        info!("Loading ASR model '{}'", self.asr_model);
        let asr: Arc<dyn SpeechToText> = Arc::new(WhisperSpeechToText::new(&self.asr_model));
        *slot = Some(asr.clone());
        Ok(asr)
    }

    /// The dense embedder used for the search index and queries.
    pub fn dense_embedder(&self) -> Result<Arc<dyn Embedder>> {
        if let Some(embedder) = &self.dense_override {
            return Ok(embedder.clone());
        }

        let mut slot = self.dense.lock().unwrap();
        if let Some(embedder) = slot.as_ref() {
            return Ok(embedder.clone());
        }

        info!("Loading embedding model '{}'", self.dense_model);
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::with_config(
            &self.dense_model,
            self.dense_dimensions,
        ));
        *slot = Some(embedder.clone());
        Ok(embedder)
    }

    /// The lighter embedder used for sentence similarity while chunking.
    pub fn chunk_embedder(&self) -> Result<Arc<dyn Embedder>> {
        if let Some(embedder) = &self.chunk_override {
            return Ok(embedder.clone());
        }

        let mut slot = self.chunk.lock().unwrap();
        if let Some(embedder) = slot.as_ref() {
            return Ok(embedder.clone());
        }

        info!("Loading chunking model '{}'", self.chunk_model);
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::with_config(
            &self.chunk_model,
            self.chunk_dimensions,
        ));
        *slot = Some(embedder.clone());
        Ok(embedder)
    }

    /// Drop the ASR model so the accelerator is free for the embedders.
    /// Injected test instances are externally managed and unaffected.
    pub fn release_asr(&self) {
        let mut slot = self.asr.lock().unwrap();
        if slot.take().is_some() {
            info!("Released ASR model");
        }
    }

    /// Let the allocator settle between the ASR and embedding stages.
    pub async fn settle_accelerator(&self) {
        debug!("Waiting for accelerator memory to settle");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    /// Embed a search query through the LRU cache. The key covers the model
    /// id as well as the text, so changing the embedder never serves stale
    /// vectors.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.dense_embedder()?;
        let key = query_cache_key(embedder.model_id(), text);

        {
            let mut cache = self.query_cache.lock().unwrap();
            if let Some(embedding) = cache.get(&key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(embedding.clone());
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let embedding = embedder.embed(text).await?;

        let mut cache = self.query_cache.lock().unwrap();
        cache.put(key, embedding.clone());
        Ok(embedding)
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.query_cache.lock().unwrap();
        CacheStats {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            len: cache.len(),
            capacity: cache.cap().get(),
        }
    }
}

fn query_cache_key(model_id: &str, text: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    model_id.hash(&mut hasher);
    text.hash(&mut hasher);
    hasher.finish()
}
