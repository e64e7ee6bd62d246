//! Embedding generation and vector utilities.
//!
//! Embeddings are 384-dimension `f32` vectors stored as little-endian
//! BLOBs next to the resource they describe. Generation is decoupled
//! from harvesting: the upsert path emits an [`EmbeddingSignal`] and a
//! background worker does the slow network call, so a harvest is never
//! blocked on an embedding service.

mod similarity;
mod worker;

pub use similarity::{ExactScanProvider, RemoteAnnProvider, SimilarityError, SimilarityProvider};
pub use worker::{spawn_embedding_worker, EmbeddingSignal};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::config::{EmbeddingSettings, EMBEDDING_DIMENSIONS};

/// Errors from embedding generation.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// No embedding endpoint is configured.
    #[error("embedding service is not configured")]
    NotConfigured,

    /// The embedding service call failed.
    #[error("embedding request to {url} failed: {detail}")]
    Request {
        /// Service URL.
        url: String,
        /// What went wrong.
        detail: String,
    },

    /// The service returned a vector of the wrong dimensionality.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions {
        /// Dimensions the catalog stores.
        expected: usize,
        /// Dimensions the service returned.
        actual: usize,
    },
}

/// Trait for embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encodes one text into an embedding vector.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] when the backend is unavailable or returns
    /// a malformed vector.
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Returns the vector dimensionality this backend produces.
    fn dims(&self) -> usize;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Embedder backed by an HTTP embedding service.
///
/// Expects a JSON API: POST `{"text": ...}`, reply `{"embedding": [...]}`.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteEmbedder {
    /// Builds the embedder from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::NotConfigured`] when no endpoint is set.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, EmbedError> {
        let endpoint = settings.endpoint.clone().ok_or(EmbedError::NotConfigured)?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    /// Builds the embedder against an explicit endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    #[instrument(skip(self, text), fields(endpoint = %self.endpoint, chars = text.len()))]
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| EmbedError::Request {
                url: self.endpoint.clone(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EmbedError::Request {
                url: self.endpoint.clone(),
                detail: format!("HTTP {}", response.status().as_u16()),
            });
        }

        let payload: EmbedResponse = response.json().await.map_err(|e| EmbedError::Request {
            url: self.endpoint.clone(),
            detail: e.to_string(),
        })?;

        if payload.embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(EmbedError::Dimensions {
                expected: EMBEDDING_DIMENSIONS,
                actual: payload.embedding.len(),
            });
        }
        Ok(payload.embedding)
    }

    fn dims(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

/// Encodes a vector as little-endian bytes for BLOB storage.
#[must_use]
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decodes a BLOB back into a float vector.
///
/// Trailing bytes that do not fill a whole `f32` are ignored.
#[must_use]
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors, mismatched lengths, or zero norms.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
