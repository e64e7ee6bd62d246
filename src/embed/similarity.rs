//! Similarity search backends.
//!
//! [`ExactScanProvider`] scans catalog vectors directly; it is exact and
//! has no external dependency, which keeps small and mid-size catalogs
//! simple. [`RemoteAnnProvider`] delegates to an approximate
//! nearest-neighbor service for deployments where a full scan is too
//! slow. The two are interchangeable behind [`SimilarityProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::store::CatalogStore;

use super::{blob_to_vec, cosine_similarity};

/// Errors from similarity search backends.
#[derive(Debug, Error)]
pub enum SimilarityError {
    /// Reading catalog vectors failed.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    /// The ANN service call failed.
    #[error("similarity request to {url} failed: {detail}")]
    Request {
        /// Service URL.
        url: String,
        /// What went wrong.
        detail: String,
    },
}

/// Trait for similarity search backends.
#[async_trait]
pub trait SimilarityProvider: Send + Sync {
    /// Registers or refreshes one vector in the backend's index.
    ///
    /// # Errors
    ///
    /// Returns [`SimilarityError`] when the index cannot be updated.
    async fn upsert_point(&self, id: i64, vector: &[f32]) -> Result<(), SimilarityError>;

    /// Returns up to `k` `(resource_id, score)` pairs, best first.
    ///
    /// # Errors
    ///
    /// Returns [`SimilarityError`] when the backend is unavailable.
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(i64, f32)>, SimilarityError>;
}

/// Exact cosine scan over the catalog's stored vectors.
pub struct ExactScanProvider {
    store: CatalogStore,
}

impl ExactScanProvider {
    /// Builds the provider over a catalog store.
    #[must_use]
    pub fn new(store: CatalogStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SimilarityProvider for ExactScanProvider {
    /// No-op: the catalog BLOB column is the index.
    async fn upsert_point(&self, _id: i64, _vector: &[f32]) -> Result<(), SimilarityError> {
        Ok(())
    }

    #[instrument(skip(self, vector))]
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(i64, f32)>, SimilarityError> {
        let mut scored: Vec<(i64, f32)> = self
            .store
            .embedded_vectors()
            .await?
            .into_iter()
            .map(|(id, blob)| (id, cosine_similarity(vector, &blob_to_vec(&blob))))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

#[derive(Serialize)]
struct UpsertPointRequest<'a> {
    id: i64,
    vector: &'a [f32],
}

#[derive(Serialize)]
struct NearestRequest<'a> {
    vector: &'a [f32],
    limit: usize,
}

#[derive(Deserialize)]
struct NearestResponse {
    result: Vec<NearestHit>,
}

#[derive(Deserialize)]
struct NearestHit {
    id: i64,
    score: f32,
}

/// Similarity backend over an external ANN service.
///
/// Speaks a small JSON API: POST `/points` to upsert, POST `/search`
/// to query.
pub struct RemoteAnnProvider {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteAnnProvider {
    /// Builds the provider against a service base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request_error(&self, path: &str, detail: impl Into<String>) -> SimilarityError {
        SimilarityError::Request {
            url: format!("{}{path}", self.base_url),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl SimilarityProvider for RemoteAnnProvider {
    #[instrument(skip(self, vector))]
    async fn upsert_point(&self, id: i64, vector: &[f32]) -> Result<(), SimilarityError> {
        let response = self
            .client
            .post(format!("{}/points", self.base_url))
            .json(&UpsertPointRequest { id, vector })
            .send()
            .await
            .map_err(|e| self.request_error("/points", e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.request_error(
                "/points",
                format!("HTTP {}", response.status().as_u16()),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, vector))]
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<(i64, f32)>, SimilarityError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&NearestRequest { vector, limit: k })
            .send()
            .await
            .map_err(|e| self.request_error("/search", e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.request_error(
                "/search",
                format!("HTTP {}", response.status().as_u16()),
            ));
        }

        let payload: NearestResponse = response
            .json()
            .await
            .map_err(|e| self.request_error("/search", e.to_string()))?;
        Ok(payload.result.into_iter().map(|hit| (hit.id, hit.score)).collect())
    }
}
