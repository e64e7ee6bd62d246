//! Hybrid search over the resource catalog.
//!
//! Two scoring passes run over one SQL-filtered candidate set: a
//! semantic pass scoring cosine similarity between the query embedding
//! and stored vectors, and a keyword pass scoring token hits in title
//! and description. Resources found by both passes are merged by taking
//! the better score and amplifying it, on the grounds that agreement
//! between independent signals is stronger evidence of relevance.
//!
//! Each pass adds a quality boost derived from the resource's curated
//! quality score, so editorial quality breaks ties between equally
//! relevant resources.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::SearchSettings;
use crate::embed::{EmbedError, Embedder, SimilarityError, SimilarityProvider};
use crate::model::Resource;
use crate::normalize::ResourceType;
use crate::store::{CatalogStore, StoreError};

/// Quality scores are curated on a 0..=5 scale.
const QUALITY_SCALE: f64 = 5.0;

/// Semantic candidates requested per result slot, to survive filtering.
const CANDIDATE_FACTOR: usize = 3;

/// Errors from the fallible search path.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Query embedding failed.
    #[error(transparent)]
    Embed(#[from] EmbedError),

    /// Similarity backend failed.
    #[error(transparent)]
    Similarity(#[from] SimilarityError),

    /// Catalog query failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which pass produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// Found by embedding similarity only.
    Semantic,
    /// Found by token matching only.
    Keyword,
    /// Found by both passes.
    Hybrid,
}

impl MatchReason {
    /// Returns the label used in serialized responses.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
        }
    }
}

/// SQL-level filters applied before any scoring runs.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Exact language code.
    pub language: Option<String>,
    /// Restrict to one source.
    pub source_id: Option<i64>,
    /// Exact normalized type.
    pub normalized_type: Option<ResourceType>,
    /// Substring match on subject.
    pub subject: Option<String>,
    /// Substring match on license.
    pub license: Option<String>,
    /// Exact ISBN.
    pub isbn: Option<String>,
    /// Exact ISSN.
    pub issn: Option<String>,
    /// Exact OCLC number.
    pub oclc: Option<String>,
    /// Minimum quality score.
    pub min_quality: Option<f64>,
}

/// One ranked search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matched resource.
    pub resource: Resource,
    /// Raw cosine similarity, zero for keyword-only hits.
    pub similarity_score: f64,
    /// Boost contributed by the curated quality score.
    pub quality_boost: f64,
    /// Score the result list is ordered by.
    pub final_score: f64,
    /// Which pass found this resource.
    pub match_reason: MatchReason,
}

/// Hybrid search engine over the catalog.
pub struct SearchEngine {
    store: CatalogStore,
    embedder: Arc<dyn Embedder>,
    similarity: Arc<dyn SimilarityProvider>,
    settings: SearchSettings,
}

impl SearchEngine {
    /// Builds the engine from its collaborators.
    #[must_use]
    pub fn new(
        store: CatalogStore,
        embedder: Arc<dyn Embedder>,
        similarity: Arc<dyn SimilarityProvider>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            similarity,
            settings,
        }
    }

    /// Searches the catalog, swallowing internal failures.
    ///
    /// A broken embedding service or catalog error yields an empty
    /// result list; search degradation is logged, never surfaced.
    #[instrument(skip(self, query, filters), fields(query = %query))]
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Vec<SearchResult> {
        match self.try_search(query, filters, limit).await {
            Ok(results) => results,
            Err(error) => {
                warn!(error = %error, "search failed, returning empty results");
                Vec::new()
            }
        }
    }

    /// Searches the catalog, surfacing failures to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] when the embedding service, similarity
    /// backend, or catalog query fails.
    pub async fn try_search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let limit = limit.unwrap_or(self.settings.default_limit);
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.store.query_resources(filters).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let by_id: HashMap<i64, &Resource> = candidates.iter().map(|r| (r.id, r)).collect();

        let mut merged: Vec<SearchResult> = Vec::new();
        let mut index: HashMap<i64, usize> = HashMap::new();

        for result in self.semantic_pass(query, &by_id, limit).await? {
            // A backend may return the same id twice; hits arrive best
            // first, so only the first occurrence counts.
            if index.contains_key(&result.resource.id) {
                continue;
            }
            index.insert(result.resource.id, merged.len());
            merged.push(result);
        }

        for (id, raw_score) in keyword_pass(query, &candidates) {
            let Some(resource) = by_id.get(&id) else { continue };
            let quality_boost = self.quality_boost(resource);
            let keyword_final = raw_score * self.settings.keyword_weight + quality_boost;

            if let Some(&slot) = index.get(&id) {
                // Found by both passes: best score, amplified.
                let best = merged[slot].final_score.max(keyword_final);
                merged[slot].final_score = best * self.settings.hybrid_boost;
                merged[slot].match_reason = MatchReason::Hybrid;
            } else {
                index.insert(id, merged.len());
                merged.push(SearchResult {
                    resource: (*resource).clone(),
                    similarity_score: 0.0,
                    quality_boost,
                    final_score: keyword_final,
                    match_reason: MatchReason::Keyword,
                });
            }
        }

        // Stable sort keeps pass order as the tie-break.
        merged.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(limit);
        debug!(results = merged.len(), "search complete");
        Ok(merged)
    }

    async fn semantic_pass(
        &self,
        query: &str,
        by_id: &HashMap<i64, &Resource>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let vector = self.embedder.encode(query).await?;
        let hits = self
            .similarity
            .nearest_neighbors(&vector, limit * CANDIDATE_FACTOR)
            .await?;

        let mut results = Vec::new();
        for (id, score) in hits {
            let Some(resource) = by_id.get(&id) else { continue };
            let similarity_score = f64::from(score);
            let quality_boost = self.quality_boost(resource);
            results.push(SearchResult {
                resource: (*resource).clone(),
                similarity_score,
                quality_boost,
                final_score: similarity_score + quality_boost,
                match_reason: MatchReason::Semantic,
            });
        }
        Ok(results)
    }

    fn quality_boost(&self, resource: &Resource) -> f64 {
        (resource.quality_score / QUALITY_SCALE) * self.settings.quality_weight
    }
}

/// Scores candidates by query-token presence in title and description.
///
/// Per token each field contributes at most one hit, so the raw score
/// stays within `[0, 1]`: title hits weigh 0.6, description hits 0.4,
/// averaged over the token count. Resources with no hits are omitted.
fn keyword_pass(query: &str, candidates: &[Resource]) -> Vec<(i64, f64)> {
    let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    #[allow(clippy::cast_precision_loss)]
    let token_count = tokens.len() as f64;

    let mut scored = Vec::new();
    for resource in candidates {
        let title = resource.title.to_lowercase();
        let description = resource.description.to_lowercase();

        let mut title_hits = 0usize;
        let mut description_hits = 0usize;
        for token in &tokens {
            if title.contains(token.as_str()) {
                title_hits += 1;
            }
            if description.contains(token.as_str()) {
                description_hits += 1;
            }
        }
        if title_hits == 0 && description_hits == 0 {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let raw = (title_hits as f64 * 0.6 + description_hits as f64 * 0.4) / token_count;
        scored.push((resource.id, raw));
    }
    scored
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn resource(id: i64, title: &str, description: &str, quality: f64) -> Resource {
        Resource {
            id,
            source_id: 1,
            url: format!("https://example.com/{id}"),
            title: title.to_string(),
            description: description.to_string(),
            license: String::new(),
            publisher: String::new(),
            author: String::new(),
            language: "en".to_string(),
            subject: String::new(),
            resource_type: String::new(),
            normalized_type_str: "unset".to_string(),
            isbn: String::new(),
            issn: String::new(),
            oclc: String::new(),
            doi: String::new(),
            quality_score: quality,
            embedding: None,
            active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_keyword_pass_score_bounds() {
        let candidates = vec![
            resource(1, "open linear algebra", "a full course in linear algebra", 0.0),
            resource(2, "poetry anthology", "unrelated", 0.0),
        ];
        let scored = keyword_pass("linear algebra", &candidates);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].0, 1);
        // Both tokens hit both fields: (2*0.6 + 2*0.4) / 2 = 1.0.
        assert!((scored[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_pass_weighs_title_over_description() {
        let candidates = vec![
            resource(1, "algebra", "", 0.0),
            resource(2, "", "algebra", 0.0),
        ];
        let scored = keyword_pass("algebra", &candidates);
        let title_score = scored.iter().find(|(id, _)| *id == 1).unwrap().1;
        let description_score = scored.iter().find(|(id, _)| *id == 2).unwrap().1;
        assert!((title_score - 0.6).abs() < 1e-9);
        assert!((description_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_pass_partial_token_match() {
        let candidates = vec![resource(1, "organic chemistry", "", 0.0)];
        let scored = keyword_pass("organic biology", &candidates);
        // One of two tokens hits the title: 0.6 / 2.
        assert!((scored[0].1 - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_pass_empty_query() {
        let candidates = vec![resource(1, "anything", "", 0.0)];
        assert!(keyword_pass("   ", &candidates).is_empty());
    }

    #[test]
    fn test_match_reason_labels() {
        assert_eq!(MatchReason::Semantic.as_str(), "semantic");
        assert_eq!(MatchReason::Keyword.as_str(), "keyword");
        assert_eq!(MatchReason::Hybrid.as_str(), "hybrid");
    }
}
