//! Integration tests for the hybrid search engine.
//!
//! Uses deterministic embedder and similarity stubs so scoring behavior
//! is exact, plus the real exact-scan provider for the full path.

use std::sync::Arc;

use async_trait::async_trait;
use oerharvest_core::embed::{vec_to_blob, EmbedError, SimilarityError};
use oerharvest_core::{
    CatalogStore, Database, Embedder, ExactScanProvider, MatchReason, NewSource, NormalizedRecord,
    Protocol, SearchEngine, SearchFilters, SearchSettings, SimilarityProvider,
};

/// Embeds text onto two axes: "algebra" content and "poetry" content.
struct VocabEmbedder;

#[async_trait]
impl Embedder for VocabEmbedder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let lower = text.to_lowercase();
        let algebra = if lower.contains("algebra") { 1.0 } else { 0.0 };
        let poetry = if lower.contains("poetry") { 1.0 } else { 0.1 };
        Ok(vec![algebra, poetry])
    }

    fn dims(&self) -> usize {
        2
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn encode(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::NotConfigured)
    }

    fn dims(&self) -> usize {
        2
    }
}

/// Similarity stub returning a fixed hit list.
struct FixedHits(Vec<(i64, f32)>);

#[async_trait]
impl SimilarityProvider for FixedHits {
    async fn upsert_point(&self, _id: i64, _vector: &[f32]) -> Result<(), SimilarityError> {
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        _vector: &[f32],
        k: usize,
    ) -> Result<Vec<(i64, f32)>, SimilarityError> {
        Ok(self.0.iter().take(k).copied().collect())
    }
}

async fn seeded_store() -> CatalogStore {
    let db = Database::new_in_memory().await.unwrap();
    CatalogStore::new(db)
}

async fn add_resource(
    store: &CatalogStore,
    source_id: i64,
    title: &str,
    description: &str,
    language: &str,
) -> i64 {
    let record = NormalizedRecord {
        title: title.to_string(),
        url: format!("https://example.com/{}", title.replace(' ', "-").to_lowercase()),
        description: description.to_string(),
        language: language.to_string(),
        ..NormalizedRecord::default()
    };
    store
        .upsert_resource(source_id, &record)
        .await
        .unwrap()
        .resource_id
}

async fn source_id(store: &CatalogStore) -> i64 {
    store
        .create_source(&NewSource::new("Seed", Protocol::Api, "https://example.com"))
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_hybrid_merge_amplifies_best_score() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    let id = add_resource(&store, sid, "Linear Algebra", "", "en").await;

    let engine = SearchEngine::new(
        store,
        Arc::new(VocabEmbedder),
        Arc::new(FixedHits(vec![(id, 0.84)])),
        SearchSettings::default(),
    );

    let results = engine
        .try_search("algebra", &SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let hit = &results[0];
    assert_eq!(hit.match_reason, MatchReason::Hybrid);
    // Semantic 0.84 beats keyword 0.6 * 0.7 = 0.42; amplified by 1.15.
    assert!((hit.final_score - 0.966).abs() < 1e-9);
    assert!((hit.similarity_score - 0.84).abs() < 1e-9);
}

#[tokio::test]
async fn test_single_pass_reasons() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    let semantic_only = add_resource(&store, sid, "Matrices and Vectors", "", "en").await;
    let keyword_only = add_resource(&store, sid, "Algebra Workbook", "", "en").await;

    let engine = SearchEngine::new(
        store,
        Arc::new(VocabEmbedder),
        Arc::new(FixedHits(vec![(semantic_only, 0.9)])),
        SearchSettings::default(),
    );

    let results = engine
        .try_search("algebra", &SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    let semantic = results.iter().find(|r| r.resource.id == semantic_only).unwrap();
    assert_eq!(semantic.match_reason, MatchReason::Semantic);
    assert!((semantic.final_score - 0.9).abs() < 1e-9);

    let keyword = results.iter().find(|r| r.resource.id == keyword_only).unwrap();
    assert_eq!(keyword.match_reason, MatchReason::Keyword);
    assert!(keyword.similarity_score.abs() < 1e-9);
    assert!((keyword.final_score - 0.42).abs() < 1e-9);
}

#[tokio::test]
async fn test_duplicate_similarity_hits_surface_once() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    let id = add_resource(&store, sid, "Linear Maps", "", "en").await;

    let engine = SearchEngine::new(
        store,
        Arc::new(VocabEmbedder),
        Arc::new(FixedHits(vec![(id, 0.9), (id, 0.5)])),
        SearchSettings::default(),
    );

    // Query avoids the title tokens so only the semantic pass fires.
    let results = engine
        .try_search("matrices", &SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].match_reason, MatchReason::Semantic);
    // The best-ranked of the two hits wins.
    assert!((results[0].similarity_score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_quality_boost_breaks_ties() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    let plain = add_resource(&store, sid, "Algebra Basics", "", "en").await;
    let curated = add_resource(&store, sid, "Algebra Basics II", "", "en").await;
    sqlx::query("UPDATE resources SET quality_score = 5.0 WHERE id = ?")
        .bind(curated)
        .execute(store.database().pool())
        .await
        .unwrap();

    let engine = SearchEngine::new(
        store,
        Arc::new(VocabEmbedder),
        Arc::new(FixedHits(Vec::new())),
        SearchSettings::default(),
    );

    let results = engine
        .try_search("algebra", &SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].resource.id, curated);
    // Full quality adds (5/5) * 0.3 on top of the keyword score.
    assert!((results[0].quality_boost - 0.3).abs() < 1e-9);
    assert!((results[0].final_score - results[1].final_score - 0.3).abs() < 1e-9);
    assert_eq!(results[1].resource.id, plain);
}

#[tokio::test]
async fn test_filters_narrow_candidates_before_scoring() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    let english = add_resource(&store, sid, "Algebra in English", "", "en").await;
    let french = add_resource(&store, sid, "Algebra en Francais", "", "fr").await;
    let inactive = add_resource(&store, sid, "Algebra Retired", "", "en").await;
    store.set_resource_active(inactive, false).await.unwrap();

    let engine = SearchEngine::new(
        store,
        Arc::new(VocabEmbedder),
        Arc::new(FixedHits(vec![(english, 0.9), (french, 0.9), (inactive, 0.9)])),
        SearchSettings::default(),
    );

    let filters = SearchFilters {
        language: Some("fr".to_string()),
        ..SearchFilters::default()
    };
    let results = engine.try_search("algebra", &filters, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].resource.id, french);

    // Without the language filter the inactive resource is still excluded.
    let results = engine
        .try_search("algebra", &SearchFilters::default(), None)
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.resource.id != inactive));
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_limit_truncates_ranked_results() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    for i in 0..5 {
        add_resource(&store, sid, &format!("Algebra Volume {i}"), "", "en").await;
    }

    let engine = SearchEngine::new(
        store,
        Arc::new(VocabEmbedder),
        Arc::new(FixedHits(Vec::new())),
        SearchSettings::default(),
    );

    let results = engine
        .try_search("algebra", &SearchFilters::default(), Some(2))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_search_swallows_backend_failure() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    add_resource(&store, sid, "Algebra", "", "en").await;

    let engine = SearchEngine::new(
        store,
        Arc::new(FailingEmbedder),
        Arc::new(FixedHits(Vec::new())),
        SearchSettings::default(),
    );

    // Fallible path surfaces the error, public path degrades to empty.
    assert!(engine
        .try_search("algebra", &SearchFilters::default(), None)
        .await
        .is_err());
    assert!(engine
        .search("algebra", &SearchFilters::default(), None)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_empty_query_returns_nothing() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    add_resource(&store, sid, "Algebra", "", "en").await;

    let engine = SearchEngine::new(
        store,
        Arc::new(VocabEmbedder),
        Arc::new(FixedHits(Vec::new())),
        SearchSettings::default(),
    );
    assert!(engine.search("   ", &SearchFilters::default(), None).await.is_empty());
}

#[tokio::test]
async fn test_exact_scan_end_to_end() {
    let store = seeded_store().await;
    let sid = source_id(&store).await;
    let math = add_resource(&store, sid, "Advanced Algebra", "algebra text", "en").await;
    let poems = add_resource(&store, sid, "Collected Poetry", "poetry anthology", "en").await;

    // Vectors as VocabEmbedder would produce them for each text.
    store
        .set_embedding(math, &vec_to_blob(&[1.0, 0.1]))
        .await
        .unwrap();
    store
        .set_embedding(poems, &vec_to_blob(&[0.0, 1.0]))
        .await
        .unwrap();

    let engine = SearchEngine::new(
        store.clone(),
        Arc::new(VocabEmbedder),
        Arc::new(ExactScanProvider::new(store)),
        SearchSettings::default(),
    );

    let results = engine
        .try_search("algebra", &SearchFilters::default(), None)
        .await
        .unwrap();
    assert_eq!(results[0].resource.id, math);
    assert_eq!(results[0].match_reason, MatchReason::Hybrid);
    assert!(results[0].final_score > results.last().unwrap().final_score);
}
