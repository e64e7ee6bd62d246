//! OER Harvest Core Library
//!
//! This library aggregates open educational resource (OER) metadata from
//! heterogeneous external sources (REST APIs, OAI-PMH repositories,
//! CSV/KBART files, MARCXML dumps) into a normalized catalog, then ranks
//! catalog entries against natural-language queries with a blend of
//! semantic similarity and keyword relevance.
//!
//! # Architecture
//!
//! - [`db`] - Database connection and schema management
//! - [`config`] - Settings with defaults and optional JSON file overrides
//! - [`model`] - Sources, harvest jobs, persisted resources, transient records
//! - [`http`] - Retry/backoff HTTP client and per-host throttle
//! - [`normalize`] - Language/resource-type/URL normalization
//! - [`harvest`] - Protocol adapters and the harvest job runner
//! - [`store`] - Catalog persistence with conservative upsert
//! - [`embed`] - Embedding and similarity provider seams
//! - [`search`] - Hybrid semantic + keyword ranking engine

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod embed;
pub mod harvest;
pub mod http;
pub mod model;
pub mod normalize;
pub mod search;
pub mod store;

// Re-export commonly used types
pub use config::{EmbeddingSettings, HttpSettings, SearchSettings, Settings};
pub use db::Database;
pub use embed::{
    Embedder, EmbeddingSignal, ExactScanProvider, RemoteAnnProvider, RemoteEmbedder,
    SimilarityProvider, spawn_embedding_worker,
};
pub use harvest::{FetchOutcome, HarvestError, HarvestRunner, Harvester, RunError, build_harvester};
pub use http::{HttpError, RetryClient, RetryPolicy, Throttle};
pub use model::{
    HarvestJob, JobStatus, NormalizedRecord, Protocol, Resource, SampleRecord, Source, SourceStatus,
};
pub use normalize::{ResourceType, classify_resource_type, normalize_language, normalize_url};
pub use search::{MatchReason, SearchEngine, SearchError, SearchFilters, SearchResult};
pub use store::{CatalogStore, JobOutcome, NewSource, StoreError, UpsertOutcome};
