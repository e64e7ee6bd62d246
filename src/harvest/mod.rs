//! Protocol adapters and the harvest job runner.
//!
//! Every external protocol is handled by one adapter implementing the
//! [`Harvester`] trait; retry/backoff, job bookkeeping, and upsert logic
//! live in one shared orchestration path ([`HarvestRunner`]), not per
//! adapter.
//!
//! # Architecture
//!
//! - [`Harvester`] - Async trait the four adapters implement
//! - [`ApiHarvester`] - JSON REST APIs with flexible payload shapes
//! - [`OaiPmhHarvester`] - OAI-PMH `ListRecords` with resumption tokens
//! - [`CsvHarvester`] - Delimited text, both generic CSV and KBART TSV
//! - [`MarcxmlHarvester`] - MARC21-XML dumps with a two-tier parser
//! - [`HarvestRunner`] - Job state machine driving adapter + upsert
//!
//! # Example
//!
//! ```no_run
//! use oerharvest_core::{Database, CatalogStore, HarvestRunner, RetryClient, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::default();
//! let db = Database::new(std::path::Path::new("catalog.db")).await?;
//! let store = CatalogStore::new(db);
//! let client = RetryClient::new(&settings.http)?;
//! let runner = HarvestRunner::new(store.clone(), client);
//!
//! let source = store.get_source(1).await?;
//! let job = runner.run(&source).await?;
//! println!("harvest finished: {job}");
//! # Ok(())
//! # }
//! ```

mod api;
mod csv;
mod marcxml;
mod oaipmh;
mod runner;

pub use api::ApiHarvester;
pub use csv::CsvHarvester;
pub use marcxml::MarcxmlHarvester;
pub use oaipmh::OaiPmhHarvester;
pub use runner::{HarvestRunner, RunError};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::http::{HttpError, RetryClient};
use crate::model::{NormalizedRecord, Protocol, Source};

/// Errors that abort a fetch.
///
/// Adapter-level errors are local to one job: the runner converts them
/// into a `failed` job with the diagnostics attached, and nothing above
/// the runner observes them.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Retries exhausted or network failure on the final attempt.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The endpoint answered with a non-success status (no retry for
    /// 4xx other than 429).
    #[error("endpoint returned HTTP {status} for {url}")]
    Endpoint {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response content type, when present.
        content_type: Option<String>,
    },

    /// Malformed payload or unexpected shape.
    #[error("failed to parse response from {url}: {detail}")]
    Parse {
        /// Requested URL.
        url: String,
        /// What went wrong.
        detail: String,
        /// HTTP status of the response, when known.
        status: Option<u16>,
        /// Response content type, when known.
        content_type: Option<String>,
    },

    /// Source configuration prevents building or running the adapter.
    #[error("source misconfigured: {detail}")]
    Config {
        /// What is wrong with the configuration.
        detail: String,
    },
}

impl HarvestError {
    /// Creates a parse error with diagnostic context.
    pub fn parse(
        url: impl Into<String>,
        detail: impl Into<String>,
        status: Option<u16>,
        content_type: Option<String>,
    ) -> Self {
        Self::Parse {
            url: url.into(),
            detail: detail.into(),
            status,
            content_type,
        }
    }

    /// Creates a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Diagnostic details attached to the job record when a fetch fails:
    /// status code, content type, and URL where available.
    #[must_use]
    pub fn diagnostics(&self) -> serde_json::Value {
        match self {
            Self::Http(HttpError::Status { url, status, attempts }) => json!({
                "url": url,
                "status": status,
                "attempts": attempts,
            }),
            Self::Http(HttpError::Network { url, .. } | HttpError::Timeout { url })
            | Self::Http(HttpError::InvalidUrl { url }) => json!({ "url": url }),
            Self::Http(HttpError::Build(_)) => json!({}),
            Self::Endpoint {
                url,
                status,
                content_type,
            } => json!({
                "url": url,
                "status": status,
                "content_type": content_type,
            }),
            Self::Parse {
                url,
                detail,
                status,
                content_type,
            } => json!({
                "url": url,
                "detail": detail,
                "status": status,
                "content_type": content_type,
            }),
            Self::Config { detail } => json!({ "detail": detail }),
        }
    }
}

/// What a fetch produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Normalized records that passed the acceptance rule.
    pub records: Vec<NormalizedRecord>,
    /// Pages / resumption-token requests issued.
    pub pages_processed: i64,
    /// Rows/records the adapter saw and rejected (advisory count).
    pub skipped: i64,
}

/// Trait all protocol adapters implement.
///
/// Adapters transform one source's remote data into normalized records.
/// They enforce the acceptance rule (title AND URL) themselves; rejected
/// records never reach the upsert layer.
///
/// # Object Safety
///
/// Uses `async_trait` to support `Box<dyn Harvester>` dispatch from the
/// runner; Rust 2024 native async traits are not object-safe.
#[async_trait]
pub trait Harvester: Send + Sync {
    /// Returns the adapter name (e.g. "api", "oai_pmh").
    fn name(&self) -> &'static str;

    /// Returns the protocol this adapter speaks.
    fn protocol(&self) -> Protocol;

    /// Fetches and normalizes all records from the source.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError`] when the fetch or parse fails as a whole;
    /// individual record rejection is not an error.
    async fn fetch_records(&self) -> Result<FetchOutcome, HarvestError>;

    /// Probes the source endpoint cheaply; true if it looks reachable.
    async fn test_connection(&self) -> bool;
}

impl std::fmt::Debug for dyn Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester").field("name", &self.name()).finish()
    }
}

/// Builds the adapter matching the source's protocol.
///
/// # Errors
///
/// Returns [`HarvestError::Config`] when the protocol is unknown.
pub fn build_harvester(
    source: &Source,
    client: RetryClient,
) -> Result<Box<dyn Harvester>, HarvestError> {
    let protocol = source
        .protocol()
        .map_err(|raw| HarvestError::config(format!("unknown protocol '{raw}'")))?;

    Ok(match protocol {
        Protocol::Api => Box::new(ApiHarvester::from_source(source, client)),
        Protocol::OaiPmh => Box::new(OaiPmhHarvester::from_source(source, client)),
        Protocol::Csv => Box::new(CsvHarvester::from_source(source, client)),
        Protocol::Marcxml => Box::new(MarcxmlHarvester::from_source(source, client)),
    })
}
