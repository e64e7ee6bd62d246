//! Catalog persistence: sources, harvest jobs, and resources.
//!
//! This module provides `SQLite`-backed storage for the harvest pipeline
//! and the catalog it feeds. The central operation is the conservative
//! upsert: resources are keyed by `(source_id, url)` and an incoming
//! record only overwrites a column when it carries a non-empty value,
//! so a sparse re-harvest never erases previously captured metadata.
//!
//! # Overview
//!
//! - [`CatalogStore`] - Main interface for catalog operations
//! - [`NewSource`] - Insert payload for source configuration
//! - [`JobOutcome`] - Terminal counters written when a job finishes
//! - [`StoreError`] - Operation error types

mod error;

pub use error::{StoreDbErrorKind, StoreError};

use std::collections::HashMap;

use sqlx::{QueryBuilder, Row, Sqlite};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::embed::EmbeddingSignal;
use crate::model::{HarvestJob, JobStatus, NormalizedRecord, Protocol, Resource, SampleRecord, Source, SourceStatus};
use crate::normalize::truncate;
use crate::search::SearchFilters;

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Column limits applied before writing a record.
const TITLE_MAX: usize = 500;
const URL_MAX: usize = 2000;
const TEXT_MAX: usize = 500;
const DESCRIPTION_MAX: usize = 5000;

/// Insert payload for a new source configuration.
#[derive(Debug, Clone)]
pub struct NewSource {
    /// Display name, unique across sources.
    pub name: String,
    /// Protocol the source speaks.
    pub protocol: Protocol,
    /// Endpoint URL.
    pub endpoint: String,
    /// Optional API key for the API adapter.
    pub api_key: Option<String>,
    /// Optional OAI-PMH `metadataPrefix`.
    pub metadata_prefix: Option<String>,
    /// Extra request headers.
    pub request_headers: HashMap<String, String>,
    /// Extra query parameters.
    pub request_params: HashMap<String, String>,
    /// Per-harvest record cap; 0 means unlimited.
    pub max_records_per_harvest: i64,
}

impl NewSource {
    /// Creates a source payload with the common fields set.
    #[must_use]
    pub fn new(name: impl Into<String>, protocol: Protocol, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol,
            endpoint: endpoint.into(),
            api_key: None,
            metadata_prefix: None,
            request_headers: HashMap::new(),
            request_params: HashMap::new(),
            max_records_per_harvest: 0,
        }
    }
}

/// Terminal counters and diagnostics for a finished job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Job being finalized.
    pub job_id: i64,
    /// Terminal status (completed, partial, or failed).
    pub status: JobStatus,
    /// Records the adapter yielded after the cap.
    pub resources_found: i64,
    /// New catalog rows.
    pub resources_created: i64,
    /// Existing rows touched by the upsert.
    pub resources_updated: i64,
    /// Records the adapter rejected (advisory).
    pub resources_skipped: i64,
    /// Records whose upsert failed.
    pub resources_failed: i64,
    /// Pages or token requests the adapter issued.
    pub pages_processed: i64,
    /// First few records for diagnostics.
    pub samples: Vec<SampleRecord>,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Catalog row the record landed in.
    pub resource_id: i64,
    /// True when a new row was inserted.
    pub created: bool,
}

/// Catalog store for sources, jobs, and resources.
///
/// Cheap to clone; all clones share one connection pool. When an
/// embedding signal sender is attached, every content-changing upsert
/// notifies the embedding worker.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    db: Database,
    embedding_tx: Option<mpsc::UnboundedSender<EmbeddingSignal>>,
}

impl CatalogStore {
    /// Creates a new catalog store over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            embedding_tx: None,
        }
    }

    /// Attaches the embedding worker signal channel.
    #[must_use]
    pub fn with_embedding_signal(mut self, tx: mpsc::UnboundedSender<EmbeddingSignal>) -> Self {
        self.embedding_tx = Some(tx);
        self
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- sources ---

    /// Inserts a new source configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] with a constraint kind when the
    /// name collides with an existing source.
    #[instrument(skip(self, source), fields(name = %source.name, protocol = %source.protocol))]
    pub async fn create_source(&self, source: &NewSource) -> Result<Source> {
        let headers = serde_json::to_string(&source.request_headers).unwrap_or_else(|_| "{}".to_string());
        let params = serde_json::to_string(&source.request_params).unwrap_or_else(|_| "{}".to_string());

        let row = sqlx::query_as::<_, Source>(
            r"INSERT INTO sources (
                name, protocol, endpoint, api_key, metadata_prefix,
                request_headers, request_params, max_records_per_harvest
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING *",
        )
        .bind(&source.name)
        .bind(source.protocol.as_str())
        .bind(&source.endpoint)
        .bind(&source.api_key)
        .bind(&source.metadata_prefix)
        .bind(headers)
        .bind(params)
        .bind(source.max_records_per_harvest)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row)
    }

    /// Fetches a source by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SourceNotFound`] when no row exists.
    pub async fn get_source(&self, id: i64) -> Result<Source> {
        sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::SourceNotFound(id))
    }

    /// Lists sources eligible for new harvest jobs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_harvestable_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE active = 1 ORDER BY name",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Toggles whether a source accepts new harvest jobs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SourceNotFound`] when no row exists.
    #[instrument(skip(self))]
    pub async fn set_source_active(&self, id: i64, active: bool) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE sources
              SET active = ?,
                  status = CASE WHEN ? THEN 'active' ELSE 'inactive' END,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(active)
        .bind(active)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SourceNotFound(id));
        }
        Ok(())
    }

    /// Folds a successful harvest into the source's running totals.
    ///
    /// One atomic statement; concurrent jobs cannot lose increments.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SourceNotFound`] when no row exists.
    #[instrument(skip(self))]
    pub async fn record_harvest_success(&self, source_id: i64, created: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE sources
              SET total_harvested = total_harvested + ?,
                  last_harvest_at = datetime('now'),
                  status = ?,
                  last_error = NULL,
                  updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(created)
        .bind(SourceStatus::Active.as_str())
        .bind(source_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SourceNotFound(source_id));
        }
        Ok(())
    }

    /// Marks the source errored and records the failure message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SourceNotFound`] when no row exists.
    #[instrument(skip(self, error))]
    pub async fn record_harvest_failure(&self, source_id: i64, error: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE sources
              SET status = ?, last_error = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(SourceStatus::Error.as_str())
        .bind(error)
        .bind(source_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SourceNotFound(source_id));
        }
        Ok(())
    }

    // --- harvest jobs ---

    /// Creates a job in the pending state, not yet started.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn create_job(&self, source_id: i64) -> Result<HarvestJob> {
        let job = sqlx::query_as::<_, HarvestJob>(
            r"INSERT INTO harvest_jobs (source_id, status)
              VALUES (?, ?)
              RETURNING *",
        )
        .bind(source_id)
        .bind(JobStatus::Pending.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(job)
    }

    /// Moves a job to the running state and stamps its start time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] when no row exists.
    #[instrument(skip(self))]
    pub async fn start_job(&self, job_id: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE harvest_jobs
              SET status = ?, started_at = datetime('now')
              WHERE id = ?",
        )
        .bind(JobStatus::Running.as_str())
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    /// Fetches a job by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] when no row exists.
    pub async fn get_job(&self, id: i64) -> Result<HarvestJob> {
        sqlx::query_as::<_, HarvestJob>("SELECT * FROM harvest_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::JobNotFound(id))
    }

    /// Lists jobs for a source, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn jobs_for_source(&self, source_id: i64) -> Result<Vec<HarvestJob>> {
        let rows = sqlx::query_as::<_, HarvestJob>(
            "SELECT * FROM harvest_jobs WHERE source_id = ? ORDER BY started_at DESC, id DESC",
        )
        .bind(source_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Terminates a job as failed with its diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] when no row exists.
    #[instrument(skip(self, message, details))]
    pub async fn fail_job(
        &self,
        job_id: i64,
        message: &str,
        details: &serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE harvest_jobs
              SET status = ?, completed_at = datetime('now'),
                  error_message = ?, error_details = ?
              WHERE id = ?",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(message)
        .bind(details.to_string())
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    /// Writes a job's terminal status, counters, and sample records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JobNotFound`] when no row exists.
    #[instrument(skip(self, outcome), fields(job_id = outcome.job_id, status = %outcome.status.as_str()))]
    pub async fn complete_job(&self, outcome: &JobOutcome) -> Result<()> {
        let samples = serde_json::to_string(&outcome.samples).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query(
            r"UPDATE harvest_jobs
              SET status = ?, completed_at = datetime('now'),
                  resources_found = ?, resources_created = ?, resources_updated = ?,
                  resources_skipped = ?, resources_failed = ?, pages_processed = ?,
                  sample_records = ?
              WHERE id = ?",
        )
        .bind(outcome.status.as_str())
        .bind(outcome.resources_found)
        .bind(outcome.resources_created)
        .bind(outcome.resources_updated)
        .bind(outcome.resources_skipped)
        .bind(outcome.resources_failed)
        .bind(outcome.pages_processed)
        .bind(samples)
        .bind(outcome.job_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(outcome.job_id));
        }
        Ok(())
    }

    // --- resources ---

    /// Upserts one normalized record, keyed by `(source_id, url)`.
    ///
    /// New rows are inserted whole. Existing rows are merged
    /// conservatively: a column only changes when the incoming value is
    /// non-empty, and `normalized_type` only changes when the incoming
    /// classification is not unset. Field values are truncated to their
    /// column limits first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordRejected`] for records failing the
    /// acceptance rule and [`StoreError::Database`] on persistence failure.
    #[instrument(skip(self, record), fields(url = %record.url))]
    pub async fn upsert_resource(
        &self,
        source_id: i64,
        record: &NormalizedRecord,
    ) -> Result<UpsertOutcome> {
        if !record.is_acceptable() {
            return Err(StoreError::RecordRejected("missing title or url"));
        }
        let record = clamp(record);

        let existing = sqlx::query(
            "SELECT id, title, description FROM resources WHERE source_id = ? AND url = ?",
        )
        .bind(source_id)
        .bind(&record.url)
        .fetch_optional(self.db.pool())
        .await?;

        let outcome = match existing {
            None => {
                let row = sqlx::query(
                    r"INSERT INTO resources (
                        source_id, url, title, description, license, publisher,
                        author, language, subject, resource_type, normalized_type,
                        isbn, issn, oclc, doi
                      )
                      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                      RETURNING id",
                )
                .bind(source_id)
                .bind(&record.url)
                .bind(&record.title)
                .bind(&record.description)
                .bind(&record.license)
                .bind(&record.publisher)
                .bind(&record.author)
                .bind(&record.language)
                .bind(&record.subject)
                .bind(&record.resource_type)
                .bind(record.normalized_type.as_str())
                .bind(&record.isbn)
                .bind(&record.issn)
                .bind(&record.oclc)
                .bind(&record.doi)
                .fetch_one(self.db.pool())
                .await?;

                let resource_id: i64 = row.get("id");
                debug!(resource_id, "inserted resource");
                self.signal_embedding(resource_id);
                UpsertOutcome {
                    resource_id,
                    created: true,
                }
            }
            Some(row) => {
                let resource_id: i64 = row.get("id");
                let old_title: String = row.get("title");
                let old_description: String = row.get("description");

                sqlx::query(
                    r"UPDATE resources SET
                        title = CASE WHEN ?1 <> '' THEN ?1 ELSE title END,
                        description = CASE WHEN ?2 <> '' THEN ?2 ELSE description END,
                        license = CASE WHEN ?3 <> '' THEN ?3 ELSE license END,
                        publisher = CASE WHEN ?4 <> '' THEN ?4 ELSE publisher END,
                        author = CASE WHEN ?5 <> '' THEN ?5 ELSE author END,
                        language = CASE WHEN ?6 <> '' THEN ?6 ELSE language END,
                        subject = CASE WHEN ?7 <> '' THEN ?7 ELSE subject END,
                        resource_type = CASE WHEN ?8 <> '' THEN ?8 ELSE resource_type END,
                        normalized_type = CASE WHEN ?9 <> 'unset' THEN ?9 ELSE normalized_type END,
                        isbn = CASE WHEN ?10 <> '' THEN ?10 ELSE isbn END,
                        issn = CASE WHEN ?11 <> '' THEN ?11 ELSE issn END,
                        oclc = CASE WHEN ?12 <> '' THEN ?12 ELSE oclc END,
                        doi = CASE WHEN ?13 <> '' THEN ?13 ELSE doi END,
                        updated_at = datetime('now')
                      WHERE id = ?14",
                )
                .bind(&record.title)
                .bind(&record.description)
                .bind(&record.license)
                .bind(&record.publisher)
                .bind(&record.author)
                .bind(&record.language)
                .bind(&record.subject)
                .bind(&record.resource_type)
                .bind(record.normalized_type.as_str())
                .bind(&record.isbn)
                .bind(&record.issn)
                .bind(&record.oclc)
                .bind(&record.doi)
                .bind(resource_id)
                .execute(self.db.pool())
                .await?;

                let content_changed = (!record.title.is_empty() && record.title != old_title)
                    || (!record.description.is_empty() && record.description != old_description);
                if content_changed {
                    self.signal_embedding(resource_id);
                }
                UpsertOutcome {
                    resource_id,
                    created: false,
                }
            }
        };

        Ok(outcome)
    }

    /// Fetches a resource by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ResourceNotFound`] when no row exists.
    pub async fn get_resource(&self, id: i64) -> Result<Resource> {
        sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::ResourceNotFound(id))
    }

    /// Soft-deletes or restores a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ResourceNotFound`] when no row exists.
    #[instrument(skip(self))]
    pub async fn set_resource_active(&self, id: i64, active: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE resources SET active = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(active)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ResourceNotFound(id));
        }
        Ok(())
    }

    /// Queries active resources matching the given filters.
    ///
    /// Filters narrow the candidate set in SQL before any scoring runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn query_resources(&self, filters: &SearchFilters) -> Result<Vec<Resource>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM resources WHERE active = 1");

        if let Some(language) = &filters.language {
            builder.push(" AND language = ").push_bind(language.clone());
        }
        if let Some(source_id) = filters.source_id {
            builder.push(" AND source_id = ").push_bind(source_id);
        }
        if let Some(kind) = filters.normalized_type {
            builder.push(" AND normalized_type = ").push_bind(kind.as_str());
        }
        if let Some(subject) = &filters.subject {
            builder
                .push(" AND subject LIKE ")
                .push_bind(format!("%{subject}%"));
        }
        if let Some(license) = &filters.license {
            builder
                .push(" AND license LIKE ")
                .push_bind(format!("%{license}%"));
        }
        if let Some(isbn) = &filters.isbn {
            builder.push(" AND isbn = ").push_bind(isbn.clone());
        }
        if let Some(issn) = &filters.issn {
            builder.push(" AND issn = ").push_bind(issn.clone());
        }
        if let Some(oclc) = &filters.oclc {
            builder.push(" AND oclc = ").push_bind(oclc.clone());
        }
        if let Some(min_quality) = filters.min_quality {
            builder.push(" AND quality_score >= ").push_bind(min_quality);
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build_query_as::<Resource>()
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows)
    }

    /// Returns `(id, embedding)` for every active resource with a vector.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn embedded_vectors(&self) -> Result<Vec<(i64, Vec<u8>)>> {
        let rows = sqlx::query(
            "SELECT id, embedding FROM resources WHERE active = 1 AND embedding IS NOT NULL",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("embedding")))
            .collect())
    }

    /// Stores a resource's embedding vector.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ResourceNotFound`] when no row exists.
    #[instrument(skip(self, blob), fields(bytes = blob.len()))]
    pub async fn set_embedding(&self, resource_id: i64, blob: &[u8]) -> Result<()> {
        let result = sqlx::query(
            "UPDATE resources SET embedding = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(blob)
        .bind(resource_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ResourceNotFound(resource_id));
        }
        Ok(())
    }

    fn signal_embedding(&self, resource_id: i64) {
        if let Some(tx) = &self.embedding_tx {
            if tx.send(EmbeddingSignal { resource_id }).is_err() {
                warn!(resource_id, "embedding worker channel closed, signal dropped");
            }
        }
    }
}

/// Applies column limits to an incoming record.
fn clamp(record: &NormalizedRecord) -> NormalizedRecord {
    let mut clamped = record.clone();
    clamped.title = truncate(clamped.title.trim(), TITLE_MAX);
    clamped.url = truncate(clamped.url.trim(), URL_MAX);
    clamped.description = truncate(&clamped.description, DESCRIPTION_MAX);
    for field in [
        &mut clamped.license,
        &mut clamped.publisher,
        &mut clamped.author,
        &mut clamped.subject,
        &mut clamped.resource_type,
        &mut clamped.isbn,
        &mut clamped.issn,
        &mut clamped.oclc,
        &mut clamped.doi,
    ] {
        *field = truncate(field.trim(), TEXT_MAX);
    }
    clamped
}
