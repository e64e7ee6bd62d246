//! Harvest job orchestration.
//!
//! One runner drives every protocol: it creates the job row, invokes
//! the adapter, applies the source's record cap, upserts each record
//! with per-record error isolation, and writes the terminal status.
//! Callers never observe adapter errors, only terminal job states.

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::http::RetryClient;
use crate::model::{HarvestJob, JobStatus, SampleRecord, Source};
use crate::store::{CatalogStore, JobOutcome, StoreError};

use super::build_harvester;

/// Sample records kept per job for diagnostics.
const SAMPLE_LIMIT: usize = 5;

/// Errors surfacing from the runner itself.
///
/// Fetch and parse failures do not appear here; they terminate the job
/// as failed instead.
#[derive(Debug, Error)]
pub enum RunError {
    /// The source is disabled and no job was created.
    #[error("source '{name}' is inactive")]
    InactiveSource {
        /// Display name of the refused source.
        name: String,
    },

    /// Job bookkeeping could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives harvest jobs from adapter fetch to terminal job state.
#[derive(Clone)]
pub struct HarvestRunner {
    store: CatalogStore,
    client: RetryClient,
}

impl HarvestRunner {
    /// Creates a runner over the given store and HTTP client.
    #[must_use]
    pub fn new(store: CatalogStore, client: RetryClient) -> Self {
        Self { store, client }
    }

    /// Runs one harvest for the source and returns the finished job.
    ///
    /// The returned job is always in a terminal state. The job status is
    /// determined by upsert failures alone: `completed` when none
    /// occurred, `partial` when some records still landed, `failed` when
    /// every record failed or the fetch itself did.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InactiveSource`] for disabled sources and
    /// [`RunError::Store`] when job bookkeeping cannot be persisted.
    #[instrument(skip(self, source), fields(source = %source.name))]
    pub async fn run(&self, source: &Source) -> Result<HarvestJob, RunError> {
        if !source.active {
            return Err(RunError::InactiveSource {
                name: source.name.clone(),
            });
        }

        let job = self.store.create_job(source.id).await?;
        self.store.start_job(job.id).await?;

        let outcome = match build_harvester(source, self.client.clone()) {
            Ok(harvester) => harvester.fetch_records().await,
            Err(error) => Err(error),
        };

        let mut outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(job_id = job.id, error = %error, "harvest fetch failed");
                self.store
                    .fail_job(job.id, &error.to_string(), &error.diagnostics())
                    .await?;
                self.store
                    .record_harvest_failure(source.id, &error.to_string())
                    .await?;
                return Ok(self.store.get_job(job.id).await?);
            }
        };

        // The cap bounds what one job may ingest; adapters stay unaware
        // of it and the counters reflect the capped set.
        if source.max_records_per_harvest > 0 {
            let cap = usize::try_from(source.max_records_per_harvest).unwrap_or(usize::MAX);
            if outcome.records.len() > cap {
                outcome.records.truncate(cap);
            }
        }

        let samples: Vec<SampleRecord> = outcome
            .records
            .iter()
            .take(SAMPLE_LIMIT)
            .map(|r| SampleRecord {
                title: r.title.clone(),
                url: r.url.clone(),
            })
            .collect();

        let found = i64::try_from(outcome.records.len()).unwrap_or(i64::MAX);
        let mut created: i64 = 0;
        let mut updated: i64 = 0;
        let mut failed: i64 = 0;

        for record in &outcome.records {
            match self.store.upsert_resource(source.id, record).await {
                Ok(result) if result.created => created += 1,
                Ok(_) => updated += 1,
                Err(error) => {
                    warn!(url = %record.url, error = %error, "record upsert failed");
                    failed += 1;
                }
            }
        }

        let status = if failed == 0 {
            JobStatus::Completed
        } else if created + updated > 0 {
            JobStatus::Partial
        } else {
            JobStatus::Failed
        };

        self.store
            .complete_job(&JobOutcome {
                job_id: job.id,
                status,
                resources_found: found,
                resources_created: created,
                resources_updated: updated,
                resources_skipped: outcome.skipped,
                resources_failed: failed,
                pages_processed: outcome.pages_processed,
                samples,
            })
            .await?;

        if status == JobStatus::Failed {
            self.store
                .record_harvest_failure(source.id, "all records failed to persist")
                .await?;
        } else {
            self.store.record_harvest_success(source.id, created).await?;
        }

        info!(
            job_id = job.id,
            status = status.as_str(),
            found,
            created,
            updated,
            failed,
            "harvest finished"
        );
        Ok(self.store.get_job(job.id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use crate::db::Database;
    use crate::model::Protocol;
    use crate::store::NewSource;

    #[tokio::test]
    async fn test_inactive_source_creates_no_job() {
        let db = Database::new_in_memory().await.unwrap();
        let store = CatalogStore::new(db);
        let source = store
            .create_source(&NewSource::new("Off", Protocol::Api, "https://example.com"))
            .await
            .unwrap();
        store.set_source_active(source.id, false).await.unwrap();
        let source = store.get_source(source.id).await.unwrap();

        let client = RetryClient::new(&HttpSettings::default()).unwrap();
        let runner = HarvestRunner::new(store.clone(), client);

        let err = runner.run(&source).await.unwrap_err();
        assert!(matches!(err, RunError::InactiveSource { .. }));
        assert!(store.jobs_for_source(source.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_protocol_fails_job_not_runner() {
        let db = Database::new_in_memory().await.unwrap();
        let store = CatalogStore::new(db);
        let source = store
            .create_source(&NewSource::new("Broken", Protocol::Api, "https://example.com"))
            .await
            .unwrap();
        let mut source = store.get_source(source.id).await.unwrap();
        source.protocol_str = "gopher".to_string();

        let client = RetryClient::new(&HttpSettings::default()).unwrap();
        let runner = HarvestRunner::new(store.clone(), client);

        let job = runner.run(&source).await.unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("gopher"));
    }
}
