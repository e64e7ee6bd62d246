//! Delimited-text adapter: generic CSV exports and KBART title lists.
//!
//! The delimiter is sniffed from the header line, column names are
//! matched case-insensitively against candidate lists that merge the
//! generic, Dublin Core, and KBART vocabularies, and the payload is
//! decoded lossily so a stray invalid byte cannot abort a harvest.

use std::collections::HashMap;

use async_trait::async_trait;
use csv::ReaderBuilder;
use tracing::{debug, instrument, warn};

use crate::http::RetryClient;
use crate::model::{NormalizedRecord, Protocol, Source};
use crate::normalize::{classify_resource_type, normalize_language};

use super::{FetchOutcome, HarvestError, Harvester};

/// Delimiters tried by the sniffer, comma winning ties.
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Header-line window inspected for delimiter sniffing.
const SNIFF_WINDOW: usize = 8192;

const TITLE_COLUMNS: [&str; 5] = ["title", "name", "publication_title", "article_title", "dc.title"];
const URL_COLUMNS: [&str; 6] = ["url", "link", "title_url", "online_identifier", "identifier", "dc.identifier"];
const DESCRIPTION_COLUMNS: [&str; 5] = ["description", "summary", "coverage", "notes", "dc.description"];
const LICENSE_COLUMNS: [&str; 3] = ["license", "rights", "dc.rights"];
const PUBLISHER_COLUMNS: [&str; 4] = ["publisher", "provider", "publisher_name", "dc.publisher"];
const AUTHOR_COLUMNS: [&str; 6] = ["author", "creator", "owner", "first_author", "first_editor", "dc.creator"];
const LANGUAGE_COLUMNS: [&str; 3] = ["language", "lang", "dc.language"];
const TYPE_COLUMNS: [&str; 4] = ["resource_type", "type", "publication_type", "dc.type"];
const SUBJECT_COLUMNS: [&str; 5] = ["subject", "subjects", "keywords", "category", "dc.subject"];
const ISBN_COLUMNS: [&str; 3] = ["isbn", "print_identifier", "print_isbn"];
const ISSN_COLUMNS: [&str; 2] = ["issn", "online_issn"];
const OCLC_COLUMNS: [&str; 2] = ["oclc", "oclc_number"];
const DOI_COLUMNS: [&str; 1] = ["doi"];

/// Harvests CSV and KBART endpoints.
pub struct CsvHarvester {
    endpoint: String,
    headers: HashMap<String, String>,
    params: Vec<(String, String)>,
    client: RetryClient,
}

impl CsvHarvester {
    /// Builds the adapter from a source row.
    #[must_use]
    pub fn from_source(source: &Source, client: RetryClient) -> Self {
        Self {
            endpoint: source.endpoint.clone(),
            headers: source.headers(),
            params: source.params().into_iter().collect(),
            client,
        }
    }

    /// Parses an already-fetched payload, e.g. an uploaded file.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Parse`] when the header row cannot be read.
    pub fn records_from_bytes(&self, content: &[u8]) -> Result<FetchOutcome, HarvestError> {
        let text = String::from_utf8_lossy(content);
        parse_delimited(&text)
            .map_err(|detail| HarvestError::parse(&self.endpoint, detail, None, None))
    }
}

#[async_trait]
impl Harvester for CsvHarvester {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Csv
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_records(&self) -> Result<FetchOutcome, HarvestError> {
        let response = self.client.get(&self.endpoint, &self.headers, &self.params).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !response.status().is_success() {
            return Err(HarvestError::Endpoint {
                url: self.endpoint.clone(),
                status,
                content_type,
            });
        }

        let body = response.bytes().await.map_err(|e| {
            HarvestError::parse(&self.endpoint, e.to_string(), Some(status), content_type.clone())
        })?;

        self.records_from_bytes(&body)
    }

    async fn test_connection(&self) -> bool {
        match self.client.get(&self.endpoint, &self.headers, &self.params).await {
            Ok(response) => response.status().as_u16() == 200,
            Err(error) => {
                warn!(error = %error, "CSV connection test failed");
                false
            }
        }
    }
}

/// Counts delimiter occurrences in the header line and picks the winner.
///
/// Only the first line inside the sniff window is inspected; a file with
/// no clear winner falls back to comma.
fn sniff_delimiter(text: &str) -> u8 {
    let window = &text[..floor_char_boundary(text, SNIFF_WINDOW)];
    let header = window.lines().next().unwrap_or("");

    let mut best = b',';
    let mut best_count = 0usize;
    for delimiter in CANDIDATE_DELIMITERS {
        let count = header.bytes().filter(|b| *b == delimiter).count();
        if count > best_count {
            best = delimiter;
            best_count = count;
        }
    }
    best
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn parse_delimited(text: &str) -> Result<FetchOutcome, String> {
    let delimiter = sniff_delimiter(text);
    debug!(delimiter = %(delimiter as char), "sniffed delimiter");

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("unreadable header row: {e}"))?
        .iter()
        .map(str::to_lowercase)
        .collect();

    let mut outcome = FetchOutcome {
        pages_processed: 1,
        ..FetchOutcome::default()
    };

    for row in reader.records() {
        let Ok(row) = row else {
            outcome.skipped += 1;
            continue;
        };
        let lookup = |candidates: &[&str]| -> String {
            for candidate in candidates {
                if let Some(idx) = headers.iter().position(|h| h == candidate) {
                    if let Some(value) = row.get(idx) {
                        let value = value.trim();
                        if !value.is_empty() {
                            return value.to_string();
                        }
                    }
                }
            }
            String::new()
        };

        let raw_type = lookup(&TYPE_COLUMNS);
        let record = NormalizedRecord {
            title: lookup(&TITLE_COLUMNS),
            url: lookup(&URL_COLUMNS),
            description: lookup(&DESCRIPTION_COLUMNS),
            license: lookup(&LICENSE_COLUMNS),
            publisher: lookup(&PUBLISHER_COLUMNS),
            author: lookup(&AUTHOR_COLUMNS),
            language: normalize_language(&lookup(&LANGUAGE_COLUMNS)),
            subject: lookup(&SUBJECT_COLUMNS),
            isbn: lookup(&ISBN_COLUMNS),
            issn: lookup(&ISSN_COLUMNS),
            oclc: lookup(&OCLC_COLUMNS),
            doi: lookup(&DOI_COLUMNS),
            normalized_type: classify_resource_type(&raw_type),
            resource_type: raw_type,
        };

        if record.is_acceptable() {
            outcome.records.push(record);
        } else {
            outcome.skipped += 1;
        }
    }

    Ok(outcome)
}
