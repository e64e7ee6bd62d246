//! JSON REST API adapter.
//!
//! Tolerant of payload shape: the record list is looked up under a set
//! of conventional envelope keys, a bare top-level array is accepted,
//! and a single top-level object is treated as a one-record response.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::http::{RetryClient, RetryPolicy};
use crate::model::{NormalizedRecord, Protocol, Source};
use crate::normalize::{classify_resource_type, normalize_language};

use super::{FetchOutcome, HarvestError, Harvester};

/// Envelope keys probed for the record list, in priority order.
const RESULT_KEYS: [&str; 4] = ["results", "items", "data", "records"];

/// Harvests a JSON API endpoint.
pub struct ApiHarvester {
    endpoint: String,
    api_key: Option<String>,
    headers: HashMap<String, String>,
    params: Vec<(String, String)>,
    client: RetryClient,
}

impl ApiHarvester {
    /// Builds the adapter from a source row.
    #[must_use]
    pub fn from_source(source: &Source, client: RetryClient) -> Self {
        Self {
            endpoint: source.endpoint.clone(),
            api_key: source.api_key.clone(),
            headers: source.headers(),
            params: source.params().into_iter().collect(),
            client,
        }
    }

    /// Request headers with the API key folded in as a Bearer token.
    ///
    /// An explicit Authorization header in the source config wins over
    /// the synthesized one.
    fn request_headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        if let Some(key) = &self.api_key {
            let has_auth = headers.keys().any(|k| k.eq_ignore_ascii_case("authorization"));
            if !has_auth && !key.is_empty() {
                headers.insert("Authorization".to_string(), format!("Bearer {key}"));
            }
        }
        headers
    }

    fn normalize(item: &Map<String, Value>) -> NormalizedRecord {
        let raw_type = field(item, &["resource_type", "type"]);
        NormalizedRecord {
            title: field(item, &["title", "name"]),
            url: field(item, &["url", "link", "identifier"]),
            description: field(item, &["description", "summary"]),
            license: field(item, &["license", "rights"]),
            publisher: field(item, &["publisher", "provider"]),
            author: field(item, &["author", "creator", "owner"]),
            language: normalize_language(&field(item, &["language", "lang"])),
            subject: field(item, &["subject", "category", "keywords"]),
            isbn: field(item, &["isbn"]),
            issn: field(item, &["issn"]),
            oclc: field(item, &["oclc"]),
            doi: field(item, &["doi"]),
            normalized_type: classify_resource_type(&raw_type),
            resource_type: raw_type,
        }
    }
}

#[async_trait]
impl Harvester for ApiHarvester {
    fn name(&self) -> &'static str {
        "api"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Api
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_records(&self) -> Result<FetchOutcome, HarvestError> {
        let headers = self.request_headers();
        let response = self.client.get(&self.endpoint, &headers, &self.params).await?;

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

        let payload: Value = response.json().await.map_err(|e| {
            HarvestError::parse(&self.endpoint, e.to_string(), Some(status), content_type.clone())
        })?;

        let items = extract_items(&payload);
        debug!(count = items.len(), "extracted items from payload");

        let mut outcome = FetchOutcome {
            pages_processed: 1,
            ..FetchOutcome::default()
        };
        for item in items {
            let Some(obj) = item.as_object() else {
                outcome.skipped += 1;
                continue;
            };
            let record = Self::normalize(obj);
            if record.is_acceptable() {
                outcome.records.push(record);
            } else {
                outcome.skipped += 1;
            }
        }
        Ok(outcome)
    }

    /// Issues a bounded probe request: `limit=1` is appended unless the
    /// source already configures a limit, and at most 3 attempts are made.
    async fn test_connection(&self) -> bool {
        let mut params = self.params.clone();
        if !params.iter().any(|(name, _)| name == "limit") {
            params.push(("limit".to_string(), "1".to_string()));
        }

        let probe = self.client.clone().with_policy(RetryPolicy::with_max_attempts(3));
        match probe.get(&self.endpoint, &self.request_headers(), &params).await {
            Ok(response) => response.status().as_u16() == 200,
            Err(error) => {
                warn!(error = %error, "API connection test failed");
                false
            }
        }
    }
}

/// Finds the record list inside an arbitrary JSON payload.
fn extract_items(payload: &Value) -> Vec<&Value> {
    if let Value::Object(map) = payload {
        for key in RESULT_KEYS {
            if let Some(Value::Array(items)) = map.get(key) {
                return items.iter().collect();
            }
        }
        if !map.is_empty() {
            return vec![payload];
        }
        return Vec::new();
    }
    if let Value::Array(items) = payload {
        return items.iter().collect();
    }
    Vec::new()
}

/// First non-empty value under any of the candidate keys.
///
/// Strings are trimmed; arrays yield their first string element; numbers
/// are stringified (some APIs ship identifiers as numbers).
fn field(obj: &Map<String, Value>, keys: &[&str]) -> String {
    for key in keys {
        let Some(value) = obj.get(*key) else { continue };
        match value {
            Value::String(s) if !s.trim().is_empty() => return s.trim().to_string(),
            Value::Array(items) => {
                for item in items {
                    if let Value::String(s) = item {
                        if !s.trim().is_empty() {
                            return s.trim().to_string();
                        }
                    }
                }
            }
            Value::Number(n) => return n.to_string(),
            _ => {}
        }
    }
    String::new()
}
