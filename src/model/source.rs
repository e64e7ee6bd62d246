//! Source configuration: one external OER provider.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Protocol an external source speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// JSON REST API.
    Api,
    /// OAI-PMH repository (XML over HTTP with resumption tokens).
    OaiPmh,
    /// Delimited text: CSV or KBART TSV.
    Csv,
    /// MARC21-XML dump.
    Marcxml,
}

impl Protocol {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::OaiPmh => "oai_pmh",
            Self::Csv => "csv",
            Self::Marcxml => "marcxml",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Self::Api),
            "oai_pmh" => Ok(Self::OaiPmh),
            "csv" => Ok(Self::Csv),
            "marcxml" => Ok(Self::Marcxml),
            _ => Err(format!("invalid protocol: {s}")),
        }
    }
}

/// Operational status of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Available for harvesting.
    Active,
    /// Disabled by an operator.
    Inactive,
    /// Last harvest ended in failure.
    Error,
}

impl SourceStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid source status: {s}")),
        }
    }
}

/// Configuration row for one external provider.
///
/// Created by an operator; its running totals are mutated by the harvest
/// runner after each job. The pipeline never deletes a source.
#[derive(Debug, Clone, FromRow)]
pub struct Source {
    /// Unique identifier.
    pub id: i64,
    /// Display name, e.g. "OAPEN" or "DOAB".
    pub name: String,
    /// Protocol kind (stored as text, parsed via `protocol()`).
    #[sqlx(rename = "protocol")]
    pub protocol_str: String,
    /// Endpoint URL for the protocol.
    pub endpoint: String,
    /// API key, synthesized into a Bearer header by the API adapter.
    pub api_key: Option<String>,
    /// OAI-PMH `metadataPrefix`; `None` means the protocol default.
    pub metadata_prefix: Option<String>,
    /// Extra request headers as a JSON object.
    pub request_headers: String,
    /// Extra query parameters as a JSON object.
    pub request_params: String,
    /// Per-harvest record cap; 0 means unlimited.
    pub max_records_per_harvest: i64,
    /// Whether the source is eligible for new harvest jobs.
    pub active: bool,
    /// Operational status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Total resources created across all harvests.
    pub total_harvested: i64,
    /// Timestamp of the last successful harvest.
    pub last_harvest_at: Option<String>,
    /// Most recent error message, if any.
    pub last_error: Option<String>,
    /// When the source was created.
    pub created_at: String,
    /// When the source was last updated.
    pub updated_at: String,
}

impl Source {
    /// Returns the parsed protocol.
    ///
    /// # Errors
    ///
    /// Returns the raw string if it is not a known protocol.
    pub fn protocol(&self) -> Result<Protocol, String> {
        self.protocol_str.parse()
    }

    /// Returns the parsed status, falling back to `Active` on invalid data.
    #[must_use]
    pub fn status(&self) -> SourceStatus {
        self.status_str.parse().unwrap_or(SourceStatus::Active)
    }

    /// Deserializes the extra request headers.
    ///
    /// Invalid JSON yields an empty map rather than failing the harvest.
    #[must_use]
    pub fn headers(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.request_headers).unwrap_or_default()
    }

    /// Deserializes the extra query parameters.
    #[must_use]
    pub fn params(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.request_params).unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_source() -> Source {
        Source {
            id: 1,
            name: "OAPEN".to_string(),
            protocol_str: "oai_pmh".to_string(),
            endpoint: "https://library.oapen.org/oai/request".to_string(),
            api_key: None,
            metadata_prefix: Some("oai_dc".to_string()),
            request_headers: r#"{"Accept": "application/xml"}"#.to_string(),
            request_params: r#"{"set": "book"}"#.to_string(),
            max_records_per_harvest: 1000,
            active: true,
            status_str: "active".to_string(),
            total_harvested: 0,
            last_harvest_at: None,
            last_error: None,
            created_at: "2026-01-01".to_string(),
            updated_at: "2026-01-01".to_string(),
        }
    }

    #[test]
    fn test_protocol_round_trip() {
        for p in [Protocol::Api, Protocol::OaiPmh, Protocol::Csv, Protocol::Marcxml] {
            assert_eq!(p.as_str().parse::<Protocol>().unwrap(), p);
        }
    }

    #[test]
    fn test_protocol_invalid() {
        assert!("rss".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_source_parses_protocol_and_status() {
        let source = sample_source();
        assert_eq!(source.protocol().unwrap(), Protocol::OaiPmh);
        assert_eq!(source.status(), SourceStatus::Active);
    }

    #[test]
    fn test_source_headers_and_params_json() {
        let source = sample_source();
        assert_eq!(
            source.headers().get("Accept").map(String::as_str),
            Some("application/xml")
        );
        assert_eq!(source.params().get("set").map(String::as_str), Some("book"));
    }

    #[test]
    fn test_source_invalid_json_yields_empty_maps() {
        let mut source = sample_source();
        source.request_headers = "not json".to_string();
        source.request_params = "[1,2]".to_string();
        assert!(source.headers().is_empty());
        assert!(source.params().is_empty());
    }

    #[test]
    fn test_source_status_fallback_on_invalid() {
        let mut source = sample_source();
        source.status_str = "garbage".to_string();
        assert_eq!(source.status(), SourceStatus::Active);
    }
}
