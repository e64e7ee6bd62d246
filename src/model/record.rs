//! The transient record type adapters produce.
//!
//! One tagged struct with explicit optional fields replaces the ad hoc
//! string maps that would otherwise flow between adapters, the runner and
//! the upsert layer.

use crate::normalize::ResourceType;

/// An in-memory normalized record produced by a protocol adapter.
///
/// Invariant: a record lacking a title or a URL never reaches the upsert
/// layer; adapters enforce this via [`NormalizedRecord::is_acceptable`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    /// Resource title.
    pub title: String,
    /// Resource URL; empty or a validated `http(s)` URL, never an identifier.
    pub url: String,
    /// Free-text description.
    pub description: String,
    /// License statement.
    pub license: String,
    /// Publisher name.
    pub publisher: String,
    /// Author(s), comma-joined.
    pub author: String,
    /// Canonical language code.
    pub language: String,
    /// Raw resource-type string as the source supplied it.
    pub resource_type: String,
    /// Normalized type from the closed taxonomy.
    pub normalized_type: ResourceType,
    /// Subject or category.
    pub subject: String,
    /// ISBN, when the source supplies one.
    pub isbn: String,
    /// ISSN, when the source supplies one.
    pub issn: String,
    /// OCLC number, when the source supplies one.
    pub oclc: String,
    /// DOI, when the source supplies one.
    pub doi: String,
}

impl NormalizedRecord {
    /// Returns true if the record carries both a title and a URL.
    ///
    /// This is the standardized acceptance rule applied by every adapter;
    /// rejected records are dropped silently and never counted as failures.
    #[must_use]
    pub fn is_acceptable(&self) -> bool {
        !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }
}
