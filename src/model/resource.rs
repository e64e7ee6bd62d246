//! Persisted catalog resources.

use std::fmt;

use sqlx::FromRow;

use crate::normalize::ResourceType;

/// A persisted catalog entry, identified uniquely by (source, URL).
///
/// Created on first sighting of a (source, URL) pair; later sightings
/// apply a conservative merge that never blanks previously known fields.
/// Resources are soft-deactivated via `active`, not hard-deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Resource {
    /// Unique identifier.
    pub id: i64,
    /// Owning source.
    pub source_id: i64,
    /// Resource URL (half of the identity key).
    pub url: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// License statement.
    pub license: String,
    /// Publisher name.
    pub publisher: String,
    /// Author(s).
    pub author: String,
    /// Canonical language code.
    pub language: String,
    /// Subject or category.
    pub subject: String,
    /// Raw resource-type string.
    pub resource_type: String,
    /// Normalized type (stored as text, parsed via `normalized_type()`).
    #[sqlx(rename = "normalized_type")]
    pub normalized_type_str: String,
    /// ISBN.
    pub isbn: String,
    /// ISSN.
    pub issn: String,
    /// OCLC number.
    pub oclc: String,
    /// DOI.
    pub doi: String,
    /// Independently computed quality rating in [0, 5].
    pub quality_score: f64,
    /// Embedding vector as little-endian f32 bytes; `None` until computed.
    pub embedding: Option<Vec<u8>>,
    /// Soft-delete flag.
    pub active: bool,
    /// When the resource was first seen.
    pub created_at: String,
    /// When the resource was last updated.
    pub updated_at: String,
}

impl Resource {
    /// Returns the parsed normalized type, falling back to `Unset`.
    #[must_use]
    pub fn normalized_type(&self) -> ResourceType {
        self.normalized_type_str.parse().unwrap_or(ResourceType::Unset)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resource {{ id: {}, source: {}, url: {} }}",
            self.id, self.source_id, self.url
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resource() -> Resource {
        Resource {
            id: 3,
            source_id: 1,
            url: "https://x/1".to_string(),
            title: "Intro to Biology".to_string(),
            description: String::new(),
            license: String::new(),
            publisher: String::new(),
            author: String::new(),
            language: "en".to_string(),
            subject: String::new(),
            resource_type: "Textbook".to_string(),
            normalized_type_str: "book".to_string(),
            isbn: String::new(),
            issn: String::new(),
            oclc: String::new(),
            doi: String::new(),
            quality_score: 3.5,
            embedding: None,
            active: true,
            created_at: "2026-01-01".to_string(),
            updated_at: "2026-01-01".to_string(),
        }
    }

    #[test]
    fn test_resource_normalized_type_parses() {
        assert_eq!(sample_resource().normalized_type(), ResourceType::Book);
    }

    #[test]
    fn test_resource_normalized_type_fallback() {
        let mut resource = sample_resource();
        resource.normalized_type_str = "garbage".to_string();
        assert_eq!(resource.normalized_type(), ResourceType::Unset);
    }

    #[test]
    fn test_resource_display() {
        let display = sample_resource().to_string();
        assert!(display.contains("https://x/1"));
    }
}
