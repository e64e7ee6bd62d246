//! Conservative normalization of raw metadata values.
//!
//! Pure functions mapping heterogeneous source values to canonical language
//! codes, a closed resource-type enum, and validated URLs. Normalization
//! never guesses: unknown languages pass through unchanged, and an empty
//! resource type stays [`ResourceType::Unset`] rather than being forced to
//! `Other` - downstream consumers treat `unset` as "needs review" and
//! `other` as "reviewed, truly uncategorized".

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed resource-type taxonomy for catalog entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Whole book, monograph, or textbook.
    Book,
    /// Chapter, section, or part of a larger work.
    Chapter,
    /// Journal article or paper.
    Article,
    /// Video, lecture, or recording.
    Video,
    /// Course, module, or unit.
    Course,
    /// Reviewed but not matching any known category.
    Other,
    /// No type information supplied; needs review.
    #[default]
    Unset,
}

impl ResourceType {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Chapter => "chapter",
            Self::Article => "article",
            Self::Video => "video",
            Self::Course => "course",
            Self::Other => "other",
            Self::Unset => "unset",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book" => Ok(Self::Book),
            "chapter" => Ok(Self::Chapter),
            "article" => Ok(Self::Article),
            "video" => Ok(Self::Video),
            "course" => Ok(Self::Course),
            "other" => Ok(Self::Other),
            "unset" => Ok(Self::Unset),
            _ => Err(format!("invalid resource type: {s}")),
        }
    }
}

/// Normalizes a raw language value to an ISO 639-1 code where possible.
///
/// Lowercases and trims the input, then applies a small alias table.
/// Unknown values pass through unchanged; only an empty input defaults
/// to `"en"`.
#[must_use]
pub fn normalize_language(raw: &str) -> String {
    let v = raw.trim().to_lowercase();
    if v.is_empty() {
        return "en".to_string();
    }
    match v.as_str() {
        "en" | "eng" | "english" => "en".to_string(),
        "fr" | "fre" | "fra" | "french" => "fr".to_string(),
        "de" | "ger" | "deu" | "german" => "de".to_string(),
        "es" | "spa" | "spanish" => "es".to_string(),
        _ => v,
    }
}

/// Classifies a raw type string into the closed [`ResourceType`] taxonomy.
///
/// Substring match against an ordered keyword table; the chapter keywords
/// are checked before the book keywords so "book chapter" classifies as a
/// chapter. Empty input yields [`ResourceType::Unset`], not `Other`.
#[must_use]
pub fn classify_resource_type(raw: &str) -> ResourceType {
    let t = raw.trim().to_lowercase();
    if t.is_empty() {
        return ResourceType::Unset;
    }
    if contains_any(&t, &["chapter", "section", "part"]) {
        return ResourceType::Chapter;
    }
    if contains_any(&t, &["book", "monograph", "textbook"]) {
        return ResourceType::Book;
    }
    if contains_any(&t, &["article", "journal", "paper"]) {
        return ResourceType::Article;
    }
    if contains_any(&t, &["video", "lecture", "recording"]) {
        return ResourceType::Video;
    }
    if contains_any(&t, &["course", "module", "unit"]) {
        return ResourceType::Course;
    }
    ResourceType::Other
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Returns a safe external URL or an empty string.
///
/// Only values starting with `http://` or `https://` are accepted.
/// Everything else (ISBNs, ONIX filenames, bare internal IDs) is treated
/// as missing rather than substituted.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        String::new()
    }
}

/// Truncates a value to a catalog column limit, preserving char boundaries.
#[must_use]
pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        value.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Language Tests ====================

    #[test]
    fn test_normalize_language_aliases() {
        assert_eq!(normalize_language("eng"), "en");
        assert_eq!(normalize_language("English"), "en");
        assert_eq!(normalize_language("FRE"), "fr");
        assert_eq!(normalize_language("fra"), "fr");
        assert_eq!(normalize_language("french"), "fr");
        assert_eq!(normalize_language("deu"), "de");
        assert_eq!(normalize_language("German"), "de");
        assert_eq!(normalize_language("spa"), "es");
    }

    #[test]
    fn test_normalize_language_unknown_passes_through() {
        assert_eq!(normalize_language("nl"), "nl");
        assert_eq!(normalize_language("Klingon"), "klingon");
    }

    #[test]
    fn test_normalize_language_empty_defaults_to_en() {
        assert_eq!(normalize_language(""), "en");
        assert_eq!(normalize_language("   "), "en");
    }

    #[test]
    fn test_normalize_language_trims_and_lowercases() {
        assert_eq!(normalize_language("  ENG  "), "en");
    }

    // ==================== Resource Type Tests ====================

    #[test]
    fn test_classify_resource_type_table() {
        assert_eq!(classify_resource_type("Book"), ResourceType::Book);
        assert_eq!(classify_resource_type("monograph"), ResourceType::Book);
        assert_eq!(classify_resource_type("textbook"), ResourceType::Book);
        assert_eq!(classify_resource_type("chapter"), ResourceType::Chapter);
        assert_eq!(classify_resource_type("Journal Article"), ResourceType::Article);
        assert_eq!(classify_resource_type("working paper"), ResourceType::Article);
        assert_eq!(classify_resource_type("video lecture"), ResourceType::Video);
        assert_eq!(classify_resource_type("Course Module"), ResourceType::Course);
    }

    #[test]
    fn test_classify_resource_type_chapter_wins_over_book() {
        // "book chapter" must classify as chapter: chapter keywords are
        // checked first in the ordered table.
        assert_eq!(classify_resource_type("book chapter"), ResourceType::Chapter);
    }

    #[test]
    fn test_classify_resource_type_empty_is_unset_not_other() {
        assert_eq!(classify_resource_type(""), ResourceType::Unset);
        assert_eq!(classify_resource_type("  "), ResourceType::Unset);
    }

    #[test]
    fn test_classify_resource_type_unknown_is_other() {
        assert_eq!(classify_resource_type("dataset"), ResourceType::Other);
    }

    #[test]
    fn test_resource_type_round_trip() {
        for ty in [
            ResourceType::Book,
            ResourceType::Chapter,
            ResourceType::Article,
            ResourceType::Video,
            ResourceType::Course,
            ResourceType::Other,
            ResourceType::Unset,
        ] {
            assert_eq!(ty.as_str().parse::<ResourceType>(), Ok(ty));
        }
    }

    // ==================== URL Tests ====================

    #[test]
    fn test_normalize_url_accepts_http_and_https() {
        assert_eq!(
            normalize_url("https://example.com/x.pdf"),
            "https://example.com/x.pdf"
        );
        assert_eq!(normalize_url(" http://example.com "), "http://example.com");
    }

    #[test]
    fn test_normalize_url_rejects_non_urls() {
        assert_eq!(normalize_url("978-3-16-148410-0"), "");
        assert_eq!(normalize_url("oai:repo:1234"), "");
        assert_eq!(normalize_url("ftp://example.com/file"), "");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn test_normalize_url_case_insensitive_scheme() {
        assert_eq!(
            normalize_url("HTTPS://Example.com/X"),
            "HTTPS://Example.com/X"
        );
    }

    // ==================== Truncation Tests ====================

    #[test]
    fn test_truncate_short_value_unchanged() {
        assert_eq!(truncate("short", 500), "short");
    }

    #[test]
    fn test_truncate_long_value() {
        let long = "a".repeat(600);
        assert_eq!(truncate(&long, 500).len(), 500);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let value = "é".repeat(10);
        assert_eq!(truncate(&value, 5).chars().count(), 5);
    }
}
