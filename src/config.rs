//! Runtime settings with defaults and optional JSON file overrides.
//!
//! Defaults mirror the observed production values (quality weight 0.3,
//! keyword weight 0.7, hybrid boost 1.15, 384-dimension embeddings). A
//! settings file only needs to carry the fields it overrides; everything
//! else falls back to the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedding vector dimensionality - a deployment constant.
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Errors raised while loading a settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the settings file.
    #[error("failed to read settings file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid JSON or has wrong field types.
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// HTTP client and throttle settings shared by all adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-request read timeout in seconds.
    pub timeout_secs: u64,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Maximum attempts per request (including the initial attempt).
    pub max_attempts: u32,
    /// Exponential backoff base: sleep `base^attempt` seconds before a retry.
    pub backoff_base: f64,
    /// Cap on any single backoff sleep, in seconds.
    pub max_backoff_secs: u64,
    /// Minimum interval between requests to the same host, in milliseconds.
    pub throttle_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: 3,
            backoff_base: 2.0,
            max_backoff_secs: 64,
            throttle_ms: 1000,
        }
    }
}

/// Ranking engine weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Weight of the quality boost: `(quality / 5.0) * quality_weight`.
    pub quality_weight: f64,
    /// Scale applied to the raw keyword score.
    pub keyword_weight: f64,
    /// Multiplier applied when a resource matches both passes.
    pub hybrid_boost: f64,
    /// Default result limit when the caller does not specify one.
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            quality_weight: 0.3,
            keyword_weight: 0.7,
            hybrid_boost: 1.15,
            default_limit: 20,
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding service endpoint; `None` disables embedding generation.
    pub endpoint: Option<String>,
    /// Optional remote ANN index endpoint; `None` selects the exact scan.
    pub ann_endpoint: Option<String>,
}

/// Top-level settings bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP client settings.
    pub http: HttpSettings,
    /// Ranking weights.
    pub search: SearchSettings,
    /// Embedding service settings.
    pub embedding: EmbeddingSettings,
}

impl Settings {
    /// Loads settings from a JSON file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_match_observed_system() {
        let settings = Settings::default();
        assert!((settings.search.quality_weight - 0.3).abs() < f64::EPSILON);
        assert!((settings.search.keyword_weight - 0.7).abs() < f64::EPSILON);
        assert!((settings.search.hybrid_boost - 1.15).abs() < f64::EPSILON);
        assert_eq!(settings.http.max_attempts, 3);
        assert!((settings.http.backoff_base - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"http": {{"max_attempts": 5}}}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.http.max_attempts, 5);
        // Untouched fields keep defaults
        assert_eq!(settings.http.timeout_secs, 30);
        assert_eq!(settings.search.default_limit, 20);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Settings::load(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
