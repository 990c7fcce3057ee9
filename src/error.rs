//! Error taxonomy.
//!
//! One enum per concern. Only mapping loads and persistence surface errors to
//! callers on the hot path; memory read failures are swallowed by
//! [`MappingTable::refresh`](crate::mapping::MappingTable::refresh) and frame
//! construction never fails.

use std::path::Path;

/// Failure to load a per-game field mapping.
#[derive(Debug, thiserror::Error)]
pub enum MappingLoadError {
    /// No mapping file exists for the requested game.
    #[error("no field mapping found for game '{game_id}'")]
    NotFound {
        /// Game identifier that was requested.
        game_id: String,
    },

    /// A mapping file exists but violates the schema.
    #[error("malformed field mapping for game '{game_id}': {reason}")]
    Malformed {
        /// Game identifier that was requested.
        game_id: String,
        /// Human-readable description of the violation.
        reason: String,
    },
}

impl MappingLoadError {
    pub(crate) fn malformed(game_id: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            game_id: game_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by an injected [`MemoryReader`](crate::mapping::MemoryReader).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryReadError {
    /// The address lies outside the readable region.
    #[error("address {address:#x} is not mapped")]
    Unmapped {
        /// Address that was requested.
        address: u64,
    },

    /// The emulator integration could not service the read.
    #[error("read at {address:#x} failed: {reason}")]
    Fault {
        /// Address that was requested.
        address: u64,
        /// Reason reported by the integration layer.
        reason: String,
    },
}

/// Failure to rebuild an [`ObservationFrame`](crate::frame::ObservationFrame)
/// from its serialized form.
#[derive(Debug, thiserror::Error)]
pub enum FrameBuildError {
    /// The document is not a valid frame encoding.
    #[error("frame document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A decoded field violates a range invariant.
    #[error("field '{field}' holds {value}, outside its allowed range")]
    OutOfRange {
        /// Name of the offending field.
        field: String,
        /// Value found in the document.
        value: f64,
    },

    /// The sealed hash no longer matches the decoded content.
    #[error("sealed hash {sealed} does not match frame content {computed}")]
    HashMismatch {
        /// Hash carried by the document.
        sealed: String,
        /// Hash recomputed from the decoded fields.
        computed: String,
    },
}

/// Failure to save or load combo session state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed.
    #[error("I/O failure on {path}: {source}")]
    IoFailure {
        /// Path of the file involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document could not be decoded into session state.
    #[error("could not parse combo session document: {reason}")]
    ParseFailure {
        /// Decoder or validation message.
        reason: String,
    },
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.display().to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::ParseFailure {
            reason: e.to_string(),
        }
    }
}

/// Failure to load a [`TelemetryConfig`](crate::config::TelemetryConfig) file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Path of the configuration file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
