use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for comic-translator-core
///
/// This enum encompasses all error cases that can occur in the library:
/// - Image operations (reading, decoding, writing)
/// - Detection and translation backends (requests, responses, rate limiting)
/// - Erasure and text rendering
/// - Cache, project file and export persistence
/// - Configuration operations (loading, validation)
///
/// The type is `Clone` so a single failed translation can be handed to every
/// caller waiting on the same in-flight request.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ==========================================================================
    // Image Errors
    // ==========================================================================
    /// Failed to read or decode an image file
    #[error("failed to read image {path}: {reason}")]
    ImageRead { path: String, reason: String },

    /// Failed to encode or write an image file
    #[error("failed to write image {path}: {reason}")]
    ImageWrite { path: String, reason: String },

    /// Image has unusable dimensions or content
    #[error("invalid image: {0}")]
    InvalidImage(String),

    // ==========================================================================
    // Detection Errors
    // ==========================================================================
    /// Detection backend request failed
    #[error("detection request failed: {0}")]
    DetectionRequest(String),

    /// Detection backend returned something we could not parse
    #[error("invalid detection response: {0}")]
    DetectionInvalidResponse(String),

    /// Detection returned geometry outside the processing frame
    #[error("malformed detection result for region {region}: {reason}")]
    MalformedDetection { region: usize, reason: String },

    // ==========================================================================
    // Translation Errors
    // ==========================================================================
    /// Translation API request failed
    #[error("translation API request failed: {0}")]
    TranslationRequest(String),

    /// Invalid response from translation API
    #[error("invalid translation API response: {0}")]
    TranslationInvalidResponse(String),

    /// Rate limited by translation API
    #[error("translation rate limited{}", retry_after.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    TranslationRateLimited { retry_after: Option<u64> },

    /// API key not configured for translation service
    #[error("translation API key not configured")]
    TranslationMissingApiKey,

    /// Translation request timed out
    #[error("translation request timed out")]
    TranslationTimeout,

    /// Maximum retry attempts exceeded for translation
    #[error("translation failed after maximum retries")]
    TranslationMaxRetriesExceeded,

    // ==========================================================================
    // Erasure / Render Errors
    // ==========================================================================
    /// Erasure engine failed on a region
    #[error("erasure failed: {0}")]
    Erasure(String),

    /// Text renderer failed on a region
    #[error("text rendering failed: {0}")]
    Render(String),

    /// A resource (font file, artifact) is not available
    #[error("resource missing: {0}")]
    ResourceMissing(String),

    /// Font file exists but could not be parsed
    #[error("invalid font {path}: {reason}")]
    FontInvalid { path: String, reason: String },

    // ==========================================================================
    // Cache Errors
    // ==========================================================================
    /// Failed to initialize the cache
    #[error("failed to initialize cache: {0}")]
    CacheInit(String),

    /// Failed to write to cache
    #[error("failed to write to cache: {0}")]
    CacheWrite(String),

    // ==========================================================================
    // Project / Export Errors
    // ==========================================================================
    /// Failed to write or read the project file
    #[error("project persistence failed: {0}")]
    Persistence(String),

    /// Project file content is not a chapter we understand
    #[error("invalid project file: {0}")]
    ProjectFormat(String),

    /// Failed to export translated pages
    #[error("export failed: {0}")]
    Export(String),

    /// Failed to save a PDF
    #[error("failed to save PDF: {0}")]
    PdfSave(String),

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // Control Flow
    // ==========================================================================
    /// The chapter run was cancelled before this work started
    #[error("processing cancelled")]
    Cancelled,

    /// A blocking worker task panicked or was aborted
    #[error("worker task failed: {0}")]
    Worker(String),

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Failure classes used by the pipeline to decide how a fault is absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network, timeout or rate limit from an external service; retrying may succeed
    TransientExternal,
    /// Detection produced geometry that cannot be used
    MalformedDetection,
    /// A resource such as a font file is absent
    ResourceMissing,
    /// Project, cache or export data could not be written
    Persistence,
    /// Anything else
    Other,
}

impl Error {
    /// Classify this error for status reporting.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::DetectionRequest(_)
            | Self::TranslationRequest(_)
            | Self::TranslationRateLimited { .. }
            | Self::TranslationTimeout
            | Self::TranslationMaxRetriesExceeded => FailureKind::TransientExternal,
            Self::MalformedDetection { .. } | Self::DetectionInvalidResponse(_) => {
                FailureKind::MalformedDetection
            }
            Self::ResourceMissing(_) | Self::FontInvalid { .. } => FailureKind::ResourceMissing,
            Self::Persistence(_)
            | Self::CacheWrite(_)
            | Self::ImageWrite { .. }
            | Self::Export(_)
            | Self::PdfSave(_) => FailureKind::Persistence,
            _ => FailureKind::Other,
        }
    }

    /// Whether retrying the same call later could succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), FailureKind::TransientExternal)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
