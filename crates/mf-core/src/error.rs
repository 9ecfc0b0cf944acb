//! Unified error type for muxfetch.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].
//!
//! The variants follow the download taxonomy: caller mistakes
//! ([`Error::Validation`]), upstream source failures ([`Error::Provider`]),
//! stage-specific work failures ([`Error::Pipeline`]), and ceilings being hit
//! ([`Error::ResourceExhausted`]).

use std::fmt;

/// Unified error type covering all failure modes in muxfetch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Caller input was malformed or misused (bad source URL, unknown
    /// rendition, job id used out of sequence).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The stream source could not produce metadata or bytes (private,
    /// region-locked, deleted, rate-limited, network failure).
    #[error("Provider error: {0}")]
    Provider(String),

    /// A job stage failed.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The stage that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// A time or retention ceiling was hit.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An external tool (ffmpeg, yt-dlp) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Provider(_) => 500,
            Error::Pipeline { .. } => 500,
            Error::ResourceExhausted(_) => 503,
            Error::Tool { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Provider(_) => "provider_error",
            Error::Pipeline { .. } => "pipeline_error",
            Error::ResourceExhausted(_) => "resource_exhausted",
            Error::Tool { .. } => "tool_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Re-label any error as a failure of the given pipeline stage.
    ///
    /// Errors that already name a stage, and ceiling errors, are kept as-is.
    pub fn at_stage(self, step: &str) -> Self {
        match self {
            Error::Pipeline { .. } | Error::ResourceExhausted(_) => self,
            other => Error::pipeline(step, other.to_string()),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
