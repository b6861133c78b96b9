//! Error types for ContentForge.
//!
//! Library crates use [`ContentForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::Stage;

/// Top-level error type for all ContentForge operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentForgeError {
    /// Missing or invalid configuration, including absent credentials.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed structured output from an AI service or a feed document.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Network, auth or status failure on a third-party call.
    #[error("{service} error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    /// A Feed, Item, Cluster, PipelineRun or article row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid input or an illegal state transition.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The invocation was cancelled through its cancellation token.
    #[error("cancelled during {0}")]
    Cancelled(Stage),

    /// An error raised inside a named pipeline stage.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ContentForgeError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContentForgeError>;

/// Coarse classification of an error, used by batch reports and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Parse,
    ExternalService,
    NotFound,
    Storage,
    Io,
    Validation,
    Cancelled,
}

impl ContentForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create an external service error for the named service.
    pub fn external(service: &'static str, msg: impl Into<String>) -> Self {
        Self::ExternalService {
            service,
            message: msg.into(),
        }
    }

    /// Create a not-found error for an entity and its id.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Tag this error with the stage that raised it. Already-tagged errors
    /// and cancellations keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } | Self::Cancelled(_) => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Classification of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::ExternalService { .. } => ErrorKind::ExternalService,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Io { .. } => ErrorKind::Io,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// The stage recorded on this error, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::Cancelled(stage) => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ContentForgeError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ContentForgeError::not_found("pipeline run", "r-1");
        assert_eq!(err.to_string(), "pipeline run not found: r-1");

        let err = ContentForgeError::external("search", "HTTP 503");
        assert_eq!(err.to_string(), "search error: HTTP 503");
    }

    #[test]
    fn stage_tag_names_the_stage_and_keeps_kind() {
        let err = ContentForgeError::parse("bad json").at(Stage::Generate);
        assert!(err.to_string().starts_with("generate stage failed"));
        assert!(err.to_string().contains("bad json"));
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.stage(), Some(Stage::Generate));
    }

    #[test]
    fn stage_tag_is_not_applied_twice() {
        let err = ContentForgeError::parse("x")
            .at(Stage::Assemble)
            .at(Stage::Publish);
        assert_eq!(err.stage(), Some(Stage::Assemble));
    }
}
