//! Error types for the auto-healing harness.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while collecting, healing or reporting.
#[derive(Debug, Error)]
pub enum HealError {
    /// Filesystem failure outside of best-effort capture
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Report template failed to render
    #[error("Template error: {0}")]
    Template(String),

    /// A child process could not be spawned or awaited
    #[error("Process error running `{command}`: {reason}")]
    Process { command: String, reason: String },

    /// Plan referenced an agent that does not exist
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl HealError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<handlebars::RenderError> for HealError {
    fn from(e: handlebars::RenderError) -> Self {
        Self::Template(e.to_string())
    }
}

impl From<handlebars::TemplateError> for HealError {
    fn from(e: handlebars::TemplateError) -> Self {
        Self::Template(e.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HealError>;
