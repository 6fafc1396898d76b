//! Semantic error types for the runbox application.
//!
//! This module defines the error hierarchy for runbox, following the principle
//! of using semantic error enums (via `thiserror`) for conditions the caller
//! might inspect, retry, or map to an HTTP status, while reserving opaque
//! errors (`eyre::Report`) for the application boundary.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found at the expected path.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// The path where the configuration file was expected.
        path: Utf8PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration
    /// loading.
    ///
    /// This wraps errors from the layered configuration system, including
    /// file parsing, environment variable parsing, CLI argument parsing, and
    /// missing required fields after layer merging.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors raised by the uid pool on capacity violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Every identity in the pool is currently reserved.
    #[error("uid pool is exhausted")]
    Exhausted,

    /// The pool already holds its full capacity of identities.
    ///
    /// Raised on release as a defensive check against double-release.
    #[error("uid pool is already full")]
    Full,
}

/// Errors raised when resolving a submitted language tag.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LanguageError {
    /// The submitted language tag has no entry in the extension table.
    #[error("unsupported language '{language}'")]
    Unsupported {
        /// The language tag as submitted.
        language: String,
    },
}

/// Errors that can occur while provisioning a run's workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The private temporary directory could not be created.
    #[error("failed to create workspace directory: {message}")]
    CreateFailed {
        /// A description of the failure.
        message: String,
    },

    /// The source file could not be written into the workspace.
    #[error("failed to write source file '{path}': {message}")]
    WriteFailed {
        /// The path of the file that could not be written.
        path: Utf8PathBuf,
        /// A description of the I/O failure.
        message: String,
    },
}

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Failed to connect to the container engine socket.
    #[error("failed to connect to container engine: {message}")]
    ConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// Failed to create a container.
    #[error("failed to create container: {message}")]
    CreateFailed {
        /// A description of the creation failure.
        message: String,
    },

    /// Failed to start a container.
    #[error("failed to start container '{container_id}': {message}")]
    StartFailed {
        /// The ID of the container that failed to start.
        container_id: String,
        /// A description of the start failure.
        message: String,
    },

    /// A container operation was attempted before the container was created.
    ///
    /// This is an ordering-invariant violation in the caller, not an engine
    /// failure.
    #[error("container has not been created yet")]
    NotCreated,

    /// Failed to attach to a container's output streams.
    #[error("failed to attach to container '{container_id}': {message}")]
    AttachFailed {
        /// The ID of the container.
        container_id: String,
        /// A description of the attach failure.
        message: String,
    },

    /// The engine reported an opaque failure during wait, stop, or remove.
    #[error("container runtime failure for '{container_id}': {message}")]
    RuntimeFailure {
        /// The ID of the container.
        container_id: String,
        /// A description of the failure.
        message: String,
    },

    /// Health check failed - engine did not respond correctly.
    #[error("container engine health check failed: {message}")]
    HealthCheckFailed {
        /// A description of the health check failure.
        message: String,
    },

    /// Health check timed out.
    #[error("container engine health check timed out after {seconds} seconds")]
    HealthCheckTimeout {
        /// The timeout duration in seconds.
        seconds: u64,
    },
}

/// Top-level error type for the runbox application.
///
/// This enum aggregates all domain-specific errors into a single type that
/// can be used throughout the application. At the application boundary
/// (main.rs), these errors are typically converted to `eyre::Report` for
/// human-readable error reporting.
#[derive(Debug, Error)]
pub enum RunboxError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A uid pool capacity violation.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A submitted language tag could not be resolved.
    #[error(transparent)]
    Language(#[from] LanguageError),

    /// An error occurred while provisioning a workspace.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// An error occurred during container operations.
    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// A specialised `Result` type for runbox operations.
pub type Result<T> = std::result::Result<T, RunboxError>;
