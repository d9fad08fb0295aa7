//! Error types for the test environment

use std::path::PathBuf;
use thiserror::Error;

use crate::controller::HttpException;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Failed to launch {server}: {reason}")]
    Launch { server: String, reason: String },

    #[error(
        "{server} did not become ready: marker '{marker}' not found in {} after {attempts} attempts",
        sink.display()
    )]
    Timeout {
        server: String,
        marker: String,
        sink: PathBuf,
        attempts: usize,
    },

    #[error("{0} failed to start earlier in this run")]
    ServerFailed(String),

    #[error(
        "Automation server not found. Run it on its port or place a .{extension} archive in '{}'",
        dir.display()
    )]
    ArchiveNotFound { dir: PathBuf, extension: String },

    #[error("Teardown of port {port} failed: {reason}")]
    Teardown { port: u16, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("HTTP exception: {0}")]
    HttpException(HttpException),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl E2eError {
    /// Whether this error is a failed expectation rather than an environment problem
    pub fn is_assertion(&self) -> bool {
        matches!(self, E2eError::AssertionFailed(_))
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
