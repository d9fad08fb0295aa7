//! Readiness detection by polling a process log for a marker

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// One bounded wait for a marker to show up in a log file
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    /// Server the log belongs to, for error messages
    pub server: String,

    /// Log file the launched process appends to
    pub source: PathBuf,

    /// Substring signalling readiness
    pub marker: String,

    pub poll_interval: Duration,

    pub max_attempts: usize,
}

impl ReadinessProbe {
    pub fn new(
        server: impl Into<String>,
        source: impl Into<PathBuf>,
        marker: impl Into<String>,
        poll_interval: Duration,
        max_attempts: usize,
    ) -> Self {
        Self {
            server: server.into(),
            source: source.into(),
            marker: marker.into(),
            poll_interval,
            max_attempts,
        }
    }

    /// Poll until the marker appears, returning the attempt that saw it.
    ///
    /// The first check is immediate. Every miss is followed by one
    /// `poll_interval` sleep, so a timeout costs `max_attempts` intervals and
    /// never more than `max_attempts` reads.
    pub async fn wait(&self) -> E2eResult<usize> {
        for attempt in 1..=self.max_attempts {
            if self.check().await? {
                info!(
                    server = %self.server,
                    attempt,
                    "Readiness marker found"
                );
                return Ok(attempt);
            }

            if attempt == 1 {
                info!(server = %self.server, marker = %self.marker, "Waiting for server to start...");
            } else {
                debug!(server = %self.server, attempt, "Marker not seen yet");
            }
            sleep(self.poll_interval).await;
        }

        Err(E2eError::Timeout {
            server: self.server.clone(),
            marker: self.marker.clone(),
            sink: self.source.clone(),
            attempts: self.max_attempts,
        })
    }

    /// Single read of the whole source. A file that does not exist yet counts as empty.
    async fn check(&self) -> E2eResult<bool> {
        match tokio::fs::read(&self.source).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).contains(self.marker.as_str())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Convenience wrapper around [`ReadinessProbe::wait`]
pub async fn wait_for_marker(
    source: &Path,
    marker: &str,
    poll_interval: Duration,
    max_attempts: usize,
) -> E2eResult<()> {
    let server = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    ReadinessProbe::new(server, source, marker, poll_interval, max_attempts)
        .wait()
        .await
        .map(|_| ())
}

/// Last `lines` lines of a log file, empty if it cannot be read
pub fn tail(path: &Path, lines: usize) -> String {
    let content = std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
