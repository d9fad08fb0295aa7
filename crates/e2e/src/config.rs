//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use walkdir::WalkDir;

use crate::error::{E2eError, E2eResult};
use crate::launcher::LaunchCommand;

/// Logical name of the browser automation server
pub const AUTOMATION_SERVER: &str = "automation-server";

/// Logical name of the application server under test
pub const APP_SERVER: &str = "app-server";

/// Top-level configuration for a test run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory receiving one log file per launched process
    pub log_dir: PathBuf,

    /// Also stop the automation server when the environment shuts down
    pub stop_automation_on_shutdown: bool,

    /// Browser automation server
    pub automation: ServerConfig,

    /// Application server
    pub app: ServerConfig,

    /// Browser session settings
    pub browser: BrowserConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir().join("testrig"),
            stop_automation_on_shutdown: false,
            automation: ServerConfig::automation(),
            app: ServerConfig::app(),
            browser: BrowserConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the supervisors cannot act on
    pub fn validate(&self) -> E2eResult<()> {
        if self.automation.port == self.app.port {
            return Err(E2eError::Config(format!(
                "{} and {} cannot share port {}",
                self.automation.name, self.app.name, self.app.port
            )));
        }
        Url::parse(&self.browser.app_url)?;
        self.automation.validate()?;
        self.app.validate()
    }
}

/// How to launch, probe and await one external server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logical name used in logs and errors
    pub name: String,

    /// Port the server listens on
    pub port: u16,

    /// Explicit launch command. `{port}` in arguments is replaced with `port`.
    #[serde(default)]
    pub command: Option<LaunchCommand>,

    /// Directory scanned for an executable archive when `command` is unset
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,

    /// Extension of the archive looked up in `archive_dir`
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,

    /// Substring the server writes to its output once it accepts requests
    pub marker: String,

    /// Delay between two readiness checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of readiness checks before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_archive_extension() -> String {
    "jar".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> usize {
    60
}

impl ServerConfig {
    /// Selenium standalone server, looked up in `~/.selenium` unless a command is given
    pub fn automation() -> Self {
        Self {
            name: AUTOMATION_SERVER.to_string(),
            port: 4444,
            command: None,
            archive_dir: Some(home_dir().join(".selenium")),
            archive_extension: default_archive_extension(),
            marker: "Started org.openqa.jetty.jetty.Server".to_string(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }

    /// Framework development server
    pub fn app() -> Self {
        Self {
            name: APP_SERVER.to_string(),
            port: 4443,
            command: Some(
                LaunchCommand::new("php")
                    .args(["artisan", "serve", "--port", "{port}"]),
            ),
            archive_dir: None,
            archive_extension: default_archive_extension(),
            marker: "development server started".to_string(),
            poll_interval_ms: 250,
            max_attempts: 40,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> E2eResult<()> {
        if self.marker.is_empty() {
            return Err(E2eError::Config(format!("{}: readiness marker is empty", self.name)));
        }
        if self.max_attempts == 0 {
            return Err(E2eError::Config(format!("{}: max_attempts must be at least 1", self.name)));
        }
        if self.command.is_none() && self.archive_dir.is_none() {
            return Err(E2eError::Config(format!(
                "{}: either command or archive_dir must be set",
                self.name
            )));
        }
        Ok(())
    }

    /// Work out the command to start this server.
    ///
    /// An explicit command wins. Otherwise the first archive in `archive_dir`
    /// (by file name) is started with `java -jar <archive> -port <port>`.
    pub fn resolve_command(&self) -> E2eResult<LaunchCommand> {
        if let Some(command) = &self.command {
            return Ok(command.with_port(self.port));
        }

        let dir = self.archive_dir.as_ref().ok_or_else(|| {
            E2eError::Config(format!("{}: no launch command configured", self.name))
        })?;
        let archive = find_archive(dir, &self.archive_extension).ok_or_else(|| {
            E2eError::ArchiveNotFound {
                dir: dir.clone(),
                extension: self.archive_extension.clone(),
            }
        })?;

        Ok(LaunchCommand::new("java")
            .arg("-jar")
            .arg(archive.to_string_lossy())
            .arg("-port")
            .arg(self.port.to_string()))
    }
}

/// First regular file in `dir` with the given extension, in file-name order
pub fn find_archive(dir: &Path, extension: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .find(|path| {
            path.extension()
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
}

/// Browser session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Host the automation server is reached on
    pub automation_host: String,

    /// Browser launcher string passed to the automation server
    pub browser: String,

    /// Externally visible application URL, without the app-server port
    pub app_url: String,

    /// Timeout applied to each automation command
    pub command_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            automation_host: "localhost".to_string(),
            browser: "*firefox".to_string(),
            app_url: "http://localhost".to_string(),
            command_timeout_secs: 60,
        }
    }
}

impl BrowserConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Home directory helper
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
