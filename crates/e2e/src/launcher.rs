//! Detached process launching
//!
//! Servers are started so that they outlive the function that launched them.
//! Their combined output goes to a per-launch log file that the readiness
//! probe reads; nothing else about the process is tracked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{E2eError, E2eResult};

/// A command line to start an external server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Shell command line, run through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Copy of this command with every `{port}` in its arguments replaced
    pub fn with_port(&self, port: u16) -> Self {
        let port = port.to_string();
        Self {
            args: self.args.iter().map(|a| a.replace("{port}", &port)).collect(),
            ..self.clone()
        }
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Identity of a launched process.
///
/// Only good for logging and for matching a port owner; the launcher keeps
/// no handle that could stop the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessToken {
    pub pid: u32,
    pub sink: PathBuf,
}

/// Starts long-running commands without waiting for them
pub trait ProcessLauncher: Send + Sync {
    fn launch_detached(&self, command: &LaunchCommand, sink: &Path) -> E2eResult<ProcessToken>;
}

/// Launcher spawning real OS processes in their own process group
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl ProcessLauncher for DetachedLauncher {
    fn launch_detached(&self, command: &LaunchCommand, sink: &Path) -> E2eResult<ProcessToken> {
        if let Some(parent) = sink.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout = OpenOptions::new().create(true).append(true).open(sink)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        // Keep terminal signals aimed at the test runner away from the server
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| E2eError::Launch {
            server: command.program.clone(),
            reason: format!("`{}`: {}", command, e),
        })?;

        let pid = child.id();
        info!(pid, command = %command, sink = %sink.display(), "Launched detached process");

        // Reap the child whenever it exits so it never lingers as a zombie
        std::thread::Builder::new()
            .name(format!("reap-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => debug!(pid, %status, "Detached process exited"),
                Err(e) => debug!(pid, error = %e, "Failed to wait for detached process"),
            })?;

        Ok(ProcessToken {
            pid,
            sink: sink.to_path_buf(),
        })
    }
}

/// Fresh log file path for one launch of `name`
pub fn unique_sink(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}-{}.log", name, Uuid::new_v4().simple()))
}
