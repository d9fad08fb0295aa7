//! Server management - launching, readiness checking and reclaiming one external server

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{E2eError, E2eResult};
use crate::launcher::{unique_sink, DetachedLauncher, ProcessLauncher, ProcessToken};
use crate::port::{localhost_addrs, KillOutcome, PortProcessKiller, PortReclaimer};
use crate::readiness::{tail, ReadinessProbe};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Lines of server output logged when a server fails to become ready
const FAILURE_TAIL_LINES: usize = 20;

/// Lifecycle of a supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::NotStarted => "not started",
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Failed => "failed",
            ServerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Supervises one named external server for the duration of a run
pub struct ServerSupervisor {
    config: ServerConfig,
    log_dir: PathBuf,
    state: ServerState,
    sink: Option<PathBuf>,
    process: Option<ProcessToken>,
    launcher: Arc<dyn ProcessLauncher>,
    reclaimer: Arc<dyn PortReclaimer>,
}

impl ServerSupervisor {
    pub fn new(config: ServerConfig, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            log_dir: log_dir.into(),
            state: ServerState::NotStarted,
            sink: None,
            process: None,
            launcher: Arc::new(DetachedLauncher),
            reclaimer: Arc::new(PortProcessKiller),
        }
    }

    /// Replace the process launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the port reclaimer
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn PortReclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Log file of the most recent launch, if this supervisor launched anything
    pub fn sink(&self) -> Option<&Path> {
        self.sink.as_deref()
    }

    /// Process started by the most recent launch
    pub fn process(&self) -> Option<&ProcessToken> {
        self.process.as_ref()
    }

    /// Make sure the server accepts connections, launching it if needed.
    ///
    /// A server already listening on the port (left over from an earlier
    /// run, or started by hand) is adopted as-is.
    pub async fn ensure_running(&mut self) -> E2eResult<()> {
        match self.state {
            ServerState::Ready => return Ok(()),
            ServerState::Failed => return Err(E2eError::ServerFailed(self.config.name.clone())),
            ServerState::NotStarted | ServerState::Stopped | ServerState::Starting => {}
        }

        if probe(self.config.port).await {
            info!(
                server = %self.config.name,
                port = self.config.port,
                "Server already listening, reusing it"
            );
            self.state = ServerState::Ready;
            return Ok(());
        }

        let result = self.launch_and_wait().await;
        match &result {
            Ok(()) => self.state = ServerState::Ready,
            Err(e) => {
                self.state = ServerState::Failed;
                error!(server = %self.config.name, error = %e, "Server failed to start");
                if let Some(sink) = &self.sink {
                    let output = tail(sink, FAILURE_TAIL_LINES);
                    if !output.is_empty() {
                        error!(server = %self.config.name, "Last output:\n{}", output);
                    }
                }
            }
        }
        result
    }

    async fn launch_and_wait(&mut self) -> E2eResult<()> {
        let command = self.config.resolve_command()?;
        let sink = unique_sink(&self.log_dir, &self.config.name);

        self.state = ServerState::Starting;
        self.sink = Some(sink.clone());
        info!(
            server = %self.config.name,
            port = self.config.port,
            command = %command,
            "Starting server"
        );

        let token = self
            .launcher
            .launch_detached(&command, &sink)
            .map_err(|e| match e {
                E2eError::Launch { reason, .. } => E2eError::Launch {
                    server: self.config.name.clone(),
                    reason,
                },
                other => E2eError::Launch {
                    server: self.config.name.clone(),
                    reason: other.to_string(),
                },
            })?;
        self.process = Some(token);

        let probe = ReadinessProbe::new(
            self.config.name.clone(),
            sink,
            self.config.marker.clone(),
            self.config.poll_interval(),
            self.config.max_attempts,
        );
        probe.wait().await?;

        info!(server = %self.config.name, port = self.config.port, "Server is ready");
        Ok(())
    }

    /// Reclaim the port if this run brought the server to `Ready`. Never fails.
    pub fn ensure_stopped(&mut self) {
        if self.state != ServerState::Ready {
            return;
        }
        self.kill();
    }

    /// Reclaim the port whatever the tracked state is. Never fails.
    pub fn kill(&mut self) -> KillOutcome {
        let outcome = self.reclaimer.kill_owner_of_port(self.config.port);
        match &outcome {
            KillOutcome::Failed(reason) => warn!(
                server = %self.config.name,
                port = self.config.port,
                %reason,
                "Teardown incomplete"
            ),
            KillOutcome::Partial { errors, .. } => warn!(
                server = %self.config.name,
                port = self.config.port,
                ?errors,
                "Teardown incomplete"
            ),
            KillOutcome::NoListener | KillOutcome::Signalled(_) => {}
        }
        info!(server = %self.config.name, port = self.config.port, "Server stopped");
        self.state = ServerState::Stopped;
        outcome
    }
}

impl fmt::Debug for ServerSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSupervisor")
            .field("name", &self.config.name)
            .field("port", &self.config.port)
            .field("state", &self.state)
            .field("sink", &self.sink)
            .finish()
    }
}

/// Whether something accepts connections on `localhost:port`
pub async fn probe(port: u16) -> bool {
    for addr in localhost_addrs(port) {
        if let Ok(Ok(_)) = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::LaunchCommand;
    use crate::port::find_free_port;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLauncher {
        launches: Mutex<Vec<LaunchCommand>>,
    }

    impl ProcessLauncher for RecordingLauncher {
        fn launch_detached(&self, command: &LaunchCommand, sink: &Path) -> E2eResult<ProcessToken> {
            self.launches.lock().unwrap().push(command.clone());
            std::fs::write(sink, "booting\nREADY\n")?;
            Ok(ProcessToken { pid: 4242, sink: sink.to_path_buf() })
        }
    }

    #[derive(Default)]
    struct RecordingReclaimer {
        ports: Mutex<Vec<u16>>,
    }

    impl PortReclaimer for RecordingReclaimer {
        fn kill_owner_of_port(&self, port: u16) -> KillOutcome {
            self.ports.lock().unwrap().push(port);
            KillOutcome::Signalled(vec![4242])
        }
    }

    fn server(port: u16) -> ServerConfig {
        ServerConfig {
            name: "stub-server".to_string(),
            port,
            command: Some(LaunchCommand::new("stub").arg("{port}")),
            archive_dir: None,
            archive_extension: "jar".to_string(),
            marker: "READY".to_string(),
            poll_interval_ms: 10,
            max_attempts: 3,
        }
    }

    fn supervisor(
        port: u16,
        dir: &Path,
    ) -> (ServerSupervisor, Arc<RecordingLauncher>, Arc<RecordingReclaimer>) {
        let launcher = Arc::new(RecordingLauncher::default());
        let reclaimer = Arc::new(RecordingReclaimer::default());
        let supervisor = ServerSupervisor::new(server(port), dir)
            .with_launcher(launcher.clone())
            .with_reclaimer(reclaimer.clone());
        (supervisor, launcher, reclaimer)
    }

    #[tokio::test]
    async fn test_ensure_running_twice_launches_once() {
        let dir = tempfile::tempdir().unwrap();
        let port = find_free_port().unwrap();
        let (mut supervisor, launcher, _) = supervisor(port, dir.path());

        supervisor.ensure_running().await.unwrap();
        supervisor.ensure_running().await.unwrap();

        let launches = launcher.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].args, vec![port.to_string()]);
        assert_eq!(supervisor.state(), ServerState::Ready);
        assert_eq!(supervisor.process().unwrap().pid, 4242);
    }

    #[tokio::test]
    async fn test_listening_port_is_adopted_without_launch() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut supervisor, launcher, _) = supervisor(port, dir.path());

        supervisor.ensure_running().await.unwrap();

        assert!(launcher.launches.lock().unwrap().is_empty());
        assert_eq!(supervisor.state(), ServerState::Ready);
        assert!(supervisor.sink().is_none());
    }

    #[tokio::test]
    async fn test_ensure_stopped_is_noop_unless_ready() {
        let dir = tempfile::tempdir().unwrap();
        let port = find_free_port().unwrap();
        let (mut supervisor, _, reclaimer) = supervisor(port, dir.path());

        supervisor.ensure_stopped();
        assert_eq!(supervisor.state(), ServerState::NotStarted);

        supervisor.ensure_running().await.unwrap();
        supervisor.ensure_stopped();
        assert_eq!(supervisor.state(), ServerState::Stopped);

        supervisor.ensure_stopped();
        assert_eq!(*reclaimer.ports.lock().unwrap(), vec![port]);
    }

    #[tokio::test]
    async fn test_failed_server_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let port = find_free_port().unwrap();
        let (supervisor, launcher, _) = supervisor(port, dir.path());
        let mut config = supervisor.config().clone();
        config.marker = "NEVER".to_string();
        let mut supervisor = ServerSupervisor::new(config, dir.path()).with_launcher(launcher.clone());

        let err = supervisor.ensure_running().await.unwrap_err();
        assert!(matches!(err, E2eError::Timeout { attempts: 3, .. }));
        assert_eq!(supervisor.state(), ServerState::Failed);

        let err = supervisor.ensure_running().await.unwrap_err();
        assert!(matches!(err, E2eError::ServerFailed(_)));
        assert_eq!(launcher.launches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_command_fails_server() {
        let dir = tempfile::tempdir().unwrap();
        let port = find_free_port().unwrap();
        let mut config = server(port);
        config.command = None;
        config.archive_dir = Some(dir.path().join("no-archives"));
        let mut supervisor = ServerSupervisor::new(config, dir.path());

        let err = supervisor.ensure_running().await.unwrap_err();
        assert!(matches!(err, E2eError::ArchiveNotFound { .. }));
        assert_eq!(supervisor.state(), ServerState::Failed);
    }

    #[tokio::test]
    async fn test_kill_ignores_tracked_state() {
        let dir = tempfile::tempdir().unwrap();
        let port = find_free_port().unwrap();
        let (mut supervisor, _, reclaimer) = supervisor(port, dir.path());

        let outcome = supervisor.kill();
        assert_eq!(outcome, KillOutcome::Signalled(vec![4242]));
        assert_eq!(supervisor.state(), ServerState::Stopped);
        assert_eq!(*reclaimer.ports.lock().unwrap(), vec![port]);
    }
}
