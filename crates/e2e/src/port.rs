//! Port probing and reclaiming
//!
//! Teardown never fails a run: whatever owns a port is looked up through the
//! platform socket table and sent SIGTERM, and problems are only logged.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::E2eResult;

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// What happened when reclaiming a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// Nothing was listening, no signal was sent
    NoListener,
    /// SIGTERM was delivered to these pids
    Signalled(Vec<u32>),
    /// Some owners were signalled, others could not be
    Partial {
        signalled: Vec<u32>,
        errors: Vec<String>,
    },
    /// Lookup or signal delivery failed; already logged
    Failed(String),
}

/// Frees a port by terminating its owner
pub trait PortReclaimer: Send + Sync {
    fn kill_owner_of_port(&self, port: u16) -> KillOutcome;
}

/// Default reclaimer backed by `lsof` (or `/proc` on Linux) and `kill(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct PortProcessKiller;

impl PortReclaimer for PortProcessKiller {
    fn kill_owner_of_port(&self, port: u16) -> KillOutcome {
        kill_owner_of_port(port)
    }
}

/// Whether anything accepts TCP connections on `localhost:port`
pub fn is_listening(port: u16) -> bool {
    localhost_addrs(port)
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, PROBE_TIMEOUT).is_ok())
}

pub(crate) fn localhost_addrs(port: u16) -> Vec<SocketAddr> {
    match ("localhost", port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(_) => vec![SocketAddr::from(([127, 0, 0, 1], port))],
    }
}

/// Send SIGTERM to whatever listens on `port` without waiting for it to exit
pub fn kill_owner_of_port(port: u16) -> KillOutcome {
    if !is_listening(port) {
        debug!(port, "No listener, nothing to kill");
        return KillOutcome::NoListener;
    }

    let pids = match find_port_owners(port) {
        Ok(pids) => pids,
        Err(e) => {
            warn!(port, error = %e, "Failed to reclaim port");
            return KillOutcome::Failed(e.to_string());
        }
    };

    let outcome = signal_all(pids, std::process::id(), terminate);
    match &outcome {
        KillOutcome::NoListener => {
            warn!(port, "Port is in use but no owning process was found");
            return KillOutcome::Failed(format!("no process found for port {}", port));
        }
        KillOutcome::Signalled(pids) => info!(port, ?pids, "Sent SIGTERM to port owner"),
        KillOutcome::Partial { signalled, errors } => {
            info!(port, pids = ?signalled, "Sent SIGTERM to port owner");
            warn!(port, ?errors, "Some port owners could not be signalled");
        }
        KillOutcome::Failed(reason) => warn!(port, %reason, "Failed to reclaim port"),
    }
    outcome
}

/// Signal every pid except `own`, carrying on past failures.
///
/// Returns `NoListener` when there was nobody to signal.
fn signal_all<F>(pids: Vec<u32>, own: u32, mut terminate: F) -> KillOutcome
where
    F: FnMut(u32) -> Result<(), String>,
{
    let mut signalled = Vec::new();
    let mut errors = Vec::new();

    for pid in pids.into_iter().filter(|pid| *pid != own) {
        match terminate(pid) {
            Ok(()) => signalled.push(pid),
            Err(reason) => errors.push(reason),
        }
    }

    match (signalled.is_empty(), errors.is_empty()) {
        (true, true) => KillOutcome::NoListener,
        (false, true) => KillOutcome::Signalled(signalled),
        (true, false) => KillOutcome::Failed(errors.join("; ")),
        (false, false) => KillOutcome::Partial { signalled, errors },
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<(), String> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| format!("pid {} out of range", pid))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| format!("kill {}: {}", pid, e))
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<(), String> {
    Err(format!("cannot signal pid {} on this platform", pid))
}

/// Pids of processes holding a listening TCP socket on `port`
pub fn find_port_owners(port: u16) -> E2eResult<Vec<u32>> {
    let output = std::process::Command::new("lsof")
        .args(["-t", "-nP", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output();

    match output {
        Ok(output) => {
            // lsof exits 1 when nothing matched
            Ok(parse_pid_list(&String::from_utf8_lossy(&output.stdout)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(port, "lsof not available, falling back to the proc socket table");
            proc_port_owners(port)
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_pid_list(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(target_os = "linux")]
fn proc_port_owners(port: u16) -> E2eResult<Vec<u32>> {
    use std::collections::HashSet;

    let mut inodes = HashSet::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(table) {
            Ok(content) => inodes.extend(listening_inodes(&content, port)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    if inodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")?.filter_map(Result::ok) {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes we may not inspect are skipped
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let owns_socket = fds.filter_map(Result::ok).any(|fd| {
            std::fs::read_link(fd.path())
                .ok()
                .and_then(|target| socket_inode(&target.to_string_lossy()))
                .map(|inode| inodes.contains(&inode))
                .unwrap_or(false)
        });
        if owns_socket {
            pids.push(pid);
        }
    }

    pids.sort_unstable();
    Ok(pids)
}

#[cfg(not(target_os = "linux"))]
fn proc_port_owners(port: u16) -> E2eResult<Vec<u32>> {
    Err(crate::error::E2eError::Teardown {
        port,
        reason: "lsof is required to look up port owners on this platform".to_string(),
    })
}

/// Socket inodes in LISTEN state (`0A`) bound to `port` in a `/proc/net/tcp*` table
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn listening_inodes(table: &str, port: u16) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            let inode = fields.get(9)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            if local_port == port && *state == "0A" {
                inode.parse().ok()
            } else {
                None
            }
        })
        .collect()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// Find a free port to use
pub fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    Ok(TcpListener::bind("127.0.0.1:0")?.local_addr()?.port())
}
