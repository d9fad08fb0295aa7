//! Server Commands
//!
//! Bring the automation and application servers up and down outside of a
//! test run, using the same supervisors the test environment uses.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::debug;

use testrig_e2e::port::{find_port_owners, is_listening};
use testrig_e2e::{HarnessConfig, KillOutcome, ServerConfig, ServerSupervisor};

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct DownArgs {
    /// Also stop the automation server
    #[arg(short, long)]
    pub all: bool,
}

/// Listening state of one configured server
#[derive(Serialize, Clone)]
pub struct ServerStatus {
    pub name: String,
    pub port: u16,
    pub listening: bool,
    pub pids: Vec<u32>,
}

impl TableDisplay for ServerStatus {
    fn headers() -> Vec<&'static str> {
        vec!["Server", "Port", "Listening", "PIDs"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.port.to_string(),
            if self.listening { "yes" } else { "no" }.to_string(),
            self.pids
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ]
    }
}

fn server_status(server: &ServerConfig) -> ServerStatus {
    let listening = is_listening(server.port);
    let pids = if listening {
        find_port_owners(server.port).unwrap_or_else(|e| {
            debug!(port = server.port, error = %e, "Owner lookup failed");
            Vec::new()
        })
    } else {
        Vec::new()
    };

    ServerStatus {
        name: server.name.clone(),
        port: server.port,
        listening,
        pids,
    }
}

/// Start both servers unless they already listen, and leave them running
pub async fn up(config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    for server in [&config.automation, &config.app] {
        let mut supervisor = ServerSupervisor::new(server.clone(), &config.log_dir);
        supervisor
            .ensure_running()
            .await
            .with_context(|| format!("{} did not start", server.name))?;

        match supervisor.sink() {
            Some(sink) => print_success(&format!(
                "{} ready on port {} (log: {})",
                server.name,
                server.port,
                sink.display()
            )),
            None => print_success(&format!(
                "{} already listening on port {}",
                server.name, server.port
            )),
        }
    }

    status(config, format)
}

/// Stop the application server, and the automation server with `--all`
pub fn down(config: &HarnessConfig, args: DownArgs) -> Result<()> {
    stop(&config.app, config);
    if args.all {
        stop(&config.automation, config);
    }
    Ok(())
}

pub fn stop_automation(config: &HarnessConfig) -> Result<()> {
    stop(&config.automation, config);
    Ok(())
}

fn stop(server: &ServerConfig, config: &HarnessConfig) {
    let mut supervisor = ServerSupervisor::new(server.clone(), &config.log_dir);
    report_kill(&server.name, server.port, &supervisor.kill());
}

pub(crate) fn report_kill(name: &str, port: u16, outcome: &KillOutcome) {
    match outcome {
        KillOutcome::NoListener => {
            print_warning(&format!("{} was not listening on port {}", name, port))
        }
        KillOutcome::Signalled(pids) => print_success(&format!(
            "Sent SIGTERM to {} on port {} (pid {:?})",
            name, port, pids
        )),
        KillOutcome::Partial { signalled, errors } => print_warning(&format!(
            "Sent SIGTERM to {} on port {} (pid {:?}), but: {}",
            name,
            port,
            signalled,
            errors.join("; ")
        )),
        KillOutcome::Failed(reason) => {
            print_warning(&format!("Could not stop {} on port {}: {}", name, port, reason))
        }
    }
}

pub fn status(config: &HarnessConfig, format: OutputFormat) -> Result<()> {
    let statuses: Vec<ServerStatus> = [&config.automation, &config.app]
        .into_iter()
        .map(server_status)
        .collect();
    print_list(&statuses, format);
    Ok(())
}
