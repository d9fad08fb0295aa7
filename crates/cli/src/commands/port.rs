//! Port Commands
//!
//! Low-level probing and reclaiming of TCP ports.

use anyhow::Result;
use clap::Subcommand;

use testrig_e2e::port::{find_port_owners, is_listening, kill_owner_of_port};

use crate::commands::server::report_kill;
use crate::output::{print_success, print_warning};

#[derive(Subcommand)]
pub enum PortCommands {
    /// Check whether anything listens on a port
    Probe {
        port: u16,
    },

    /// List the processes listening on a port
    Owners {
        port: u16,
    },

    /// Send SIGTERM to whatever listens on a port
    Kill {
        port: u16,
    },
}

pub fn execute(cmd: PortCommands) -> Result<()> {
    match cmd {
        PortCommands::Probe { port } => {
            if is_listening(port) {
                print_success(&format!("Port {} is listening", port));
            } else {
                print_warning(&format!("Nothing listens on port {}", port));
                std::process::exit(1);
            }
        }
        PortCommands::Owners { port } => {
            let pids = find_port_owners(port)?;
            if pids.is_empty() {
                print_warning(&format!("No process owns port {}", port));
            }
            for pid in pids {
                println!("{}", pid);
            }
        }
        PortCommands::Kill { port } => {
            report_kill("port owner", port, &kill_owner_of_port(port));
        }
    }
    Ok(())
}
