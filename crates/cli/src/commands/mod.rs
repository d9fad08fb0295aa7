//! CLI Commands

pub mod port;
pub mod server;
