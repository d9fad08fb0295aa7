//! Testrig CLI
//!
//! Command-line interface for starting, inspecting and stopping the servers
//! a browser-driven test run depends on.

pub mod commands;
pub mod output;
