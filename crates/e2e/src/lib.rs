//! Testrig E2E Test Environment
//!
//! This crate provides the pieces a web application's test suite needs to run
//! browser-driven and HTTP-driven tests against real processes:
//! - Launches the browser automation server and the application server as
//!   detached processes, once per run
//! - Detects readiness by polling each server's log for a marker
//! - Shares one browser session across every test of the run
//! - Reclaims server ports at the end of the run by signalling their owners
//! - Runs a suite of tests once per run, isolating assertion failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TestEnvironment (run scope)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run(tests)        -> init once, record results, shutdown   │
//! │  ServerSupervisor (automation-server, app-server)           │
//! │    ├── probe(port)              -> adopt a live server      │
//! │    ├── ProcessLauncher          -> detached process + log   │
//! │    ├── ReadinessProbe           -> poll log for marker      │
//! │    └── PortReclaimer            -> SIGTERM the port owner   │
//! │  BrowserSessionManager                                      │
//! │    └── BrowserDriver (Selenium RC) -> one shared session    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IntegrationTestCase (per test)  ControllerTestCase         │
//! │    ├── assert_body_has_text        ├── request_url          │
//! │    ├── assert_element_has_text     ├── assert_status_code   │
//! │    └── assert_location             └── assert_redirection   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod assertions;
pub mod browser;
pub mod config;
pub mod controller;
pub mod error;
pub mod integration;
pub mod launcher;
pub mod port;
pub mod readiness;
pub mod runner;
pub mod selenium;
pub mod supervisor;

pub use browser::{BrowserDriver, BrowserSession, BrowserSessionManager, SessionId, SessionState};
pub use config::{BrowserConfig, HarnessConfig, ServerConfig, APP_SERVER, AUTOMATION_SERVER};
pub use controller::{ControllerTestCase, HttpDispatcher, HttpException, HttpResponse, Method, ReqwestDispatcher};
pub use error::{E2eError, E2eResult};
pub use integration::{IntegrationTestCase, TestEnvironment};
pub use launcher::{DetachedLauncher, LaunchCommand, ProcessLauncher, ProcessToken};
pub use port::{KillOutcome, PortProcessKiller, PortReclaimer};
pub use readiness::ReadinessProbe;
pub use runner::{IntegrationTest, TestResult, TestStatus, TestSuiteResult};
pub use supervisor::{ServerState, ServerSupervisor};
