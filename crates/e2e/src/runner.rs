//! Run-level driver for browser test suites
//!
//! [`TestEnvironment::run`] starts the servers once, runs every test against
//! the shared browser session, records each outcome and always shuts the
//! environment down afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::E2eResult;
use crate::integration::{IntegrationTestCase, TestEnvironment};

/// One named browser-driven test
#[async_trait]
pub trait IntegrationTest: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, test: &IntegrationTestCase) -> E2eResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    /// An assertion did not hold
    Failed,
    /// The test could not run to completion (driver or setup error)
    Errored,
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running all tests of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.passed == self.total
    }
}

impl TestEnvironment {
    /// Run `tests` in order within one environment lifetime.
    ///
    /// A failing or erroring test is recorded and the run moves on. Only a
    /// failure to bring the servers up aborts the run; the environment is shut
    /// down in every case.
    pub async fn run(&mut self, tests: &[Box<dyn IntegrationTest>]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();

        if let Err(e) = self.init().await {
            error!(error = %e, "Test environment failed to start");
            self.shutdown().await;
            return Err(e);
        }

        info!("Running {} test(s)...", tests.len());
        let mut suite = TestSuiteResult {
            total: tests.len(),
            ..Default::default()
        };

        for test in tests {
            let result = self.run_one(test.as_ref()).await;
            match result.status {
                TestStatus::Passed => {
                    suite.passed += 1;
                    info!("✓ {} ({} ms)", result.name, result.duration_ms);
                }
                TestStatus::Failed => {
                    suite.failed += 1;
                    error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or(""));
                }
                TestStatus::Errored => {
                    suite.errored += 1;
                    warn!("! {} - {}", result.name, result.error.as_deref().unwrap_or(""));
                }
            }
            suite.results.push(result);
        }

        self.shutdown().await;

        suite.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Test Results: {} passed, {} failed, {} errored ({} ms)",
            suite.passed, suite.failed, suite.errored, suite.duration_ms
        );
        Ok(suite)
    }

    async fn run_one(&mut self, test: &dyn IntegrationTest) -> TestResult {
        let start = Instant::now();
        let outcome = match IntegrationTestCase::set_up(self).await {
            Ok(case) => test.run(&case).await,
            Err(e) => Err(e),
        };

        let (status, error) = match outcome {
            Ok(()) => (TestStatus::Passed, None),
            Err(e) if e.is_assertion() => (TestStatus::Failed, Some(e.to_string())),
            Err(e) => (TestStatus::Errored, Some(e.to_string())),
        };

        TestResult {
            name: test.name().to_string(),
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            error,
        }
    }
}
