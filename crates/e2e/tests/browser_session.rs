//! Browser session reuse and the integration test case lifecycle, driven by
//! a recording browser driver instead of a real automation server.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

use testrig_e2e::port::find_free_port;
use testrig_e2e::{
    BrowserDriver, BrowserSessionManager, E2eResult, HarnessConfig, IntegrationTest,
    IntegrationTestCase, LaunchCommand, ServerConfig, ServerState, ServerSupervisor, SessionId,
    SessionState, TestEnvironment, TestStatus,
};

#[derive(Default)]
struct RecordingDriver {
    calls: Mutex<Vec<String>>,
    starts: Mutex<usize>,
    location: Mutex<String>,
}

impl RecordingDriver {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl BrowserDriver for RecordingDriver {
    async fn start(&self, base_url: &str) -> E2eResult<SessionId> {
        let mut starts = self.starts.lock().unwrap();
        *starts += 1;
        self.record(format!("start {base_url}"));
        Ok(SessionId(format!("session-{}", *starts)))
    }

    async fn stop(&self, session: &SessionId) -> E2eResult<()> {
        self.record(format!("stop {session}"));
        Ok(())
    }

    async fn open(&self, _session: &SessionId, path: &str) -> E2eResult<()> {
        self.record(format!("open {path}"));
        *self.location.lock().unwrap() = format!("http://localhost:4443{path}");
        Ok(())
    }

    async fn window_maximize(&self, _session: &SessionId) -> E2eResult<()> {
        self.record("windowMaximize");
        Ok(())
    }

    async fn get_text(&self, _session: &SessionId, locator: &str) -> E2eResult<String> {
        Ok(match locator {
            "css=h1" => "Dashboard".to_string(),
            _ => String::new(),
        })
    }

    async fn get_body_text(&self, _session: &SessionId) -> E2eResult<String> {
        Ok("Dashboard Welcome back, Ann".to_string())
    }

    async fn get_html_source(&self, _session: &SessionId) -> E2eResult<String> {
        Ok("<html>\n<body>\n<h1 class=\"title\">Dashboard</h1>\n</body>\n</html>".to_string())
    }

    async fn get_location(&self, _session: &SessionId) -> E2eResult<String> {
        Ok(self.location.lock().unwrap().clone())
    }
}

fn instant_server(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        port: find_free_port().expect("free port"),
        command: Some(LaunchCommand::shell("echo READY")),
        archive_dir: None,
        archive_extension: "jar".to_string(),
        marker: "READY".to_string(),
        poll_interval_ms: 50,
        max_attempts: 40,
    }
}

fn environment(logs: &Path, driver: Arc<RecordingDriver>, stop_automation: bool) -> TestEnvironment {
    let mut config = HarnessConfig {
        log_dir: logs.to_path_buf(),
        stop_automation_on_shutdown: stop_automation,
        automation: instant_server("automation-server"),
        app: instant_server("app-server"),
        ..Default::default()
    };
    config.browser.app_url = "http://localhost".to_string();

    let automation = ServerSupervisor::new(config.automation.clone(), logs);
    let app = ServerSupervisor::new(config.app.clone(), logs);
    TestEnvironment::with_parts(config, automation, app, driver)
}

#[tokio::test]
async fn second_acquire_reuses_the_first_session() {
    let driver = Arc::new(RecordingDriver::default());
    let mut manager = BrowserSessionManager::new(driver.clone());

    let first = manager.acquire_session("http://localhost:4443").await.unwrap();
    let second = manager.acquire_session("http://localhost:4443").await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(*driver.starts.lock().unwrap(), 1);
    assert_eq!(
        driver.calls(),
        vec!["start http://localhost:4443", "windowMaximize", "open /"]
    );
}

#[tokio::test]
async fn release_then_acquire_starts_a_new_session() {
    let driver = Arc::new(RecordingDriver::default());
    let mut manager = BrowserSessionManager::new(driver.clone());

    let first = manager.acquire_session("http://localhost:4443").await.unwrap();
    manager.release_all().await;
    let second = manager.acquire_session("http://localhost:4443").await.unwrap();

    assert_eq!(first.state(), SessionState::Closed);
    assert_eq!(second.state(), SessionState::Open);
    assert_ne!(first.id(), second.id());
}

#[cfg(unix)]
#[tokio::test]
async fn environment_runs_servers_once_and_shares_the_browser() {
    let logs = tempfile::tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::default());
    let mut env = environment(logs.path(), driver.clone(), false);
    let app_port = env.app().port();

    let first = IntegrationTestCase::set_up(&mut env).await.unwrap();
    assert_eq!(env.automation().state(), ServerState::Ready);
    assert_eq!(env.app().state(), ServerState::Ready);
    assert_eq!(first.app_url(), format!("http://localhost:{app_port}/"));

    first.assert_body_has_text("Welcome back").await.unwrap();
    first.assert_body_has_text(&["Dashboard", "Ann"]).await.unwrap();
    first.assert_body_has_not_text("Error").await.unwrap();
    first.assert_element_has_text("css=h1", "Dashboard").await.unwrap();
    first.assert_element_has_not_text("css=h1", "Settings").await.unwrap();
    first.assert_body_has_html("<body><h1 class=\"title\">").await.unwrap();
    first.assert_body_has_not_html("<script").await.unwrap();

    let failure = first.assert_body_has_text("Goodbye").await.unwrap_err();
    assert!(failure.is_assertion());

    first.visit("/users/1").await.unwrap();
    first.assert_location("/users/1").await.unwrap();
    first.assert_location("http://localhost:4443/users/1").await.unwrap();
    assert!(first.assert_location("/users/2").await.unwrap_err().is_assertion());

    let automation_sink = env.automation().sink().map(Path::to_path_buf);
    let second = IntegrationTestCase::set_up(&mut env).await.unwrap();
    assert_eq!(first.session().id(), second.session().id());
    assert_eq!(second.app_url(), first.app_url());
    assert_eq!(env.automation().sink().map(Path::to_path_buf), automation_sink);
    assert_eq!(*driver.starts.lock().unwrap(), 1);

    env.shutdown().await;
    assert_eq!(env.app().state(), ServerState::Stopped);
    assert_eq!(env.automation().state(), ServerState::Ready);
    assert_eq!(second.session().state(), SessionState::Closed);
    assert!(driver.calls().last().unwrap().starts_with("stop session-1"));

    env.stop_automation();
    assert_eq!(env.automation().state(), ServerState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_can_stop_the_automation_server_too() {
    let logs = tempfile::tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::default());
    let mut env = environment(logs.path(), driver, true);

    env.init().await.unwrap();
    env.shutdown().await;

    assert_eq!(env.app().state(), ServerState::Stopped);
    assert_eq!(env.automation().state(), ServerState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn automation_failure_aborts_init() {
    let logs = tempfile::tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::default());
    let mut env = environment(logs.path(), driver.clone(), false);

    let mut broken = env.config().clone();
    broken.automation.marker = "NEVER PRINTED".to_string();
    broken.automation.max_attempts = 2;
    let automation = ServerSupervisor::new(broken.automation.clone(), logs.path());
    let app = ServerSupervisor::new(broken.app.clone(), logs.path());
    env = TestEnvironment::with_parts(broken, automation, app, driver.clone());

    assert!(IntegrationTestCase::set_up(&mut env).await.is_err());
    assert_eq!(env.automation().state(), ServerState::Failed);
    assert_eq!(env.app().state(), ServerState::NotStarted);
    assert!(driver.calls().is_empty());
}

/// Visits a page and expects some text on it
struct ExpectText {
    name: &'static str,
    path: &'static str,
    text: &'static str,
}

#[async_trait]
impl IntegrationTest for ExpectText {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, test: &IntegrationTestCase) -> E2eResult<()> {
        test.visit(self.path).await?;
        test.assert_body_has_text(self.text).await
    }
}

fn expect_text(name: &'static str, text: &'static str) -> Box<dyn IntegrationTest> {
    Box::new(ExpectText {
        name,
        path: "/dashboard",
        text,
    })
}

#[cfg(unix)]
#[tokio::test]
async fn run_records_failures_and_keeps_going() {
    let logs = tempfile::tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::default());
    let mut env = environment(logs.path(), driver.clone(), false);

    let tests = vec![
        expect_text("greets the user", "Welcome back"),
        expect_text("says goodbye", "Goodbye"),
        expect_text("shows the dashboard", "Dashboard"),
    ];
    let suite = env.run(&tests).await.unwrap();

    assert_eq!(suite.total, 3);
    assert_eq!(suite.passed, 2);
    assert_eq!(suite.failed, 1);
    assert_eq!(suite.errored, 0);
    assert!(!suite.success());

    let statuses: Vec<TestStatus> = suite.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![TestStatus::Passed, TestStatus::Failed, TestStatus::Passed]);
    assert!(suite.results[1].error.as_deref().unwrap().contains("Goodbye"));

    // One browser for the whole run, servers brought up once and torn down at the end
    assert_eq!(*driver.starts.lock().unwrap(), 1);
    assert_eq!(driver.calls().iter().filter(|c| c.starts_with("stop")).count(), 1);
    assert_eq!(env.app().state(), ServerState::Stopped);
    assert_eq!(env.automation().state(), ServerState::Ready);
    assert!(env.browsers().current().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn run_aborts_when_servers_do_not_start() {
    let logs = tempfile::tempdir().unwrap();
    let driver = Arc::new(RecordingDriver::default());
    let mut config = environment(logs.path(), driver.clone(), false).config().clone();
    config.app.marker = "NEVER PRINTED".to_string();
    config.app.max_attempts = 2;
    let automation = ServerSupervisor::new(config.automation.clone(), logs.path());
    let app = ServerSupervisor::new(config.app.clone(), logs.path());
    let mut env = TestEnvironment::with_parts(config, automation, app, driver.clone());

    let tests = vec![expect_text("greets the user", "Welcome back")];
    assert!(env.run(&tests).await.is_err());

    assert_eq!(env.app().state(), ServerState::Failed);
    assert!(driver.calls().is_empty());
}
