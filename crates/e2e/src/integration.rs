//! Browser-driven integration test cases
//!
//! A [`TestEnvironment`] lives for the whole test run: it starts the automation
//! and application servers once, hands the same browser session to every test,
//! and tears things down in [`TestEnvironment::shutdown`]. Each test builds an
//! [`IntegrationTestCase`] from it and asserts on the rendered page.
//!
//! ```no_run
//! use testrig_e2e::{HarnessConfig, IntegrationTestCase, TestEnvironment};
//!
//! # async fn run() -> testrig_e2e::E2eResult<()> {
//! let mut env = TestEnvironment::new(HarnessConfig::default())?;
//! env.init().await?;
//!
//! let test = IntegrationTestCase::set_up(&mut env).await?;
//! test.visit("/login").await?;
//! test.assert_body_has_text("Sign in").await?;
//!
//! env.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::assertions::{contains_all, contains_none, Needles};
use crate::browser::{BrowserDriver, BrowserSession, BrowserSessionManager};
use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};
use crate::port::KillOutcome;
use crate::selenium::SeleniumRcDriver;
use crate::supervisor::ServerSupervisor;

/// Run-scoped servers and browser session
pub struct TestEnvironment {
    config: HarnessConfig,
    automation: ServerSupervisor,
    app: ServerSupervisor,
    browsers: BrowserSessionManager,
    initialized: bool,
}

impl TestEnvironment {
    /// Environment driving a Selenium server as described by `config`
    pub fn new(config: HarnessConfig) -> E2eResult<Self> {
        config.validate()?;
        let driver = SeleniumRcDriver::from_config(&config.browser, config.automation.port)?;
        let automation = ServerSupervisor::new(config.automation.clone(), &config.log_dir);
        let app = ServerSupervisor::new(config.app.clone(), &config.log_dir);
        Ok(Self::with_parts(config, automation, app, Arc::new(driver)))
    }

    /// Environment from already-built supervisors and browser driver
    pub fn with_parts(
        config: HarnessConfig,
        automation: ServerSupervisor,
        app: ServerSupervisor,
        driver: Arc<dyn BrowserDriver>,
    ) -> Self {
        Self {
            config,
            automation,
            app,
            browsers: BrowserSessionManager::new(driver),
            initialized: false,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn automation(&self) -> &ServerSupervisor {
        &self.automation
    }

    pub fn app(&self) -> &ServerSupervisor {
        &self.app
    }

    pub fn browsers(&self) -> &BrowserSessionManager {
        &self.browsers
    }

    /// Start both servers. Runs once; later calls return immediately.
    pub async fn init(&mut self) -> E2eResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.automation.ensure_running().await?;
        self.app.ensure_running().await?;
        self.initialized = true;
        info!(app_url = %self.app_url()?, "Test environment ready");
        Ok(())
    }

    /// Application URL including the app-server port
    pub fn app_url(&self) -> E2eResult<String> {
        url_with_port(&self.config.browser.app_url, self.app.port())
    }

    /// Stop the application server and the browser.
    ///
    /// The automation server keeps running for the next run unless
    /// `stop_automation_on_shutdown` is set; see [`Self::stop_automation`].
    pub async fn shutdown(&mut self) {
        self.app.ensure_stopped();
        self.browsers.release_all().await;
        if self.config.stop_automation_on_shutdown {
            self.automation.ensure_stopped();
        }
        self.initialized = false;
        info!("Test environment shut down");
    }

    /// Explicitly reclaim the automation server port
    pub fn stop_automation(&mut self) -> KillOutcome {
        self.automation.kill()
    }
}

/// One browser-driven test
#[derive(Debug)]
pub struct IntegrationTestCase {
    session: BrowserSession,
    app_url: String,
}

impl IntegrationTestCase {
    /// Per-test setup: make sure the environment is up, then start or reuse
    /// the browser against the app URL.
    pub async fn set_up(env: &mut TestEnvironment) -> E2eResult<Self> {
        env.init().await?;
        let app_url = env.app_url()?;
        let session = env.browsers.acquire_session(&app_url).await?;
        Ok(Self { session, app_url })
    }

    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    pub async fn visit(&self, path: &str) -> E2eResult<()> {
        self.session.open(path).await
    }

    pub async fn assert_body_has_text<N: Needles + ?Sized>(&self, needles: &N) -> E2eResult<()> {
        let text = self.session.body_text().await?;
        contains_all(&text, needles, "Body text")
    }

    pub async fn assert_body_has_not_text<N: Needles + ?Sized>(&self, needles: &N) -> E2eResult<()> {
        let text = self.session.body_text().await?;
        contains_none(&text, needles, "Body text")
    }

    pub async fn assert_element_has_text<N: Needles + ?Sized>(
        &self,
        locator: &str,
        needles: &N,
    ) -> E2eResult<()> {
        let text = self.session.text(locator).await?;
        contains_all(&text, needles, &format!("Element '{}'", locator))
    }

    pub async fn assert_element_has_not_text<N: Needles + ?Sized>(
        &self,
        locator: &str,
        needles: &N,
    ) -> E2eResult<()> {
        let text = self.session.text(locator).await?;
        contains_none(&text, needles, &format!("Element '{}'", locator))
    }

    pub async fn assert_body_has_html<N: Needles + ?Sized>(&self, needles: &N) -> E2eResult<()> {
        let html = self.session.html_source().await?.replace('\n', "");
        contains_all(&html, needles, "Body html")
    }

    pub async fn assert_body_has_not_html<N: Needles + ?Sized>(&self, needles: &N) -> E2eResult<()> {
        let html = self.session.html_source().await?.replace('\n', "");
        contains_none(&html, needles, "Body html")
    }

    /// Compare the browser location to `expected`, ignoring a leading
    /// `http://localhost[:port]` on either side.
    pub async fn assert_location(&self, expected: &str) -> E2eResult<()> {
        let current = self.session.location().await?;
        if normalize_location(&current) == normalize_location(expected) {
            Ok(())
        } else {
            Err(E2eError::AssertionFailed(format!(
                "The current location ({}) is not '{}'",
                current, expected
            )))
        }
    }
}

/// Path, query and fragment of a `localhost` URL. Anything else is returned unchanged.
pub fn normalize_location(location: &str) -> String {
    let parsed = if location.starts_with("//") {
        Url::parse(&format!("http:{}", location))
    } else {
        Url::parse(location)
    };

    match parsed {
        Ok(url) if url.host_str() == Some("localhost") => {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            if let Some(fragment) = url.fragment() {
                path.push('#');
                path.push_str(fragment);
            }
            path
        }
        _ => location.to_string(),
    }
}

/// `url` with its port set to `port`, replacing any port already there
pub fn url_with_port(url: &str, port: u16) -> E2eResult<String> {
    let mut parsed = Url::parse(url)?;
    parsed
        .set_port(Some(port))
        .map_err(|()| E2eError::Config(format!("'{}' cannot carry a port", url)))?;
    Ok(parsed.into())
}
