//! Browser sessions shared across a whole test run

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::E2eResult;

/// Opaque session handle issued by the automation server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote-control boundary to a browser automation server
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a browser pointed at `base_url`
    async fn start(&self, base_url: &str) -> E2eResult<SessionId>;

    /// Close the browser
    async fn stop(&self, session: &SessionId) -> E2eResult<()>;

    /// Navigate to a path relative to the session base URL
    async fn open(&self, session: &SessionId, path: &str) -> E2eResult<()>;

    async fn window_maximize(&self, session: &SessionId) -> E2eResult<()>;

    /// Text of the element matching `locator`
    async fn get_text(&self, session: &SessionId, locator: &str) -> E2eResult<String>;

    async fn get_body_text(&self, session: &SessionId) -> E2eResult<String>;

    async fn get_html_source(&self, session: &SessionId) -> E2eResult<String>;

    /// Absolute URL of the current page
    async fn get_location(&self, session: &SessionId) -> E2eResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

/// Handle to the run-wide browser session. Clones share the same session.
#[derive(Clone)]
pub struct BrowserSession {
    id: SessionId,
    base_url: String,
    open: Arc<AtomicBool>,
    driver: Arc<dyn BrowserDriver>,
}

impl BrowserSession {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn state(&self) -> SessionState {
        if self.open.load(Ordering::SeqCst) {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub async fn open(&self, path: &str) -> E2eResult<()> {
        self.driver.open(&self.id, path).await
    }

    pub async fn window_maximize(&self) -> E2eResult<()> {
        self.driver.window_maximize(&self.id).await
    }

    pub async fn text(&self, locator: &str) -> E2eResult<String> {
        self.driver.get_text(&self.id, locator).await
    }

    pub async fn body_text(&self) -> E2eResult<String> {
        self.driver.get_body_text(&self.id).await
    }

    pub async fn html_source(&self) -> E2eResult<String> {
        self.driver.get_html_source(&self.id).await
    }

    pub async fn location(&self) -> E2eResult<String> {
        self.driver.get_location(&self.id).await
    }
}

impl fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserSession")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("state", &self.state())
            .finish()
    }
}

/// Owns the single browser session of a run.
///
/// Starting a browser is slow, so the first test pays for it and every later
/// test reuses it. Cookies and other browser state carry over between tests.
pub struct BrowserSessionManager {
    driver: Arc<dyn BrowserDriver>,
    session: Option<BrowserSession>,
}

impl BrowserSessionManager {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            session: None,
        }
    }

    /// The live session, if one has been started
    pub fn current(&self) -> Option<&BrowserSession> {
        self.session.as_ref()
    }

    /// Start the run's session, or send the existing one back to the root path
    pub async fn acquire_session(&mut self, base_url: &str) -> E2eResult<BrowserSession> {
        if let Some(session) = &self.session {
            debug!(session = %session.id, "Reusing browser session");
            session.open("/").await?;
            return Ok(session.clone());
        }

        let id = self.driver.start(base_url).await?;
        let session = BrowserSession {
            id,
            base_url: base_url.to_string(),
            open: Arc::new(AtomicBool::new(true)),
            driver: self.driver.clone(),
        };
        // The session exists on the server from here on and must be stopped at run end
        self.session = Some(session.clone());
        session.window_maximize().await?;

        info!(session = %session.id, base_url, "Browser session started");
        Ok(session)
    }

    /// Stop the session if there is one. Failures are logged only.
    pub async fn release_all(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.open.store(false, Ordering::SeqCst);
        match self.driver.stop(&session.id).await {
            Ok(()) => info!(session = %session.id, "Browser session stopped"),
            Err(e) => warn!(session = %session.id, error = %e, "Failed to stop browser session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::E2eError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedDriver {
        calls: Mutex<Vec<String>>,
        fail_stop: bool,
    }

    impl ScriptedDriver {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl BrowserDriver for ScriptedDriver {
        async fn start(&self, base_url: &str) -> E2eResult<SessionId> {
            self.record(format!("start {base_url}"));
            Ok(SessionId("s-1".to_string()))
        }
        async fn stop(&self, session: &SessionId) -> E2eResult<()> {
            self.record(format!("stop {session}"));
            if self.fail_stop {
                return Err(E2eError::Driver("connection refused".to_string()));
            }
            Ok(())
        }
        async fn open(&self, _session: &SessionId, path: &str) -> E2eResult<()> {
            self.record(format!("open {path}"));
            Ok(())
        }
        async fn window_maximize(&self, _session: &SessionId) -> E2eResult<()> {
            self.record("maximize".to_string());
            Ok(())
        }
        async fn get_text(&self, _session: &SessionId, locator: &str) -> E2eResult<String> {
            Ok(format!("text of {locator}"))
        }
        async fn get_body_text(&self, _session: &SessionId) -> E2eResult<String> {
            Ok(String::new())
        }
        async fn get_html_source(&self, _session: &SessionId) -> E2eResult<String> {
            Ok(String::new())
        }
        async fn get_location(&self, _session: &SessionId) -> E2eResult<String> {
            Ok("http://localhost:4443/".to_string())
        }
    }

    #[tokio::test]
    async fn test_release_without_session_is_noop() {
        let driver = Arc::new(ScriptedDriver::default());
        let mut manager = BrowserSessionManager::new(driver.clone());

        manager.release_all().await;
        assert!(driver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_closes_every_clone() {
        let driver = Arc::new(ScriptedDriver::default());
        let mut manager = BrowserSessionManager::new(driver.clone());

        let session = manager.acquire_session("http://localhost:4443").await.unwrap();
        assert_eq!(session.state(), SessionState::Open);

        manager.release_all().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_release_swallows_stop_failure() {
        let driver = Arc::new(ScriptedDriver {
            fail_stop: true,
            ..Default::default()
        });
        let mut manager = BrowserSessionManager::new(driver.clone());
        manager.acquire_session("http://localhost:4443").await.unwrap();

        manager.release_all().await;
        assert!(manager.current().is_none());
        assert_eq!(driver.calls.lock().unwrap().last().unwrap(), "stop s-1");
    }
}
