//! Selenium remote-control driver
//!
//! Commands are form posts to `/selenium-server/driver/` and answers are plain
//! text: `OK`, `OK,<value>` or an error message.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::browser::{BrowserDriver, SessionId};
use crate::config::BrowserConfig;
use crate::error::{E2eError, E2eResult};

pub struct SeleniumRcDriver {
    client: reqwest::Client,
    endpoint: String,
    browser: String,
}

impl SeleniumRcDriver {
    pub fn new(host: &str, port: u16, browser: &str, timeout: Duration) -> E2eResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("http://{}:{}/selenium-server/driver/", host, port),
            browser: browser.to_string(),
        })
    }

    /// Driver for the automation server listening on `port`
    pub fn from_config(config: &BrowserConfig, port: u16) -> E2eResult<Self> {
        Self::new(
            &config.automation_host,
            port,
            &config.browser,
            config.command_timeout(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn command(
        &self,
        cmd: &str,
        args: &[&str],
        session: Option<&SessionId>,
    ) -> E2eResult<String> {
        let params = command_params(cmd, args, session);
        debug!(cmd, ?args, "Selenium command");

        let resp = self.client.post(&self.endpoint).form(&params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(E2eError::Driver(format!(
                "{} returned HTTP {}: {}",
                cmd,
                status,
                body.trim()
            )));
        }

        parse_response(cmd, &body)
    }
}

fn command_params(cmd: &str, args: &[&str], session: Option<&SessionId>) -> Vec<(String, String)> {
    let mut params = vec![("cmd".to_string(), cmd.to_string())];
    params.extend(
        args.iter()
            .enumerate()
            .map(|(i, arg)| ((i + 1).to_string(), arg.to_string())),
    );
    if let Some(session) = session {
        params.push(("sessionId".to_string(), session.0.clone()));
    }
    params
}

fn parse_response(cmd: &str, body: &str) -> E2eResult<String> {
    match body.strip_prefix("OK") {
        Some("") => Ok(String::new()),
        Some(rest) if rest.starts_with(',') => Ok(rest[1..].to_string()),
        _ => Err(E2eError::Driver(format!("{} failed: {}", cmd, body.trim()))),
    }
}

#[async_trait]
impl BrowserDriver for SeleniumRcDriver {
    async fn start(&self, base_url: &str) -> E2eResult<SessionId> {
        let id = self
            .command("getNewBrowserSession", &[self.browser.as_str(), base_url], None)
            .await?;
        if id.is_empty() {
            return Err(E2eError::Driver(
                "getNewBrowserSession returned no session id".to_string(),
            ));
        }
        Ok(SessionId(id))
    }

    async fn stop(&self, session: &SessionId) -> E2eResult<()> {
        self.command("testComplete", &[], Some(session)).await.map(|_| ())
    }

    async fn open(&self, session: &SessionId, path: &str) -> E2eResult<()> {
        self.command("open", &[path], Some(session)).await.map(|_| ())
    }

    async fn window_maximize(&self, session: &SessionId) -> E2eResult<()> {
        self.command("windowMaximize", &[], Some(session)).await.map(|_| ())
    }

    async fn get_text(&self, session: &SessionId, locator: &str) -> E2eResult<String> {
        self.command("getText", &[locator], Some(session)).await
    }

    async fn get_body_text(&self, session: &SessionId) -> E2eResult<String> {
        self.command("getBodyText", &[], Some(session)).await
    }

    async fn get_html_source(&self, session: &SessionId) -> E2eResult<String> {
        self.command("getHtmlSource", &[], Some(session)).await
    }

    async fn get_location(&self, session: &SessionId) -> E2eResult<String> {
        self.command("getLocation", &[], Some(session)).await
    }
}
