//! HTTP-level controller test cases
//!
//! Requests go through an [`HttpDispatcher`]. An in-process dispatcher may
//! report framework-level aborts as [`HttpException`]s; those are kept as the
//! last exception so status assertions can inspect them later.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::assertions::{contains_all, contains_none, Needles};
use crate::error::{E2eError, E2eResult};

/// Status codes accepted by [`ControllerTestCase::assert_redirection`]
pub const REDIRECT_STATUSES: [u16; 6] = [201, 301, 302, 303, 307, 308];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Params = BTreeMap<String, String>;

/// Response of one dispatched request
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-case
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Session values after the request, when the dispatcher can see them
    pub session: BTreeMap<String, String>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// HTTP error raised by the application instead of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpException {
    pub status: u16,
    pub message: String,
}

impl fmt::Display for HttpException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.message)
    }
}

/// Sends requests to the application
#[async_trait]
pub trait HttpDispatcher: Send + Sync {
    async fn dispatch(&self, method: Method, url: &str, params: &Params) -> E2eResult<HttpResponse>;

    /// URL of a named controller action
    fn action_url(&self, _action: &str, _params: &Params) -> Option<String> {
        None
    }

    /// Base that relative redirect locations are resolved against
    fn base_url(&self) -> &str;

    /// Whether [`HttpResponse::session`] reflects the application session
    fn observes_session(&self) -> bool {
        true
    }
}

/// Dispatcher issuing real requests to a running application server.
///
/// The server-side session is not visible over the wire, so responses carry
/// an empty session map and [`ControllerTestCase::assert_session_has`] is
/// rejected as a configuration error.
pub struct ReqwestDispatcher {
    client: reqwest::Client,
    base_url: Url,
    actions: BTreeMap<String, String>,
}

impl ReqwestDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        // Relative paths resolve below the base path only with a trailing slash
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            actions: BTreeMap::new(),
        })
    }

    /// Register the path of a named action
    pub fn with_action(mut self, action: impl Into<String>, path: impl Into<String>) -> Self {
        self.actions.insert(action.into(), path.into());
        self
    }

    fn absolute(&self, url: &str) -> E2eResult<Url> {
        Ok(self.base_url.join(url)?)
    }
}

#[async_trait]
impl HttpDispatcher for ReqwestDispatcher {
    async fn dispatch(&self, method: Method, url: &str, params: &Params) -> E2eResult<HttpResponse> {
        let url = self.absolute(url)?;
        debug!(%method, %url, "Dispatching request");

        let request = match method {
            Method::Get => self.client.get(url).query(params),
            Method::Delete => self.client.delete(url).query(params),
            Method::Post => self.client.post(url).form(params),
            Method::Put => self.client.put(url).form(params),
            Method::Patch => self.client.patch(url).form(params),
        };

        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            session: BTreeMap::new(),
        })
    }

    fn action_url(&self, action: &str, _params: &Params) -> Option<String> {
        let path = self.actions.get(action)?;
        self.absolute(path).ok().map(String::from)
    }

    fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn observes_session(&self) -> bool {
        false
    }
}

/// One HTTP-driven test. Build a fresh one per test so input and the last
/// exception start out empty.
pub struct ControllerTestCase {
    dispatcher: Arc<dyn HttpDispatcher>,
    request_input: Params,
    last_exception: Option<HttpException>,
    response: Option<HttpResponse>,
}

impl ControllerTestCase {
    pub fn new(dispatcher: Arc<dyn HttpDispatcher>) -> Self {
        Self {
            dispatcher,
            request_input: Params::new(),
            last_exception: None,
            response: None,
        }
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    pub fn last_exception(&self) -> Option<&HttpException> {
        self.last_exception.as_ref()
    }

    /// Parameters merged into the next requests, overriding request params
    pub fn with_input<I, K, V>(&mut self, input: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.request_input = input
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Request the URL of a named action
    pub async fn request_action(
        &mut self,
        method: Method,
        action: &str,
        params: Params,
    ) -> E2eResult<&mut Self> {
        let url = self
            .dispatcher
            .action_url(action, &params)
            .ok_or_else(|| E2eError::Config(format!("Action '{}' does not exist", action)))?;
        self.request_url(method, &url, params).await
    }

    pub async fn request_url(
        &mut self,
        method: Method,
        url: &str,
        mut params: Params,
    ) -> E2eResult<&mut Self> {
        params.extend(self.request_input.clone());
        self.response = None;
        self.last_exception = None;

        match self.dispatcher.dispatch(method, url, &params).await {
            Ok(response) => self.response = Some(response),
            Err(E2eError::HttpException(exception)) => {
                debug!(%exception, "Request raised an HTTP exception");
                self.last_exception = Some(exception);
            }
            Err(e) => return Err(e),
        }
        Ok(self)
    }

    fn status_code(&self) -> Option<u16> {
        match (&self.last_exception, &self.response) {
            (Some(exception), _) => Some(exception.status),
            (None, Some(response)) => Some(response.status),
            (None, None) => None,
        }
    }

    pub fn assert_status_code(&self, code: u16) -> E2eResult<()> {
        match self.status_code() {
            Some(real) if real == code => Ok(()),
            Some(real) => Err(E2eError::AssertionFailed(format!(
                "Response was not {}, status code was {}",
                code, real
            ))),
            None => Err(E2eError::AssertionFailed("No request has been made".to_string())),
        }
    }

    pub fn assert_request_ok(&self) -> E2eResult<()> {
        self.assert_status_code(200)
    }

    /// Assert the last request redirected, optionally to `location`.
    ///
    /// Locations without a scheme are resolved against the dispatcher base URL.
    pub fn assert_redirection(&self, location: Option<&str>) -> E2eResult<()> {
        let status = self.status_code();
        if !status.map(|s| REDIRECT_STATUSES.contains(&s)).unwrap_or(false) {
            return Err(E2eError::AssertionFailed(format!(
                "Last request was not a redirection. Status code was {}",
                status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
            )));
        }

        let Some(location) = location else {
            return Ok(());
        };
        let base = Url::parse(self.dispatcher.base_url())?;
        let expected = base.join(location)?;
        let header = self.response.as_ref().and_then(|r| r.header("location"));
        let actual = header.and_then(|h| base.join(h).ok());

        if actual.as_ref() == Some(&expected) {
            Ok(())
        } else {
            Err(E2eError::AssertionFailed(format!(
                "Page was not redirected to the correct place: expected '{}', got '{}'",
                expected,
                header.unwrap_or("")
            )))
        }
    }

    pub fn assert_session_has(&self, name: &str, value: Option<&str>) -> E2eResult<()> {
        if !self.dispatcher.observes_session() {
            return Err(E2eError::Config(
                "Dispatcher cannot observe the application session".to_string(),
            ));
        }
        let stored = self
            .response
            .as_ref()
            .and_then(|r| r.session.get(name))
            .ok_or_else(|| E2eError::AssertionFailed(format!("Session doesn't contain '{}'", name)))?;

        match value {
            Some(value) if !stored.contains(value) => Err(E2eError::AssertionFailed(format!(
                "Session '{}' is '{}', not {}",
                name, stored, value
            ))),
            _ => Ok(()),
        }
    }

    pub fn body_html(&self) -> E2eResult<&str> {
        self.response
            .as_ref()
            .map(|r| r.body.as_str())
            .ok_or_else(|| E2eError::AssertionFailed("No response body available".to_string()))
    }

    /// Body with tags stripped and whitespace collapsed
    pub fn body_text(&self) -> E2eResult<String> {
        let html = self.body_html()?;
        let tags = Regex::new(r"<[^>]*>")?;
        let spaces = Regex::new(r"\s\s+")?;

        let text = tags.replace_all(html, "").replace('\n', " ");
        Ok(spaces.replace_all(&text, " ").into_owned())
    }

    pub fn assert_body_has_html<N: Needles + ?Sized>(&self, needles: &N) -> E2eResult<()> {
        contains_all(self.body_html()?, needles, "Body html")
    }

    pub fn assert_body_has_text<N: Needles + ?Sized>(&self, needles: &N) -> E2eResult<()> {
        contains_all(&self.body_text()?, needles, "Body text")
    }

    pub fn assert_body_has_not_text<N: Needles + ?Sized>(&self, needles: &N) -> E2eResult<()> {
        contains_none(&self.body_text()?, needles, "Body text")
    }
}
