//! W3C WebDriver backend.
//!
//! Talks JSON over HTTP to a WebDriver server (chromedriver, geckodriver,
//! safaridriver). Each harness context is one WebDriver session, so contexts
//! are isolated by construction. Requests go through a [`Transport`]; the
//! default [`CurlTransport`] shells out to `curl` with a bounded `--max-time`
//! on every call.

use base64::Engine;
use serde_json::{Value, json};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::types::{
    BrowserContext, ContextOptions, DriverError, DriverResult, Environment, LaunchOptions, Page,
};

/// Key under which WebDriver returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Timeout for requests that are not bound to a context (status, session creation)
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// HTTP method used by a WebDriver command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// Sends one WebDriver command and returns the decoded response body
pub trait Transport: Send + Sync {
    fn send(&self, method: Method, url: &str, body: Option<&Value>, timeout: Duration) -> DriverResult<Value>;
}

/// Transport that runs `curl` for each request
#[derive(Debug, Clone, Default)]
pub struct CurlTransport;

impl Transport for CurlTransport {
    fn send(&self, method: Method, url: &str, body: Option<&Value>, timeout: Duration) -> DriverResult<Value> {
        let max_time = format!("{:.3}", timeout.as_secs_f64().max(0.001));
        let mut cmd = Command::new("curl");
        cmd.args([
            "-s",
            "-X", method.as_str(),
            url,
            "-H", "Content-Type: application/json; charset=utf-8",
            "--max-time", &max_time,
        ]);
        if let Some(body) = body {
            cmd.args(["-d", &serde_json::to_string(body)?]);
        }

        let output = cmd.output()?;
        if !output.status.success() {
            // curl exit code 28: operation timed out
            if output.status.code() == Some(28) {
                return Err(DriverError::Timeout {
                    what: format!("{} {}", method.as_str(), url),
                    timeout,
                });
            }
            return Err(DriverError::Protocol(format!(
                "curl {} {} failed ({}): {}",
                method.as_str(),
                url,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Map browser kinds onto WebDriver capabilities
pub fn capabilities(options: &LaunchOptions, context: &ContextOptions) -> Value {
    let window = format!("--window-size={},{}", context.viewport.width, context.viewport.height);
    match options.kind.as_str() {
        "firefox" => {
            let mut args: Vec<String> = options.args.clone();
            if options.headless {
                args.push("-headless".to_string());
            }
            json!({ "alwaysMatch": { "browserName": "firefox", "moz:firefoxOptions": { "args": args } } })
        }
        "webkit" => json!({ "alwaysMatch": { "browserName": "safari" } }),
        _ => {
            let mut args: Vec<String> = options.args.clone();
            if options.headless {
                args.push("--headless=new".to_string());
            }
            args.push(window);
            json!({ "alwaysMatch": { "browserName": "chrome", "goog:chromeOptions": { "args": args } } })
        }
    }
}

/// Extract `value` from a WebDriver response, mapping error payloads
fn unwrap_value(response: Value, timeout: Duration) -> DriverResult<Value> {
    let value = match response {
        Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
        other => other,
    };
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(match error {
            "no such element" | "stale element reference" => DriverError::ElementNotFound(message),
            "timeout" | "script timeout" => DriverError::Timeout { what: message, timeout },
            "invalid session id" | "no such window" => DriverError::Closed,
            "session not created" => DriverError::Launch(message),
            _ => DriverError::Protocol(format!("{error}: {message}")),
        });
    }
    Ok(value)
}

/// Connection to a WebDriver server shared by every context of a run
pub struct WebDriverEnvironment {
    endpoint: String,
    options: LaunchOptions,
    transport: Arc<dyn Transport>,
    open: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl WebDriverEnvironment {
    /// Connect to a WebDriver server using `curl`
    pub fn launch(endpoint: &str, options: LaunchOptions) -> DriverResult<Self> {
        Self::with_transport(endpoint, options, Arc::new(CurlTransport))
    }

    /// Connect through a custom transport. Fails unless the server reports ready.
    pub fn with_transport(endpoint: &str, options: LaunchOptions, transport: Arc<dyn Transport>) -> DriverResult<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let status = transport
            .send(Method::Get, &format!("{endpoint}/status"), None, CONTROL_TIMEOUT)
            .map_err(|e| DriverError::Launch(format!("WebDriver at {endpoint} unreachable: {e}")))?;
        let status = unwrap_value(status, CONTROL_TIMEOUT)?;
        if !status.get("ready").and_then(Value::as_bool).unwrap_or(false) {
            let message = status.get("message").and_then(Value::as_str).unwrap_or("not ready");
            return Err(DriverError::Launch(format!("WebDriver at {endpoint}: {message}")));
        }
        tracing::info!(endpoint = %endpoint, kind = %options.kind, "connected to WebDriver");

        Ok(Self {
            endpoint,
            options,
            transport,
            open: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        })
    }
}

impl Environment for WebDriverEnvironment {
    fn kind(&self) -> &str {
        &self.options.kind
    }

    fn new_context(&self, options: &ContextOptions) -> DriverResult<Box<dyn BrowserContext>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let body = json!({ "capabilities": capabilities(&self.options, options) });
        let response = self.transport.send(
            Method::Post,
            &format!("{}/session", self.endpoint),
            Some(&body),
            CONTROL_TIMEOUT,
        )?;
        let value = unwrap_value(response, CONTROL_TIMEOUT)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol("new session response without sessionId".to_string()))?
            .to_string();

        let session = Arc::new(Session {
            base: format!("{}/session/{}", self.endpoint, session_id),
            transport: Arc::clone(&self.transport),
            closed: AtomicBool::new(false),
        });
        self.open.fetch_add(1, Ordering::SeqCst);
        let mut context = WebDriverContext {
            session,
            open: Arc::clone(&self.open),
            timeout: options.default_timeout,
        };

        let millis = options.default_timeout.as_millis() as u64;
        let configure = context
            .session
            .command(Method::Post, "/timeouts", Some(json!({ "implicit": 0, "pageLoad": millis, "script": millis })), options.default_timeout)
            .and_then(|_| {
                context.session.command(
                    Method::Post,
                    "/window/rect",
                    Some(json!({ "width": options.viewport.width, "height": options.viewport.height })),
                    options.default_timeout,
                )
            });
        if let Err(e) = configure {
            let _ = context.close();
            return Err(e);
        }
        Ok(Box::new(context))
    }

    fn open_contexts(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let leaked = self.open_contexts();
        if leaked > 0 {
            tracing::warn!(leaked, "WebDriver environment closed with open sessions");
        }
        Ok(())
    }
}

/// One WebDriver session
struct Session {
    base: String,
    transport: Arc<dyn Transport>,
    closed: AtomicBool,
}

impl Session {
    fn command(&self, method: Method, path: &str, body: Option<Value>, timeout: Duration) -> DriverResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        // POST commands without parameters still need an empty JSON object
        let body = match (method, body) {
            (Method::Post, None) => Some(json!({})),
            (_, body) => body,
        };
        let response = self
            .transport
            .send(method, &format!("{}{}", self.base, path), body.as_ref(), timeout)?;
        unwrap_value(response, timeout)
    }
}

struct WebDriverContext {
    session: Arc<Session>,
    open: Arc<AtomicUsize>,
    timeout: Duration,
}

impl BrowserContext for WebDriverContext {
    fn new_page(&mut self) -> DriverResult<Box<dyn Page>> {
        if self.session.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(Box::new(WebDriverPage {
            session: Arc::clone(&self.session),
            timeout: self.timeout,
        }))
    }

    fn close(&mut self) -> DriverResult<()> {
        if self.session.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.session.command(Method::Delete, "", None, self.timeout);
        self.session.closed.store(true, Ordering::SeqCst);
        self.open.fetch_sub(1, Ordering::SeqCst);
        result.map(|_| ())
    }
}

struct WebDriverPage {
    session: Arc<Session>,
    timeout: Duration,
}

impl WebDriverPage {
    fn find(&self, selector: &str) -> DriverResult<String> {
        let value = self.session.command(
            Method::Post,
            "/element",
            Some(json!({ "using": "css selector", "value": selector })),
            self.timeout,
        )?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))
    }

    fn element_command(&self, method: Method, selector: &str, path: &str, body: Option<Value>) -> DriverResult<Value> {
        let id = self.find(selector)?;
        self.session
            .command(method, &format!("/element/{id}{path}"), body, self.timeout)
    }

    fn string(&self, path: &str) -> DriverResult<String> {
        let value = self.session.command(Method::Get, path, None, self.timeout)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Protocol(format!("expected a string from {path}")))
    }
}

impl Page for WebDriverPage {
    fn navigate(&mut self, url: &str) -> DriverResult<()> {
        self.session
            .command(Method::Post, "/url", Some(json!({ "url": url })), self.timeout)
            .map(|_| ())
    }

    fn click(&mut self, selector: &str) -> DriverResult<()> {
        self.element_command(Method::Post, selector, "/click", None).map(|_| ())
    }

    fn fill(&mut self, selector: &str, value: &str) -> DriverResult<()> {
        let id = self.find(selector)?;
        self.session
            .command(Method::Post, &format!("/element/{id}/clear"), None, self.timeout)?;
        self.session
            .command(
                Method::Post,
                &format!("/element/{id}/value"),
                Some(json!({ "text": value })),
                self.timeout,
            )
            .map(|_| ())
    }

    fn wait_for(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.is_visible(selector) {
                Ok(true) => return Ok(()),
                Ok(false) | Err(DriverError::ElementNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!("selector '{selector}' to be visible"),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn is_visible(&mut self, selector: &str) -> DriverResult<bool> {
        match self.element_command(Method::Get, selector, "/displayed", None) {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(DriverError::ElementNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn text_content(&mut self, selector: &str) -> DriverResult<Option<String>> {
        match self.element_command(Method::Get, selector, "/text", None) {
            Ok(value) => Ok(value.as_str().map(str::to_string)),
            Err(DriverError::ElementNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_checked(&mut self, selector: &str) -> DriverResult<bool> {
        let value = self.element_command(Method::Get, selector, "/selected", None)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn screenshot(&mut self, full_page: bool) -> DriverResult<Vec<u8>> {
        // Only geckodriver exposes a full-page endpoint; everything else gets the viewport
        let encoded = if full_page {
            match self.string("/moz/screenshot/full") {
                Ok(data) => data,
                Err(DriverError::Protocol(_)) => self.string("/screenshot")?,
                Err(e) => return Err(e),
            }
        } else {
            self.string("/screenshot")?
        };
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| DriverError::Protocol(format!("invalid screenshot encoding: {e}")))
    }

    fn content(&mut self) -> DriverResult<String> {
        self.string("/source")
    }

    fn url(&mut self) -> DriverResult<String> {
        self.string("/url")
    }

    fn title(&mut self) -> DriverResult<String> {
        self.string("/title")
    }

    fn set_default_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
