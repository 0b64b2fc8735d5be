// Core types for the browser-control boundary

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WxH` string (e.g. "1280x720")
    pub fn parse(size: &str) -> Option<Self> {
        let lower = size.trim().to_lowercase();
        let (w, h) = lower.split_once('x')?;
        let width = w.trim().parse().ok().filter(|w: &u32| *w > 0)?;
        let height = h.trim().parse().ok().filter(|h: &u32| *h > 0)?;
        Some(Self { width, height })
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which backend drives the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// A W3C WebDriver server (chromedriver, geckodriver, safaridriver)
    WebDriver,
    /// The in-process simulated browser
    Simulated,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "webdriver" | "wd" => Some(Self::WebDriver),
            "simulated" | "sim" => Some(Self::Simulated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebDriver => "webdriver",
            Self::Simulated => "simulated",
        }
    }
}

/// Options for launching the shared environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Browser kind (chromium, firefox, webkit)
    pub kind: String,
    pub headless: bool,
    /// Delay inserted before each page interaction
    pub slow_mo: Duration,
    /// Extra command-line arguments for the browser
    pub args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into().to_lowercase();
        let args = if kind == "chromium" {
            vec!["--start-maximized".to_string()]
        } else {
            Vec::new()
        };
        Self {
            kind,
            headless: true,
            slow_mo: Duration::ZERO,
            args,
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn slow_mo(mut self, slow_mo: Duration) -> Self {
        self.slow_mo = slow_mo;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Options for one isolated context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub viewport: Viewport,
    /// Directory the recording of this context is written to
    pub record_video_dir: Option<PathBuf>,
    pub video_size: Viewport,
    pub default_timeout: Duration,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::new(1920, 1080),
            record_video_dir: None,
            video_size: Viewport::new(1280, 720),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Result type for browser operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by a browser backend
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("no element matches selector '{0}'")]
    ElementNotFound(String),

    #[error("target closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(String),
}

impl From<image::ImageError> for DriverError {
    fn from(err: image::ImageError) -> Self {
        DriverError::Image(err.to_string())
    }
}

/// The long-lived browser process shared by every test of a run.
///
/// Implementations must be usable from several threads; when they cannot
/// create contexts concurrently they report it through
/// [`Environment::supports_concurrent_contexts`] and the session layer
/// serializes creation.
pub trait Environment: Send + Sync {
    /// Browser kind (e.g. "chromium")
    fn kind(&self) -> &str;

    /// Create a new isolated context
    fn new_context(&self, options: &ContextOptions) -> DriverResult<Box<dyn BrowserContext>>;

    /// Whether `new_context` may be called from several threads at once
    fn supports_concurrent_contexts(&self) -> bool {
        true
    }

    /// Whether contexts record video themselves when `record_video_dir` is set
    fn records_video(&self) -> bool {
        false
    }

    /// Number of contexts currently open (health check)
    fn open_contexts(&self) -> usize;

    /// Shut the environment down
    fn close(&self) -> DriverResult<()>;
}

/// An isolated browser session: cookies, storage, viewport
pub trait BrowserContext: Send {
    fn new_page(&mut self) -> DriverResult<Box<dyn Page>>;

    fn close(&mut self) -> DriverResult<()>;
}

/// A page inside a context
pub trait Page: Send {
    fn navigate(&mut self, url: &str) -> DriverResult<()>;

    fn click(&mut self, selector: &str) -> DriverResult<()>;

    fn fill(&mut self, selector: &str, value: &str) -> DriverResult<()>;

    /// Wait until an element matching `selector` is visible
    fn wait_for(&mut self, selector: &str, timeout: Duration) -> DriverResult<()>;

    fn is_visible(&mut self, selector: &str) -> DriverResult<bool>;

    /// Text of the first matching element, `None` when nothing matches
    fn text_content(&mut self, selector: &str) -> DriverResult<Option<String>>;

    fn is_checked(&mut self, selector: &str) -> DriverResult<bool>;

    /// PNG-encoded screenshot of the viewport or the whole page
    fn screenshot(&mut self, full_page: bool) -> DriverResult<Vec<u8>>;

    /// Serialized HTML of the current document
    fn content(&mut self) -> DriverResult<String>;

    fn url(&mut self) -> DriverResult<String>;

    fn title(&mut self) -> DriverResult<String>;

    fn set_default_timeout(&mut self, timeout: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_parse() {
        assert_eq!(Viewport::parse("1280x720"), Some(Viewport::new(1280, 720)));
        assert_eq!(Viewport::parse(" 800X600 "), Some(Viewport::new(800, 600)));
        assert_eq!(Viewport::parse("0x600"), None);
        assert_eq!(Viewport::parse("800"), None);
        assert_eq!(Viewport::new(3, 4).to_string(), "3x4");
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(BackendKind::parse("WebDriver"), Some(BackendKind::WebDriver));
        assert_eq!(BackendKind::parse("sim"), Some(BackendKind::Simulated));
        assert_eq!(BackendKind::parse("playwright"), None);
    }

    #[test]
    fn test_launch_options_chromium_args() {
        let options = LaunchOptions::new("Chromium").headless(false);
        assert_eq!(options.kind, "chromium");
        assert!(!options.headless);
        assert_eq!(options.args, vec!["--start-maximized".to_string()]);
        assert!(LaunchOptions::new("firefox").args.is_empty());
    }
}
