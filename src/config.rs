//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for the harness, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for an unattended headless run
//! - Builder-style overrides for programmatic configuration
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `browser` / `BROWSER_HARNESS_BROWSER` | Browser kind (chromium, firefox, webkit) | `chromium` |
//! | `headless` / `BROWSER_HARNESS_HEADLESS` | Run the browser without a window | `true` |
//! | `slow.mo` / `BROWSER_HARNESS_SLOW_MO` | Delay before each page interaction (ms) | `0` |
//! | `BROWSER_HARNESS_BACKEND` | Browser backend (webdriver, simulated) | `webdriver` |
//! | `BROWSER_HARNESS_WEBDRIVER_URL` | WebDriver endpoint | `http://127.0.0.1:4444` |
//! | `BROWSER_HARNESS_TARGET_DIR` | Root directory for run artifacts | `target` |
//! | `BROWSER_HARNESS_TIMEOUT` | Default operation timeout (ms) | `30000` |
//! | `BROWSER_HARNESS_VIEWPORT` | Viewport size as `WxH` | `1920x1080` |
//! | `BROWSER_HARNESS_RECORD_VIDEO` | Record a video per test | `true` |
//! | `BROWSER_HARNESS_VIDEO_SIZE` | Video frame size as `WxH` | `1280x720` |
//! | `BROWSER_HARNESS_VIDEO_SETTLE` | Wait for a recording to appear (ms) | `1000` |
//! | `BROWSER_HARNESS_PARALLELISM` | Tests executed concurrently | `4` |
//!
//! # Example
//!
//! ```bash
//! export browser=firefox
//! export headless=false
//! export BROWSER_HARNESS_WEBDRIVER_URL="http://localhost:4445"
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::browser::{BackendKind, LaunchOptions, Viewport};

// ============================================================================
// Default Values
// ============================================================================

/// Default browser kind
pub const DEFAULT_BROWSER: &str = "chromium";

/// Default headless mode
pub const DEFAULT_HEADLESS: bool = true;

/// Default slow-mo delay (milliseconds)
pub const DEFAULT_SLOW_MO_MS: u64 = 0;

/// Default browser backend
pub const DEFAULT_BACKEND: &str = "webdriver";

/// Default WebDriver endpoint
pub const DEFAULT_WEBDRIVER_URL: &str = "http://127.0.0.1:4444";

/// Default root directory for run artifacts
pub const DEFAULT_TARGET_DIR: &str = "target";

/// Default operation timeout (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default viewport width (pixels)
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;

/// Default viewport height (pixels)
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;

/// Default video recording
pub const DEFAULT_RECORD_VIDEO: bool = true;

/// Default video frame width (pixels)
pub const DEFAULT_VIDEO_WIDTH: u32 = 1280;

/// Default video frame height (pixels)
pub const DEFAULT_VIDEO_HEIGHT: u32 = 720;

/// Default wait for a recording to be flushed (milliseconds)
pub const DEFAULT_VIDEO_SETTLE_MS: u64 = 1_000;

/// Default number of concurrently running tests
pub const DEFAULT_PARALLELISM: usize = 4;

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Short property names, checked first
pub const ENV_BROWSER_SHORT: &str = "browser";
pub const ENV_HEADLESS_SHORT: &str = "headless";
pub const ENV_SLOW_MO_SHORT: &str = "slow.mo";

pub const ENV_BROWSER: &str = "BROWSER_HARNESS_BROWSER";
pub const ENV_HEADLESS: &str = "BROWSER_HARNESS_HEADLESS";
pub const ENV_SLOW_MO: &str = "BROWSER_HARNESS_SLOW_MO";
pub const ENV_BACKEND: &str = "BROWSER_HARNESS_BACKEND";
pub const ENV_WEBDRIVER_URL: &str = "BROWSER_HARNESS_WEBDRIVER_URL";
pub const ENV_TARGET_DIR: &str = "BROWSER_HARNESS_TARGET_DIR";
pub const ENV_TIMEOUT: &str = "BROWSER_HARNESS_TIMEOUT";
pub const ENV_VIEWPORT: &str = "BROWSER_HARNESS_VIEWPORT";
pub const ENV_RECORD_VIDEO: &str = "BROWSER_HARNESS_RECORD_VIDEO";
pub const ENV_VIDEO_SIZE: &str = "BROWSER_HARNESS_VIDEO_SIZE";
pub const ENV_VIDEO_SETTLE: &str = "BROWSER_HARNESS_VIDEO_SETTLE";
pub const ENV_PARALLELISM: &str = "BROWSER_HARNESS_PARALLELISM";

// ============================================================================
// Global Configuration
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for a harness run
#[derive(Debug, Clone)]
pub struct Config {
    /// Browser environment settings
    pub browser: BrowserSettings,
    /// Per-test context settings
    pub context: ContextSettings,
    /// Run-level settings
    pub run: RunSettings,
}

/// Settings for the shared browser environment
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Browser kind (chromium, firefox, webkit)
    pub kind: String,
    /// Launch without a visible window
    pub headless: bool,
    /// Delay before each page interaction (milliseconds)
    pub slow_mo_ms: u64,
    /// Which backend drives the browser
    pub backend: BackendKind,
    /// WebDriver endpoint used by the webdriver backend
    pub webdriver_url: String,
}

/// Settings applied to every per-test context
#[derive(Debug, Clone)]
pub struct ContextSettings {
    /// Default operation timeout (milliseconds)
    pub timeout_ms: u64,
    /// Page viewport
    pub viewport: Viewport,
    /// Whether to record a video for each test
    pub record_video: bool,
    /// Frame size of the recorded video
    pub video_size: Viewport,
    /// How long to wait for a recording to appear after close (milliseconds)
    pub video_settle_ms: u64,
}

/// Run-level settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Root directory under which each run gets its own directory
    pub target_dir: PathBuf,
    /// Maximum number of tests executing at once
    pub parallelism: usize,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            browser: BrowserSettings::from_env(),
            context: ContextSettings::from_env(),
            run: RunSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            browser: BrowserSettings::defaults(),
            context: ContextSettings::defaults(),
            run: RunSettings::defaults(),
        }
    }

    /// Launch options for the shared environment
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions::new(&self.browser.kind)
            .headless(self.browser.headless)
            .slow_mo(Duration::from_millis(self.browser.slow_mo_ms))
    }

    pub fn target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run.target_dir = dir.into();
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.browser.backend = backend;
        self
    }

    pub fn record_video(mut self, record: bool) -> Self {
        self.context.record_video = record;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.run.parallelism = parallelism.max(1);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BrowserSettings {
    /// Create browser settings from environment variables
    pub fn from_env() -> Self {
        Self {
            kind: env_var(&[ENV_BROWSER_SHORT, ENV_BROWSER])
                .map(|s| s.to_lowercase())
                .unwrap_or_else(|| DEFAULT_BROWSER.to_string()),
            headless: env_var(&[ENV_HEADLESS_SHORT, ENV_HEADLESS])
                .and_then(|s| parse_bool(&s))
                .unwrap_or(DEFAULT_HEADLESS),
            slow_mo_ms: env_var(&[ENV_SLOW_MO_SHORT, ENV_SLOW_MO])
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_SLOW_MO_MS),
            backend: env_var(&[ENV_BACKEND])
                .and_then(|s| BackendKind::parse(&s))
                .unwrap_or(BackendKind::WebDriver),
            webdriver_url: env_var(&[ENV_WEBDRIVER_URL])
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
        }
    }

    /// Create browser settings with defaults
    pub fn defaults() -> Self {
        Self {
            kind: DEFAULT_BROWSER.to_string(),
            headless: DEFAULT_HEADLESS,
            slow_mo_ms: DEFAULT_SLOW_MO_MS,
            backend: BackendKind::WebDriver,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
        }
    }
}

impl ContextSettings {
    /// Create context settings from environment variables
    pub fn from_env() -> Self {
        Self {
            timeout_ms: env_var(&[ENV_TIMEOUT])
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            viewport: env_var(&[ENV_VIEWPORT])
                .and_then(|s| Viewport::parse(&s))
                .unwrap_or(Viewport::new(DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT)),
            record_video: env_var(&[ENV_RECORD_VIDEO])
                .and_then(|s| parse_bool(&s))
                .unwrap_or(DEFAULT_RECORD_VIDEO),
            video_size: env_var(&[ENV_VIDEO_SIZE])
                .and_then(|s| Viewport::parse(&s))
                .unwrap_or(Viewport::new(DEFAULT_VIDEO_WIDTH, DEFAULT_VIDEO_HEIGHT)),
            video_settle_ms: env_var(&[ENV_VIDEO_SETTLE])
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_VIDEO_SETTLE_MS),
        }
    }

    /// Create context settings with defaults
    pub fn defaults() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            viewport: Viewport::new(DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT),
            record_video: DEFAULT_RECORD_VIDEO,
            video_size: Viewport::new(DEFAULT_VIDEO_WIDTH, DEFAULT_VIDEO_HEIGHT),
            video_settle_ms: DEFAULT_VIDEO_SETTLE_MS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn video_settle(&self) -> Duration {
        Duration::from_millis(self.video_settle_ms)
    }
}

impl RunSettings {
    /// Create run settings from environment variables
    pub fn from_env() -> Self {
        Self {
            target_dir: env_var(&[ENV_TARGET_DIR])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR)),
            parallelism: env_var(&[ENV_PARALLELISM])
                .and_then(|s| s.trim().parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_PARALLELISM),
        }
    }

    /// Create run settings with defaults
    pub fn defaults() -> Self {
        Self {
            target_dir: PathBuf::from(DEFAULT_TARGET_DIR),
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// First non-empty value among the given variable names
fn env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Parse a boolean flag ("true"/"false", "1"/"0", "yes"/"no", "on"/"off")
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.browser.kind, DEFAULT_BROWSER);
        assert!(config.browser.headless);
        assert_eq!(config.browser.slow_mo_ms, 0);
        assert_eq!(config.context.timeout_ms, 30_000);
        assert_eq!(config.context.viewport, Viewport::new(1920, 1080));
        assert_eq!(config.context.video_size, Viewport::new(1280, 720));
        assert_eq!(config.run.target_dir, PathBuf::from("target"));
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::defaults()
            .target_dir("/tmp/runs")
            .backend(BackendKind::Simulated)
            .record_video(false)
            .parallelism(0);
        assert_eq!(config.run.target_dir, PathBuf::from("/tmp/runs"));
        assert_eq!(config.browser.backend, BackendKind::Simulated);
        assert!(!config.context.record_video);
        assert_eq!(config.run.parallelism, 1);
    }

    #[test]
    fn test_launch_options_from_config() {
        let mut config = Config::defaults();
        config.browser.slow_mo_ms = 250;
        let options = config.launch_options();
        assert_eq!(options.kind, "chromium");
        assert!(options.headless);
        assert_eq!(options.slow_mo, Duration::from_millis(250));
    }
}
