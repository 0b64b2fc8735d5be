//! Run and test identities.
//!
//! A run ID is a local timestamp plus a random suffix, so two runs started in
//! the same second still get distinct directories. A test ID is the sanitized
//! test name plus a timestamp and a process-wide counter, so tests with the
//! same display name never collide, even when they run concurrently.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::config::Config;

/// Counter shared by every test ID issued in this process
static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Environment configuration a run was started with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Browser kind (chromium, firefox, webkit)
    pub environment_kind: String,
    /// Whether the browser runs without a window
    pub headless: bool,
    /// Delay inserted before each page interaction
    pub slow_mo_ms: u64,
}

impl RunConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            environment_kind: config.browser.kind.clone(),
            headless: config.browser.headless,
            slow_mo_ms: config.browser.slow_mo_ms,
        }
    }
}

/// Identity of one execution of the suite. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIdentity {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub config: RunConfig,
}

impl RunIdentity {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: new_run_id(),
            started_at: Utc::now(),
            config,
        }
    }
}

/// Identity of one test within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestIdentity {
    pub test_id: String,
    pub display_name: String,
    pub run_id: String,
}

impl TestIdentity {
    pub fn new(run: &RunIdentity, display_name: &str) -> Self {
        Self {
            test_id: new_test_id(display_name),
            display_name: display_name.to_string(),
            run_id: run.run_id.clone(),
        }
    }
}

/// Generate a run ID: `YYYYMMDD_HHMMSS_<8 hex>`
pub fn new_run_id() -> String {
    let entropy = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        &entropy[..8]
    )
}

/// Generate a test ID: `<sanitized name>_<millis hex><seq hex>`
pub fn new_test_id(test_name: &str) -> String {
    let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
    let millis = Utc::now().timestamp_millis();
    format!("{}_{:x}{:04x}", sanitize_name(test_name), millis, seq)
}

/// Whether a directory name looks like a run ID produced by [`new_run_id`]
pub fn is_run_id(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() != 24 {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    digits(0..8)
        && bytes[8] == b'_'
        && digits(9..15)
        && bytes[15] == b'_'
        && bytes[16..].iter().all(|b| b.is_ascii_hexdigit())
}

/// Sanitize a name for use as a path component.
///
/// Path-unsafe characters and whitespace runs become a single `_`, repeated
/// separators collapse, and leading/trailing separators are trimmed.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let unsafe_char = matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            || c.is_whitespace()
            || c.is_control();
        let c = if unsafe_char { '_' } else { c };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
