//! Browser Harness - per-test browser sessions with outcome-conditional artifact capture.
//!
//! This crate provides:
//! - Collision-resistant run and test identities
//! - A per-run artifact layout (`<target>/<run_id>/{screenshots,videos,errors,allure-results}`)
//! - One shared browser environment per run, one isolated context per test
//! - Final-state screenshots for every test; error screenshot, HTML, URL and
//!   video for failing ones
//! - Allure result files and a run summary
//! - A W3C WebDriver backend and an in-process simulated browser
//!
//! # Example
//!
//! ```rust,no_run
//! use browser_harness::{check_eq, Config, Runner, TestCase, TestHarness};
//!
//! # async fn run() -> browser_harness::HarnessResult<()> {
//! let harness = TestHarness::start(Config::from_env())?;
//! let report = Runner::new(harness)
//!     .run_all(vec![TestCase::new("checkbox toggle", |cx| {
//!         cx.navigate_to("https://the-internet.herokuapp.com/checkboxes", "Checkboxes")?;
//!         cx.click_element("#checkbox1", "first checkbox")?;
//!         check_eq!(cx.is_checked("#checkbox1")?, true);
//!         Ok(())
//!     })])
//!     .await;
//! println!("{} passed, {} failed", report.passed(), report.failed());
//! # Ok(())
//! # }
//! ```

pub mod baseline;
pub mod browser;
pub mod capture;
pub mod config;
pub mod harness;
pub mod identity;
pub mod namespace;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod summary;

// Re-export configuration
pub use config::Config;

// Re-export harness types
pub use harness::{
    FailureKind, HarnessError, HarnessResult, RunContext, TestCx, TestFailure, TestHarness, TestOutcome, Verdict,
};

// Re-export runner types
pub use runner::{RunReport, Runner, TestCase, TestResult};

// Re-export identity and layout
pub use identity::{RunIdentity, TestIdentity, new_run_id, new_test_id, sanitize_name};
pub use namespace::{RunNamespace, TestNamespace, cleanup_old_runs, list_runs};

// Re-export session management
pub use session::{
    ContextState, EnvironmentHandle, SessionContext, close_context, open_context, start_environment, stop_environment,
};

// Re-export capture and reporting
pub use capture::{CaptureError, CaptureOutcome, capture_html, capture_screenshot, locate_recorded_video};
pub use report::{AllureSink, CapturePlan, LogLevel, MemorySink, ReportSink, Reporter, TestHandle};
pub use scenario::Scenario;
pub use summary::{RunSummary, write_summary};
