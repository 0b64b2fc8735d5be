//! Per-test handle passed to test bodies.
//!
//! Wraps the test's [`SessionContext`] with reporting helpers: named steps
//! with screenshots, logged interactions, assertions and attachments.

use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use super::lifecycle::RunContext;
use super::types::{TestFailure, TestOutcome};
use crate::baseline::{self, BaselineOutcome};
use crate::capture;
use crate::identity::{TestIdentity, sanitize_name};
use crate::namespace::TestNamespace;
use crate::report::{LogLevel, StepRecord, TestHandle};
use crate::session::SessionContext;

/// Directory under the target root holding screenshot baselines
pub const BASELINES_DIR: &str = "baselines";

pub struct TestCx<'a> {
    run: &'a RunContext,
    identity: &'a TestIdentity,
    namespace: &'a TestNamespace,
    handle: Option<&'a TestHandle>,
    session: SessionContext,
}

impl<'a> TestCx<'a> {
    pub(crate) fn new(
        run: &'a RunContext,
        identity: &'a TestIdentity,
        namespace: &'a TestNamespace,
        handle: Option<&'a TestHandle>,
        session: SessionContext,
    ) -> Self {
        Self {
            run,
            identity,
            namespace,
            handle,
            session,
        }
    }

    pub(crate) fn into_session(self) -> SessionContext {
        self.session
    }

    pub fn identity(&self) -> &TestIdentity {
        self.identity
    }

    pub fn namespace(&self) -> &TestNamespace {
        self.namespace
    }

    pub fn run(&self) -> &RunContext {
        self.run
    }

    /// The browser page of this test
    pub fn page(&mut self) -> &mut SessionContext {
        &mut self.session
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        tracing::info!(test_id = %self.identity.test_id, "{message}");
        self.run.reporter.log(self.handle, level, message);
    }

    pub fn attach_text(&self, name: &str, content: &str) {
        self.run.reporter.attach_text(self.handle, name, content);
    }

    pub fn attach_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        self.run.reporter.attach_json(self.handle, name, value);
    }

    /// Run `action` as a reported step.
    ///
    /// A viewport screenshot is attached when the step passes; a full-page
    /// screenshot and the error details when it fails. The step's result is
    /// returned unchanged.
    pub fn step<F>(&mut self, name: &str, action: F) -> TestOutcome
    where
        F: FnOnce(&mut Self) -> TestOutcome,
    {
        tracing::info!(test_id = %self.identity.test_id, step = name, "step");
        let start = chrono::Utc::now().timestamp_millis();
        let result = action(self);

        match &result {
            Ok(()) => match self.session.screenshot(false) {
                Ok(png) => {
                    self.run
                        .reporter
                        .attach_bytes(self.handle, &format!("Step: {name}"), "image/png", &png);
                }
                Err(e) => tracing::warn!(
                    test_id = %self.identity.test_id,
                    step = name,
                    error = %e,
                    "failed to capture step screenshot"
                ),
            },
            Err(failure) => {
                match self.session.screenshot(true) {
                    Ok(png) => {
                        self.run
                            .reporter
                            .attach_bytes(self.handle, &format!("Error in step: {name}"), "image/png", &png);
                    }
                    Err(e) => tracing::warn!(
                        test_id = %self.identity.test_id,
                        step = name,
                        error = %e,
                        "failed to capture error screenshot for step"
                    ),
                }
                let url = self.session.url().unwrap_or_else(|_| "unknown".to_string());
                self.attach_text(
                    "Error details",
                    &format!("Step: {name}\nError: {}\nURL: {url}", failure.message),
                );
            }
        }
        self.record_step(name, start, &result);
        result
    }

    /// Record a step without screenshots
    fn plain_step<F>(&mut self, name: &str, action: F) -> TestOutcome
    where
        F: FnOnce(&mut Self) -> TestOutcome,
    {
        let start = chrono::Utc::now().timestamp_millis();
        let result = action(self);
        self.record_step(name, start, &result);
        result
    }

    fn record_step(&self, name: &str, start: i64, result: &TestOutcome) {
        let record = StepRecord {
            name: name.to_string(),
            passed: result.is_ok(),
            message: result.as_ref().err().map(|f| f.message.clone()),
            start,
            stop: chrono::Utc::now().timestamp_millis(),
        };
        self.run.reporter.step(self.handle, &record);
    }

    pub fn navigate_to(&mut self, url: &str, description: &str) -> TestOutcome {
        self.step(&format!("Navigate to: {description}"), |cx| {
            cx.session.navigate(url)?;
            let title = cx.session.title()?;
            let current = cx.session.url()?;
            cx.attach_text(
                "Page Information",
                &format!("URL: {url}\nDescription: {description}\nTitle: {title}\nCurrent URL: {current}"),
            );
            Ok(())
        })
    }

    /// Wait for the element to be visible, then click it
    pub fn click_element(&mut self, selector: &str, description: &str) -> TestOutcome {
        self.step(&format!("Click: {description}"), |cx| {
            cx.session.wait_for(selector, None)?;
            cx.session.click(selector)?;
            cx.attach_text(
                "Clicked Element",
                &format!("Selector: {selector}\nDescription: {description}"),
            );
            Ok(())
        })
    }

    pub fn fill_field(&mut self, selector: &str, value: &str, description: &str) -> TestOutcome {
        self.plain_step(&format!("Fill field: {description}"), |cx| {
            cx.session.fill(selector, value)?;
            cx.attach_text(
                "Filled Field",
                &format!("Selector: {selector}\nValue: {value}\nDescription: {description}"),
            );
            Ok(())
        })
    }

    /// Wait for `selector` to become visible within the default timeout
    pub fn wait_for(&mut self, selector: &str) -> TestOutcome {
        self.session.wait_for(selector, None)?;
        Ok(())
    }

    pub fn wait_for_timeout(&mut self, millis: u64, reason: &str) -> TestOutcome {
        self.plain_step(&format!("Wait: {reason} ({millis}ms)"), |_| {
            thread::sleep(Duration::from_millis(millis));
            Ok(())
        })
    }

    pub fn assert_visible(&mut self, selector: &str, description: &str) -> TestOutcome {
        self.plain_step(&format!("Assert element visible: {description}"), |cx| {
            let visible = cx.session.is_visible(selector)?;
            cx.attach_text(
                "Assertion Result",
                &format!("Element: {description}\nSelector: {selector}\nIs Visible: {visible}"),
            );
            if !visible {
                return Err(TestFailure::assertion(format!("{description} should be visible")));
            }
            Ok(())
        })
    }

    /// Fail unless the element's text contains `expected`
    pub fn assert_text(&mut self, selector: &str, expected: &str) -> TestOutcome {
        let actual = self.text_of(selector)?;
        if !actual.contains(expected) {
            return Err(TestFailure::assertion(format!(
                "text of '{selector}' should contain {expected:?}, was {actual:?}"
            )));
        }
        Ok(())
    }

    /// Text of the first element matching `selector`
    pub fn text_of(&mut self, selector: &str) -> Result<String, TestFailure> {
        self.session
            .text_content(selector)?
            .ok_or_else(|| TestFailure::assertion(format!("no element matches '{selector}'")))
    }

    pub fn is_checked(&mut self, selector: &str) -> Result<bool, TestFailure> {
        Ok(self.session.is_checked(selector)?)
    }

    /// Save a full-page screenshot into the test's screenshot directory and attach it.
    ///
    /// Best-effort: returns `None` and logs when the capture fails.
    pub fn save_screenshot(&mut self, name: &str) -> Option<PathBuf> {
        let dir = self.namespace.screenshots_dir.clone();
        match capture::capture_screenshot(&mut self.session, &dir, &sanitize_name(name), true) {
            Ok(path) => {
                self.run
                    .reporter
                    .attach_file(self.handle, &format!("Screenshot: {name}"), &path);
                Some(path)
            }
            Err(e) => {
                tracing::warn!(test_id = %self.identity.test_id, error = %e, "failed to save screenshot");
                None
            }
        }
    }

    /// Compare a viewport screenshot byte for byte with the baseline `name`.
    ///
    /// The baseline is created when missing. On mismatch `diff.txt` is written
    /// into the test's errors directory and the test fails.
    pub fn assert_matches_baseline(&mut self, name: &str) -> TestOutcome {
        let png = self.session.screenshot(false)?;
        let reference = self
            .run
            .config
            .run
            .target_dir
            .join(BASELINES_DIR)
            .join(format!("{}.png", sanitize_name(name)));
        let outcome = baseline::compare_to_baseline(&png, &reference, &self.namespace.errors_dir)
            .map_err(|e| TestFailure::setup(format!("baseline comparison failed: {e}")))?;
        match outcome {
            BaselineOutcome::Created(path) => {
                self.log(LogLevel::Info, &format!("baseline created at {}", path.display()));
                Ok(())
            }
            BaselineOutcome::Matched => Ok(()),
            BaselineOutcome::Mismatch(mismatch) => {
                let diff = mismatch.describe();
                self.attach_text("Baseline diff", &diff);
                Err(TestFailure::assertion(format!("Screenshots differ from baseline '{name}'\n{diff}")))
            }
        }
    }
}
