//! Outcome-conditional reporting.
//!
//! A final-state screenshot is taken for every test. A failing test also gets
//! a full-page error screenshot, an HTML snapshot, the page URL, the failure
//! details and its recorded video. Page captures happen before the context is
//! closed; the video is looked up strictly after.
//!
//! Capture and reporting faults are logged as warnings and never change the
//! verdict.

pub mod allure;
pub mod memory;
pub mod types;

pub use allure::AllureSink;
pub use memory::{MemoryAttachment, MemorySink, MemoryTest};
pub use types::{
    LogLevel, ReportError, ReportResult, ReportSink, StepRecord, TestHandle, extension_for, mime_for_path,
};

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{self, CaptureError, CaptureOutcome};
use crate::harness::Verdict;
use crate::identity::TestIdentity;
use crate::namespace::TestNamespace;
use crate::session::SessionContext;

/// Filename label of the screenshot taken at the end of every test
pub const FINAL_STATE_LABEL: &str = "final_state";
/// Filename label of the full-page screenshot taken on failure
pub const ERROR_LABEL: &str = "error";
/// Filename label of the HTML snapshot taken on failure
pub const HTML_LABEL: &str = "page";

pub const ATTACH_FINAL_STATE: &str = "Final state screenshot";
pub const ATTACH_ERROR_SCREENSHOT: &str = "Error screenshot";
pub const ATTACH_HTML: &str = "HTML snapshot";
pub const ATTACH_URL: &str = "Page URL";
pub const ATTACH_FAILURE: &str = "Failure details";
pub const ATTACH_VIDEO: &str = "Video";

/// Which artifacts a verdict calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePlan {
    pub final_state: bool,
    pub error_screenshot: bool,
    pub html_snapshot: bool,
    pub page_url: bool,
    pub failure_details: bool,
    pub video: bool,
}

impl CapturePlan {
    pub fn for_verdict(verdict: &Verdict) -> Self {
        let failed = !verdict.is_passed();
        Self {
            final_state: true,
            error_screenshot: failed,
            html_snapshot: failed,
            page_url: failed,
            failure_details: failed,
            video: failed,
        }
    }
}

/// Page-side captures for a finished test body. Must run before the context closes.
///
/// Returns the gathered artifacts and, when the plan asks for it, the page URL.
pub fn capture_page_artifacts(
    ctx: &mut SessionContext,
    ns: &TestNamespace,
    plan: &CapturePlan,
) -> (CaptureOutcome, Option<String>) {
    let mut outcome = CaptureOutcome::new();
    ctx.begin_capture();

    if plan.final_state {
        match capture::capture_screenshot(ctx, &ns.screenshots_dir, FINAL_STATE_LABEL, false) {
            Ok(path) => outcome.screenshot_paths.push(path),
            Err(e) => capture_fault(&mut outcome, ctx, "final-state screenshot", e),
        }
    }

    if plan.error_screenshot || plan.html_snapshot {
        match ns.materialize_errors() {
            Ok(errors_dir) => {
                if plan.error_screenshot {
                    match capture::capture_screenshot(ctx, errors_dir, ERROR_LABEL, true) {
                        Ok(path) => outcome.screenshot_paths.push(path),
                        Err(e) => capture_fault(&mut outcome, ctx, "error screenshot", e),
                    }
                }
                if plan.html_snapshot {
                    match capture::capture_html(ctx, errors_dir, HTML_LABEL) {
                        Ok(path) => outcome.html_snapshot_path = Some(path),
                        Err(e) => capture_fault(&mut outcome, ctx, "HTML snapshot", e),
                    }
                }
            }
            Err(e) => capture_fault(&mut outcome, ctx, "errors directory", CaptureError::Io(e)),
        }
    }

    let url = if plan.page_url {
        match ctx.url() {
            Ok(url) => Some(url),
            Err(e) => {
                capture_fault(&mut outcome, ctx, "page URL", e.into());
                None
            }
        }
    } else {
        None
    };
    (outcome, url)
}

/// Look up the recording of a closed context when the plan asks for it
pub fn collect_video(outcome: &mut CaptureOutcome, ctx: &SessionContext, plan: &CapturePlan, settle: Duration) {
    if !plan.video {
        return;
    }
    if !ctx.is_closed() {
        tracing::warn!(test_id = %ctx.test_id(), "video lookup skipped: context still open");
        return;
    }
    outcome.video_path = capture::locate_recorded_video(ctx.video_dir(), settle);
}

fn capture_fault(outcome: &mut CaptureOutcome, ctx: &SessionContext, what: &str, err: CaptureError) {
    tracing::warn!(test_id = %ctx.test_id(), error = %err, "failed to capture {what}");
    outcome.fault(what, &err);
}

/// Front end to a [`ReportSink`] that contains its faults
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn ReportSink>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Reporter {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn ReportSink> {
        &self.sink
    }

    /// Open a result for a test; `None` when the sink refused
    pub fn begin(&self, test: &TestIdentity) -> Option<TestHandle> {
        match self.sink.create_test(test) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(test_id = %test.test_id, error = %e, "report sink refused test");
                None
            }
        }
    }

    /// Attach bytes. Returns whether the attachment was accepted.
    pub fn attach_bytes(&self, handle: Option<&TestHandle>, name: &str, mime: &str, bytes: &[u8]) -> bool {
        let Some(handle) = handle else {
            return false;
        };
        match self.sink.attach(handle, name, mime, bytes) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(attachment = name, error = %e, "failed to attach artifact");
                false
            }
        }
    }

    pub fn attach_file(&self, handle: Option<&TestHandle>, name: &str, path: &Path) -> bool {
        match std::fs::read(path) {
            Ok(bytes) => self.attach_bytes(handle, name, mime_for_path(path), &bytes),
            Err(e) => {
                tracing::warn!(attachment = name, path = %path.display(), error = %e, "failed to read artifact");
                false
            }
        }
    }

    pub fn attach_text(&self, handle: Option<&TestHandle>, name: &str, text: &str) -> bool {
        self.attach_bytes(handle, name, "text/plain", text.as_bytes())
    }

    pub fn attach_json<T: Serialize + ?Sized>(&self, handle: Option<&TestHandle>, name: &str, value: &T) -> bool {
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => self.attach_bytes(handle, name, "application/json", &bytes),
            Err(e) => {
                tracing::warn!(attachment = name, error = %e, "failed to serialize attachment");
                false
            }
        }
    }

    pub fn log(&self, handle: Option<&TestHandle>, level: LogLevel, message: &str) {
        if let Some(handle) = handle {
            if let Err(e) = self.sink.log(handle, level, message) {
                tracing::debug!(error = %e, "report log dropped");
            }
        }
    }

    pub fn step(&self, handle: Option<&TestHandle>, record: &StepRecord) {
        if let Some(handle) = handle {
            if let Err(e) = self.sink.step(handle, record) {
                tracing::warn!(step = %record.name, error = %e, "failed to record step");
            }
        }
    }

    /// Attach what the verdict calls for and seal the result
    pub fn report(
        &self,
        handle: Option<&TestHandle>,
        test: &TestIdentity,
        verdict: &Verdict,
        captures: &CaptureOutcome,
        page_url: Option<&str>,
    ) {
        let plan = CapturePlan::for_verdict(verdict);

        for path in &captures.screenshot_paths {
            let is_final = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FINAL_STATE_LABEL))
                .unwrap_or(false);
            if is_final && plan.final_state {
                self.attach_file(handle, ATTACH_FINAL_STATE, path);
            } else if !is_final && plan.error_screenshot {
                self.attach_file(handle, ATTACH_ERROR_SCREENSHOT, path);
            }
        }
        if plan.html_snapshot {
            if let Some(path) = &captures.html_snapshot_path {
                self.attach_file(handle, ATTACH_HTML, path);
            }
        }
        if plan.page_url {
            if let Some(url) = page_url {
                self.attach_text(handle, ATTACH_URL, url);
            }
        }
        if let (true, Some(failure)) = (plan.failure_details, verdict.failure()) {
            let details = format!(
                "Test: {}\nTest ID: {}\nKind: {:?}\n\n{}",
                test.display_name, test.test_id, failure.kind, failure.message
            );
            self.attach_text(handle, ATTACH_FAILURE, &details);
        }
        if plan.video {
            if let Some(path) = &captures.video_path {
                self.attach_file(handle, ATTACH_VIDEO, path);
            }
        }
        for fault in &captures.faults {
            self.log(handle, LogLevel::Warn, &format!("capture fault: {fault}"));
        }

        if let Some(handle) = handle {
            if let Err(e) = self.sink.finish(handle, verdict) {
                tracing::warn!(test_id = %test.test_id, error = %e, "failed to finish report");
            }
        }
        match verdict.failure() {
            None => tracing::info!(test_id = %test.test_id, name = %test.display_name, "test passed"),
            Some(failure) => tracing::error!(
                test_id = %test.test_id,
                name = %test.display_name,
                kind = ?failure.kind,
                "test failed: {}",
                failure.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::TestFailure;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn identity() -> TestIdentity {
        TestIdentity {
            test_id: "math_1".to_string(),
            display_name: "math".to_string(),
            run_id: "20240101_000000_abcdef12".to_string(),
        }
    }

    fn captures(tmp: &TempDir) -> CaptureOutcome {
        let final_state = tmp.path().join("final_state_120000_000.png");
        let error = tmp.path().join("error_120000_001.png");
        let html = tmp.path().join("page_120000_002.html");
        let video = tmp.path().join("clip.gif");
        for path in [&final_state, &error, &html, &video] {
            fs::write(path, b"x").unwrap();
        }
        CaptureOutcome {
            succeeded: true,
            screenshot_paths: vec![final_state, error],
            html_snapshot_path: Some(html),
            video_path: Some(video),
            faults: Vec::new(),
        }
    }

    #[test]
    fn test_plan_follows_verdict() {
        let passed = CapturePlan::for_verdict(&Verdict::Passed);
        assert!(passed.final_state);
        assert!(!passed.error_screenshot && !passed.html_snapshot && !passed.video);
        let failed = CapturePlan::for_verdict(&Verdict::Failed(TestFailure::assertion("x")));
        assert!(failed.final_state && failed.error_screenshot && failed.html_snapshot);
        assert!(failed.page_url && failed.failure_details && failed.video);
    }

    #[test]
    fn test_passing_report_attaches_final_state_only() {
        let tmp = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let reporter = Reporter::new(sink.clone());
        let handle = reporter.begin(&identity());
        reporter.report(handle.as_ref(), &identity(), &Verdict::Passed, &captures(&tmp), Some("https://x.test"));

        let test = sink.test("math").unwrap();
        assert_eq!(test.attachment_names(), vec![ATTACH_FINAL_STATE]);
        assert_eq!(test.verdict, Some(Verdict::Passed));
    }

    #[test]
    fn test_failing_report_attaches_everything() {
        let tmp = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let reporter = Reporter::new(sink.clone());
        let verdict = Verdict::Failed(TestFailure::assertion("assertion failed: 1 == 2"));
        let handle = reporter.begin(&identity());
        reporter.report(handle.as_ref(), &identity(), &verdict, &captures(&tmp), Some("https://x.test/p"));

        let test = sink.test("math").unwrap();
        assert_eq!(
            test.attachment_names(),
            vec![ATTACH_FINAL_STATE, ATTACH_ERROR_SCREENSHOT, ATTACH_HTML, ATTACH_URL, ATTACH_FAILURE, ATTACH_VIDEO]
        );
        let details = String::from_utf8(test.attachment(ATTACH_FAILURE).unwrap().bytes.clone()).unwrap();
        assert!(details.contains("assertion failed: 1 == 2"));
        assert_eq!(test.attachment(ATTACH_VIDEO).unwrap().mime, "image/gif");
        assert_eq!(test.verdict, Some(verdict));
    }

    #[test]
    fn test_attachment_faults_keep_verdict() {
        let tmp = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        sink.set_fail_attachments(true);
        let reporter = Reporter::new(sink.clone());
        let handle = reporter.begin(&identity());
        reporter.report(handle.as_ref(), &identity(), &Verdict::Passed, &captures(&tmp), None);

        let test = sink.test("math").unwrap();
        assert!(test.attachments.is_empty());
        assert_eq!(test.verdict, Some(Verdict::Passed));
    }

    #[test]
    fn test_missing_handle_is_harmless() {
        let reporter = Reporter::new(Arc::new(MemorySink::new()));
        assert!(!reporter.attach_text(None, "note", "x"));
        reporter.log(None, LogLevel::Info, "nothing");
        reporter.report(None, &identity(), &Verdict::Passed, &CaptureOutcome::new(), None);
    }
}
