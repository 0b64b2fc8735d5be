//! Integration tests for the per-test lifecycle against the simulated browser

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use browser_harness::browser::{BackendKind, Environment, SimulatedEnvironment, SimulatedSite, Viewport};
use browser_harness::namespace::{RUN_INFO_FILE, RUN_SUMMARY_FILE};
use browser_harness::report::{
    ATTACH_ERROR_SCREENSHOT, ATTACH_FAILURE, ATTACH_FINAL_STATE, ATTACH_HTML, ATTACH_URL, ATTACH_VIDEO, ReportResult,
    StepRecord,
};
use browser_harness::{
    Config, EnvironmentHandle, FailureKind, LogLevel, MemorySink, ReportSink, TestHandle, TestHarness, TestIdentity,
    TestNamespace, TestResult, Verdict, check, check_eq,
};
use tempfile::TempDir;

const CHECKBOXES: &str = "https://the-internet.test/checkboxes";
const LOGIN: &str = "https://the-internet.test/login";

struct Fixture {
    tmp: TempDir,
    env: Arc<SimulatedEnvironment>,
    sink: Arc<MemorySink>,
    harness: TestHarness,
}

/// Forwards to a [`MemorySink`] but panics when the named attachment arrives
struct PanickingSink {
    inner: Arc<MemorySink>,
    trigger: &'static str,
}

impl ReportSink for PanickingSink {
    fn create_test(&self, test: &TestIdentity) -> ReportResult<TestHandle> {
        self.inner.create_test(test)
    }

    fn attach(&self, handle: &TestHandle, name: &str, mime: &str, bytes: &[u8]) -> ReportResult<()> {
        if name == self.trigger {
            panic!("sink exploded on {name}");
        }
        self.inner.attach(handle, name, mime, bytes)
    }

    fn log(&self, handle: &TestHandle, level: LogLevel, message: &str) -> ReportResult<()> {
        self.inner.log(handle, level, message)
    }

    fn step(&self, handle: &TestHandle, step: &StepRecord) -> ReportResult<()> {
        self.inner.step(handle, step)
    }

    fn finish(&self, handle: &TestHandle, verdict: &Verdict) -> ReportResult<()> {
        self.inner.finish(handle, verdict)
    }
}

impl Fixture {
    fn new(record_video: bool) -> Self {
        Self::build(record_video, None)
    }

    /// Fixture whose sink panics when `trigger` is attached
    fn panicking_on(trigger: &'static str) -> Self {
        Self::build(false, Some(trigger))
    }

    fn build(record_video: bool, panic_trigger: Option<&'static str>) -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let mut config = Config::defaults()
            .target_dir(tmp.path())
            .backend(BackendKind::Simulated)
            .record_video(record_video);
        config.context.timeout_ms = 500;
        config.context.viewport = Viewport::new(320, 200);
        config.context.video_size = Viewport::new(160, 100);
        config.context.video_settle_ms = 200;

        let env = Arc::new(
            SimulatedEnvironment::launch(config.launch_options(), SimulatedSite::demo()).expect("simulated browser"),
        );
        let handle = EnvironmentHandle::from_environment(env.clone(), Duration::ZERO);
        let sink = Arc::new(MemorySink::new());
        let reported: Arc<dyn ReportSink> = match panic_trigger {
            Some(trigger) => Arc::new(PanickingSink {
                inner: sink.clone(),
                trigger,
            }),
            None => sink.clone(),
        };
        let harness = TestHarness::start_with(config, handle, reported).expect("harness starts");
        Self { tmp, env, sink, harness }
    }

    fn namespace(&self, result: &TestResult) -> TestNamespace {
        TestNamespace::plan(&self.harness.run().namespace, &result.test_id)
    }
}

fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(prefix))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Shared buffer that collects formatted log output
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_passing_test_captures_final_state_only() {
    let fx = Fixture::new(true);
    let result = fx.harness.run_test("checkbox toggle", |cx| {
        cx.navigate_to(CHECKBOXES, "Checkboxes page")?;
        cx.click_element("#checkbox1", "first checkbox")?;
        check!(cx.is_checked("#checkbox1")?);
        Ok(())
    });

    assert!(result.passed(), "{:?}", result.verdict);
    assert!(result.test_id.starts_with("checkbox_toggle_"));

    let ns = fx.namespace(&result);
    assert_eq!(files_with_prefix(&ns.screenshots_dir, "final_state_").len(), 1);
    assert!(!ns.errors_dir.exists(), "passing test must not create an errors directory");
    let errors_root = &fx.harness.run().namespace.errors_dir;
    assert_eq!(fs::read_dir(errors_root).unwrap().count(), 0);
    assert!(result.artifacts.faults.is_empty());
    assert!(result.artifacts.video_path.is_none());

    let reported = fx.sink.test("checkbox toggle").expect("test reported");
    let names = reported.attachment_names();
    assert!(names.contains(&ATTACH_FINAL_STATE));
    assert!(names.contains(&"Test Information"));
    for conditional in [ATTACH_ERROR_SCREENSHOT, ATTACH_HTML, ATTACH_URL, ATTACH_FAILURE, ATTACH_VIDEO] {
        assert!(!names.contains(&conditional), "unexpected attachment {conditional}");
    }
    assert!(reported.verdict.as_ref().map(|v| v.is_passed()).unwrap_or(false));
    assert_eq!(fx.harness.run().environment.open_contexts(), 0);
}

#[test]
fn test_failing_assertion_captures_error_artifacts() {
    let fx = Fixture::new(true);
    let result = fx.harness.run_test("numbers agree", |cx| {
        cx.navigate_to(CHECKBOXES, "Checkboxes page")?;
        check_eq!(1, 2);
        Ok(())
    });

    let failure = result.verdict.failure().expect("test fails");
    assert_eq!(failure.kind, FailureKind::Assertion);
    assert!(failure.message.contains("1 == 2"), "{}", failure.message);

    let ns = fx.namespace(&result);
    assert_eq!(files_with_prefix(&ns.screenshots_dir, "final_state_").len(), 1);
    assert_eq!(files_with_prefix(&ns.errors_dir, "error_").len(), 1);
    let html = files_with_prefix(&ns.errors_dir, "page_");
    assert_eq!(html.len(), 1);
    assert!(fs::read_to_string(&html[0]).unwrap().contains("Checkboxes"));
    assert_eq!(result.artifacts.html_snapshot_path.as_deref(), Some(html[0].as_path()));

    let video = result.artifacts.video_path.as_ref().expect("video collected after close");
    assert!(video.starts_with(&ns.video_dir));

    let reported = fx.sink.test("numbers agree").unwrap();
    for expected in [ATTACH_FINAL_STATE, ATTACH_ERROR_SCREENSHOT, ATTACH_HTML, ATTACH_FAILURE, ATTACH_VIDEO] {
        assert!(reported.attachment(expected).is_some(), "missing attachment {expected}");
    }
    let url = reported.attachment(ATTACH_URL).expect("URL attached");
    assert_eq!(String::from_utf8_lossy(&url.bytes), CHECKBOXES);
    assert_eq!(fx.harness.run().environment.open_contexts(), 0);
}

#[test]
fn test_panic_becomes_failure() {
    let fx = Fixture::new(false);
    let result = fx.harness.run_test("panicking body", |cx| {
        cx.navigate_to(LOGIN, "Login page")?;
        panic!("selector table corrupted");
    });

    let failure = result.verdict.failure().expect("panic fails the test");
    assert_eq!(failure.kind, FailureKind::Panic);
    assert!(failure.message.contains("selector table corrupted"));
    assert_eq!(files_with_prefix(&fx.namespace(&result).errors_dir, "error_").len(), 1);
    assert_eq!(fx.env.open_contexts(), 0);
}

#[test]
fn test_missing_element_fails_with_driver_error() {
    let fx = Fixture::new(false);
    let result = fx.harness.run_test("missing element", |cx| {
        cx.navigate_to(LOGIN, "Login page")?;
        cx.click_element("#does-not-exist", "ghost button")
    });

    let failure = result.verdict.failure().expect("test fails");
    assert_eq!(failure.kind, FailureKind::Timeout);
    let reported = fx.sink.test("missing element").unwrap();
    assert!(reported.attachment("Error in step: Click: ghost button").is_some());
    assert!(reported.steps.iter().any(|s| !s.passed));
}

#[test]
fn test_capture_fault_keeps_verdict() {
    let fx = Fixture::new(false);
    fx.env.faults().set_screenshot(true);
    let result = fx.harness.run_test("capture fault", |cx| {
        cx.navigate_to(CHECKBOXES, "Checkboxes page")?;
        check!(!cx.is_checked("#checkbox1")?);
        Ok(())
    });

    assert!(result.passed());
    assert!(!result.artifacts.faults.is_empty());
    assert!(result.artifacts.screenshot_paths.is_empty());
    let reported = fx.sink.test("capture fault").unwrap();
    assert!(reported.attachment(ATTACH_FINAL_STATE).is_none());
    assert!(reported.logs.iter().any(|(_, message)| message.contains("capture fault")));
}

#[test]
fn test_step_screenshot_fault_is_logged() {
    let fx = Fixture::new(false);
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let result = tracing::subscriber::with_default(subscriber, || {
        fx.harness.run_test("step fault", |cx| {
            cx.navigate_to(CHECKBOXES, "Checkboxes page")?;
            fx.env.faults().set_screenshot(true);
            cx.step("Inspect checkboxes", |cx| {
                check!(!cx.is_checked("#checkbox1")?);
                Ok(())
            })
        })
    });

    assert!(result.passed(), "{:?}", result.verdict);
    let reported = fx.sink.test("step fault").unwrap();
    assert!(reported.attachment("Step: Inspect checkboxes").is_none());
    assert!(reported.steps.iter().any(|s| s.name == "Inspect checkboxes" && s.passed));
    let output = logs.contents();
    assert!(output.contains("failed to capture step screenshot"), "{output}");
    assert!(output.contains("Inspect checkboxes"), "{output}");
}

#[test]
fn test_html_fault_on_failure_keeps_other_artifacts() {
    let fx = Fixture::new(false);
    fx.env.faults().set_content(true);
    let result = fx.harness.run_test("html fault", |_cx| {
        check_eq!("a", "b");
        Ok(())
    });

    assert_eq!(result.verdict.failure().map(|f| f.kind), Some(FailureKind::Assertion));
    assert!(result.artifacts.html_snapshot_path.is_none());
    assert_eq!(files_with_prefix(&fx.namespace(&result).errors_dir, "error_").len(), 1);
    assert_eq!(result.artifacts.faults.len(), 1);
}

#[test]
fn test_context_open_failure_is_setup_failure() {
    let fx = Fixture::new(false);
    fx.env.faults().set_new_context(true);
    let mut ran = false;
    let result = fx.harness.run_test("no context", |_cx| {
        ran = true;
        Ok(())
    });

    assert!(!ran, "body must not run without a context");
    assert_eq!(result.verdict.failure().map(|f| f.kind), Some(FailureKind::Setup));
    assert!(fx.sink.test("no context").and_then(|t| t.verdict).is_some());
}

#[test]
fn test_close_fault_keeps_verdict_and_releases() {
    let fx = Fixture::new(false);
    fx.env.faults().set_close_context(true);
    let result = fx.harness.run_test("close fault", |cx| cx.navigate_to(CHECKBOXES, "Checkboxes page"));

    assert!(result.passed());
    assert_eq!(fx.env.open_contexts(), 0);
}

#[test]
fn test_report_fault_keeps_verdict() {
    let fx = Fixture::new(false);
    fx.sink.set_fail_attachments(true);
    let passed = fx.harness.run_test("quiet pass", |cx| cx.navigate_to(CHECKBOXES, "Checkboxes page"));
    let failed = fx.harness.run_test("quiet fail", |_cx| {
        check!(false);
        Ok(())
    });

    assert!(passed.passed());
    assert!(!failed.passed());
    assert!(fx.sink.test("quiet fail").unwrap().attachments.is_empty());
}

#[test]
fn test_report_panic_keeps_assertion_verdict() {
    let fx = Fixture::panicking_on(ATTACH_ERROR_SCREENSHOT);
    let result = fx.harness.run_test("sink panics", |cx| {
        cx.navigate_to(CHECKBOXES, "Checkboxes page")?;
        check_eq!(1, 2);
        Ok(())
    });

    let failure = result.verdict.failure().expect("assertion still fails the test");
    assert_eq!(failure.kind, FailureKind::Assertion);
    assert!(failure.message.contains("1 == 2"), "{}", failure.message);
    assert_eq!(files_with_prefix(&fx.namespace(&result).errors_dir, "error_").len(), 1);
    assert_eq!(fx.env.open_contexts(), 0);

    let after = fx.harness.run_test("after sink panic", |cx| cx.navigate_to(CHECKBOXES, "Checkboxes page"));
    assert!(after.passed(), "{:?}", after.verdict);
    assert_eq!(fx.env.open_contexts(), 0);
}

#[test]
fn test_information_panic_keeps_passing_verdict() {
    let fx = Fixture::panicking_on("Test Information");
    let result = fx.harness.run_test("info panics", |cx| cx.navigate_to(CHECKBOXES, "Checkboxes page"));

    assert!(result.passed(), "{:?}", result.verdict);
    let reported = fx.sink.test("info panics").expect("test reported");
    assert!(reported.attachment(ATTACH_FINAL_STATE).is_some());
    assert!(reported.verdict.as_ref().map(|v| v.is_passed()).unwrap_or(false));
    assert_eq!(fx.env.open_contexts(), 0);
}

#[test]
fn test_baseline_created_then_compared() {
    let fx = Fixture::new(false);
    let first = fx.harness.run_test("baseline first", |cx| {
        cx.navigate_to(CHECKBOXES, "Checkboxes page")?;
        cx.assert_matches_baseline("checkboxes")
    });
    assert!(first.passed());
    assert!(fx.tmp.path().join("baselines").join("checkboxes.png").exists());

    let same = fx.harness.run_test("baseline same", |cx| {
        cx.navigate_to(CHECKBOXES, "Checkboxes page")?;
        cx.assert_matches_baseline("checkboxes")
    });
    assert!(same.passed(), "{:?}", same.verdict);

    let changed = fx.harness.run_test("baseline changed", |cx| {
        cx.navigate_to(LOGIN, "Login page")?;
        cx.assert_matches_baseline("checkboxes")
    });
    let failure = changed.verdict.failure().expect("mismatch fails");
    assert!(failure.message.contains("differ from baseline"));
    let ns = fx.namespace(&changed);
    assert!(ns.errors_dir.join("diff.txt").exists());
    assert!(ns.errors_dir.join("current.png").exists());
}

#[test]
fn test_finish_stops_environment_and_writes_summary() {
    let fx = Fixture::new(false);
    let results = vec![
        fx.harness.run_test("summary pass", |cx| cx.navigate_to(CHECKBOXES, "Checkboxes page")),
        fx.harness.run_test("summary | fail", |_cx| {
            check_eq!(2 + 2, 5);
            Ok(())
        }),
    ];

    let summary = fx.harness.finish(&results).expect("first finish writes the summary");
    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert!(fx.env.is_closed());
    assert!(fx.harness.finish(&results).is_none());

    let root = &fx.harness.run().namespace.root;
    let properties = fs::read_to_string(root.join(RUN_INFO_FILE)).unwrap();
    assert!(properties.contains(&format!("run.id={}", fx.harness.run().identity.run_id)));
    assert!(properties.contains("browser=chromium"));
    let markdown = fs::read_to_string(root.join(RUN_SUMMARY_FILE)).unwrap();
    assert!(markdown.contains("summary pass"));
    assert!(markdown.contains("summary \\| fail"));
}
