//! Run and test lifecycle.
//!
//! [`TestHarness::start`] performs the run-level setup once: run identity,
//! run directories, shared browser environment, report sink.
//! [`TestHarness::run_test`] then drives each test through
//! setup, body, capture, teardown and report, in that order, whatever the body
//! does. [`TestHarness::finish`] stops the environment and writes the summary.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::steps::TestCx;
use super::types::{HarnessError, HarnessResult, TestFailure, TestOutcome, Verdict};
use crate::capture::CaptureOutcome;
use crate::config::Config;
use crate::identity::{RunConfig, RunIdentity, TestIdentity};
use crate::namespace::{RunNamespace, TestNamespace};
use crate::report::{self, AllureSink, CapturePlan, ReportSink, Reporter};
use crate::runner::TestResult;
use crate::session::{self, EnvironmentHandle};
use crate::summary::{self, RunSummary};

/// Run-scoped state shared by reference with every test
#[derive(Debug)]
pub struct RunContext {
    pub config: Config,
    pub identity: RunIdentity,
    pub namespace: RunNamespace,
    pub environment: EnvironmentHandle,
    pub reporter: Reporter,
}

/// Drives tests through their lifecycle against one shared environment
#[derive(Debug)]
pub struct TestHarness {
    run: RunContext,
    finished: AtomicBool,
}

impl TestHarness {
    /// Start a run: create its directories, launch the environment and open
    /// an Allure sink in the run's `allure-results/`.
    pub fn start(config: Config) -> HarnessResult<Self> {
        let (identity, namespace) = plan_run(&config)?;
        let environment = session::start_environment(&config)?;
        let sink = open_allure_sink(&environment, &namespace.allure_results_dir)?;
        Ok(Self::assemble(config, identity, namespace, environment, Arc::new(sink)))
    }

    /// Start a run against an already launched environment and a custom sink
    pub fn start_with(
        config: Config,
        environment: EnvironmentHandle,
        sink: Arc<dyn ReportSink>,
    ) -> HarnessResult<Self> {
        let (identity, namespace) = plan_run(&config)?;
        Ok(Self::assemble(config, identity, namespace, environment, sink))
    }

    fn assemble(
        config: Config,
        identity: RunIdentity,
        namespace: RunNamespace,
        environment: EnvironmentHandle,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        tracing::info!(
            run_id = %identity.run_id,
            root = %namespace.root.display(),
            browser = %identity.config.environment_kind,
            "run started"
        );
        Self {
            run: RunContext {
                config,
                identity,
                namespace,
                environment,
                reporter: Reporter::new(sink),
            },
            finished: AtomicBool::new(false),
        }
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    /// Run one test to completion and report it.
    ///
    /// Panics in `body` are caught and turned into a failing verdict. Panics in
    /// any later stage (capture, close, video lookup, report) are contained and
    /// logged; the body's verdict is returned unchanged. The context is always
    /// closed, and page captures always precede the close.
    pub fn run_test<F>(&self, name: &str, body: F) -> TestResult
    where
        F: FnOnce(&mut TestCx<'_>) -> TestOutcome,
    {
        let run = &self.run;
        let identity = TestIdentity::new(&run.identity, name);
        let namespace = TestNamespace::plan(&run.namespace, &identity.test_id);
        let test_id = identity.test_id.as_str();
        let span = tracing::info_span!("test", test_id = %identity.test_id);
        let _enter = span.enter();
        let started = Instant::now();
        tracing::info!(name, "test started");
        let handle = contained(test_id, "report setup", || run.reporter.begin(&identity))
            .ok()
            .flatten();

        let opened = namespace
            .materialize()
            .map_err(|e| TestFailure::setup(format!("failed to create test directories: {e}")))
            .and_then(|()| {
                contained(test_id, "context open", || {
                    session::open_context(&run.environment, &namespace, &run.config.context)
                })
                .map_err(|panic| TestFailure::setup(format!("failed to open browser context: {panic}")))?
                .map_err(|e| TestFailure::setup(format!("failed to open browser context: {e}")))
            });
        let ctx = match opened {
            Ok(ctx) => ctx,
            Err(failure) => {
                let verdict = Verdict::Failed(failure);
                let artifacts = CaptureOutcome::new();
                let _ = contained(test_id, "report", || {
                    run.reporter.report(handle.as_ref(), &identity, &verdict, &artifacts, None)
                });
                return TestResult::new(&identity, verdict, started.elapsed(), artifacts);
            }
        };

        let _ = contained(test_id, "test information", || {
            run.reporter.attach_text(
                handle.as_ref(),
                "Test Information",
                &format!(
                    "Test Name: {}\nTest ID: {}\nRun ID: {}\nBrowser: {}\nHeadless: {}\nVideo: {}",
                    identity.display_name,
                    identity.test_id,
                    identity.run_id,
                    run.identity.config.environment_kind,
                    run.identity.config.headless,
                    if run.config.context.record_video {
                        namespace.video_dir.display().to_string()
                    } else {
                        "disabled".to_string()
                    },
                ),
            )
        });

        let mut cx = TestCx::new(run, &identity, &namespace, handle.as_ref(), ctx);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut cx)));
        let verdict = match outcome {
            Ok(result) => Verdict::from(result),
            Err(payload) => Verdict::Failed(TestFailure::from_panic(&*payload)),
        };
        let mut ctx = cx.into_session();

        let plan = CapturePlan::for_verdict(&verdict);
        let (mut artifacts, url) =
            contained(test_id, "page capture", || report::capture_page_artifacts(&mut ctx, &namespace, &plan))
                .unwrap_or_else(|panic| {
                    let mut artifacts = CaptureOutcome::new();
                    artifacts.fault("page capture", &panic);
                    (artifacts, None)
                });
        if let Err(panic) = contained(test_id, "context close", || session::close_context(&mut ctx)) {
            artifacts.fault("context close", &panic);
        }
        let settle = run.config.context.video_settle();
        if let Err(panic) = contained(test_id, "video lookup", || {
            report::collect_video(&mut artifacts, &ctx, &plan, settle)
        }) {
            artifacts.fault("video lookup", &panic);
        }
        let _ = contained(test_id, "report", || {
            run.reporter.report(handle.as_ref(), &identity, &verdict, &artifacts, url.as_deref())
        });

        TestResult::new(&identity, verdict, started.elapsed(), artifacts)
    }

    /// Stop the environment, then write the run summary. Only the first call acts.
    pub fn finish(&self, results: &[TestResult]) -> Option<RunSummary> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return None;
        }
        session::stop_environment(&self.run.environment);
        Some(summary::write_summary(&self.run.identity, &self.run.namespace, results))
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            session::stop_environment(&self.run.environment);
        }
    }
}

/// Run one stage outside the test body, turning a panic into a logged fault
fn contained<T>(test_id: &str, stage: &str, f: impl FnOnce() -> T) -> Result<T, TestFailure> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let failure = TestFailure::from_panic(&*payload);
        tracing::warn!(test_id, stage, "panic contained: {}", failure.message);
        failure
    })
}

/// Open the Allure sink, stopping the just-started environment if that fails
fn open_allure_sink(environment: &EnvironmentHandle, dir: &Path) -> HarnessResult<AllureSink> {
    AllureSink::new(dir).map_err(|e| {
        session::stop_environment(environment);
        HarnessError::from(e)
    })
}

fn plan_run(config: &Config) -> HarnessResult<(RunIdentity, RunNamespace)> {
    let identity = RunIdentity::new(RunConfig::from_config(config));
    let namespace = RunNamespace::for_run(&config.run.target_dir, &identity);
    namespace.materialize().map_err(|source| HarnessError::Namespace {
        path: namespace.root.clone(),
        source,
    })?;
    Ok((identity, namespace))
}
