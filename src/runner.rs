//! Concurrent test execution.
//!
//! Each test runs as a blocking task on tokio's blocking pool, bounded by a
//! semaphore. Tests share the harness (and its environment) and nothing else.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::capture::CaptureOutcome;
use crate::harness::{FailureKind, TestCx, TestFailure, TestHarness, TestOutcome, Verdict};
use crate::identity::TestIdentity;

/// Result of a single test
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test_id: String,
    pub name: String,
    pub verdict: Verdict,
    pub duration_ms: u64,
    /// Artifacts captured for the test
    pub artifacts: CaptureOutcome,
}

impl TestResult {
    pub fn new(identity: &TestIdentity, verdict: Verdict, duration: Duration, artifacts: CaptureOutcome) -> Self {
        Self {
            test_id: identity.test_id.clone(),
            name: identity.display_name.clone(),
            verdict,
            duration_ms: duration.as_millis() as u64,
            artifacts,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.is_passed()
    }
}

/// Result of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub root: PathBuf,
    pub results: Vec<TestResult>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn result(&self, name: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Body of a test case
pub type TestFn = Arc<dyn Fn(&mut TestCx<'_>) -> TestOutcome + Send + Sync>;

/// A named test to run
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    body: TestFn,
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut TestCx<'_>) -> TestOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish_non_exhaustive()
    }
}

pub struct Runner {
    harness: Arc<TestHarness>,
    parallelism: usize,
}

impl Runner {
    /// Runner using the harness's configured parallelism
    pub fn new(harness: TestHarness) -> Self {
        let parallelism = harness.run().config.run.parallelism.max(1);
        Self {
            harness: Arc::new(harness),
            parallelism,
        }
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn harness(&self) -> &TestHarness {
        &self.harness
    }

    /// Run every case, stop the environment and write the run summary
    pub async fn run_all(self, cases: Vec<TestCase>) -> RunReport {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let names: Vec<String> = cases.iter().map(|c| c.name.clone()).collect();
        tracing::info!(tests = cases.len(), parallelism = self.parallelism, "running tests");

        let mut tasks = JoinSet::new();
        for (index, case) in cases.into_iter().enumerate() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "test scheduling stopped");
                    break;
                }
            };
            let harness = Arc::clone(&self.harness);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = harness.run_test(&case.name, |cx| (case.body)(cx));
                (index, result)
            });
        }

        let mut indexed = Vec::with_capacity(names.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => tracing::error!(error = %e, "test task did not complete"),
            }
        }

        // Tests whose task died outside the harness still get a result
        let completed: HashSet<usize> = indexed.iter().map(|(i, _)| *i).collect();
        for (index, name) in names.iter().enumerate() {
            if !completed.contains(&index) {
                indexed.push((
                    index,
                    TestResult {
                        test_id: String::new(),
                        name: name.clone(),
                        verdict: Verdict::Failed(TestFailure::new(FailureKind::Panic, "test task aborted")),
                        duration_ms: 0,
                        artifacts: CaptureOutcome::new(),
                    },
                ));
            }
        }
        indexed.sort_by_key(|(i, _)| *i);
        let results: Vec<TestResult> = indexed.into_iter().map(|(_, r)| r).collect();

        self.harness.finish(&results);
        let run = self.harness.run();
        let report = RunReport {
            run_id: run.identity.run_id.clone(),
            root: run.namespace.root.clone(),
            results,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            run_id = %report.run_id,
            passed = report.passed(),
            failed = report.failed(),
            "run finished"
        );
        report
    }
}
