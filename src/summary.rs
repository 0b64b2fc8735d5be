//! Run summary: `run-info.properties` and `RUN_SUMMARY.md` in the run root.
//!
//! Written once, after the environment is torn down. A failure to write is
//! logged and otherwise ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::identity::RunIdentity;
use crate::namespace::RunNamespace;
use crate::runner::TestResult;

/// Everything recorded about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run: RunIdentity,
    pub finished_at: DateTime<Utc>,
    pub host: String,
    /// Run-level directories, relative names with absolute paths
    pub layout: Vec<(String, PathBuf)>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub tests: Vec<TestLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestLine {
    pub name: String,
    pub test_id: String,
    pub status: &'static str,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl RunSummary {
    pub fn new(run: &RunIdentity, namespace: &RunNamespace, results: &[TestResult]) -> Self {
        let tests: Vec<TestLine> = results
            .iter()
            .map(|r| TestLine {
                name: r.name.clone(),
                test_id: r.test_id.clone(),
                status: r.verdict.label(),
                duration_ms: r.duration_ms,
                message: r.verdict.failure().map(|f| f.message.clone()),
            })
            .collect();
        let passed = results.iter().filter(|r| r.verdict.is_passed()).count();
        Self {
            run: run.clone(),
            finished_at: Utc::now(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            layout: namespace
                .directories()
                .into_iter()
                .filter(|(name, _)| *name != "root")
                .map(|(name, path)| (name.to_string(), path.to_path_buf()))
                .collect(),
            total: results.len(),
            passed,
            failed: results.len() - passed,
            tests,
        }
    }

    /// Java-style properties describing the run
    pub fn to_properties(&self) -> String {
        let config = &self.run.config;
        let mut out = String::new();
        let _ = writeln!(out, "# Test run information");
        let _ = writeln!(out, "run.id={}", self.run.run_id);
        let _ = writeln!(out, "run.started={}", self.run.started_at.to_rfc3339());
        let _ = writeln!(out, "run.finished={}", self.finished_at.to_rfc3339());
        let _ = writeln!(out, "browser={}", config.environment_kind);
        let _ = writeln!(out, "headless={}", config.headless);
        let _ = writeln!(out, "slow.mo={}", config.slow_mo_ms);
        let _ = writeln!(out, "host={}", self.host);
        let _ = writeln!(out, "tests.total={}", self.total);
        let _ = writeln!(out, "tests.passed={}", self.passed);
        let _ = writeln!(out, "tests.failed={}", self.failed);
        out
    }

    pub fn to_markdown(&self) -> String {
        let config = &self.run.config;
        let mut out = String::new();
        let _ = writeln!(out, "# Test Run Summary\n");
        let _ = writeln!(out, "**Run ID:** `{}`  ", self.run.run_id);
        let _ = writeln!(out, "**Started:** {}  ", self.run.started_at.to_rfc3339());
        let _ = writeln!(out, "**Finished:** {}  ", self.finished_at.to_rfc3339());
        let _ = writeln!(out, "**Host:** {}\n", self.host);

        let _ = writeln!(out, "## Configuration\n");
        let _ = writeln!(out, "| Setting | Value |");
        let _ = writeln!(out, "|---------|-------|");
        let _ = writeln!(out, "| Browser | {} |", config.environment_kind);
        let _ = writeln!(out, "| Headless | {} |", config.headless);
        let _ = writeln!(out, "| Slow motion | {} ms |\n", config.slow_mo_ms);

        let _ = writeln!(out, "## Directory Structure\n");
        let _ = writeln!(out, "```");
        let _ = writeln!(out, "{}/", self.run.run_id);
        for (name, _) in &self.layout {
            let _ = writeln!(out, "├── {name}/");
        }
        let _ = writeln!(out, "├── run-info.properties");
        let _ = writeln!(out, "└── RUN_SUMMARY.md");
        let _ = writeln!(out, "```\n");

        let _ = writeln!(out, "## Results\n");
        let _ = writeln!(out, "{} passed, {} failed, {} total\n", self.passed, self.failed, self.total);
        if !self.tests.is_empty() {
            let _ = writeln!(out, "| Test | ID | Status | Duration | Message |");
            let _ = writeln!(out, "|------|----|--------|----------|---------|");
            for t in &self.tests {
                let _ = writeln!(
                    out,
                    "| {} | `{}` | {} | {} ms | {} |",
                    table_cell(&t.name),
                    t.test_id,
                    t.status,
                    t.duration_ms,
                    table_cell(t.message.as_deref().unwrap_or(""))
                );
            }
        }
        out
    }
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn try_write(summary: &RunSummary, namespace: &RunNamespace) -> io::Result<()> {
    fs::create_dir_all(&namespace.root)?;
    fs::write(namespace.run_info_path(), summary.to_properties())?;
    fs::write(namespace.summary_path(), summary.to_markdown())?;
    Ok(())
}

/// Persist the run summary. Failures are logged only.
pub fn write_summary(run: &RunIdentity, namespace: &RunNamespace, results: &[TestResult]) -> RunSummary {
    let summary = RunSummary::new(run, namespace, results);
    match try_write(&summary, namespace) {
        Ok(()) => tracing::info!(
            run_id = %run.run_id,
            path = %namespace.summary_path().display(),
            passed = summary.passed,
            failed = summary.failed,
            "run summary written"
        ),
        Err(e) => tracing::warn!(run_id = %run.run_id, error = %e, "failed to write run summary"),
    }
    summary
}
