//! Allure results writer.
//!
//! Writes one `<uuid>-result.json` per test and one
//! `<uuid>-attachment.<ext>` per attachment into a results directory that the
//! Allure command-line tool can render.

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{LogLevel, ReportError, ReportResult, ReportSink, StepRecord, TestHandle, extension_for};
use crate::harness::{FailureKind, Verdict};
use crate::identity::TestIdentity;

const FRAMEWORK: &str = "browser-harness";

#[derive(Debug, Clone, Serialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub name: String,
    pub source: String,
    #[serde(rename = "type")]
    pub mime: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub status: &'static str,
    pub stage: &'static str,
    pub status_details: StatusDetails,
    pub start: i64,
    pub stop: i64,
}

/// One Allure test result, as serialized to `<uuid>-result.json`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllureResult {
    pub uuid: String,
    pub history_id: String,
    pub name: String,
    pub full_name: String,
    pub status: &'static str,
    pub status_details: StatusDetails,
    pub stage: &'static str,
    pub start: i64,
    pub stop: i64,
    pub labels: Vec<Label>,
    pub attachments: Vec<Attachment>,
    pub steps: Vec<StepResult>,
}

struct Pending {
    result: AllureResult,
    log: Vec<String>,
}

/// Report sink writing Allure result files
pub struct AllureSink {
    dir: PathBuf,
    pending: Mutex<HashMap<TestHandle, Pending>>,
}

impl AllureSink {
    /// Write results into `dir`, creating it when missing
    pub fn new(dir: impl Into<PathBuf>) -> ReportResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TestHandle, Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_attachment(&self, mime: &str, bytes: &[u8]) -> ReportResult<String> {
        let source = format!("{}-attachment.{}", uuid::Uuid::new_v4(), extension_for(mime));
        fs::write(self.dir.join(&source), bytes)?;
        Ok(source)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Allure status for a verdict: assertion failures are `failed`, anything else `broken`
pub fn status_for(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::Passed => "passed",
        Verdict::Failed(failure) if failure.kind == FailureKind::Assertion => "failed",
        Verdict::Failed(_) => "broken",
    }
}

impl ReportSink for AllureSink {
    fn create_test(&self, test: &TestIdentity) -> ReportResult<TestHandle> {
        let handle = TestHandle::new();
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let thread = std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", std::thread::current().id()));
        let result = AllureResult {
            uuid: handle.to_string(),
            history_id: format!("{:x}", history_hash(&test.display_name)),
            name: test.display_name.clone(),
            full_name: format!("{}.{}", test.run_id, test.test_id),
            status: "unknown",
            status_details: StatusDetails::default(),
            stage: "running",
            start: now_millis(),
            stop: 0,
            labels: vec![
                Label { name: "framework".to_string(), value: FRAMEWORK.to_string() },
                Label { name: "host".to_string(), value: host },
                Label { name: "thread".to_string(), value: thread },
                Label { name: "suite".to_string(), value: test.run_id.clone() },
            ],
            attachments: Vec::new(),
            steps: Vec::new(),
        };
        self.lock().insert(handle.clone(), Pending { result, log: Vec::new() });
        Ok(handle)
    }

    fn attach(&self, handle: &TestHandle, name: &str, mime: &str, bytes: &[u8]) -> ReportResult<()> {
        if !self.lock().contains_key(handle) {
            return Err(ReportError::UnknownTest(handle.to_string()));
        }
        let source = self.write_attachment(mime, bytes)?;
        let mut pending = self.lock();
        let entry = pending
            .get_mut(handle)
            .ok_or_else(|| ReportError::UnknownTest(handle.to_string()))?;
        entry.result.attachments.push(Attachment {
            name: name.to_string(),
            source,
            mime: mime.to_string(),
        });
        Ok(())
    }

    fn log(&self, handle: &TestHandle, level: LogLevel, message: &str) -> ReportResult<()> {
        let mut pending = self.lock();
        let entry = pending
            .get_mut(handle)
            .ok_or_else(|| ReportError::UnknownTest(handle.to_string()))?;
        let time = chrono::Local::now().format("%H:%M:%S%.3f");
        entry.log.push(format!("{time} [{}] {message}", level.as_str()));
        Ok(())
    }

    fn step(&self, handle: &TestHandle, step: &StepRecord) -> ReportResult<()> {
        let mut pending = self.lock();
        let entry = pending
            .get_mut(handle)
            .ok_or_else(|| ReportError::UnknownTest(handle.to_string()))?;
        entry.result.steps.push(StepResult {
            name: step.name.clone(),
            status: if step.passed { "passed" } else { "failed" },
            stage: "finished",
            status_details: StatusDetails {
                message: step.message.clone(),
                trace: None,
            },
            start: step.start,
            stop: step.stop,
        });
        Ok(())
    }

    fn finish(&self, handle: &TestHandle, verdict: &Verdict) -> ReportResult<()> {
        let Pending { mut result, log } = self
            .lock()
            .remove(handle)
            .ok_or_else(|| ReportError::UnknownTest(handle.to_string()))?;

        if !log.is_empty() {
            let source = self.write_attachment("text/plain", log.join("\n").as_bytes())?;
            result.attachments.push(Attachment {
                name: "log".to_string(),
                source,
                mime: "text/plain".to_string(),
            });
        }
        result.status = status_for(verdict);
        result.stage = "finished";
        result.stop = now_millis();
        if let Some(failure) = verdict.failure() {
            result.status_details = StatusDetails {
                message: Some(failure.message.clone()),
                trace: Some(format!("{:?}: {}", failure.kind, failure.message)),
            };
        }

        let path = self.dir.join(format!("{}-result.json", result.uuid));
        fs::write(&path, serde_json::to_string_pretty(&result)?)?;
        tracing::debug!(path = %path.display(), status = result.status, "allure result written");
        Ok(())
    }
}

/// Stable 64-bit FNV-1a hash, used for Allure's `historyId`
fn history_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::TestFailure;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn identity(name: &str) -> TestIdentity {
        TestIdentity {
            test_id: format!("{name}_1"),
            display_name: name.to_string(),
            run_id: "20240101_000000_abcdef12".to_string(),
        }
    }

    fn read_result(dir: &Path) -> serde_json::Value {
        let path = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.to_string_lossy().ends_with("-result.json"))
            .expect("result file");
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_passed_result_with_attachment() {
        let tmp = TempDir::new().unwrap();
        let sink = AllureSink::new(tmp.path().join("allure-results")).unwrap();
        let handle = sink.create_test(&identity("checkbox toggle")).unwrap();
        sink.attach(&handle, "final_state", "image/png", b"\x89PNG").unwrap();
        sink.finish(&handle, &Verdict::Passed).unwrap();

        let json = read_result(sink.dir());
        assert_eq!(json["name"], "checkbox toggle");
        assert_eq!(json["status"], "passed");
        assert_eq!(json["stage"], "finished");
        assert_eq!(json["attachments"][0]["name"], "final_state");
        assert_eq!(json["attachments"][0]["type"], "image/png");
        let source = json["attachments"][0]["source"].as_str().unwrap();
        assert!(source.ends_with("-attachment.png"));
        assert_eq!(fs::read(sink.dir().join(source)).unwrap(), b"\x89PNG");
        assert!(json["statusDetails"].get("message").is_none());
    }

    #[test]
    fn test_failed_result_carries_message_steps_and_log() {
        let tmp = TempDir::new().unwrap();
        let sink = AllureSink::new(tmp.path()).unwrap();
        let handle = sink.create_test(&identity("math")).unwrap();
        sink.log(&handle, LogLevel::Info, "navigating").unwrap();
        sink.step(
            &handle,
            &StepRecord {
                name: "compare".to_string(),
                passed: false,
                message: Some("1 != 2".to_string()),
                start: 1,
                stop: 2,
            },
        )
        .unwrap();
        sink.finish(&handle, &Verdict::Failed(TestFailure::assertion("assertion failed: 1 == 2")))
            .unwrap();

        let json = read_result(tmp.path());
        assert_eq!(json["status"], "failed");
        assert_eq!(json["statusDetails"]["message"], "assertion failed: 1 == 2");
        assert_eq!(json["steps"][0]["status"], "failed");
        assert_eq!(json["steps"][0]["statusDetails"]["message"], "1 != 2");
        assert_eq!(json["attachments"][0]["name"], "log");
    }

    #[test]
    fn test_finished_handle_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let sink = AllureSink::new(tmp.path()).unwrap();
        let handle = sink.create_test(&identity("once")).unwrap();
        sink.finish(&handle, &Verdict::Passed).unwrap();
        assert!(matches!(
            sink.attach(&handle, "late", "text/plain", b"x"),
            Err(ReportError::UnknownTest(_))
        ));
        assert!(sink.finish(&handle, &Verdict::Passed).is_err());
    }

    #[test]
    fn test_non_assertion_failures_are_broken() {
        let timeout = Verdict::Failed(TestFailure::new(FailureKind::Timeout, "waited"));
        assert_eq!(status_for(&timeout), "broken");
        assert_eq!(status_for(&Verdict::Failed(TestFailure::assertion("x"))), "failed");
    }
}
