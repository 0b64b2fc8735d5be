//! In-memory report sink for tests and dry runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::types::{LogLevel, ReportError, ReportResult, ReportSink, StepRecord, TestHandle};
use crate::harness::Verdict;
use crate::identity::TestIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAttachment {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Everything a sink received for one test
#[derive(Debug, Clone)]
pub struct MemoryTest {
    pub handle: TestHandle,
    pub identity: TestIdentity,
    pub attachments: Vec<MemoryAttachment>,
    pub logs: Vec<(LogLevel, String)>,
    pub steps: Vec<StepRecord>,
    pub verdict: Option<Verdict>,
}

impl MemoryTest {
    pub fn attachment(&self, name: &str) -> Option<&MemoryAttachment> {
        self.attachments.iter().find(|a| a.name == name)
    }

    pub fn attachment_names(&self) -> Vec<&str> {
        self.attachments.iter().map(|a| a.name.as_str()).collect()
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    tests: Mutex<Vec<MemoryTest>>,
    fail_attachments: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `attach` call fail
    pub fn set_fail_attachments(&self, fail: bool) {
        self.fail_attachments.store(fail, Ordering::SeqCst);
    }

    pub fn tests(&self) -> Vec<MemoryTest> {
        self.lock().clone()
    }

    /// First test reported under `display_name`
    pub fn test(&self, display_name: &str) -> Option<MemoryTest> {
        self.lock()
            .iter()
            .find(|t| t.identity.display_name == display_name)
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MemoryTest>> {
        self.tests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_test<T>(&self, handle: &TestHandle, f: impl FnOnce(&mut MemoryTest) -> T) -> ReportResult<T> {
        let mut tests = self.lock();
        let test = tests
            .iter_mut()
            .find(|t| &t.handle == handle)
            .ok_or_else(|| ReportError::UnknownTest(handle.to_string()))?;
        Ok(f(test))
    }
}

impl ReportSink for MemorySink {
    fn create_test(&self, test: &TestIdentity) -> ReportResult<TestHandle> {
        let handle = TestHandle::new();
        self.lock().push(MemoryTest {
            handle: handle.clone(),
            identity: test.clone(),
            attachments: Vec::new(),
            logs: Vec::new(),
            steps: Vec::new(),
            verdict: None,
        });
        Ok(handle)
    }

    fn attach(&self, handle: &TestHandle, name: &str, mime: &str, bytes: &[u8]) -> ReportResult<()> {
        if self.fail_attachments.load(Ordering::SeqCst) {
            return Err(ReportError::Rejected(format!("attachment '{name}' refused")));
        }
        self.with_test(handle, |t| {
            t.attachments.push(MemoryAttachment {
                name: name.to_string(),
                mime: mime.to_string(),
                bytes: bytes.to_vec(),
            })
        })
    }

    fn log(&self, handle: &TestHandle, level: LogLevel, message: &str) -> ReportResult<()> {
        self.with_test(handle, |t| t.logs.push((level, message.to_string())))
    }

    fn step(&self, handle: &TestHandle, step: &StepRecord) -> ReportResult<()> {
        self.with_test(handle, |t| t.steps.push(step.clone()))
    }

    fn finish(&self, handle: &TestHandle, verdict: &Verdict) -> ReportResult<()> {
        self.with_test(handle, |t| t.verdict = Some(verdict.clone()))
    }
}
