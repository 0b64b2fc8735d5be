//! Artifact directory layout for runs and tests.
//!
//! Layout of one run:
//!
//! ```text
//! <target>/<run_id>/
//!     errors/<test_id>/
//!     videos/<test_id>/
//!     screenshots/<test_id>/
//!     allure-results/
//!     run-info.properties
//!     RUN_SUMMARY.md
//! ```
//!
//! Planning is pure path construction; [`RunNamespace::materialize`] and
//! [`TestNamespace::materialize`] create the directories and are idempotent.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::identity::{RunIdentity, TestIdentity, is_run_id};

pub const ERRORS_DIR: &str = "errors";
pub const VIDEOS_DIR: &str = "videos";
pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const ALLURE_RESULTS_DIR: &str = "allure-results";
pub const RUN_INFO_FILE: &str = "run-info.properties";
pub const RUN_SUMMARY_FILE: &str = "RUN_SUMMARY.md";

/// Run-level directories
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunNamespace {
    pub root: PathBuf,
    pub errors_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub allure_results_dir: PathBuf,
}

impl RunNamespace {
    /// Plan the run directories under `target_dir`
    pub fn plan(target_dir: &Path, run_id: &str) -> Self {
        let root = target_dir.join(run_id);
        Self {
            errors_dir: root.join(ERRORS_DIR),
            videos_dir: root.join(VIDEOS_DIR),
            screenshots_dir: root.join(SCREENSHOTS_DIR),
            allure_results_dir: root.join(ALLURE_RESULTS_DIR),
            root,
        }
    }

    pub fn for_run(target_dir: &Path, run: &RunIdentity) -> Self {
        Self::plan(target_dir, &run.run_id)
    }

    /// Create every run-level directory if absent
    pub fn materialize(&self) -> io::Result<()> {
        for (_, dir) in self.directories() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Named run-level directories, root first
    pub fn directories(&self) -> [(&'static str, &Path); 5] {
        [
            ("root", self.root.as_path()),
            (ERRORS_DIR, self.errors_dir.as_path()),
            (VIDEOS_DIR, self.videos_dir.as_path()),
            (SCREENSHOTS_DIR, self.screenshots_dir.as_path()),
            (ALLURE_RESULTS_DIR, self.allure_results_dir.as_path()),
        ]
    }

    pub fn run_info_path(&self) -> PathBuf {
        self.root.join(RUN_INFO_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(RUN_SUMMARY_FILE)
    }
}

/// Test-scoped directories. Every path ends in the test ID, so two tests never
/// share a directory below the run-level category directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestNamespace {
    pub test_id: String,
    pub screenshots_dir: PathBuf,
    pub video_dir: PathBuf,
    pub errors_dir: PathBuf,
}

impl TestNamespace {
    /// Plan the directories for one test inside a run
    pub fn plan(run: &RunNamespace, test_id: &str) -> Self {
        Self {
            test_id: test_id.to_string(),
            screenshots_dir: run.screenshots_dir.join(test_id),
            video_dir: run.videos_dir.join(test_id),
            errors_dir: run.errors_dir.join(test_id),
        }
    }

    /// Derive a test namespace directly from the two identities
    pub fn derive(target_dir: &Path, run: &RunIdentity, test: &TestIdentity) -> Self {
        Self::plan(&RunNamespace::for_run(target_dir, run), &test.test_id)
    }

    /// Create the screenshot and video directories.
    ///
    /// The errors directory is only created by [`Self::materialize_errors`],
    /// so passing tests leave nothing under `errors/`.
    pub fn materialize(&self) -> io::Result<()> {
        fs::create_dir_all(&self.screenshots_dir)?;
        fs::create_dir_all(&self.video_dir)?;
        Ok(())
    }

    /// Create the errors directory for a failing test
    pub fn materialize_errors(&self) -> io::Result<&Path> {
        fs::create_dir_all(&self.errors_dir)?;
        Ok(&self.errors_dir)
    }
}

/// List every run directory under `target_dir`, oldest first
pub fn list_runs(target_dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !target_dir.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(target_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_run = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(is_run_id)
            .unwrap_or(false);
        if is_run && path.is_dir() {
            runs.push(path);
        }
    }
    runs.sort();
    Ok(runs)
}

/// Remove run directories older than `max_age`. Only directories whose name
/// is a run ID are considered, so build output sharing `target/` is safe.
pub fn cleanup_old_runs(target_dir: &Path, max_age: Duration) -> io::Result<usize> {
    let now = SystemTime::now();
    let mut cleaned = 0;

    for path in list_runs(target_dir)? {
        let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age > max_age {
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "removed old run");
                    cleaned += 1;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove old run"),
            }
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_plan_is_pure() {
        let run = RunNamespace::plan(Path::new("target"), "20240102_030405_0a1b2c3d");
        assert_eq!(run.root, PathBuf::from("target/20240102_030405_0a1b2c3d"));
        assert_eq!(run.errors_dir, run.root.join("errors"));
        assert_eq!(run.allure_results_dir, run.root.join("allure-results"));

        let test = TestNamespace::plan(&run, "checkbox_toggle_1");
        assert_eq!(test.screenshots_dir, run.root.join("screenshots/checkbox_toggle_1"));
        assert_eq!(test.video_dir, run.root.join("videos/checkbox_toggle_1"));
        assert_eq!(test.errors_dir, run.root.join("errors/checkbox_toggle_1"));
        assert!(!run.root.exists());
    }

    #[test]
    fn test_namespaces_of_different_tests_are_disjoint() {
        let run = RunNamespace::plan(Path::new("target"), "run");
        let a = TestNamespace::plan(&run, "a_1");
        let b = TestNamespace::plan(&run, "a_2");
        for left in [&a.screenshots_dir, &a.video_dir, &a.errors_dir] {
            for right in [&b.screenshots_dir, &b.video_dir, &b.errors_dir] {
                assert!(!left.starts_with(right) && !right.starts_with(left));
            }
        }
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let run = RunNamespace::plan(tmp.path(), "20240102_030405_0a1b2c3d");
        run.materialize().unwrap();
        run.materialize().unwrap();

        let test = TestNamespace::plan(&run, "t_1");
        test.materialize().unwrap();
        test.materialize().unwrap();

        assert!(test.screenshots_dir.is_dir());
        assert!(test.video_dir.is_dir());
        assert!(!test.errors_dir.exists());

        test.materialize_errors().unwrap();
        assert!(test.errors_dir.is_dir());
    }

    #[test]
    fn test_materialize_propagates_storage_errors() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocked");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let run = RunNamespace::plan(&blocker, "run");
        assert!(run.materialize().is_err());
    }

    #[test]
    fn test_list_and_cleanup_runs() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("20240102_030405_0a1b2c3d")).unwrap();
        fs::create_dir_all(tmp.path().join("20240103_030405_ffffffff")).unwrap();
        fs::create_dir_all(tmp.path().join("debug")).unwrap();

        let runs = list_runs(tmp.path()).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].ends_with("20240102_030405_0a1b2c3d"));

        assert_eq!(cleanup_old_runs(tmp.path(), Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cleanup_old_runs(tmp.path(), Duration::from_millis(5)).unwrap(), 2);
        assert!(list_runs(tmp.path()).unwrap().is_empty());
        assert!(tmp.path().join("debug").exists());
    }
}
