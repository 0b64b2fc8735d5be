//! Byte-exact screenshot baseline gate.
//!
//! The first comparison against a missing reference creates it. Afterwards the
//! screenshot must match the reference byte for byte; on mismatch the current
//! image and a `diff.txt` describing the first differing offset are written
//! next to the test's other failure artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DIFF_FILE: &str = "diff.txt";
pub const CURRENT_FILE: &str = "current.png";

/// Result of comparing a screenshot against its reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineOutcome {
    /// No reference existed; the screenshot became the reference
    Created(PathBuf),
    Matched,
    Mismatch(Mismatch),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Offset of the first differing byte (the shorter length if one is a prefix)
    pub offset: u64,
    pub current_len: u64,
    pub reference_len: u64,
    pub current_path: PathBuf,
    pub diff_path: PathBuf,
}

impl Mismatch {
    pub fn describe(&self) -> String {
        format!(
            "Files differ!\nFirst difference at byte: {}\nCurrent size: {} bytes\nReference size: {} bytes\n",
            self.offset, self.current_len, self.reference_len
        )
    }
}

/// Offset of the first differing byte, `None` when both are identical
pub fn first_mismatch(a: &[u8], b: &[u8]) -> Option<usize> {
    match a.iter().zip(b).position(|(x, y)| x != y) {
        Some(offset) => Some(offset),
        None if a.len() != b.len() => Some(a.len().min(b.len())),
        None => None,
    }
}

/// Compare `current` with the reference at `reference`.
///
/// On mismatch `current.png` and `diff.txt` are written into `artifacts_dir`.
pub fn compare_to_baseline(current: &[u8], reference: &Path, artifacts_dir: &Path) -> io::Result<BaselineOutcome> {
    if !reference.exists() {
        if let Some(parent) = reference.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(reference, current)?;
        tracing::info!(path = %reference.display(), "baseline created");
        return Ok(BaselineOutcome::Created(reference.to_path_buf()));
    }

    let expected = fs::read(reference)?;
    let Some(offset) = first_mismatch(current, &expected) else {
        return Ok(BaselineOutcome::Matched);
    };

    fs::create_dir_all(artifacts_dir)?;
    let mismatch = Mismatch {
        offset: offset as u64,
        current_len: current.len() as u64,
        reference_len: expected.len() as u64,
        current_path: artifacts_dir.join(CURRENT_FILE),
        diff_path: artifacts_dir.join(DIFF_FILE),
    };
    fs::write(&mismatch.current_path, current)?;
    fs::write(&mismatch.diff_path, mismatch.describe())?;
    tracing::warn!(
        reference = %reference.display(),
        offset = mismatch.offset,
        "screenshot differs from baseline"
    );
    Ok(BaselineOutcome::Mismatch(mismatch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_mismatch() {
        assert_eq!(first_mismatch(b"abc", b"abc"), None);
        assert_eq!(first_mismatch(b"abc", b"abd"), Some(2));
        assert_eq!(first_mismatch(b"ab", b"abc"), Some(2));
        assert_eq!(first_mismatch(b"", b""), None);
    }

    #[test]
    fn test_missing_reference_is_created() {
        let tmp = TempDir::new().unwrap();
        let reference = tmp.path().join("baselines").join("home.png");
        let outcome = compare_to_baseline(b"png-bytes", &reference, tmp.path()).unwrap();
        assert_eq!(outcome, BaselineOutcome::Created(reference.clone()));
        assert_eq!(fs::read(&reference).unwrap(), b"png-bytes");

        let again = compare_to_baseline(b"png-bytes", &reference, tmp.path()).unwrap();
        assert_eq!(again, BaselineOutcome::Matched);
        assert!(!tmp.path().join(DIFF_FILE).exists());
    }

    #[test]
    fn test_mismatch_writes_diff() {
        let tmp = TempDir::new().unwrap();
        let reference = tmp.path().join("home.png");
        fs::write(&reference, b"0123456789").unwrap();
        let errors = tmp.path().join("errors");

        let BaselineOutcome::Mismatch(mismatch) = compare_to_baseline(b"0123X", &reference, &errors).unwrap() else {
            panic!("expected a mismatch");
        };
        assert_eq!(mismatch.offset, 4);
        assert_eq!(mismatch.current_len, 5);
        assert_eq!(mismatch.reference_len, 10);
        let diff = fs::read_to_string(&mismatch.diff_path).unwrap();
        assert!(diff.contains("First difference at byte: 4"));
        assert!(diff.contains("Reference size: 10 bytes"));
        assert_eq!(fs::read(&mismatch.current_path).unwrap(), b"0123X");
    }
}
