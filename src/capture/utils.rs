use chrono::Local;
use std::path::{Path, PathBuf};

/// Video file extensions, in order of preference when timestamps tie
pub const VIDEO_EXTENSIONS: [&str; 3] = ["webm", "mp4", "gif"];

/// Local time with milliseconds, `HHMMSS_mmm`
pub fn generate_timestamp() -> String {
    Local::now().format("%H%M%S_%3f").to_string()
}

/// Generate a filename for an artifact
pub fn generate_filename(label: &str, timestamp: &str, extension: &str) -> String {
    format!("{label}_{timestamp}.{extension}")
}

/// Pick a path for `<label>_<timestamp>.<ext>` in `dir` that does not exist yet.
///
/// A numeric suffix is appended when two captures land in the same millisecond.
pub fn unique_artifact_path(dir: &Path, label: &str, extension: &str) -> PathBuf {
    let timestamp = generate_timestamp();
    let candidate = dir.join(generate_filename(label, &timestamp, extension));
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|n| dir.join(generate_filename(label, &format!("{timestamp}_{n}"), extension)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_timestamp_format() {
        let ts = generate_timestamp();
        assert_eq!(ts.len(), 10);
        assert_eq!(&ts[6..7], "_");
        assert!(ts.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_unique_path_adds_suffix_on_collision() {
        let tmp = TempDir::new().unwrap();
        let first = unique_artifact_path(tmp.path(), "final_state", "png");
        assert!(first.file_name().unwrap().to_str().unwrap().starts_with("final_state_"));
        fs::write(&first, b"x").unwrap();

        let stem = first.file_stem().unwrap().to_str().unwrap().to_string();
        let second = unique_artifact_path(tmp.path(), "final_state", "png");
        assert_ne!(first, second);
        if second.file_stem().unwrap().to_str().unwrap().starts_with(&stem) {
            assert!(second.to_str().unwrap().ends_with("_1.png"));
        }
    }

    #[test]
    fn test_video_extensions() {
        assert!(is_video_file(Path::new("a/b.webm")));
        assert!(is_video_file(Path::new("clip.GIF")));
        assert!(!is_video_file(Path::new("clip.gif.part")));
        assert!(!is_video_file(Path::new("shot.png")));
    }
}
