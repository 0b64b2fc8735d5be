//! Artifact capture: screenshots, HTML snapshots and recorded-video lookup.
//!
//! Every operation returns its fault as a value. Callers log it and carry on;
//! a capture fault never changes a test's verdict.

pub mod types;
pub mod utils;

pub use types::{CaptureError, CaptureOutcome, CaptureResult};
pub use utils::{VIDEO_EXTENSIONS, generate_timestamp, is_video_file, unique_artifact_path};

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::session::SessionContext;

const VIDEO_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Save a PNG screenshot of the page as `<dest>/<label>_<HHMMSS_mmm>.png`
pub fn capture_screenshot(
    ctx: &mut SessionContext,
    dest: &Path,
    label: &str,
    full_page: bool,
) -> CaptureResult<PathBuf> {
    if ctx.is_closed() {
        return Err(CaptureError::ContextClosed);
    }
    let png = ctx.screenshot(full_page)?;
    fs::create_dir_all(dest)?;
    let path = unique_artifact_path(dest, label, "png");
    fs::write(&path, &png)?;
    tracing::debug!(test_id = %ctx.test_id(), path = %path.display(), full_page, "screenshot saved");
    Ok(path)
}

/// Save the page's serialized HTML as `<dest>/<label>_<HHMMSS_mmm>.html`
pub fn capture_html(ctx: &mut SessionContext, dest: &Path, label: &str) -> CaptureResult<PathBuf> {
    if ctx.is_closed() {
        return Err(CaptureError::ContextClosed);
    }
    let html = ctx.content()?;
    fs::create_dir_all(dest)?;
    let path = unique_artifact_path(dest, label, "html");
    fs::write(&path, html)?;
    tracing::debug!(test_id = %ctx.test_id(), path = %path.display(), "HTML snapshot saved");
    Ok(path)
}

/// Find the recording in `video_dir`.
///
/// Polls until a video file appears or `settle` expires, then returns the most
/// recently modified one. Returns `None` when the directory stays empty.
pub fn locate_recorded_video(video_dir: &Path, settle: Duration) -> Option<PathBuf> {
    let deadline = Instant::now() + settle;
    loop {
        if let Some(path) = newest_video(video_dir) {
            return Some(path);
        }
        if Instant::now() >= deadline {
            tracing::debug!(dir = %video_dir.display(), "no recorded video found");
            return None;
        }
        thread::sleep(VIDEO_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

fn newest_video(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_video_file(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{LaunchOptions, SimulatedEnvironment, SimulatedSite, Viewport};
    use crate::config::ContextSettings;
    use crate::namespace::{RunNamespace, TestNamespace};
    use crate::session::{EnvironmentHandle, open_context};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> (Arc<SimulatedEnvironment>, SessionContext, TestNamespace) {
        let env = Arc::new(SimulatedEnvironment::launch(LaunchOptions::new("chromium"), SimulatedSite::demo()).unwrap());
        let handle = EnvironmentHandle::from_environment(env.clone(), Duration::ZERO);
        let run = RunNamespace::plan(tmp.path(), "20240101_000000_abcdef12");
        let ns = TestNamespace::plan(&run, "capture_1");
        ns.materialize().unwrap();
        let settings = ContextSettings {
            timeout_ms: 1_000,
            viewport: Viewport::new(200, 120),
            record_video: false,
            video_size: Viewport::new(100, 60),
            video_settle_ms: 0,
        };
        let mut ctx = open_context(&handle, &ns, &settings).unwrap();
        ctx.navigate("https://the-internet.test/checkboxes").unwrap();
        (env, ctx, ns)
    }

    #[test]
    fn test_screenshot_and_html_written() {
        let tmp = TempDir::new().unwrap();
        let (_env, mut ctx, ns) = context(&tmp);

        let shot = capture_screenshot(&mut ctx, &ns.screenshots_dir, "final_state", false).unwrap();
        let name = shot.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("final_state_") && name.ends_with(".png"), "{name}");
        assert_eq!(&fs::read(&shot).unwrap()[1..4], b"PNG");

        let html = capture_html(&mut ctx, &ns.errors_dir, "page").unwrap();
        assert!(fs::read_to_string(html).unwrap().contains("Checkboxes"));
    }

    #[test]
    fn test_capture_faults_are_values() {
        let tmp = TempDir::new().unwrap();
        let (env, mut ctx, ns) = context(&tmp);
        env.faults().set_screenshot(true);
        env.faults().set_content(true);
        assert!(matches!(
            capture_screenshot(&mut ctx, &ns.screenshots_dir, "final_state", false),
            Err(CaptureError::Driver(_))
        ));
        assert!(capture_html(&mut ctx, &ns.errors_dir, "page").is_err());
        assert_eq!(fs::read_dir(&ns.screenshots_dir).unwrap().count(), 0);

        ctx.close().unwrap();
        assert!(matches!(
            capture_screenshot(&mut ctx, &ns.screenshots_dir, "late", false),
            Err(CaptureError::ContextClosed)
        ));
    }

    #[test]
    fn test_locate_video_picks_newest() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(locate_recorded_video(tmp.path(), Duration::ZERO), None);
        assert_eq!(locate_recorded_video(&tmp.path().join("missing"), Duration::from_millis(60)), None);

        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        fs::write(tmp.path().join("old.webm"), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(tmp.path().join("new.gif"), b"x").unwrap();
        fs::write(tmp.path().join("partial.gif.part"), b"x").unwrap();
        assert_eq!(
            locate_recorded_video(tmp.path(), Duration::ZERO),
            Some(tmp.path().join("new.gif"))
        );
    }

    #[test]
    fn test_locate_video_waits_for_late_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let writer = std::thread::spawn({
            let dir = dir.clone();
            move || {
                std::thread::sleep(Duration::from_millis(100));
                fs::write(dir.join("late.mp4"), b"x").unwrap();
            }
        });
        let found = locate_recorded_video(&dir, Duration::from_secs(5));
        writer.join().unwrap();
        assert_eq!(found, Some(dir.join("late.mp4")));
    }
}
