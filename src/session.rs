//! Browser session lifecycle.
//!
//! One [`EnvironmentHandle`] is launched per run and shared by every test.
//! Each test gets its own [`SessionContext`]: an isolated browser context and
//! page, bound to the test's video directory, closed exactly once on every exit
//! path (explicitly through [`close_context`] or on drop).
//!
//! ```text
//! Created -> Active -> CaptureInProgress -> Closed
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::browser::{
    BackendKind, BrowserContext, ContextOptions, DriverError, DriverResult, Environment, FrameRecorder, Page,
    SimulatedEnvironment, SimulatedSite, WebDriverEnvironment,
};
use crate::config::{Config, ContextSettings};
use crate::harness::{HarnessError, HarnessResult};
use crate::namespace::TestNamespace;

/// Shared browser environment of a run. Cheap to clone.
#[derive(Clone)]
pub struct EnvironmentHandle {
    env: Arc<dyn Environment>,
    /// Held while creating a context when the backend cannot do so concurrently
    create_lock: Option<Arc<Mutex<()>>>,
    slow_mo: Duration,
    stopped: Arc<AtomicBool>,
}

impl std::fmt::Debug for EnvironmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentHandle")
            .field("kind", &self.env.kind())
            .field("serialized", &self.create_lock.is_some())
            .field("slow_mo", &self.slow_mo)
            .finish()
    }
}

impl EnvironmentHandle {
    /// Wrap an already launched environment
    pub fn from_environment(env: Arc<dyn Environment>, slow_mo: Duration) -> Self {
        let create_lock = (!env.supports_concurrent_contexts()).then(|| Arc::new(Mutex::new(())));
        Self {
            env,
            create_lock,
            slow_mo,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn kind(&self) -> &str {
        self.env.kind()
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// Number of contexts currently open
    pub fn open_contexts(&self) -> usize {
        self.env.open_contexts()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn new_context(&self, options: &ContextOptions) -> DriverResult<Box<dyn BrowserContext>> {
        if self.is_stopped() {
            return Err(DriverError::Closed);
        }
        match &self.create_lock {
            Some(lock) => {
                let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                self.env.new_context(options)
            }
            None => self.env.new_context(options),
        }
    }
}

/// Launch the shared environment for a run. Failure is fatal to the run.
pub fn start_environment(config: &Config) -> HarnessResult<EnvironmentHandle> {
    let options = config.launch_options();
    let slow_mo = options.slow_mo;
    let env: Arc<dyn Environment> = match config.browser.backend {
        BackendKind::WebDriver => Arc::new(
            WebDriverEnvironment::launch(&config.browser.webdriver_url, options)
                .map_err(HarnessError::EnvironmentStart)?,
        ),
        BackendKind::Simulated => Arc::new(
            SimulatedEnvironment::launch(options, SimulatedSite::demo()).map_err(HarnessError::EnvironmentStart)?,
        ),
    };
    tracing::info!(
        backend = config.browser.backend.as_str(),
        kind = env.kind(),
        headless = config.browser.headless,
        "browser environment started"
    );
    Ok(EnvironmentHandle::from_environment(env, slow_mo))
}

/// Shut the environment down. Best-effort: failures are logged.
pub fn stop_environment(env: &EnvironmentHandle) {
    if env.stopped.swap(true, Ordering::SeqCst) {
        return;
    }
    let leaked = env.open_contexts();
    if leaked > 0 {
        tracing::warn!(leaked, "stopping environment with contexts still open");
    }
    match env.env.close() {
        Ok(()) => tracing::info!(kind = env.kind(), "browser environment stopped"),
        Err(e) => tracing::warn!(error = %e, "failed to stop browser environment"),
    }
}

/// Lifecycle state of a [`SessionContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Active,
    CaptureInProgress,
    Closed,
}

/// Isolated browser context and page owned by one test
pub struct SessionContext {
    test_id: String,
    state: ContextState,
    context: Option<Box<dyn BrowserContext>>,
    page: Option<Box<dyn Page>>,
    recorder: Option<FrameRecorder>,
    video_dir: PathBuf,
    recorded_video: Option<PathBuf>,
    timeout: Duration,
    slow_mo: Duration,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("test_id", &self.test_id)
            .field("state", &self.state)
            .field("video_dir", &self.video_dir)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Open an isolated context and page for one test.
///
/// When video recording is enabled the context is bound to the test's video
/// directory. Backends that do not record video natively get a frame recorder.
pub fn open_context(
    env: &EnvironmentHandle,
    test_ns: &TestNamespace,
    settings: &ContextSettings,
) -> HarnessResult<SessionContext> {
    let options = ContextOptions {
        viewport: settings.viewport,
        record_video_dir: settings.record_video.then(|| test_ns.video_dir.clone()),
        video_size: settings.video_size,
        default_timeout: settings.timeout(),
    };
    let context = env.new_context(&options)?;
    let mut session = SessionContext {
        test_id: test_ns.test_id.clone(),
        state: ContextState::Created,
        context: Some(context),
        page: None,
        recorder: None,
        video_dir: test_ns.video_dir.clone(),
        recorded_video: None,
        timeout: options.default_timeout,
        slow_mo: env.slow_mo,
    };

    // Dropping `session` on error closes the context
    let context = session.context.as_mut().ok_or(DriverError::Closed)?;
    let mut page = context.new_page()?;
    page.set_default_timeout(options.default_timeout);
    session.page = Some(page);
    if settings.record_video && !env.env.records_video() {
        session.recorder = Some(FrameRecorder::new(&test_ns.video_dir, settings.video_size));
    }
    session.state = ContextState::Active;
    tracing::debug!(test_id = %session.test_id, viewport = %settings.viewport, "context opened");
    session.record_frame();
    Ok(session)
}

/// Close a context, logging cleanup faults. A second call is a no-op.
pub fn close_context(ctx: &mut SessionContext) {
    if let Err(e) = ctx.close() {
        tracing::warn!(test_id = %ctx.test_id, error = %e, "context cleanup failed");
    }
}

impl SessionContext {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ContextState::Closed
    }

    /// Directory the context records video into
    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    /// Recording flushed by the frame recorder on close, if any
    pub fn recorded_video(&self) -> Option<&Path> {
        self.recorded_video.as_deref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Enter the capture phase. Page access stays available until close.
    pub fn begin_capture(&mut self) {
        if self.state == ContextState::Active {
            self.state = ContextState::CaptureInProgress;
        }
    }

    fn page(&mut self) -> DriverResult<&mut Box<dyn Page>> {
        if self.state == ContextState::Closed {
            return Err(DriverError::Closed);
        }
        self.page.as_mut().ok_or(DriverError::Closed)
    }

    fn pause(&self) {
        if !self.slow_mo.is_zero() {
            thread::sleep(self.slow_mo);
        }
    }

    /// Push a frame to the recorder. Frames are best-effort.
    fn record_frame(&mut self) {
        if self.recorder.is_none() {
            return;
        }
        let frame = match self.page() {
            Ok(page) => page.screenshot(false),
            Err(e) => Err(e),
        };
        let pushed = frame.and_then(|png| match self.recorder.as_mut() {
            Some(recorder) => recorder.push_png(&png),
            None => Ok(()),
        });
        if let Err(e) = pushed {
            tracing::debug!(test_id = %self.test_id, error = %e, "video frame skipped");
        }
    }

    pub fn navigate(&mut self, url: &str) -> DriverResult<()> {
        self.pause();
        self.page()?.navigate(url)?;
        self.record_frame();
        Ok(())
    }

    pub fn click(&mut self, selector: &str) -> DriverResult<()> {
        self.pause();
        self.page()?.click(selector)?;
        self.record_frame();
        Ok(())
    }

    pub fn fill(&mut self, selector: &str, value: &str) -> DriverResult<()> {
        self.pause();
        self.page()?.fill(selector, value)?;
        self.record_frame();
        Ok(())
    }

    /// Wait for `selector` to become visible, bounded by `timeout` or the context default
    pub fn wait_for(&mut self, selector: &str, timeout: Option<Duration>) -> DriverResult<()> {
        let timeout = timeout.unwrap_or(self.timeout);
        self.page()?.wait_for(selector, timeout)?;
        self.record_frame();
        Ok(())
    }

    pub fn is_visible(&mut self, selector: &str) -> DriverResult<bool> {
        self.page()?.is_visible(selector)
    }

    pub fn text_content(&mut self, selector: &str) -> DriverResult<Option<String>> {
        self.page()?.text_content(selector)
    }

    pub fn is_checked(&mut self, selector: &str) -> DriverResult<bool> {
        self.page()?.is_checked(selector)
    }

    pub fn screenshot(&mut self, full_page: bool) -> DriverResult<Vec<u8>> {
        self.page()?.screenshot(full_page)
    }

    pub fn content(&mut self) -> DriverResult<String> {
        self.page()?.content()
    }

    pub fn url(&mut self) -> DriverResult<String> {
        self.page()?.url()
    }

    pub fn title(&mut self) -> DriverResult<String> {
        self.page()?.title()
    }

    /// Release the page and context and flush the recording.
    ///
    /// Runs once; later calls return `Ok(())`. Every release step is attempted
    /// even if an earlier one fails, and the first fault is returned.
    pub fn close(&mut self) -> DriverResult<()> {
        if self.state == ContextState::Closed {
            return Ok(());
        }
        self.state = ContextState::Closed;
        if let (Some(mut page), Some(recorder)) = (self.page.take(), self.recorder.as_mut()) {
            if let Err(e) = page.screenshot(false).and_then(|png| recorder.push_png(&png)) {
                tracing::debug!(test_id = %self.test_id, error = %e, "final video frame skipped");
            }
        }

        let mut first_fault = None;
        if let Some(mut context) = self.context.take() {
            if let Err(e) = context.close() {
                first_fault = Some(e);
            }
        }
        if let Some(recorder) = self.recorder.take() {
            match recorder.finish() {
                Ok(path) => self.recorded_video = path,
                Err(e) => {
                    first_fault.get_or_insert(e);
                }
            }
        }
        tracing::debug!(test_id = %self.test_id, "context closed");
        match first_fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if self.state != ContextState::Closed {
            close_context(self);
        }
    }
}
