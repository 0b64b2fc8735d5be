pub mod framebuffer;
pub mod recorder;
pub mod simulated;
pub mod types;
pub mod webdriver;

pub use framebuffer::Framebuffer;
pub use recorder::{FrameRecorder, VIDEO_EXTENSION};
pub use simulated::{Effect, Faults, SimElement, SimPage, SimulatedEnvironment, SimulatedSite};
pub use types::{
    BackendKind, BrowserContext, ContextOptions, DriverError, DriverResult, Environment, LaunchOptions, Page,
    Viewport,
};
pub use webdriver::{CurlTransport, Method, Transport, WebDriverEnvironment};
