pub mod lifecycle;
pub mod steps;
pub mod types;

pub use lifecycle::{RunContext, TestHarness};
pub use steps::{BASELINES_DIR, TestCx};
pub use types::{FailureKind, HarnessError, HarnessResult, TestFailure, TestOutcome, Verdict};
