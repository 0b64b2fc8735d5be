//! Demo suite against the built-in simulated site.
//!
//! Produces a complete run directory (screenshots, videos, errors, Allure
//! results and summary) without a browser installed. Pass `--with-failure`
//! to include a failing test and see the error artifacts.

use browser_harness::browser::BackendKind;
use browser_harness::{Config, Runner, TestCase, TestHarness, check, check_eq};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const BASE_URL: &str = "https://the-internet.test";

fn demo_tests(with_failure: bool) -> Vec<TestCase> {
    let mut tests = vec![
        TestCase::new("checkbox toggle", |cx| {
            cx.navigate_to(&format!("{BASE_URL}/checkboxes"), "Checkboxes page")?;
            cx.assert_text("h3", "Checkboxes")?;
            cx.step("Toggle checkboxes", |cx| {
                cx.click_element("#checkbox1", "first checkbox")?;
                cx.click_element("#checkbox2", "second checkbox")?;
                Ok(())
            })?;
            check!(cx.is_checked("#checkbox1")?);
            check!(!cx.is_checked("#checkbox2")?);
            Ok(())
        }),
        TestCase::new("login", |cx| {
            cx.navigate_to(&format!("{BASE_URL}/login"), "Login page")?;
            cx.fill_field("#username", "tomsmith", "username")?;
            cx.fill_field("#password", "SuperSecretPassword!", "password")?;
            cx.click_element("button[type='submit']", "login button")?;
            cx.assert_visible("#flash", "flash message")?;
            cx.assert_text("#flash", "You logged into a secure area!")
        }),
        TestCase::new("dynamic loading", |cx| {
            cx.navigate_to(&format!("{BASE_URL}/dynamic_loading/1"), "Dynamic loading example")?;
            cx.click_element("#start button", "start button")?;
            cx.wait_for("#finish")?;
            check_eq!(cx.text_of("#finish")?, "Hello World!");
            cx.save_screenshot("loaded");
            Ok(())
        }),
    ];

    if with_failure {
        tests.push(TestCase::new("intentional failure", |cx| {
            cx.navigate_to(&format!("{BASE_URL}/checkboxes"), "Checkboxes page")?;
            check_eq!(cx.is_checked("#checkbox1")?, true);
            Ok(())
        }));
    }
    tests
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("browser_harness=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let with_failure = std::env::args().any(|arg| arg == "--with-failure");
    let config = Config::from_env().backend(BackendKind::Simulated);

    let harness = match TestHarness::start(config) {
        Ok(harness) => harness,
        Err(e) => {
            eprintln!("Demo suite failed to start: {}", e);
            return ExitCode::from(2);
        }
    };

    let report = Runner::new(harness).run_all(demo_tests(with_failure)).await;
    for result in &report.results {
        println!("{:<24} {}", result.name, result.verdict.label());
    }
    println!("Artifacts: {}", report.root.display());

    if report.success() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
