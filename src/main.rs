use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use browser_harness::browser::BackendKind;
use browser_harness::config;
use browser_harness::namespace::RUN_SUMMARY_FILE;
use browser_harness::{Runner, Scenario, TestHarness, cleanup_old_runs, list_runs};

/// Browser Harness - run browser tests with per-test artifact capture
#[derive(Parser, Debug)]
#[command(
    name = "browser-harness",
    about = "Run browser test scenarios with per-test sessions, screenshots, videos and Allure results",
    after_help = "ENVIRONMENT VARIABLES:\n\
        browser / BROWSER_HARNESS_BROWSER        Browser kind (chromium, firefox, webkit)\n\
        headless / BROWSER_HARNESS_HEADLESS      Run without a window (true/false)\n\
        slow.mo / BROWSER_HARNESS_SLOW_MO        Delay before each interaction (ms)\n\
        BROWSER_HARNESS_BACKEND                  Backend (webdriver, simulated)\n\
        BROWSER_HARNESS_WEBDRIVER_URL            WebDriver endpoint\n\
        BROWSER_HARNESS_TARGET_DIR               Root directory for run artifacts\n\
        BROWSER_HARNESS_PARALLELISM              Tests executed concurrently\n\
        RUST_LOG                                 Log filter (e.g. browser_harness=debug)"
)]
struct Args {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every test of a JSON scenario file
    Run {
        /// Path to the scenario file
        scenario: PathBuf,

        /// Browser kind: chromium, firefox or webkit
        #[arg(long, short = 'b', env = config::ENV_BROWSER)]
        browser: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Delay before each page interaction (ms)
        #[arg(long, env = config::ENV_SLOW_MO)]
        slow_mo: Option<u64>,

        /// Browser backend: webdriver or simulated
        #[arg(long, env = config::ENV_BACKEND)]
        backend: Option<String>,

        /// WebDriver endpoint
        #[arg(long, env = config::ENV_WEBDRIVER_URL)]
        webdriver_url: Option<String>,

        /// Root directory for run artifacts
        #[arg(long, short = 't', env = config::ENV_TARGET_DIR)]
        target_dir: Option<PathBuf>,

        /// Number of tests executed concurrently
        #[arg(long, short = 'j', env = config::ENV_PARALLELISM)]
        parallelism: Option<usize>,

        /// Do not record videos
        #[arg(long)]
        no_video: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List run directories under the target directory, oldest first
    List {
        /// Root directory for run artifacts (default: configured target directory)
        #[arg(long, short = 't', env = config::ENV_TARGET_DIR)]
        target_dir: Option<PathBuf>,
    },

    /// Delete run directories older than the given age
    Clean {
        /// Root directory for run artifacts (default: configured target directory)
        #[arg(long, short = 't', env = config::ENV_TARGET_DIR)]
        target_dir: Option<PathBuf>,

        /// Maximum age of a kept run (hours)
        #[arg(long, default_value = "24")]
        older_than_hours: u64,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match execute(args.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "browser_harness=debug" } else { "browser_harness=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn execute(command: Option<Commands>) -> Result<ExitCode, Box<dyn Error>> {
    match command {
        Some(Commands::Run {
            scenario,
            browser,
            headed,
            slow_mo,
            backend,
            webdriver_url,
            target_dir,
            parallelism,
            no_video,
            json,
        }) => {
            let scenario = Scenario::load(&scenario)?;

            let mut config = config::get().clone();
            if let Some(browser) = browser {
                config.browser.kind = browser.to_lowercase();
            }
            if headed {
                config.browser.headless = false;
            }
            if let Some(slow_mo) = slow_mo {
                config.browser.slow_mo_ms = slow_mo;
            }
            if let Some(backend) = backend {
                let kind = BackendKind::parse(&backend)
                    .ok_or_else(|| format!("Invalid backend '{}'. Use: webdriver or simulated", backend))?;
                config = config.backend(kind);
            }
            if let Some(url) = webdriver_url {
                config.browser.webdriver_url = url;
            }
            if let Some(dir) = target_dir {
                config = config.target_dir(dir);
            }
            if let Some(n) = parallelism {
                config = config.parallelism(n);
            }
            if no_video {
                config = config.record_video(false);
            }

            let harness = TestHarness::start(config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            let report = runtime.block_on(Runner::new(harness).run_all(scenario.into_cases()));

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Run {}: {} passed, {} failed", report.run_id, report.passed(), report.failed());
                for result in &report.results {
                    let status = if result.passed() { "PASS" } else { "FAIL" };
                    println!("  [{}] {} ({}ms)", status, result.name, result.duration_ms);
                    if let Some(failure) = result.verdict.failure() {
                        println!("         {}", failure.message.lines().next().unwrap_or(""));
                    }
                }
                println!("\nArtifacts: {}", report.root.display());
            }

            Ok(if report.success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }

        Some(Commands::List { target_dir }) => {
            let target_dir = target_dir.unwrap_or_else(|| config::get().run.target_dir.clone());
            let runs = list_runs(&target_dir)?;
            if runs.is_empty() {
                println!("No runs under {}", target_dir.display());
            }
            for run in runs {
                let name = run.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                let marker = if run.join(RUN_SUMMARY_FILE).exists() { "" } else { " (incomplete)" };
                println!("{}{}", name, marker);
            }
            Ok(ExitCode::SUCCESS)
        }

        Some(Commands::Clean {
            target_dir,
            older_than_hours,
        }) => {
            let target_dir = target_dir.unwrap_or_else(|| config::get().run.target_dir.clone());
            let removed = cleanup_old_runs(&target_dir, max_age(older_than_hours))?;
            println!("Removed {} run(s) from {}", removed, target_dir.display());
            Ok(ExitCode::SUCCESS)
        }

        None => {
            println!("Browser Harness - browser tests with per-test artifact capture");
            println!();
            println!("Usage: browser-harness <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run    Run a JSON scenario file");
            println!("  list   List run directories");
            println!("  clean  Delete old run directories");
            println!();
            println!("Run with --help for more information.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Age limit for `clean`, saturating instead of overflowing
fn max_age(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn run_arg_env(id: &str) -> Option<String> {
        let command = Args::command();
        let run = command.find_subcommand("run")?;
        let arg = run.get_arguments().find(|a| a.get_id() == id)?;
        arg.get_env().map(|v| v.to_string_lossy().to_string())
    }

    #[test]
    fn test_max_age_saturates() {
        assert_eq!(max_age(24), Duration::from_secs(86_400));
        assert_eq!(max_age(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_clean_accepts_huge_age() {
        let args = Args::try_parse_from(["browser-harness", "clean", "--older-than-hours", "18446744073709551615"])
            .unwrap();
        match args.command {
            Some(Commands::Clean { older_than_hours, .. }) => assert_eq!(older_than_hours, u64::MAX),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_options_read_environment() {
        assert_eq!(run_arg_env("browser").as_deref(), Some(config::ENV_BROWSER));
        assert_eq!(run_arg_env("slow_mo").as_deref(), Some(config::ENV_SLOW_MO));
        assert_eq!(run_arg_env("backend").as_deref(), Some(config::ENV_BACKEND));
        assert_eq!(run_arg_env("webdriver_url").as_deref(), Some(config::ENV_WEBDRIVER_URL));
        assert_eq!(run_arg_env("target_dir").as_deref(), Some(config::ENV_TARGET_DIR));
        assert_eq!(run_arg_env("parallelism").as_deref(), Some(config::ENV_PARALLELISM));
    }

    #[test]
    fn test_command_line_is_consistent() {
        Args::command().debug_assert();
    }
}
