//! Suite execution.

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::collector::classify_error;
use crate::config::SuiteConfig;
use crate::error::{HealError, Result};
use crate::types::ErrorKind;

/// Captured result of one suite process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl SuiteOutput {
    /// stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs one suite to completion.
#[async_trait]
pub trait SuiteExecutor: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the suite process cannot be started. A suite that
    /// runs and fails is an `Ok` output with `success == false`.
    async fn run_suite(&self, suite: &SuiteConfig) -> Result<SuiteOutput>;
}

/// Spawns `<command> <spec_path>` for each suite.
#[derive(Debug, Clone)]
pub struct PlaywrightExecutor {
    command: Vec<String>,
    base_url: String,
}

impl PlaywrightExecutor {
    #[must_use]
    pub fn new(command: Vec<String>, base_url: impl Into<String>) -> Self {
        Self {
            command,
            base_url: base_url.into(),
        }
    }

    fn command_line(&self, suite: &SuiteConfig) -> String {
        format!("{} {}", self.command.join(" "), suite.spec_path)
    }
}

#[async_trait]
impl SuiteExecutor for PlaywrightExecutor {
    async fn run_suite(&self, suite: &SuiteConfig) -> Result<SuiteOutput> {
        let (program, args) = self.command.split_first().ok_or_else(|| HealError::Process {
            command: String::new(),
            reason: "empty command".into(),
        })?;
        let command_line = self.command_line(suite);
        info!("Running suite {}: {command_line}", suite.name);

        let start = Instant::now();
        let child = Command::new(program)
            .args(args)
            .arg(&suite.spec_path)
            .env("BASE_URL", &self.base_url)
            .env("PLAYWRIGHT_BASE_URL", &self.base_url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HealError::Process {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        let limit = Duration::from_secs(suite.timeout_secs);
        let result = timeout(limit, child.wait_with_output()).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if !output.status.success() {
                    debug!("Suite {} exited with {}", suite.name, output.status);
                }
                Ok(SuiteOutput {
                    success: output.status.success(),
                    stdout,
                    stderr,
                    duration_ms,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(HealError::Process {
                command: command_line,
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!("Suite {} killed after {}s", suite.name, limit.as_secs());
                Ok(SuiteOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: format!(
                        "TimeoutError: suite exceeded its {}s timeout and was killed",
                        limit.as_secs()
                    ),
                    duration_ms,
                    timed_out: true,
                })
            }
        }
    }
}

/// Source line of the failing statement in a Playwright code frame, e.g.
/// `> 42 |     await page.waitForURL('**/dashboard')`.
static CODE_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*>\s*\d+\s*\|\s*(await\s+page\.\S.*)$").unwrap());

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*((?:Error|TimeoutError|AssertionError)\b.*|\w+\.\w+: .*(?:Timeout|Error).*)$")
        .unwrap()
});

/// Failing statement from the code frame, used as the step name.
#[must_use]
pub fn failing_step(output: &str) -> Option<String> {
    CODE_FRAME
        .captures(output)
        .map(|c| c[1].trim().to_string())
}

/// First error line in the output, or its first non-empty line.
#[must_use]
pub fn extract_error_message(output: &str) -> String {
    ERROR_LINE
        .captures(output)
        .map(|c| c[1].trim().to_string())
        .or_else(|| {
            output
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(String::from)
        })
        .unwrap_or_else(|| "Suite failed without output".to_string())
}

/// Classify a suite failure from its combined output.
#[must_use]
pub fn infer_error_kind(output: &str) -> ErrorKind {
    let step = failing_step(output).unwrap_or_default();
    classify_error(&extract_error_message(output), &step)
}
