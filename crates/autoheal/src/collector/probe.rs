//! Access to the browser page a test failed on.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use crate::error::{HealError, Result};

/// Keeps only the most recent `capacity` lines.
#[derive(Debug, Clone)]
pub struct BoundedLog {
    capacity: usize,
    lines: VecDeque<String>,
}

impl BoundedLog {
    /// Create a log holding at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Extend<String> for BoundedLog {
    fn extend<T: IntoIterator<Item = String>>(&mut self, iter: T) {
        for line in iter {
            self.push(line);
        }
    }
}

/// A page whose state can be captured after a failure.
#[async_trait]
pub trait PageProbe: Send + Sync {
    /// URL the page is currently on.
    async fn current_url(&self) -> Option<String>;

    /// Write a full-page PNG screenshot to `path`.
    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Serialized HTML of the page.
    async fn dom_snapshot(&self) -> Result<String>;

    /// Recent console lines, oldest first.
    fn console_lines(&self) -> Vec<String>;

    /// Recent network lines, oldest first.
    fn network_lines(&self) -> Vec<String>;
}

const CAPTURE_SCRIPT: &str = r"
const { chromium } = require('playwright');

(async () => {
  const max = __MAX_LINES__;
  const consoleLines = [];
  const networkLines = [];
  const keep = (lines, line) => {
    lines.push(line);
    if (lines.length > max) lines.shift();
  };

  const browser = await chromium.launch({ headless: true });
  const page = await browser.newPage();
  page.on('console', (m) => keep(consoleLines, `[${m.type()}] ${m.text()}`));
  page.on('pageerror', (e) => keep(consoleLines, `[pageerror] ${e.message}`));
  page.on('response', (r) => keep(networkLines, `${r.status()} ${r.request().method()} ${r.url()}`));
  page.on('requestfailed', (r) =>
    keep(networkLines, `FAILED ${r.method()} ${r.url()} ${r.failure() ? r.failure().errorText : ''}`));

  let error = null;
  try {
    await page.goto(__URL__, { waitUntil: 'load', timeout: __TIMEOUT_MS__ });
  } catch (e) {
    error = e.message;
  }
  try {
    await page.screenshot({ path: __SCREENSHOT__, fullPage: true });
  } catch (e) {
    error = error || e.message;
  }
  const html = await page.content().catch(() => '');
  console.log(JSON.stringify({ url: page.url(), html, console: consoleLines, network: networkLines, error }));
  await browser.close();
})();
";

/// Time allowed on top of the navigation timeout for browser start-up and
/// teardown.
const LAUNCH_ALLOWANCE: Duration = Duration::from_secs(30);

/// Run `<program> <script>` to completion, killing it once `limit` passes.
async fn run_script(program: &str, script: &Path, limit: Duration) -> Result<std::process::Output> {
    let command = format!("{program} {}", script.display());
    let child = Command::new(program)
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HealError::Process {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    match time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(HealError::Process {
            command,
            reason: e.to_string(),
        }),
        Err(_) => {
            warn!("{command} killed after {}s", limit.as_secs());
            Err(HealError::Process {
                command,
                reason: format!("capture timed out after {}s", limit.as_secs()),
            })
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CaptureOutput {
    url: Option<String>,
    #[serde(default)]
    html: String,
    #[serde(default)]
    console: Vec<String>,
    #[serde(default)]
    network: Vec<String>,
    error: Option<String>,
}

/// Page state captured once by a headless Playwright run against a URL.
///
/// The browser is gone by the time the probe is queried; the screenshot
/// lives in a temporary directory owned by the probe.
pub struct PlaywrightProbe {
    workdir: tempfile::TempDir,
    screenshot: Option<PathBuf>,
    url: Option<String>,
    html: String,
    console: BoundedLog,
    network: BoundedLog,
}

impl PlaywrightProbe {
    /// Build the Node script that performs the capture.
    #[must_use]
    pub fn build_script(url: &str, screenshot: &Path, max_lines: usize, timeout: Duration) -> String {
        let quote = |s: &str| serde_json::Value::String(s.to_string()).to_string();
        CAPTURE_SCRIPT
            .replace("__MAX_LINES__", &max_lines.to_string())
            .replace("__URL__", &quote(url))
            .replace("__SCREENSHOT__", &quote(&screenshot.to_string_lossy()))
            .replace("__TIMEOUT_MS__", &timeout.as_millis().to_string())
    }

    /// Open `url` in headless Chromium and capture its state.
    ///
    /// # Errors
    ///
    /// Returns an error if node cannot be started or prints no capture.
    /// Navigation failures are not errors: the probe still carries whatever
    /// the page showed.
    pub async fn capture(url: &str, max_lines: usize, timeout: Duration) -> Result<Self> {
        let workdir = tempfile::tempdir().map_err(|e| HealError::io(std::env::temp_dir(), e))?;
        let screenshot = workdir.path().join("capture.png");
        let script_path = workdir.path().join("capture.js");
        let script = Self::build_script(url, &screenshot, max_lines, timeout);
        std::fs::write(&script_path, script).map_err(|e| HealError::io(&script_path, e))?;

        debug!("Capturing page state for {url}");
        let output = run_script("node", &script_path, timeout + LAUNCH_ALLOWANCE).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let capture: CaptureOutput = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| HealError::Process {
                command: "node capture.js".into(),
                reason: format!(
                    "no capture output (exit {}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })?;

        if let Some(err) = &capture.error {
            warn!("Page capture for {url} was partial: {err}");
        }

        Ok(Self::from_parts(workdir, screenshot, capture, max_lines))
    }

    fn from_parts(
        workdir: tempfile::TempDir,
        screenshot: PathBuf,
        capture: CaptureOutput,
        max_lines: usize,
    ) -> Self {
        let mut console = BoundedLog::new(max_lines);
        console.extend(capture.console);
        let mut network = BoundedLog::new(max_lines);
        network.extend(capture.network);
        Self {
            screenshot: screenshot.exists().then_some(screenshot),
            workdir,
            url: capture.url,
            html: capture.html,
            console,
            network,
        }
    }

    /// Directory holding the raw capture.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

#[async_trait]
impl PageProbe for PlaywrightProbe {
    async fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let source = self.screenshot.as_ref().ok_or_else(|| HealError::Process {
            command: "page.screenshot".into(),
            reason: "no screenshot was captured".into(),
        })?;
        tokio::fs::copy(source, path)
            .await
            .map_err(|e| HealError::io(path, e))?;
        Ok(())
    }

    async fn dom_snapshot(&self) -> Result<String> {
        Ok(self.html.clone())
    }

    fn console_lines(&self) -> Vec<String> {
        self.console.lines()
    }

    fn network_lines(&self) -> Vec<String> {
        self.network.lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_log_keeps_last_lines() {
        let mut log = BoundedLog::new(3);
        assert!(log.is_empty());
        log.extend((1..=5).map(|i| format!("line {i}")));
        assert_eq!(log.len(), 3);
        assert_eq!(log.lines(), vec!["line 3", "line 4", "line 5"]);
    }

    #[test]
    fn test_build_script_quotes_values() {
        let script = PlaywrightProbe::build_script(
            "http://localhost:3000/it's",
            Path::new("/tmp/shot.png"),
            20,
            Duration::from_secs(15),
        );
        assert!(script.contains(r#"page.goto("http://localhost:3000/it's""#));
        assert!(script.contains(r#"path: "/tmp/shot.png""#));
        assert!(script.contains("const max = 20;"));
        assert!(script.contains("timeout: 15000"));
        assert!(!script.contains("__"));
    }

    #[tokio::test]
    async fn test_probe_from_parts() {
        let workdir = tempfile::tempdir().unwrap();
        let shot = workdir.path().join("capture.png");
        std::fs::write(&shot, b"png").unwrap();
        let capture = CaptureOutput {
            url: Some("http://localhost:3000/auth/login".into()),
            html: "<html></html>".into(),
            console: (0..30).map(|i| format!("c{i}")).collect(),
            network: vec!["200 GET /".into()],
            error: None,
        };

        let probe = PlaywrightProbe::from_parts(workdir, shot, capture, 20);
        assert_eq!(probe.console_lines().len(), 20);
        assert_eq!(probe.console_lines()[0], "c10");
        assert_eq!(probe.dom_snapshot().await.unwrap(), "<html></html>");

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("copy.png");
        probe.screenshot(&dest).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"png");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_script_kills_hung_capture() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hang.sh");
        std::fs::write(&script, "sleep 5\n").unwrap();

        let result = run_script("sh", &script, Duration::from_millis(100)).await;
        match result {
            Err(HealError::Process { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_script_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ok.sh");
        std::fs::write(&script, "echo '{\"url\":null}'\n").unwrap();

        let output = run_script("sh", &script, Duration::from_secs(10)).await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), r#"{"url":null}"#);
    }
}
