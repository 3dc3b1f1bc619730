//! Error context collection for failing browser tests.
//!
//! Gathers everything the coordinator needs to diagnose a failure:
//! - Error classification from the message and step name
//! - Screenshot and DOM snapshot of the page
//! - Recent console and network activity
//! - Candidate source files with suspect lines flagged
//!
//! Capture is best-effort: any step that fails is logged and the context is
//! returned in degraded form.

pub mod probe;
pub mod sources;

use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

pub use probe::{BoundedLog, PageProbe, PlaywrightProbe};
pub use sources::SourceCollector;

use crate::config::HealerConfig;
use crate::report::{sanitize_file_component, write_json};
use crate::types::{CapturedState, ErrorContext, ErrorDescriptor, ErrorKind};

pub const CONTEXT_FILE: &str = "error-context.json";
pub const SCREENSHOT_FILE: &str = "error-screenshot.png";
pub const DOM_FILE: &str = "dom-snapshot.html";
pub const CONSOLE_FILE: &str = "console.log";
pub const NETWORK_FILE: &str = "network.log";

static STATUS_5XX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:status|code)\b\W{0,3}5\d\d\b").unwrap());

const SELECTOR_MARKERS: &[&str] = &["selector", "locator", "getbyrole", "getbytext", "getbytestid"];
const NETWORK_MARKERS: &[&str] = &["net::", "econnrefused", "fetch failed", "network"];
const AUTH_MARKERS: &[&str] = &["unauthorized", "401", "403", "auth", "login", "session"];

/// Classify a failure into one of the six buckets. First match wins.
#[must_use]
pub fn classify_error(message: &str, step: &str) -> ErrorKind {
    let msg = message.to_lowercase();
    let step = step.to_lowercase();

    if msg.contains("redirect") || (msg.contains("timeout") && step.contains("waitforurl")) {
        return ErrorKind::Redirect;
    }
    if SELECTOR_MARKERS.iter().any(|m| msg.contains(m)) {
        return ErrorKind::Selector;
    }
    if msg.contains("timeout") || msg.contains("exceeded") {
        return ErrorKind::Timeout;
    }
    if NETWORK_MARKERS.iter().any(|m| msg.contains(m)) || STATUS_5XX.is_match(&msg) {
        return ErrorKind::Network;
    }
    if AUTH_MARKERS.iter().any(|m| msg.contains(m)) {
        return ErrorKind::Authentication;
    }
    ErrorKind::Unknown
}

/// A failure as reported by the test that hit it.
#[derive(Debug, Clone, Default)]
pub struct FailureReport {
    pub test_id: String,
    pub test_name: String,
    pub role: String,
    pub message: String,
    pub stack: Option<String>,
    pub step: String,
    pub expected_url: Option<String>,
}

/// Collects and persists [`ErrorContext`]s.
pub struct ErrorContextCollector {
    artifacts_dir: PathBuf,
    log_buffer_lines: usize,
    sources: SourceCollector,
}

impl ErrorContextCollector {
    /// Create a collector from the harness config.
    #[must_use]
    pub fn new(config: &HealerConfig) -> Self {
        Self {
            artifacts_dir: config.artifacts_dir.clone(),
            log_buffer_lines: config.log_buffer_lines,
            sources: SourceCollector::new(&config.source_root, config.source_candidates.clone()),
        }
    }

    /// Artifact directory for a test.
    #[must_use]
    pub fn test_dir(&self, test_id: &str) -> PathBuf {
        self.artifacts_dir.join(sanitize_file_component(test_id))
    }

    /// Collect the full context for a failure and write it to disk.
    ///
    /// Never fails: capture problems leave the matching fields empty.
    pub async fn collect(&self, failure: &FailureReport, page: Option<&dyn PageProbe>) -> ErrorContext {
        let kind = classify_error(&failure.message, &failure.step);
        let dir = self.test_dir(&failure.test_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Failed to create artifact dir {}: {e}", dir.display());
        }

        info!(
            "Collecting context for {} ({}): {kind} error at step '{}'",
            failure.test_name, failure.test_id, failure.step
        );

        let mut state = CapturedState {
            expected_url: failure.expected_url.clone(),
            ..Default::default()
        };
        if let Some(page) = page {
            self.capture_page(&dir, page, &mut state).await;
        }

        let context = ErrorContext {
            test_id: failure.test_id.clone(),
            test_name: failure.test_name.clone(),
            user_role: if failure.role.is_empty() {
                "unknown".to_string()
            } else {
                failure.role.clone()
            },
            error: ErrorDescriptor {
                kind,
                message: failure.message.clone(),
                stack: failure.stack.clone(),
                step: failure.step.clone(),
                timestamp: Utc::now(),
            },
            state,
            source_files: self.sources.collect(kind).await,
            collected_at: Utc::now(),
        };

        let path = dir.join(CONTEXT_FILE);
        match write_json(&path, &context) {
            Ok(()) => info!("Error context saved to {}", path.display()),
            Err(e) => warn!("Failed to save error context: {e}"),
        }

        context
    }

    async fn capture_page(&self, dir: &Path, page: &dyn PageProbe, state: &mut CapturedState) {
        state.url = page.current_url().await;

        let screenshot = dir.join(SCREENSHOT_FILE);
        match page.screenshot(&screenshot).await {
            Ok(()) => state.screenshot_path = Some(screenshot),
            Err(e) => warn!("Screenshot capture failed: {e}"),
        }

        let dom = dir.join(DOM_FILE);
        match page.dom_snapshot().await {
            Ok(html) => match tokio::fs::write(&dom, html).await {
                Ok(()) => state.dom_snapshot_path = Some(dom),
                Err(e) => warn!("Failed to write DOM snapshot: {e}"),
            },
            Err(e) => warn!("DOM snapshot failed: {e}"),
        }

        state.console_logs = self.last_lines(page.console_lines());
        state.network_logs = self.last_lines(page.network_lines());
        Self::write_lines(&dir.join(CONSOLE_FILE), &state.console_logs).await;
        Self::write_lines(&dir.join(NETWORK_FILE), &state.network_logs).await;
    }

    fn last_lines(&self, lines: Vec<String>) -> Vec<String> {
        let mut log = BoundedLog::new(self.log_buffer_lines);
        log.extend(lines);
        log.lines()
    }

    async fn write_lines(path: &Path, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        if let Err(e) = tokio::fs::write(path, lines.join("\n")).await {
            warn!("Failed to write {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HealError, Result};
    use async_trait::async_trait;

    #[test]
    fn test_classify_wait_for_url_message_is_timeout() {
        assert_eq!(
            classify_error("Timeout 30000ms exceeded waiting for waitForURL", ""),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_classify_wait_for_url_step_is_redirect() {
        assert_eq!(
            classify_error("Timeout 30000ms exceeded", "await page.waitForURL('**/dashboard')"),
            ErrorKind::Redirect
        );
        assert_eq!(
            classify_error("expected redirect to /gestionnaire/dashboard", "submit"),
            ErrorKind::Redirect
        );
    }

    #[test]
    fn test_classify_selector_beats_timeout() {
        assert_eq!(
            classify_error(
                "locator.click: Timeout 5000ms exceeded. waiting for selector 'button[type=submit]'",
                "click submit"
            ),
            ErrorKind::Selector
        );
    }

    #[test]
    fn test_classify_network_and_auth() {
        assert_eq!(
            classify_error("page.goto: net::ERR_CONNECTION_REFUSED", "open"),
            ErrorKind::Network
        );
        assert_eq!(
            classify_error("API responded with status 503", "load"),
            ErrorKind::Network
        );
        assert_eq!(
            classify_error("401 Unauthorized", "load"),
            ErrorKind::Authentication
        );
        assert_eq!(classify_error("Something odd", "x"), ErrorKind::Unknown);
    }

    struct FakePage {
        fail_screenshot: bool,
        console: usize,
    }

    #[async_trait]
    impl PageProbe for FakePage {
        async fn current_url(&self) -> Option<String> {
            Some("http://localhost:3000/auth/login".into())
        }

        async fn screenshot(&self, path: &Path) -> Result<()> {
            if self.fail_screenshot {
                return Err(HealError::Process {
                    command: "screenshot".into(),
                    reason: "browser closed".into(),
                });
            }
            std::fs::write(path, b"png").map_err(|e| HealError::io(path, e))
        }

        async fn dom_snapshot(&self) -> Result<String> {
            Ok("<form id=login></form>".into())
        }

        fn console_lines(&self) -> Vec<String> {
            (1..=self.console)
                .map(|i| format!("[error] Failed to load resource {i}"))
                .collect()
        }

        fn network_lines(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn collector_in(dir: &Path) -> ErrorContextCollector {
        let config = HealerConfig {
            artifacts_dir: dir.join("artifacts"),
            source_root: dir.to_path_buf(),
            ..Default::default()
        };
        ErrorContextCollector::new(&config)
    }

    fn failure() -> FailureReport {
        FailureReport {
            test_id: "auth-login-admin".into(),
            test_name: "Admin login".into(),
            role: "admin".into(),
            message: "Timeout 10000ms exceeded".into(),
            stack: None,
            step: "await page.waitForURL('**/admin/dashboard')".into(),
            expected_url: Some("/admin/dashboard".into()),
        }
    }

    #[tokio::test]
    async fn test_collect_writes_artifacts() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("middleware.ts"), "return NextResponse.redirect(u)").unwrap();
        let collector = collector_in(root.path());

        let page = FakePage { fail_screenshot: false, console: 1 };
        let ctx = collector.collect(&failure(), Some(&page)).await;

        assert_eq!(ctx.error.kind, ErrorKind::Redirect);
        assert_eq!(ctx.user_role, "admin");
        assert_eq!(ctx.state.url.as_deref(), Some("http://localhost:3000/auth/login"));
        assert_eq!(ctx.source_files.len(), 1);

        let dir = collector.test_dir("auth-login-admin");
        assert!(dir.join(SCREENSHOT_FILE).exists());
        assert!(dir.join(DOM_FILE).exists());
        assert!(dir.join(CONSOLE_FILE).exists());
        assert!(!dir.join(NETWORK_FILE).exists());

        let saved: ErrorContext = crate::report::read_json(&dir.join(CONTEXT_FILE)).unwrap();
        assert_eq!(saved, ctx);
    }

    #[tokio::test]
    async fn test_collect_degrades_on_capture_failure() {
        let root = tempfile::tempdir().unwrap();
        let collector = collector_in(root.path());

        let page = FakePage { fail_screenshot: true, console: 1 };
        let ctx = collector.collect(&failure(), Some(&page)).await;

        assert!(ctx.state.screenshot_path.is_none());
        assert!(ctx.state.dom_snapshot_path.is_some());
        assert!(ctx.source_files.is_empty());
    }

    #[tokio::test]
    async fn test_collect_keeps_last_log_lines() {
        let root = tempfile::tempdir().unwrap();
        let collector = collector_in(root.path());

        let page = FakePage { fail_screenshot: false, console: 50 };
        let ctx = collector.collect(&failure(), Some(&page)).await;

        assert_eq!(ctx.state.console_logs.len(), 20);
        assert_eq!(ctx.state.console_logs[0], "[error] Failed to load resource 31");
        assert_eq!(ctx.state.console_logs[19], "[error] Failed to load resource 50");

        let written = std::fs::read_to_string(collector.test_dir("auth-login-admin").join(CONSOLE_FILE)).unwrap();
        assert_eq!(written.lines().count(), 20);
    }

    #[tokio::test]
    async fn test_collect_without_page() {
        let root = tempfile::tempdir().unwrap();
        let collector = collector_in(root.path());
        let mut report = failure();
        report.role = String::new();

        let ctx = collector.collect(&report, None).await;
        assert_eq!(ctx.user_role, "unknown");
        assert!(ctx.state.url.is_none());
        assert_eq!(ctx.state.expected_url.as_deref(), Some("/admin/dashboard"));
    }
}
