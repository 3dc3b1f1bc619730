//! Core types for the auto-healing harness.
//!
//! This module defines the primary data structures for:
//! - Describing a failing browser test and the state captured around it
//! - Classifying failures into the six error buckets
//! - Debugger analysis, agent tasks and agent outcomes
//! - Proposed patches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::HealError;

/// Classification of a test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Navigation never reached the expected URL
    Redirect,
    /// A wait or action exceeded its time budget
    Timeout,
    /// A locator did not resolve to an element
    Selector,
    /// Request failed or server answered 5xx
    Network,
    /// Login, session or permission failure
    Authentication,
    /// Nothing matched
    Unknown,
}

impl ErrorKind {
    /// All kinds, in classification priority order.
    pub const ALL: [Self; 6] = [
        Self::Redirect,
        Self::Selector,
        Self::Timeout,
        Self::Network,
        Self::Authentication,
        Self::Unknown,
    ];

    /// Get the kind's name as a string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::Timeout => "timeout",
            Self::Selector => "selector",
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = HealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| HealError::Config(format!("unknown error kind: {s}")))
    }
}

/// Specialist agent identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    /// Root-cause analysis, always first in a plan
    SeidoDebugger,
    /// Server actions, middleware, auth and redirects
    BackendDeveloper,
    /// Client components and API calls from the browser
    FrontendDeveloper,
    /// Test code: selectors, waits, validation runs
    Tester,
}

impl AgentKind {
    /// Every agent, in a stable order.
    pub const ALL: [Self; 4] = [
        Self::SeidoDebugger,
        Self::BackendDeveloper,
        Self::FrontendDeveloper,
        Self::Tester,
    ];

    /// Get the agent's name as a string.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::SeidoDebugger => "seido-debugger",
            Self::BackendDeveloper => "backend-developer",
            Self::FrontendDeveloper => "frontend-developer",
            Self::Tester => "tester",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentKind {
    type Err = HealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| HealError::UnknownAgent(s.to_string()))
    }
}

/// How sure the debugger is about its diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// What a planned task asks the agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Analyze,
    Fix,
    Validate,
}

/// Task priority within an action plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

/// The failure as reported by the test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    /// Classified error bucket
    pub kind: ErrorKind,
    /// Raw error message
    pub message: String,
    /// Stack trace, when the test framework provided one
    pub stack: Option<String>,
    /// Test step that was running
    pub step: String,
    /// When the failure happened
    pub timestamp: DateTime<Utc>,
}

/// Browser state captured right after the failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedState {
    /// URL the page was on
    pub url: Option<String>,
    /// URL the test expected to reach
    pub expected_url: Option<String>,
    /// Full-page screenshot, if capture succeeded
    pub screenshot_path: Option<PathBuf>,
    /// HTML dump, if capture succeeded
    pub dom_snapshot_path: Option<PathBuf>,
    /// Most recent console lines
    pub console_logs: Vec<String>,
    /// Most recent network lines
    pub network_logs: Vec<String>,
}

/// A candidate source file and the lines that look related to the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnippet {
    /// Repository-relative path
    pub path: String,
    /// File contents
    pub content: String,
    /// 1-indexed suspect line numbers
    pub suspect_lines: Vec<usize>,
}

/// Everything known about one test failure. Immutable once collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub test_id: String,
    pub test_name: String,
    /// User role the test logged in as (admin, gestionnaire, ...)
    pub user_role: String,
    pub error: ErrorDescriptor,
    pub state: CapturedState,
    pub source_files: Vec<SourceSnippet>,
    pub collected_at: DateTime<Utc>,
}

impl ErrorContext {
    /// Build a context without any captured browser state.
    #[must_use]
    pub fn bare(test_id: &str, test_name: &str, kind: ErrorKind, message: &str, step: &str) -> Self {
        let now = Utc::now();
        Self {
            test_id: test_id.to_string(),
            test_name: test_name.to_string(),
            user_role: "unknown".to_string(),
            error: ErrorDescriptor {
                kind,
                message: message.to_string(),
                stack: None,
                step: step.to_string(),
                timestamp: now,
            },
            state: CapturedState::default(),
            source_files: Vec::new(),
            collected_at: now,
        }
    }

    /// Redirect failure, or a timeout while waiting for a URL change.
    #[must_use]
    pub fn is_redirect_failure(&self) -> bool {
        match self.error.kind {
            ErrorKind::Redirect => true,
            ErrorKind::Timeout => self.error.message.to_lowercase().contains("waitforurl"),
            _ => false,
        }
    }

    /// Paths of snippets that carry at least one suspect line, falling back
    /// to every snippet path.
    #[must_use]
    pub fn suspect_files(&self) -> Vec<String> {
        let flagged: Vec<String> = self
            .source_files
            .iter()
            .filter(|s| !s.suspect_lines.is_empty())
            .map(|s| s.path.clone())
            .collect();
        if flagged.is_empty() {
            self.source_files.iter().map(|s| s.path.clone()).collect()
        } else {
            flagged
        }
    }
}

/// Result of the debugger's classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerAnalysis {
    pub root_cause: String,
    pub recommended_agent: AgentKind,
    pub confidence: Confidence,
    pub affected_files: Vec<String>,
    pub recommendations: Vec<String>,
}

/// One step of an action plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub agent: AgentKind,
    pub action: TaskAction,
    pub priority: Priority,
    pub description: String,
    pub context: ErrorContext,
}

/// A proposed source change. Never written to disk by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// File the change targets
    pub file: String,
    /// Unified-diff style description of the change
    pub diff: String,
    /// Confidence in the proposal, 0.0..=1.0
    pub confidence: f32,
}

/// Outcome of running one agent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExecutionResult {
    pub agent: AgentKind,
    pub action: TaskAction,
    pub success: bool,
    pub patch: Option<Patch>,
    pub logs: Vec<String>,
    pub duration_ms: u64,
    pub recommendations: Vec<String>,
    pub error: Option<String>,
}

impl AgentExecutionResult {
    /// Start an empty successful result for an agent.
    #[must_use]
    pub fn new(agent: AgentKind, action: TaskAction) -> Self {
        Self {
            agent,
            action,
            success: true,
            patch: None,
            logs: Vec::new(),
            duration_ms: 0,
            recommendations: Vec::new(),
            error: None,
        }
    }

    /// Mark the result as failed with a reason.
    #[must_use]
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(reason.into());
        self
    }

    /// Append a log line.
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

/// Pass/fail of a re-run test, supplied by whoever actually runs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub passed: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_names_round_trip() {
        for agent in AgentKind::ALL {
            assert_eq!(agent.name().parse::<AgentKind>().unwrap(), agent);
        }
        assert!(matches!(
            "ui-designer".parse::<AgentKind>(),
            Err(HealError::UnknownAgent(name)) if name == "ui-designer"
        ));
    }

    #[test]
    fn test_agent_serializes_kebab_case() {
        let json = serde_json::to_string(&AgentKind::SeidoDebugger).unwrap();
        assert_eq!(json, "\"seido-debugger\"");
    }

    #[test]
    fn test_error_kind_parse() {
        assert_eq!("Redirect".parse::<ErrorKind>().unwrap(), ErrorKind::Redirect);
        assert!("bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_suspect_files_fallback() {
        let mut ctx = ErrorContext::bare("t1", "login", ErrorKind::Redirect, "boom", "submit");
        ctx.source_files = vec![
            SourceSnippet {
                path: "app/actions/auth.ts".into(),
                content: String::new(),
                suspect_lines: vec![],
            },
            SourceSnippet {
                path: "middleware.ts".into(),
                content: String::new(),
                suspect_lines: vec![],
            },
        ];
        assert_eq!(ctx.suspect_files().len(), 2);

        ctx.source_files[1].suspect_lines.push(4);
        assert_eq!(ctx.suspect_files(), vec!["middleware.ts".to_string()]);
    }
}
