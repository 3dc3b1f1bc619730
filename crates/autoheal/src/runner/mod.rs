//! Master test runner.
//!
//! Runs every selected Playwright suite in turn, pushes failing suites
//! through a healing session, and aggregates the outcome into a single
//! report with per-agent statistics.

pub mod executor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

pub use executor::{
    extract_error_message, failing_step, infer_error_kind, PlaywrightExecutor, SuiteExecutor,
    SuiteOutput,
};

use crate::collector::{ErrorContextCollector, FailureReport};
use crate::config::{HealerConfig, SuiteConfig};
use crate::coordinator::AgentStats;
use crate::error::Result;
use crate::orchestrator::{HealingOrchestrator, TestVerifier};
use crate::report::write_with_latest;
use crate::types::{ErrorContext, ErrorKind, Patch, TestResult};

const REPORT_PREFIX: &str = "master-runner-report";
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which configured suites to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteSelection {
    /// Only suites marked critical
    pub critical_only: bool,
    /// Only suites carrying this tag
    pub tag: Option<String>,
}

impl SuiteSelection {
    #[must_use]
    pub fn matches(&self, suite: &SuiteConfig) -> bool {
        if self.critical_only && !suite.critical {
            return false;
        }
        match &self.tag {
            Some(tag) => suite.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)),
            None => true,
        }
    }

    #[must_use]
    pub fn select<'a>(&self, suites: &'a [SuiteConfig]) -> Vec<&'a SuiteConfig> {
        suites.iter().filter(|s| self.matches(s)).collect()
    }
}

/// Final status of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    /// Passed on the first run
    Passed,
    /// Passed after at least one healing attempt
    Fixed,
    Failed,
    Skipped,
}

/// Outcome of one suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    pub name: String,
    pub spec_path: String,
    pub status: SuiteStatus,
    /// Healing attempts made
    pub attempts: u32,
    pub duration_ms: u64,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub patches: Vec<Patch>,
}

impl SuiteReport {
    fn skipped(suite: &SuiteConfig, reason: impl Into<String>) -> Self {
        Self {
            name: suite.name.clone(),
            spec_path: suite.spec_path.clone(),
            status: SuiteStatus::Skipped,
            attempts: 0,
            duration_ms: 0,
            error_kind: None,
            error: None,
            skip_reason: Some(reason.into()),
            patches: Vec::new(),
        }
    }
}

/// Suite counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: u32,
    pub passed: u32,
    pub fixed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl RunSummary {
    #[must_use]
    pub fn from_suites(suites: &[SuiteReport]) -> Self {
        suites.iter().fold(Self::default(), |mut s, suite| {
            s.total += 1;
            match suite.status {
                SuiteStatus::Passed => s.passed += 1,
                SuiteStatus::Fixed => s.fixed += 1,
                SuiteStatus::Failed => s.failed += 1,
                SuiteStatus::Skipped => s.skipped += 1,
            }
            s
        })
    }
}

/// Process exit code for a run: 1 iff any suite failed.
#[must_use]
pub fn exit_code(summary: &RunSummary) -> i32 {
    i32::from(summary.failed > 0)
}

/// Aggregate report for a master run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterRunnerReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub base_url: String,
    pub suites: Vec<SuiteReport>,
    pub summary: RunSummary,
    pub agent_stats: Vec<AgentStats>,
}

/// Check the application under test answers HTTP.
///
/// # Errors
///
/// Returns an error if the request fails or the server answers 5xx.
pub async fn preflight(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(PREFLIGHT_TIMEOUT)
        .build()?;
    let response = client.get(base_url).send().await?;
    if response.status().is_server_error() {
        response.error_for_status()?;
    }
    Ok(())
}

/// Re-runs a suite as the verifier for a healing session.
pub struct SuiteVerifier<'a> {
    executor: &'a dyn SuiteExecutor,
    suite: &'a SuiteConfig,
}

impl<'a> SuiteVerifier<'a> {
    #[must_use]
    pub fn new(executor: &'a dyn SuiteExecutor, suite: &'a SuiteConfig) -> Self {
        Self { executor, suite }
    }
}

#[async_trait]
impl<'a> TestVerifier for SuiteVerifier<'a> {
    async fn verify(&self, attempt: u32, _context: &ErrorContext) -> TestResult {
        info!("Re-running {} (attempt {attempt})", self.suite.name);
        match self.executor.run_suite(self.suite).await {
            Ok(output) => TestResult {
                passed: output.success,
                duration_ms: output.duration_ms,
                error: (!output.success).then(|| extract_error_message(&output.combined())),
            },
            Err(e) => TestResult {
                passed: false,
                duration_ms: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Runs configured suites with healing. One runner per run.
pub struct MasterRunner {
    config: HealerConfig,
    executor: Box<dyn SuiteExecutor>,
    collector: ErrorContextCollector,
    orchestrator: HealingOrchestrator,
}

impl MasterRunner {
    /// Runner driving suites through [`PlaywrightExecutor`].
    #[must_use]
    pub fn new(config: HealerConfig) -> Self {
        let executor = PlaywrightExecutor::new(config.playwright_command.clone(), config.base_url.clone());
        Self::with_executor(config, Box::new(executor))
    }

    #[must_use]
    pub fn with_executor(config: HealerConfig, executor: Box<dyn SuiteExecutor>) -> Self {
        Self {
            collector: ErrorContextCollector::new(&config),
            orchestrator: HealingOrchestrator::new(config.clone()),
            config,
            executor,
        }
    }

    /// Run the selected suites and write the master report.
    ///
    /// # Errors
    ///
    /// Returns an error if a report cannot be written.
    pub async fn run(
        &mut self,
        selection: &SuiteSelection,
        stop_on_failure: bool,
    ) -> Result<(MasterRunnerReport, PathBuf)> {
        let started_at = Utc::now();
        let suites: Vec<SuiteConfig> = selection
            .select(&self.config.suites)
            .into_iter()
            .cloned()
            .collect();
        if suites.is_empty() {
            warn!("No suites match the selection");
        }
        info!("Running {} suite(s) against {}", suites.len(), self.config.base_url);

        let mut skip_reason = None;
        if self.config.preflight && !suites.is_empty() {
            if let Err(e) = preflight(&self.config.base_url).await {
                error!("Application at {} is not reachable: {e}", self.config.base_url);
                skip_reason = Some(format!("application unreachable: {e}"));
            }
        }

        let mut reports = Vec::with_capacity(suites.len());
        for suite in &suites {
            if let Some(reason) = &skip_reason {
                reports.push(SuiteReport::skipped(suite, reason.clone()));
                continue;
            }
            let report = self.run_suite(suite).await?;
            if report.status == SuiteStatus::Failed && stop_on_failure {
                warn!("Stopping after {} failed", suite.name);
                skip_reason = Some(format!("stopped after {} failed", suite.name));
            }
            reports.push(report);
        }

        let report = MasterRunnerReport {
            started_at,
            finished_at: Utc::now(),
            base_url: self.config.base_url.clone(),
            summary: RunSummary::from_suites(&reports),
            suites: reports,
            agent_stats: self.orchestrator.coordinator().agent_stats(),
        };
        let path = write_with_latest(
            &self.config.reports_dir,
            REPORT_PREFIX,
            REPORT_PREFIX,
            report.finished_at,
            &report,
        )?;
        info!("Master report saved to {}", path.display());
        Ok((report, path))
    }

    async fn run_suite(&mut self, suite: &SuiteConfig) -> Result<SuiteReport> {
        let output = match self.executor.run_suite(suite).await {
            Ok(output) => output,
            Err(e) => {
                error!("Suite {} could not start: {e}", suite.name);
                return Ok(SuiteReport {
                    name: suite.name.clone(),
                    spec_path: suite.spec_path.clone(),
                    status: SuiteStatus::Failed,
                    attempts: 0,
                    duration_ms: 0,
                    error_kind: None,
                    error: Some(e.to_string()),
                    skip_reason: None,
                    patches: Vec::new(),
                });
            }
        };

        if output.success {
            info!("Suite {} passed", suite.name);
            return Ok(SuiteReport {
                name: suite.name.clone(),
                spec_path: suite.spec_path.clone(),
                status: SuiteStatus::Passed,
                attempts: 0,
                duration_ms: output.duration_ms,
                error_kind: None,
                error: None,
                skip_reason: None,
                patches: Vec::new(),
            });
        }

        let combined = output.combined();
        let failure = FailureReport {
            test_id: suite.name.clone(),
            test_name: suite.name.clone(),
            message: extract_error_message(&combined),
            step: failing_step(&combined).unwrap_or_default(),
            ..Default::default()
        };
        warn!("Suite {} failed: {}", suite.name, failure.message);

        let context = self.collector.collect(&failure, None).await;
        let verifier = SuiteVerifier::new(self.executor.as_ref(), suite);
        let healing = self.orchestrator.heal(&context, &verifier).await?;

        let duration_ms = output.duration_ms
            + healing
                .cycles
                .iter()
                .map(|c| c.test_result.duration_ms)
                .sum::<u64>();
        let last_error = healing
            .cycles
            .last()
            .and_then(|c| c.test_result.error.clone())
            .unwrap_or_else(|| failure.message.clone());

        Ok(SuiteReport {
            name: suite.name.clone(),
            spec_path: suite.spec_path.clone(),
            status: if healing.resolved {
                SuiteStatus::Fixed
            } else {
                SuiteStatus::Failed
            },
            attempts: healing.total_attempts,
            duration_ms,
            error_kind: Some(context.error.kind),
            error: (!healing.resolved).then_some(last_error),
            skip_reason: None,
            patches: healing.proposed_patches().into_iter().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite(name: &str, critical: bool, tags: &[&str]) -> SuiteConfig {
        SuiteConfig {
            name: name.into(),
            spec_path: format!("tests/{name}.spec.ts"),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            critical,
            timeout_secs: 60,
        }
    }

    #[test]
    fn test_selection() {
        let suites = vec![
            suite("auth", true, &["auth", "smoke"]),
            suite("interventions", false, &["workflow"]),
            suite("dashboards", true, &["smoke"]),
        ];

        let all = SuiteSelection::default().select(&suites);
        assert_eq!(all.len(), 3);

        let critical = SuiteSelection {
            critical_only: true,
            tag: None,
        };
        assert_eq!(critical.select(&suites).len(), 2);

        let tagged = SuiteSelection {
            critical_only: true,
            tag: Some("AUTH".into()),
        };
        let picked = tagged.select(&suites);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "auth");
    }

    fn report(status: SuiteStatus) -> SuiteReport {
        let mut r = SuiteReport::skipped(&suite("s", false, &[]), "x");
        r.status = status;
        r
    }

    #[test]
    fn test_exit_code_iff_failed() {
        use SuiteStatus::{Failed, Fixed, Passed, Skipped};
        let combos: &[&[SuiteStatus]] = &[
            &[],
            &[Passed],
            &[Passed, Fixed, Skipped],
            &[Failed],
            &[Passed, Failed],
            &[Skipped, Fixed, Failed, Failed],
        ];
        for combo in combos {
            let suites: Vec<SuiteReport> = combo.iter().map(|s| report(*s)).collect();
            let summary = RunSummary::from_suites(&suites);
            assert_eq!(summary.total as usize, combo.len());
            assert_eq!(exit_code(&summary), i32::from(combo.contains(&Failed)));
        }
    }

    #[test]
    fn test_summary_counts() {
        let suites = vec![
            report(SuiteStatus::Passed),
            report(SuiteStatus::Fixed),
            report(SuiteStatus::Fixed),
            report(SuiteStatus::Skipped),
        ];
        let summary = RunSummary::from_suites(&suites);
        assert_eq!(
            summary,
            RunSummary {
                total: 4,
                passed: 1,
                fixed: 2,
                failed: 0,
                skipped: 1
            }
        );
    }

    #[tokio::test]
    async fn test_preflight_unreachable() {
        assert!(preflight("http://127.0.0.1:1").await.is_err());
    }
}
