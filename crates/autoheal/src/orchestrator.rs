//! Healing orchestrator.
//!
//! Drives one failing test through repeated analyze → plan → execute →
//! verify cycles until the test passes, the retry budget runs out, or the
//! bug detector decides the same failure keeps coming back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::HealerConfig;
use crate::coordinator::{AgentCoordinator, MANUAL_INTERVENTION};
use crate::detector::{BugDetector, LoopDetection};
use crate::error::Result;
use crate::report::{read_json, sanitize_file_component, write_with_latest};
use crate::types::{
    AgentExecutionResult, AgentKind, DebuggerAnalysis, ErrorContext, Patch, Priority, TaskAction,
    TestResult,
};

/// Where a healing session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum HealingState {
    NotStarted,
    Cycling { attempt: u32 },
    Resolved,
    Exhausted,
    LoopDetected,
}

impl HealingState {
    /// Whether the session has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Exhausted | Self::LoopDetected)
    }
}

/// Re-runs the real test after a healing cycle.
///
/// The orchestrator never drives the browser itself; whoever owns the test
/// process reports the outcome through this trait.
#[async_trait]
pub trait TestVerifier: Send + Sync {
    async fn verify(&self, attempt: u32, context: &ErrorContext) -> TestResult;
}

/// One planned task, without the context it carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub agent: AgentKind,
    pub action: TaskAction,
    pub priority: Priority,
}

/// Everything that happened in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingCycleReport {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub analysis: DebuggerAnalysis,
    pub plan: Vec<PlannedStep>,
    pub agent_results: Vec<AgentExecutionResult>,
    pub test_result: TestResult,
}

/// Report for a full healing session. Persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoHealingReport {
    pub session_id: Uuid,
    pub test_id: String,
    pub test_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resolved: bool,
    pub total_attempts: u32,
    pub final_state: HealingState,
    pub cycles: Vec<HealingCycleReport>,
    pub infinite_loop: Option<LoopDetection>,
    /// Markdown report written when a loop was detected
    pub loop_report_path: Option<PathBuf>,
    pub recommendations: Vec<String>,
}

impl AutoHealingReport {
    /// Every patch proposed across all cycles, in order.
    #[must_use]
    pub fn proposed_patches(&self) -> Vec<&Patch> {
        self.cycles
            .iter()
            .flat_map(|c| c.agent_results.iter())
            .filter_map(|r| r.patch.as_ref())
            .collect()
    }
}

/// Write a session report as `auto-healing-<test>-<ts>.json` plus
/// `auto-healing-latest.json`. Returns the timestamped path.
///
/// # Errors
///
/// Returns an error if either file cannot be written.
pub fn write_report(dir: &Path, report: &AutoHealingReport) -> Result<PathBuf> {
    let prefix = format!("auto-healing-{}", sanitize_file_component(&report.test_id));
    write_with_latest(dir, &prefix, "auto-healing", report.finished_at, report)
}

/// Read a session report back.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_report(path: &Path) -> Result<AutoHealingReport> {
    read_json(path)
}

/// Runs healing sessions. One orchestrator per run; the bug detector and the
/// coordinator's history span every session it runs.
pub struct HealingOrchestrator {
    config: HealerConfig,
    coordinator: AgentCoordinator,
    detector: BugDetector,
    state: HealingState,
}

impl HealingOrchestrator {
    #[must_use]
    pub fn new(config: HealerConfig) -> Self {
        let coordinator = AgentCoordinator::new(&config);
        Self::with_coordinator(config, coordinator)
    }

    #[must_use]
    pub fn with_coordinator(config: HealerConfig, coordinator: AgentCoordinator) -> Self {
        let detector = BugDetector::new(config.bug_loop_threshold);
        Self {
            config,
            coordinator,
            detector,
            state: HealingState::NotStarted,
        }
    }

    /// State of the most recent session.
    #[must_use]
    pub fn state(&self) -> HealingState {
        self.state
    }

    #[must_use]
    pub fn coordinator(&self) -> &AgentCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn detector(&self) -> &BugDetector {
        &self.detector
    }

    /// Heal one failing test and persist the session report.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session report cannot be written.
    pub async fn heal(
        &mut self,
        context: &ErrorContext,
        verifier: &dyn TestVerifier,
    ) -> Result<AutoHealingReport> {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Healing session {session_id} for {} ({}), up to {} attempt(s)",
            context.test_name, context.test_id, self.config.max_retries
        );

        let mut cycles = Vec::new();
        let mut last_error = context.error.message.clone();
        let mut infinite_loop = None;
        let mut loop_report_path = None;
        self.state = HealingState::NotStarted;

        for attempt in 1..=self.config.max_retries {
            self.state = HealingState::Cycling { attempt };

            let metadata = BTreeMap::from([
                ("testId".to_string(), context.test_id.clone()),
                ("step".to_string(), context.error.step.clone()),
                ("attempt".to_string(), attempt.to_string()),
            ]);
            let bug = self.detector.record_bug(&last_error, metadata);

            let detection = self.detector.detect_loop_for(&bug);
            if detection.detected {
                loop_report_path = match self
                    .detector
                    .write_loop_report(&self.config.reports_dir, &detection)
                {
                    Ok(path) => path,
                    Err(e) => {
                        warn!("Failed to write infinite-loop report: {e}");
                        None
                    }
                };
                infinite_loop = Some(detection);
                self.state = HealingState::LoopDetected;
                break;
            }

            let cycle = self.run_cycle(attempt, context, verifier).await;
            let passed = cycle.test_result.passed;
            if let Some(err) = &cycle.test_result.error {
                last_error.clone_from(err);
            }
            cycles.push(cycle);

            if passed {
                info!("{} passed on attempt {attempt}", context.test_name);
                self.state = HealingState::Resolved;
                break;
            }
            warn!("{} still failing after attempt {attempt}", context.test_name);
        }

        if !self.state.is_terminal() {
            error!(
                "{} not healed after {} attempt(s)",
                context.test_name, self.config.max_retries
            );
            self.state = HealingState::Exhausted;
        }

        let report = AutoHealingReport {
            session_id,
            test_id: context.test_id.clone(),
            test_name: context.test_name.clone(),
            started_at,
            finished_at: Utc::now(),
            resolved: self.state == HealingState::Resolved,
            total_attempts: u32::try_from(cycles.len()).unwrap_or(u32::MAX),
            final_state: self.state,
            recommendations: Self::recommendations(self.state, &cycles, infinite_loop.as_ref()),
            cycles,
            infinite_loop,
            loop_report_path,
        };

        let path = write_report(&self.config.reports_dir, &report)?;
        info!("Healing report saved to {}", path.display());
        Ok(report)
    }

    async fn run_cycle(
        &mut self,
        attempt: u32,
        context: &ErrorContext,
        verifier: &dyn TestVerifier,
    ) -> HealingCycleReport {
        let started_at = Utc::now();
        info!("Cycle {attempt}: analyzing {} error", context.error.kind);

        let analysis = self.coordinator.analyze_error(context);
        let plan = self.coordinator.create_action_plan(&analysis, context);
        let agent_results = self.coordinator.execute_plan(&plan).await;

        let patches = agent_results.iter().filter(|r| r.patch.is_some()).count();
        if patches > 0 {
            info!("Cycle {attempt}: {patches} patch(es) proposed, waiting for hot reload");
        }
        tokio::time::sleep(self.config.hot_reload_delay()).await;

        let test_result = verifier.verify(attempt, context).await;

        HealingCycleReport {
            attempt,
            started_at,
            analysis,
            plan: plan
                .iter()
                .map(|t| PlannedStep {
                    agent: t.agent,
                    action: t.action,
                    priority: t.priority,
                })
                .collect(),
            agent_results,
            test_result,
        }
    }

    fn recommendations(
        state: HealingState,
        cycles: &[HealingCycleReport],
        detection: Option<&LoopDetection>,
    ) -> Vec<String> {
        match state {
            HealingState::Resolved => {
                vec!["Review the proposed patches before applying them to the codebase".to_string()]
            }
            HealingState::LoopDetected => {
                let mut recs = vec![MANUAL_INTERVENTION.to_string()];
                if let Some(d) = detection {
                    recs.push(d.recommendation.clone());
                }
                recs
            }
            _ => {
                let mut recs = vec![MANUAL_INTERVENTION.to_string()];
                if let Some(last) = cycles.last() {
                    recs.extend(last.analysis.recommendations.iter().cloned());
                }
                recs
            }
        }
    }
}
