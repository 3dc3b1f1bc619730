//! Failure analysis and agent dispatch.
//!
//! The coordinator turns an [`ErrorContext`] into a [`DebuggerAnalysis`],
//! builds an action plan of [`AgentTask`]s and runs the plan against the
//! registered agents, keeping an execution history for the current run.

pub mod agents;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub use agents::{default_agent, SpecializedAgent, MANUAL_INTERVENTION};

use crate::config::HealerConfig;
use crate::error::HealError;
use crate::types::{
    AgentExecutionResult, AgentKind, AgentTask, Confidence, DebuggerAnalysis, ErrorContext,
    ErrorKind, Priority, TaskAction,
};

/// Per-agent execution statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub agent: AgentKind,
    pub executions: u32,
    pub successes: u32,
    /// `successes / executions`, 0.0 when never executed
    pub success_rate: f64,
    pub patches_proposed: u32,
}

/// Classify a failure and pick the agent that should fix it.
#[must_use]
pub fn analyze_error(ctx: &ErrorContext) -> DebuggerAnalysis {
    let expected = ctx.state.expected_url.as_deref().unwrap_or("the expected page");

    let (root_cause, agent, confidence, recommendations): (String, AgentKind, Confidence, Vec<&str>) =
        match ctx.error.kind {
            ErrorKind::Redirect => (
                format!(
                    "Navigation to {expected} never happened: the server action or middleware did not issue the redirect"
                ),
                AgentKind::BackendDeveloper,
                Confidence::High,
                vec![
                    "Call redirect() from the server action after a successful login",
                    "Keep redirect() outside try/catch blocks",
                    "Check middleware does not bounce authenticated users back to /auth/login",
                ],
            ),
            ErrorKind::Timeout if ctx.is_redirect_failure() => (
                format!(
                    "Timed out waiting for the URL to change to {expected}: the redirect after the action is missing or too slow"
                ),
                AgentKind::BackendDeveloper,
                Confidence::Medium,
                vec![
                    "Verify the action that should navigate actually redirects",
                    "Check the destination page does not hang while loading",
                ],
            ),
            ErrorKind::Timeout => (
                format!("Step '{}' exceeded its time budget", ctx.error.step),
                AgentKind::Tester,
                Confidence::Medium,
                vec![
                    "Wait for a concrete element or response instead of a fixed delay",
                    "Raise the step timeout if the page is legitimately slow",
                ],
            ),
            ErrorKind::Selector => (
                "The locator no longer matches the rendered UI".to_string(),
                AgentKind::Tester,
                Confidence::Medium,
                vec![
                    "Prefer getByRole/getByTestId over CSS selectors",
                    "Compare the DOM snapshot with the locator used by the step",
                ],
            ),
            ErrorKind::Network => (
                "A request from the page failed or the server answered with an error".to_string(),
                AgentKind::FrontendDeveloper,
                Confidence::Medium,
                vec![
                    "Check the failed requests in the captured network log",
                    "Confirm the application server and backend are running",
                ],
            ),
            ErrorKind::Authentication => (
                "The session was missing or rejected for this role".to_string(),
                AgentKind::BackendDeveloper,
                Confidence::High,
                vec![
                    "Check the test account exists and is confirmed",
                    "Verify session cookies survive the login redirect",
                ],
            ),
            ErrorKind::Unknown => (
                format!("Unrecognized failure: {}", first_line(&ctx.error.message)),
                AgentKind::SeidoDebugger,
                Confidence::Low,
                vec!["Inspect the screenshot and DOM snapshot by hand"],
            ),
        };

    DebuggerAnalysis {
        root_cause,
        recommended_agent: agent,
        confidence,
        affected_files: ctx.suspect_files(),
        recommendations: recommendations.into_iter().map(String::from).collect(),
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}

/// Build the task list for an analysis.
///
/// Always starts with a debugger analysis; adds the recommended agent's fix
/// and, for low-confidence diagnoses, a trailing tester validation.
#[must_use]
pub fn create_action_plan(analysis: &DebuggerAnalysis, ctx: &ErrorContext) -> Vec<AgentTask> {
    let mut plan = vec![AgentTask {
        agent: AgentKind::SeidoDebugger,
        action: TaskAction::Analyze,
        priority: Priority::High,
        description: analysis.root_cause.clone(),
        context: ctx.clone(),
    }];

    if analysis.recommended_agent != AgentKind::SeidoDebugger {
        plan.push(AgentTask {
            agent: analysis.recommended_agent,
            action: TaskAction::Fix,
            priority: if analysis.confidence == Confidence::High {
                Priority::Critical
            } else {
                Priority::Normal
            },
            description: analysis
                .recommendations
                .first()
                .cloned()
                .unwrap_or_else(|| analysis.root_cause.clone()),
            context: ctx.clone(),
        });
    }

    if analysis.confidence == Confidence::Low {
        plan.push(AgentTask {
            agent: AgentKind::Tester,
            action: TaskAction::Validate,
            priority: Priority::Normal,
            description: "Validate the diagnosis by re-running the test".to_string(),
            context: ctx.clone(),
        });
    }

    plan
}

/// Dispatches tasks to agents. One coordinator per run.
pub struct AgentCoordinator {
    agents: BTreeMap<AgentKind, Box<dyn SpecializedAgent>>,
    history: Vec<AgentExecutionResult>,
}

impl AgentCoordinator {
    /// Coordinator with the four default agents.
    #[must_use]
    pub fn new(config: &HealerConfig) -> Self {
        let agents = AgentKind::ALL
            .into_iter()
            .map(|kind| (kind, default_agent(kind, config.agent_delay(kind))))
            .collect();
        Self {
            agents,
            history: Vec::new(),
        }
    }

    /// Coordinator with no agents registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            agents: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Register or replace an agent.
    #[must_use]
    pub fn with_agent(mut self, agent: Box<dyn SpecializedAgent>) -> Self {
        self.agents.insert(agent.kind(), agent);
        self
    }

    /// See [`analyze_error`].
    #[must_use]
    pub fn analyze_error(&self, ctx: &ErrorContext) -> DebuggerAnalysis {
        let analysis = analyze_error(ctx);
        info!(
            "Analysis for {}: {} -> {} ({:?} confidence)",
            ctx.test_name, analysis.root_cause, analysis.recommended_agent, analysis.confidence
        );
        analysis
    }

    /// See [`create_action_plan`].
    #[must_use]
    pub fn create_action_plan(&self, analysis: &DebuggerAnalysis, ctx: &ErrorContext) -> Vec<AgentTask> {
        create_action_plan(analysis, ctx)
    }

    /// Run one task and record the outcome.
    ///
    /// An unregistered agent yields a failed result rather than an error.
    pub async fn execute_agent(&mut self, task: &AgentTask) -> AgentExecutionResult {
        let result = match self.agents.get(&task.agent) {
            Some(agent) => agent.execute(task).await,
            None => {
                let err = HealError::UnknownAgent(task.agent.name().to_string());
                warn!("{err}");
                AgentExecutionResult::new(task.agent, task.action).failed(err.to_string())
            }
        };
        self.history.push(result.clone());
        result
    }

    /// Run a plan in order.
    pub async fn execute_plan(&mut self, plan: &[AgentTask]) -> Vec<AgentExecutionResult> {
        let mut results = Vec::with_capacity(plan.len());
        for task in plan {
            results.push(self.execute_agent(task).await);
        }
        results
    }

    /// Every result produced by this coordinator, oldest first.
    #[must_use]
    pub fn history(&self) -> &[AgentExecutionResult] {
        &self.history
    }

    /// Success statistics for every agent that ran at least once.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn agent_stats(&self) -> Vec<AgentStats> {
        let mut stats: BTreeMap<AgentKind, AgentStats> = BTreeMap::new();
        for result in &self.history {
            let entry = stats.entry(result.agent).or_insert(AgentStats {
                agent: result.agent,
                executions: 0,
                successes: 0,
                success_rate: 0.0,
                patches_proposed: 0,
            });
            entry.executions += 1;
            if result.success {
                entry.successes += 1;
            }
            if result.patch.is_some() {
                entry.patches_proposed += 1;
            }
        }
        stats
            .into_values()
            .map(|mut s| {
                s.success_rate = f64::from(s.successes) / f64::from(s.executions);
                s
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::classify_error;
    use async_trait::async_trait;

    fn ctx(message: &str, step: &str) -> ErrorContext {
        ErrorContext::bare("t", "Test", classify_error(message, step), message, step)
    }

    #[test]
    fn test_wait_for_url_timeout_gets_redirect_root_cause() {
        let c = ctx("Timeout 30000ms exceeded waiting for waitForURL", "");
        assert_eq!(c.error.kind, ErrorKind::Timeout);
        let analysis = analyze_error(&c);
        assert!(analysis.root_cause.contains("redirect"));
        assert_eq!(analysis.recommended_agent, AgentKind::BackendDeveloper);
    }

    #[test]
    fn test_selector_analysis() {
        let c = ctx("locator.click: Timeout 5000ms exceeded waiting for selector", "click");
        assert_eq!(c.error.kind, ErrorKind::Selector);
        let analysis = analyze_error(&c);
        assert_eq!(analysis.recommended_agent, AgentKind::Tester);
        assert_eq!(analysis.confidence, Confidence::Medium);
    }

    #[test]
    fn test_every_kind_has_recommendations() {
        for kind in ErrorKind::ALL {
            let c = ErrorContext::bare("t", "T", kind, "boom", "step");
            assert!(!analyze_error(&c).recommendations.is_empty(), "{kind}");
        }
    }

    #[test]
    fn test_plan_always_starts_with_debugger() {
        for kind in ErrorKind::ALL {
            let c = ErrorContext::bare("t", "T", kind, "boom", "step");
            let plan = create_action_plan(&analyze_error(&c), &c);
            assert_eq!(plan[0].agent, AgentKind::SeidoDebugger);
            assert_eq!(plan[0].action, TaskAction::Analyze);
        }
    }

    #[test]
    fn test_low_confidence_plan_ends_with_tester() {
        let c = ErrorContext::bare("t", "T", ErrorKind::Unknown, "boom", "step");
        let analysis = analyze_error(&c);
        assert_eq!(analysis.confidence, Confidence::Low);

        let plan = create_action_plan(&analysis, &c);
        let last = plan.last().unwrap();
        assert_eq!(last.agent, AgentKind::Tester);
        assert_eq!(last.action, TaskAction::Validate);
    }

    #[test]
    fn test_high_confidence_fix_is_critical() {
        let c = ErrorContext::bare("t", "T", ErrorKind::Redirect, "no redirect", "submit");
        let plan = create_action_plan(&analyze_error(&c), &c);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].agent, AgentKind::BackendDeveloper);
        assert_eq!(plan[1].priority, Priority::Critical);
        assert!(plan.iter().all(|t| t.action != TaskAction::Validate));
    }

    #[tokio::test]
    async fn test_execute_plan_records_history_and_stats() {
        let config = HealerConfig::default().without_delays();
        let mut coordinator = AgentCoordinator::new(&config);
        let c = ErrorContext::bare("t", "T", ErrorKind::Redirect, "no redirect", "submit");
        let plan = coordinator.create_action_plan(&coordinator.analyze_error(&c), &c);

        let results = coordinator.execute_plan(&plan).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(coordinator.history().len(), 2);

        let stats = coordinator.agent_stats();
        let backend = stats
            .iter()
            .find(|s| s.agent == AgentKind::BackendDeveloper)
            .unwrap();
        assert_eq!(backend.executions, 1);
        assert!((backend.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(backend.patches_proposed, 1);
    }

    #[tokio::test]
    async fn test_unregistered_agent_fails_softly() {
        let mut coordinator = AgentCoordinator::empty();
        let c = ErrorContext::bare("t", "T", ErrorKind::Unknown, "boom", "step");
        let plan = create_action_plan(&analyze_error(&c), &c);

        let result = coordinator.execute_agent(&plan[0]).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unknown agent"));
        assert_eq!(coordinator.agent_stats()[0].success_rate, 0.0);
    }

    struct AlwaysFails;

    #[async_trait]
    impl SpecializedAgent for AlwaysFails {
        fn kind(&self) -> AgentKind {
            AgentKind::Tester
        }

        async fn execute(&self, task: &AgentTask) -> AgentExecutionResult {
            AgentExecutionResult::new(AgentKind::Tester, task.action).failed("nope")
        }
    }

    #[tokio::test]
    async fn test_with_agent_replaces_default() {
        let config = HealerConfig::default().without_delays();
        let mut coordinator = AgentCoordinator::new(&config).with_agent(Box::new(AlwaysFails));
        let c = ErrorContext::bare("t", "T", ErrorKind::Selector, "locator", "click");
        let plan = create_action_plan(&analyze_error(&c), &c);

        let results = coordinator.execute_plan(&plan).await;
        assert!(results[0].success);
        assert!(!results[1].success);

        let stats = coordinator.agent_stats();
        let tester = stats.iter().find(|s| s.agent == AgentKind::Tester).unwrap();
        assert!((tester.success_rate - 0.0).abs() < f64::EPSILON);
    }
}
