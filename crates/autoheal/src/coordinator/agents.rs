//! Specialized agents.
//!
//! Each agent owns one slice of the failure space. Agents never touch the
//! filesystem: a fix is returned as a [`Patch`] proposal for a human or a
//! later tool to apply.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::report::sanitize_file_component;
use crate::types::{
    AgentExecutionResult, AgentKind, AgentTask, ErrorContext, ErrorKind, Patch, TaskAction,
};

/// Recommendation attached to every result that gives up.
pub const MANUAL_INTERVENTION: &str = "Manual intervention required: no automatic fix is known for this failure";

/// An agent the coordinator can dispatch tasks to.
#[async_trait]
pub trait SpecializedAgent: Send + Sync {
    /// Which agent this is.
    fn kind(&self) -> AgentKind;

    /// Work on a task. Business failures are reported in the result, not as errors.
    async fn execute(&self, task: &AgentTask) -> AgentExecutionResult;
}

/// Build the default implementation of an agent.
#[must_use]
pub fn default_agent(kind: AgentKind, delay: Duration) -> Box<dyn SpecializedAgent> {
    match kind {
        AgentKind::SeidoDebugger => Box::new(DebuggerAgent { delay }),
        AgentKind::BackendDeveloper => Box::new(BackendAgent { delay }),
        AgentKind::FrontendDeveloper => Box::new(FrontendAgent { delay }),
        AgentKind::Tester => Box::new(TesterAgent { delay }),
    }
}

/// Spec file a test most likely lives in.
fn test_file(ctx: &ErrorContext) -> String {
    format!("test/e2e/{}.spec.ts", sanitize_file_component(&ctx.test_id))
}

async fn work(
    kind: AgentKind,
    task: &AgentTask,
    delay: Duration,
    body: impl FnOnce(&mut AgentExecutionResult),
) -> AgentExecutionResult {
    let start = Instant::now();
    let mut result = AgentExecutionResult::new(kind, task.action);
    result.log(format!(
        "[{kind}] {:?} task for {} ({} error)",
        task.action, task.context.test_name, task.context.error.kind
    ));

    tokio::time::sleep(delay).await;
    body(&mut result);

    result.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    if result.success {
        info!("[{kind}] done in {}ms", result.duration_ms);
    } else {
        debug!(
            "[{kind}] gave up: {}",
            result.error.as_deref().unwrap_or("no reason")
        );
    }
    result
}

fn give_up(result: &mut AgentExecutionResult, reason: String) {
    result.success = false;
    result.error = Some(reason);
    result.recommendations.push(MANUAL_INTERVENTION.to_string());
}

/// Root-cause analysis. Always succeeds.
pub struct DebuggerAgent {
    delay: Duration,
}

#[async_trait]
impl SpecializedAgent for DebuggerAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::SeidoDebugger
    }

    async fn execute(&self, task: &AgentTask) -> AgentExecutionResult {
        work(self.kind(), task, self.delay, |result| {
            let ctx = &task.context;
            let console_errors = ctx
                .state
                .console_logs
                .iter()
                .filter(|l| l.contains("[error]") || l.contains("[pageerror]"))
                .count();
            let failed_requests = ctx
                .state
                .network_logs
                .iter()
                .filter(|l| l.starts_with("FAILED") || l.starts_with('5'))
                .count();

            result.log(format!("Step: {}", ctx.error.step));
            result.log(format!(
                "Page: {} (expected {})",
                ctx.state.url.as_deref().unwrap_or("unknown"),
                ctx.state.expected_url.as_deref().unwrap_or("n/a")
            ));
            result.log(format!(
                "{console_errors} console error(s), {failed_requests} failed request(s), {} source file(s)",
                ctx.source_files.len()
            ));
            result.recommendations.push(task.description.clone());
            if console_errors > 0 {
                result
                    .recommendations
                    .push("Check the browser console errors captured with the context".into());
            }
        })
        .await
    }
}

/// Server actions, middleware and session handling.
pub struct BackendAgent {
    delay: Duration,
}

#[async_trait]
impl SpecializedAgent for BackendAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::BackendDeveloper
    }

    async fn execute(&self, task: &AgentTask) -> AgentExecutionResult {
        work(self.kind(), task, self.delay, |result| {
            let ctx = &task.context;
            if ctx.is_redirect_failure() {
                let file = ctx
                    .suspect_files()
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| "app/actions/auth-actions.ts".to_string());
                result.log(format!("Redirect missing after server action, proposing change to {file}"));
                result.patch = Some(Patch {
                    diff: format!(
                        "--- a/{file}\n+++ b/{file}\n@@ server action return @@\n\
                         -  return {{ success: true, redirectTo: target }}\n\
                         +  redirect(target)\n"
                    ),
                    file,
                    confidence: 0.6,
                });
                result
                    .recommendations
                    .push("Call redirect() outside try/catch so the NEXT_REDIRECT signal propagates".into());
                return;
            }

            match ctx.error.kind {
                ErrorKind::Authentication => {
                    result.log("Reviewed session and cookie handling");
                    result
                        .recommendations
                        .push("Verify the session cookie is set before the dashboard loads".into());
                }
                ErrorKind::Network => {
                    result.log("Reviewed API route availability");
                    result
                        .recommendations
                        .push("Check the API route responds and the backend is reachable".into());
                }
                kind => give_up(result, format!("backend-developer has no fix for {kind} errors")),
            }
        })
        .await
    }
}

/// Client components and browser-side API calls.
pub struct FrontendAgent {
    delay: Duration,
}

#[async_trait]
impl SpecializedAgent for FrontendAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::FrontendDeveloper
    }

    async fn execute(&self, task: &AgentTask) -> AgentExecutionResult {
        work(self.kind(), task, self.delay, |result| match task.context.error.kind {
            ErrorKind::Network => {
                result.log("Reviewed client fetch calls and error states");
                result
                    .recommendations
                    .push("Handle failed requests in the component and surface an error state".into());
            }
            ErrorKind::Selector => {
                result.log("Reviewed rendered markup for the missing element");
                result
                    .recommendations
                    .push("Add a stable data-testid to the element the test targets".into());
            }
            kind => give_up(result, format!("frontend-developer has no fix for {kind} errors")),
        })
        .await
    }
}

/// Test code: locators, waits and validation runs.
pub struct TesterAgent {
    delay: Duration,
}

#[async_trait]
impl SpecializedAgent for TesterAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Tester
    }

    async fn execute(&self, task: &AgentTask) -> AgentExecutionResult {
        work(self.kind(), task, self.delay, |result| {
            let ctx = &task.context;
            if task.action == TaskAction::Validate {
                result.log("Validation run scheduled: re-run the test after fixes");
                result
                    .recommendations
                    .push("Re-run the failing test and compare with the captured context".into());
                return;
            }

            let file = test_file(ctx);
            match ctx.error.kind {
                ErrorKind::Selector => {
                    result.log(format!("Selector out of date, proposing role-based locator in {file}"));
                    result.patch = Some(Patch {
                        diff: format!(
                            "--- a/{file}\n+++ b/{file}\n@@ {} @@\n\
                             -  await page.click('button[type=\"submit\"]')\n\
                             +  await page.getByRole('button', {{ name: /connexion|login/i }}).click()\n",
                            ctx.error.step
                        ),
                        file,
                        confidence: 0.5,
                    });
                }
                ErrorKind::Timeout => {
                    result.log(format!("Wait too short, proposing explicit wait in {file}"));
                    result.patch = Some(Patch {
                        diff: format!(
                            "--- a/{file}\n+++ b/{file}\n@@ {} @@\n\
                             -  await page.waitForURL(target)\n\
                             +  await page.waitForURL(target, {{ timeout: 30000, waitUntil: 'networkidle' }})\n",
                            ctx.error.step
                        ),
                        file,
                        confidence: 0.4,
                    });
                }
                kind => give_up(result, format!("tester has no fix for {kind} errors")),
            }
        })
        .await
    }
}
