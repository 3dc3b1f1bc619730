//! Auto-healing harness for Playwright E2E suites.
//!
//! A failing test is captured into an [`types::ErrorContext`], classified by
//! the [`coordinator`], handed to specialized agents that propose
//! [`types::Patch`]es, and re-run until it passes, the retry budget is spent,
//! or the [`detector`] sees the same bug recurring.

pub mod collector;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod templates;
pub mod types;

pub use config::{HealerConfig, SuiteConfig};
pub use error::{HealError, Result};
pub use orchestrator::{AutoHealingReport, HealingOrchestrator, HealingState, TestVerifier};
pub use runner::{exit_code, MasterRunner, MasterRunnerReport, SuiteSelection, SuiteStatus};
