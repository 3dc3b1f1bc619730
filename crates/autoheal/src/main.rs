//! autoheal CLI
//!
//! Runs Playwright suites with automatic failure analysis and healing cycles,
//! classifies one-off failures, and heals a single failing test on demand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use autoheal::collector::{
    classify_error, ErrorContextCollector, FailureReport, PageProbe, PlaywrightProbe,
};
use autoheal::coordinator::analyze_error;
use autoheal::runner::{PlaywrightExecutor, SuiteStatus, SuiteVerifier};
use autoheal::types::ErrorContext;
use autoheal::{
    exit_code, AutoHealingReport, HealerConfig, HealingOrchestrator, MasterRunner,
    MasterRunnerReport, SuiteConfig, SuiteSelection,
};

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Auto-healing E2E harness - classifies Playwright failures and drives agent repair cycles
#[derive(Parser)]
#[command(name = "autoheal")]
#[command(about = "Auto-healing E2E harness - classifies Playwright failures and drives agent repair cycles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the harness config
    #[arg(long, default_value = "autoheal.json", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print warnings and the final status
    #[arg(long, global = true, conflicts_with = "verbose")]
    minimal: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run configured suites, healing failures as they happen
    Run {
        /// Only run suites marked critical
        #[arg(long)]
        critical: bool,

        /// Only run suites carrying this tag
        #[arg(long)]
        tag: Option<String>,

        /// Healing cycles per failing suite
        #[arg(long, env = "AUTOHEAL_MAX_RETRIES")]
        max_retries: Option<u32>,

        /// Skip remaining suites after the first failure
        #[arg(long)]
        stop_on_failure: bool,
    },
    /// Classify an error message and print the debugger analysis
    Classify {
        /// Error message as reported by Playwright
        #[arg(long)]
        message: String,

        /// Step that was running
        #[arg(long, default_value = "")]
        step: String,
    },
    /// Heal one failing test, re-running its spec after each cycle
    Heal {
        #[arg(long)]
        test_id: String,

        #[arg(long)]
        test_name: String,

        /// Error message as reported by Playwright
        #[arg(long)]
        message: String,

        /// Step that was running
        #[arg(long, default_value = "")]
        step: String,

        /// Role the test logged in as
        #[arg(long, default_value = "")]
        role: String,

        /// Page to capture screenshot, DOM and logs from
        #[arg(long)]
        url: Option<String>,

        /// URL the test expected to reach
        #[arg(long)]
        expected_url: Option<String>,

        /// Spec file re-run to verify each cycle
        #[arg(long)]
        rerun: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "autoheal=debug"
    } else if cli.minimal {
        "autoheal=warn"
    } else {
        "autoheal=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = HealerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let code = match cli.command {
        Commands::Run {
            critical,
            tag,
            max_retries,
            stop_on_failure,
        } => {
            if let Some(n) = max_retries {
                config.max_retries = n;
                config.validate().context("Invalid --max-retries")?;
            }
            let selection = SuiteSelection {
                critical_only: critical,
                tag,
            };
            let mut runner = MasterRunner::new(config);
            let (report, path) = runner
                .run(&selection, stop_on_failure)
                .await
                .context("Master run failed")?;
            if cli.minimal {
                print_minimal(&report);
            } else {
                print_summary(&report);
                println!("{}", format!("Report: {}", path.display()).dimmed());
            }
            exit_code(&report.summary)
        }
        Commands::Classify { message, step } => {
            let kind = classify_error(&message, &step);
            let context = ErrorContext::bare("cli", "cli", kind, &message, &step);
            let out = serde_json::json!({
                "kind": kind,
                "analysis": analyze_error(&context),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            0
        }
        Commands::Heal {
            test_id,
            test_name,
            message,
            step,
            role,
            url,
            expected_url,
            rerun,
        } => {
            let failure = FailureReport {
                test_id: test_id.clone(),
                test_name,
                role,
                message,
                stack: None,
                step,
                expected_url,
            };

            let probe = match &url {
                Some(url) => {
                    match PlaywrightProbe::capture(url, config.log_buffer_lines, CAPTURE_TIMEOUT)
                        .await
                    {
                        Ok(probe) => Some(probe),
                        Err(e) => {
                            warn!("Page capture failed, continuing without it: {e}");
                            None
                        }
                    }
                }
                None => None,
            };

            let collector = ErrorContextCollector::new(&config);
            let context = collector
                .collect(&failure, probe.as_ref().map(|p| p as &dyn PageProbe))
                .await;

            let suite = SuiteConfig {
                name: test_id,
                spec_path: rerun,
                tags: Vec::new(),
                critical: false,
                timeout_secs: 300,
            };
            let executor = PlaywrightExecutor::new(config.playwright_command.clone(), config.base_url.clone());
            let verifier = SuiteVerifier::new(&executor, &suite);

            let mut orchestrator = HealingOrchestrator::new(config);
            let report = orchestrator
                .heal(&context, &verifier)
                .await
                .context("Healing session failed")?;
            print_healing(&report);
            i32::from(!report.resolved)
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn print_summary(report: &MasterRunnerReport) {
    println!();
    println!("{}", "═══ Master Runner Summary ═══".cyan().bold());
    for suite in &report.suites {
        let status = match suite.status {
            SuiteStatus::Passed => "PASSED".green(),
            SuiteStatus::Fixed => "FIXED".yellow(),
            SuiteStatus::Failed => "FAILED".red().bold(),
            SuiteStatus::Skipped => "SKIPPED".dimmed(),
        };
        let detail = match (&suite.error, &suite.skip_reason) {
            (Some(err), _) => err.clone(),
            (None, Some(reason)) => reason.clone(),
            _ if suite.attempts > 0 => format!("{} healing attempt(s)", suite.attempts),
            _ => String::new(),
        };
        println!("  {status:<8} {} {}", suite.name.bold(), detail.dimmed());
        for patch in &suite.patches {
            println!("           {}", format!("proposed patch: {} ({:.0}%)", patch.file, patch.confidence * 100.0).dimmed());
        }
    }

    let s = &report.summary;
    println!();
    println!(
        "  Total: {}  {}  {}  {}  {}",
        s.total,
        format!("passed: {}", s.passed).green(),
        format!("fixed: {}", s.fixed).yellow(),
        format!("failed: {}", s.failed).red(),
        format!("skipped: {}", s.skipped).dimmed()
    );

    if !report.agent_stats.is_empty() {
        println!();
        println!("{}", "Agent statistics".cyan());
        for stat in &report.agent_stats {
            println!(
                "  {:<20} {}/{} succeeded ({:.0}%), {} patch(es)",
                stat.agent.name(),
                stat.successes,
                stat.executions,
                stat.success_rate * 100.0,
                stat.patches_proposed
            );
        }
    }
}

fn print_minimal(report: &MasterRunnerReport) {
    let s = &report.summary;
    let line = format!(
        "{} total, {} passed, {} fixed, {} failed, {} skipped",
        s.total, s.passed, s.fixed, s.failed, s.skipped
    );
    if s.failed > 0 {
        println!("{}", line.red());
    } else {
        println!("{}", line.green());
    }
}

fn print_healing(report: &AutoHealingReport) {
    let headline = format!(
        "{}: {:?} after {} attempt(s)",
        report.test_name, report.final_state, report.total_attempts
    );
    if report.resolved {
        println!("{}", headline.green().bold());
    } else {
        println!("{}", headline.red().bold());
    }
    for patch in report.proposed_patches() {
        println!("  {}", format!("proposed patch: {}", patch.file).yellow());
    }
    for rec in &report.recommendations {
        println!("  - {rec}");
    }
    if let Some(path) = &report.loop_report_path {
        println!("  {}", format!("Loop report: {}", path.display()).dimmed());
    }
}
