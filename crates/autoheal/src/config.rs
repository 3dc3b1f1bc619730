//! Harness configuration.
//!
//! Loaded from a JSON file (`autoheal.json` by default). Every field has a
//! default so a partial or missing file still yields a usable config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{HealError, Result};
use crate::types::{AgentKind, ErrorKind};

/// Environment variable overriding [`HealerConfig::base_url`].
pub const ENV_BASE_URL: &str = "AUTOHEAL_BASE_URL";
/// Environment variable overriding [`HealerConfig::max_retries`].
pub const ENV_MAX_RETRIES: &str = "AUTOHEAL_MAX_RETRIES";

/// One Playwright suite the master runner knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteConfig {
    /// Display name
    pub name: String,
    /// Spec file handed to Playwright
    pub spec_path: String,
    /// Free-form tags for `--tag` selection
    #[serde(default)]
    pub tags: Vec<String>,
    /// Included by `--critical`
    #[serde(default)]
    pub critical: bool,
    /// Kill the suite after this many seconds
    #[serde(default = "default_suite_timeout")]
    pub timeout_secs: u64,
}

fn default_suite_timeout() -> u64 {
    300
}

/// Configuration for the auto-healing harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealerConfig {
    /// Root for per-test artifact directories
    pub artifacts_dir: PathBuf,
    /// Where healing and master-runner reports go
    pub reports_dir: PathBuf,
    /// Healing cycles per failing test
    pub max_retries: u32,
    /// Occurrences of one bug signature that count as an infinite loop
    pub bug_loop_threshold: u32,
    /// Wait after applying fixes, before the test is re-run
    pub hot_reload_delay_ms: u64,
    /// Artificial work time per agent
    pub agent_delay_ms: BTreeMap<AgentKind, u64>,
    /// Console/network lines kept per captured page
    pub log_buffer_lines: usize,
    /// Web application under test
    pub base_url: String,
    /// Check `base_url` answers before running suites
    pub preflight: bool,
    /// Command that runs one Playwright spec
    pub playwright_command: Vec<String>,
    /// Known suites
    pub suites: Vec<SuiteConfig>,
    /// Overrides for the built-in error-kind to source-file map
    pub source_candidates: BTreeMap<ErrorKind, Vec<String>>,
    /// Repository root used to resolve source candidates
    pub source_root: PathBuf,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("test/auto-healing-artifacts"),
            reports_dir: PathBuf::from("test/reports"),
            max_retries: 5,
            bug_loop_threshold: 5,
            hot_reload_delay_ms: 3000,
            agent_delay_ms: default_agent_delays(),
            log_buffer_lines: 20,
            base_url: "http://localhost:3000".into(),
            preflight: true,
            playwright_command: vec!["npx".into(), "playwright".into(), "test".into()],
            suites: Vec::new(),
            source_candidates: BTreeMap::new(),
            source_root: PathBuf::from("."),
        }
    }
}

fn default_agent_delays() -> BTreeMap<AgentKind, u64> {
    BTreeMap::from([
        (AgentKind::SeidoDebugger, 1000),
        (AgentKind::BackendDeveloper, 800),
        (AgentKind::FrontendDeveloper, 700),
        (AgentKind::Tester, 500),
    ])
}

impl HealerConfig {
    /// Load config from a JSON file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting config fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| HealError::io(path, e))?;
            let config: Self = serde_json::from_str(&content)?;
            info!("Loaded config from {}", path.display());
            config
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AUTOHEAL_*` environment overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Ok(raw) = std::env::var(ENV_MAX_RETRIES) {
            self.max_retries = raw
                .parse()
                .map_err(|_| HealError::Config(format!("{ENV_MAX_RETRIES}={raw} is not a number")))?;
        }
        Ok(())
    }

    /// Reject configs the harness cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`HealError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(HealError::Config("maxRetries must be at least 1".into()));
        }
        if self.bug_loop_threshold == 0 {
            return Err(HealError::Config("bugLoopThreshold must be at least 1".into()));
        }
        if self.log_buffer_lines == 0 {
            return Err(HealError::Config("logBufferLines must be at least 1".into()));
        }
        if self.playwright_command.is_empty() {
            return Err(HealError::Config("playwrightCommand is empty".into()));
        }
        for suite in &self.suites {
            if suite.name.trim().is_empty() || suite.spec_path.trim().is_empty() {
                return Err(HealError::Config(format!(
                    "suite {:?} needs both a name and a specPath",
                    suite.name
                )));
            }
        }
        Ok(())
    }

    /// Artificial delay for an agent.
    #[must_use]
    pub fn agent_delay(&self, agent: AgentKind) -> Duration {
        Duration::from_millis(self.agent_delay_ms.get(&agent).copied().unwrap_or(0))
    }

    /// Delay waited after fixes before the test is re-run.
    #[must_use]
    pub fn hot_reload_delay(&self) -> Duration {
        Duration::from_millis(self.hot_reload_delay_ms)
    }

    /// Config with every artificial delay set to zero.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.hot_reload_delay_ms = 0;
        for delay in self.agent_delay_ms.values_mut() {
            *delay = 0;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HealerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.hot_reload_delay(), Duration::from_millis(3000));
        assert_eq!(config.agent_delay(AgentKind::Tester), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{
            "maxRetries": 2,
            "agentDelayMs": { "tester": 10 },
            "suites": [{ "name": "auth", "specPath": "tests/auth.spec.ts", "critical": true }]
        }"#;
        let config: HealerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.bug_loop_threshold, 5);
        assert_eq!(config.agent_delay(AgentKind::Tester), Duration::from_millis(10));
        assert_eq!(config.agent_delay(AgentKind::SeidoDebugger), Duration::ZERO);
        assert_eq!(config.suites[0].timeout_secs, 300);
        assert!(config.suites[0].critical);
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = HealerConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HealError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unnamed_suite() {
        let config = HealerConfig {
            suites: vec![SuiteConfig {
                name: " ".into(),
                spec_path: "x.spec.ts".into(),
                tags: vec![],
                critical: false,
                timeout_secs: 10,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HealerConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.log_buffer_lines, 20);
    }

    #[test]
    fn test_without_delays() {
        let config = HealerConfig::default().without_delays();
        assert_eq!(config.hot_reload_delay(), Duration::ZERO);
        assert!(AgentKind::ALL
            .iter()
            .all(|a| config.agent_delay(*a) == Duration::ZERO));
    }
}
