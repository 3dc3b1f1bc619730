//! Recurring-bug detection.
//!
//! Every failure message is normalized (URLs, emails and numbers replaced by
//! placeholders) and hashed into a stable bug id. Repeats of the same id are
//! counted, and once one id reaches the configured threshold the harness
//! treats it as an infinite healing loop and stops.
//!
//! State lives only in memory for the duration of one run.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, warn};

use crate::error::{HealError, Result};
use crate::report::timestamp_slug;
use crate::templates::{ReportRenderer, INFINITE_LOOP};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(?:https?|wss?)://[^\s'"<>)\]]+"#).unwrap());
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Replace the volatile parts of an error message with placeholders.
///
/// URLs go first so their digits and `@` never leak into the other passes.
#[must_use]
pub fn normalize_message(message: &str) -> String {
    let s = URL_PATTERN.replace_all(message.trim(), "URL");
    let s = EMAIL_PATTERN.replace_all(&s, "EMAIL");
    NUMBER_PATTERN.replace_all(&s, "N").into_owned()
}

/// Shift-and-add string hash (`h * 31 + c`, wrapping at 32 bits).
#[must_use]
pub fn signature_hash(signature: &str) -> u32 {
    signature.chars().fold(0u32, |hash, c| {
        (hash << 5).wrapping_sub(hash).wrapping_add(u32::from(c))
    })
}

/// Bug id for a raw error message.
#[must_use]
pub fn bug_id(message: &str) -> String {
    format!("bug_{:08x}", signature_hash(&normalize_message(message)))
}

/// A recurring failure, keyed by its normalized signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugReport {
    pub id: String,
    /// Normalized message
    pub signature: String,
    /// First raw message seen for this signature
    pub sample_message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Only ever increases
    pub occurrences: u32,
    pub metadata: BTreeMap<String, String>,
}

/// Verdict of [`BugDetector::detect_infinite_loop`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopDetection {
    pub detected: bool,
    /// Most frequent bug, if any was recorded
    pub bug: Option<BugReport>,
    pub recommendation: String,
}

/// Counts recurring failures within one run.
#[derive(Debug)]
pub struct BugDetector {
    threshold: u32,
    bugs: BTreeMap<String, BugReport>,
}

impl BugDetector {
    /// Create a detector that trips at `threshold` occurrences.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            bugs: BTreeMap::new(),
        }
    }

    /// Occurrence count that trips loop detection.
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record one failure and return the updated report.
    pub fn record_bug(&mut self, error: &str, metadata: BTreeMap<String, String>) -> BugReport {
        let signature = normalize_message(error);
        let id = format!("bug_{:08x}", signature_hash(&signature));
        let now = Utc::now();

        let report = self
            .bugs
            .entry(id.clone())
            .and_modify(|bug| {
                bug.occurrences = bug.occurrences.saturating_add(1);
                bug.last_seen = now;
            })
            .or_insert_with(|| BugReport {
                id: id.clone(),
                signature,
                sample_message: error.to_string(),
                first_seen: now,
                last_seen: now,
                occurrences: 1,
                metadata: BTreeMap::new(),
            });
        report.metadata.extend(metadata);

        if report.occurrences > 1 {
            warn!(
                "Bug {} seen {} times (threshold {})",
                report.id, report.occurrences, self.threshold
            );
        } else {
            debug!("New bug {}: {}", report.id, report.signature);
        }

        report.clone()
    }

    /// Times a bug id has been recorded.
    #[must_use]
    pub fn occurrences(&self, id: &str) -> u32 {
        self.bugs.get(id).map_or(0, |b| b.occurrences)
    }

    /// All known bugs, most frequent first.
    #[must_use]
    pub fn reports(&self) -> Vec<BugReport> {
        let mut reports: Vec<BugReport> = self.bugs.values().cloned().collect();
        reports.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then(a.id.cmp(&b.id)));
        reports
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.bugs.clear();
    }

    /// Check whether the most frequent bug has reached the threshold.
    #[must_use]
    pub fn detect_infinite_loop(&self) -> LoopDetection {
        match self.reports().into_iter().next() {
            Some(bug) => self.verdict(bug),
            None => LoopDetection {
                detected: false,
                bug: None,
                recommendation: "Continue: no bugs recorded".to_string(),
            },
        }
    }

    /// Check one bug against the threshold, ignoring every other signature.
    #[must_use]
    pub fn detect_loop_for(&self, bug: &BugReport) -> LoopDetection {
        let current = self.bugs.get(&bug.id).cloned().unwrap_or_else(|| bug.clone());
        self.verdict(current)
    }

    fn verdict(&self, bug: BugReport) -> LoopDetection {
        if bug.occurrences < self.threshold {
            return LoopDetection {
                detected: false,
                recommendation: format!(
                    "Continue: bug {} is at {}/{}",
                    bug.id, bug.occurrences, self.threshold
                ),
                bug: Some(bug),
            };
        }

        error!(
            "Infinite loop: {} recurred {} times: {}",
            bug.id, bug.occurrences, bug.signature
        );
        let recommendation = format!(
            "Stop automatic healing. \"{}\" has recurred {} times; the applied fixes are not \
             addressing its root cause. Investigate manually, starting from the failing step \
             recorded in the bug metadata.",
            bug.sample_message, bug.occurrences
        );
        LoopDetection {
            detected: true,
            bug: Some(bug),
            recommendation,
        }
    }

    /// Render the Markdown report for a detected loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the template fails to render.
    pub fn render_loop_report(&self, detection: &LoopDetection) -> Result<String> {
        let renderer = ReportRenderer::new()?;
        renderer.render(
            INFINITE_LOOP,
            &json!({
                "generated_at": Utc::now().to_rfc3339(),
                "threshold": self.threshold,
                "recommendation": detection.recommendation,
                "bug": detection.bug,
                "bugs": self.reports(),
            }),
        )
    }

    /// Write `INFINITE-LOOP-<timestamp>.md` into `dir` when a loop was detected.
    ///
    /// Returns `None` if `detection` did not detect a loop.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or writing fails.
    pub fn write_loop_report(&self, dir: &Path, detection: &LoopDetection) -> Result<Option<PathBuf>> {
        if !detection.detected {
            return Ok(None);
        }
        let markdown = self.render_loop_report(detection)?;
        std::fs::create_dir_all(dir).map_err(|e| HealError::io(dir, e))?;
        let path = dir.join(format!("INFINITE-LOOP-{}.md", timestamp_slug(Utc::now())));
        std::fs::write(&path, markdown).map_err(|e| HealError::io(&path, e))?;
        error!("Manual intervention required, see {}", path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(test: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("test".to_string(), test.to_string())])
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(
            normalize_message("Timeout 30000ms exceeded"),
            "Timeout Nms exceeded"
        );
        assert_eq!(
            normalize_message("login failed for gestionnaire42@seido.pm at http://localhost:3000/auth/login?x=1"),
            "login failed for EMAIL at URL"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_message("GET https://api.test/v1/lots/17 failed for a@b.io after 3 tries");
        assert_eq!(normalize_message(&once), once);
    }

    #[test]
    fn test_same_id_when_only_volatile_parts_differ() {
        let a = "Timeout 30000ms waiting for http://localhost:3000/dashboard/1 as user1@x.com";
        let b = "Timeout 5000ms waiting for https://staging.app/dashboard/99 as other@y.org";
        assert_eq!(bug_id(a), bug_id(b));
        assert_ne!(bug_id(a), bug_id("locator.click: element not found"));
    }

    #[test]
    fn test_signature_hash_matches_shift_and_add() {
        // "ab" => (0*31 + 97) * 31 + 98
        assert_eq!(signature_hash("ab"), 97 * 31 + 98);
        assert_eq!(signature_hash(""), 0);
    }

    #[test]
    fn test_occurrences_count_equivalent_messages() {
        let mut detector = BugDetector::new(10);
        let first = detector.record_bug("Timeout 1000ms exceeded", meta("a"));
        assert_eq!(first.occurrences, 1);

        for ms in [2000, 3000, 4000] {
            detector.record_bug(&format!("Timeout {ms}ms exceeded"), BTreeMap::new());
        }
        detector.record_bug("something else", BTreeMap::new());

        assert_eq!(detector.occurrences(&first.id), 4);
        assert_eq!(detector.reports().len(), 2);
        assert_eq!(detector.reports()[0].id, first.id);
        assert_eq!(detector.reports()[0].sample_message, "Timeout 1000ms exceeded");
        assert_eq!(detector.reports()[0].metadata.get("test").unwrap(), "a");
    }

    #[test]
    fn test_occurrences_are_monotonic() {
        let mut detector = BugDetector::new(100);
        let mut last = 0;
        for i in 0..20 {
            let bug = detector.record_bug(&format!("step {i} failed"), BTreeMap::new());
            assert!(bug.occurrences > last);
            last = bug.occurrences;
        }
    }

    #[test]
    fn test_detect_infinite_loop_threshold() {
        let mut detector = BugDetector::new(3);
        assert!(!detector.detect_infinite_loop().detected);
        assert!(detector.detect_infinite_loop().bug.is_none());

        detector.record_bug("net::ERR_CONNECTION_REFUSED at http://localhost:3000", BTreeMap::new());
        detector.record_bug("net::ERR_CONNECTION_REFUSED at http://localhost:3001", BTreeMap::new());
        let below = detector.detect_infinite_loop();
        assert!(!below.detected);
        assert_eq!(below.bug.unwrap().occurrences, 2);

        detector.record_bug("net::ERR_CONNECTION_REFUSED at http://127.0.0.1:3000", BTreeMap::new());
        let at = detector.detect_infinite_loop();
        assert!(at.detected);
        assert_eq!(at.bug.unwrap().occurrences, 3);
        assert!(at.recommendation.contains("Investigate manually"));
    }

    #[test]
    fn test_detect_loop_for_ignores_other_signatures() {
        let mut detector = BugDetector::new(2);
        detector.record_bug("net::ERR_CONNECTION_REFUSED", BTreeMap::new());
        detector.record_bug("net::ERR_CONNECTION_REFUSED", BTreeMap::new());
        assert!(detector.detect_infinite_loop().detected);

        let fresh = detector.record_bug("locator.click: element not found", BTreeMap::new());
        let verdict = detector.detect_loop_for(&fresh);
        assert!(!verdict.detected);
        assert_eq!(verdict.bug.unwrap().id, fresh.id);

        let again = detector.record_bug("locator.click: element not found", BTreeMap::new());
        assert!(detector.detect_loop_for(&again).detected);
    }

    #[test]
    fn test_reset() {
        let mut detector = BugDetector::new(1);
        detector.record_bug("x", BTreeMap::new());
        assert!(detector.detect_infinite_loop().detected);
        detector.reset();
        assert!(!detector.detect_infinite_loop().detected);
    }

    #[test]
    fn test_write_loop_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = BugDetector::new(2);
        detector.record_bug("redirect to /dashboard never happened", meta("login"));

        let quiet = detector.detect_infinite_loop();
        assert!(detector.write_loop_report(dir.path(), &quiet).unwrap().is_none());

        detector.record_bug("redirect to /dashboard never happened", meta("login"));
        let tripped = detector.detect_infinite_loop();
        let path = detector.write_loop_report(dir.path(), &tripped).unwrap().unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("Manual Intervention Required"));
        assert!(content.contains("**2 times**"));
    }
}
