//! Candidate source files per error kind.
//!
//! The map is static: each error kind points at the handful of files in the
//! application repository that most often cause it. Files are read
//! best-effort and lines mentioning kind-specific keywords are flagged.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::types::{ErrorKind, SourceSnippet};

/// Lines kept per source file.
const MAX_SOURCE_LINES: usize = 400;

/// Built-in candidate paths for an error kind.
#[must_use]
pub fn default_candidates(kind: ErrorKind) -> &'static [&'static str] {
    match kind {
        ErrorKind::Redirect => &[
            "app/actions/auth-actions.ts",
            "middleware.ts",
            "lib/auth-dal.ts",
            "app/auth/login/login-form.tsx",
        ],
        ErrorKind::Authentication => &[
            "lib/auth-dal.ts",
            "middleware.ts",
            "app/actions/auth-actions.ts",
        ],
        ErrorKind::Selector => &[
            "app/auth/login/login-form.tsx",
            "components/dashboards/dashboard-header.tsx",
            "components/ui/button.tsx",
        ],
        ErrorKind::Timeout => &[
            "playwright.config.ts",
            "test/helpers/auth-helpers.ts",
            "test/helpers/navigation-helpers.ts",
        ],
        ErrorKind::Network => &[
            "lib/services/core/supabase-client.ts",
            "app/api/health/route.ts",
            "next.config.js",
        ],
        ErrorKind::Unknown => &[],
    }
}

/// Keywords that make a line suspect for an error kind.
#[must_use]
pub fn suspect_keywords(kind: ErrorKind) -> &'static [&'static str] {
    match kind {
        ErrorKind::Redirect => &[
            "redirect(",
            "router.push",
            "router.replace",
            "NextResponse.redirect",
            "waitForURL",
        ],
        ErrorKind::Authentication => &["getSession", "getUser", "cookies(", "signIn", "signOut"],
        ErrorKind::Selector => &["data-testid", "getByRole", "getByText", "locator(", "aria-label"],
        ErrorKind::Timeout => &["timeout", "waitFor", "setTimeout"],
        ErrorKind::Network => &["fetch(", "createClient", "NEXT_PUBLIC_", "supabase"],
        ErrorKind::Unknown => &[],
    }
}

/// 1-indexed line numbers containing any keyword.
#[must_use]
pub fn find_suspect_lines(content: &str, keywords: &[&str]) -> Vec<usize> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| keywords.iter().any(|k| line.contains(k)))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Reads candidate files for failing tests.
#[derive(Debug, Clone)]
pub struct SourceCollector {
    root: std::path::PathBuf,
    overrides: BTreeMap<ErrorKind, Vec<String>>,
}

impl SourceCollector {
    /// Create a collector resolving paths under `root`.
    #[must_use]
    pub fn new(root: &Path, overrides: BTreeMap<ErrorKind, Vec<String>>) -> Self {
        Self {
            root: root.to_path_buf(),
            overrides,
        }
    }

    /// Candidate paths for a kind, honoring config overrides.
    #[must_use]
    pub fn candidates(&self, kind: ErrorKind) -> Vec<String> {
        self.overrides.get(&kind).cloned().unwrap_or_else(|| {
            default_candidates(kind)
                .iter()
                .map(|p| (*p).to_string())
                .collect()
        })
    }

    /// Read every candidate that exists. Missing files are skipped.
    pub async fn collect(&self, kind: ErrorKind) -> Vec<SourceSnippet> {
        let keywords = suspect_keywords(kind);
        let mut snippets = Vec::new();

        for path in self.candidates(kind) {
            let full = self.root.join(&path);
            match tokio::fs::read_to_string(&full).await {
                Ok(raw) => {
                    let content: String = raw
                        .lines()
                        .take(MAX_SOURCE_LINES)
                        .collect::<Vec<_>>()
                        .join("\n");
                    let suspect_lines = find_suspect_lines(&content, keywords);
                    debug!("{path}: {} suspect line(s)", suspect_lines.len());
                    snippets.push(SourceSnippet {
                        path,
                        content,
                        suspect_lines,
                    });
                }
                Err(e) => warn!("Skipping source candidate {}: {e}", full.display()),
            }
        }

        snippets
    }
}
