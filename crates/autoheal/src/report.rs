//! JSON artifact persistence.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{HealError, Result};

/// Timestamp format used in artifact file names.
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Render a timestamp safe for file names (no colons).
#[must_use]
pub fn timestamp_slug(at: DateTime<Utc>) -> String {
    at.format(FILE_TIMESTAMP_FORMAT).to_string()
}

/// Reduce an arbitrary test name to something usable in a file name.
#[must_use]
pub fn sanitize_file_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(80)
        .collect();

    let mut collapsed = String::with_capacity(sanitized.len());
    for c in sanitized.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }

    let trimmed = collapsed.trim_matches('-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write a value as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HealError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|e| HealError::io(path, e))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Read a JSON artifact back.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse as `T`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| HealError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Write `value` to `<dir>/<prefix>-<timestamp>.json` and to
/// `<dir>/<prefix>-latest.json`. Returns the timestamped path.
///
/// # Errors
///
/// Returns an error if either file cannot be written.
pub fn write_with_latest<T: Serialize>(
    dir: &Path,
    prefix: &str,
    latest_prefix: &str,
    at: DateTime<Utc>,
    value: &T,
) -> Result<PathBuf> {
    let path = dir.join(format!("{prefix}-{}.json", timestamp_slug(at)));
    write_json(&path, value)?;
    write_json(&dir.join(format!("{latest_prefix}-latest.json")), value)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_slug_has_no_colons() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(timestamp_slug(at), "2025-03-04T05-06-07");
    }

    #[test]
    fn test_sanitize_file_component() {
        assert_eq!(sanitize_file_component("Login Admin"), "login-admin");
        assert_eq!(
            sanitize_file_component("intervention: create / approve"),
            "intervention-create-approve"
        );
        assert_eq!(sanitize_file_component("///"), "unnamed");
        assert_eq!(sanitize_file_component("a".repeat(200).as_str()).len(), 80);
    }

    #[test]
    fn test_write_with_latest() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let value = serde_json::json!({ "ok": true });

        let path = write_with_latest(dir.path(), "report-x", "report", at, &value).unwrap();
        assert!(path.ends_with("report-x-2025-01-01T00-00-00.json"));

        let latest: serde_json::Value = read_json(&dir.path().join("report-latest.json")).unwrap();
        assert_eq!(latest, value);
    }

    #[test]
    fn test_read_json_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<serde_json::Value>(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, HealError::Io { .. }));
    }
}
