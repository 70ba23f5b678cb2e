use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;

use crate::db::Database;
use crate::error::{Error, Result};

// Handoff blobs are plain files: `<project>_<YYYY-MM-DDTHH-MM-SS>.json` for
// each generation plus a `latest_<project>.json` pointer that always holds
// the newest content. Crash between the two writes leaves a stale pointer,
// which the next save repairs.

fn sanitize_project(project: &str) -> String {
    project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

impl Database {
    fn handoffs_dir(&self) -> Result<PathBuf> {
        let root = self
            .storage_dir()
            .ok_or_else(|| Error::NotFound("storage directory (in-memory database)".into()))?;
        Ok(root.join("handoffs"))
    }

    /// Save a handoff generation and move the project's `latest` pointer.
    /// Returns the generation file name.
    pub fn save_handoff(&self, project: &str, content: &Value, now_ms: i64) -> Result<String> {
        let dir = self.handoffs_dir()?;
        let project = sanitize_project(project);

        let stamp = DateTime::<Utc>::from_timestamp_millis(now_ms)
            .unwrap_or_default()
            .format("%Y-%m-%dT%H-%M-%S");
        let name = format!("{}_{}.json", project, stamp);
        let body = serde_json::to_string_pretty(content).unwrap_or_else(|_| "null".into());

        std::fs::write(dir.join(&name), &body)?;
        std::fs::write(dir.join(format!("latest_{}.json", project)), &body)?;
        Ok(name)
    }

    /// Content behind the project's `latest` pointer.
    pub fn latest_handoff(&self, project: &str) -> Result<Option<Value>> {
        let dir = self.handoffs_dir()?;
        let path = dir.join(format!("latest_{}.json", sanitize_project(project)));
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&body).ok())
    }

    /// Stored generation file names for a project, newest first.
    pub fn list_handoffs(&self, project: &str) -> Result<Vec<String>> {
        let dir = self.handoffs_dir()?;
        let prefix = format!("{}_", sanitize_project(project));

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".json") {
                names.push(name);
            }
        }
        // Timestamps in the names sort lexicographically
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Delete generation files whose embedded timestamp is older than the
    /// cutoff; `latest_*` pointers are always kept.
    pub(crate) fn sweep_handoff_files(&self, cutoff_ms: i64) -> Result<usize> {
        let dir = match self.handoffs_dir() {
            Ok(dir) if dir.exists() => dir,
            _ => return Ok(0),
        };

        let cutoff_stamp = DateTime::<Utc>::from_timestamp_millis(cutoff_ms)
            .unwrap_or_default()
            .format("%Y-%m-%dT%H-%M-%S")
            .to_string();

        let mut deleted = 0;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("latest_") || !name.ends_with(".json") {
                continue;
            }
            let Some(stamp) = name
                .strip_suffix(".json")
                .and_then(|s| s.rsplit_once('_'))
                .map(|(_, stamp)| stamp)
            else {
                continue;
            };
            if stamp < cutoff_stamp.as_str() {
                std::fs::remove_file(entry.path())?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn save_and_read_latest() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.save_handoff("my-project", &json!({"state": 1}), NOW)
            .unwrap();
        db.save_handoff("my-project", &json!({"state": 2}), NOW + 60_000)
            .unwrap();

        let latest = db.latest_handoff("my-project").unwrap().unwrap();
        assert_eq!(latest, json!({"state": 2}));

        let listed = db.list_handoffs("my-project").unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].starts_with("my-project_"));
        // Newest generation first
        assert!(listed[0] > listed[1]);
    }

    #[test]
    fn sweep_keeps_latest_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.save_handoff("proj", &json!({"old": true}), NOW - 60 * 86_400_000)
            .unwrap();
        db.save_handoff("proj", &json!({"new": true}), NOW).unwrap();

        let deleted = db.sweep_handoff_files(NOW - 30 * 86_400_000).unwrap();
        assert_eq!(deleted, 1);

        assert!(db.latest_handoff("proj").unwrap().is_some());
        // The fresh generation survives
        let listed = db.list_handoffs("proj").unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn project_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.save_handoff("../evil/project", &json!({}), NOW).unwrap();
        for entry in std::fs::read_dir(dir.path().join("handoffs")).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            assert!(!name.contains('/'));
            assert!(!name.contains(".."));
        }
    }
}
