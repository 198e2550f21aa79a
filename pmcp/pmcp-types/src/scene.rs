use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum retained change-log entries per camera; oldest evicted first.
pub const CHANGE_LOG_CAP: usize = 200;

/// One line in a camera's rolling change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// What the VLM said about one frame.
///
/// Every field is optional: a missing field leaves the previous scene value
/// untouched rather than clearing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneAnalysis {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub objects: Option<Vec<String>>,
    #[serde(default)]
    pub people_count: Option<u32>,
    #[serde(default)]
    pub changes: Option<String>,
}

/// Rolling per-camera scene understanding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneState {
    pub summary: String,
    pub objects: Vec<String>,
    pub people_count: Option<u32>,
    pub last_change: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub update_count: u64,
    pub change_log: VecDeque<ChangeLogEntry>,
}

impl SceneState {
    /// Fold a new analysis in. `fallback_change` is the change detector's
    /// description, used when the VLM did not name the change.
    pub fn apply(&mut self, analysis: &SceneAnalysis, fallback_change: &str, now: DateTime<Utc>) {
        if let Some(summary) = &analysis.summary {
            self.summary = summary.clone();
        }
        if let Some(objects) = &analysis.objects {
            self.objects = objects.clone();
        }
        if let Some(count) = analysis.people_count {
            self.people_count = Some(count);
        }
        let description = analysis
            .changes
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| fallback_change.to_string());
        self.last_change = description.clone();
        self.change_log.push_back(ChangeLogEntry {
            timestamp: now,
            description,
        });
        while self.change_log.len() > CHANGE_LOG_CAP {
            self.change_log.pop_front();
        }
        self.update_count += 1;
        // last_updated never decreases, even if the caller's clock does.
        if self.last_updated.map_or(true, |prev| now > prev) {
            self.last_updated = Some(now);
        }
    }

    /// Compact context string fed into VLM prompts.
    pub fn context_string(&self) -> String {
        let mut out = String::new();
        if !self.summary.is_empty() {
            out.push_str("Current scene: ");
            out.push_str(&self.summary);
            out.push('\n');
        }
        if let Some(n) = self.people_count {
            out.push_str(&format!("People visible: {n}\n"));
        }
        if !self.objects.is_empty() {
            let top: Vec<&str> = self.objects.iter().take(8).map(String::as_str).collect();
            out.push_str("Objects: ");
            out.push_str(&top.join(", "));
            out.push('\n');
        }
        let recent: Vec<&ChangeLogEntry> = self.change_log.iter().rev().take(5).collect();
        if !recent.is_empty() {
            out.push_str("Recent changes:\n");
            for entry in recent.iter().rev() {
                out.push_str(&format!(
                    "- [{}] {}\n",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.description
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(summary: &str) -> SceneAnalysis {
        SceneAnalysis {
            summary: Some(summary.to_string()),
            objects: Some(vec!["desk".into(), "chair".into()]),
            people_count: Some(1),
            changes: Some("a person sat down".into()),
        }
    }

    #[test]
    fn apply_merges_and_counts() {
        let mut scene = SceneState::default();
        let now = Utc::now();
        scene.apply(&analysis("an office"), "minor change", now);
        assert_eq!(scene.summary, "an office");
        assert_eq!(scene.update_count, 1);
        assert_eq!(scene.change_log.len(), 1);
        assert_eq!(scene.last_change, "a person sat down");

        // Missing fields keep previous values.
        let sparse = SceneAnalysis::default();
        scene.apply(&sparse, "detector text", now + chrono::Duration::seconds(1));
        assert_eq!(scene.summary, "an office");
        assert_eq!(scene.people_count, Some(1));
        assert_eq!(scene.last_change, "detector text");
        assert_eq!(scene.update_count, 2);
    }

    #[test]
    fn change_log_is_bounded() {
        let mut scene = SceneState::default();
        let t0 = Utc::now();
        for i in 0..(CHANGE_LOG_CAP + 25) {
            scene.apply(
                &SceneAnalysis {
                    changes: Some(format!("change {i}")),
                    ..Default::default()
                },
                "",
                t0 + chrono::Duration::seconds(i as i64),
            );
        }
        assert_eq!(scene.change_log.len(), CHANGE_LOG_CAP);
        // Oldest entries were evicted FIFO.
        assert_eq!(scene.change_log.front().unwrap().description, "change 25");
    }

    #[test]
    fn last_updated_never_decreases() {
        let mut scene = SceneState::default();
        let now = Utc::now();
        scene.apply(&SceneAnalysis::default(), "", now);
        scene.apply(&SceneAnalysis::default(), "", now - chrono::Duration::seconds(5));
        assert_eq!(scene.last_updated, Some(now));
        assert_eq!(scene.update_count, 2);
    }

    #[test]
    fn context_string_mentions_recent_changes() {
        let mut scene = SceneState::default();
        let now = Utc::now();
        scene.apply(&analysis("a hallway"), "", now);
        let ctx = scene.context_string();
        assert!(ctx.contains("a hallway"));
        assert!(ctx.contains("People visible: 1"));
        assert!(ctx.contains("a person sat down"));
    }
}
