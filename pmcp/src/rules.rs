//! Watch rule store and evaluation.
//!
//! Rules are copy-on-write: readers take an `Arc` snapshot, writers (CRUD,
//! hot reload) build a new vector and swap the pointer under a mutex. The
//! cooldown filter runs at selection time - a rule inside its cooldown
//! window is never handed to the VLM, and a rule that just triggered is not
//! re-evaluated in the same pass.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use pmcp_types::{
    AlertEvent, CameraId, EventType, Priority, RuleEvaluation, RuleSpec, WatchRule,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rule not found: {0}")]
    NotFound(String),
    #[error("IO error on rules file: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("YAML error in rules file: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },
}

/// How often the store re-checks the rules file for external edits.
pub const HOT_RELOAD_INTERVAL: Duration = Duration::from_secs(5);

struct StoreInner {
    rules: Arc<Vec<WatchRule>>,
    file_mtime: Option<SystemTime>,
    last_reload_check: Instant,
}

pub struct RuleStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl RuleStore {
    /// Open the store, loading any existing rules file.
    pub fn open(path: PathBuf) -> Result<Self> {
        let (rules, file_mtime) = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let rules: Vec<WatchRule> = serde_yaml::from_str(&text)?;
                (rules, file_mtime_of(&path))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), None),
            Err(e) => return Err(e.into()),
        };
        info!("loaded {} watch rule(s) from {}", rules.len(), path.display());
        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                rules: Arc::new(rules),
                file_mtime,
                last_reload_check: Instant::now(),
            }),
        })
    }

    /// Immutable snapshot for readers.
    pub fn snapshot(&self) -> Arc<Vec<WatchRule>> {
        self.inner.lock().rules.clone()
    }

    pub fn get(&self, id: &str) -> Option<WatchRule> {
        self.snapshot().iter().find(|r| r.id == id).cloned()
    }

    pub fn create(&self, spec: RuleSpec) -> WatchRule {
        let rule = WatchRule::from_spec(spec);
        self.mutate(|rules| rules.push(rule.clone()));
        rule
    }

    pub fn delete(&self, id: &str) -> Result<WatchRule> {
        let mut removed = None;
        self.mutate(|rules| {
            if let Some(pos) = rules.iter().position(|r| r.id == id) {
                removed = Some(rules.remove(pos));
            }
        });
        removed.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn toggle(&self, id: &str) -> Result<WatchRule> {
        let mut toggled = None;
        self.mutate(|rules| {
            if let Some(rule) = rules.iter_mut().find(|r| r.id == id) {
                rule.enabled = !rule.enabled;
                toggled = Some(rule.clone());
            }
        });
        toggled.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Enabled rules matching `camera_id` that are outside their cooldown
    /// window. This is the only path by which rules reach evaluation.
    pub fn active_for(&self, camera_id: &CameraId, now: DateTime<Utc>) -> Vec<WatchRule> {
        self.snapshot()
            .iter()
            .filter(|r| r.enabled && r.matches_camera(camera_id) && !r.in_cooldown(now))
            .cloned()
            .collect()
    }

    /// Record a trigger: bump `trigger_count`, stamp `last_triggered`.
    pub fn record_trigger(&self, id: &str, now: DateTime<Utc>) {
        self.mutate(|rules| {
            if let Some(rule) = rules.iter_mut().find(|r| r.id == id) {
                rule.last_triggered = Some(now);
                rule.trigger_count += 1;
            }
        });
    }

    /// Swap in edits from the rules file when its mtime moved; throttled to
    /// every [`HOT_RELOAD_INTERVAL`]. In-memory `last_triggered` and
    /// `trigger_count` survive for rules whose id is unchanged.
    pub fn maybe_hot_reload(&self) {
        let mut inner = self.inner.lock();
        if inner.last_reload_check.elapsed() < HOT_RELOAD_INTERVAL {
            return;
        }
        inner.last_reload_check = Instant::now();

        let current_mtime = file_mtime_of(&self.path);
        if current_mtime == inner.file_mtime {
            return;
        }
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("rules hot-reload read failed: {e}");
                return;
            }
        };
        let mut reloaded: Vec<WatchRule> = match serde_yaml::from_str(&text) {
            Ok(rules) => rules,
            Err(e) => {
                warn!("rules hot-reload parse failed, keeping current set: {e}");
                inner.file_mtime = current_mtime;
                return;
            }
        };

        for rule in reloaded.iter_mut() {
            if let Some(old) = inner.rules.iter().find(|r| r.id == rule.id) {
                rule.last_triggered = old.last_triggered;
                rule.trigger_count = old.trigger_count;
            }
        }
        info!("hot-reloaded {} watch rule(s)", reloaded.len());
        inner.rules = Arc::new(reloaded);
        inner.file_mtime = current_mtime;
    }

    /// Persist the current set; also called at shutdown.
    pub fn save(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::save_locked(&self.path, &mut inner)
    }

    fn save_locked(path: &PathBuf, inner: &mut StoreInner) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(inner.rules.as_ref())?;
        std::fs::write(path, text)?;
        inner.file_mtime = file_mtime_of(path);
        Ok(())
    }

    fn mutate<F: FnOnce(&mut Vec<WatchRule>)>(&self, f: F) {
        let mut inner = self.inner.lock();
        let mut rules: Vec<WatchRule> = inner.rules.as_ref().clone();
        f(&mut rules);
        inner.rules = Arc::new(rules);
        if let Err(e) = Self::save_locked(&self.path, &mut inner) {
            warn!("failed persisting rules: {e}");
        }
    }
}

fn file_mtime_of(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Turn VLM verdicts into alert events.
///
/// A rule fires iff `triggered` and `confidence >= floor`. Cooldown is NOT
/// re-checked here; it was applied at selection time. `enabled` is
/// re-checked because client-side evaluations can arrive after a rule was
/// switched off.
pub fn evaluate(
    store: &RuleStore,
    evaluations: &[RuleEvaluation],
    confidence_floor: f64,
    camera_id: &CameraId,
    camera_name: &str,
    frame_ref: Option<String>,
    now: DateTime<Utc>,
) -> Vec<AlertEvent> {
    let snapshot = store.snapshot();
    let mut alerts = Vec::new();

    for eval in evaluations {
        let Some(rule) = snapshot.iter().find(|r| r.id == eval.rule_id) else {
            warn!("evaluation for unknown rule {}", eval.rule_id);
            continue;
        };
        if !rule.enabled {
            continue;
        }
        let confidence = eval.confidence.clamp(0.0, 1.0);
        if !eval.triggered || confidence < confidence_floor {
            continue;
        }

        store.record_trigger(&rule.id, now);

        let message = rule
            .custom_message
            .clone()
            .unwrap_or_else(|| format!("Watch rule '{}' triggered: {}", rule.name, rule.condition));
        let mut event = AlertEvent::new(EventType::WatchRuleTriggered, message);
        event.camera_id = camera_id.clone();
        event.camera_name = camera_name.to_string();
        event.rule_id = rule.id.clone();
        event.rule_name = rule.name.clone();
        event.priority = rule.priority;
        event.reasoning = eval.reasoning.clone();
        event.confidence = confidence;
        event.frame_ref = frame_ref.clone();
        alerts.push(event);
    }

    alerts
}

/// Built-in rule templates served at `/templates`.
#[derive(Debug, Clone, Serialize)]
pub struct RuleTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub condition: &'static str,
    pub priority: Priority,
    pub cooldown_seconds: u64,
}

pub fn templates() -> &'static [RuleTemplate] {
    const TEMPLATES: &[RuleTemplate] = &[
        RuleTemplate {
            id: "person",
            name: "Person detected",
            condition: "a person is visible in the scene",
            priority: Priority::High,
            cooldown_seconds: 120,
        },
        RuleTemplate {
            id: "package",
            name: "Package delivery",
            condition: "a package, box or parcel has been left at the door",
            priority: Priority::Medium,
            cooldown_seconds: 600,
        },
        RuleTemplate {
            id: "pet",
            name: "Pet activity",
            condition: "a pet is somewhere it should not be (counter, couch, table)",
            priority: Priority::Low,
            cooldown_seconds: 300,
        },
        RuleTemplate {
            id: "door",
            name: "Door or entry",
            condition: "a door or window that was closed is now open",
            priority: Priority::Critical,
            cooldown_seconds: 60,
        },
    ];
    TEMPLATES
}

pub fn template_by_id(id: &str) -> Option<&'static RuleTemplate> {
    templates().iter().find(|t| t.id == id)
}
