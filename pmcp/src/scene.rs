//! Per-camera scene state registry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use pmcp_types::{CameraId, ChangeLogEntry, SceneAnalysis, SceneState};

/// Holds one [`SceneState`] per camera behind its own mutex so cameras never
/// contend with each other.
#[derive(Default)]
pub struct SceneRegistry {
    inner: RwLock<BTreeMap<CameraId, Mutex<SceneState>>>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, camera_id: CameraId) {
        self.inner.write().entry(camera_id).or_default();
    }

    /// Fold an analysis into the camera's scene, returning the change-log
    /// entry that was appended (for the live change feed).
    pub fn apply(
        &self,
        camera_id: &CameraId,
        analysis: &SceneAnalysis,
        fallback_change: &str,
        now: DateTime<Utc>,
    ) -> Option<ChangeLogEntry> {
        let inner = self.inner.read();
        let scene = inner.get(camera_id)?;
        let mut scene = scene.lock();
        scene.apply(analysis, fallback_change, now);
        scene.change_log.back().cloned()
    }

    pub fn snapshot(&self, camera_id: &CameraId) -> Option<SceneState> {
        self.inner
            .read()
            .get(camera_id)
            .map(|scene| scene.lock().clone())
    }

    pub fn all(&self) -> BTreeMap<CameraId, SceneState> {
        self.inner
            .read()
            .iter()
            .map(|(id, scene)| (id.clone(), scene.lock().clone()))
            .collect()
    }

    /// Compact prompt context for one camera; empty when unknown.
    pub fn context_string(&self, camera_id: &CameraId) -> String {
        self.snapshot(camera_id)
            .map(|s| s.context_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_updates_only_target_camera() {
        let registry = SceneRegistry::new();
        let a = CameraId::new("a");
        let b = CameraId::new("b");
        registry.register(a.clone());
        registry.register(b.clone());

        let analysis = SceneAnalysis {
            summary: Some("a kitchen".into()),
            ..Default::default()
        };
        let entry = registry.apply(&a, &analysis, "fallback", Utc::now());
        assert_eq!(entry.unwrap().description, "fallback");

        assert_eq!(registry.snapshot(&a).unwrap().summary, "a kitchen");
        assert_eq!(registry.snapshot(&b).unwrap().update_count, 0);
        assert!(registry.apply(&CameraId::new("ghost"), &analysis, "", Utc::now()).is_none());
    }
}
