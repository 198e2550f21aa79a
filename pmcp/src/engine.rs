//! The engine: explicit shared context for every component.
//!
//! One `Engine` value owns the stores, counters, provider slot and camera
//! registry; perception loops, the HTTP surface and the CLI all receive an
//! `Arc<Engine>` instead of reaching for globals.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{error, info, warn};

use pmcp_camera::{FrameGrabber, FrameSource, HttpSnapshotGrabber, SyntheticGrabber};
use pmcp_config_data::{CameraConfig, CameraKind, PmcpConfig, ReasoningConfig};
use pmcp_http_video_streaming::MjpegHub;
use pmcp_types::{
    AlertEvent, CameraHealth, CameraId, ConfigureProviderResponse, EventType,
    NotificationTarget, ReasoningMode, ReportedEvaluation,
};

use crate::alert_log::AlertLog;
use crate::changes::ChangeFeed;
use crate::memory::MemoryStore;
use crate::notify::{Notifier, NotifierTask};
use crate::pending::PendingQueue;
use crate::provider::{build_provider, VlmProvider};
use crate::rules::RuleStore;
use crate::scene::SceneRegistry;
use crate::stats::ApiStats;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("camera not found: {0}")]
    CameraNotFound(CameraId),
    #[error("camera already registered: {0}")]
    CameraExists(CameraId),
    #[error(transparent)]
    Camera(#[from] pmcp_camera::Error),
    #[error(transparent)]
    Rules(#[from] crate::rules::Error),
    #[error(transparent)]
    Provider(#[from] crate::provider::ProviderError),
    #[error("pending alert not found: {0}")]
    PendingNotFound(String),
}

/// Everything the perception loop needs about one live camera.
pub struct CameraRuntime {
    pub config: CameraConfig,
    pub source: RwLock<FrameSource>,
    pub health: Mutex<CameraHealth>,
    /// Last sampler decision, for `/health` observability.
    pub last_gate_reason: Mutex<&'static str>,
}

pub struct Engine {
    pub config: PmcpConfig,
    reasoning: RwLock<ReasoningConfig>,
    provider: RwLock<Option<Arc<dyn VlmProvider>>>,
    pub rules: RuleStore,
    pub alert_log: AlertLog,
    pub pending: PendingQueue,
    pub stats: ApiStats,
    pub memory: MemoryStore,
    pub scenes: SceneRegistry,
    pub changes: ChangeFeed,
    pub mjpeg: MjpegHub,
    pub notifier: Notifier,
    notifier_join: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cameras: RwLock<BTreeMap<CameraId, Arc<CameraRuntime>>>,
    loop_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Assemble the engine from validated config. Does not open cameras or
    /// bind sockets; see [`Engine::startup`].
    pub fn new(config: PmcpConfig) -> Result<Arc<Self>> {
        let rules = RuleStore::open(config.rules_path())?;
        let alert_log = AlertLog::default().with_durable_file(&config.alert_log_path());
        let memory = MemoryStore::open(config.memory_path());

        let provider = build_provider(&config.reasoning)?;
        let reasoning = config.reasoning.clone();

        let NotifierTask { notifier, join } = Notifier::spawn(config.notifications.clone());

        let stats = ApiStats::new();
        if let Some(p) = &provider {
            stats.set_model_tag(format!("{}/{}", p.provider_name(), p.model_name()));
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            reasoning: RwLock::new(reasoning),
            provider: RwLock::new(provider),
            rules,
            alert_log,
            pending: PendingQueue::new(),
            stats,
            memory,
            scenes: SceneRegistry::new(),
            changes: ChangeFeed::new(),
            mjpeg: MjpegHub::new(),
            notifier,
            notifier_join: Mutex::new(Some(join)),
            cameras: RwLock::new(BTreeMap::new()),
            loop_handles: Mutex::new(Vec::new()),
            shutdown_tx,
        }))
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn provider(&self) -> Option<Arc<dyn VlmProvider>> {
        self.provider.read().clone()
    }

    pub fn reasoning_mode(&self) -> ReasoningMode {
        if self.provider.read().is_some() {
            ReasoningMode::Server
        } else {
            ReasoningMode::Client
        }
    }

    pub fn reasoning_config(&self) -> ReasoningConfig {
        self.reasoning.read().clone()
    }

    /// Open configured cameras and start their loops; emit the startup
    /// warning when running without a provider.
    pub async fn startup(self: &Arc<Self>) {
        if self.provider().is_none() {
            let event = AlertEvent::new(
                EventType::StartupWarning,
                "No vision provider configured; running in client-side fallback \
                 mode. Configure a provider (reasoning.provider) for on-device \
                 rule evaluation.",
            );
            self.record_alert(event);
        }

        let configs: Vec<CameraConfig> = self
            .config
            .cameras
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        for cam in configs {
            if let Err(e) = self.open_camera(cam.clone()).await {
                error!("camera {} failed to open: {e}", cam.id);
                let mut event = AlertEvent::new(
                    EventType::StartupWarning,
                    format!("camera {} unavailable at startup: {e}", cam.id),
                );
                event.camera_id = cam.id.clone();
                event.camera_name = cam.display_name().to_string();
                self.record_alert(event);
            }
        }
    }

    /// Open one camera and spawn its perception loop. Used at startup and by
    /// `POST /cameras/open`.
    pub async fn open_camera(self: &Arc<Self>, config: CameraConfig) -> Result<Arc<CameraRuntime>> {
        if self.cameras.read().contains_key(&config.id) {
            return Err(EngineError::CameraExists(config.id));
        }

        let grabber = make_grabber(&config)?;
        let source = FrameSource::open(
            config.id.clone(),
            grabber,
            config.fps,
            pmcp_camera::DEFAULT_OPEN_TIMEOUT,
        )
        .await?;

        self.mjpeg.register(config.id.clone());
        self.scenes.register(config.id.clone());

        let runtime = Arc::new(CameraRuntime {
            config: config.clone(),
            source: RwLock::new(source),
            health: Mutex::new(CameraHealth::default()),
            last_gate_reason: Mutex::new("startup"),
        });
        self.cameras
            .write()
            .insert(config.id.clone(), runtime.clone());

        let engine = self.clone();
        let loop_runtime = runtime.clone();
        let handle = tokio::spawn(async move {
            crate::perception::perception_loop(engine, loop_runtime).await;
        });
        self.loop_handles.lock().push(handle);

        info!("camera {} open ({})", config.id, config.display_name());
        Ok(runtime)
    }

    pub fn camera(&self, id: &CameraId) -> Option<Arc<CameraRuntime>> {
        self.cameras.read().get(id).cloned()
    }

    /// One camera when `id` is given, else the first registered camera.
    pub fn camera_or_default(&self, id: Option<&CameraId>) -> Option<Arc<CameraRuntime>> {
        match id {
            Some(id) => self.camera(id),
            None => self.cameras.read().values().next().cloned(),
        }
    }

    pub fn cameras_snapshot(&self) -> Vec<Arc<CameraRuntime>> {
        self.cameras.read().values().cloned().collect()
    }

    /// Health for every configured camera; configured-but-unopened cameras
    /// show up as offline.
    pub fn health_map(&self) -> BTreeMap<CameraId, CameraHealth> {
        let mut map: BTreeMap<CameraId, CameraHealth> = self
            .config
            .cameras
            .iter()
            .map(|c| {
                let mut h = CameraHealth::default();
                h.mark_offline();
                (c.id.clone(), h)
            })
            .collect();
        for (id, runtime) in self.cameras.read().iter() {
            map.insert(id.clone(), runtime.health.lock().clone());
        }
        map
    }

    /// Rules that name a camera the engine does not know; surfaced in
    /// `/health` warnings. Such rules stay in the store but never trigger.
    pub fn unreachable_rule_warnings(&self) -> Vec<String> {
        let known: std::collections::BTreeSet<CameraId> = self
            .cameras
            .read()
            .keys()
            .cloned()
            .chain(self.config.cameras.iter().map(|c| c.id.clone()))
            .collect();
        self.rules
            .snapshot()
            .iter()
            .filter(|r| !r.camera_id.is_empty() && !known.contains(&r.camera_id))
            .map(|r| {
                format!(
                    "rule {} ({}) watches unknown camera {}",
                    r.id, r.name, r.camera_id
                )
            })
            .collect()
    }

    /// Append to the alert log (assigning id/timestamp and emitting the
    /// PMCP correlation line when applicable).
    pub fn record_alert(&self, event: AlertEvent) -> AlertEvent {
        self.alert_log.append(event)
    }

    /// Record and route to notification channels.
    pub fn record_and_notify(
        &self,
        event: AlertEvent,
        target: NotificationTarget,
        thumbnail: Option<bytes::Bytes>,
    ) -> AlertEvent {
        let stored = self.record_alert(event);
        self.notifier.dispatch(stored.clone(), target, thumbnail);
        stored
    }

    /// Runtime provider switch. A server-to-client downgrade emits the
    /// runtime-switch warning; the response reports whether it did.
    pub fn configure_provider(&self, new_cfg: ReasoningConfig) -> Result<ConfigureProviderResponse> {
        let new_provider = build_provider(&new_cfg)?;
        let had_provider = self.provider.read().is_some();
        let downgraded = had_provider && new_provider.is_none();

        let (provider_name, model_name) = match &new_provider {
            Some(p) => (
                p.provider_name().to_string(),
                p.model_name().to_string(),
            ),
            None => ("none".to_string(), String::new()),
        };
        if new_provider.is_some() {
            self.stats
                .set_model_tag(format!("{provider_name}/{model_name}"));
        }

        *self.provider.write() = new_provider;
        *self.reasoning.write() = new_cfg;

        let mut warning_emitted = false;
        let mut warning_reason = String::new();
        if downgraded {
            warning_emitted = true;
            warning_reason = "runtime_switch".to_string();
            let event = AlertEvent::new(
                EventType::StartupWarning,
                "Vision provider removed at runtime; switching to client-side \
                 fallback mode until a provider is configured again.",
            );
            self.record_alert(event);
        }

        info!(
            "provider configured: {provider_name} (mode now {:?})",
            self.reasoning_mode()
        );
        Ok(ConfigureProviderResponse {
            provider: provider_name,
            model: model_name,
            reasoning_mode: self.reasoning_mode(),
            fallback_warning_emitted: warning_emitted,
            fallback_warning_reason: warning_reason,
        })
    }

    /// Install an already-built provider, bypassing config. Used by the MCP
    /// surface and by tests that drive the loop with a mock.
    pub fn install_provider(&self, provider: Option<Arc<dyn VlmProvider>>) {
        if let Some(p) = &provider {
            self.stats
                .set_model_tag(format!("{}/{}", p.provider_name(), p.model_name()));
        }
        *self.provider.write() = provider;
    }

    /// Client-side evaluation results arriving via `report_rule_evaluation`.
    pub fn report_rule_evaluation(&self, report: ReportedEvaluation) -> Result<Vec<AlertEvent>> {
        let pending = self
            .pending
            .take(&report.event_id)
            .ok_or_else(|| EngineError::PendingNotFound(report.event_id.clone()))?;

        let now = Utc::now();
        let alerts = crate::rules::evaluate(
            &self.rules,
            &report.evaluations,
            self.config.perception.confidence_floor,
            &pending.camera_id,
            &pending.camera_name,
            Some(pending.thumbnail.clone()),
            now,
        );

        let delivered: Vec<AlertEvent> = alerts
            .into_iter()
            .map(|event| {
                let target = self
                    .rules
                    .get(&event.rule_id)
                    .map(|r| r.notification)
                    .unwrap_or_default();
                self.record_and_notify(event, target, None)
            })
            .collect();
        Ok(delivered)
    }

    /// Orderly shutdown: stop loops at their tick boundary, flush stores,
    /// close cameras, then give deliveries a grace period.
    pub async fn shutdown(&self, grace: Duration) {
        info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = self.loop_handles.lock().drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(35), handle)
                .await
                .is_err()
            {
                warn!("perception loop did not stop within its in-flight timeout");
            }
        }

        if let Err(e) = self.rules.save() {
            warn!("failed saving rules during shutdown: {e}");
        }
        self.memory.flush();

        self.cameras.write().clear();

        if let Some(join) = self.notifier_join.lock().take() {
            // Give in-flight deliveries the grace period, then cut them off.
            tokio::time::sleep(grace).await;
            join.abort();
        }
        info!("shutdown complete");
    }
}

/// Build the capture backend for one camera config.
pub(crate) fn make_grabber(config: &CameraConfig) -> Result<Box<dyn FrameGrabber>> {
    // The synthetic source works for any kind; handy for demos and tests.
    if config.device == "synthetic" {
        let (w, h) = (
            config.width.unwrap_or(640),
            config.height.unwrap_or(480),
        );
        return Ok(Box::new(SyntheticGrabber::new(w, h)));
    }

    match config.kind {
        CameraKind::Http => Ok(Box::new(HttpSnapshotGrabber::new(
            config.device.clone(),
            Duration::from_secs(5),
        )?)),
        #[cfg(feature = "backend_v4l")]
        CameraKind::Usb => {
            let index: usize = config.device.parse().unwrap_or(0);
            Ok(Box::new(pmcp_camera::V4lGrabber::new(
                index,
                config.width.unwrap_or(1280),
                config.height.unwrap_or(720),
            )))
        }
        #[cfg(not(feature = "backend_v4l"))]
        CameraKind::Usb => Err(EngineError::Camera(pmcp_camera::Error::NotAvailable(
            "USB capture requires the backend_v4l feature".into(),
        ))),
        #[cfg(feature = "backend_rtsp")]
        CameraKind::Rtsp => Ok(Box::new(pmcp_camera::RtspGrabber::open(&config.device)?)),
        #[cfg(not(feature = "backend_rtsp"))]
        CameraKind::Rtsp => Err(EngineError::Camera(pmcp_camera::Error::NotAvailable(
            "RTSP capture requires the backend_rtsp feature".into(),
        ))),
    }
}

/// Channel target for system events (startup warnings and such): the
/// configured default channel, with `none` meaning log only.
pub fn system_target(config: &PmcpConfig) -> NotificationTarget {
    NotificationTarget {
        channel: config.notifications.default_channel,
        routing: None,
    }
}
