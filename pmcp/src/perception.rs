//! The per-camera perception loop.
//!
//! One loop per camera: capture, change-detect against the last analyzed
//! frame, select active rules, gate, then either skip, enqueue a pending
//! client-side evaluation, or call the VLM and evaluate rules. Provider
//! failures feed an exponential backoff (5 s doubling to 300 s) without
//! ever terminating the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use pmcp_camera::FrameSource;
use pmcp_change_detector::{ChangeDetector, ChangeResult, Thresholds};
use pmcp_types::{AlertEvent, EventType, Frame, PendingAlert};

use crate::changes::ChangeRecord;
use crate::engine::{system_target, CameraRuntime, Engine};
use crate::imutil;
use crate::sampler::{FrameSampler, GateDecision};
use crate::stats::DEFAULT_COST_PER_CALL_USD;

/// Provider failure backoff: initial and ceiling delays.
const PROVIDER_BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const PROVIDER_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Capture failure pacing inside the loop.
const CAPTURE_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const CAPTURE_BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Try to reopen the frame source every this many consecutive failures...
const REOPEN_EVERY_FAILURES: u32 = 5;
/// ...and declare the camera offline after this many.
const OFFLINE_AFTER_FAILURES: u32 = 15;

#[derive(Debug)]
struct ProviderBackoff {
    delay: Duration,
    until: Option<Instant>,
}

impl ProviderBackoff {
    fn new() -> Self {
        Self {
            delay: PROVIDER_BACKOFF_INITIAL,
            until: None,
        }
    }

    fn active(&self, now: Instant) -> bool {
        self.until.map_or(false, |t| t > now)
    }

    /// Schedule the next window and double the delay.
    fn bump(&mut self, now: Instant) -> Duration {
        let applied = self.delay;
        self.until = Some(now + applied);
        self.delay = (self.delay * 2).min(PROVIDER_BACKOFF_CAP);
        applied
    }

    fn reset(&mut self) {
        self.delay = PROVIDER_BACKOFF_INITIAL;
        self.until = None;
    }
}

pub async fn perception_loop(engine: Arc<Engine>, camera: Arc<CameraRuntime>) {
    let camera_id = camera.config.id.clone();
    let camera_name = camera.config.display_name().to_string();
    let perception = engine.config.perception.clone();

    let thresholds = Thresholds {
        minor: perception.minor_threshold,
        moderate: perception.moderate_threshold,
        major: perception.major_threshold,
    };
    let mut detector = ChangeDetector::new(thresholds);
    let mut sampler = FrameSampler::new(&perception);
    let mut provider_backoff = ProviderBackoff::new();

    let tick = Duration::from_secs_f64((1.0 / camera.config.fps).min(1.0));
    let mut capture_backoff = CAPTURE_BACKOFF_INITIAL;
    let mut capture_failures: u32 = 0;

    let mut shutdown_rx = engine.shutdown_signal();

    info!(camera = %camera_id, "perception loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let frame = { camera.source.read().grab_frame() };
        let frame = match frame {
            Ok(frame) => {
                capture_failures = 0;
                capture_backoff = CAPTURE_BACKOFF_INITIAL;
                frame
            }
            Err(e) => {
                capture_failures += 1;
                debug!(camera = %camera_id, "no fresh frame: {e}");
                {
                    let mut health = camera.health.lock();
                    health.record_error(None);
                    if capture_failures >= OFFLINE_AFTER_FAILURES {
                        health.mark_offline();
                    }
                }
                if capture_failures % REOPEN_EVERY_FAILURES == 0 {
                    try_reopen(&camera).await;
                }
                if sleep_or_shutdown(&mut shutdown_rx, capture_backoff).await {
                    break;
                }
                capture_backoff = (capture_backoff * 2).min(CAPTURE_BACKOFF_CAP);
                continue;
            }
        };

        camera.health.lock().record_frame(Utc::now());
        engine.mjpeg.publish(frame.clone());

        let (hash, change) = match detector.assess(&frame.jpeg) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(camera = %camera_id, "change detection failed: {e}");
                if sleep_or_shutdown(&mut shutdown_rx, tick).await {
                    break;
                }
                continue;
            }
        };

        engine.rules.maybe_hot_reload();
        let now_utc = Utc::now();
        let active_rules = engine.rules.active_for(&camera_id, now_utc);

        let now = Instant::now();
        let budget_ok = engine
            .stats
            .budget_allows(&engine.config.cost_control, now_utc);
        let decision = sampler.gate(
            &change,
            !active_rules.is_empty(),
            budget_ok,
            provider_backoff.active(now),
            now,
        );
        *camera.last_gate_reason.lock() = decision.reason();

        if let GateDecision::Analyze { reason } = decision {
            debug!(camera = %camera_id, reason, distance = change.distance, "analyzing frame");
            match engine.provider() {
                None => {
                    enqueue_pending(&engine, &camera, &frame, &change, &active_rules);
                    detector.commit(hash);
                }
                Some(provider) => {
                    let analyzed = analyze_and_evaluate(
                        &engine,
                        &camera,
                        provider.as_ref(),
                        &frame,
                        &change,
                        &active_rules,
                        &camera_name,
                        &mut provider_backoff,
                    )
                    .await;
                    if analyzed {
                        detector.commit(hash);
                    }
                }
            }
        }

        if sleep_or_shutdown(&mut shutdown_rx, tick).await {
            break;
        }
    }

    info!(camera = %camera_id, "perception loop stopped");
}

/// Sleep for `period`, returning true when shutdown arrived instead.
async fn sleep_or_shutdown(
    shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
    period: Duration,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}

async fn try_reopen(camera: &Arc<CameraRuntime>) {
    info!(camera = %camera.config.id, "attempting to reopen frame source");
    let reopened: Result<FrameSource, crate::engine::EngineError> = async {
        let grabber = crate::engine::make_grabber(&camera.config)?;
        Ok(FrameSource::open(
            camera.config.id.clone(),
            grabber,
            camera.config.fps,
            pmcp_camera::DEFAULT_OPEN_TIMEOUT,
        )
        .await?)
    }
    .await;

    match reopened {
        Ok(source) => {
            info!(camera = %camera.config.id, "frame source reopened");
            let old = std::mem::replace(&mut *camera.source.write(), source);
            old.close();
        }
        Err(e) => {
            warn!(camera = %camera.config.id, "reopen failed: {e}");
        }
    }
}

/// Client-side mode: park the frame and candidates for an external
/// evaluator.
fn enqueue_pending(
    engine: &Arc<Engine>,
    camera: &Arc<CameraRuntime>,
    frame: &Arc<Frame>,
    change: &ChangeResult,
    active_rules: &[pmcp_types::WatchRule],
) {
    let thumbnail = imutil::thumbnail_jpeg(&frame.jpeg)
        .map(|b| imutil::to_base64(&b))
        .unwrap_or_default();

    let mut event = AlertEvent::new(
        EventType::CameraAlertPendingEval,
        format!(
            "frame awaiting client-side evaluation ({} candidate rule(s); {})",
            active_rules.len(),
            change.description
        ),
    );
    event.camera_id = camera.config.id.clone();
    event.camera_name = camera.config.display_name().to_string();
    event.frame_ref = Some(thumbnail.clone());
    let stored = engine.record_alert(event);

    engine.pending.enqueue(PendingAlert {
        event_id: stored.event_id,
        camera_id: camera.config.id.clone(),
        camera_name: camera.config.display_name().to_string(),
        created_at: Utc::now(),
        thumbnail,
        candidate_rules: active_rules.to_vec(),
    });
    camera.health.lock().record_success(Utc::now());
}

/// Server-side mode: analyze the scene, then evaluate active rules.
/// Returns true when the analysis succeeded (and the frame hash should
/// become the new baseline).
#[allow(clippy::too_many_arguments)]
async fn analyze_and_evaluate(
    engine: &Arc<Engine>,
    camera: &Arc<CameraRuntime>,
    provider: &dyn crate::provider::VlmProvider,
    frame: &Arc<Frame>,
    change: &ChangeResult,
    active_rules: &[pmcp_types::WatchRule],
    camera_name: &str,
    provider_backoff: &mut ProviderBackoff,
) -> bool {
    let camera_id = &camera.config.id;
    let prior_context = engine.scenes.context_string(camera_id);

    let analysis = provider.analyze_scene(&frame.jpeg, &prior_context).await;
    let analysis = match analysis {
        Ok(analysis) => {
            engine
                .stats
                .record_call(DEFAULT_COST_PER_CALL_USD, Utc::now());
            analysis
        }
        Err(e) => {
            handle_provider_error(engine, camera, camera_name, provider_backoff, &e);
            return false;
        }
    };

    let now = Utc::now();
    if let Some(entry) = engine
        .scenes
        .apply(camera_id, &analysis, &change.description, now)
    {
        engine.changes.publish(ChangeRecord {
            camera_id: camera_id.clone(),
            timestamp: entry.timestamp,
            description: entry.description,
        });
    }

    if !active_rules.is_empty() {
        let scene_context = engine.scenes.context_string(camera_id);
        match provider
            .evaluate_rules(&frame.jpeg, active_rules, &scene_context)
            .await
        {
            Ok(evaluations) => {
                engine
                    .stats
                    .record_call(DEFAULT_COST_PER_CALL_USD, Utc::now());
                let thumbnail = imutil::thumbnail_jpeg(&frame.jpeg).ok();
                let frame_ref = thumbnail.as_ref().map(|b| imutil::to_base64(b));
                let alerts = crate::rules::evaluate(
                    &engine.rules,
                    &evaluations,
                    engine.config.perception.confidence_floor,
                    camera_id,
                    camera_name,
                    frame_ref,
                    Utc::now(),
                );
                for alert in alerts {
                    let target = engine
                        .rules
                        .get(&alert.rule_id)
                        .map(|r| r.notification)
                        .unwrap_or_default();
                    engine.record_and_notify(alert, target, thumbnail.clone());
                }
            }
            Err(e) => {
                handle_provider_error(engine, camera, camera_name, provider_backoff, &e);
                // Scene analysis already landed; keep the new baseline.
                return true;
            }
        }
    }

    camera.health.lock().record_success(Utc::now());
    provider_backoff.reset();
    true
}

fn handle_provider_error(
    engine: &Arc<Engine>,
    camera: &Arc<CameraRuntime>,
    camera_name: &str,
    provider_backoff: &mut ProviderBackoff,
    error: &crate::provider::ProviderError,
) {
    let applied = provider_backoff.bump(Instant::now());
    let backoff_until =
        Utc::now() + chrono::Duration::from_std(applied).unwrap_or_else(|_| chrono::Duration::zero());
    camera.health.lock().record_error(Some(backoff_until));

    warn!(
        camera = %camera.config.id,
        "provider error ({error}); backing off {applied:?}"
    );

    let kind = if error.is_bad_json() {
        "provider_bad_json"
    } else {
        "provider_error"
    };
    let mut event = AlertEvent::new(
        EventType::ProviderError,
        format!("{kind}: {error} (next attempt in {applied:?})"),
    );
    event.camera_id = camera.config.id.clone();
    event.camera_name = camera_name.to_string();
    engine.record_and_notify(event, system_target(&engine.config), None);
}
