//! Analyze-or-skip gating (the frame sampler).
//!
//! Evaluated in order, first match wins:
//! 1. budget or rate cap reached, or the provider is backing off -> skip
//! 2. no relevant rule and heartbeat disabled -> skip
//! 3. MAJOR change outside the analysis cooldown -> analyze now
//! 4. MODERATE change sustained through the debounce window -> analyze
//! 5. quiet scene but the heartbeat interval elapsed -> analyze
//! 6. otherwise skip
//!
//! Timers are per camera; the chosen reason is exposed for observability.

use std::time::Instant;

use pmcp_change_detector::{ChangeLevel, ChangeResult};
use pmcp_config_data::PerceptionConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Analyze { reason: &'static str },
    Skip { reason: &'static str },
}

impl GateDecision {
    pub fn reason(&self) -> &'static str {
        match self {
            GateDecision::Analyze { reason } | GateDecision::Skip { reason } => reason,
        }
    }

    pub fn is_analyze(&self) -> bool {
        matches!(self, GateDecision::Analyze { .. })
    }
}

#[derive(Debug)]
pub struct FrameSampler {
    analysis_cooldown_seconds: u64,
    debounce_seconds: u64,
    heartbeat_seconds: u64,
    last_analysis: Option<Instant>,
    debounce_started: Option<Instant>,
}

impl FrameSampler {
    pub fn new(cfg: &PerceptionConfig) -> Self {
        Self {
            analysis_cooldown_seconds: cfg.analysis_cooldown_seconds,
            debounce_seconds: cfg.debounce_seconds,
            heartbeat_seconds: cfg.heartbeat_seconds,
            last_analysis: None,
            debounce_started: None,
        }
    }

    fn heartbeat_enabled(&self) -> bool {
        self.heartbeat_seconds > 0
    }

    fn seconds_since_last_analysis(&self, now: Instant) -> Option<u64> {
        self.last_analysis
            .map(|t| now.duration_since(t).as_secs())
    }

    /// Decide whether to analyze this frame.
    pub fn gate(
        &mut self,
        change: &ChangeResult,
        have_rules: bool,
        budget_ok: bool,
        provider_backing_off: bool,
        now: Instant,
    ) -> GateDecision {
        // Keep the debounce timer tracking sustained change regardless of
        // which gate fires; MINOR and NONE break the streak.
        if change.level >= ChangeLevel::Moderate {
            self.debounce_started.get_or_insert(now);
        } else {
            self.debounce_started = None;
        }

        if provider_backing_off {
            return GateDecision::Skip {
                reason: "skip:backoff",
            };
        }
        if !budget_ok {
            return GateDecision::Skip {
                reason: "skip:budget",
            };
        }
        if !have_rules && !self.heartbeat_enabled() {
            return GateDecision::Skip {
                reason: "skip:no_rules",
            };
        }

        let since_last = self.seconds_since_last_analysis(now);

        if change.level == ChangeLevel::Major {
            // None means no analysis yet, which counts as "long ago".
            if since_last.map_or(true, |s| s > self.analysis_cooldown_seconds) {
                self.mark_analyzed(now);
                return GateDecision::Analyze { reason: "major" };
            }
            return GateDecision::Skip {
                reason: "skip:cooldown",
            };
        }

        if change.level == ChangeLevel::Moderate {
            let sustained = self
                .debounce_started
                .map_or(false, |t| now.duration_since(t).as_secs() >= self.debounce_seconds);
            if sustained {
                self.mark_analyzed(now);
                return GateDecision::Analyze {
                    reason: "moderate_debounced",
                };
            }
            return GateDecision::Skip {
                reason: "skip:debounce",
            };
        }

        // MINOR or NONE.
        if self.heartbeat_enabled()
            && since_last.map_or(true, |s| s >= self.heartbeat_seconds)
        {
            self.mark_analyzed(now);
            return GateDecision::Analyze {
                reason: "heartbeat",
            };
        }

        GateDecision::Skip {
            reason: "skip:quiet",
        }
    }

    fn mark_analyzed(&mut self, now: Instant) {
        self.last_analysis = Some(now);
        self.debounce_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg(cooldown: u64, debounce: u64, heartbeat: u64) -> PerceptionConfig {
        PerceptionConfig {
            analysis_cooldown_seconds: cooldown,
            debounce_seconds: debounce,
            heartbeat_seconds: heartbeat,
            ..Default::default()
        }
    }

    fn change(level: ChangeLevel) -> ChangeResult {
        ChangeResult {
            distance: 0,
            level,
            description: String::new(),
        }
    }

    #[test]
    fn budget_and_backoff_win_over_everything() {
        let mut sampler = FrameSampler::new(&cfg(10, 3, 120));
        let now = Instant::now();
        let d = sampler.gate(&change(ChangeLevel::Major), true, false, false, now);
        assert_eq!(d, GateDecision::Skip { reason: "skip:budget" });
        let d = sampler.gate(&change(ChangeLevel::Major), true, true, true, now);
        assert_eq!(d, GateDecision::Skip { reason: "skip:backoff" });
    }

    #[test]
    fn no_rules_and_no_heartbeat_skips() {
        let mut sampler = FrameSampler::new(&cfg(10, 3, 0));
        let d = sampler.gate(&change(ChangeLevel::Major), false, true, false, Instant::now());
        assert_eq!(d, GateDecision::Skip { reason: "skip:no_rules" });
    }

    #[test]
    fn major_analyzes_then_respects_cooldown() {
        let mut sampler = FrameSampler::new(&cfg(10, 3, 0));
        let t0 = Instant::now();
        let d = sampler.gate(&change(ChangeLevel::Major), true, true, false, t0);
        assert_eq!(d, GateDecision::Analyze { reason: "major" });

        let t1 = t0 + Duration::from_secs(5);
        let d = sampler.gate(&change(ChangeLevel::Major), true, true, false, t1);
        assert_eq!(d, GateDecision::Skip { reason: "skip:cooldown" });

        let t2 = t0 + Duration::from_secs(11);
        let d = sampler.gate(&change(ChangeLevel::Major), true, true, false, t2);
        assert_eq!(d, GateDecision::Analyze { reason: "major" });
    }

    #[test]
    fn moderate_needs_sustained_debounce() {
        let mut sampler = FrameSampler::new(&cfg(10, 3, 0));
        let t0 = Instant::now();
        let d = sampler.gate(&change(ChangeLevel::Moderate), true, true, false, t0);
        assert_eq!(d, GateDecision::Skip { reason: "skip:debounce" });

        // Still moderate one second in: not yet.
        let t1 = t0 + Duration::from_secs(1);
        let d = sampler.gate(&change(ChangeLevel::Moderate), true, true, false, t1);
        assert_eq!(d, GateDecision::Skip { reason: "skip:debounce" });

        // Sustained past the window: analyze.
        let t2 = t0 + Duration::from_secs(3);
        let d = sampler.gate(&change(ChangeLevel::Moderate), true, true, false, t2);
        assert_eq!(d, GateDecision::Analyze { reason: "moderate_debounced" });
    }

    #[test]
    fn debounce_streak_broken_by_quiet_frame() {
        let mut sampler = FrameSampler::new(&cfg(10, 3, 0));
        let t0 = Instant::now();
        sampler.gate(&change(ChangeLevel::Moderate), true, true, false, t0);
        // A NONE frame resets the streak...
        sampler.gate(&change(ChangeLevel::None), true, true, false, t0 + Duration::from_secs(1));
        // ...so 3 s after t0 the moderate change has not been sustained.
        let d = sampler.gate(
            &change(ChangeLevel::Moderate),
            true,
            true,
            false,
            t0 + Duration::from_secs(3),
        );
        assert_eq!(d, GateDecision::Skip { reason: "skip:debounce" });
    }

    #[test]
    fn heartbeat_fires_on_quiet_scene() {
        let mut sampler = FrameSampler::new(&cfg(10, 3, 60));
        let t0 = Instant::now();
        // First quiet frame with no prior analysis: heartbeat.
        let d = sampler.gate(&change(ChangeLevel::None), false, true, false, t0);
        assert_eq!(d, GateDecision::Analyze { reason: "heartbeat" });

        let d = sampler.gate(
            &change(ChangeLevel::Minor),
            false,
            true,
            false,
            t0 + Duration::from_secs(30),
        );
        assert_eq!(d, GateDecision::Skip { reason: "skip:quiet" });

        let d = sampler.gate(
            &change(ChangeLevel::None),
            false,
            true,
            false,
            t0 + Duration::from_secs(61),
        );
        assert_eq!(d, GateDecision::Analyze { reason: "heartbeat" });
    }

    #[test]
    fn heartbeat_zero_means_disabled() {
        let mut sampler = FrameSampler::new(&cfg(10, 3, 0));
        let t0 = Instant::now();
        // Rules exist, scene quiet, heartbeat off: never analyze.
        for s in 0..300 {
            let d = sampler.gate(
                &change(ChangeLevel::None),
                true,
                true,
                false,
                t0 + Duration::from_secs(s),
            );
            assert!(!d.is_analyze());
        }
    }
}
