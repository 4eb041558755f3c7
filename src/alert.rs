//! Temporal smoothing and rate limiting of hazard alerts.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::risk::{LevelTable, RiskAssessment, RiskLevel, RiskTarget};

/// Voice assistant activity as reported by the external assistant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStatus {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl VoiceStatus {
    pub fn is_idle(self) -> bool {
        self == VoiceStatus::Idle
    }
}

impl std::str::FromStr for VoiceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(VoiceStatus::Idle),
            "listening" => Ok(VoiceStatus::Listening),
            "processing" => Ok(VoiceStatus::Processing),
            "speaking" => Ok(VoiceStatus::Speaking),
            other => Err(anyhow!("unknown voice status {other:?}")),
        }
    }
}

/// Hysteresis over the raw per-frame level.
///
/// `on_threshold` consecutive alerting frames are needed to raise (or re-arm) the
/// stable output; `off_threshold` consecutive clear frames are needed to drop it.
/// In between, the last stable output is held.
#[derive(Clone, Debug)]
pub struct StabilityFilter {
    on_threshold: u32,
    off_threshold: u32,
    on_count: u32,
    off_count: u32,
    stable: RiskAssessment,
}

impl StabilityFilter {
    pub fn new(on_threshold: u32, off_threshold: u32) -> Result<Self> {
        if on_threshold == 0 || off_threshold == 0 {
            return Err(anyhow!("stability thresholds must be at least 1"));
        }
        if on_threshold > off_threshold {
            return Err(anyhow!(
                "on threshold ({on_threshold}) must not exceed off threshold ({off_threshold})"
            ));
        }
        Ok(Self {
            on_threshold,
            off_threshold,
            on_count: 0,
            off_count: 0,
            stable: RiskAssessment::default(),
        })
    }

    /// Feed one raw assessment; returns the stable output after the update.
    pub fn update(&mut self, raw: &RiskAssessment) -> &RiskAssessment {
        if raw.level.is_alert() {
            self.on_count = self.on_count.saturating_add(1);
            self.off_count = 0;
            if self.on_count >= self.on_threshold {
                self.stable = raw.clone();
            }
        } else {
            self.off_count = self.off_count.saturating_add(1);
            self.on_count = 0;
            if self.off_count >= self.off_threshold {
                self.stable = RiskAssessment::default();
            }
        }
        &self.stable
    }

    pub fn stable(&self) -> &RiskAssessment {
        &self.stable
    }

    pub fn stable_level(&self) -> RiskLevel {
        self.stable.level
    }

    pub fn stable_target(&self) -> Option<&RiskTarget> {
        self.stable.target.as_ref()
    }

    pub fn counters(&self) -> (u32, u32) {
        (self.on_count, self.off_count)
    }
}

/// Per-level cooldown plus a global minimum spacing between any two alerts.
#[derive(Clone, Debug)]
pub struct NotificationGate {
    cooldown: LevelTable<Duration>,
    repeat_min: LevelTable<Duration>,
    last_alert: [Option<Instant>; 3],
    last_emit: Option<Instant>,
}

/// External conditions that can hold an alert back.
#[derive(Clone, Copy, Debug, Default)]
pub struct GateContext {
    pub voice: VoiceStatus,
    pub search_active: bool,
}

impl NotificationGate {
    pub fn new(cooldown: LevelTable<Duration>, repeat_min: LevelTable<Duration>) -> Self {
        Self {
            cooldown,
            repeat_min,
            last_alert: [None; 3],
            last_emit: None,
        }
    }

    /// Whether an alert for `level` may go out at `now`. Does not record anything.
    pub fn permits(&self, level: RiskLevel, ctx: GateContext, now: Instant) -> bool {
        if !level.is_alert() || !ctx.voice.is_idle() || ctx.search_active {
            return false;
        }
        let (Some(cooldown), Some(repeat)) = (self.cooldown.get(level), self.repeat_min.get(level))
        else {
            return false;
        };
        let since = |at: Option<Instant>, min: Duration| match at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= min,
        };
        since(self.last_alert[slot(level)], cooldown) && since(self.last_emit, repeat)
    }

    /// Record an emission of `level` at `now`.
    pub fn commit(&mut self, level: RiskLevel, now: Instant) {
        if level.is_alert() {
            self.last_alert[slot(level)] = Some(now);
            self.last_emit = Some(now);
        }
    }

    pub fn last_emit(&self) -> Option<Instant> {
        self.last_emit
    }
}

fn slot(level: RiskLevel) -> usize {
    level.as_u8().saturating_sub(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(level: u8) -> RiskAssessment {
        let level = RiskLevel::from_u8(level);
        RiskAssessment {
            level,
            text: if level.is_alert() { format!("L{}", level.as_u8()) } else { String::new() },
            target: None,
        }
    }

    fn default_gate() -> NotificationGate {
        let secs = |a: f64, b: f64, c: f64| {
            LevelTable::new(
                Duration::from_secs_f64(a),
                Duration::from_secs_f64(b),
                Duration::from_secs_f64(c),
            )
        };
        NotificationGate::new(secs(2.0, 1.0, 0.4), secs(5.0, 3.0, 2.0))
    }

    #[test]
    fn filter_needs_n_on_frames_to_raise() {
        let mut f = StabilityFilter::new(3, 4).unwrap();
        assert_eq!(f.update(&raw(2)).level, RiskLevel::Clear);
        assert_eq!(f.update(&raw(2)).level, RiskLevel::Clear);
        assert_eq!(f.update(&raw(2)).level, RiskLevel::Caution);
    }

    #[test]
    fn filter_holds_through_short_gaps() {
        let mut f = StabilityFilter::new(3, 4).unwrap();
        for _ in 0..3 {
            f.update(&raw(3));
        }
        for _ in 0..3 {
            assert_eq!(f.update(&raw(0)).level, RiskLevel::Danger);
        }
        assert_eq!(f.update(&raw(0)).level, RiskLevel::Clear);
        assert!(f.stable().text.is_empty());
    }

    #[test]
    fn single_blip_restarts_the_off_count() {
        let mut f = StabilityFilter::new(3, 4).unwrap();
        for _ in 0..3 {
            f.update(&raw(3));
        }
        for level in [0, 0, 1, 0, 0, 0] {
            assert_eq!(f.update(&raw(level)).level, RiskLevel::Danger);
        }
        assert_eq!(f.stable().text, "L3");
        assert_eq!(f.update(&raw(0)).level, RiskLevel::Clear);
    }

    #[test]
    fn filter_rearms_with_latest_raw_level() {
        let mut f = StabilityFilter::new(3, 4).unwrap();
        for level in [1, 1, 1, 3] {
            f.update(&raw(level));
        }
        assert_eq!(f.stable_level(), RiskLevel::Danger);
        assert_eq!(f.stable().text, "L3");
    }

    #[test]
    fn filter_counters_never_both_nonzero() {
        let mut f = StabilityFilter::new(2, 3).unwrap();
        for level in [0, 1, 1, 0, 2, 0, 0, 3, 3, 3, 0] {
            f.update(&raw(level));
            let (on, off) = f.counters();
            assert!(on == 0 || off == 0);
        }
    }

    #[test]
    fn filter_rejects_on_above_off() {
        assert!(StabilityFilter::new(5, 4).is_err());
        assert!(StabilityFilter::new(0, 4).is_err());
        assert!(StabilityFilter::new(4, 4).is_ok());
    }

    #[test]
    fn gate_enforces_cooldown_and_repeat_min() {
        let mut gate = default_gate();
        let ctx = GateContext::default();
        let t0 = Instant::now();

        assert!(gate.permits(RiskLevel::Caution, ctx, t0));
        gate.commit(RiskLevel::Caution, t0);

        // Cooldown for level 2 is 1 s, but repeat_min for level 2 is 3 s.
        assert!(!gate.permits(RiskLevel::Caution, ctx, t0 + Duration::from_millis(1500)));
        assert!(gate.permits(RiskLevel::Caution, ctx, t0 + Duration::from_secs(3)));

        // Level 3 only needs 2 s since the last emission of any level.
        assert!(!gate.permits(RiskLevel::Danger, ctx, t0 + Duration::from_millis(1900)));
        assert!(gate.permits(RiskLevel::Danger, ctx, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn gate_two_level3_alerts_need_repeat_min() {
        let mut gate = default_gate();
        let ctx = GateContext::default();
        let t0 = Instant::now();
        gate.commit(RiskLevel::Danger, t0);
        let t1 = t0 + Duration::from_millis(1990);
        assert!(!gate.permits(RiskLevel::Danger, ctx, t1));
    }

    #[test]
    fn gate_blocks_when_voice_busy_or_searching() {
        let gate = default_gate();
        let now = Instant::now();
        let speaking = GateContext {
            voice: VoiceStatus::Speaking,
            search_active: false,
        };
        let searching = GateContext {
            voice: VoiceStatus::Idle,
            search_active: true,
        };
        assert!(!gate.permits(RiskLevel::Danger, speaking, now));
        assert!(!gate.permits(RiskLevel::Danger, searching, now));
        assert!(!gate.permits(RiskLevel::Clear, GateContext::default(), now));
    }

    #[test]
    fn voice_status_parses() {
        assert_eq!("Speaking".parse::<VoiceStatus>().unwrap(), VoiceStatus::Speaking);
        assert!("shouting".parse::<VoiceStatus>().is_err());
    }
}
