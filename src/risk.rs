//! Per-frame hazard scoring.
//!
//! Turns the detector's boxes into a discrete level (0..=3) plus the single most
//! dangerous target, from three cues:
//! - how much of the frame the object covers (area ratio thresholds),
//! - whether its center sits inside the walking corridor (path zone),
//! - how fast its area grew since the previous cycle (growth boost).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::detect::{BoundingBox, Detection};

/// Guard added to the frame area so a zero-sized frame never divides by zero.
const AREA_EPSILON: f32 = 1e-6;

/// Hazard severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    #[default]
    Clear = 0,
    Notice = 1,
    Caution = 2,
    Danger = 3,
}

impl RiskLevel {
    pub const ALERTING: [RiskLevel; 3] = [RiskLevel::Notice, RiskLevel::Caution, RiskLevel::Danger];

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RiskLevel::Clear,
            1 => RiskLevel::Notice,
            2 => RiskLevel::Caution,
            _ => RiskLevel::Danger,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_alert(self) -> bool {
        self != RiskLevel::Clear
    }

    /// One step more severe, saturating at `Danger`.
    pub fn escalate(self) -> Self {
        Self::from_u8(self.as_u8() + 1)
    }
}

impl Serialize for RiskLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

/// A value per alerting level (1, 2, 3). Level 0 never has an entry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelTable<T>([T; 3]);

impl<T: Copy> LevelTable<T> {
    pub const fn new(notice: T, caution: T, danger: T) -> Self {
        Self([notice, caution, danger])
    }

    /// Entry for an alerting level; `None` for `Clear`.
    pub fn get(&self, level: RiskLevel) -> Option<T> {
        match level {
            RiskLevel::Clear => None,
            other => Some(self.0[other.as_u8() as usize - 1]),
        }
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> LevelTable<U> {
        LevelTable([f(self.0[0]), f(self.0[1]), f(self.0[2])])
    }

    pub fn values(&self) -> [T; 3] {
        self.0
    }
}

/// Risk engine parameters.
#[derive(Clone, Debug)]
pub struct RiskConfig {
    /// Walking corridor as fractions of frame width/height: (min, max).
    pub path_x: (f32, f32),
    pub path_y: (f32, f32),
    /// Area ratio thresholds for levels 1, 2, 3.
    pub thresholds: LevelTable<f32>,
    /// Growth multiplier at which a target escalates one level.
    pub growth_boost: f32,
    /// Labels that can raise a hazard.
    pub alert_labels: HashSet<String>,
    pub alert_text: LevelTable<&'static str>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            path_x: (0.30, 0.70),
            path_y: (0.20, 0.95),
            thresholds: LevelTable::new(0.02, 0.06, 0.14),
            growth_boost: 1.25,
            alert_labels: HashSet::from(["person".to_string()]),
            alert_text: LevelTable::new("Person ahead", "Watch out", "Danger! Stop"),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        let [l1, l2, l3] = self.thresholds.values();
        if !(l1 > 0.0 && l1 <= l2 && l2 <= l3 && l3 <= 1.0) {
            return Err(anyhow!(
                "risk thresholds must satisfy 0 < l1 <= l2 <= l3 <= 1 (got {l1}, {l2}, {l3})"
            ));
        }
        for (name, (lo, hi)) in [("path_x", self.path_x), ("path_y", self.path_y)] {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo >= hi {
                return Err(anyhow!("{name} must be an increasing pair within [0, 1]"));
            }
        }
        if !(self.growth_boost.is_finite() && self.growth_boost > 1.0) {
            return Err(anyhow!("growth_boost must be greater than 1"));
        }
        if self.alert_labels.is_empty() {
            return Err(anyhow!("at least one alert label is required"));
        }
        Ok(())
    }
}

/// Per-label maximum area ratio seen in the previous completed cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AreaHistory(HashMap<String, f32>);

impl AreaHistory {
    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.get(label).copied()
    }

    fn record(&mut self, label: &str, area_ratio: f32) {
        let slot = self.0.entry(label.to_string()).or_insert(0.0);
        *slot = slot.max(area_ratio);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The most dangerous object of a cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskTarget {
    pub level: RiskLevel,
    pub label: String,
    pub area_ratio: f32,
    pub growth: f32,
    pub in_path: bool,
    #[serde(flatten)]
    pub bbox: BoundingBox,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub text: String,
    pub target: Option<RiskTarget>,
}

/// Fraction of the frame covered by a box.
pub fn area_ratio(bbox: &BoundingBox, width: u32, height: u32) -> f32 {
    bbox.area() / (width as f32 * height as f32 + AREA_EPSILON)
}

#[derive(Clone, Debug)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Score one cycle. Returns the assessment and the history to feed the next cycle.
    pub fn assess(
        &self,
        detections: &[Detection],
        width: u32,
        height: u32,
        previous: &AreaHistory,
    ) -> (RiskAssessment, AreaHistory) {
        let mut current = AreaHistory::default();
        if width == 0 || height == 0 || detections.is_empty() {
            return (RiskAssessment::default(), current);
        }

        let cfg = &self.config;
        let (w, h) = (width as f32, height as f32);
        let x_range = (cfg.path_x.0 * w, cfg.path_x.1 * w);
        let y_range = (cfg.path_y.0 * h, cfg.path_y.1 * h);
        let mut best: Option<RiskTarget> = None;

        for det in detections {
            if !cfg.alert_labels.contains(&det.label) {
                continue;
            }
            let ratio = area_ratio(&det.bbox, width, height);
            let (cx, cy) = det.bbox.center();
            let in_path =
                cx >= x_range.0 && cx <= x_range.1 && cy >= y_range.0 && cy <= y_range.1;
            let growth = match previous.get(&det.label) {
                Some(prev) if prev > AREA_EPSILON => ratio / prev,
                _ => 1.0,
            };

            let level = self.level_for(ratio, in_path, growth);
            current.record(&det.label, ratio);
            if !level.is_alert() {
                continue;
            }

            let better = match &best {
                None => true,
                Some(b) => level > b.level || (level == b.level && ratio > b.area_ratio),
            };
            if better {
                best = Some(RiskTarget {
                    level,
                    label: det.label.clone(),
                    area_ratio: ratio,
                    growth,
                    in_path,
                    bbox: det.bbox,
                });
            }
        }

        let assessment = match best {
            Some(target) => RiskAssessment {
                level: target.level,
                text: cfg
                    .alert_text
                    .get(target.level)
                    .unwrap_or_default()
                    .to_string(),
                target: Some(target),
            },
            None => RiskAssessment::default(),
        };
        (assessment, current)
    }

    /// Level for one box from its area ratio, corridor membership and growth.
    pub fn level_for(&self, ratio: f32, in_path: bool, growth: f32) -> RiskLevel {
        let [l1, l2, l3] = self.config.thresholds.values();
        let mut level = if ratio >= l3 {
            RiskLevel::Danger
        } else if ratio >= l2 {
            RiskLevel::Caution
        } else if ratio >= l1 && in_path {
            RiskLevel::Notice
        } else {
            RiskLevel::Clear
        };
        if in_path && level.is_alert() {
            level = level.escalate();
        }
        if growth >= self.config.growth_boost && level.is_alert() {
            level = level.escalate();
        }
        level
    }
}
