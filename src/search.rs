//! "Find my object" mode: locate one detector class and turn its position into
//! directional, distance-paced beeps.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::Duration;

use crate::detect::{BoundingBox, Detection};
use crate::risk::area_ratio;

/// Classes the user can ask to find.
pub const SEARCHABLE_CLASSES: [&str; 15] = [
    "cup",
    "bottle",
    "cell phone",
    "remote",
    "book",
    "scissors",
    "keyboard",
    "mouse",
    "laptop",
    "backpack",
    "umbrella",
    "handbag",
    "suitcase",
    "clock",
    "vase",
];

/// Spoken item names mapped to detector classes.
const ALIASES: &[(&str, &str)] = &[
    ("水杯", "cup"),
    ("杯子", "cup"),
    ("cup", "cup"),
    ("mug", "cup"),
    ("瓶子", "bottle"),
    ("水瓶", "bottle"),
    ("bottle", "bottle"),
    ("手机", "cell phone"),
    ("电话", "cell phone"),
    ("phone", "cell phone"),
    ("遥控器", "remote"),
    ("remote", "remote"),
    ("书", "book"),
    ("book", "book"),
    ("剪刀", "scissors"),
    ("scissors", "scissors"),
    ("键盘", "keyboard"),
    ("keyboard", "keyboard"),
    ("鼠标", "mouse"),
    ("mouse", "mouse"),
    ("电脑", "laptop"),
    ("笔记本", "laptop"),
    ("laptop", "laptop"),
    ("背包", "backpack"),
    ("书包", "backpack"),
    ("backpack", "backpack"),
    ("伞", "umbrella"),
    ("雨伞", "umbrella"),
    ("umbrella", "umbrella"),
    ("包", "handbag"),
    ("手提包", "handbag"),
    ("handbag", "handbag"),
    ("箱子", "suitcase"),
    ("行李箱", "suitcase"),
    ("suitcase", "suitcase"),
    ("钟", "clock"),
    ("时钟", "clock"),
    ("clock", "clock"),
    ("花瓶", "vase"),
    ("vase", "vase"),
];

/// A resolved search request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchTarget {
    /// Detector class, e.g. `cell phone`.
    pub class: String,
    /// What the user asked for, kept for display.
    pub label: String,
}

/// Resolve a user-facing item name to a searchable detector class.
///
/// Exact alias first, then the first alias contained in the request, then a direct
/// class name.
pub fn resolve_target(item: &str) -> Result<SearchTarget> {
    let wanted = item.trim();
    if wanted.is_empty() {
        return Err(anyhow!("search item is empty"));
    }
    let lowered = wanted.to_lowercase();
    let class = ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .or_else(|| ALIASES.iter().find(|(alias, _)| lowered.contains(alias)))
        .map(|(_, class)| *class)
        .or_else(|| SEARCHABLE_CLASSES.iter().copied().find(|c| *c == lowered))
        .ok_or_else(|| anyhow!("{wanted:?} is not a searchable item"))?;
    Ok(SearchTarget {
        class: class.to_string(),
        label: wanted.to_string(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Center,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceTier {
    Far,
    Mid,
    Near,
}

/// Where the target was last seen.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetInfo {
    pub direction: Direction,
    pub distance: DistanceTier,
    pub area_ratio: f32,
    #[serde(flatten)]
    pub bbox: BoundingBox,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub area_mid: f32,
    pub area_near: f32,
    pub interval_far: Duration,
    pub interval_mid: Duration,
    pub interval_near: Duration,
    pub beep_freq_hz: f32,
    pub beep_ms: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            area_mid: 0.03,
            area_near: 0.10,
            interval_far: Duration::from_millis(1000),
            interval_mid: Duration::from_millis(300),
            interval_near: Duration::from_millis(100),
            beep_freq_hz: 1000.0,
            beep_ms: 50,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.area_mid > 0.0 && self.area_mid < self.area_near && self.area_near <= 1.0) {
            return Err(anyhow!(
                "search area thresholds must satisfy 0 < mid < near <= 1 (got {}, {})",
                self.area_mid,
                self.area_near
            ));
        }
        if !(self.beep_freq_hz.is_finite() && self.beep_freq_hz > 0.0) || self.beep_ms == 0 {
            return Err(anyhow!("search beep needs a positive frequency and duration"));
        }
        Ok(())
    }

    pub fn tier_for(&self, ratio: f32) -> DistanceTier {
        if ratio >= self.area_near {
            DistanceTier::Near
        } else if ratio >= self.area_mid {
            DistanceTier::Mid
        } else {
            DistanceTier::Far
        }
    }

    /// Minimum spacing between beeps for a distance tier.
    pub fn interval_for(&self, tier: DistanceTier) -> Duration {
        match tier {
            DistanceTier::Far => self.interval_far,
            DistanceTier::Mid => self.interval_mid,
            DistanceTier::Near => self.interval_near,
        }
    }
}

pub fn direction_for(center_x: f32, width: u32) -> Direction {
    let w = width as f32;
    if center_x < w / 3.0 {
        Direction::Left
    } else if center_x > 2.0 * w / 3.0 {
        Direction::Right
    } else {
        Direction::Center
    }
}

/// Largest detection of `class`, described relative to the frame.
pub fn locate_target(
    detections: &[Detection],
    class: &str,
    width: u32,
    height: u32,
    config: &SearchConfig,
) -> Option<TargetInfo> {
    if width == 0 || height == 0 {
        return None;
    }
    detections
        .iter()
        .filter(|d| d.label == class)
        .map(|d| (d, area_ratio(&d.bbox, width, height)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(det, ratio)| TargetInfo {
            direction: direction_for(det.bbox.center().0, width),
            distance: config.tier_for(ratio),
            area_ratio: ratio,
            bbox: det.bbox,
        })
}
