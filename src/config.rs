use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::queue::MAX_CAPACITY;
use crate::audio::SpeakerConfig;
use crate::ingest::{CameraMode, Esp32Config, IngestConfig};
use crate::pipeline::PipelineConfig;
use crate::risk::LevelTable;

const DEFAULT_CAMERA_URL: &str = "http://192.168.132.244";
const DEFAULT_SPEAKER_ADDR: &str = "192.168.132.244:23456";
const DEFAULT_AUDIO_DIR: &str = "audio";
const DEFAULT_QUEUE_CAPACITY: usize = 3;
const DEFAULT_MODEL_INPUT: u32 = 320;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WayfinderConfigFile {
    camera: Option<CameraConfigFile>,
    speaker: Option<SpeakerConfigFile>,
    detector: Option<DetectorConfigFile>,
    risk: Option<RiskConfigFile>,
    alert: Option<AlertConfigFile>,
    search: Option<SearchConfigFile>,
    infer_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    mode: Option<CameraMode>,
    fetch_interval_ms: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    fail_log_every: Option<u64>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeakerConfigFile {
    addr: Option<String>,
    connect_timeout_ms: Option<u64>,
    chunk_size: Option<usize>,
    attempts: Option<u32>,
    retry_step_ms: Option<u64>,
    queue_capacity: Option<usize>,
    audio_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    replay: Option<PathBuf>,
    model: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RiskConfigFile {
    path_x: Option<[f32; 2]>,
    path_y: Option<[f32; 2]>,
    thresholds: Option<[f32; 3]>,
    growth_boost: Option<f32>,
    alert_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    consecutive_on: Option<u32>,
    consecutive_off: Option<u32>,
    cooldown_secs: Option<[f64; 3]>,
    repeat_min_secs: Option<[f64; 3]>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchConfigFile {
    area_mid: Option<f32>,
    area_near: Option<f32>,
    interval_secs: Option<[f64; 3]>,
    beep_freq_hz: Option<f32>,
    beep_ms: Option<u32>,
}

/// Which detector the daemon should run.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorSettings {
    Stub,
    Replay(PathBuf),
    Model { path: PathBuf, input_size: u32 },
}

#[derive(Debug, Clone)]
pub struct WayfinderConfig {
    pub camera: Esp32Config,
    pub ingest: IngestConfig,
    pub speaker: SpeakerConfig,
    pub queue_capacity: usize,
    pub audio_dir: PathBuf,
    pub detector: DetectorSettings,
    pub pipeline: PipelineConfig,
}

impl WayfinderConfig {
    /// Defaults, then the file named by `WAYFINDER_CONFIG`, then `WAYFINDER_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WAYFINDER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in defaults only; no file or environment.
    pub fn defaults() -> Result<Self> {
        let cfg = Self::from_file(WayfinderConfigFile::default())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WayfinderConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let mut camera = Esp32Config {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            ..Esp32Config::default()
        };
        if let Some(mode) = camera_file.mode {
            camera.mode = mode;
        }
        if let Some(ms) = camera_file.connect_timeout_ms {
            camera.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = camera_file.read_timeout_ms {
            camera.read_timeout = Duration::from_millis(ms);
        }

        let mut ingest = IngestConfig::default();
        if let Some(ms) = camera_file.fetch_interval_ms {
            ingest.fetch_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = camera_file.backoff_base_ms {
            ingest.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = camera_file.backoff_max_ms {
            ingest.backoff_max = Duration::from_millis(ms);
        }
        if let Some(every) = camera_file.fail_log_every {
            ingest.fail_log_every = every;
        }

        let speaker_file = file.speaker.unwrap_or_default();
        let mut speaker = SpeakerConfig {
            addr: speaker_file
                .addr
                .unwrap_or_else(|| DEFAULT_SPEAKER_ADDR.to_string()),
            ..SpeakerConfig::default()
        };
        if let Some(ms) = speaker_file.connect_timeout_ms {
            speaker.connect_timeout = Duration::from_millis(ms);
            speaker.write_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = speaker_file.chunk_size {
            speaker.chunk_size = size;
        }
        if let Some(attempts) = speaker_file.attempts {
            speaker.attempts = attempts;
        }
        if let Some(ms) = speaker_file.retry_step_ms {
            speaker.retry_step = Duration::from_millis(ms);
        }
        let queue_capacity = speaker_file
            .queue_capacity
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let audio_dir = speaker_file
            .audio_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_DIR));

        let detector_file = file.detector.unwrap_or_default();
        let detector = match (detector_file.model, detector_file.replay) {
            (Some(path), _) => DetectorSettings::Model {
                path,
                input_size: detector_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
            },
            (None, Some(path)) => DetectorSettings::Replay(path),
            (None, None) => DetectorSettings::Stub,
        };

        let mut pipeline = PipelineConfig::default();
        if let Some(ms) = file.infer_interval_ms {
            pipeline.infer_interval = Duration::from_millis(ms);
        }
        if let Some(risk) = file.risk {
            if let Some([lo, hi]) = risk.path_x {
                pipeline.risk.path_x = (lo, hi);
            }
            if let Some([lo, hi]) = risk.path_y {
                pipeline.risk.path_y = (lo, hi);
            }
            if let Some([l1, l2, l3]) = risk.thresholds {
                pipeline.risk.thresholds = LevelTable::new(l1, l2, l3);
            }
            if let Some(boost) = risk.growth_boost {
                pipeline.risk.growth_boost = boost;
            }
            if let Some(labels) = risk.alert_labels {
                pipeline.risk.alert_labels = labels.into_iter().collect();
            }
        }
        if let Some(alert) = file.alert {
            if let Some(on) = alert.consecutive_on {
                pipeline.alert_on = on;
            }
            if let Some(off) = alert.consecutive_off {
                pipeline.alert_off = off;
            }
            if let Some(secs) = alert.cooldown_secs {
                pipeline.cooldown = seconds_table("alert.cooldown_secs", secs)?;
            }
            if let Some(secs) = alert.repeat_min_secs {
                pipeline.repeat_min = seconds_table("alert.repeat_min_secs", secs)?;
            }
        }
        if let Some(search) = file.search {
            if let Some(mid) = search.area_mid {
                pipeline.search.area_mid = mid;
            }
            if let Some(near) = search.area_near {
                pipeline.search.area_near = near;
            }
            if let Some(secs) = search.interval_secs {
                let [far, mid, near] = seconds_table("search.interval_secs", secs)?.values();
                pipeline.search.interval_far = far;
                pipeline.search.interval_mid = mid;
                pipeline.search.interval_near = near;
            }
            if let Some(freq) = search.beep_freq_hz {
                pipeline.search.beep_freq_hz = freq;
            }
            if let Some(ms) = search.beep_ms {
                pipeline.search.beep_ms = ms;
            }
        }

        Ok(Self {
            camera,
            ingest,
            speaker,
            queue_capacity,
            audio_dir,
            detector,
            pipeline,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("WAYFINDER_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(mode) = std::env::var("WAYFINDER_CAMERA_MODE") {
            if !mode.trim().is_empty() {
                self.camera.mode = mode.parse()?;
            }
        }
        if let Ok(addr) = std::env::var("WAYFINDER_SPEAKER_ADDR") {
            if !addr.trim().is_empty() {
                self.speaker.addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("WAYFINDER_AUDIO_DIR") {
            if !dir.trim().is_empty() {
                self.audio_dir = PathBuf::from(dir);
            }
        }
        if let Ok(interval) = std::env::var("WAYFINDER_INFER_INTERVAL_MS") {
            let ms: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("WAYFINDER_INFER_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.pipeline.infer_interval = Duration::from_millis(ms);
        }
        if let Ok(labels) = std::env::var("WAYFINDER_ALERT_LABELS") {
            let parsed: HashSet<String> = split_csv(&labels).into_iter().collect();
            if !parsed.is_empty() {
                self.pipeline.risk.alert_labels = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.pipeline.risk.validate()?;
        self.pipeline.search.validate()?;
        if self.pipeline.alert_on == 0 || self.pipeline.alert_on > self.pipeline.alert_off {
            return Err(anyhow!(
                "alert.consecutive_on ({}) must be between 1 and consecutive_off ({})",
                self.pipeline.alert_on,
                self.pipeline.alert_off
            ));
        }
        if !(1..=MAX_CAPACITY).contains(&self.queue_capacity) {
            return Err(anyhow!(
                "speaker.queue_capacity must be between 1 and {MAX_CAPACITY}"
            ));
        }
        if self.speaker.attempts == 0 {
            return Err(anyhow!("speaker.attempts must be at least 1"));
        }
        if self.speaker.chunk_size == 0 {
            return Err(anyhow!("speaker.chunk_size must be greater than zero"));
        }
        if self.ingest.backoff_base.is_zero() || self.ingest.backoff_base > self.ingest.backoff_max
        {
            return Err(anyhow!(
                "camera backoff must satisfy 0 < backoff_base_ms <= backoff_max_ms"
            ));
        }
        if self.pipeline.infer_interval.is_zero() {
            return Err(anyhow!("infer interval must be greater than zero"));
        }
        Ok(())
    }
}

fn seconds_table(name: &str, secs: [f64; 3]) -> Result<LevelTable<Duration>> {
    let mut out = [Duration::ZERO; 3];
    for (slot, value) in out.iter_mut().zip(secs) {
        *slot = Duration::try_from_secs_f64(value)
            .map_err(|_| anyhow!("{name} entries must be finite and non-negative (got {value})"))?;
    }
    Ok(LevelTable::new(out[0], out[1], out[2]))
}

fn read_config_file(path: &Path) -> Result<WayfinderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
