//! The inference/risk cycle.
//!
//! Each cycle takes the newest frame from the store, runs the detector, scores the
//! boxes, smooths the level, and either queues a hazard alert or (in search mode)
//! sends a proximity beep directly. Results are published back into the store.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crate::alert::{GateContext, NotificationGate, StabilityFilter};
use crate::audio::{beep, AudioJob, DispatchQueue, SpeakerTransport};
use crate::detect::{Detection, DetectorBackend};
use crate::risk::{AreaHistory, LevelTable, RiskConfig, RiskEngine, RiskLevel};
use crate::search::{locate_target, SearchConfig};
use crate::shutdown::Shutdown;
use crate::store::{AlertSnapshot, CycleReport, SnapshotStore};

const ORACLE_LOG_EVERY: u64 = 30;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub infer_interval: Duration,
    pub risk: RiskConfig,
    pub alert_on: u32,
    pub alert_off: u32,
    pub cooldown: LevelTable<Duration>,
    pub repeat_min: LevelTable<Duration>,
    pub search: SearchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let ms = Duration::from_millis;
        Self {
            infer_interval: ms(50),
            risk: RiskConfig::default(),
            alert_on: 3,
            alert_off: 4,
            cooldown: LevelTable::new(ms(2000), ms(1000), ms(400)),
            repeat_min: LevelTable::new(ms(5000), ms(3000), ms(2000)),
            search: SearchConfig::default(),
        }
    }
}

/// What one cycle did, for callers that drive cycles by hand.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleOutcome {
    pub raw_level: RiskLevel,
    pub stable_level: RiskLevel,
    pub should_notify: bool,
    pub beeped: bool,
    pub detections: usize,
}

pub struct RiskCycle {
    detector: Box<dyn DetectorBackend>,
    engine: RiskEngine,
    history: AreaHistory,
    filter: StabilityFilter,
    gate: NotificationGate,
    search: SearchConfig,
    queue: DispatchQueue,
    beeper: SpeakerTransport,
    store: Arc<SnapshotStore>,
}

impl RiskCycle {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        config: &PipelineConfig,
        queue: DispatchQueue,
        beeper: SpeakerTransport,
        store: Arc<SnapshotStore>,
    ) -> Result<Self> {
        config.risk.validate()?;
        config.search.validate()?;
        Ok(Self {
            detector,
            engine: RiskEngine::new(config.risk.clone()),
            history: AreaHistory::default(),
            filter: StabilityFilter::new(config.alert_on, config.alert_off)?,
            gate: NotificationGate::new(config.cooldown, config.repeat_min),
            search: config.search.clone(),
            queue,
            beeper,
            store,
        })
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.detector
            .warm_up()
            .with_context(|| format!("warm up {} detector", self.detector.name()))
    }

    /// Process the newest frame once. Returns `None` if no frame has arrived yet.
    pub fn run_once(&mut self, now: Instant) -> Option<CycleOutcome> {
        let Some(frame) = self.store.latest_frame() else {
            self.store.heartbeat();
            return None;
        };
        let (width, height) = (frame.width, frame.height);

        let started = Instant::now();
        let detections = self.detect(frame.pixels(), width, height);
        let infer_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (raw, history) = self.engine.assess(&detections, width, height, &self.history);
        self.history = history;
        let stable = self.filter.update(&raw).clone();

        let search = self.store.search_state();
        let mut should_notify = false;
        let mut beeped = false;
        if let Some(target) = &search.target {
            let info = locate_target(&detections, &target.class, width, height, &self.search);
            self.store.update_search_target(&target.class, info.clone());
            if let Some(info) = info {
                let interval = self.search.interval_for(info.distance);
                if self.store.claim_beep(&target.class, now, interval) {
                    beeped = true;
                    let clip = beep::search_beep(self.search.beep_freq_hz, self.search.beep_ms);
                    let ok = match self.beeper.send_once(&clip) {
                        Ok(()) => true,
                        Err(err) => {
                            log::debug!("search beep failed ({}): {err}", err.kind());
                            false
                        }
                    };
                    self.store.record_send(ok, SystemTime::now());
                }
            }
        }

        let ctx = GateContext {
            voice: self.store.voice_status(),
            search_active: search.is_active(),
        };
        if stable.level.is_alert()
            && self.gate.permits(stable.level, ctx, now)
            && self.queue.enqueue(AudioJob::Alert(stable.level))
        {
            self.gate.commit(stable.level, now);
            should_notify = true;
            log::info!("alert L{}: {}", stable.level.as_u8(), stable.text);
        }

        let outcome = CycleOutcome {
            raw_level: raw.level,
            stable_level: stable.level,
            should_notify,
            beeped,
            detections: detections.len(),
        };
        let report = CycleReport {
            detections,
            infer_ms,
            delay_ms: frame.age().as_secs_f64() * 1000.0,
            alert: AlertSnapshot {
                level: stable.level,
                text: stable.text,
                target: stable.target,
                should_notify,
            },
        };
        self.store.publish_cycle(frame, report);
        Some(outcome)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Vec<Detection> {
        match self.detector.detect(pixels, width, height) {
            Ok(detections) => detections,
            Err(err) => {
                let count = self.store.record_oracle_error();
                if count % ORACLE_LOG_EVERY == 1 {
                    log::warn!(
                        "{} detector failed ({count} total): {err:#}",
                        self.detector.name()
                    );
                }
                Vec::new()
            }
        }
    }
}

pub struct PipelineHandle {
    shutdown: Shutdown,
    join: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        self.join_inner()
    }

    pub fn join(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("risk cycle thread panicked"))?;
        }
        Ok(())
    }
}

/// Run cycles every `interval` until shutdown.
pub fn spawn_pipeline(
    mut cycle: RiskCycle,
    interval: Duration,
    shutdown: Shutdown,
) -> Result<PipelineHandle> {
    let stop = shutdown.clone();
    let join = std::thread::Builder::new()
        .name("risk-cycle".into())
        .spawn(move || {
            if let Err(err) = cycle.warm_up() {
                log::warn!("{err:#}");
            }
            log::info!("risk cycle started ({} detector)", cycle.detector.name());
            while !stop.is_triggered() {
                let started = Instant::now();
                cycle.run_once(started);
                if stop.sleep(interval.saturating_sub(started.elapsed())) {
                    break;
                }
            }
            log::info!("risk cycle stopped");
        })
        .context("spawn risk cycle thread")?;
    Ok(PipelineHandle {
        shutdown,
        join: Some(join),
    })
}
