use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::audio::{AlertClips, AudioJob, SpeakerTransport};
use crate::shutdown::Shutdown;
use crate::store::SnapshotStore;

pub const MAX_CAPACITY: usize = 3;
const POLL: Duration = Duration::from_millis(100);

/// Producer side of the bounded drop-oldest audio queue.
///
/// Holds a receiver clone so a full queue can evict its oldest job itself; enqueue
/// never blocks. That clone keeps the channel connected, so consumer liveness is
/// tracked separately through [`JobReceiver`].
#[derive(Clone, Debug)]
pub struct DispatchQueue {
    tx: Sender<AudioJob>,
    evict: Receiver<AudioJob>,
    evicted: Arc<AtomicU64>,
    consumer_alive: Arc<AtomicBool>,
}

/// Consumer side of the queue. Dropping it (the dispatcher thread exiting) makes
/// every later [`DispatchQueue::enqueue`] fail.
#[derive(Debug)]
pub struct JobReceiver {
    rx: Receiver<AudioJob>,
    alive: Arc<AtomicBool>,
}

impl JobReceiver {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<AudioJob, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<AudioJob, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn try_iter(&self) -> crossbeam_channel::TryIter<'_, AudioJob> {
        self.rx.try_iter()
    }
}

impl Drop for JobReceiver {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl DispatchQueue {
    /// Returns the producer and the receiver to hand to [`spawn_dispatcher`].
    pub fn bounded(capacity: usize) -> Result<(Self, JobReceiver)> {
        if !(1..=MAX_CAPACITY).contains(&capacity) {
            return Err(anyhow!(
                "audio queue capacity must be 1..={MAX_CAPACITY}, got {capacity}"
            ));
        }
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let queue = Self {
            tx,
            evict: rx.clone(),
            evicted: Arc::new(AtomicU64::new(0)),
            consumer_alive: Arc::clone(&alive),
        };
        Ok((queue, JobReceiver { rx, alive }))
    }

    /// Queue a job, dropping the oldest pending one if full.
    ///
    /// Returns false only when the dispatcher is gone.
    pub fn enqueue(&self, job: AudioJob) -> bool {
        if !self.consumer_is_alive() {
            log::error!("audio dispatcher is gone; job dropped");
            return false;
        }
        let mut job = job;
        loop {
            match self.tx.try_send(job) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    job = back;
                    match self.evict.try_recv() {
                        Ok(stale) => {
                            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
                            log::debug!("audio queue full; dropped {stale:?} (total {total})");
                        }
                        // Dispatcher drained it in between.
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => return false,
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::error!("audio dispatcher is gone; job dropped");
                    return false;
                }
            }
        }
    }

    pub fn consumer_is_alive(&self) -> bool {
        self.consumer_alive.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

pub struct DispatcherHandle {
    shutdown: Shutdown,
    join: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Trigger shutdown and wait for the in-flight job (if any) to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.trigger();
        self.join_inner()
    }

    /// Wait for the dispatcher to exit on its own (after shutdown elsewhere).
    pub fn join(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("audio dispatcher thread panicked"))?;
        }
        Ok(())
    }
}

/// Start the single consumer. Jobs are sent strictly one at a time.
pub fn spawn_dispatcher(
    rx: JobReceiver,
    transport: SpeakerTransport,
    clips: AlertClips,
    store: Arc<SnapshotStore>,
    shutdown: Shutdown,
) -> Result<DispatcherHandle> {
    let stop = shutdown.clone();
    let join = std::thread::Builder::new()
        .name("audio-dispatch".into())
        .spawn(move || run_dispatcher(rx, &transport, &clips, &store, &stop))
        .context("spawn audio dispatcher")?;
    Ok(DispatcherHandle {
        shutdown,
        join: Some(join),
    })
}

fn run_dispatcher(
    rx: JobReceiver,
    transport: &SpeakerTransport,
    clips: &AlertClips,
    store: &SnapshotStore,
    shutdown: &Shutdown,
) {
    log::info!("audio dispatcher sending to {}", transport.config().addr);
    while !shutdown.is_triggered() {
        let job = match rx.recv_timeout(POLL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let clip = match &job {
            AudioJob::Alert(level) => match clips.get(*level) {
                Some(clip) => clip,
                None => {
                    log::warn!("no clip for alert level {}", level.as_u8());
                    continue;
                }
            },
            AudioJob::Pcm(clip) => clip,
        };
        let ok = match transport.send(clip) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("audio job dropped ({}): {err}", err.kind());
                false
            }
        };
        store.record_send(ok, SystemTime::now());
    }
    log::info!("audio dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmClip;
    use crate::risk::RiskLevel;

    fn pcm(tag: u8) -> AudioJob {
        AudioJob::Pcm(PcmClip::from_parts(16_000, vec![tag, 0]))
    }

    #[test]
    fn full_queue_drops_oldest() {
        let (queue, rx) = DispatchQueue::bounded(3).unwrap();
        for tag in 1..=4 {
            assert!(queue.enqueue(pcm(tag)));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted(), 1);
        let drained: Vec<AudioJob> = rx.try_iter().collect();
        assert_eq!(drained, vec![pcm(2), pcm(3), pcm(4)]);
    }

    #[test]
    fn capacity_one_keeps_newest() {
        let (queue, rx) = DispatchQueue::bounded(1).unwrap();
        queue.enqueue(AudioJob::Alert(RiskLevel::Notice));
        queue.enqueue(AudioJob::Alert(RiskLevel::Danger));
        assert_eq!(rx.try_recv().unwrap(), AudioJob::Alert(RiskLevel::Danger));
        assert!(queue.is_empty());
    }

    #[test]
    fn capacity_is_bounded() {
        assert!(DispatchQueue::bounded(0).is_err());
        assert!(DispatchQueue::bounded(4).is_err());
    }

    #[test]
    fn enqueue_fails_once_receiver_is_dropped() {
        let (queue, rx) = DispatchQueue::bounded(1).unwrap();
        assert!(queue.consumer_is_alive());
        drop(rx);
        assert!(!queue.consumer_is_alive());
        assert!(!queue.enqueue(AudioJob::Alert(RiskLevel::Danger)));
        assert!(!queue.clone().enqueue(pcm(1)));
    }

    #[test]
    fn dispatcher_stops_on_shutdown() {
        let (queue, rx) = DispatchQueue::bounded(2).unwrap();
        let store = SnapshotStore::new();
        let handle = spawn_dispatcher(
            rx,
            SpeakerTransport::new(Default::default()),
            AlertClips::synthesized(),
            store,
            Shutdown::new(),
        )
        .unwrap();
        assert!(queue.consumer_is_alive());
        handle.stop().unwrap();
        assert!(!queue.consumer_is_alive());
        assert!(!queue.enqueue(AudioJob::Alert(RiskLevel::Caution)));
    }
}
