use std::io::Read;
use std::net::TcpListener;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use wayfinder::audio::{beep, pcm1, spawn_dispatcher};
use wayfinder::detect::{ReplayBackend, StubBackend};
use wayfinder::ingest::{spawn_ingest, IngestConfig, SyntheticSource};
use wayfinder::pipeline::{spawn_pipeline, PipelineConfig};
use wayfinder::{
    AlertClips, BoundingBox, Detection, DispatchQueue, RiskCycle, RiskLevel, Shutdown,
    SnapshotStore, SpeakerConfig, SpeakerTransport,
};

fn fast_ingest() -> IngestConfig {
    IngestConfig {
        fetch_interval: Duration::from_millis(10),
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(20),
        ..IngestConfig::default()
    }
}

fn speaker(addr: String) -> SpeakerTransport {
    SpeakerTransport::new(SpeakerConfig {
        addr,
        connect_timeout: Duration::from_millis(200),
        retry_step: Duration::from_millis(10),
        ..SpeakerConfig::default()
    })
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn hazard_in_path_reaches_the_speaker() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (frames_tx, frames_rx) = mpsc::channel();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            let _ = frames_tx.send(buf);
        }
    });

    let store = SnapshotStore::new();
    let shutdown = Shutdown::new();

    let ingest = spawn_ingest(
        Box::new(SyntheticSource::new(640, 480)),
        Arc::clone(&store),
        fast_ingest(),
        shutdown.clone(),
    )
    .unwrap();

    let transport = speaker(addr);
    let (queue, jobs) = DispatchQueue::bounded(3).unwrap();
    let dispatcher = spawn_dispatcher(
        jobs,
        transport.clone(),
        AlertClips::synthesized(),
        Arc::clone(&store),
        shutdown.clone(),
    )
    .unwrap();

    // Person filling ~40% of the frame, centred: danger in path.
    let person = Detection::new("person", 0.9, BoundingBox::new(100.0, 100.0, 540.0, 380.0));
    let replay = ReplayBackend::new(vec![vec![person]]).unwrap();
    let config = PipelineConfig {
        infer_interval: Duration::from_millis(10),
        ..PipelineConfig::default()
    };
    let cycle = RiskCycle::new(
        Box::new(replay),
        &config,
        queue,
        transport,
        Arc::clone(&store),
    )
    .unwrap();
    let pipeline = spawn_pipeline(cycle, config.infer_interval, shutdown.clone()).unwrap();

    let received = frames_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("speaker never received an alert");
    let (header, payload) = pcm1::decode(&received).unwrap();
    assert_eq!(header.sample_rate, beep::BEEP_SAMPLE_RATE);
    assert_eq!(payload, beep::alert_pattern(RiskLevel::Danger).data());

    assert!(wait_until(Duration::from_secs(5), || {
        store.audio_health().last_send_ok == Some(true)
    }));
    let snap = store.snapshot();
    assert_eq!(snap.alert.level, RiskLevel::Danger);
    assert_eq!(snap.alert.text, "Danger! Stop");
    assert_eq!(snap.shape.map(|s| (s.w, s.h)), Some((640, 480)));
    assert!(snap.audio.last_send_ts.is_some());

    shutdown.trigger();
    ingest.join().unwrap();
    pipeline.join().unwrap();
    dispatcher.join().unwrap();
}

#[test]
fn failing_camera_backs_off_and_stops_promptly() {
    let store = SnapshotStore::new();
    let shutdown = Shutdown::new();
    let source = SyntheticSource::from_url("stub://64x48/fail").unwrap();
    let ingest = spawn_ingest(
        Box::new(source),
        Arc::clone(&store),
        fast_ingest(),
        shutdown.clone(),
    )
    .unwrap();

    let (queue, _jobs) = DispatchQueue::bounded(1).unwrap();
    let cycle = RiskCycle::new(
        Box::new(StubBackend::new()),
        &PipelineConfig::default(),
        queue,
        speaker("127.0.0.1:9".to_string()),
        Arc::clone(&store),
    )
    .unwrap();
    let pipeline = spawn_pipeline(cycle, Duration::from_millis(10), shutdown.clone()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        ingest.stats().failures_total >= 3
    }));
    let stats = ingest.stats();
    assert_eq!(stats.frames_published, 0);
    assert!(!stats.is_healthy(Duration::from_secs(1)));
    // No frame ever arrived, so the cycle only heartbeats.
    assert_eq!(store.generation(), 0);
    assert!(store.snapshot().ts > 0.0);

    let started = Instant::now();
    ingest.stop().unwrap();
    pipeline.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}
