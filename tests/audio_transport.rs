use std::io::Read;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use wayfinder::audio::{beep, pcm1, SpeakerConfig, SpeakerTransport};
use wayfinder::FailureKind;

fn speaker_config(addr: String) -> SpeakerConfig {
    SpeakerConfig {
        addr,
        retry_step: Duration::from_millis(20),
        ..SpeakerConfig::default()
    }
}

/// Accept `n` connections and return each connection's full byte stream.
fn fake_speaker(n: usize) -> (String, thread::JoinHandle<Vec<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake speaker");
    let addr = listener.local_addr().unwrap().to_string();
    let join = thread::spawn(move || {
        (0..n)
            .map(|_| {
                let (mut stream, _) = listener.accept().expect("accept");
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).expect("read frame");
                buf
            })
            .collect()
    });
    (addr, join)
}

#[test]
fn speaker_receives_header_and_full_payload() {
    let (addr, join) = fake_speaker(1);
    let clip = beep::search_beep(1000.0, 50);
    let transport = SpeakerTransport::new(SpeakerConfig {
        chunk_size: 100,
        ..speaker_config(addr)
    });

    transport.send(&clip).expect("send clip");

    let frames = join.join().unwrap();
    let (header, payload) = pcm1::decode(&frames[0]).expect("decode frame");
    assert_eq!(header.sample_rate, 16_000);
    assert_eq!(header.channels, 1);
    assert_eq!(header.bits_per_sample, 16);
    assert_eq!(header.data_len as usize, clip.data().len());
    assert_eq!(payload, clip.data());
    // 50 ms at 16 kHz, 2 bytes per sample.
    assert_eq!(payload.len(), 1600);
}

#[test]
fn each_clip_uses_its_own_connection() {
    let (addr, join) = fake_speaker(2);
    let transport = SpeakerTransport::new(speaker_config(addr));
    let short = beep::search_beep(800.0, 20);
    let long = beep::search_beep(1200.0, 80);

    transport.send(&short).unwrap();
    transport.send_once(&long).unwrap();

    let frames = join.join().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(pcm1::decode(&frames[0]).unwrap().1, short.data());
    assert_eq!(pcm1::decode(&frames[1]).unwrap().1, long.data());
}

#[test]
fn closed_port_fails_after_retries() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let transport = SpeakerTransport::new(speaker_config(addr));
    let clip = beep::search_beep(1000.0, 10);

    let started = Instant::now();
    let err = transport.send(&clip).unwrap_err();
    assert_eq!(err.kind(), FailureKind::ConnectionRefused);
    // Three attempts sleep 20 ms then 40 ms between them.
    assert!(started.elapsed() >= Duration::from_millis(60));

    let started = Instant::now();
    let err = transport.send_once(&clip).unwrap_err();
    assert_eq!(err.kind(), FailureKind::ConnectionRefused);
    assert!(started.elapsed() < Duration::from_millis(60));
}

#[test]
fn unresolvable_address_is_a_connection_failure() {
    let transport = SpeakerTransport::new(SpeakerConfig {
        attempts: 1,
        ..speaker_config("not-an-address".to_string())
    });
    let err = transport.send(&beep::search_beep(1000.0, 10)).unwrap_err();
    assert_eq!(err.kind(), FailureKind::ConnectionRefused);
}
