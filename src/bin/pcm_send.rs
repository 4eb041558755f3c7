//! pcm_send - push a WAV file or a test beep to the ESP32 speaker
//!
//! Useful for checking speaker wiring without running the full daemon.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use wayfinder::audio::{beep, wav, SpeakerConfig, SpeakerTransport};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send one PCM1 clip to the ESP32 speaker")]
struct Args {
    /// Speaker address (host:port).
    #[arg(long, env = "WAYFINDER_SPEAKER_ADDR", default_value = "192.168.132.244:23456")]
    addr: String,

    /// Mono 16-bit PCM WAV file to send.
    #[arg(long, conflicts_with = "beep")]
    wav: Option<PathBuf>,

    /// Send a synthesized beep instead of a file.
    #[arg(long)]
    beep: bool,

    /// Beep frequency in Hz.
    #[arg(long, default_value = "1000")]
    freq: f32,

    /// Beep duration in milliseconds.
    #[arg(long, default_value = "50")]
    ms: u32,

    /// Connection attempts before giving up.
    #[arg(long, default_value = "3")]
    attempts: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let clip = match (&args.wav, args.beep) {
        (Some(path), _) => {
            wav::read_wav(path).with_context(|| format!("load {}", path.display()))?
        }
        (None, true) => beep::search_beep(args.freq, args.ms),
        (None, false) => bail!("pass --wav <file> or --beep"),
    };

    let transport = SpeakerTransport::new(SpeakerConfig {
        addr: args.addr.clone(),
        attempts: args.attempts.max(1),
        ..SpeakerConfig::default()
    });

    log::info!(
        "sending {} ms @ {} Hz to {}",
        clip.duration_ms(),
        clip.sample_rate(),
        args.addr
    );
    transport
        .send(&clip)
        .with_context(|| format!("send to {}", args.addr))?;
    // Let the device start playback before the process exits.
    std::thread::sleep(Duration::from_millis(50));
    log::info!("sent {} bytes", clip.data().len());
    Ok(())
}
