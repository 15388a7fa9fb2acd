//! Streams a synthetic rainbow sweep to every connected client
//!
//! Run with `cargo run --example colour_server [seconds]` and start one or
//! more `colour_client` examples alongside it.

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use synesthesia_api::protocol::{ColourDatum, ColourFrame, timestamp_micros};
use synesthesia_api::{Server, ServerConfig, ServerEvent};

const BINS: usize = 256;
const SAMPLE_RATE: u32 = 48_000;
const FFT_SIZE: u32 = 2048;

/// Map a visible wavelength to an approximate RGB triple.
fn wavelength_to_rgb(nm: f32) -> (f32, f32, f32) {
    match nm {
        n if n < 440.0 => ((440.0 - n) / 60.0, 0.0, 1.0),
        n if n < 490.0 => (0.0, (n - 440.0) / 50.0, 1.0),
        n if n < 510.0 => (0.0, 1.0, (510.0 - n) / 20.0),
        n if n < 580.0 => ((n - 510.0) / 70.0, 1.0, 0.0),
        n if n < 645.0 => (1.0, (645.0 - n) / 65.0, 0.0),
        _ => (1.0, 0.0, 0.0),
    }
}

fn sweep_frame(started: Instant) -> ColourFrame {
    let t = started.elapsed().as_secs_f32();
    let bin_width = SAMPLE_RATE as f32 / FFT_SIZE as f32;

    let samples = (0..BINS)
        .map(|bin| {
            let position = bin as f32 / BINS as f32;
            let wavelength = 380.0 + position * 370.0;
            let (r, g, b) = wavelength_to_rgb(wavelength);
            let magnitude = 0.5 + 0.5 * (TAU * (position - t * 0.25)).sin();
            ColourDatum {
                frequency: (bin + 1) as f32 * bin_width,
                wavelength,
                r,
                g,
                b,
                magnitude,
                phase: (t * TAU) % TAU,
            }
        })
        .collect();

    ColourFrame {
        samples,
        sample_rate: SAMPLE_RATE,
        fft_size: FFT_SIZE,
        timestamp: timestamp_micros(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synesthesia_api=info".into()),
        )
        .init();

    let run_for = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<u64>())
        .transpose()?
        .map_or(Duration::from_secs(30), Duration::from_secs);

    let (server, events) = Server::new(ServerConfig::default());
    let started = Instant::now();
    server.set_frame_provider(move || Some(sweep_frame(started)));
    server.start()?;

    println!("Serving on {} for {}s", server.endpoint_info(), run_for.as_secs());

    let deadline = Instant::now() + run_for;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining.min(Duration::from_secs(1))) {
            Ok(ServerEvent::PeerConnected(peer)) => println!("+ {peer}"),
            Ok(ServerEvent::PeerDisconnected(peer)) => println!("- {peer}"),
            Ok(ServerEvent::PeerRejected(peer)) => println!("! {peer} rejected (server full)"),
            Ok(ServerEvent::ConfigUpdate { config, peer }) => {
                println!("{peer} requested {config:?}");
                server.broadcast_config_update(&config)?;
            }
            Ok(ServerEvent::Error(err)) => eprintln!("error: {err}"),
            Err(_) => {}
        }
    }

    server.stop();
    let metrics = synesthesia_api::metrics();
    println!(
        "Sent {} frames, average broadcast {:?}us",
        server.total_frames_sent(),
        metrics.avg_broadcast_latency_us()
    );
    Ok(())
}
