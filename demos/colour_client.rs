//! Receives colour frames and prints a short summary of each second
//!
//! `cargo run --example colour_client` discovers a server on the local
//! network; `cargo run --example colour_client /path/to/socket` connects
//! directly.

use std::time::{Duration, Instant};

use synesthesia_api::protocol::ConfigUpdate;
use synesthesia_api::{Client, ClientConfig, ClientEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synesthesia_api=info".into()),
        )
        .init();

    let (client, events) = Client::new(ClientConfig::default());
    match std::env::args().nth(1) {
        Some(path) => client.connect_to_server(path)?,
        None => client.discover_and_connect()?,
    }
    println!("Connected to {}", client.server_info());

    // Ask for a narrower band once, to show the config path
    client.send_config_update(&ConfigUpdate {
        frequency_min: 40,
        frequency_max: 12_000,
        ..ConfigUpdate::default()
    })?;

    let mut frames = 0u32;
    let mut window = Instant::now();
    for event in events {
        match event {
            ClientEvent::ColourData { frame, sequence } => {
                frames += 1;
                if window.elapsed() >= Duration::from_secs(1) {
                    let loudest = frame
                        .samples
                        .iter()
                        .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude));
                    if let Some(peak) = loudest {
                        println!(
                            "{frames} fps, seq {sequence}, peak {:.0} Hz ({:.0} nm)",
                            peak.frequency, peak.wavelength
                        );
                    }
                    frames = 0;
                    window = Instant::now();
                }
            }
            ClientEvent::ConfigUpdate(config) => println!("server config: {config:?}"),
            ClientEvent::ConnectionStatus { connected, info } => {
                println!("connected={connected}: {info}");
            }
            ClientEvent::Error(err) => eprintln!("error: {err}"),
        }
    }
    Ok(())
}
