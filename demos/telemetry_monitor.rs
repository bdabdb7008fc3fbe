// Telemetry monitor: prints what a runtime started with --publish sends
//
// Usage: cargo run --example telemetry_monitor

use apitor_runtime::config::{TOPIC_HEALTH, TOPIC_TELEMETRY};
use apitor_runtime::device::state::LED_COLOR_NAMES;
use apitor_runtime::messages::{LinkHealth, TelemetrySnapshot};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let telemetry = session.declare_subscriber(TOPIC_TELEMETRY).await?;
    let health = session.declare_subscriber(TOPIC_HEALTH).await?;
    info!("Listening on {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    let mut last_health = None;

    loop {
        tokio::select! {
            sample = telemetry.recv_async() => {
                let sample = sample?;
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<TelemetrySnapshot>(&payload) {
                    Ok(snap) => print_snapshot(&snap),
                    Err(e) => warn!("Failed to parse telemetry: {}", e),
                }
            }
            sample = health.recv_async() => {
                let sample = sample?;
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<LinkHealth>(&payload) {
                    // Only report changes
                    Ok(h) if last_health != Some(h) => {
                        info!("Link health: {:?}", h);
                        last_health = Some(h);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to parse health: {}", e),
                }
            }
        }
    }
}

fn print_snapshot(snap: &TelemetrySnapshot) {
    let leds: Vec<&str> = snap
        .leds
        .iter()
        .map(|&c| LED_COLOR_NAMES.get(usize::from(c)).copied().unwrap_or("?"))
        .collect();
    println!(
        "uid={} motors={:?} leds={:?} distance={:?} battery={} mode={}",
        snap.uid.as_deref().unwrap_or("-"),
        snap.motors,
        leds,
        snap.distances,
        snap.battery_level,
        snap.mode
    );
}
