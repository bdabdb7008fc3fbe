// Runtime: connect, start the telemetry loop and the script, then wait for
// Ctrl-C, link loss or the script ending. Optionally publishes telemetry
// over zenoh at a fixed rate.

use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{PUBLISH_HZ, TOPIC_HEALTH, TOPIC_TELEMETRY};
use crate::connection::ConnectionManager;
use crate::link::{SerialTransport, SimTransport, Transport};
use crate::script::{LuaEngine, ScriptBridge, ScriptError, ScriptExecution};
use crate::session::Session;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How to reach the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// In-process simulated robot
    Sim,
    /// BLE-UART bridge on a serial port (address is the port path)
    Serial,
    /// Direct Bluetooth LE connection (address is the device MAC)
    Ble,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub address: String,
    pub transport: TransportKind,
    pub baudrate: u32,
    pub script: String,
    pub upload: bool,
    pub publish: bool,
    pub test: bool,
}

/// Why the runtime stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Interrupted,
    LinkLost,
    ScriptEnded,
}

pub async fn run(options: RunOptions) -> Result<(), BoxError> {
    let transport: Box<dyn Transport + Send> = match options.transport {
        TransportKind::Sim => Box::new(SimTransport::default()),
        TransportKind::Serial => Box::new(SerialTransport::new(options.baudrate)),
        TransportKind::Ble => ble_transport()?,
    };
    run_with(transport, options).await
}

#[cfg(feature = "ble")]
fn ble_transport() -> Result<Box<dyn Transport + Send>, BoxError> {
    Ok(Box::new(crate::link::BleTransport::default()))
}

#[cfg(not(feature = "ble"))]
fn ble_transport() -> Result<Box<dyn Transport + Send>, BoxError> {
    Err("built without Bluetooth support (enable the `ble` feature)".into())
}

/// Run against an already chosen transport
pub async fn run_with(
    transport: Box<dyn Transport + Send>,
    options: RunOptions,
) -> Result<(), BoxError> {
    // Connecting and link writes block, keep them off the async workers
    let address = options.address.clone();
    let link = tokio::task::spawn_blocking(move || {
        ConnectionManager::default().connect(transport.as_ref(), &address)
    })
    .await??;

    let session = Session::new(link);
    let setup = {
        let session = session.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
            session.send_identity_request()?;
            if options.test {
                session.send_test()?;
            }
            if options.upload {
                session.send_script(&options.script)?;
            }
            Ok(())
        })
    };
    setup.await??;

    let telemetry = session.spawn_telemetry()?;
    let mut script = ScriptExecution::new(ScriptBridge::new(session.state()));
    script.start(options.script.clone(), LuaEngine::new)?;

    let publisher = options.publish.then(|| {
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = publish_telemetry(session).await {
                warn!("Telemetry publishing stopped: {}", e);
            }
        })
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = interval(Duration::from_millis(100));

    let exit = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Exit::Interrupted,
            _ = tick.tick() => {
                if telemetry.is_finished() {
                    break Exit::LinkLost;
                }
                if script.is_finished() {
                    break Exit::ScriptEnded;
                }
            }
        }
    };
    info!("Shutting down ({:?})", exit);

    // Both tasks exit at their next checkpoint
    script.stop();
    telemetry.stop();
    let script_result = tokio::task::spawn_blocking(move || script.join()).await?;
    let telemetry_result = tokio::task::spawn_blocking(move || telemetry.join()).await?;
    if let Some(publisher) = publisher {
        publisher.abort();
    }

    // Leave the robot stopped if we can still reach it
    telemetry_result?;
    let halted = tokio::task::spawn_blocking(move || session.halt_outputs()).await?;
    if let Err(e) = halted {
        warn!("Could not stop outputs: {}", e);
    }

    match script_result {
        Ok(()) => info!("Script completed"),
        Err(ScriptError::Cancelled) => info!("Script stopped"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Publish device snapshots and link health until the publisher fails
async fn publish_telemetry(session: Session) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let zenoh = zenoh::open(zenoh::Config::default()).await?;
    let pub_telemetry = zenoh.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = zenoh.declare_publisher(TOPIC_HEALTH).await?;

    info!(
        "Publishing to: {}, {} at {}Hz",
        TOPIC_TELEMETRY, TOPIC_HEALTH, PUBLISH_HZ
    );
    let mut tick = interval(Duration::from_millis(1000 / PUBLISH_HZ));

    loop {
        tick.tick().await;

        let snapshot_json = serde_json::to_string(&session.snapshot())?;
        pub_telemetry.put(snapshot_json).await?;

        let health_json = serde_json::to_string(&session.health())?;
        pub_health.put(health_json).await?;
    }
}
