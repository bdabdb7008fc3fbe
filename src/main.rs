use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use apitor_runtime::config::{DEFAULT_ADDRESS, DEFAULT_BAUDRATE};
use apitor_runtime::runtime::{RunOptions, TransportKind};
use apitor_runtime::script::EXAMPLE_SCRIPT;

/// Drive an Apitor robot with a Lua control script
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Device MAC address, or the serial port path with --transport serial
    /// (defaults to the reference robot's MAC for sim and ble)
    address: Option<String>,

    #[arg(long, value_enum, default_value_t = TransportKind::Sim)]
    transport: TransportKind,

    /// Serial bridge baud rate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baud: u32,

    /// Lua script to run (defaults to the obstacle-avoidance example)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Also store the script on the robot
    #[arg(long)]
    upload: bool,

    /// Publish telemetry over zenoh
    #[arg(long)]
    publish: bool,

    /// Send the test command after connecting
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let script = match &args.script {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Cannot read script {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => EXAMPLE_SCRIPT.to_string(),
    };

    let address = match (args.address, args.transport) {
        (Some(address), _) => address,
        (None, TransportKind::Serial) => {
            eprintln!("A serial port path is required with --transport serial");
            std::process::exit(1);
        }
        (None, _) => DEFAULT_ADDRESS.to_string(),
    };

    let options = RunOptions {
        address,
        transport: args.transport,
        baudrate: args.baud,
        script,
        upload: args.upload,
        publish: args.publish,
        test: args.test,
    };

    if let Err(e) = apitor_runtime::runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
