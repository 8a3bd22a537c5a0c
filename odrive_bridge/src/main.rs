//! # ODrive Bridge Binary
//!
//! Command-line front end for one motor.
//!
//! # Usage
//!
//! ```bash
//! # Simulated actuator, node 3
//! odrive_bridge --simulate --node 3 go-for 60 2
//!
//! # Real bus (build with --features socketcan)
//! odrive_bridge --config motor.toml --interface can0 status
//!
//! # Verbose JSON logs
//! odrive_bridge -s -v --json set-power 0.2
//! ```

use clap::{Parser, Subcommand};
use odrive_bridge::bus::{BusHandle, CanBus, VirtualBus};
use odrive_bridge::sim::{SimNodeOptions, SimulatedAxis, SimulatedNode};
use odrive_bridge::{OdriveMotor, Transport};
use odrive_common::config::{ConfigLoader, ConnectionType, LogLevel, MotorConfig};
use odrive_common::consts::BRIDGE_SERVICE_NAME;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Poll period while waiting for a move to finish.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// ODrive Bridge - drive an ODrive actuator over CAN
#[derive(Parser, Debug)]
#[command(name = "odrive_bridge")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Motor bridge for ODrive actuators on a shared CAN bus")]
#[command(long_about = None)]
struct Args {
    /// Motor configuration (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Node address when no config file is given
    #[arg(short, long, default_value_t = 0)]
    node: u8,

    /// Run against a simulated actuator
    #[arg(short = 's', long)]
    simulate: bool,

    /// SocketCAN interface (needs the `socketcan` feature)
    #[arg(short, long, default_value = "can0")]
    interface: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Action {
    /// Print the reported position
    Position,
    /// Drive with normalized power in [-1, 1]
    SetPower {
        #[arg(allow_negative_numbers = true)]
        power: f64,
    },
    /// Move N revolutions (0 spins until stopped)
    GoFor {
        #[arg(allow_negative_numbers = true)]
        rpm: f64,
        #[arg(allow_negative_numbers = true)]
        revolutions: f64,
    },
    /// Move to an absolute position
    GoTo {
        #[arg(allow_negative_numbers = true)]
        rpm: f64,
        #[arg(allow_negative_numbers = true)]
        position: f64,
    },
    /// Disarm the axis
    Stop,
    /// Print a status snapshot as JSON
    Status,
}

fn main() {
    if let Err(e) = run() {
        // Config errors surface before the subscriber is installed.
        error!("{} failed: {}", BRIDGE_SERVICE_NAME, e);
        eprintln!("{BRIDGE_SERVICE_NAME}: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MotorConfig::load(path)?,
        None => MotorConfig { canbus_node_id: Some(f64::from(args.node)), ..MotorConfig::default() },
    };

    setup_tracing(&args, config.log_level);
    info!("ODrive Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    // Keeps the simulated node alive for the motor's lifetime.
    let mut _sim_node = None;
    let transport = match (config.connection_type, args.simulate) {
        (ConnectionType::Direct, true) => {
            info!("Simulation mode: direct handle");
            Transport::Direct(Box::new(SimulatedAxis::default()))
        }
        (ConnectionType::Canbus, true) => {
            info!("Simulation mode: virtual bus");
            let ours = VirtualBus::new();
            let theirs: Arc<dyn CanBus> = Arc::new(ours.endpoint());
            let node = config.node_address()?;
            _sim_node = Some(SimulatedNode::spawn(theirs, node, SimulatedAxis::default(), SimNodeOptions::default()));
            Transport::Bus(BusHandle::open(Arc::new(ours)))
        }
        (ConnectionType::Canbus, false) => Transport::Bus(BusHandle::open(open_interface(&args.interface)?)),
        (ConnectionType::Direct, false) => {
            return Err("direct connections are only available with --simulate".into());
        }
    };

    let motor = OdriveMotor::new(&config, transport)?;

    match args.command {
        Action::Position => {
            wait_for_position(&motor, &running);
            println!("{:.4}", motor.get_position()?);
        }
        Action::SetPower { power } => {
            motor.set_power(power)?;
            hold_until_interrupted(&running);
            motor.stop()?;
        }
        Action::GoFor { rpm, revolutions } => {
            wait_for_position(&motor, &running);
            motor.go_for(rpm, revolutions)?;
            finish_move(&motor, &running, revolutions == 0.0)?;
        }
        Action::GoTo { rpm, position } => {
            wait_for_position(&motor, &running);
            motor.go_to(rpm, position)?;
            finish_move(&motor, &running, false)?;
        }
        Action::Stop => motor.stop()?,
        Action::Status => {
            wait_for_position(&motor, &running);
            println!("{}", serde_json::to_string_pretty(&motor.status())?);
        }
    }

    motor.shutdown();
    info!("ODrive Bridge shutdown complete");
    Ok(())
}

#[cfg(feature = "socketcan")]
fn open_interface(interface: &str) -> Result<Arc<dyn CanBus>, Box<dyn std::error::Error>> {
    Ok(Arc::new(odrive_bridge::bus::socketcan::SocketCanBus::open(interface)?))
}

#[cfg(not(feature = "socketcan"))]
fn open_interface(interface: &str) -> Result<Arc<dyn CanBus>, Box<dyn std::error::Error>> {
    Err(format!("cannot open '{interface}': built without the socketcan feature (use --simulate)").into())
}

/// Give the first encoder frames a moment to arrive.
fn wait_for_position(motor: &OdriveMotor, running: &AtomicBool) {
    for _ in 0..20 {
        if motor.get_position().is_ok() || !running.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(WAIT_POLL);
    }
    warn!("No encoder telemetry yet");
}

fn hold_until_interrupted(running: &AtomicBool) {
    info!("Running, press Ctrl-C to stop");
    while running.load(Ordering::SeqCst) {
        thread::sleep(WAIT_POLL);
    }
}

fn finish_move(motor: &OdriveMotor, running: &AtomicBool, continuous: bool) -> Result<(), Box<dyn std::error::Error>> {
    if continuous {
        hold_until_interrupted(running);
        motor.stop()?;
    } else {
        while running.load(Ordering::SeqCst) && motor.planner().goal().active {
            thread::sleep(WAIT_POLL);
        }
        if motor.planner().goal().active {
            motor.stop()?;
        }
    }
    println!("{:.4}", motor.get_position()?);
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose { "debug" } else { configured.as_directive() };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
