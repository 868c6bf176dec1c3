/*!
# I-Scan Wizard

Controller for the I-Scan positioning rig: a sensor carriage on a
stepper-driven rail, a servo that keeps the sensor aimed at a target, an
RGB LED and a home limit switch, all behind the microcontroller's HTTP API.

## Features

- Targeting-angle calculator for any carriage position
- Direct servo, stepper, LED and button control
- Operation queue with CSV import/export, repeat, pause and cancel
- Scan plan generation
- Simulated rig for running without hardware

## Usage

### GUI Mode (default)
```bash
iscan-wizard
```

### Command Line Mode
```bash
iscan-wizard angle 30
iscan-wizard --base-url http://192.168.137.7 servo 45
iscan-wizard move --cm 10 --direction down
iscan-wizard run scan.csv --repeat
iscan-wizard plan --preset original --output scan.csv
```

### Without hardware
```bash
iscan-wizard --simulate run scan.csv
```
*/

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::unbounded;
use shared::scan_plan::ScanPreset;
use shared::{Direction, OperationQueue, TargetingGeometry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod device;
mod error;
mod executor;
mod gui;
mod home;
mod sim;
mod state;
mod tasks;

use config::{AppConfig, DEFAULT_CONFIG_FILE};
use device::{DeviceApi, HttpDevice};
use error::ExecError;
use executor::Executor;
use gui::WizardGui;
use sim::SimulatedRig;
use state::AppState;
use tasks::{CancelToken, DeviceCommand, PauseFlag};

#[derive(Parser)]
#[command(name = "iscan-wizard")]
#[command(about = "Control the I-Scan positioning rig and run scan queues")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Use the simulated rig instead of the HTTP API
    #[arg(long, global = true)]
    simulate: bool,

    /// Override the device base URL from the config file
    #[arg(long, global = true)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the servo angle for a carriage position
    Angle {
        /// Carriage position along the rail (cm)
        y: f64,

        #[arg(long)]
        target_x: Option<f64>,

        #[arg(long)]
        target_y: Option<f64>,

        #[arg(long)]
        sensor_x: Option<f64>,

        /// Print the breakdown as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the servo angle (0-90)
    Servo { angle: u8 },

    /// Move the carriage
    Move {
        /// Step count
        #[arg(long, conflicts_with = "cm", required_unless_present = "cm")]
        steps: Option<u32>,

        /// Distance in centimetres, converted with the configured wheel diameter
        #[arg(long)]
        cm: Option<f64>,

        #[arg(short, long, value_enum, default_value = "up")]
        direction: DirectionArg,

        #[arg(long)]
        speed: Option<u32>,
    },

    /// Set the LED colour (#RRGGBB)
    Led { color: String },

    /// Set the LED brightness (0-100)
    Brightness { value: u8 },

    /// Query the home switch
    Button,

    /// Run the home routine
    Home,

    /// Execute a queue file
    Run {
        /// Queue CSV (type,params,description)
        csv: PathBuf,

        /// Repeat the queue until Ctrl+C
        #[arg(long)]
        repeat: bool,
    },

    /// Generate a scan plan queue file
    Plan {
        /// Output CSV path (default: timestamped name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Start from a preset: original, standard, quick-test
        #[arg(long)]
        preset: Option<String>,

        /// Total scan distance (cm)
        #[arg(long)]
        distance: Option<f64>,

        /// Number of measurement points
        #[arg(long)]
        measurements: Option<u32>,

        #[arg(long)]
        target_x: Option<f64>,

        #[arg(long)]
        target_y: Option<f64>,

        /// Print the per-point table
        #[arg(long)]
        table: bool,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Up,
    Down,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Up => Direction::Up,
            DirectionArg::Down => Direction::Down,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr to keep stdout clean for command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Some(Commands::Config { output }) = &cli.command {
        return generate_config_file(output);
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(base_url) = &cli.base_url {
        config.device.base_url = base_url.clone();
    }

    match cli.command {
        None => run_gui(config, cli.config, cli.simulate),

        Some(Commands::Angle {
            y,
            target_x,
            target_y,
            sensor_x,
            json,
        }) => {
            let base = config.rig.geometry;
            let geometry = TargetingGeometry::new(
                target_x.unwrap_or(base.target_x),
                target_y.unwrap_or(base.target_y),
                sensor_x.unwrap_or(base.sensor_x),
            )?;
            print_angle(&geometry, y, json)
        }

        Some(Commands::Servo { angle }) => {
            run_device_command(&config, cli.simulate, DeviceCommand::Servo(angle))
        }

        Some(Commands::Move {
            steps,
            cm,
            direction,
            speed,
        }) => {
            let steps = match (steps, cm) {
                (Some(steps), _) => steps,
                (None, Some(cm)) => shared::rig::steps_for_distance(cm, config.rig.wheel_diameter_mm)?,
                (None, None) => bail!("either --steps or --cm is required"),
            };
            let command = DeviceCommand::Move {
                steps,
                direction: direction.into(),
                speed: speed.or(Some(config.rig.motor_speed)),
            };
            run_device_command(&config, cli.simulate, command)
        }

        Some(Commands::Led { color }) => {
            run_device_command(&config, cli.simulate, DeviceCommand::LedColor(color))
        }

        Some(Commands::Brightness { value }) => {
            run_device_command(&config, cli.simulate, DeviceCommand::Brightness(value))
        }

        Some(Commands::Button) => run_device_command(&config, cli.simulate, DeviceCommand::Button),

        Some(Commands::Home) => run_home(&config, cli.simulate),

        Some(Commands::Run { csv, repeat }) => run_queue_file(&config, cli.simulate, csv, repeat),

        Some(Commands::Plan {
            output,
            preset,
            distance,
            measurements,
            target_x,
            target_y,
            table,
        }) => {
            let mut plan = match preset {
                Some(name) => ScanPreset::from_name(&name)
                    .with_context(|| format!("Unknown preset '{}' (original, standard, quick-test)", name))?
                    .config(),
                None => config.scan.clone(),
            };
            if let Some(distance) = distance {
                plan.scan_distance_cm = distance;
            }
            if let Some(measurements) = measurements {
                plan.measurements = measurements;
            }
            if let Some(target_x) = target_x {
                plan.geometry.target_x = target_x;
            }
            if let Some(target_y) = target_y {
                plan.geometry.target_y = target_y;
            }
            generate_plan(&plan, output, table)
        }

        Some(Commands::Config { .. }) => Ok(()),
    }
}

/// Device used for hardware work: the HTTP API or the simulated rig
pub(crate) fn connect(config: &AppConfig, simulate: bool) -> Arc<dyn DeviceApi> {
    if simulate {
        info!("🧪 Using simulated rig");
        Arc::new(SimulatedRig::default().with_latency(Duration::from_millis(20)))
    } else {
        info!("📡 Using rig at {}", config.device.base_url);
        Arc::new(HttpDevice::new(&config.device.base_url, config.device.timeout()))
    }
}

/// Executor for a one-shot CLI job plus a Ctrl+C handler that cancels it
fn cli_executor(config: &AppConfig, simulate: bool) -> Result<(Executor, CancelToken)> {
    let state = AppState::from_config(&config.rig)?.into_shared();
    // CLI output goes through tracing; nobody drains the event channel
    let (events, _) = unbounded();
    let executor = Executor::new(connect(config, simulate), state, config, events, PauseFlag::new());

    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, stopping...");
        handler_token.cancel();
    })?;

    Ok((executor, token))
}

fn run_device_command(config: &AppConfig, simulate: bool, command: DeviceCommand) -> Result<()> {
    let (executor, token) = cli_executor(config, simulate)?;
    executor
        .run_device_command(&command, &token)
        .with_context(|| format!("{:?} failed", command))?;
    println!("✅ Done");
    Ok(())
}

fn run_home(config: &AppConfig, simulate: bool) -> Result<()> {
    let (executor, token) = cli_executor(config, simulate)?;
    match executor.run_home(&token) {
        Ok(outcome) => {
            match outcome.pressed_at_attempt {
                Some(attempt) => println!("✅ Home switch found on attempt {}", attempt),
                None => println!("⚠️ Home switch not found, position reset anyway"),
            }
            Ok(())
        }
        Err(ExecError::Cancelled) => {
            println!("🛑 Home cancelled");
            Ok(())
        }
        Err(e) => Err(e).context("Home routine failed"),
    }
}

fn run_queue_file(config: &AppConfig, simulate: bool, csv: PathBuf, repeat: bool) -> Result<()> {
    let mut queue = OperationQueue::new();
    queue
        .import_csv(&csv)
        .with_context(|| format!("Failed to load queue from {}", csv.display()))?;

    println!("🚀 Running {} operations from {}", queue.len(), csv.display());
    if repeat {
        println!("🔁 Repeating until Ctrl+C");
    }

    let (executor, token) = cli_executor(config, simulate)?;
    match executor.run_queue(&queue, repeat, &token) {
        Ok(summary) => {
            println!(
                "✅ Queue completed: {} succeeded, {} failed",
                summary.executed, summary.failed
            );
            if summary.failed > 0 {
                bail!("{} operations failed", summary.failed);
            }
            Ok(())
        }
        Err(ExecError::Cancelled) => {
            println!("🛑 Queue cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_angle(geometry: &TargetingGeometry, y: f64, json: bool) -> Result<()> {
    let info = geometry.angle_info(y)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("🎯 Target: ({}, {}) cm, sensor X: {} cm", info.target.x, info.target.y, info.sensor_x);
    println!("📏 Sensor Y: {} cm", info.current_y);
    println!("   dx = {:.2} cm, dy = {:.2} cm, distance = {:.2} cm", info.dx, info.dy, info.distance_to_target);
    println!("   bearing = {:.2}°, angle to horizontal = {:.2}°", info.bearing_deg, info.angle_to_horizontal);
    if info.limit.is_limited() {
        println!("⚠️ Servo angle: {}° ({}, clamped)", info.servo_angle, info.limit.as_str());
    } else {
        println!("✅ Servo angle: {}°", info.servo_angle);
    }
    Ok(())
}

fn generate_plan(plan: &shared::ScanPlanConfig, output: Option<PathBuf>, table: bool) -> Result<()> {
    let queue = plan.build_queue()?;
    let output = output.unwrap_or_else(|| {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("iscan_plan_{}.csv", timestamp))
    });

    if table {
        println!("{:>4} {:>8} {:>7} {:>9}", "#", "Y (cm)", "Angle", "Reachable");
        for point in plan.scan_points()? {
            println!(
                "{:>4} {:>8.1} {:>6}° {:>9}",
                point.number,
                point.y_cm,
                point.servo_angle,
                if point.reachable { "yes" } else { "no" }
            );
        }
    }

    queue
        .export_csv(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("✅ Scan plan with {} operations written to {}", queue.len(), output.display());
    println!("📝 Run it with:");
    println!("   iscan-wizard run {}", output.display());
    Ok(())
}

/// Run the GUI application
fn run_gui(config: AppConfig, config_path: PathBuf, simulate: bool) -> Result<()> {
    println!("🖥️ Starting I-Scan Wizard GUI");

    let state = AppState::from_config(&config.rig)?.into_shared();
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([config.gui.window_width, config.gui.window_height])
            .with_title("I-Scan Wizard"),
        ..Default::default()
    };

    let dark_mode = config.gui.dark_mode;
    eframe::run_native(
        "I-Scan Wizard",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(if dark_mode {
                egui::Visuals::dark()
            } else {
                egui::Visuals::light()
            });
            Ok(Box::new(WizardGui::new(config, config_path, simulate, state, cc)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("GUI failed: {}", e))?;

    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: &Path) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   iscan-wizard --config {}", output_path.display());

    Ok(())
}
