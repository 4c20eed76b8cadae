//! Composition root for the device-control and isolated-execution runtime.
//!
//! Wires configuration loading, logging, a simulated Device Core with its
//! components, the filter-sequence/calibration orchestrators, and the
//! isolated script executor behind an operator-facing CLI. Mirrors the
//! teacher's headless `rust-daq` binary: `clap` subcommands, `anyhow` at the
//! call sites, `tracing_subscriber::fmt().init()` once at startup.

mod config;

use anyhow::{Context, Result};
use aperture_core::{FilterDescriptor, FilterType};
use aperture_device::{AccessoryCoordinator, DeviceCore, ExposurePipeline, ProtocolAdapter, SimulatedAdapter, ThermalController};
use aperture_executor::{find_worker_executable, IsolatedExecutor};
use aperture_ipc::ExecuteRequest;
use aperture_orchestrate::{CalibrationKind, CalibrationOrchestrator, CalibrationRequest, FilterSequenceOrchestrator, SequenceStep};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "aperture-cli")]
#[command(about = "Device control and isolated script execution for astrophotography rigs", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (`[device]` / `[isolation]` tables).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the configured device and report its capabilities.
    Connect,
    /// Capture a single exposure of `duration_s` seconds.
    Expose { duration_s: f64 },
    /// Start cooling to `target_c` and hold, or stop with `--off`.
    Cool {
        target_c: Option<f64>,
        #[arg(long)]
        off: bool,
    },
    /// Switch to filter `name`.
    Filter { name: String },
    /// Run an LRGB-style filter sequence: repeated `filter:exposure_s:count` triples.
    Sequence {
        #[arg(value_parser = parse_step, num_args = 1..)]
        steps: Vec<SequenceStep>,
    },
    /// Capture calibration frames: dark, flat, or bias.
    Calibrate {
        #[arg(value_enum)]
        kind: CalibrationKindArg,
        count: u32,
        exposure_s: Option<f64>,
    },
    /// Execute a script file under the isolated executor.
    Exec {
        script_path: PathBuf,
        #[arg(long, default_value_t = 60.0)]
        timeout_s: f64,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum CalibrationKindArg {
    Dark,
    Flat,
    Bias,
}

impl From<CalibrationKindArg> for CalibrationKind {
    fn from(arg: CalibrationKindArg) -> Self {
        match arg {
            CalibrationKindArg::Dark => CalibrationKind::Dark,
            CalibrationKindArg::Flat => CalibrationKind::Flat,
            CalibrationKindArg::Bias => CalibrationKind::Bias,
        }
    }
}

fn parse_step(raw: &str) -> Result<SequenceStep, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("expected filter:exposure_s:count, got '{raw}'"));
    }
    let exposure_s: f64 = parts[1].parse().map_err(|_| format!("bad exposure_s in '{raw}'"))?;
    let count: u32 = parts[2].parse().map_err(|_| format!("bad count in '{raw}'"))?;
    Ok(SequenceStep {
        filter: parts[0].to_string(),
        exposure_s,
        count,
        gain: None,
        offset: None,
    })
}

/// Device hardware plus the components registered against it, kept
/// together so the composition root can wire orchestrators against the
/// same `Arc` instances the Device Core already owns.
struct Rig {
    core: Arc<DeviceCore>,
    exposure: Arc<ExposurePipeline>,
    thermal: Arc<ThermalController>,
    accessory: Arc<AccessoryCoordinator>,
}

fn build_rig(profile: &config::DeviceProfile) -> Result<Rig> {
    let adapter: Arc<dyn ProtocolAdapter> = Arc::new(SimulatedAdapter::new());
    let core = DeviceCore::new(adapter.clone());
    core.initialize().context("device core initialize failed")?;
    core.connect(&profile.device_name, profile.connect_timeout, profile.max_retry)
        .context("device connect failed")?;

    let exposure = ExposurePipeline::new(core.weak(), adapter.clone());
    let thermal = ThermalController::new(core.weak(), adapter.clone());
    let filters = vec![
        FilterDescriptor::new("L", FilterType::Luminance, 0),
        FilterDescriptor::new("R", FilterType::Red, 1),
        FilterDescriptor::new("G", FilterType::Green, 2),
        FilterDescriptor::new("B", FilterType::Blue, 3),
        FilterDescriptor::new("Ha", FilterType::Halpha, 4),
    ];
    let accessory = AccessoryCoordinator::new(core.weak(), adapter, filters);

    core.register_component(exposure.clone());
    core.register_component(thermal.clone());
    core.register_component(accessory.clone());

    Ok(Rig {
        core,
        exposure,
        thermal,
        accessory,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let app_config = config::load(cli.config.as_deref())?;
    let profile: config::DeviceProfile = app_config.device.clone().into();
    let isolation_config: aperture_executor::IsolationConfig = app_config.isolation.clone().into();

    match cli.command {
        Commands::Connect => {
            let rig = build_rig(&profile)?;
            info!(
                device = %rig.core.device_name().unwrap_or_default(),
                capabilities = ?rig.core.capabilities(),
                "connected"
            );
            println!("connected to {}", rig.core.device_name().unwrap_or_default());
        }
        Commands::Expose { duration_s } => {
            let rig = build_rig(&profile)?;
            rig.exposure.start_exposure(duration_s)?;
            while rig.exposure.is_exposing() {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            let frame = rig.exposure.current_result().context("exposure produced no frame")?;
            println!(
                "captured {}x{} frame ({} bytes)",
                frame.metadata.width,
                frame.metadata.height,
                frame.pixels.len()
            );
        }
        Commands::Cool { target_c, off } => {
            let rig = build_rig(&profile)?;
            if off {
                rig.thermal.stop_cooling()?;
                println!("cooling stopped");
            } else {
                let target = target_c.or(profile.thermal_setpoint_c).context(
                    "no target_c given and no thermal_setpoint_c configured",
                )?;
                rig.thermal.start_cooling(target)?;
                println!("cooling to {target}C");
            }
        }
        Commands::Filter { name } => {
            let rig = build_rig(&profile)?;
            rig.accessory.change_filter(&name)?;
            println!("switched to filter {name}");
        }
        Commands::Sequence { steps } => {
            let rig = build_rig(&profile)?;
            let orchestrator = FilterSequenceOrchestrator::new(rig.accessory.clone(), rig.exposure.clone());
            orchestrator.run(&steps)?;
            println!("sequence complete: {} frames", orchestrator.history().len());
        }
        Commands::Calibrate { kind, count, exposure_s } => {
            let rig = build_rig(&profile)?;
            let orchestrator = CalibrationOrchestrator::new(Some(rig.thermal.clone()), rig.exposure.clone());
            let request = CalibrationRequest {
                kind: kind.into(),
                count,
                exposure_s,
            };
            let frames = orchestrator.capture(&request, profile.thermal_setpoint_c)?;
            println!("captured {} calibration frame(s)", frames.len());
        }
        Commands::Exec { script_path, timeout_s } => {
            let script_content = std::fs::read_to_string(&script_path)
                .with_context(|| format!("reading script {}", script_path.display()))?;
            let worker_path = isolation_config
                .worker_path
                .clone()
                .or_else(|| find_worker_executable(None))
                .context("could not locate aperture-worker executable")?;
            let mut isolation_config = isolation_config;
            isolation_config.worker_path = Some(worker_path);

            let executor = IsolatedExecutor::new(isolation_config);
            let request = ExecuteRequest {
                script_content,
                script_path: Some(script_path.display().to_string()),
                function_name: None,
                arguments: serde_json::json!({}),
                timeout_s,
                capture_output: true,
                allowed_imports: Vec::new(),
                working_directory: None,
            };
            match executor.execute(request) {
                Ok(result) => println!("{}", result.output),
                Err(aperture_core::CoreError::ExecutionFailed { exception, exception_type, traceback }) => {
                    eprintln!(
                        "script failed: {} ({})",
                        exception.as_deref().unwrap_or("unknown error"),
                        exception_type.as_deref().unwrap_or("unknown")
                    );
                    if let Some(traceback) = traceback {
                        eprintln!("{traceback}");
                    }
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("executing script"),
            }
        }
    }
    Ok(())
}
