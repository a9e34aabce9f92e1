use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use log::{info, warn, LevelFilter};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use pcr_sweep::config::{load_config, AppConfig, SweepConfig, TaggerBackend};
use pcr_sweep::instruments::InstrumentSet;
use pcr_sweep::simulation::SimulatedBench;
use pcr_sweep::tagger::TimeTagger;
use pcr_sweep::{OutputPaths, SweepController};

/// PCR / DCR bias sweep
#[derive(Parser, Debug)]
#[command(name = "pcr-sweep")]
#[command(about = "Bias sweep of a single-photon detector with gated count rates", long_about = None)]
struct Args {
    /// Path to the parameter file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", required = true)]
    config: PathBuf,

    /// CSV output file; the PNG and run summary are written next to it
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Run against the simulated bench instead of the instruments
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or(config.console.verbosity.clone());
    initialize_logging(&log_level)?;

    // Validation happens before any instrument is touched
    let sweep = config.sweep_config()?;
    config.check_tagger_backend(args.simulate)?;
    log_startup_info(&config, &sweep, &args.config);

    let outputs = OutputPaths::from_csv(create_output_path(args.output.as_deref())?);
    info!("Output: {}", outputs.csv.display());

    let (instruments, tagger) = setup_bench(&config);

    let controller = SweepController::new(sweep, instruments, tagger, config.tagger.clone())
        .with_outputs(outputs)
        .with_live_plot(config.console.live_plot)
        .with_shutdown_delay(Duration::from_secs_f64(config.timing.shutdown_delay.max(0.0)));

    run_and_report(controller)
}

/// Build the bench the tagger backend counts on
fn setup_bench(config: &AppConfig) -> (InstrumentSet, Box<dyn TimeTagger>) {
    match config.tagger.backend {
        TaggerBackend::Simulated => {
            info!("Using simulated bench");
            let bench = SimulatedBench::new();
            let instruments = bench.instrument_set(&config.source, &config.instruments);
            (instruments, Box::new(bench.tagger(true)))
        }
    }
}

/// Log startup information
fn log_startup_info(config: &AppConfig, sweep: &SweepConfig, config_path: &Path) {
    info!("=== PCR Bias Sweep ===");
    info!("Configuration: {}", config_path.display());
    info!("Measurement type: {}", sweep.mode);
    info!(
        "Voltage: {} V to {} V in steps of {} V ({} points)",
        sweep.start,
        sweep.stop,
        sweep.step,
        sweep.bias_values().len()
    );
    info!("Integration time: {} s", sweep.integration_time);
    let levels: Vec<String> = sweep.trigger_levels.iter().map(|l| l.to_string()).collect();
    info!("Trigger levels: [{}]", levels.join(", "));
    info!("Fudge factor: {}", sweep.fudge_factor);
    info!(
        "SIM928: {} (GPIB {}, slot {})",
        config.source.port, config.source.gpib_address, config.source.slot
    );
    if let Some(ref address) = config.instruments.function_generator {
        info!("Function generator: {}", address);
    }
    if let Some(ref address) = config.instruments.power_supply {
        info!("Power supply: {}", address);
    }
    info!(
        "Turn off after sweep: sim928={}, cryo_amp={}, thermal_source={}",
        sweep.shutdown.sim928, sweep.shutdown.cryo_amp, sweep.shutdown.thermal_source
    );
}

/// Run the sweep and report results
fn run_and_report(mut controller: SweepController) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting bias sweep...");
    let result = controller.run();

    let measured = result.points.iter().filter(|p| !p.is_missing()).count();
    if measured == result.points.len() {
        info!("✓ Sweep completed: {} points measured", measured);
    } else {
        warn!(
            "✓ Sweep completed with gaps: {} of {} points measured",
            measured,
            result.points.len()
        );
    }

    for step in controller.shutdown_report() {
        if !step.succeeded() {
            warn!("✗ {} was not turned off", step.instrument);
        }
    }

    info!("Cleaning up and shutting down...");
    drop(controller);
    info!("Cleanup complete");

    Ok(())
}

/// Initialize logging with configurable level
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}

fn create_output_path(requested: Option<&Path>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = match requested {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(format!(
            "PCR_Curve_Data_{}.csv",
            Utc::now().format("%Y%m%d_%H%M%S")
        )),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    Ok(path)
}
