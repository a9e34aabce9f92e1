pub mod config;
pub mod connection;
pub mod error;
pub mod instruments;
pub mod logger;
pub mod measurement;
pub mod output;
pub mod plotting;
pub mod simulation;
pub mod sweep;
pub mod tagger;
pub mod types;

pub use config::{load_config, AppConfig, GateWindows, ShutdownPolicy, SweepConfig};
pub use connection::{BiasOutcome, FailureReason, InstrumentConnection};
pub use error::SweepError;
pub use instruments::{
    FunctionGenerator, InstrumentSet, PowerSupply, ShutdownStep, SourceFactory, VoltageSource,
};
pub use logger::Logger;
pub use measurement::{Reading, StepMeasurement};
pub use output::{read_table, write_csv, OutputPaths, SweepTable};
pub use plotting::{plot_curve, save_curve_png};
pub use simulation::SimulatedBench;
pub use sweep::{SweepController, SweepPoint, SweepResult, SweepState};
pub use tagger::{Counter, GatedPair, TimeTagger};
pub use types::{MeasurementMode, Picoseconds, TriggerLevel};
