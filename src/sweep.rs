use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{SweepConfig, TaggerConfig};
use crate::connection::BiasOutcome;
use crate::instruments::{InstrumentSet, ShutdownStep};
use crate::logger::Logger;
use crate::measurement::{Reading, StepMeasurement};
use crate::output::{write_csv, OutputPaths};
use crate::plotting::{plot_curve, save_curve_png};
use crate::tagger::TimeTagger;

/// One bias value and what was measured there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub bias_voltage: f64,
    /// Detector current in µA
    pub current_ua: f64,
    /// One slot per trigger level, in configured order
    pub readings: Vec<Option<Reading>>,
}

impl SweepPoint {
    pub fn missing(bias_voltage: f64, current_ua: f64, levels: usize) -> Self {
        Self {
            bias_voltage,
            current_ua,
            readings: vec![None; levels],
        }
    }

    pub fn is_missing(&self) -> bool {
        self.readings.iter().all(Option::is_none)
    }
}

/// Everything a sweep produced, with the parameters that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub config: SweepConfig,
    pub points: Vec<SweepPoint>,
}

impl SweepResult {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            points: Vec::new(),
        }
    }

    pub fn num_bins(&self) -> usize {
        self.config.num_bins()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    SettingBias,
    Measuring,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Running { step: usize, phase: StepPhase },
    Completed,
}

/// Drives the bias through its range and measures at every step.
///
/// Owns the instruments for the duration of the run. Nothing inside the
/// loop aborts the sweep: a bias that cannot be applied or a measurement
/// that fails is recorded as missing and the next step proceeds.
pub struct SweepController {
    config: SweepConfig,
    instruments: InstrumentSet,
    tagger: Box<dyn TimeTagger>,
    channels: TaggerConfig,
    outputs: Option<OutputPaths>,
    live_plot: bool,
    shutdown_delay: Duration,
    state: SweepState,
    shutdown_report: Vec<ShutdownStep>,
}

impl SweepController {
    pub fn new(
        config: SweepConfig,
        instruments: InstrumentSet,
        tagger: Box<dyn TimeTagger>,
        channels: TaggerConfig,
    ) -> Self {
        Self {
            config,
            instruments,
            tagger,
            channels,
            outputs: None,
            live_plot: false,
            shutdown_delay: Duration::ZERO,
            state: SweepState::Idle,
            shutdown_report: Vec::new(),
        }
    }

    /// Write the CSV, PNG and run log at these paths
    pub fn with_outputs(mut self, outputs: OutputPaths) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// Redraw the curve in the terminal after every step
    pub fn with_live_plot(mut self, enabled: bool) -> Self {
        self.live_plot = enabled;
        self
    }

    /// Pause between writing outputs and powering instruments down
    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn instruments(&self) -> &InstrumentSet {
        &self.instruments
    }

    /// Result of the shutdown policy from the last run
    pub fn shutdown_report(&self) -> &[ShutdownStep] {
        &self.shutdown_report
    }

    /// Run the whole sweep, write outputs, then apply the shutdown policy
    pub fn run(&mut self) -> SweepResult {
        let biases = self.config.bias_values();
        let levels = self.config.trigger_levels.len();
        let mode = self.config.mode;

        info!(
            "Starting {} sweep: {} bias points, {} trigger levels",
            mode.name().to_uppercase(),
            biases.len(),
            levels
        );
        info!("Estimated completion time: {} minutes", self.config.estimated_minutes());

        let measurement = StepMeasurement::prepare(self.tagger.as_mut(), &self.config, &self.channels);
        let mut run_log = self
            .outputs
            .as_ref()
            .map(|paths| Logger::<SweepPoint>::new(&paths.run_log, 1));

        let mut result = SweepResult::new(self.config.clone());

        for (i, &bias) in biases.iter().enumerate() {
            let current = self.config.bias_current_ua(bias);

            self.state = SweepState::Running {
                step: i,
                phase: StepPhase::SettingBias,
            };
            let outcome = self.instruments.source.set_voltage(bias);

            let point = match outcome {
                BiasOutcome::Applied { .. } => {
                    self.state = SweepState::Running {
                        step: i,
                        phase: StepPhase::Measuring,
                    };
                    info!("Bias {} V ({} uA)", bias, current);
                    SweepPoint {
                        bias_voltage: bias,
                        current_ua: current,
                        readings: measurement.measure(self.tagger.as_mut()),
                    }
                }
                BiasOutcome::Failed(reason) => {
                    warn!(
                        "Skipping measurements for bias voltage index {} (Voltage: {:.3} V): {}",
                        i, bias, reason
                    );
                    SweepPoint::missing(bias, current, levels)
                }
            };

            self.state = SweepState::Running {
                step: i,
                phase: StepPhase::Recording,
            };
            if let Some(logger) = run_log.as_mut() {
                if let Err(e) = logger.add(point.clone()) {
                    error!("Run log disabled: {}", e);
                    run_log = None;
                }
            }
            result.points.push(point);

            if self.live_plot {
                if let Err(e) = plot_curve(&result, None, None) {
                    warn!("Live plot failed: {}", e);
                }
            }
        }

        self.state = SweepState::Completed;
        info!("Finished {} Curve Measurement.", mode.name().to_uppercase());

        if let Some(paths) = &self.outputs {
            write_outputs(&result, paths, run_log.take());
        }

        if self.config.shutdown.any() {
            std::thread::sleep(self.shutdown_delay);
        }
        self.shutdown_report = self.instruments.shutdown(&self.config.shutdown);

        result
    }
}

/// Write every artifact; a failure is logged and the others are still written
fn write_outputs(result: &SweepResult, paths: &OutputPaths, run_log: Option<Logger<SweepPoint>>) {
    match save_curve_png(result, &paths.png) {
        Ok(()) => info!("Plot saved as: {}", paths.png.display()),
        Err(e) => error!("Error saving plot: {}", e),
    }

    match write_csv(result, &paths.csv) {
        Ok(()) => info!("CSV data saved as: {}", paths.csv.display()),
        Err(e) => error!("Error writing CSV file: {}", e),
    }

    if let Some(mut logger) = run_log {
        match logger.finalize(result, &paths.summary) {
            Ok(()) => info!("Run summary saved as: {}", paths.summary.display()),
            Err(e) => error!("Error writing run summary: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GateWindows, InstrumentsConfig, ShutdownPolicy, SourceConfig};
    use crate::output::read_table;
    use crate::simulation::SimulatedBench;
    use crate::types::{MeasurementMode, TriggerLevel};

    fn config(mode: MeasurementMode, start: f64, stop: f64, step: f64, levels: &[&str]) -> SweepConfig {
        SweepConfig {
            start,
            stop,
            step,
            integration_time: 1.0,
            mode,
            trigger_levels: levels.iter().map(|l| TriggerLevel::parse(l).unwrap()).collect(),
            fudge_factor: 1.0,
            bin_duration: 0.1,
            settle_time: Duration::ZERO,
            series_resistance: 1.02e6,
            gating: GateWindows::default(),
            shutdown: ShutdownPolicy::default(),
        }
    }

    fn controller(bench: &SimulatedBench, config: SweepConfig) -> SweepController {
        let instruments = bench.instrument_set(&SourceConfig::default(), &InstrumentsConfig::default());
        SweepController::new(config, instruments, Box::new(bench.tagger(false)), TaggerConfig::default())
    }

    #[test]
    fn test_filtered_sweep_produces_one_point_per_bias() {
        let bench = SimulatedBench::new();
        let config = config(MeasurementMode::FilteredPcr, 0.05, 0.09, 0.01, &["-0.02", "-0.03"]);
        let mut controller = controller(&bench, config);
        assert_eq!(controller.state(), SweepState::Idle);

        let result = controller.run();
        assert_eq!(controller.state(), SweepState::Completed);
        assert_eq!(result.points.len(), 5);

        let expected = [0.05, 0.06, 0.07, 0.08, 0.09];
        for (point, bias) in result.points.iter().zip(expected) {
            assert!((point.bias_voltage - bias).abs() < 1e-9);
            assert_eq!(point.readings.len(), 2);
            assert!(point.readings.iter().all(|r| matches!(r, Some(Reading::Gated { .. }))));
        }
        assert!((bench.voltage().unwrap() - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_dcr_sweep_has_ten_bins() {
        let bench = SimulatedBench::new();
        let config = config(MeasurementMode::Dcr, 0.0, 0.1, 0.05, &["-0.04"]);
        let result = controller(&bench, config).run();

        assert_eq!(result.num_bins(), 10);
        for point in &result.points {
            match point.readings[0].as_ref().unwrap() {
                Reading::Rate(rates) => assert_eq!(rates.len(), 10),
                other => panic!("expected rate reading, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_failed_bias_keeps_alignment_and_continues() {
        let bench = SimulatedBench::new();
        let config = config(MeasurementMode::FilteredPcr, 0.1, 0.3, 0.1, &["-0.02", "-0.03"]);
        let tmp = tempfile::tempdir().unwrap();
        let paths = OutputPaths::from_csv(tmp.path().join("curve.csv"));
        let mut controller = controller(&bench, config).with_outputs(paths.clone());

        // First step drops the link and the next port is dead; the second
        // step rotates on to a live port.
        bench.kill_port("/dev/ttyUSB1");
        bench.drop_links(1);
        let result = controller.run();

        assert_eq!(result.points.len(), 3);
        assert!(result.points[0].is_missing());
        assert!((result.points[0].current_ua - 0.098).abs() < 1e-12);
        assert!(!result.points[1].is_missing());
        assert!(!result.points[2].is_missing());

        let table = read_table(&paths.csv).unwrap();
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][0], Some(0.1));
        assert_eq!(table.rows[0][1], Some(0.098));
        assert!(table.rows[0][2..].iter().all(Option::is_none));
        assert!(table.rows[1][2..].iter().all(Option::is_some));
    }

    #[test]
    fn test_unavailable_source_skips_every_step() {
        let bench = SimulatedBench::new();
        bench.kill_port("/dev/ttyUSB0");
        bench.kill_port("/dev/ttyUSB1");
        let config = config(MeasurementMode::FilteredPcr, 0.0, 0.2, 0.1, &["-0.02"]);
        let mut controller = controller(&bench, config);
        assert!(!controller.instruments().source.is_available());

        let result = controller.run();
        assert_eq!(result.points.len(), 3);
        assert!(result.points.iter().all(SweepPoint::is_missing));
        assert!(bench.trigger_log().is_empty());
    }

    #[test]
    fn test_shutdown_attempts_every_instrument() {
        let bench = SimulatedBench::new();
        let mut config = config(MeasurementMode::FilteredPcr, 0.0, 0.1, 0.1, &["-0.02"]);
        config.shutdown = ShutdownPolicy {
            sim928: true,
            cryo_amp: true,
            thermal_source: true,
        };
        bench.fail_instrument("power_supply");

        let mut controller = controller(&bench, config);
        controller.run();

        let report = controller.shutdown_report();
        let names: Vec<_> = report.iter().map(|s| s.instrument).collect();
        assert_eq!(names, vec!["sim928", "cryo_amp", "thermal_source"]);
        assert!(report[0].succeeded());
        assert!(!report[1].succeeded());
        assert!(report[2].succeeded());

        assert!(!bench.source_output_on());
        assert_eq!(bench.command_log(), vec!["OUTP2 OFF"]);
    }

    #[test]
    fn test_no_shutdown_without_policy() {
        let bench = SimulatedBench::new();
        let config = config(MeasurementMode::Dcr, 0.0, 0.1, 0.1, &["-0.02"]);
        let mut controller = controller(&bench, config);
        controller.run();
        assert!(controller.shutdown_report().is_empty());
        assert!(bench.source_output_on());
        assert!(bench.command_log().is_empty());
    }

    #[test]
    fn test_unwritable_outputs_do_not_stop_shutdown() {
        let bench = SimulatedBench::new();
        let tmp = tempfile::tempdir().unwrap();
        let paths = OutputPaths::from_csv(tmp.path().join("missing").join("curve.csv"));
        let mut config = config(MeasurementMode::FilteredPcr, 0.05, 0.08, 0.01, &["-0.02"]);
        config.shutdown = ShutdownPolicy {
            sim928: true,
            cryo_amp: true,
            thermal_source: true,
        };

        let mut controller = controller(&bench, config).with_outputs(paths.clone());
        let result = controller.run();

        assert_eq!(result.points.len(), 4);
        assert!(result.points.iter().all(|p| !p.is_missing()));
        assert_eq!(controller.state(), SweepState::Completed);
        assert!(!paths.csv.exists());
        assert!(!paths.png.exists());
        assert!(!paths.summary.exists());

        let names: Vec<_> = controller.shutdown_report().iter().map(|s| s.instrument).collect();
        assert_eq!(names, vec!["sim928", "cryo_amp", "thermal_source"]);
        assert!(controller.shutdown_report().iter().all(|s| s.succeeded()));
        assert!(!bench.source_output_on());
    }

    #[test]
    fn test_outputs_are_written() {
        let bench = SimulatedBench::new();
        let tmp = tempfile::tempdir().unwrap();
        let paths = OutputPaths::from_csv(tmp.path().join("PCR_Curve_Data_test.csv"));
        let config = config(MeasurementMode::FilteredPcr, 0.05, 0.07, 0.01, &["-0.02", "-0.03"]);

        let result = controller(&bench, config).with_outputs(paths.clone()).run();

        assert!(paths.csv.exists());
        assert!(paths.png.exists());
        assert!(paths.summary.exists());
        assert!(!paths.run_log.exists());

        let summary = std::fs::read_to_string(&paths.summary).unwrap();
        let parsed: SweepResult = serde_json::from_str(&summary).unwrap();
        assert_eq!(parsed.points.len(), result.points.len());

        let table = read_table(&paths.csv).unwrap();
        assert_eq!(table.headers.len(), 2 + 2 * 2);
        assert_eq!(table.rows.len(), 3);
    }
}
