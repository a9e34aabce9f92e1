use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{MeasurementMode, Picoseconds, TriggerLevel};

/// Parameter file as written by the experimenter, plus the bench sections
/// that normally keep their defaults.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub voltage: VoltageConfig,
    pub integration_time: f64,
    pub fudge_factor: f64,
    #[serde(default = "default_measurement_type")]
    pub measurement_type: String,
    #[serde(default, alias = "filtered_PCR")]
    pub filtered_pcr: Option<FilteredPcrConfig>,
    #[serde(default, alias = "DCR")]
    pub dcr: Option<DcrConfig>,
    #[serde(default)]
    pub turn_off_after_pcr: ShutdownPolicy,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub instruments: InstrumentsConfig,
    #[serde(default)]
    pub tagger: TaggerConfig,
    #[serde(default)]
    pub gating: GateWindows,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

fn default_measurement_type() -> String {
    "filtered_pcr".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct VoltageConfig {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilteredPcrConfig {
    pub trigger_levels: Vec<String>,
}

/// DCR section; `trigger_level` is the older single-level form
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DcrConfig {
    #[serde(default)]
    pub trigger_levels: Option<Vec<String>>,
    #[serde(default)]
    pub trigger_level: Option<String>,
}

/// Instruments to power down once the sweep is over
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownPolicy {
    #[serde(default)]
    pub sim928: bool,
    #[serde(default)]
    pub cryo_amp: bool,
    #[serde(default)]
    pub thermal_source: bool,
}

impl ShutdownPolicy {
    pub fn any(&self) -> bool {
        self.sim928 || self.cryo_amp || self.thermal_source
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    /// Device path tried first
    pub port: String,
    /// Device paths the USB-serial adapter may come back under, in rotation order
    pub candidate_ports: Vec<String>,
    pub gpib_address: u8,
    /// SIM900 mainframe slot holding the SIM928
    pub slot: u8,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            candidate_ports: vec![
                "/dev/ttyUSB0".to_string(),
                "/dev/ttyUSB1".to_string(),
                "/dev/ttyUSB2".to_string(),
            ],
            gpib_address: 2,
            slot: 1,
            baud_rate: 9600,
            timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// `host:port` of the Keysight 33622A driving the thermal source
    pub function_generator: Option<String>,
    /// `host:port` of the Keysight E36312A feeding the cryogenic amplifier
    pub power_supply: Option<String>,
    pub thermal_source_channel: u8,
    pub cryo_amp_channel: u8,
    pub timeout_ms: u64,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            function_generator: None,
            power_supply: None,
            thermal_source_channel: 2,
            cryo_amp_channel: 3,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaggerBackend {
    /// Photon-count model driven by the commanded bias
    #[default]
    Simulated,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TaggerConfig {
    /// Detector input whose discriminator is swept
    pub detector_channel: i32,
    /// Gate reference input (thermal source sync)
    pub reference_channel: i32,
    #[serde(default)]
    pub backend: TaggerBackend,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            detector_channel: 5,
            reference_channel: 9,
            backend: TaggerBackend::Simulated,
        }
    }
}

/// Gate windows relative to the reference edge, in nanoseconds
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct GateWindows {
    pub on_start_ns: f64,
    pub on_stop_ns: f64,
    pub off_start_ns: f64,
    pub off_stop_ns: f64,
    pub period_ns: f64,
}

impl Default for GateWindows {
    fn default() -> Self {
        Self {
            on_start_ns: 30.0,
            on_stop_ns: 270.0,
            off_start_ns: 450.0,
            off_stop_ns: 950.0,
            period_ns: 1000.0,
        }
    }
}

impl GateWindows {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ns <= 0.0 {
            return Err(ConfigError::Message(format!(
                "gating.period_ns must be positive, got: {}",
                self.period_ns
            )));
        }
        for (name, start, stop) in [
            ("on", self.on_start_ns, self.on_stop_ns),
            ("off", self.off_start_ns, self.off_stop_ns),
        ] {
            if start < 0.0 || stop <= start || stop > self.period_ns {
                return Err(ConfigError::Message(format!(
                    "gating {} window [{}, {}] ns must lie inside the {} ns period",
                    name, start, stop, self.period_ns
                )));
            }
        }
        Ok(())
    }

    /// Duty-cycle ratios of the on and off gates.
    ///
    /// The correction factor multiplies the on ratio and divides the off ratio.
    pub fn ratios(&self, fudge_factor: f64) -> (f64, f64) {
        let ratio_on = (self.on_stop_ns - self.on_start_ns) / self.period_ns;
        let ratio_off = (self.off_stop_ns - self.off_start_ns) / self.period_ns;
        (ratio_on * fudge_factor, ratio_off / fudge_factor)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct TimingConfig {
    /// DCR bin width in seconds
    pub bin_duration: f64,
    /// Wait after applying a trigger level, in seconds
    pub settle_time: f64,
    /// Bias resistor in series with the detector, in ohms
    pub series_resistance: f64,
    /// Pause between writing outputs and powering instruments down, in seconds
    pub shutdown_delay: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bin_duration: 0.1,
            settle_time: 0.2,
            series_resistance: 1.02e6,
            shutdown_delay: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub verbosity: String,
    /// Draw the curve in the terminal after every bias step
    pub live_plot: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            verbosity: "info".to_string(),
            live_plot: false,
        }
    }
}

/// Validated, immutable parameters of one sweep
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepConfig {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    /// Seconds per trigger level per bias step
    pub integration_time: f64,
    pub mode: MeasurementMode,
    pub trigger_levels: Vec<TriggerLevel>,
    pub fudge_factor: f64,
    pub bin_duration: f64,
    pub settle_time: Duration,
    pub series_resistance: f64,
    pub gating: GateWindows,
    pub shutdown: ShutdownPolicy,
}

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// Decimal places needed to write `value` exactly, at most 12
fn decimals(value: f64) -> i32 {
    (0..12)
        .find(|&d| (round_to(value, d) - value).abs() <= 1e-12 * value.abs().max(1.0))
        .unwrap_or(12)
}

/// Upper bound on the number of bias points in one sweep
pub const MAX_BIAS_POINTS: usize = 100_000;

/// Number of `step` increments from `start` to `stop`, if it is a sane count
fn step_count(start: f64, stop: f64, step: f64) -> Option<usize> {
    let span = (stop - start) / step;
    let steps = (span * (1.0 + 1e-9) + 1e-9).floor().max(0.0);
    if steps.is_finite() && steps < MAX_BIAS_POINTS as f64 {
        Some(steps as usize)
    } else {
        None
    }
}

impl SweepConfig {
    /// Bias values in sweep order, always ending on `stop`.
    ///
    /// Values are rounded to the decimal precision of `start` and `step`.
    pub fn bias_values(&self) -> Vec<f64> {
        let steps = step_count(self.start, self.stop, self.step).unwrap_or(0);
        let digits = decimals(self.start).max(decimals(self.step));
        let mut values: Vec<f64> = (0..=steps)
            .map(|i| round_to(self.start + i as f64 * self.step, digits))
            .collect();

        if let Some(&last) = values.last() {
            if !is_close(last, self.stop) {
                values.push(self.stop);
            }
        }
        values
    }

    /// Detector bias current in µA through the series resistor, 4 decimals
    pub fn bias_current_ua(&self, bias_voltage: f64) -> f64 {
        round_to(bias_voltage / self.series_resistance * 1e6, 4)
    }

    /// Number of DCR bins; filtered PCR uses a single bin
    pub fn num_bins(&self) -> usize {
        match self.mode {
            MeasurementMode::FilteredPcr => 1,
            MeasurementMode::Dcr => {
                ((self.integration_time / self.bin_duration) + 1e-9).floor() as usize
            }
        }
    }

    pub fn integration_window(&self) -> Picoseconds {
        Picoseconds::from_secs_f64(self.integration_time)
    }

    pub fn bin_width(&self) -> Picoseconds {
        match self.mode {
            MeasurementMode::FilteredPcr => self.integration_window(),
            MeasurementMode::Dcr => Picoseconds::from_secs_f64(self.bin_duration),
        }
    }

    pub fn gate_ratios(&self) -> (f64, f64) {
        self.gating.ratios(self.fudge_factor)
    }

    /// Rough wall-clock duration of the whole sweep in minutes
    pub fn estimated_minutes(&self) -> f64 {
        let levels = self.trigger_levels.len() as f64;
        let per_step = self.integration_time * levels + self.settle_time.as_secs_f64() * levels;
        round_to(per_step / 60.0 * self.bias_values().len() as f64, 2)
    }
}

impl AppConfig {
    pub fn mode(&self) -> Result<MeasurementMode, ConfigError> {
        self.measurement_type
            .parse::<MeasurementMode>()
            .map_err(ConfigError::Message)
    }

    /// Trigger levels of the selected measurement mode
    pub fn trigger_levels(&self) -> Result<Vec<TriggerLevel>, ConfigError> {
        let labels: Vec<String> = match self.mode()? {
            MeasurementMode::FilteredPcr => {
                let section = self.filtered_pcr.as_ref().ok_or_else(|| {
                    ConfigError::Message(
                        "filtered_pcr measurement requires a 'filtered_PCR' section".to_string(),
                    )
                })?;
                if section.trigger_levels.is_empty() {
                    return Err(ConfigError::Message(
                        "'trigger_levels' in filtered_PCR must be a non-empty list".to_string(),
                    ));
                }
                section.trigger_levels.clone()
            }
            MeasurementMode::Dcr => {
                let section = self.dcr.as_ref().ok_or_else(|| {
                    ConfigError::Message("dcr measurement requires a 'DCR' section".to_string())
                })?;
                match (&section.trigger_levels, &section.trigger_level) {
                    (Some(levels), _) if levels.is_empty() => {
                        return Err(ConfigError::Message(
                            "'trigger_levels' in DCR must be a non-empty list".to_string(),
                        ));
                    }
                    (Some(levels), _) => levels.clone(),
                    (None, Some(level)) => {
                        log::info!("Using single DCR trigger level {}", level);
                        vec![level.clone()]
                    }
                    (None, None) => {
                        return Err(ConfigError::Message(
                            "DCR section must contain either 'trigger_levels' (list) or 'trigger_level' (single value)"
                                .to_string(),
                        ));
                    }
                }
            }
        };

        labels
            .iter()
            .map(|label| TriggerLevel::parse(label).map_err(ConfigError::Message))
            .collect()
    }

    /// Validate the run parameters and freeze them into a [`SweepConfig`]
    pub fn sweep_config(&self) -> Result<SweepConfig, ConfigError> {
        let VoltageConfig { start, stop, step } = self.voltage;

        if ![start, stop, step].iter().all(|v| v.is_finite()) {
            return Err(ConfigError::Message(
                "voltage start/stop/step must be finite numbers".to_string(),
            ));
        }
        if step <= 0.0 {
            return Err(ConfigError::Message(format!(
                "voltage.step must be positive, got: {}",
                step
            )));
        }
        if stop < start {
            return Err(ConfigError::Message(format!(
                "voltage.stop ({}) must not be below voltage.start ({})",
                stop, start
            )));
        }
        if step_count(start, stop, step).is_none() {
            return Err(ConfigError::Message(format!(
                "voltage range {} V to {} V in steps of {} V exceeds {} bias points",
                start, stop, step, MAX_BIAS_POINTS
            )));
        }
        if !(self.integration_time > 0.0) {
            return Err(ConfigError::Message(format!(
                "integration_time must be positive, got: {}",
                self.integration_time
            )));
        }
        if !(self.fudge_factor > 0.0) {
            return Err(ConfigError::Message(format!(
                "fudge_factor must be positive, got: {}",
                self.fudge_factor
            )));
        }
        if !(self.timing.series_resistance > 0.0) {
            return Err(ConfigError::Message(
                "timing.series_resistance must be positive".to_string(),
            ));
        }
        if self.timing.settle_time < 0.0 || !self.timing.settle_time.is_finite() {
            return Err(ConfigError::Message(
                "timing.settle_time must be a non-negative number of seconds".to_string(),
            ));
        }

        let mode = self.mode()?;
        let trigger_levels = self.trigger_levels()?;
        self.gating.validate()?;

        if mode == MeasurementMode::Dcr {
            if !(self.timing.bin_duration > 0.0) {
                return Err(ConfigError::Message(
                    "timing.bin_duration must be positive".to_string(),
                ));
            }
            if self.integration_time + 1e-9 < self.timing.bin_duration {
                return Err(ConfigError::Message(format!(
                    "integration_time ({} s) is shorter than one DCR bin ({} s)",
                    self.integration_time, self.timing.bin_duration
                )));
            }
        }

        Ok(SweepConfig {
            start,
            stop,
            step,
            integration_time: self.integration_time,
            mode,
            trigger_levels,
            fudge_factor: self.fudge_factor,
            bin_duration: self.timing.bin_duration,
            settle_time: Duration::from_secs_f64(self.timing.settle_time),
            series_resistance: self.timing.series_resistance,
            gating: self.gating,
            shutdown: self.turn_off_after_pcr,
        })
    }

    /// Refuse to run when counts would come from the photon model while the
    /// real instruments are driven
    pub fn check_tagger_backend(&self, simulate: bool) -> Result<(), ConfigError> {
        match self.tagger.backend {
            TaggerBackend::Simulated if !simulate => Err(ConfigError::Message(
                "tagger.backend 'simulated' only produces model counts; run with --simulate, \
                 no hardware tagger backend is available"
                    .to_string(),
            )),
            TaggerBackend::Simulated => Ok(()),
        }
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sweep_config()?;

        if self.source.candidate_ports.is_empty() {
            log::warn!("source.candidate_ports is empty; a dropped link cannot be recovered");
        } else if !self.source.candidate_ports.contains(&self.source.port) {
            log::warn!(
                "source.port {} is not among the candidate ports {:?}",
                self.source.port,
                self.source.candidate_ports
            );
        }

        Ok(())
    }
}

/// Load the parameter file, then apply `PCR_SWEEP__*` environment overrides.
///
/// There are no defaults for the run parameters themselves: a missing file or
/// a missing required key is an error.
pub fn load_config(config_path: &Path) -> Result<AppConfig, ConfigError> {
    if !config_path.exists() {
        return Err(ConfigError::Message(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }

    let config = Config::builder()
        .add_source(File::from(config_path))
        .add_source(
            Environment::with_prefix("PCR_SWEEP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config = config.try_deserialize::<AppConfig>()?;

    // Validate configuration before returning
    app_config.validate()?;

    log::info!("Parameters loaded from {}", config_path.display());
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_params(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const FILTERED: &str = r#"
fudge_factor: 1.0
integration_time: 1.0
measurement_type: filtered_pcr
voltage:
  start: 0.05
  stop: 0.09
  step: 0.01
filtered_PCR:
  trigger_levels: ["-0.02", "-0.03"]
turn_off_after_pcr:
  sim928: true
  cryo_amp: false
  thermal_source: true
"#;

    #[test]
    fn test_load_filtered_parameters() {
        let file = write_params(FILTERED);
        let config = load_config(file.path()).unwrap();
        let sweep = config.sweep_config().unwrap();

        assert_eq!(sweep.mode, MeasurementMode::FilteredPcr);
        assert_eq!(sweep.trigger_levels.len(), 2);
        assert_eq!(sweep.trigger_levels[0].label, "-0.02");
        assert!(sweep.shutdown.sim928);
        assert!(!sweep.shutdown.cryo_amp);
        assert!(sweep.shutdown.thermal_source);
        assert_eq!(sweep.settle_time, Duration::from_millis(200));
        assert_eq!(config.source.candidate_ports.len(), 3);
    }

    #[test]
    fn test_numeric_trigger_levels_are_accepted() {
        let file = write_params(
            r#"
fudge_factor: 1.2
integration_time: 0.5
measurement_type: DCR
voltage: { start: 0.0, stop: 0.1, step: 0.05 }
DCR:
  trigger_level: -0.04
"#,
        );
        let sweep = load_config(file.path()).unwrap().sweep_config().unwrap();
        assert_eq!(sweep.mode, MeasurementMode::Dcr);
        assert_eq!(sweep.trigger_levels.len(), 1);
        assert!((sweep.trigger_levels[0].volts + 0.04).abs() < 1e-12);
        assert_eq!(sweep.num_bins(), 5);
    }

    #[test]
    fn test_missing_required_key_is_rejected() {
        let file = write_params(
            r#"
fudge_factor: 1.0
voltage: { start: 0.0, stop: 0.1, step: 0.05 }
filtered_PCR:
  trigger_levels: ["-0.02"]
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_empty_trigger_levels_are_rejected() {
        let file = write_params(
            r#"
fudge_factor: 1.0
integration_time: 1.0
voltage: { start: 0.0, stop: 0.1, step: 0.05 }
filtered_PCR:
  trigger_levels: []
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn test_unknown_mode_and_bad_step_are_rejected() {
        let file = write_params(
            r#"
fudge_factor: 1.0
integration_time: 1.0
measurement_type: histogram
voltage: { start: 0.0, stop: 0.1, step: 0.05 }
"#,
        );
        assert!(load_config(file.path()).is_err());

        let file = write_params(
            r#"
fudge_factor: 1.0
integration_time: 1.0
voltage: { start: 0.0, stop: 0.1, step: 0.0 }
filtered_PCR:
  trigger_levels: ["-0.02"]
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_oversized_bias_range_is_rejected() {
        let file = write_params(FILTERED);
        let mut config = load_config(file.path()).unwrap();
        config.voltage = VoltageConfig {
            start: 0.0,
            stop: 1e300,
            step: 1e-300,
        };
        let err = config.sweep_config().unwrap_err();
        assert!(err.to_string().contains("bias points"));

        config.voltage = VoltageConfig {
            start: 0.0,
            stop: 1000.0,
            step: 0.001,
        };
        assert!(config.sweep_config().is_err());
    }

    #[test]
    fn test_simulated_tagger_requires_simulated_bench() {
        let file = write_params(FILTERED);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.tagger.backend, TaggerBackend::Simulated);

        let err = config.check_tagger_backend(false).unwrap_err();
        assert!(err.to_string().contains("--simulate"));
        assert!(config.check_tagger_backend(true).is_ok());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_config(Path::new("/nonexistent/params.yml")).is_err());
    }

    fn sweep(start: f64, stop: f64, step: f64) -> SweepConfig {
        SweepConfig {
            start,
            stop,
            step,
            integration_time: 1.0,
            mode: MeasurementMode::FilteredPcr,
            trigger_levels: vec![TriggerLevel::parse("-0.02").unwrap()],
            fudge_factor: 1.0,
            bin_duration: 0.1,
            settle_time: Duration::ZERO,
            series_resistance: 1.02e6,
            gating: GateWindows::default(),
            shutdown: ShutdownPolicy::default(),
        }
    }

    #[test]
    fn test_bias_values_include_stop() {
        let values = sweep(0.05, 0.09, 0.01).bias_values();
        assert_eq!(values.len(), 5);
        for (value, expected) in values.iter().zip([0.05, 0.06, 0.07, 0.08, 0.09]) {
            assert!((value - expected).abs() < 1e-9);
        }

        // Step does not divide the range: stop appended explicitly
        let values = sweep(0.0, 0.25, 0.1).bias_values();
        assert_eq!(values.len(), 4);
        assert!((values[3] - 0.25).abs() < 1e-12);

        // Single point
        assert_eq!(sweep(0.3, 0.3, 0.1).bias_values(), vec![0.3]);
    }

    #[test]
    fn test_bias_values_are_rounded_to_step_precision() {
        assert_eq!(
            sweep(0.05, 0.09, 0.01).bias_values(),
            vec![0.05, 0.06, 0.07, 0.08, 0.09]
        );
        assert_eq!(sweep(0.0, 0.3, 0.1).bias_values(), vec![0.0, 0.1, 0.2, 0.3]);
        assert_eq!(sweep(1.0, 1.5, 0.25).bias_values(), vec![1.0, 1.25, 1.5]);
        assert_eq!(decimals(0.01), 2);
        assert_eq!(decimals(0.25), 2);
        assert_eq!(decimals(1.0), 0);
    }

    #[test]
    fn test_bias_current() {
        let config = sweep(0.0, 1.0, 0.1);
        assert!((config.bias_current_ua(1.02) - 1.0).abs() < 1e-12);
        assert!((config.bias_current_ua(0.05) - 0.049).abs() < 1e-12);
    }

    #[test]
    fn test_gate_ratios_apply_fudge_asymmetrically() {
        let gating = GateWindows::default();
        let (on, off) = gating.ratios(1.0);
        assert!((on - 0.24).abs() < 1e-12);
        assert!((off - 0.5).abs() < 1e-12);

        let (on, off) = gating.ratios(2.0);
        assert!((on - 0.48).abs() < 1e-12);
        assert!((off - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_gate_windows_validation() {
        let mut gating = GateWindows::default();
        assert!(gating.validate().is_ok());
        gating.off_stop_ns = 1200.0;
        assert!(gating.validate().is_err());
    }

    #[test]
    fn test_num_bins() {
        let mut config = sweep(0.0, 1.0, 0.1);
        assert_eq!(config.num_bins(), 1);
        config.mode = MeasurementMode::Dcr;
        assert_eq!(config.num_bins(), 10);
        config.integration_time = 0.3;
        assert_eq!(config.num_bins(), 3);
    }
}
