use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{SweepConfig, TaggerConfig};
use crate::error::SweepError;
use crate::tagger::{Counter, GatedPair, TimeTagger};
use crate::types::{MeasurementMode, Picoseconds, TriggerLevel};

/// Result of one trigger level at one bias step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    /// Gate-on rate minus the dark rate, and the dark rate itself, in Hz
    Gated { signal: f64, dark: f64 },
    /// Count rate of every bin, in Hz
    Rate(Vec<f64>),
}

impl Reading {
    /// Single value representing the reading on a curve
    pub fn value(&self) -> f64 {
        match self {
            Reading::Gated { signal, .. } => *signal,
            Reading::Rate(rates) if rates.is_empty() => f64::NAN,
            Reading::Rate(rates) => rates.iter().sum::<f64>() / rates.len() as f64,
        }
    }

    pub fn dark(&self) -> Option<f64> {
        match self {
            Reading::Gated { dark, .. } => Some(*dark),
            Reading::Rate(_) => None,
        }
    }
}

/// Counters live for a single bias step
enum StepCounters {
    Gated {
        on: Box<dyn Counter>,
        off: Box<dyn Counter>,
    },
    Binned(Box<dyn Counter>),
}

/// Measures every trigger level at the current bias.
///
/// Gate channels are set up once, counters are recreated at every step.
pub struct StepMeasurement {
    mode: MeasurementMode,
    detector: i32,
    gates: Option<GatedPair>,
    levels: Vec<TriggerLevel>,
    window: Picoseconds,
    bin_width: Picoseconds,
    num_bins: usize,
    integration_secs: f64,
    bin_secs: f64,
    ratios: (f64, f64),
    settle_time: Duration,
}

impl StepMeasurement {
    /// Configure the tagger for `config`.
    ///
    /// When the gate channels cannot be created every filtered step comes
    /// back empty.
    pub fn prepare(tagger: &mut dyn TimeTagger, config: &SweepConfig, channels: &TaggerConfig) -> Self {
        let gates = match config.mode {
            MeasurementMode::FilteredPcr => {
                match tagger.gated_channels(channels.detector_channel, channels.reference_channel, &config.gating) {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        warn!("Failed to create gated channels: {}", e);
                        None
                    }
                }
            }
            MeasurementMode::Dcr => None,
        };

        Self {
            mode: config.mode,
            detector: channels.detector_channel,
            gates,
            levels: config.trigger_levels.clone(),
            window: config.integration_window(),
            bin_width: config.bin_width(),
            num_bins: config.num_bins(),
            integration_secs: config.integration_time,
            bin_secs: config.bin_duration,
            ratios: config.gate_ratios(),
            settle_time: config.settle_time,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// One slot per trigger level, `None` where nothing could be measured
    pub fn measure(&self, tagger: &mut dyn TimeTagger) -> Vec<Option<Reading>> {
        let mut counters = match self.create_counters(tagger) {
            Ok(counters) => counters,
            Err(e) => {
                warn!("Could not set up counters for this step: {}", e);
                return vec![None; self.levels.len()];
            }
        };

        let mut readings = Vec::with_capacity(self.levels.len());
        for (j, level) in self.levels.iter().enumerate() {
            if let Err(e) = tagger.set_trigger_level(self.detector, level.volts) {
                warn!("Failed to set trigger level {} ({}): {}", j + 1, level, e);
                readings.push(None);
                continue;
            }
            info!("  Measuring Trigger Level: {:.3} V", level.volts);
            std::thread::sleep(self.settle_time);

            match self.acquire(&mut counters) {
                Ok(reading) => {
                    match &reading {
                        Reading::Gated { signal, dark } => {
                            info!("    Signal Counts: {}, Dark Counts: {}", signal, dark)
                        }
                        Reading::Rate(rates) => info!(
                            "    DCR Counts (avg): {:.2} Hz, {} bins",
                            reading.value(),
                            rates.len()
                        ),
                    }
                    readings.push(Some(reading));
                }
                Err(e) => {
                    warn!("Measurement failed at trigger level {} ({}): {}", j + 1, level, e);
                    readings.push(None);
                }
            }
        }
        readings
    }

    fn create_counters(&self, tagger: &mut dyn TimeTagger) -> Result<StepCounters, SweepError> {
        match self.mode {
            MeasurementMode::FilteredPcr => {
                let gates = self
                    .gates
                    .ok_or_else(|| SweepError::Measurement("gated channels unavailable".to_string()))?;
                let on = tagger.counter(&[gates.on], self.bin_width, 1)?;
                let off = tagger.counter(&[gates.off], self.bin_width, 1)?;
                Ok(StepCounters::Gated { on, off })
            }
            MeasurementMode::Dcr => {
                let counter = tagger.counter(&[self.detector], self.bin_width, self.num_bins)?;
                Ok(StepCounters::Binned(counter))
            }
        }
    }

    fn acquire(&self, counters: &mut StepCounters) -> Result<Reading, SweepError> {
        match counters {
            StepCounters::Gated { on, off } => {
                on.start_for(self.window, true)?;
                off.start_for(self.window, true)?;
                on.wait_until_finished()?;
                off.wait_until_finished()?;

                let clicks_on = first_value(on.as_mut())?;
                let clicks_off = first_value(off.as_mut())?;
                let (signal, dark) = gated_rates(clicks_on, clicks_off, self.ratios, self.integration_secs);
                Ok(Reading::Gated { signal, dark })
            }
            StepCounters::Binned(counter) => {
                counter.start_for(self.window, true)?;
                counter.wait_until_finished()?;
                let data = counter.get_data()?;
                if data.nrows() == 0 || data.ncols() < self.num_bins {
                    return Err(SweepError::Measurement(format!(
                        "expected {} bins, counter returned {:?}",
                        self.num_bins,
                        data.shape()
                    )));
                }
                let rates = data
                    .row(0)
                    .iter()
                    .take(self.num_bins)
                    .map(|&clicks| clicks as f64 / self.bin_secs)
                    .collect();
                Ok(Reading::Rate(rates))
            }
        }
    }
}

fn first_value(counter: &mut dyn Counter) -> Result<u64, SweepError> {
    let data = counter.get_data()?;
    data.get((0, 0))
        .copied()
        .ok_or_else(|| SweepError::Measurement("counter returned no data".to_string()))
}

/// Signal and dark rates from raw gate counts.
///
/// Each gate is normalised by its duty-cycle ratio and the integration time;
/// the dark rate is subtracted from the gate-on rate.
pub fn gated_rates(clicks_on: u64, clicks_off: u64, ratios: (f64, f64), integration_secs: f64) -> (f64, f64) {
    let (ratio_on, ratio_off) = ratios;
    let dark = clicks_off as f64 / (ratio_off * integration_secs);
    let signal = clicks_on as f64 / (ratio_on * integration_secs) - dark;
    (signal, dark)
}
