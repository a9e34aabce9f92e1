//! In-process stand-ins for the bench: a voltage source whose link can be
//! dropped on demand, a time tagger with a simple photon-count model, and
//! network instruments that record what they are told.
//!
//! Every fake shares one [`SimulatedBench`] so a test can inject faults and
//! inspect the resulting state from the outside.

use log::{debug, trace};
use ndarray::Array2;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{GateWindows, InstrumentsConfig, SourceConfig};
use crate::connection::InstrumentConnection;
use crate::error::SweepError;
use crate::instruments::{FunctionGenerator, InstrumentSet, PowerSupply, SourceFactory, VoltageSource};
use crate::instruments::sim928::MAX_VOLTAGE;
use crate::tagger::{Counter, GatedPair, TimeTagger};
use crate::types::Picoseconds;

/// Detected photon rate at full efficiency, in Hz
const PHOTON_RATE: f64 = 20_000.0;
/// Dark-count rate at zero bias, in Hz
const DARK_RATE: f64 = 50.0;
/// Bias scale of the efficiency plateau, in volts
const EFFICIENCY_SCALE: f64 = 0.04;
/// Bias scale of the exponential dark-count rise, in volts
const DARK_SCALE: f64 = 0.05;

#[derive(Debug, Default)]
struct BenchState {
    dead_ports: HashSet<String>,
    link_drops: usize,
    voltage: Option<f64>,
    output_on: bool,
    connects: Vec<String>,
    commands: Vec<String>,
    failing_instruments: HashSet<&'static str>,
    trigger_levels: Vec<(i32, f64)>,
    counter_creation_failures: usize,
    acquisition_failures: usize,
}

/// Shared state of the simulated bench
#[derive(Debug, Clone, Default)]
pub struct SimulatedBench {
    state: Arc<Mutex<BenchState>>,
}

impl SimulatedBench {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening this port fails from now on
    pub fn kill_port(&self, port: &str) {
        self.state.lock().dead_ports.insert(port.to_string());
    }

    /// Fail the next `count` voltage commands with a link error
    pub fn drop_links(&self, count: usize) {
        self.state.lock().link_drops += count;
    }

    /// Fail the next `count` counter creations
    pub fn fail_counter_creation(&self, count: usize) {
        self.state.lock().counter_creation_failures += count;
    }

    /// Fail the next `count` acquisitions
    pub fn fail_acquisitions(&self, count: usize) {
        self.state.lock().acquisition_failures += count;
    }

    /// Make `"power_supply"` or `"function_generator"` reject every command
    pub fn fail_instrument(&self, name: &'static str) {
        self.state.lock().failing_instruments.insert(name);
    }

    /// Last voltage the source accepted
    pub fn voltage(&self) -> Option<f64> {
        self.state.lock().voltage
    }

    pub fn source_output_on(&self) -> bool {
        self.state.lock().output_on
    }

    /// Ports successfully connected, in order
    pub fn connect_log(&self) -> Vec<String> {
        self.state.lock().connects.clone()
    }

    /// Commands accepted by the network instruments
    pub fn command_log(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Trigger levels applied as `(channel, volts)`
    pub fn trigger_log(&self) -> Vec<(i32, f64)> {
        self.state.lock().trigger_levels.clone()
    }

    pub fn source_factory(&self) -> Box<dyn SourceFactory> {
        Box::new(SimulatedSourceFactory {
            bench: self.clone(),
        })
    }

    pub fn tagger(&self, realtime: bool) -> SimulatedTagger {
        SimulatedTagger::new(self.clone(), realtime)
    }

    /// Connect a full set of simulated instruments
    pub fn instrument_set(&self, source: &SourceConfig, instruments: &InstrumentsConfig) -> InstrumentSet {
        let connection = InstrumentConnection::establish(source, self.source_factory());
        InstrumentSet::new(connection)
            .with_power_supply(
                Box::new(SimulatedPowerSupply { bench: self.clone() }),
                instruments.cryo_amp_channel,
            )
            .with_function_generator(
                Box::new(SimulatedFunctionGenerator { bench: self.clone() }),
                instruments.thermal_source_channel,
            )
    }

    fn record_command(&self, instrument: &'static str, command: String) -> Result<(), SweepError> {
        let mut state = self.state.lock();
        if state.failing_instruments.contains(instrument) {
            return Err(SweepError::Device(format!("{} rejected '{}'", instrument, command)));
        }
        trace!("{} <- '{}'", instrument, command);
        state.commands.push(command);
        Ok(())
    }
}

/// SIM928 stand-in; one instance per opened port
pub struct SimulatedSource {
    bench: SimulatedBench,
    port: String,
    connected: bool,
}

impl SimulatedSource {
    fn require_link(&self) -> Result<(), SweepError> {
        if self.connected {
            Ok(())
        } else {
            Err(SweepError::NotConnected(format!("simulated SIM928 on {}", self.port)))
        }
    }
}

impl VoltageSource for SimulatedSource {
    fn connect(&mut self) -> Result<(), SweepError> {
        let mut state = self.bench.state.lock();
        if state.dead_ports.contains(&self.port) {
            return Err(SweepError::Transport {
                port: self.port.clone(),
                message: "No such file or directory".to_string(),
            });
        }
        self.connected = true;
        state.connects.push(self.port.clone());
        debug!("Simulated SIM928 connected on {}", self.port);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SweepError> {
        self.connected = false;
        Ok(())
    }

    fn turn_on(&mut self) -> Result<(), SweepError> {
        self.require_link()?;
        self.bench.state.lock().output_on = true;
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), SweepError> {
        self.require_link()?;
        self.bench.state.lock().output_on = false;
        Ok(())
    }

    fn set_voltage(&mut self, volts: f64) -> Result<(), SweepError> {
        self.require_link()?;
        let mut state = self.bench.state.lock();
        if state.link_drops > 0 {
            state.link_drops -= 1;
            self.connected = false;
            return Err(SweepError::Transport {
                port: self.port.clone(),
                message: "device disconnected".to_string(),
            });
        }
        if !volts.is_finite() || volts.abs() > MAX_VOLTAGE {
            return Err(SweepError::Device(format!("{} V is out of range", volts)));
        }
        state.voltage = Some(volts);
        Ok(())
    }
}

pub struct SimulatedSourceFactory {
    bench: SimulatedBench,
}

impl SourceFactory for SimulatedSourceFactory {
    fn open(&mut self, port: &str, _gpib_address: u8, _slot: u8) -> Box<dyn VoltageSource> {
        Box::new(SimulatedSource {
            bench: self.bench.clone(),
            port: port.to_string(),
            connected: false,
        })
    }
}

pub struct SimulatedPowerSupply {
    bench: SimulatedBench,
}

impl PowerSupply for SimulatedPowerSupply {
    fn output_off(&mut self, channel: u8) -> Result<(), SweepError> {
        self.bench
            .record_command("power_supply", format!("OUTP OFF,(@{})", channel))
    }
}

pub struct SimulatedFunctionGenerator {
    bench: SimulatedBench,
}

impl FunctionGenerator for SimulatedFunctionGenerator {
    fn set_output(&mut self, channel: u8, enabled: bool) -> Result<(), SweepError> {
        let state = if enabled { "ON" } else { "OFF" };
        self.bench
            .record_command("function_generator", format!("OUTP{} {}", channel, state))
    }
}

/// Which events a simulated channel sees
#[derive(Debug, Clone, Copy)]
enum ChannelKind {
    Detector,
    GateOn(f64),
    GateOff(f64),
    Other,
}

/// Time tagger stand-in.
///
/// Count rates follow the applied bias and trigger level: photons arrive
/// only inside the gate-on window, dark counts are spread uniformly.
pub struct SimulatedTagger {
    bench: SimulatedBench,
    realtime: bool,
    detector: Option<i32>,
    gates: Option<(GatedPair, GateWindows)>,
    next_virtual: i32,
}

impl SimulatedTagger {
    pub fn new(bench: SimulatedBench, realtime: bool) -> Self {
        Self {
            bench,
            realtime,
            detector: None,
            gates: None,
            next_virtual: 100,
        }
    }

    fn kind(&self, channel: i32) -> ChannelKind {
        if let Some((pair, gating)) = &self.gates {
            if channel == pair.on {
                return ChannelKind::GateOn((gating.on_stop_ns - gating.on_start_ns) / gating.period_ns);
            }
            if channel == pair.off {
                return ChannelKind::GateOff((gating.off_stop_ns - gating.off_start_ns) / gating.period_ns);
            }
        }
        if self.detector == Some(channel) || self.detector.is_none() {
            ChannelKind::Detector
        } else {
            ChannelKind::Other
        }
    }
}

/// Photon and dark-count rates in Hz for a bias and discriminator level
pub fn model_rates(bias: f64, trigger_level: f64) -> (f64, f64) {
    let bias = bias.max(0.0);
    // Deeper (more negative) thresholds discard more pulses
    let threshold = 1.0 / (1.0 + 20.0 * trigger_level.abs());
    let efficiency = 1.0 - (-bias / EFFICIENCY_SCALE).exp();
    let photons = PHOTON_RATE * efficiency * threshold;
    let dark = DARK_RATE * (bias / DARK_SCALE).exp() * threshold;
    (photons, dark)
}

impl TimeTagger for SimulatedTagger {
    fn set_trigger_level(&mut self, channel: i32, volts: f64) -> Result<(), SweepError> {
        self.detector = Some(channel);
        self.bench.state.lock().trigger_levels.push((channel, volts));
        Ok(())
    }

    fn gated_channels(
        &mut self,
        detector: i32,
        reference: i32,
        gating: &GateWindows,
    ) -> Result<GatedPair, SweepError> {
        debug!(
            "Simulated gates on channel {} referenced to {}: on {}-{} ns, off {}-{} ns",
            detector, reference, gating.on_start_ns, gating.on_stop_ns, gating.off_start_ns, gating.off_stop_ns
        );
        let pair = GatedPair {
            on: self.next_virtual,
            off: self.next_virtual + 1,
        };
        self.next_virtual += 2;
        self.detector = Some(detector);
        self.gates = Some((pair, *gating));
        Ok(pair)
    }

    fn counter(
        &mut self,
        channels: &[i32],
        binwidth: Picoseconds,
        n_values: usize,
    ) -> Result<Box<dyn Counter>, SweepError> {
        {
            let mut state = self.bench.state.lock();
            if state.counter_creation_failures > 0 {
                state.counter_creation_failures -= 1;
                return Err(SweepError::Measurement("counter could not be created".to_string()));
            }
        }
        if n_values == 0 || binwidth.get() == 0 {
            return Err(SweepError::Measurement(format!(
                "counter needs at least one bin of non-zero width, got {} x {} ps",
                n_values,
                binwidth.get()
            )));
        }

        Ok(Box::new(SimulatedCounter {
            bench: self.bench.clone(),
            kinds: channels.iter().map(|&c| self.kind(c)).collect(),
            binwidth,
            n_values,
            realtime: self.realtime,
            acquisition: None,
        }))
    }
}

struct Acquisition {
    started: Instant,
    duration: Duration,
    data: Array2<u64>,
}

pub struct SimulatedCounter {
    bench: SimulatedBench,
    kinds: Vec<ChannelKind>,
    binwidth: Picoseconds,
    n_values: usize,
    realtime: bool,
    acquisition: Option<Acquisition>,
}

impl Counter for SimulatedCounter {
    fn start_for(&mut self, duration: Picoseconds, _clear: bool) -> Result<(), SweepError> {
        let (bias, level) = {
            let mut state = self.bench.state.lock();
            if state.acquisition_failures > 0 {
                state.acquisition_failures -= 1;
                self.acquisition = None;
                return Err(SweepError::Measurement("acquisition aborted".to_string()));
            }
            (
                state.voltage.unwrap_or(0.0),
                state.trigger_levels.last().map(|&(_, v)| v).unwrap_or(0.0),
            )
        };
        let (photons, dark) = model_rates(bias, level);

        // Bins past the requested duration stay empty
        let bin_secs = self.binwidth.as_secs_f64();
        let active_bins = ((duration.as_secs_f64() / bin_secs) + 1e-9).floor() as usize;

        let mut data = Array2::<u64>::zeros((self.kinds.len(), self.n_values));
        for (row, kind) in self.kinds.iter().enumerate() {
            // Photons all arrive inside the on window, dark counts do not
            let rate = match kind {
                ChannelKind::Detector => photons + dark,
                ChannelKind::GateOn(duty) => photons + dark * duty,
                ChannelKind::GateOff(duty) => dark * duty,
                ChannelKind::Other => 0.0,
            };
            let per_bin = (rate * bin_secs).round() as u64;
            for bin in 0..self.n_values.min(active_bins.max(1)) {
                data[[row, bin]] = per_bin;
            }
        }

        self.acquisition = Some(Acquisition {
            started: Instant::now(),
            duration: duration.into(),
            data,
        });
        Ok(())
    }

    fn wait_until_finished(&mut self) -> Result<(), SweepError> {
        let acquisition = self
            .acquisition
            .as_ref()
            .ok_or_else(|| SweepError::Measurement("counter was never started".to_string()))?;

        if self.realtime {
            let remaining = acquisition.duration.saturating_sub(acquisition.started.elapsed());
            std::thread::sleep(remaining);
        }
        Ok(())
    }

    fn get_data(&mut self) -> Result<Array2<u64>, SweepError> {
        self.acquisition
            .as_ref()
            .map(|a| a.data.clone())
            .ok_or_else(|| SweepError::Measurement("no data acquired".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_model() {
        let bench = SimulatedBench::new();
        let mut tagger = bench.tagger(false);
        let gating = GateWindows::default();
        let pair = tagger.gated_channels(5, 9, &gating).unwrap();
        tagger.set_trigger_level(5, -0.02).unwrap();

        let mut counter = tagger.counter(&[pair.on, pair.off], Picoseconds::from_secs_f64(1.0), 1).unwrap();
        counter.start_for(Picoseconds::from_secs_f64(1.0), true).unwrap();
        counter.wait_until_finished().unwrap();
        let data = counter.get_data().unwrap();

        let (photons, dark) = model_rates(0.0, -0.02);
        assert_eq!(data.shape(), &[2, 1]);
        assert_eq!(data[[0, 0]], (photons + dark * 0.24).round() as u64);
        assert_eq!(data[[1, 0]], (dark * 0.5).round() as u64);
    }

    #[test]
    fn test_binned_counter() {
        let bench = SimulatedBench::new();
        let mut tagger = bench.tagger(false);
        tagger.set_trigger_level(5, -0.03).unwrap();
        let mut counter = tagger.counter(&[5], Picoseconds::from_secs_f64(0.1), 10).unwrap();
        counter.start_for(Picoseconds::from_secs_f64(1.0), true).unwrap();
        counter.wait_until_finished().unwrap();
        let data = counter.get_data().unwrap();
        assert_eq!(data.shape(), &[1, 10]);
        assert!(data.iter().all(|&c| c == data[[0, 0]]));
    }

    #[test]
    fn test_injected_failures() {
        let bench = SimulatedBench::new();
        let mut tagger = bench.tagger(false);
        bench.fail_counter_creation(1);
        assert!(tagger.counter(&[5], Picoseconds::from_secs_f64(0.1), 1).is_err());

        let mut counter = tagger.counter(&[5], Picoseconds::from_secs_f64(0.1), 1).unwrap();
        bench.fail_acquisitions(1);
        assert!(counter.start_for(Picoseconds::from_secs_f64(0.1), true).is_err());
        assert!(counter.get_data().is_err());
    }

    #[test]
    fn test_realtime_wait() {
        let bench = SimulatedBench::new();
        let mut tagger = bench.tagger(true);
        let mut counter = tagger.counter(&[5], Picoseconds::from_secs_f64(0.05), 1).unwrap();
        let start = Instant::now();
        counter.start_for(Picoseconds::from_secs_f64(0.05), true).unwrap();
        counter.wait_until_finished().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_instruments_record_commands() {
        let bench = SimulatedBench::new();
        let mut set = bench.instrument_set(&SourceConfig::default(), &InstrumentsConfig::default());
        set.power_supply.as_mut().unwrap().output_off(3).unwrap();
        set.function_generator.as_mut().unwrap().set_output(2, false).unwrap();
        assert_eq!(bench.command_log(), vec!["OUTP OFF,(@3)", "OUTP2 OFF"]);
        assert!(bench.source_output_on());

        bench.fail_instrument("power_supply");
        assert!(set.power_supply.as_mut().unwrap().output_off(3).is_err());
    }
}
