pub mod keysight;
pub mod scpi;
pub mod sim928;

use std::time::Duration;

use log::{info, warn};

pub use keysight::{Keysight33622A, KeysightE36312A};
pub use scpi::{ConnectionConfig, ScpiClient, ScpiClientBuilder};
pub use sim928::{SerialSourceFactory, Sim928};

use crate::config::{InstrumentsConfig, ShutdownPolicy, SourceConfig};
use crate::connection::InstrumentConnection;
use crate::error::SweepError;

/// Programmable bias source as seen by the sweep
///
/// Errors for which [`SweepError::is_transport`] holds mean the link itself
/// failed and the source may come back under another port.
pub trait VoltageSource: Send {
    /// Open the link and address the module
    fn connect(&mut self) -> Result<(), SweepError>;

    /// Release the link
    fn disconnect(&mut self) -> Result<(), SweepError>;

    /// Enable the output
    fn turn_on(&mut self) -> Result<(), SweepError>;

    /// Disable the output
    fn turn_off(&mut self) -> Result<(), SweepError>;

    /// Command the output voltage in volts
    fn set_voltage(&mut self, volts: f64) -> Result<(), SweepError>;
}

/// Creates a fresh, not yet connected, source driver for a given port
pub trait SourceFactory: Send {
    fn open(&mut self, port: &str, gpib_address: u8, slot: u8) -> Box<dyn VoltageSource>;
}

/// Multi-channel power supply
pub trait PowerSupply: Send {
    fn output_off(&mut self, channel: u8) -> Result<(), SweepError>;
}

/// Function generator
pub trait FunctionGenerator: Send {
    fn set_output(&mut self, channel: u8, enabled: bool) -> Result<(), SweepError>;
}

/// Outcome of powering down one instrument after the sweep
#[derive(Debug)]
pub struct ShutdownStep {
    pub instrument: &'static str,
    pub result: Result<(), SweepError>,
}

impl ShutdownStep {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Every instrument the sweep controller may touch
pub struct InstrumentSet {
    pub source: InstrumentConnection,
    pub power_supply: Option<Box<dyn PowerSupply>>,
    pub function_generator: Option<Box<dyn FunctionGenerator>>,
    pub cryo_amp_channel: u8,
    pub thermal_source_channel: u8,
}

impl InstrumentSet {
    pub fn new(source: InstrumentConnection) -> Self {
        let defaults = InstrumentsConfig::default();
        Self {
            source,
            power_supply: None,
            function_generator: None,
            cryo_amp_channel: defaults.cryo_amp_channel,
            thermal_source_channel: defaults.thermal_source_channel,
        }
    }

    pub fn with_power_supply(mut self, supply: Box<dyn PowerSupply>, cryo_amp_channel: u8) -> Self {
        self.power_supply = Some(supply);
        self.cryo_amp_channel = cryo_amp_channel;
        self
    }

    pub fn with_function_generator(
        mut self,
        generator: Box<dyn FunctionGenerator>,
        thermal_source_channel: u8,
    ) -> Self {
        self.function_generator = Some(generator);
        self.thermal_source_channel = thermal_source_channel;
        self
    }

    /// Connect to the real bench: SIM928 over serial, Keysights over the network.
    ///
    /// Network instruments that cannot be reached are left out; the source
    /// connection may come up unavailable.
    pub fn connect(source: &SourceConfig, instruments: &InstrumentsConfig) -> Self {
        let factory = SerialSourceFactory::new(
            source.baud_rate,
            Duration::from_millis(source.timeout_ms),
        );
        let connection = InstrumentConnection::establish(source, Box::new(factory));
        let mut set = Self::new(connection);
        set.cryo_amp_channel = instruments.cryo_amp_channel;
        set.thermal_source_channel = instruments.thermal_source_channel;

        let config = ConnectionConfig::with_timeout(Duration::from_millis(instruments.timeout_ms));

        if let Some(address) = &instruments.function_generator {
            match Keysight33622A::connect(address, config.clone()) {
                Ok(generator) => {
                    info!("Function generator (33622A) connected at {}", address);
                    set.function_generator = Some(Box::new(generator));
                }
                Err(e) => warn!("Failed to connect to function generator at {}: {}", address, e),
            }
        }

        if let Some(address) = &instruments.power_supply {
            match KeysightE36312A::connect(address, config) {
                Ok(supply) => {
                    info!("Power supply (E36312A) connected at {}", address);
                    set.power_supply = Some(Box::new(supply));
                }
                Err(e) => warn!("Failed to connect to power supply at {}: {}", address, e),
            }
        }

        set
    }

    /// Power down every instrument the policy names.
    ///
    /// Each instrument is attempted on its own; a failure is recorded and the
    /// next one is still tried.
    pub fn shutdown(&mut self, policy: &ShutdownPolicy) -> Vec<ShutdownStep> {
        let mut steps = Vec::new();
        if !policy.any() {
            return steps;
        }
        info!("Shutting down instruments...");

        if policy.sim928 {
            let result = self.source.turn_off();
            steps.push(ShutdownStep {
                instrument: "sim928",
                result,
            });
        }

        if policy.cryo_amp {
            let channel = self.cryo_amp_channel;
            let result = match self.power_supply.as_mut() {
                Some(supply) => supply.output_off(channel),
                None => Err(SweepError::NotConnected("power supply".to_string())),
            };
            steps.push(ShutdownStep {
                instrument: "cryo_amp",
                result,
            });
        }

        if policy.thermal_source {
            let channel = self.thermal_source_channel;
            let result = match self.function_generator.as_mut() {
                Some(generator) => generator.set_output(channel, false),
                None => Err(SweepError::NotConnected("function generator".to_string())),
            };
            steps.push(ShutdownStep {
                instrument: "thermal_source",
                result,
            });
        }

        for step in &steps {
            match &step.result {
                Ok(()) => info!("{} turned off successfully", step.instrument),
                Err(e) => warn!("Error turning off {}: {}", step.instrument, e),
            }
        }

        steps
    }
}
