use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;

use crate::config::SourceConfig;
use crate::error::SweepError;
use crate::instruments::{SourceFactory, VoltageSource};

/// Why a bias could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// No driver exists, the initial connection never came up
    Unavailable,
    /// The link dropped and there is no port to rotate to
    NoCandidates,
    /// Opening the rotated port failed
    ReconnectFailed { port: String, message: String },
    /// The command failed on the first and on the rotated port
    RetriesExhausted { port: String, message: String },
    /// The instrument rejected the command; no rotation attempted
    Device(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unavailable => write!(f, "voltage source not available"),
            FailureReason::NoCandidates => write!(f, "no candidate ports to rotate to"),
            FailureReason::ReconnectFailed { port, message } => {
                write!(f, "reconnect failed on {}: {}", port, message)
            }
            FailureReason::RetriesExhausted { port, message } => {
                write!(f, "max retries reached, last error on {}: {}", port, message)
            }
            FailureReason::Device(message) => write!(f, "unexpected error: {}", message),
        }
    }
}

/// Result of commanding a bias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiasOutcome {
    Applied { port: String },
    Failed(FailureReason),
}

impl BiasOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, BiasOutcome::Applied { .. })
    }
}

/// Serial/GPIB link to the bias source, able to follow the adapter when it
/// re-enumerates under another device path.
pub struct InstrumentConnection {
    port: String,
    candidates: Vec<String>,
    gpib_address: u8,
    slot: u8,
    source: Option<Box<dyn VoltageSource>>,
    factory: Box<dyn SourceFactory>,
}

impl InstrumentConnection {
    /// A connection with no driver yet
    pub fn new(settings: &SourceConfig, factory: Box<dyn SourceFactory>) -> Self {
        Self {
            port: settings.port.clone(),
            candidates: settings.candidate_ports.clone(),
            gpib_address: settings.gpib_address,
            slot: settings.slot,
            source: None,
            factory,
        }
    }

    /// Connect and power on the source, trying the configured port and then
    /// the next candidate once.
    ///
    /// The connection comes back unavailable when both attempts fail.
    pub fn establish(settings: &SourceConfig, factory: Box<dyn SourceFactory>) -> Self {
        let mut connection = Self::new(settings, factory);

        match connection.open_current() {
            Ok(()) => info!("SIM928 connected on {}", connection.port),
            Err(e) => {
                warn!("Initial connection to SIM928 failed on {}: {}", connection.port, e);
                if e.is_transport() && connection.advance_port().is_some() {
                    info!("Trying alternative port: {}", connection.port);
                    match connection.open_current() {
                        Ok(()) => info!("Successfully connected to {}", connection.port),
                        Err(e2) => {
                            warn!("Connection failed on alternative port {}: {}", connection.port, e2);
                            connection.source = None;
                        }
                    }
                } else {
                    connection.source = None;
                }
            }
        }

        connection
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn gpib_address(&self) -> u8 {
        self.gpib_address
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// Whether a driver handle exists; it may still have a dead link
    pub fn is_available(&self) -> bool {
        self.source.is_some()
    }

    /// Command a voltage, rotating to the next port once on a link failure
    pub fn set_voltage(&mut self, volts: f64) -> BiasOutcome {
        if self.source.is_none() {
            warn!("Error: SIM928 source not available");
            return BiasOutcome::Failed(FailureReason::Unavailable);
        }

        debug!("Attempting to set voltage {:.3} V on {}...", volts, self.port);
        let first_error = match self.command(volts) {
            Ok(()) => return self.applied(volts),
            Err(e) if e.is_transport() => e,
            Err(e) => {
                warn!("Unexpected error setting voltage: {}", e);
                return BiasOutcome::Failed(FailureReason::Device(e.to_string()));
            }
        };
        warn!("Serial error setting voltage on {}: {}", self.port, first_error);

        if let Err(reason) = self.reconnect() {
            return BiasOutcome::Failed(reason);
        }

        match self.command(volts) {
            Ok(()) => self.applied(volts),
            Err(e) if e.is_transport() => {
                warn!("Max retries reached for setting voltage: {}", e);
                BiasOutcome::Failed(FailureReason::RetriesExhausted {
                    port: self.port.clone(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                warn!("Unexpected error setting voltage: {}", e);
                BiasOutcome::Failed(FailureReason::Device(e.to_string()))
            }
        }
    }

    /// Disable the source output
    pub fn turn_off(&mut self) -> Result<(), SweepError> {
        match self.source.as_mut() {
            Some(source) => source.turn_off(),
            None => Err(SweepError::NotConnected("SIM928".to_string())),
        }
    }

    /// Disconnect and drop the driver
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.disconnect() {
                debug!("Error during disconnect of {}: {}", self.port, e);
            }
        }
    }

    fn command(&mut self, volts: f64) -> Result<(), SweepError> {
        match self.source.as_mut() {
            Some(source) => source.set_voltage(volts),
            None => Err(SweepError::NotConnected("SIM928".to_string())),
        }
    }

    fn applied(&self, volts: f64) -> BiasOutcome {
        info!("Successfully set voltage: {:.3} V", volts);
        BiasOutcome::Applied {
            port: self.port.clone(),
        }
    }

    /// Replace the stale driver with a fresh one on the next candidate port
    fn reconnect(&mut self) -> Result<(), FailureReason> {
        info!("Attempting to reconnect to alternative port...");
        if let Some(source) = self.source.as_mut() {
            if let Err(e) = source.disconnect() {
                debug!("Note: error during disconnect (may already be closed): {}", e);
            }
        }

        if self.advance_port().is_none() {
            warn!("No candidate ports configured for the SIM928");
            return Err(FailureReason::NoCandidates);
        }
        info!("Trying port: {}", self.port);

        match self.open_current() {
            Ok(()) => {
                info!("Successfully reconnected to {}", self.port);
                Ok(())
            }
            Err(e) => {
                warn!("Reconnect failed on {}: {}", self.port, e);
                Err(FailureReason::ReconnectFailed {
                    port: self.port.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Install a new driver for the current port, connect and power it on.
    ///
    /// The driver is kept even when connecting fails so the next command
    /// reports a link error and rotates again.
    fn open_current(&mut self) -> Result<(), SweepError> {
        let mut source = self.factory.open(&self.port, self.gpib_address, self.slot);
        let result = source.connect().and_then(|_| source.turn_on());
        self.source = Some(source);
        result
    }

    /// Move to the next candidate port, round-robin
    fn advance_port(&mut self) -> Option<&str> {
        if self.candidates.is_empty() {
            return None;
        }
        let next = match self.candidates.iter().position(|p| *p == self.port) {
            Some(index) => (index + 1) % self.candidates.len(),
            None => 0,
        };
        self.port = self.candidates[next].clone();
        Some(&self.port)
    }
}

impl Drop for InstrumentConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedBench;

    fn settings(ports: &[&str]) -> SourceConfig {
        SourceConfig {
            port: ports.first().map(|p| p.to_string()).unwrap_or_default(),
            candidate_ports: ports.iter().map(|p| p.to_string()).collect(),
            ..SourceConfig::default()
        }
    }

    const PORTS: [&str; 3] = ["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2"];

    #[test]
    fn test_healthy_connection_does_not_rotate() {
        let bench = SimulatedBench::new();
        let mut connection = InstrumentConnection::establish(&settings(&PORTS), bench.source_factory());
        assert!(connection.is_available());

        for _ in 0..3 {
            let outcome = connection.set_voltage(0.05);
            assert_eq!(
                outcome,
                BiasOutcome::Applied {
                    port: "/dev/ttyUSB0".to_string()
                }
            );
        }
        assert_eq!(connection.port(), "/dev/ttyUSB0");
        assert_eq!(bench.connect_log(), vec!["/dev/ttyUSB0"]);
        assert_eq!(bench.voltage(), Some(0.05));
    }

    #[test]
    fn test_rotation_is_cyclic() {
        let bench = SimulatedBench::new();
        let mut connection = InstrumentConnection::establish(&settings(&PORTS), bench.source_factory());

        let expected = ["/dev/ttyUSB1", "/dev/ttyUSB2", "/dev/ttyUSB0"];
        for port in expected {
            bench.drop_links(1);
            let outcome = connection.set_voltage(0.1);
            assert!(outcome.succeeded());
            assert_eq!(connection.port(), port);
        }
        assert_eq!(
            bench.connect_log(),
            vec!["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2", "/dev/ttyUSB0"]
        );
    }

    #[test]
    fn test_new_port_becomes_default() {
        let bench = SimulatedBench::new();
        let mut connection = InstrumentConnection::establish(&settings(&PORTS), bench.source_factory());
        bench.drop_links(1);
        assert!(connection.set_voltage(0.1).succeeded());
        assert!(connection.set_voltage(0.2).succeeded());
        assert_eq!(connection.port(), "/dev/ttyUSB1");
        assert_eq!(bench.connect_log().len(), 2);
    }

    #[test]
    fn test_only_one_retry() {
        let bench = SimulatedBench::new();
        let mut connection = InstrumentConnection::establish(&settings(&PORTS), bench.source_factory());
        bench.drop_links(2);

        let outcome = connection.set_voltage(0.1);
        assert!(matches!(
            outcome,
            BiasOutcome::Failed(FailureReason::RetriesExhausted { .. })
        ));
        assert_eq!(connection.port(), "/dev/ttyUSB1");
        assert_eq!(bench.voltage(), None);
    }

    #[test]
    fn test_reconnect_failure_is_reported() {
        let bench = SimulatedBench::new();
        let mut connection = InstrumentConnection::establish(&settings(&PORTS), bench.source_factory());
        bench.kill_port("/dev/ttyUSB1");
        bench.drop_links(1);

        let outcome = connection.set_voltage(0.1);
        assert!(matches!(
            outcome,
            BiasOutcome::Failed(FailureReason::ReconnectFailed { ref port, .. }) if port == "/dev/ttyUSB1"
        ));

        // The next call fails on the dead port and moves on to a live one
        let outcome = connection.set_voltage(0.1);
        assert!(outcome.succeeded());
        assert_eq!(connection.port(), "/dev/ttyUSB2");
    }

    #[test]
    fn test_device_error_does_not_rotate() {
        let bench = SimulatedBench::new();
        let mut connection = InstrumentConnection::establish(&settings(&PORTS), bench.source_factory());
        let outcome = connection.set_voltage(50.0);
        assert!(matches!(outcome, BiasOutcome::Failed(FailureReason::Device(_))));
        assert_eq!(connection.port(), "/dev/ttyUSB0");
        assert_eq!(bench.connect_log().len(), 1);
    }

    #[test]
    fn test_unavailable_source() {
        let bench = SimulatedBench::new();
        bench.kill_port("/dev/ttyUSB0");
        bench.kill_port("/dev/ttyUSB1");
        let mut connection = InstrumentConnection::establish(&settings(&PORTS), bench.source_factory());

        assert!(!connection.is_available());
        assert_eq!(
            connection.set_voltage(0.1),
            BiasOutcome::Failed(FailureReason::Unavailable)
        );
        assert!(connection.turn_off().is_err());
    }

    #[test]
    fn test_no_candidates() {
        let bench = SimulatedBench::new();
        let config = SourceConfig {
            port: "/dev/ttyUSB0".to_string(),
            candidate_ports: vec![],
            ..SourceConfig::default()
        };
        let mut connection = InstrumentConnection::establish(&config, bench.source_factory());
        bench.drop_links(1);
        assert_eq!(
            connection.set_voltage(0.1),
            BiasOutcome::Failed(FailureReason::NoCandidates)
        );
    }

    #[test]
    fn test_unknown_current_port_rotates_to_first_candidate() {
        let bench = SimulatedBench::new();
        let config = SourceConfig {
            port: "/dev/ttyACM0".to_string(),
            candidate_ports: vec!["/dev/ttyUSB0".to_string(), "/dev/ttyUSB1".to_string()],
            ..SourceConfig::default()
        };
        let mut connection = InstrumentConnection::establish(&config, bench.source_factory());
        bench.drop_links(1);
        assert!(connection.set_voltage(0.1).succeeded());
        assert_eq!(connection.port(), "/dev/ttyUSB0");
    }
}
