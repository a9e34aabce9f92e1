//! SRS SIM928 isolated voltage source in a SIM900 mainframe, reached through
//! a Prologix GPIB-USB adapter that enumerates as a serial device.

use log::{debug, trace};
use serialport::SerialPort;
use std::io::Write;
use std::time::Duration;

use super::{SourceFactory, VoltageSource};
use crate::error::SweepError;

/// Output range of the SIM928
pub const MAX_VOLTAGE: f64 = 20.0;

/// Escape string that ends a SIM900 pass-through connection
pub const ESCAPE: &str = "xyz";

/// Command strings, without line terminator
pub mod commands {
    use super::ESCAPE;

    /// Put the Prologix adapter in controller mode addressing the mainframe
    pub fn prologix_setup(gpib_address: u8) -> Vec<String> {
        vec![
            "++mode 1".to_string(),
            format!("++addr {}", gpib_address),
            "++auto 0".to_string(),
        ]
    }

    /// Open a pass-through connection to a mainframe slot
    pub fn connect_slot(slot: u8) -> String {
        format!("CONN {},\"{}\"", slot, ESCAPE)
    }

    pub fn set_voltage(volts: f64) -> String {
        format!("VOLT {:.3}", volts)
    }

    pub fn output(enabled: bool) -> String {
        if enabled { "OPON".to_string() } else { "OPOF".to_string() }
    }
}

pub struct Sim928 {
    port_name: String,
    gpib_address: u8,
    slot: u8,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl Sim928 {
    pub fn new(port_name: &str, gpib_address: u8, slot: u8) -> Self {
        Self {
            port_name: port_name.to_string(),
            gpib_address,
            slot,
            baud_rate: 9600,
            timeout: Duration::from_secs(1),
            port: None,
        }
    }

    pub fn with_link_settings(mut self, baud_rate: u32, timeout: Duration) -> Self {
        self.baud_rate = baud_rate;
        self.timeout = timeout;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn write_line(&mut self, command: &str) -> Result<(), SweepError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| SweepError::NotConnected(format!("SIM928 on {}", self.port_name)))?;

        trace!("SIM928 {} <- '{}'", self.port_name, command);
        port.write_all(format!("{}\n", command).as_bytes())
            .map_err(|e| SweepError::transport(&self.port_name, e))?;
        port.flush()
            .map_err(|e| SweepError::transport(&self.port_name, e))?;
        Ok(())
    }
}

impl VoltageSource for Sim928 {
    fn connect(&mut self) -> Result<(), SweepError> {
        debug!("Opening SIM928 link on {}", self.port_name);
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| SweepError::transport(&self.port_name, e))?;
        self.port = Some(port);

        for command in commands::prologix_setup(self.gpib_address) {
            self.write_line(&command)?;
        }
        self.write_line(&commands::connect_slot(self.slot))?;
        debug!(
            "SIM928 connected on {} (GPIB {}, slot {})",
            self.port_name, self.gpib_address, self.slot
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SweepError> {
        if self.port.is_none() {
            return Ok(());
        }
        let result = self.write_line(ESCAPE);
        self.port = None;
        result
    }

    fn turn_on(&mut self) -> Result<(), SweepError> {
        self.write_line(&commands::output(true))
    }

    fn turn_off(&mut self) -> Result<(), SweepError> {
        self.write_line(&commands::output(false))
    }

    fn set_voltage(&mut self, volts: f64) -> Result<(), SweepError> {
        if !volts.is_finite() || volts.abs() > MAX_VOLTAGE {
            return Err(SweepError::Device(format!(
                "{} V is outside the SIM928 range of ±{} V",
                volts, MAX_VOLTAGE
            )));
        }
        self.write_line(&commands::set_voltage(volts))
    }
}

impl Drop for Sim928 {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Opens [`Sim928`] drivers with fixed serial link settings
pub struct SerialSourceFactory {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialSourceFactory {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }
}

impl SourceFactory for SerialSourceFactory {
    fn open(&mut self, port: &str, gpib_address: u8, slot: u8) -> Box<dyn VoltageSource> {
        Box::new(Sim928::new(port, gpib_address, slot).with_link_settings(self.baud_rate, self.timeout))
    }
}
