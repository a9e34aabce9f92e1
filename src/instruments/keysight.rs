use log::info;

use super::scpi::{ConnectionConfig, ScpiClient};
use super::{FunctionGenerator, PowerSupply};
use crate::error::SweepError;

/// Keysight 33622A two-channel function generator; channel 2 drives the
/// thermal source.
pub struct Keysight33622A {
    client: ScpiClient,
}

impl Keysight33622A {
    pub fn connect(address: &str, config: ConnectionConfig) -> Result<Self, SweepError> {
        let mut client = ScpiClient::connect(address, config)?;
        let idn = client.query("*IDN?")?;
        info!("33622A identified as: {}", idn);
        Ok(Self { client })
    }

    pub fn set_amplitude(&mut self, channel: u8, volts: f64) -> Result<(), SweepError> {
        self.client.write(&format!("SOUR{channel}:VOLT {volts:.4}"))
    }

    pub fn set_offset(&mut self, channel: u8, volts: f64) -> Result<(), SweepError> {
        self.client.write(&format!("SOUR{channel}:VOLT:OFFS {volts:.4}"))
    }

    /// Square wave between 0 V and `high_level`
    pub fn set_high_level(&mut self, channel: u8, high_level: f64) -> Result<(), SweepError> {
        self.set_amplitude(channel, high_level)?;
        self.set_offset(channel, high_level / 2.0)
    }
}

impl FunctionGenerator for Keysight33622A {
    fn set_output(&mut self, channel: u8, enabled: bool) -> Result<(), SweepError> {
        let state = if enabled { "ON" } else { "OFF" };
        self.client.write(&format!("OUTP{channel} {state}"))
    }
}

/// Keysight E36312A triple-output supply; channel 3 powers the cryogenic
/// amplifier.
pub struct KeysightE36312A {
    client: ScpiClient,
}

impl KeysightE36312A {
    pub fn connect(address: &str, config: ConnectionConfig) -> Result<Self, SweepError> {
        let mut client = ScpiClient::connect(address, config)?;
        let idn = client.query("*IDN?")?;
        info!("E36312A identified as: {}", idn);
        Ok(Self { client })
    }

    pub fn output_on(&mut self, channel: u8) -> Result<(), SweepError> {
        self.client.write(&format!("OUTP ON,(@{channel})"))
    }
}

impl PowerSupply for KeysightE36312A {
    fn output_off(&mut self, channel: u8) -> Result<(), SweepError> {
        self.client.write(&format!("OUTP OFF,(@{channel})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn fake_instrument(idn: &'static str) -> (String, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut received = Vec::new();
            for line in BufReader::new(stream).lines() {
                let line = line.unwrap();
                if line.ends_with('?') {
                    writeln!(writer, "{}", idn).unwrap();
                }
                received.push(line);
            }
            received
        });
        (address, handle)
    }

    #[test]
    fn test_function_generator_commands() {
        let (address, handle) = fake_instrument("Keysight Technologies,33622A,0,1");
        let mut generator = Keysight33622A::connect(&address, ConnectionConfig::default()).unwrap();
        generator.set_high_level(2, 0.5).unwrap();
        generator.set_output(2, false).unwrap();
        drop(generator);

        let received = handle.join().unwrap();
        assert_eq!(
            received,
            vec!["*IDN?", "SOUR2:VOLT 0.5000", "SOUR2:VOLT:OFFS 0.2500", "OUTP2 OFF"]
        );
    }

    #[test]
    fn test_power_supply_commands() {
        let (address, handle) = fake_instrument("Keysight Technologies,E36312A,0,1");
        let mut supply = KeysightE36312A::connect(&address, ConnectionConfig::default()).unwrap();
        supply.output_off(3).unwrap();
        drop(supply);

        let received = handle.join().unwrap();
        assert_eq!(received, vec!["*IDN?", "OUTP OFF,(@3)"]);
    }

    #[test]
    fn test_unreachable_instrument() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let result = KeysightE36312A::connect(
            &format!("127.0.0.1:{port}"),
            ConnectionConfig::default(),
        );
        assert!(result.is_err());
    }
}
