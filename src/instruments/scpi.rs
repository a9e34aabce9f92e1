use log::{debug, trace, warn};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::SweepError;

/// Raw SCPI socket port used by Keysight instruments
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Timeouts for the SCPI socket.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pcr_sweep::instruments::ConnectionConfig;
///
/// let config = ConnectionConfig {
///     connect_timeout: Duration::from_secs(3),
///     read_timeout: Duration::from_secs(5),
///     write_timeout: Duration::from_secs(2),
/// };
/// assert_eq!(config.connect_timeout, Duration::from_secs(3));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl ConnectionConfig {
    /// Same timeout for every phase
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            read_timeout: timeout,
            write_timeout: timeout,
        }
    }
}

/// Builder for [`ScpiClient`]
///
/// ```no_run
/// use pcr_sweep::instruments::ScpiClient;
///
/// let mut client = ScpiClient::builder().address("10.7.0.187").build()?;
/// println!("{}", client.query("*IDN?")?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Default)]
pub struct ScpiClientBuilder {
    address: Option<String>,
    config: ConnectionConfig,
}

impl ScpiClientBuilder {
    /// `host` or `host:port`; the port defaults to 5025
    pub fn address(mut self, addr: &str) -> Self {
        self.address = Some(addr.to_string());
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ScpiClient, SweepError> {
        let address = self
            .address
            .ok_or_else(|| SweepError::InvalidAddress("address must be specified".to_string()))?;

        let socket_addr = resolve(&address)?;
        debug!("Connecting to SCPI instrument at {socket_addr}");

        let stream = TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout)
            .map_err(|e| {
                warn!("Failed to connect to {address}: {e}");
                if e.kind() == std::io::ErrorKind::TimedOut {
                    SweepError::Timeout
                } else {
                    SweepError::Io {
                        source: e,
                        context: format!("Failed to connect to {address}"),
                    }
                }
            })?;

        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        let reader = BufReader::new(stream.try_clone()?);

        Ok(ScpiClient {
            stream,
            reader,
            address,
        })
    }
}

fn resolve(address: &str) -> Result<SocketAddr, SweepError> {
    let with_port = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_SCPI_PORT}")
    };
    with_port
        .to_socket_addrs()
        .map_err(|_| SweepError::InvalidAddress(address.to_string()))?
        .next()
        .ok_or_else(|| SweepError::InvalidAddress(address.to_string()))
}

/// Line-oriented SCPI over a raw TCP socket
pub struct ScpiClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    address: String,
}

impl ScpiClient {
    pub fn builder() -> ScpiClientBuilder {
        ScpiClientBuilder::default()
    }

    pub fn connect(address: &str, config: ConnectionConfig) -> Result<Self, SweepError> {
        Self::builder().address(address).config(config).build()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a command that produces no response
    pub fn write(&mut self, command: &str) -> Result<(), SweepError> {
        trace!("SCPI {} <- '{}'", self.address, command);
        self.stream.write_all(format!("{command}\n").as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Send a query and return the trimmed response line
    pub fn query(&mut self, command: &str) -> Result<String, SweepError> {
        self.write(command)?;
        let mut response = String::new();
        let read = self.reader.read_line(&mut response)?;
        if read == 0 {
            return Err(SweepError::Transport {
                port: self.address.clone(),
                message: "connection closed by instrument".to_string(),
            });
        }
        trace!("SCPI {} -> '{}'", self.address, response.trim_end());
        Ok(response.trim().to_string())
    }
}
