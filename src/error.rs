use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("IO error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Connection timeout")]
    Timeout,
    #[error("Serial link error on {port}: {message}")]
    Transport { port: String, message: String },
    #[error("Instrument not connected: {0}")]
    NotConnected(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Instrument error: {0}")]
    Device(String),
    #[error("Measurement error: {0}")]
    Measurement(String),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Plot error: {0}")]
    Plot(String),
}

impl SweepError {
    /// Whether the failure happened in the link to the instrument rather than
    /// in the instrument itself. Only these are worth a port rotation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SweepError::Io { .. }
                | SweepError::Timeout
                | SweepError::Transport { .. }
                | SweepError::NotConnected(_)
        )
    }

    pub fn transport(port: &str, err: impl std::fmt::Display) -> Self {
        SweepError::Transport {
            port: port.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SweepError {
    fn from(source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::TimedOut {
            SweepError::Timeout
        } else {
            SweepError::Io {
                source,
                context: "instrument I/O".to_string(),
            }
        }
    }
}
