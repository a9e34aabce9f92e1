use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Counting time in picoseconds, the native unit of the time tagger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Picoseconds(pub u64);

impl Picoseconds {
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self((seconds * 1e12).round() as u64)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 * 1e-12
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<Picoseconds> for Duration {
    fn from(ps: Picoseconds) -> Duration {
        Duration::from_nanos(ps.0 / 1_000)
    }
}

impl From<Duration> for Picoseconds {
    fn from(duration: Duration) -> Self {
        Picoseconds(duration.as_nanos() as u64 * 1_000)
    }
}

/// Discriminator threshold applied to the detector channel
///
/// Keeps the label exactly as it appeared in the parameter file so that
/// column headers read the same as the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerLevel {
    pub label: String,
    pub volts: f64,
}

impl TriggerLevel {
    pub fn parse(label: &str) -> Result<Self, String> {
        let trimmed = label.trim();
        let volts = trimmed
            .parse::<f64>()
            .map_err(|_| format!("trigger level '{}' is not a number", label))?;
        if !volts.is_finite() {
            return Err(format!("trigger level '{}' is not finite", label));
        }
        Ok(Self {
            label: trimmed.to_string(),
            volts,
        })
    }
}

impl fmt::Display for TriggerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// What is counted at every bias step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMode {
    /// Gate-on minus gate-off counts, each normalised by its duty cycle
    FilteredPcr,
    /// Binned count rate on the bare detector channel
    Dcr,
}

impl MeasurementMode {
    pub fn name(&self) -> &'static str {
        match self {
            MeasurementMode::FilteredPcr => "filtered_pcr",
            MeasurementMode::Dcr => "dcr",
        }
    }
}

impl FromStr for MeasurementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filtered_pcr" => Ok(MeasurementMode::FilteredPcr),
            "dcr" => Ok(MeasurementMode::Dcr),
            other => Err(format!(
                "unknown measurement type '{}', must be 'filtered_pcr' or 'dcr'",
                other
            )),
        }
    }
}

impl fmt::Display for MeasurementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
