use ndarray::Array2;

use crate::config::GateWindows;
use crate::error::SweepError;
use crate::types::Picoseconds;

/// Virtual channels carrying detector events that fall inside the gate-on
/// and gate-off windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatedPair {
    pub on: i32,
    pub off: i32,
}

/// The photon time tagger, as far as the sweep needs it
pub trait TimeTagger: Send {
    /// Set the discriminator threshold of an input channel in volts
    fn set_trigger_level(&mut self, channel: i32, volts: f64) -> Result<(), SweepError>;

    /// Create the gate-on and gate-off virtual channels.
    ///
    /// Each gate opens and closes at fixed delays after an edge on
    /// `reference`.
    fn gated_channels(
        &mut self,
        detector: i32,
        reference: i32,
        gating: &GateWindows,
    ) -> Result<GatedPair, SweepError>;

    /// Create a counter over `channels` with `n_values` bins of `binwidth`
    fn counter(
        &mut self,
        channels: &[i32],
        binwidth: Picoseconds,
        n_values: usize,
    ) -> Result<Box<dyn Counter>, SweepError>;
}

/// Binned click counter
pub trait Counter: Send {
    /// Start counting for `duration`, optionally clearing previous data
    fn start_for(&mut self, duration: Picoseconds, clear: bool) -> Result<(), SweepError>;

    /// Block until the acquisition started by [`Counter::start_for`] is over
    fn wait_until_finished(&mut self) -> Result<(), SweepError>;

    /// Counts indexed `[channel][bin]`
    fn get_data(&mut self) -> Result<Array2<u64>, SweepError>;
}
