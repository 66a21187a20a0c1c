//! Instrument capability traits.
//!
//! The calibration engine is transport-agnostic: it talks to the microwave
//! source, the spectrum analyzer, the DAC board and the sampling scope
//! through the traits in this module. Implementations own the wire protocol
//! (GPIB, VISA, a simulation model); the engine only sees scalar readings and
//! traces.
//!
//! Every method is async and a single suspension point. Within one
//! calibration run calls are strictly ordered, because each stimulus depends
//! on the previous measurement and the instruments hold global state (tuned
//! frequency, averaging mode). Failures propagate to the caller and abort the
//! enclosing run.

use anyhow::Result;

/// Microwave signal source providing the carrier.
pub trait SignalSource {
    /// Sets the output frequency in GHz.
    async fn set_frequency(&mut self, ghz: f64) -> Result<()>;

    /// Sets the output amplitude in dBm.
    async fn set_amplitude(&mut self, dbm: f64) -> Result<()>;

    /// Enables or disables the RF output.
    async fn set_output(&mut self, on: bool) -> Result<()>;
}

/// Scalar power readout, typically a spectrum analyzer in zero-span mode.
pub trait PowerMeter {
    /// Tunes the measurement to a center frequency in GHz.
    async fn tune(&mut self, ghz: f64) -> Result<()>;

    /// Returns the mean power at the tuned frequency, in linear milliwatts.
    async fn measure_power(&mut self) -> Result<f64>;
}

/// DAC board waveform memory.
pub trait WaveformPlayer {
    /// Loads a waveform of packed sample words and starts playing it.
    ///
    /// With `looped` set the waveform repeats until replaced by the next
    /// call; otherwise it plays once and the output holds the last sample.
    async fn play(&mut self, words: &[u32], looped: bool) -> Result<()>;
}

/// Sampling oscilloscope.
pub trait Oscilloscope {
    /// Applies a full acquisition setup.
    async fn configure(&mut self, config: &ScopeConfig) -> Result<()>;

    /// Sets the start of the acquisition window relative to the trigger, in
    /// seconds.
    async fn set_start_time(&mut self, seconds: f64) -> Result<()>;

    /// Triggers an acquisition and returns the captured trace.
    async fn capture_trace(&mut self) -> Result<Trace>;
}

/// One captured time-domain trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// Time of the first sample relative to the trigger, in seconds.
    pub start_time: f64,
    /// Sample spacing in seconds.
    pub time_step: f64,
    /// Sampled voltages.
    pub volts: Vec<f64>,
}

impl Trace {
    /// Returns the mean voltage of the trace.
    pub fn mean(&self) -> f64 {
        if self.volts.is_empty() {
            return 0.0;
        }
        self.volts.iter().sum::<f64>() / self.volts.len() as f64
    }

    /// Returns whether two traces share the same time base.
    ///
    /// The sample count is part of the time base: traces of different
    /// lengths cannot be compared point by point either.
    pub fn same_time_base(&self, other: &Trace) -> bool {
        self.start_time == other.start_time
            && self.time_step == other.time_step
            && self.volts.len() == other.volts.len()
    }
}

/// Oscilloscope acquisition setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeConfig {
    /// Number of points per trace.
    pub record_length: u32,
    /// Number of acquisitions averaged per trace.
    pub averages: u32,
    /// Vertical sensitivity in volts per division.
    pub sensitivity: f64,
    /// Vertical offset in volts.
    pub offset: f64,
    /// Horizontal sample spacing in seconds.
    pub time_step: f64,
    /// Trigger level in volts.
    pub trigger_level: f64,
    /// Trigger slope.
    pub trigger_slope: TriggerSlope,
}

/// Oscilloscope trigger slope.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TriggerSlope {
    /// Trigger on a rising edge.
    Positive,
    /// Trigger on a falling edge.
    Negative,
}
