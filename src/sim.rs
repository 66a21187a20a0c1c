//! Simulated instrument bench.
//!
//! A model of the source / DAC / IQ-mixer / spectrum-analyzer chain good
//! enough to exercise every calibration loop end to end: the playing
//! waveform is decoded back to complex baseband, a DC error and an IQ
//! imbalance are applied, and the analyzer reading is the spectral power at
//! the tuned offset from the carrier. Used by the binary (there is no
//! instrument transport in this crate) and by the end-to-end tests.

use crate::dac;
use crate::instrument::{
    Oscilloscope, PowerMeter, ScopeConfig, SignalSource, Trace, TriggerSlope, WaveformPlayer,
};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Physical model of the simulated chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SimModel {
    /// True DAC zero of channel A: leakage vanishes when A plays this code.
    pub zero_a: i32,
    /// True DAC zero of channel B.
    pub zero_b: i32,
    /// In-phase component of the mixer imbalance.
    ///
    /// The simulated baseband is `y = z + eps * conj(z)`; the compensation
    /// that cancels the image is `-eps`.
    pub imbalance_i: f64,
    /// Quadrature component of the mixer imbalance.
    pub imbalance_q: f64,
    /// Additive noise floor of the analyzer, in mW.
    pub noise_floor_mw: f64,
    /// Relative amplitude of multiplicative measurement noise (0 disables).
    pub noise_amplitude: f64,
    /// Noise generator seed.
    pub seed: u64,
    /// Scope volts per DAC code.
    pub volts_per_code: f64,
}

impl Default for SimModel {
    fn default() -> SimModel {
        SimModel {
            zero_a: 0,
            zero_b: 0,
            imbalance_i: 0.0,
            imbalance_q: 0.0,
            noise_floor_mw: 0.0,
            noise_amplitude: 0.0,
            seed: 0,
            volts_per_code: 1e-4,
        }
    }
}

#[derive(Debug)]
struct SimState {
    model: SimModel,
    source_ghz: f64,
    source_dbm: f64,
    output_on: bool,
    tuned_ghz: f64,
    playing: Vec<u32>,
    scope_config: ScopeConfig,
    scope_start_time: f64,
    rng: StdRng,
    measurements: u64,
}

/// Simulated instrument bench.
///
/// The four instrument handles share one state behind an `Arc<Mutex<...>>`,
/// so they can be borrowed independently and passed to the calibrators
/// together.
#[derive(Debug)]
pub struct SimBench {
    /// Simulated microwave source.
    pub source: SimSource,
    /// Simulated spectrum analyzer.
    pub meter: SimMeter,
    /// Simulated DAC board.
    pub player: SimPlayer,
    /// Simulated sampling scope.
    pub scope: SimScope,
    state: Arc<Mutex<SimState>>,
}

/// Simulated microwave source handle.
#[derive(Debug)]
pub struct SimSource(Arc<Mutex<SimState>>);

/// Simulated spectrum analyzer handle.
#[derive(Debug)]
pub struct SimMeter(Arc<Mutex<SimState>>);

/// Simulated DAC board handle.
#[derive(Debug)]
pub struct SimPlayer(Arc<Mutex<SimState>>);

/// Simulated sampling scope handle.
#[derive(Debug)]
pub struct SimScope(Arc<Mutex<SimState>>);

impl SimBench {
    /// Creates a bench with the given model.
    pub fn new(model: SimModel) -> SimBench {
        let rng = StdRng::seed_from_u64(model.seed);
        let state = Arc::new(Mutex::new(SimState {
            model,
            source_ghz: 0.0,
            source_dbm: 0.0,
            output_on: false,
            tuned_ghz: 0.0,
            playing: Vec::new(),
            scope_config: ScopeConfig {
                record_length: 512,
                averages: 1,
                sensitivity: 10e-3,
                offset: 0.0,
                time_step: 2e-9,
                trigger_level: 0.18,
                trigger_slope: TriggerSlope::Positive,
            },
            scope_start_time: 0.0,
            rng,
            measurements: 0,
        }));
        SimBench {
            source: SimSource(state.clone()),
            meter: SimMeter(state.clone()),
            player: SimPlayer(state.clone()),
            scope: SimScope(state.clone()),
            state,
        }
    }

    /// Returns the number of power readings taken so far.
    pub fn measurement_count(&self) -> u64 {
        self.state.lock().unwrap().measurements
    }
}

impl SimState {
    /// Spectral power of the modeled baseband at the tuned offset, in mW.
    ///
    /// The amplitude at RF offset `f` from the carrier is the correlation of
    /// the modeled baseband against `e^(+j·2π·f·n)` (the board's
    /// up-conversion convention maps the baseband tone `e^(-j·2π·f·n)` to
    /// `carrier + f`).
    fn measure_power(&mut self) -> f64 {
        self.measurements += 1;
        let base = if self.output_on && !self.playing.is_empty() {
            let f_off = self.tuned_ghz - self.source_ghz;
            let code_scale = 1.0 / dac::DAC_MIN.unsigned_abs() as f64;
            let dc_re = -(self.model.zero_a as f64) * code_scale;
            let dc_im = -(self.model.zero_b as f64) * code_scale;
            let omega = 2.0 * std::f64::consts::PI * f_off;
            let (mut acc_re, mut acc_im) = (0.0f64, 0.0f64);
            for (n, &word) in self.playing.iter().enumerate() {
                let (a, b) = dac::unpack(word);
                let z_re = a as f64 * code_scale + dc_re;
                let z_im = b as f64 * code_scale + dc_im;
                let y_re = z_re + self.model.imbalance_i * z_re + self.model.imbalance_q * z_im;
                let y_im = z_im + self.model.imbalance_q * z_re - self.model.imbalance_i * z_im;
                let (sin, cos) = (omega * n as f64).sin_cos();
                acc_re += y_re * cos - y_im * sin;
                acc_im += y_re * sin + y_im * cos;
            }
            let len = self.playing.len() as f64;
            let (a_re, a_im) = (acc_re / len, acc_im / len);
            let gain = 10.0f64.powf(0.1 * self.source_dbm);
            gain * (a_re * a_re + a_im * a_im)
        } else {
            0.0
        };
        let noisy = if self.model.noise_amplitude > 0.0 {
            base * (1.0 + self.model.noise_amplitude * (self.rng.gen::<f64>() - 0.5))
        } else {
            base
        };
        (noisy + self.model.noise_floor_mw).max(0.0)
    }

    /// Scope view of the playing waveform: the sum of both channels scaled
    /// to volts, sampled on the configured time base.
    fn capture_trace(&mut self) -> Trace {
        let config = self.scope_config;
        let start_time = self.scope_start_time;
        let volts = (0..config.record_length)
            .map(|k| {
                if self.playing.is_empty() {
                    return 0.0;
                }
                let t_ns = (start_time + k as f64 * config.time_step) * 1e9;
                let index = (t_ns.round() as i64).rem_euclid(self.playing.len() as i64);
                let (a, b) = dac::unpack(self.playing[index as usize]);
                self.model.volts_per_code * (a + b) as f64 + config.offset
            })
            .collect();
        Trace {
            start_time,
            time_step: config.time_step,
            volts,
        }
    }
}

impl SignalSource for SimSource {
    async fn set_frequency(&mut self, ghz: f64) -> Result<()> {
        self.0.lock().unwrap().source_ghz = ghz;
        Ok(())
    }

    async fn set_amplitude(&mut self, dbm: f64) -> Result<()> {
        self.0.lock().unwrap().source_dbm = dbm;
        Ok(())
    }

    async fn set_output(&mut self, on: bool) -> Result<()> {
        self.0.lock().unwrap().output_on = on;
        Ok(())
    }
}

impl PowerMeter for SimMeter {
    async fn tune(&mut self, ghz: f64) -> Result<()> {
        self.0.lock().unwrap().tuned_ghz = ghz;
        Ok(())
    }

    async fn measure_power(&mut self) -> Result<f64> {
        Ok(self.0.lock().unwrap().measure_power())
    }
}

impl WaveformPlayer for SimPlayer {
    async fn play(&mut self, words: &[u32], _looped: bool) -> Result<()> {
        self.0.lock().unwrap().playing = words.to_vec();
        Ok(())
    }
}

impl Oscilloscope for SimScope {
    async fn configure(&mut self, config: &ScopeConfig) -> Result<()> {
        self.0.lock().unwrap().scope_config = *config;
        Ok(())
    }

    async fn set_start_time(&mut self, seconds: f64) -> Result<()> {
        self.0.lock().unwrap().scope_start_time = seconds;
        Ok(())
    }

    async fn capture_trace(&mut self) -> Result<Trace> {
        Ok(self.0.lock().unwrap().capture_trace())
    }
}
