//! iqcal automates the calibration of two-channel GHz DAC boards that drive
//! IQ up-conversion chains. For each operating point it finds the DC zero
//! offsets of the DAC channels and the complex IQ-imbalance compensation that
//! minimize leaked power at an unwanted frequency, using closed-loop power
//! readings from a spectrum analyzer, and it measures impulse responses on a
//! sampling scope for the pulse correctors. Instruments sit behind capability
//! traits; a model-based simulated bench backs the CLI and the end-to-end
//! tests.

#![warn(missing_docs)]
#![allow(async_fn_in_trait)]

pub mod app;
pub mod args;
pub mod dac;
pub mod instrument;
pub mod pulse;
pub mod recorder;
pub mod scan;
pub mod search;
pub mod sideband;
pub mod sim;
pub mod waveform;
pub mod zero;
