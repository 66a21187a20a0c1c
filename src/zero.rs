//! DAC zero calibration.
//!
//! With the IQ mixer driven by a DC-free carrier, any residual DC offset on
//! the DAC outputs leaks carrier power through the mixer. This module finds
//! the pair of DAC codes that minimizes that leakage, one carrier frequency
//! at a time, using an adaptive coordinate-descent search over power readings
//! from the spectrum analyzer.

use crate::instrument::{PowerMeter, SignalSource, WaveformPlayer};
use crate::search::parabolic_step;
use crate::waveform;
use anyhow::Result;

/// Starting step size of the zero search, in DAC codes.
pub const INITIAL_PRECISION: i32 = 0x800;

/// Result of one zero calibration: DC correction codes for both channels.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ZeroOffsets {
    /// Channel A offset in DAC codes.
    pub a: i32,
    /// Channel B offset in DAC codes.
    pub b: i32,
}

/// Calibrates the DAC zeros for one carrier frequency.
///
/// Tunes the source and the analyzer to `freq_ghz`, then performs sequential
/// coordinate descent on the two channel offsets: each axis takes a parabolic
/// step from three power readings one step apart, using the freshest value of
/// the other axis. The step size starts at [`INITIAL_PRECISION`] and after
/// every round is halved, or shrunk directly to twice the largest correction
/// when that is smaller. The search ends when the integer step size
/// underflows to zero.
///
/// A reading that is not a local minimum produces a zero step (see
/// [`parabolic_step`]), not an error; instrument failures abort the run.
pub async fn calibrate_zero(
    source: &mut impl SignalSource,
    meter: &mut impl PowerMeter,
    player: &mut impl WaveformPlayer,
    freq_ghz: f64,
) -> Result<ZeroOffsets> {
    source.set_frequency(freq_ghz).await?;
    meter.tune(freq_ghz).await?;
    tracing::info!(freq_ghz, "calibrating DAC zeros");
    let mut a = 0i32;
    let mut b = 0i32;
    let mut precision = INITIAL_PRECISION;
    while precision > 0 {
        let al = measure_leakage(meter, player, a - precision, b).await?;
        let ar = measure_leakage(meter, player, a + precision, b).await?;
        let ac = measure_leakage(meter, player, a, b).await?;
        let corr_a = (precision as f64 * parabolic_step(al, ac, ar)).round() as i32;
        a += corr_a;

        let bl = measure_leakage(meter, player, a, b - precision).await?;
        let br = measure_leakage(meter, player, a, b + precision).await?;
        let bc = measure_leakage(meter, player, a, b).await?;
        let corr_b = (precision as f64 * parabolic_step(bl, bc, br)).round() as i32;
        b += corr_b;

        let optimal = 2 * corr_a.abs().max(corr_b.abs());
        precision /= 2;
        if precision > optimal {
            precision = optimal;
        }
        tracing::debug!(
            a,
            b,
            precision,
            power_dbm = 10.0 * bc.log10(),
            "zero search round"
        );
    }
    Ok(ZeroOffsets { a, b })
}

/// Plays the constant waveform `(a, b)` and reads the leaked carrier power.
async fn measure_leakage(
    meter: &mut impl PowerMeter,
    player: &mut impl WaveformPlayer,
    a: i32,
    b: i32,
) -> Result<f64> {
    player.play(&waveform::constant(a, b), true).await?;
    meter.measure_power().await
}
