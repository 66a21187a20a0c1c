//! Sideband compensation calibration.
//!
//! When the IQ mixer performs sideband mixing, gain and phase imbalance
//! between the I and Q arms leak power into the image sideband at
//! `carrier - sideband`. This module finds the complex compensation
//! coefficient that, added to the stimulus, cancels the image. The
//! coefficient is kept as two independent real components and searched by the
//! same adaptive coordinate descent as the zero calibration, with fractional
//! step sizes.

use crate::instrument::{PowerMeter, SignalSource, WaveformPlayer};
use crate::search::parabolic_step;
use crate::waveform;
use anyhow::Result;

/// Sideband frequencies below this magnitude (GHz) are treated as zero.
///
/// At zero offset the two sidebands coincide and there is nothing to cancel.
pub const MIN_SIDEBAND_GHZ: f64 = 3e-5;

/// Step size below which the search is converged (2^-14).
pub const CONVERGENCE_THRESHOLD: f64 = 1.0 / (1 << 14) as f64;

/// Complex IQ compensation coefficient, kept as two real components.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Compensation {
    /// In-phase (real) component.
    pub i: f64,
    /// Quadrature (imaginary) component.
    pub q: f64,
}

impl Compensation {
    /// The zero compensation.
    pub const ZERO: Compensation = Compensation { i: 0.0, q: 0.0 };

    fn offset_i(self, delta: f64) -> Compensation {
        Compensation {
            i: self.i + delta,
            ..self
        }
    }

    fn offset_q(self, delta: f64) -> Compensation {
        Compensation {
            q: self.q + delta,
            ..self
        }
    }
}

/// Calibrates the IQ compensation for one (carrier, sideband) pair.
///
/// Returns [`Compensation::ZERO`] immediately, without touching any
/// instrument, when `sideband_ghz` is below [`MIN_SIDEBAND_GHZ`] in
/// magnitude. Otherwise tunes the source to the carrier and the analyzer to
/// the image at `carrier - sideband`, then descends on the two components in
/// turn: perturb by the current step, take a parabolic step, and re-measure
/// the center before the quadrature update so it sees the fresh in-phase
/// value. The step size starts at 1.0 and shrinks to
/// `min(2·max(|corr_i|, |corr_q|), step / 2)` per round, converging once it
/// falls below [`CONVERGENCE_THRESHOLD`]; that bounds the worst case to 14
/// halvings' worth of hardware readings.
pub async fn calibrate_sideband(
    source: &mut impl SignalSource,
    meter: &mut impl PowerMeter,
    player: &mut impl WaveformPlayer,
    carrier_ghz: f64,
    sideband_ghz: f64,
) -> Result<Compensation> {
    if sideband_ghz.abs() < MIN_SIDEBAND_GHZ {
        return Ok(Compensation::ZERO);
    }
    source.set_frequency(carrier_ghz).await?;
    meter.tune(carrier_ghz - sideband_ghz).await?;
    tracing::info!(carrier_ghz, sideband_ghz, "calibrating IQ compensation");
    let mut comp = Compensation::ZERO;
    let mut precision = 1.0f64;
    while precision > CONVERGENCE_THRESHOLD {
        let li = measure_image(meter, player, sideband_ghz, comp.offset_i(-precision)).await?;
        let ri = measure_image(meter, player, sideband_ghz, comp.offset_i(precision)).await?;
        let ci = measure_image(meter, player, sideband_ghz, comp).await?;
        let corr_i = precision * parabolic_step(li, ci, ri);
        comp.i += corr_i;

        let lq = measure_image(meter, player, sideband_ghz, comp.offset_q(-precision)).await?;
        let rq = measure_image(meter, player, sideband_ghz, comp.offset_q(precision)).await?;
        let cq = measure_image(meter, player, sideband_ghz, comp).await?;
        let corr_q = precision * parabolic_step(lq, cq, rq);
        comp.q += corr_q;

        precision = (2.0 * corr_i.abs().max(corr_q.abs())).min(precision / 2.0);
        tracing::debug!(
            comp_i = comp.i,
            comp_q = comp.q,
            precision,
            image_dbm = 10.0 * cq.log10(),
            "sideband search round"
        );
    }
    Ok(comp)
}

/// Plays the sideband stimulus and reads the image power, normalized by the
/// stimulus rescale factor.
async fn measure_image(
    meter: &mut impl PowerMeter,
    player: &mut impl WaveformPlayer,
    sideband_ghz: f64,
    comp: Compensation,
) -> Result<f64> {
    let stimulus = waveform::sideband(sideband_ghz, comp.i, comp.q);
    player.play(&stimulus.words, true).await?;
    Ok(meter.measure_power().await? / stimulus.rescale)
}
