//! Calibration stimulus synthesis.
//!
//! Builds the two waveforms the calibrators play on the DAC board: a constant
//! (DC) waveform for the zero search and a periodic two-sideband waveform for
//! the IQ compensation search.

use crate::dac;

/// Length in samples of the constant zero-calibration waveform.
pub const CONSTANT_LEN: usize = 64;

/// Period in samples of the sideband stimulus.
///
/// Samples are spaced 1 ns, so representable sideband frequencies are
/// multiples of 1/200 GHz = 5 MHz.
pub const PERIOD: usize = 200;

/// A synthesized sideband stimulus.
#[derive(Debug, Clone, PartialEq)]
pub struct SidebandStimulus {
    /// Packed sample words, trigger set on the first word.
    pub words: Vec<u32>,
    /// Amplitude factor applied relative to the nominal full-scale mapping.
    ///
    /// The synthesized signal is rescaled to fill the DAC dynamic range.
    /// Measured power must be normalized by this factor so comparisons stay
    /// valid across iterations with different compensation magnitudes.
    pub rescale: f64,
}

/// Builds the constant waveform playing DAC codes `(a, b)` on every sample.
///
/// The trigger is raised on the first word so the scope and the analyzer can
/// synchronize to the loop.
pub fn constant(a: i32, b: i32) -> Vec<u32> {
    let mut words = vec![dac::pack(a, b, false); CONSTANT_LEN];
    words[0] |= dac::TRIGGER_MASK;
    words
}

/// Synthesizes the two-sideband IQ stimulus.
///
/// The complex baseband signal is `0.5·e^(-j·2π·f·n) + 0.5·comp·e^(+j·2π·f·n)`
/// over one [`PERIOD`]: a full-strength tone at `carrier + f` plus a
/// compensation tone at `carrier - f` with amplitude `comp = comp_i + j·comp_q`.
/// `sideband_ghz` is the sideband offset in GHz (cycles per ns).
///
/// The real part drives channel A and the imaginary part channel B. The
/// waveform is scaled so its peak exactly fills the DAC range; the applied
/// factor is reported in [`SidebandStimulus::rescale`].
pub fn sideband(sideband_ghz: f64, comp_i: f64, comp_q: f64) -> SidebandStimulus {
    let omega = 2.0 * std::f64::consts::PI * sideband_ghz;
    let mut re = [0.0f64; PERIOD];
    let mut im = [0.0f64; PERIOD];
    let mut peak = 0.0f64;
    for n in 0..PERIOD {
        let phase = omega * n as f64;
        let (sin, cos) = phase.sin_cos();
        // 0.5·e^(-jφ) + 0.5·comp·e^(+jφ)
        re[n] = 0.5 * cos + 0.5 * (comp_i * cos - comp_q * sin);
        im[n] = -0.5 * sin + 0.5 * (comp_i * sin + comp_q * cos);
        peak = peak.max(re[n].abs()).max(im[n].abs());
    }
    if peak < f64::EPSILON {
        return SidebandStimulus {
            words: constant_period(),
            rescale: 1.0,
        };
    }
    let scale = dac::DAC_MAX as f64 / peak;
    let mut words: Vec<u32> = (0..PERIOD)
        .map(|n| {
            dac::pack(
                (re[n] * scale).round() as i32,
                (im[n] * scale).round() as i32,
                false,
            )
        })
        .collect();
    words[0] |= dac::TRIGGER_MASK;
    SidebandStimulus {
        words,
        rescale: 1.0 / peak,
    }
}

fn constant_period() -> Vec<u32> {
    let mut words = vec![dac::pack(0, 0, false); PERIOD];
    words[0] |= dac::TRIGGER_MASK;
    words
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_waveform() {
        let words = constant(37, -12);
        assert_eq!(words.len(), CONSTANT_LEN);
        assert_eq!(words[0] & dac::TRIGGER_MASK, dac::TRIGGER_MASK);
        for &word in &words {
            assert_eq!(dac::unpack(word), (37, -12));
        }
        assert_eq!(words[1] & dac::TRIGGER_MASK, 0);
    }

    #[test]
    fn sideband_fills_dac_range() {
        let stimulus = sideband(0.01, 0.0, 0.0);
        assert_eq!(stimulus.words.len(), PERIOD);
        let peak = stimulus
            .words
            .iter()
            .map(|&w| {
                let (a, b) = dac::unpack(w);
                a.abs().max(b.abs())
            })
            .max()
            .unwrap();
        assert_eq!(peak, dac::DAC_MAX);
        // unity tone, peak 0.5, so the rescale factor is 2
        assert!((stimulus.rescale - 2.0).abs() < 1e-3);
    }

    #[test]
    fn sideband_tone_frequency() {
        // 2 cycles per period
        let f = 2.0 / PERIOD as f64;
        let stimulus = sideband(f, 0.0, 0.0);
        // correlate the decoded waveform against e^(+j·2π·f·n); the intended
        // tone is at -f, so the +f bin must be empty
        let (mut wanted_re, mut wanted_im) = (0.0, 0.0);
        let (mut image_re, mut image_im) = (0.0, 0.0);
        for (n, &word) in stimulus.words.iter().enumerate() {
            let (a, b) = dac::unpack(word);
            let (a, b) = (a as f64, b as f64);
            let phase = 2.0 * std::f64::consts::PI * f * n as f64;
            let (sin, cos) = phase.sin_cos();
            wanted_re += a * cos - b * sin;
            wanted_im += a * sin + b * cos;
            image_re += a * cos + b * sin;
            image_im += -a * sin + b * cos;
        }
        let wanted = (wanted_re * wanted_re + wanted_im * wanted_im).sqrt();
        let image = (image_re * image_re + image_im * image_im).sqrt();
        assert!(wanted > 1e5);
        assert!(image < wanted * 1e-2);
    }

    #[test]
    fn compensation_feeds_image_tone() {
        let f = 2.0 / PERIOD as f64;
        let plain = sideband(f, 0.0, 0.0);
        let compensated = sideband(f, 0.3, -0.2);
        assert_ne!(plain.words, compensated.words);
        // larger peak when the compensation tone adds, so a smaller rescale
        assert!(compensated.rescale < plain.rescale);
    }
}
