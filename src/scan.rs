//! Carrier-frequency scan orchestration.
//!
//! Drives the zero and sideband calibrators across a frequency range, one
//! independent calibration per operating point, and records each result.

use crate::instrument::{PowerMeter, SignalSource, WaveformPlayer};
use crate::recorder::{Column, DatasetId, ResultRecorder};
use crate::sideband::calibrate_sideband;
use crate::zero::calibrate_zero;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Name of the zero calibration dataset.
pub const ZERO_DATASET: &str = "dac zeros";

/// Name of the sideband compensation dataset.
pub const SIDEBAND_DATASET: &str = "iq compensation";

/// Parameters of one calibration session.
///
/// Owned by the orchestrator for the duration of a scan and never mutated
/// mid-scan. Frequencies in GHz, amplitudes in dBm, times in ns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanParams {
    /// First carrier frequency of a scan.
    pub carrier_min_ghz: f64,
    /// End of the carrier range (exclusive).
    pub carrier_max_ghz: f64,
    /// Carrier step of the zero scan.
    pub carrier_step_ghz: f64,
    /// Source output amplitude.
    pub source_dbm: f64,
    /// Carrier step of the sideband scan.
    pub sideband_carrier_step_ghz: f64,
    /// Spacing of the sideband frequency set.
    pub sideband_step_ghz: f64,
    /// Number of sideband frequencies, centered on zero.
    pub sideband_count: usize,
    /// Carrier frequency of the AC pulse calibration.
    pub carrier_ghz: f64,
    /// DAC-to-scope delay for pulse measurements through the IQ mixer.
    pub dac_offset_time_iq_ns: i64,
    /// DAC-to-scope delay for direct pulse measurements.
    pub dac_offset_time_no_iq_ns: i64,
}

impl Default for ScanParams {
    fn default() -> ScanParams {
        ScanParams {
            carrier_min_ghz: 4.0,
            carrier_max_ghz: 7.0,
            carrier_step_ghz: 0.025,
            source_dbm: 2.7,
            sideband_carrier_step_ghz: 0.05,
            sideband_step_ghz: 0.05,
            sideband_count: 14,
            carrier_ghz: 4.0,
            dac_offset_time_iq_ns: 6,
            dac_offset_time_no_iq_ns: 6,
        }
    }
}

impl ScanParams {
    /// Returns the symmetric sideband frequency set: `sideband_count` values
    /// centered on zero, spaced `sideband_step_ghz` apart.
    pub fn sideband_frequencies(&self) -> Vec<f64> {
        (0..self.sideband_count)
            .map(|k| (k as f64 - (self.sideband_count as f64 - 1.0) * 0.5) * self.sideband_step_ghz)
            .collect()
    }
}

/// Iterates `min + k * step` for `k = 0, 1, ...` while below `max`.
///
/// Index-based so a step that does not evenly divide the range skips the last
/// point instead of overshooting, and accumulated rounding cannot produce an
/// extra point. The step must be positive; the orchestrators reject
/// non-positive steps before reaching the instruments.
pub fn frequency_steps(min: f64, max: f64, step: f64) -> impl Iterator<Item = f64> {
    debug_assert!(step > 0.0);
    (0..)
        .map(move |k| min + k as f64 * step)
        .take_while(move |&f| f < max)
}

/// Runs a zero calibration per carrier frequency and records the offsets.
///
/// Records one `(frequency, a, b)` row per point, in ascending frequency
/// order, and returns the dataset number. A failed calibration aborts the
/// remaining points.
pub async fn scan_zero(
    source: &mut impl SignalSource,
    meter: &mut impl PowerMeter,
    player: &mut impl WaveformPlayer,
    recorder: &mut impl ResultRecorder,
    params: &ScanParams,
) -> Result<DatasetId> {
    if params.carrier_step_ghz <= 0.0 {
        anyhow::bail!(
            "carrier step must be positive, got {} GHz",
            params.carrier_step_ghz
        );
    }
    source.set_amplitude(params.source_dbm).await?;
    source.set_output(true).await?;
    tracing::info!(
        from = params.carrier_min_ghz,
        to = params.carrier_max_ghz,
        step = params.carrier_step_ghz,
        "zero calibration scan"
    );

    let dataset = recorder
        .create_dataset(
            ZERO_DATASET,
            &[Column::new("Frequency", "", "GHz")],
            &[
                Column::new("DAC zero", "A", "clics"),
                Column::new("DAC zero", "B", "clics"),
            ],
        )
        .await?;
    recorder
        .add_parameter(
            dataset,
            "source amplitude (dBm)",
            serde_json::json!(params.source_dbm),
        )
        .await?;

    for freq in frequency_steps(
        params.carrier_min_ghz,
        params.carrier_max_ghz,
        params.carrier_step_ghz,
    ) {
        let offsets = calibrate_zero(source, meter, player, freq).await?;
        recorder
            .append(dataset, &[freq, offsets.a as f64, offsets.b as f64])
            .await?;
    }
    Ok(dataset)
}

/// Runs sideband calibrations over carriers and sideband frequencies.
///
/// For each carrier in the scan range, calibrates the IQ compensation at
/// every frequency of the symmetric sideband set and records a single row:
/// the carrier frequency followed by an `(I, Q)` pair per sideband frequency.
/// Returns the dataset number.
pub async fn scan_sideband(
    source: &mut impl SignalSource,
    meter: &mut impl PowerMeter,
    player: &mut impl WaveformPlayer,
    recorder: &mut impl ResultRecorder,
    params: &ScanParams,
) -> Result<DatasetId> {
    if params.sideband_carrier_step_ghz <= 0.0 {
        anyhow::bail!(
            "carrier step must be positive, got {} GHz",
            params.sideband_carrier_step_ghz
        );
    }
    source.set_amplitude(params.source_dbm).await?;
    source.set_output(true).await?;
    tracing::info!(
        from = params.carrier_min_ghz,
        to = params.carrier_max_ghz,
        step = params.sideband_carrier_step_ghz,
        "sideband calibration scan"
    );

    let sideband_freqs = params.sideband_frequencies();
    let mut dependents = Vec::with_capacity(2 * sideband_freqs.len());
    for &sideband in &sideband_freqs {
        let legend = format!("at f_sb = {} MHz", sideband * 1e3);
        dependents.push(Column::new("compensation I", &legend, ""));
        dependents.push(Column::new("compensation Q", &legend, ""));
    }
    let dataset = recorder
        .create_dataset(
            SIDEBAND_DATASET,
            &[Column::new("Frequency", "", "GHz")],
            &dependents,
        )
        .await?;
    recorder
        .add_parameter(
            dataset,
            "source amplitude (dBm)",
            serde_json::json!(params.source_dbm),
        )
        .await?;
    recorder
        .add_parameter(
            dataset,
            "sideband frequency step (MHz)",
            serde_json::json!(params.sideband_step_ghz * 1e3),
        )
        .await?;
    recorder
        .add_parameter(
            dataset,
            "sideband frequency count",
            serde_json::json!(params.sideband_count),
        )
        .await?;

    for freq in frequency_steps(
        params.carrier_min_ghz,
        params.carrier_max_ghz,
        params.sideband_carrier_step_ghz,
    ) {
        let mut row = vec![freq];
        for &sideband in &sideband_freqs {
            let comp = calibrate_sideband(source, meter, player, freq, sideband).await?;
            row.push(comp.i);
            row.push(comp.q);
        }
        recorder.append(dataset, &row).await?;
    }
    Ok(dataset)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use crate::sim::{SimBench, SimModel};

    struct NullSource;

    impl SignalSource for NullSource {
        async fn set_frequency(&mut self, _ghz: f64) -> Result<()> {
            Ok(())
        }

        async fn set_amplitude(&mut self, _dbm: f64) -> Result<()> {
            Ok(())
        }

        async fn set_output(&mut self, _on: bool) -> Result<()> {
            Ok(())
        }
    }

    struct NullPlayer;

    impl WaveformPlayer for NullPlayer {
        async fn play(&mut self, _words: &[u32], _looped: bool) -> Result<()> {
            Ok(())
        }
    }

    /// Meter that returns a flat power for `readings_left` readings and then
    /// fails like a dropped instrument connection.
    struct FlakyMeter {
        readings_left: u32,
    }

    impl PowerMeter for FlakyMeter {
        async fn tune(&mut self, _ghz: f64) -> Result<()> {
            Ok(())
        }

        async fn measure_power(&mut self) -> Result<f64> {
            if self.readings_left == 0 {
                anyhow::bail!("instrument connection lost");
            }
            self.readings_left -= 1;
            Ok(1.0)
        }
    }

    #[test]
    fn half_open_frequency_range() {
        let freqs: Vec<f64> = frequency_steps(4.0, 4.3, 0.1).collect();
        assert_eq!(freqs.len(), 3);
        for (freq, expected) in freqs.iter().zip([4.0, 4.1, 4.2]) {
            assert!((freq - expected).abs() < 1e-9);
        }
        // step larger than the range yields the start point only
        assert_eq!(frequency_steps(4.0, 4.3, 1.0).count(), 1);
        // empty range
        assert_eq!(frequency_steps(4.3, 4.3, 0.1).count(), 0);
    }

    #[test]
    fn sideband_frequencies_centered() {
        let params = ScanParams {
            sideband_step_ghz: 0.05,
            sideband_count: 4,
            ..ScanParams::default()
        };
        let freqs = params.sideband_frequencies();
        let expected = [-0.075, -0.025, 0.025, 0.075];
        assert_eq!(freqs.len(), 4);
        for (freq, expected) in freqs.iter().zip(expected) {
            assert!((freq - expected).abs() < 1e-12);
        }
        let sum: f64 = freqs.iter().sum();
        assert!(sum.abs() < 1e-12);
    }

    #[tokio::test]
    async fn zero_scan_records_three_points() {
        let mut bench = SimBench::new(SimModel {
            zero_a: 37,
            zero_b: -12,
            ..SimModel::default()
        });
        let mut recorder = MemoryRecorder::new();
        let params = ScanParams {
            carrier_min_ghz: 4.0,
            carrier_max_ghz: 4.3,
            carrier_step_ghz: 0.1,
            ..ScanParams::default()
        };
        let dataset = scan_zero(
            &mut bench.source,
            &mut bench.meter,
            &mut bench.player,
            &mut recorder,
            &params,
        )
        .await
        .unwrap();
        let dataset = recorder.dataset(dataset).unwrap();
        assert_eq!(dataset.name, ZERO_DATASET);
        assert_eq!(dataset.rows.len(), 3);
        for (row, expected) in dataset.rows.iter().zip([4.0, 4.1, 4.2]) {
            assert!((row[0] - expected).abs() < 1e-9);
            assert!((row[1] - 37.0).abs() <= 1.0);
            assert!((row[2] + 12.0).abs() <= 1.0);
        }
    }

    #[tokio::test]
    async fn measurement_failure_aborts_scan() {
        // flat power converges in one round of 6 readings, so the meter
        // survives exactly the first carrier point and dies on the second
        let mut meter = FlakyMeter { readings_left: 6 };
        let mut recorder = MemoryRecorder::new();
        let params = ScanParams {
            carrier_min_ghz: 4.0,
            carrier_max_ghz: 4.3,
            carrier_step_ghz: 0.1,
            ..ScanParams::default()
        };
        let result = scan_zero(
            &mut NullSource,
            &mut meter,
            &mut NullPlayer,
            &mut recorder,
            &params,
        )
        .await;
        assert!(result.is_err());
        // only the point calibrated before the failure was recorded
        let dataset = recorder.dataset(1).unwrap();
        assert_eq!(dataset.rows.len(), 1);
        assert!((dataset.rows[0][0] - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sideband_measurement_failure_aborts_scan() {
        let mut meter = FlakyMeter { readings_left: 0 };
        let mut recorder = MemoryRecorder::new();
        let params = ScanParams {
            carrier_min_ghz: 4.0,
            carrier_max_ghz: 4.1,
            sideband_carrier_step_ghz: 0.1,
            ..ScanParams::default()
        };
        let result = scan_sideband(
            &mut NullSource,
            &mut meter,
            &mut NullPlayer,
            &mut recorder,
            &params,
        )
        .await;
        assert!(result.is_err());
        assert!(recorder.dataset(1).unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn non_positive_step_is_rejected() {
        let mut bench = SimBench::new(SimModel::default());
        let mut recorder = MemoryRecorder::new();
        for step in [0.0, -0.1] {
            let params = ScanParams {
                carrier_step_ghz: step,
                sideband_carrier_step_ghz: step,
                ..ScanParams::default()
            };
            let result = scan_zero(
                &mut bench.source,
                &mut bench.meter,
                &mut bench.player,
                &mut recorder,
                &params,
            )
            .await;
            assert!(result.is_err());
            let result = scan_sideband(
                &mut bench.source,
                &mut bench.meter,
                &mut bench.player,
                &mut recorder,
                &params,
            )
            .await;
            assert!(result.is_err());
        }
        // rejected before any dataset was created
        assert!(recorder.dataset(1).is_none());
        assert_eq!(bench.measurement_count(), 0);
    }

    #[tokio::test]
    async fn sideband_scan_row_layout() {
        let mut bench = SimBench::new(SimModel {
            imbalance_i: 0.02,
            imbalance_q: -0.01,
            ..SimModel::default()
        });
        let mut recorder = MemoryRecorder::new();
        let params = ScanParams {
            carrier_min_ghz: 4.0,
            carrier_max_ghz: 4.1,
            sideband_carrier_step_ghz: 0.1,
            sideband_step_ghz: 0.05,
            sideband_count: 2,
            ..ScanParams::default()
        };
        let dataset = scan_sideband(
            &mut bench.source,
            &mut bench.meter,
            &mut bench.player,
            &mut recorder,
            &params,
        )
        .await
        .unwrap();
        let dataset = recorder.dataset(dataset).unwrap();
        assert_eq!(dataset.name, SIDEBAND_DATASET);
        assert_eq!(dataset.dependents.len(), 4);
        assert_eq!(dataset.rows.len(), 1);
        // frequency + (i, q) per sideband frequency
        let row = &dataset.rows[0];
        assert_eq!(row.len(), 5);
        assert!((row[0] - 4.0).abs() < 1e-9);
        for pair in row[1..].chunks(2) {
            assert!((pair[0] + 0.02).abs() < 5e-3);
            assert!((pair[1] - 0.01).abs() < 5e-3);
        }
    }
}
