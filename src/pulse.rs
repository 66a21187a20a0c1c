//! Pulse calibration.
//!
//! Non-iterative measurement of the time-domain response of the DAC (and
//! optionally the IQ chain) to a single-sample pulse, captured on the
//! sampling scope. The resulting impulse responses feed the deconvolution
//! correctors downstream; here they are only measured and recorded.

use crate::dac::{self, Channel};
use crate::instrument::{
    Oscilloscope, ScopeConfig, SignalSource, Trace, TriggerSlope, WaveformPlayer,
};
use crate::recorder::{Column, DatasetId, ResultRecorder};
use crate::scan::ScanParams;
use anyhow::Result;

/// Delay from the waveform trigger to the scope acquisition window, in ns.
const TRIGGER_DELAY_NS: i64 = 30;

/// Length in samples (1 ns each) of the repeating pulse waveform.
const LOOP_LENGTH: i64 = 256;

/// Pulse amplitude in DAC codes for the AC pulse measurement.
const PULSE_HEIGHT: i32 = 0x1800;

/// Name of the AC pulse response dataset.
pub const AC_PULSE_DATASET: &str = "iq pulse response";

/// Names of the per-channel DC pulse response datasets.
pub const DC_PULSE_DATASETS: [&str; 2] = ["dc pulse response a", "dc pulse response b"];

/// Measures the response to a single-sample DAC pulse.
///
/// Plays a repeating buffer of `baseline` words first (settling the scope
/// averaging on the pulse-free signal), then the same buffer with `pulse`
/// substituted at the index matching the requested DAC offset time, and
/// captures a trace. The pulse index is `(trigger delay - offset time)`
/// taken modulo the buffer length, so any requested offset wraps into the
/// buffer. The returned trace has the trigger delay subtracted from its
/// start time.
pub async fn measure_impulse_response(
    player: &mut impl WaveformPlayer,
    scope: &mut impl Oscilloscope,
    baseline: u32,
    pulse: u32,
    dac_offset_time_ns: i64,
) -> Result<Trace> {
    let pulse_index = (TRIGGER_DELAY_NS - dac_offset_time_ns).rem_euclid(LOOP_LENGTH) as usize;
    scope.set_start_time(TRIGGER_DELAY_NS as f64 * 1e-9).await?;

    let mut words = vec![baseline; LOOP_LENGTH as usize];
    words[0] |= dac::TRIGGER_MASK;
    player.play(&words, true).await?;

    words[pulse_index] = pulse
        | if pulse_index == 0 {
            dac::TRIGGER_MASK
        } else {
            0
        };
    player.play(&words, true).await?;

    let mut trace = scope.capture_trace().await?;
    trace.start_time -= TRIGGER_DELAY_NS as f64 * 1e-9;
    Ok(trace)
}

/// Measures the impulse response of both DACs through the IQ mixer.
///
/// The scope sees the up-converted pulse, so the source is tuned to the scan
/// carrier first. A pulse of [`PULSE_HEIGHT`] codes is applied on top of the
/// `(baseline_a, baseline_b)` working point, once per channel. Both traces
/// must share a time base; a changed scope setting between the two captures
/// is an error. Records one `(t_ns, volts_a, volts_b)` row per sample, with
/// the baseline-derived DC offset subtracted, and returns the dataset number.
pub async fn calibrate_ac_pulse(
    source: &mut impl SignalSource,
    player: &mut impl WaveformPlayer,
    scope: &mut impl Oscilloscope,
    recorder: &mut impl ResultRecorder,
    params: &ScanParams,
    baseline_a: i32,
    baseline_b: i32,
) -> Result<DatasetId> {
    source.set_frequency(params.carrier_ghz).await?;
    source.set_amplitude(params.source_dbm).await?;
    source.set_output(true).await?;

    scope
        .configure(&ScopeConfig {
            record_length: 5120,
            averages: 128,
            sensitivity: 10e-3,
            offset: 0.0,
            time_step: 2e-9,
            trigger_level: 0.18,
            trigger_slope: TriggerSlope::Positive,
        })
        .await?;

    let baseline = dac::pack(baseline_a, baseline_b, false);
    tracing::info!("measuring offset voltage");
    let offset = measure_impulse_response(
        player,
        scope,
        baseline,
        baseline,
        params.dac_offset_time_iq_ns,
    )
    .await?
    .mean();

    tracing::info!("measuring pulse response of DAC A");
    let trace_a = measure_impulse_response(
        player,
        scope,
        baseline,
        dac::pack(baseline_a + PULSE_HEIGHT, baseline_b, false),
        params.dac_offset_time_iq_ns,
    )
    .await?;

    tracing::info!("measuring pulse response of DAC B");
    let trace_b = measure_impulse_response(
        player,
        scope,
        baseline,
        dac::pack(baseline_a, baseline_b + PULSE_HEIGHT, false),
        params.dac_offset_time_iq_ns,
    )
    .await?;

    if !trace_a.same_time_base(&trace_b) {
        tracing::warn!(
            "time bases differ between DAC A and DAC B traces; \
             were scope settings changed during the measurement?"
        );
        anyhow::bail!("inconsistent trace time bases");
    }

    // park the output at the working point
    player.play(&[baseline; 4], false).await?;

    let dataset = recorder
        .create_dataset(
            AC_PULSE_DATASET,
            &[Column::new("Time", "", "ns")],
            &[
                Column::new("Voltage", "A", "V"),
                Column::new("Voltage", "B", "V"),
            ],
        )
        .await?;
    recorder
        .add_parameter(
            dataset,
            "carrier frequency (GHz)",
            serde_json::json!(params.carrier_ghz),
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
            "DAC offset time (ns)",
            serde_json::json!(params.dac_offset_time_iq_ns),
        )
        .await?;
    for (k, (&va, &vb)) in trace_a.volts.iter().zip(trace_b.volts.iter()).enumerate() {
        let t_ns = 1e9 * (trace_a.start_time + trace_a.time_step * k as f64);
        recorder
            .append(dataset, &[t_ns, va - offset, vb - offset])
            .await?;
    }
    Ok(dataset)
}

/// Measures the direct (no mixer) impulse response of one DAC channel.
///
/// The pulsed channel steps from the bottom of the DAC range to the top while
/// the other channel stays neutral. Records one `(t_ns, volts)` row per
/// sample with the baseline-derived offset subtracted, and returns the
/// dataset number.
pub async fn calibrate_dc_pulse(
    player: &mut impl WaveformPlayer,
    scope: &mut impl Oscilloscope,
    recorder: &mut impl ResultRecorder,
    params: &ScanParams,
    channel: Channel,
) -> Result<DatasetId> {
    let (pulse, baseline) = match channel {
        Channel::A => (
            dac::pack(dac::DAC_MAX, 0, false),
            dac::pack(dac::DAC_MIN, 0, false),
        ),
        Channel::B => (
            dac::pack(0, dac::DAC_MAX, false),
            dac::pack(0, dac::DAC_MIN, false),
        ),
    };

    scope
        .configure(&ScopeConfig {
            record_length: 5120,
            averages: 128,
            sensitivity: 100e-3,
            offset: 0.0,
            time_step: 2e-9,
            trigger_level: 0.18,
            trigger_slope: TriggerSlope::Positive,
        })
        .await?;

    tracing::info!(?channel, "measuring offset voltage");
    let offset = measure_impulse_response(
        player,
        scope,
        baseline,
        baseline,
        params.dac_offset_time_no_iq_ns,
    )
    .await?
    .mean();

    tracing::info!(?channel, "measuring pulse response");
    let trace = measure_impulse_response(
        player,
        scope,
        baseline,
        pulse,
        params.dac_offset_time_no_iq_ns,
    )
    .await?;

    // park the output at the neutral code
    player.play(&[dac::pack(0, 0, false); 4], false).await?;

    let name = DC_PULSE_DATASETS[match channel {
        Channel::A => 0,
        Channel::B => 1,
    }];
    let dataset = recorder
        .create_dataset(
            name,
            &[Column::new("Time", "", "ns")],
            &[Column::new("Voltage", "", "V")],
        )
        .await?;
    recorder
        .add_parameter(
            dataset,
            "DAC offset time (ns)",
            serde_json::json!(params.dac_offset_time_no_iq_ns),
        )
        .await?;
    for (k, &v) in trace.volts.iter().enumerate() {
        let t_ns = 1e9 * (trace.start_time + trace.time_step * k as f64);
        recorder.append(dataset, &[t_ns, v - offset]).await?;
    }
    Ok(dataset)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::recorder::MemoryRecorder;
    use crate::sim::{SimBench, SimModel};

    #[test]
    fn pulse_index_wraps() {
        // offset times on both sides of the trigger delay, including ones
        // larger than the loop length
        for &(offset, expected) in &[(6, 24), (30, 0), (31, 255), (300, 242), (-10, 40)] {
            let index = (TRIGGER_DELAY_NS - offset).rem_euclid(LOOP_LENGTH);
            assert_eq!(index, expected, "offset {offset}");
        }
    }

    #[tokio::test]
    async fn impulse_response_places_pulse() {
        let mut bench = SimBench::new(SimModel::default());
        bench
            .scope
            .configure(&ScopeConfig {
                record_length: 512,
                averages: 1,
                sensitivity: 100e-3,
                offset: 0.0,
                time_step: 1e-9,
                trigger_level: 0.18,
                trigger_slope: TriggerSlope::Positive,
            })
            .await
            .unwrap();
        let baseline = dac::pack(0, 0, false);
        let pulse = dac::pack(0x1000, 0, false);
        let trace = measure_impulse_response(
            &mut bench.player,
            &mut bench.scope,
            baseline,
            pulse,
            6,
        )
        .await
        .unwrap();
        assert_eq!(trace.volts.len(), 512);
        // trigger delay subtracted from the start time
        assert!((trace.start_time - 0.0).abs() < 1e-12);
        // the pulse sits at waveform index 24, visible each loop period
        let peak = trace
            .volts
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        let t_ns = (TRIGGER_DELAY_NS as f64 + 1e9 * (trace.start_time + peak.0 as f64 * 1e-9))
            .round() as i64;
        assert_eq!(t_ns.rem_euclid(LOOP_LENGTH), 24);
    }

    #[tokio::test]
    async fn dc_pulse_records_dataset() {
        let mut bench = SimBench::new(SimModel::default());
        let mut recorder = MemoryRecorder::new();
        let params = ScanParams::default();
        let dataset = calibrate_dc_pulse(
            &mut bench.player,
            &mut bench.scope,
            &mut recorder,
            &params,
            Channel::A,
        )
        .await
        .unwrap();
        let dataset = recorder.dataset(dataset).unwrap();
        assert_eq!(dataset.name, DC_PULSE_DATASETS[0]);
        assert_eq!(dataset.rows.len(), 5120);
        assert_eq!(dataset.rows[0].len(), 2);
        // the trace is offset-subtracted, so the baseline sits near zero and
        // the pulse stands out
        let max = dataset
            .rows
            .iter()
            .map(|r| r[1])
            .fold(f64::MIN, f64::max);
        assert!(max > 0.0);
    }

    #[tokio::test]
    async fn ac_pulse_records_dataset() {
        let mut bench = SimBench::new(SimModel::default());
        let mut recorder = MemoryRecorder::new();
        let params = ScanParams::default();
        let dataset = calibrate_ac_pulse(
            &mut bench.source,
            &mut bench.player,
            &mut bench.scope,
            &mut recorder,
            &params,
            0,
            0,
        )
        .await
        .unwrap();
        let dataset = recorder.dataset(dataset).unwrap();
        assert_eq!(dataset.name, AC_PULSE_DATASET);
        assert_eq!(dataset.rows.len(), 5120);
        assert_eq!(dataset.rows[0].len(), 3);
    }
}
