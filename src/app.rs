//! iqcal application.
//!
//! This module contains a top-level structure [`App`] that wires the
//! simulated bench, the results recorder and the scan parameters together
//! and dispatches the requested calibration procedure.

use crate::{
    args::{Args, Command},
    pulse,
    recorder::DirRecorder,
    scan::{self, ScanParams},
    sim::{SimBench, SimModel},
};
use anyhow::{Context, Result};

/// iqcal application.
///
/// Owns the instrument bench, the recorder and the session parameters for
/// one invocation. There is one logical session per bench: the calibration
/// loops issue strictly ordered instrument commands, so nothing here runs
/// concurrently.
#[derive(Debug)]
pub struct App {
    command: Command,
    params: ScanParams,
    bench: SimBench,
    recorder: DirRecorder,
}

impl App {
    /// Creates a new application.
    pub async fn new(args: &Args) -> Result<App> {
        let params = match &args.params {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read scan parameters {path:?}"))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse scan parameters {path:?}"))?
            }
            None => ScanParams::default(),
        };
        let bench = SimBench::new(SimModel {
            // an imperfect board, so the searches have something to find
            zero_a: 37,
            zero_b: -12,
            imbalance_i: 0.021,
            imbalance_q: -0.013,
            noise_floor_mw: 1e-7,
            noise_amplitude: args.noise,
            seed: args.seed,
            ..SimModel::default()
        });
        let recorder = DirRecorder::new(args.data_dir.join(&args.board)).await?;
        Ok(App {
            command: args.command.clone(),
            params,
            bench,
            recorder,
        })
    }

    /// Runs the requested calibration procedure.
    pub async fn run(mut self) -> Result<()> {
        let dataset = match self.command {
            Command::ZeroScan => {
                scan::scan_zero(
                    &mut self.bench.source,
                    &mut self.bench.meter,
                    &mut self.bench.player,
                    &mut self.recorder,
                    &self.params,
                )
                .await?
            }
            Command::SidebandScan => {
                scan::scan_sideband(
                    &mut self.bench.source,
                    &mut self.bench.meter,
                    &mut self.bench.player,
                    &mut self.recorder,
                    &self.params,
                )
                .await?
            }
            Command::AcPulse => {
                pulse::calibrate_ac_pulse(
                    &mut self.bench.source,
                    &mut self.bench.player,
                    &mut self.bench.scope,
                    &mut self.recorder,
                    &self.params,
                    0,
                    0,
                )
                .await?
            }
            Command::DcPulse { channel } => {
                pulse::calibrate_dc_pulse(
                    &mut self.bench.player,
                    &mut self.bench.scope,
                    &mut self.recorder,
                    &self.params,
                    channel.into(),
                )
                .await?
            }
        };
        tracing::info!(
            dataset,
            measurements = self.bench.measurement_count(),
            "calibration finished"
        );
        Ok(())
    }
}
