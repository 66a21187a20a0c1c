//! iqcal CLI arguments.
//!
//! This module contains the definition of the CLI arguments for the iqcal
//! application.

use crate::dac::Channel;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// iqcal CLI arguments.
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Directory where calibration datasets are written
    #[clap(long, default_value = "calibration-data")]
    pub data_dir: PathBuf,

    /// Board name (session subdirectory)
    #[clap(long, default_value = "sim-board")]
    pub board: String,

    /// Scan parameters JSON file (defaults used when absent)
    #[clap(long)]
    pub params: Option<PathBuf>,

    /// Relative amplitude of simulated measurement noise
    #[clap(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Seed of the simulated noise generator
    #[clap(long, default_value_t = 0)]
    pub seed: u64,

    /// Calibration procedure to run
    #[clap(subcommand)]
    pub command: Command,
}

/// Calibration procedures.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Calibrate the DAC zeros across the carrier range
    ZeroScan,
    /// Calibrate the IQ sideband compensation across the carrier range
    SidebandScan,
    /// Measure the pulse response of both DACs through the IQ mixer
    AcPulse,
    /// Measure the direct pulse response of one DAC channel
    DcPulse {
        /// Channel to pulse
        #[clap(long, value_enum)]
        channel: ChannelArg,
    },
}

/// CLI selector for a DAC channel.
#[derive(ValueEnum, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChannelArg {
    /// Channel A.
    A,
    /// Channel B.
    B,
}

impl From<ChannelArg> for Channel {
    fn from(value: ChannelArg) -> Channel {
        match value {
            ChannelArg::A => Channel::A,
            ChannelArg::B => Channel::B,
        }
    }
}
