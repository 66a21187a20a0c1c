//! DAC sample words.
//!
//! This module packs pairs of signed 14-bit DAC codes into the 32-bit sample
//! words consumed by the board's waveform memory, and defines the range and
//! trigger constants shared by the calibration procedures.

/// Largest representable DAC code.
pub const DAC_MAX: i32 = 0x1FFF;

/// Smallest representable DAC code.
pub const DAC_MIN: i32 = -0x2000;

/// Width in bits of one DAC channel field inside a sample word.
pub const CHANNEL_BITS: u32 = 14;

/// Trigger bit mask.
///
/// Bits 28..=31 raise the four trigger outputs S0..S3 for the duration of the
/// sample. The calibration stimuli set all four on the first word of each
/// waveform so any of them can clock the scope.
pub const TRIGGER_MASK: u32 = 0xF << 28;

const CHANNEL_MASK: u32 = (1 << CHANNEL_BITS) - 1;

/// DAC output channel.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Channel {
    /// Channel A (I port of the mixer).
    A,
    /// Channel B (Q port of the mixer).
    B,
}

/// Returns whether a DAC code is within the signed 14-bit range.
pub fn in_range(value: i32) -> bool {
    (DAC_MIN..=DAC_MAX).contains(&value)
}

/// Packs two DAC codes and an optional trigger flag into a sample word.
///
/// Out-of-range codes are not rejected: they are masked to 14 bits exactly as
/// the hardware would wrap them, and a warning is logged. The adaptive
/// searches probe points beyond the DAC range on purpose, so an over-range
/// excursion must not abort a calibration run.
pub fn pack(a: i32, b: i32, trigger: bool) -> u32 {
    if !in_range(a) || !in_range(b) {
        tracing::warn!(a, b, "DAC overflow, sample wraps to 14 bits");
    }
    let mut word = (a as u32 & CHANNEL_MASK) | ((b as u32 & CHANNEL_MASK) << CHANNEL_BITS);
    if trigger {
        word |= TRIGGER_MASK;
    }
    word
}

/// Recovers the two signed DAC codes from a sample word.
///
/// Trigger bits are ignored. Inverse of [`pack`] for in-range codes.
pub fn unpack(word: u32) -> (i32, i32) {
    (
        sign_extend(word & CHANNEL_MASK),
        sign_extend((word >> CHANNEL_BITS) & CHANNEL_MASK),
    )
}

fn sign_extend(field: u32) -> i32 {
    let shift = 32 - CHANNEL_BITS;
    ((field << shift) as i32) >> shift
}
