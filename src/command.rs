//! Tracker commands consumed by [`ChipDispatch::dispatch`](crate::ChipDispatch::dispatch)

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Note value meaning "keep the current pitch" (tie / legato re-trigger)
pub const NOTE_NULL: i32 = i32::MAX;

/// Return code: command handled
pub const HANDLED: i32 = 1;

/// Return code of [`CommandKind::NotePorta`]: target reached, caller advances
pub const PORTA_DONE: i32 = 2;

/// Command kinds understood by the chip models
///
/// Models ignore kinds they do not support and answer [`HANDLED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandKind {
    /// Key on; `value` is the note or [`NOTE_NULL`]
    NoteOn = 0,
    /// Key off, immediate silence
    NoteOff,
    /// Key off with envelope release
    NoteOffEnv,
    /// Release macros without keying off
    EnvRelease,
    /// Select instrument `value`
    Instrument,
    /// Set channel volume
    Volume,
    /// Query channel volume
    GetVolume,
    /// Query the model's maximum volume
    GetVolMax,
    /// Pitch bend in 1/128 semitone units
    Pitch,
    /// Slide by `value` per call toward note `value2`
    NotePorta,
    /// Change note without re-triggering
    Legato,
    /// Portamento about to start (`value` != 0) or stop
    PrePorta,
    /// Note about to be triggered
    PreNote,
    /// Panning; `value` left, `value2` right (0..255)
    Panning,
    /// Jump the sample cursor to `value`
    SamplePos,
    /// Select waveform
    Wave,
    /// Noise/tone mode
    StdNoiseMode,
    /// Noise frequency
    StdNoiseFreq,
    /// Mask macro `value`
    MacroOff,
    /// Unmask macro `value`
    MacroOn,
    /// Whether the sequencer must resend volume on every note
    AlwaysSetVolume,
    /// AY envelope shape (`value >> 4`) and enable toggle (`value & 15`)
    AyEnvelopeSet,
    /// AY envelope period low byte
    AyEnvelopeLow,
    /// AY envelope period high byte
    AyEnvelopeHigh,
    /// AY envelope period slide per tick
    AyEnvelopeSlide,
    /// AY auto-envelope ratio: numerator `value >> 4`, denominator `value & 15`
    AyAutoEnvelope,
    /// AY IO port write; `value` is the port, `value2` the data
    AyIoWrite,
    /// AY timer effect mode (0 off, 1 PWM, 2 sync buzzer)
    AyTimerFx,
    /// AY timer effect ratio, same encoding as the auto-envelope
    AyTimerFxRatio,
    /// AY timer effect period offset
    AyTimerFxOffset,
    /// SAA1099 envelope control
    SaaEnvelope,
    /// Filter cutoff
    FilterCutoff,
    /// Filter resonance
    FilterResonance,
    /// Filter mode
    FilterMode,
    /// Sound Unit sweep period low byte; `value2` selects the sweep
    SuSweepPeriodLow,
    /// Sound Unit sweep period high byte; `value2` selects the sweep
    SuSweepPeriodHigh,
    /// Sound Unit sweep bound; `value2` selects the sweep
    SuSweepBound,
    /// Sound Unit sweep enable; `value2` selects the sweep
    SuSweepEnable,
    /// Sound Unit sync timer low byte
    SuSyncPeriodLow,
    /// Sound Unit sync timer high byte
    SuSyncPeriodHigh,
}

impl CommandKind {
    /// Convert a raw command code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_u8(code)
    }

    /// Raw command code
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One tracker event addressed to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Target channel
    pub channel: usize,
    /// What to do
    pub kind: CommandKind,
    /// Primary argument
    #[serde(default)]
    pub value: i32,
    /// Secondary argument
    #[serde(default)]
    pub value2: i32,
}

impl Command {
    /// Command with one argument
    pub const fn new(channel: usize, kind: CommandKind, value: i32) -> Self {
        Self {
            channel,
            kind,
            value,
            value2: 0,
        }
    }

    /// Command with two arguments
    pub const fn with_value2(channel: usize, kind: CommandKind, value: i32, value2: i32) -> Self {
        Self {
            channel,
            kind,
            value,
            value2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        assert_eq!(CommandKind::from_code(0), Some(CommandKind::NoteOn));
        let code = CommandKind::AyIoWrite.code();
        assert_eq!(CommandKind::from_code(code), Some(CommandKind::AyIoWrite));
        assert_eq!(CommandKind::from_code(200), None);
    }

    #[test]
    fn test_command_json() {
        let json = r#"{"channel":1,"kind":"NotePorta","value":4,"value2":60}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, Command::with_value2(1, CommandKind::NotePorta, 4, 60));
    }
}
