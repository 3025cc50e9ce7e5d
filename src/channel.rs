//! Per-voice state shared by every model
//!
//! Models embed a [`ChannelState`] next to their chip-specific fields. The
//! helpers here implement the command semantics that do not depend on the
//! chip (note on/off, portamento, macro-driven pitch and arpeggio).

use serde::Serialize;

use crate::command::{HANDLED, NOTE_NULL, PORTA_DONE};
use crate::freq::calc_freq;
use crate::instrument::Instrument;
use crate::macros::{MacroEngine, MacroMode};

/// Channel state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ChannelPhase {
    /// Silent
    #[default]
    Idle,
    /// Note sounding
    Active,
    /// Macros released, waiting for them to run out
    Releasing,
}

/// Per-voice modulation state
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Current note
    pub note: i32,
    /// Frequency (or period) of the note before pitch bend
    pub base_freq: i32,
    /// Last computed hardware frequency
    pub freq: i32,
    /// Pitch bend, 1/128 semitone
    pub pitch: i32,
    /// Pitch offset from the pitch macro
    pub pitch2: i32,
    /// Arpeggio offset in semitones
    pub arp_off: i32,
    /// `arp_off` came from a fixed (absolute) arpeggio
    pub fixed_arp: bool,
    /// Logical volume
    pub vol: i32,
    /// Volume after the volume macro
    pub out_vol: i32,
    /// Note is sounding
    pub active: bool,
    /// Key on pending for the next tick
    pub key_on: bool,
    /// Key off pending for the next tick
    pub key_off: bool,
    /// Frequency must be recomputed on the next tick
    pub freq_changed: bool,
    /// Portamento in progress
    pub in_porta: bool,
    /// Current instrument index (-1 for none)
    pub ins: i32,
    /// Instrument changed since the last note
    pub ins_changed: bool,
    /// State machine position
    pub phase: ChannelPhase,
    /// Macro cursor
    pub std: MacroEngine,
}

impl ChannelState {
    /// Fresh channel at the given volume
    pub fn new(vol: i32) -> Self {
        Self {
            note: 0,
            base_freq: 0,
            freq: 0,
            pitch: 0,
            pitch2: 0,
            arp_off: 0,
            fixed_arp: false,
            vol,
            out_vol: vol,
            active: false,
            key_on: false,
            key_off: false,
            freq_changed: false,
            in_porta: false,
            ins: -1,
            ins_changed: true,
            phase: ChannelPhase::Idle,
            std: MacroEngine::new(),
        }
    }

    /// Start a note
    ///
    /// `note_freq` maps a note to this model's base frequency; it is not
    /// called for [`NOTE_NULL`].
    pub fn note_on<F>(&mut self, note: i32, ins: Option<&Instrument>, note_freq: F)
    where
        F: FnOnce(i32) -> i32,
    {
        if note != NOTE_NULL {
            self.note = note;
            self.base_freq = note_freq(note);
            self.freq_changed = true;
        }
        self.active = true;
        self.key_on = true;
        self.key_off = false;
        self.phase = ChannelPhase::Active;
        self.arp_off = 0;
        self.fixed_arp = false;
        self.pitch2 = 0;
        self.std.init(ins);
        if !self.std.vol().has {
            self.out_vol = self.vol;
        }
    }

    /// Stop the note immediately
    pub fn note_off(&mut self) {
        self.active = false;
        self.key_off = true;
        self.key_on = false;
        self.phase = ChannelPhase::Idle;
        self.std.init(None);
    }

    /// Release macros; the channel keeps sounding until they run out
    pub fn env_release(&mut self) {
        self.std.release();
        if self.active {
            self.phase = ChannelPhase::Releasing;
        }
    }

    /// Finish a release once the volume macro has run out
    pub fn settle_phase(&mut self) {
        if self.phase == ChannelPhase::Releasing && !self.std.vol().has {
            self.phase = if self.out_vol > 0 && self.active {
                ChannelPhase::Active
            } else {
                ChannelPhase::Idle
            };
        }
    }

    /// Slide `base_freq` toward `dest` by `step`
    ///
    /// Returns [`PORTA_DONE`] on the call that reaches or crosses the
    /// target, [`HANDLED`] otherwise.
    pub fn porta_toward(&mut self, dest: i32, step: i32) -> i32 {
        let step = step.abs();
        let reached = if dest > self.base_freq {
            self.base_freq = self.base_freq.saturating_add(step);
            self.base_freq >= dest
        } else {
            self.base_freq = self.base_freq.saturating_sub(step);
            self.base_freq <= dest
        };
        self.freq_changed = true;
        if reached {
            self.base_freq = dest;
            self.in_porta = false;
            PORTA_DONE
        } else {
            HANDLED
        }
    }

    /// Apply a pitch macro value produced this tick
    pub fn apply_pitch_macro(&mut self) {
        let slot = self.std.pitch();
        if !slot.had {
            return;
        }
        self.pitch2 = match slot.mode {
            MacroMode::Relative => (self.pitch2 + slot.val).clamp(i16::MIN as i32, i16::MAX as i32),
            MacroMode::Absolute => slot.val,
        };
        self.freq_changed = true;
    }

    /// Apply an arpeggio macro value produced this tick
    ///
    /// Returns true if the arpeggio offset changed.
    pub fn apply_arp_macro(&mut self) -> bool {
        let slot = self.std.arp();
        if !slot.had || self.in_porta {
            return false;
        }
        self.arp_off = match slot.mode {
            MacroMode::Relative => slot.val,
            MacroMode::Absolute => slot.val - self.note,
        };
        self.fixed_arp = slot.mode == MacroMode::Absolute;
        self.freq_changed = true;
        true
    }

    /// Return to the played note once a fixed arpeggio has run out
    ///
    /// The last fixed note sounds for its own tick; the offset is dropped on
    /// the first tick the macro produces nothing. Returns true on that tick.
    pub fn end_fixed_arp(&mut self) -> bool {
        let slot = self.std.arp();
        if !self.fixed_arp || slot.had || slot.has {
            return false;
        }
        self.fixed_arp = false;
        self.arp_off = 0;
        self.freq_changed = true;
        true
    }

    /// Set the logical volume
    ///
    /// Returns true when the output volume followed (no volume macro).
    pub fn set_volume(&mut self, vol: i32) -> bool {
        self.vol = vol;
        if self.std.vol().has {
            false
        } else {
            self.out_vol = vol;
            true
        }
    }

    /// Base frequency with pitch bend and arpeggio applied
    pub fn bent_freq(&self, period_mode: bool) -> i32 {
        calc_freq(self.base_freq, self.pitch + self.pitch2, self.arp_off, period_mode)
    }

    /// UI snapshot
    pub fn status(&self, muted: bool) -> ChannelStatus {
        ChannelStatus {
            note: self.note,
            freq: self.freq,
            vol: self.vol,
            out_vol: self.out_vol,
            active: self.active,
            muted,
            phase: self.phase,
        }
    }
}

/// Channel snapshot for UI and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    /// Current note
    pub note: i32,
    /// Hardware frequency
    pub freq: i32,
    /// Logical volume
    pub vol: i32,
    /// Output volume
    pub out_vol: i32,
    /// Note sounding
    pub active: bool,
    /// Channel muted
    pub muted: bool,
    /// State machine position
    pub phase: ChannelPhase,
}
