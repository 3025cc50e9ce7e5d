//! SAA1099 model
//!
//! Six tone channels in two trios; each trio shares one noise generator and
//! one envelope generator (which only shapes the trio's third channel).
//! Tone and noise enables live in two shared registers, so they are rebuilt
//! from every channel on each tick.
//!
//! # Register map
//! - `0x00..=0x05`: amplitude, left low nibble, right high nibble
//! - `0x08..=0x0d`: tone value
//! - `0x10..=0x12`: octave, two channels per register
//! - `0x14`: tone enable, `0x15`: noise enable
//! - `0x16`: noise control, `0x18`/`0x19`: envelope control
//! - `0x1c`: sound enable / sync

pub mod chip;

use std::sync::Arc;

pub use chip::SaaCore;

use crate::channel::{ChannelState, ChannelStatus};
use crate::chips::ChipModel;
use crate::command::{Command, CommandKind, HANDLED};
use crate::config::ChipConfig;
use crate::dispatch::{apply_next_write, ChipBase, ChipCore, ChipDispatch};
use crate::freq::{clamp_freq, period_for_note};
use crate::instrument::SongResources;
use crate::macros::MacroKind;

/// Clock presets: 8 MHz, NTSC * 2, PAL * 8 / 5
pub const CLOCKS: &[u32] = &[8_000_000, 7_159_090, 7_093_788];

const CHANNELS: usize = 6;
const REGISTERS: usize = 32;
const TONE_DIVIDER: f64 = 4.0;
const MIN_PERIOD: i32 = 256;
const MAX_PERIOD: i32 = 65535;
const VOL_MAX: i32 = 15;
const CENTRE_PAN: u8 = 0xff;

const MODE_TONE: u8 = 1;
const MODE_NOISE: u8 = 2;

/// Split a period (clock / 4 units) into octave and tone value
///
/// The chip counts `511 - tone` steps of `2^octave`, so the period is
/// `(511 - tone) << (7 - octave)`.
pub fn split_period(period: i32) -> (u8, u8) {
    let period = period.clamp(MIN_PERIOD, MAX_PERIOD) as u32;
    let shift = (31 - period.leading_zeros()) - 8;
    let tone = 511 - (period >> shift);
    ((7 - shift) as u8, tone as u8)
}

/// Scale a 4-bit volume into a left/right amplitude byte
///
/// `pan` holds the left level in the high nibble and the right level in
/// the low nibble; the result puts left in the low nibble.
#[inline]
fn apply_pan(vol: u8, pan: u8) -> u8 {
    let vol = vol as u32 & 15;
    let left = vol * (pan >> 4) as u32 / 15;
    let right = vol * (pan & 15) as u32 / 15;
    (left | (right << 4)) as u8
}

#[derive(Debug, Clone)]
struct SaaChannel {
    state: ChannelState,
    psg_mode: u8,
    pan: u8,
    octave: u8,
}

impl SaaChannel {
    fn new() -> Self {
        Self {
            state: ChannelState::new(VOL_MAX),
            psg_mode: MODE_TONE,
            pan: CENTRE_PAN,
            octave: 0,
        }
    }

    fn amplitude_reg(&self, muted: bool) -> u8 {
        if muted || !self.state.active {
            0
        } else {
            apply_pan((self.state.out_vol & 15) as u8, self.pan)
        }
    }
}

/// SAA1099 chip instance
#[derive(Debug)]
pub struct Saa1099 {
    base: ChipBase,
    core: SaaCore,
    chan: [SaaChannel; CHANNELS],
    noise: [u8; 2],
    envelope: [u8; 2],
}

impl Saa1099 {
    /// New instance at power-on state
    pub fn new(config: &ChipConfig, resources: Arc<SongResources>) -> Self {
        let clock = config.clock();
        let mut chip = Self {
            base: ChipBase::new(config, resources, CHANNELS, REGISTERS, clock, clock / 256),
            core: SaaCore::new(),
            chan: std::array::from_fn(|_| SaaChannel::new()),
            noise: [0; 2],
            envelope: [0; 2],
        };
        chip.reset();
        chip
    }

    fn note_period(&self, note: i32) -> i32 {
        period_for_note(self.base.clock as f64, TONE_DIVIDER, note)
    }

    fn stage_shared(&mut self) {
        let port = &mut self.base.port;
        for pair in 0..CHANNELS / 2 {
            let lo = self.chan[pair * 2].octave & 7;
            let hi = self.chan[pair * 2 + 1].octave & 7;
            port.stage(0x10 + pair, lo | (hi << 4));
        }
        let mut tone = 0u8;
        let mut noise = 0u8;
        for (i, ch) in self.chan.iter().enumerate() {
            tone |= ((ch.psg_mode & MODE_TONE != 0) as u8) << i;
            noise |= ((ch.psg_mode & MODE_NOISE != 0) as u8) << i;
        }
        port.stage(0x14, tone);
        port.stage(0x15, noise);
        port.stage(0x16, self.noise[0] | (self.noise[1] << 4));
        port.stage(0x18, self.envelope[0]);
        port.stage(0x19, self.envelope[1]);
    }
}

impl ChipDispatch for Saa1099 {
    fn base(&self) -> &ChipBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChipBase {
        &mut self.base
    }

    fn model(&self) -> ChipModel {
        ChipModel::Saa1099
    }

    fn tick(&mut self, _sys_tick: bool) {
        for i in 0..CHANNELS {
            let muted = self.base.is_muted(i);
            let port = &mut self.base.port;
            let ch = &mut self.chan[i];
            ch.state.std.next();

            let vol = ch.state.std.vol();
            if vol.had {
                ch.state.out_vol = (vol.val.min(VOL_MAX) - (VOL_MAX - (ch.state.vol & 15))).max(0);
            }
            if !ch.state.apply_arp_macro() {
                ch.state.end_fixed_arp();
            }
            let duty = ch.state.std.duty();
            if duty.had {
                self.noise[i / 3] = (duty.val & 3) as u8;
            }
            let wave = ch.state.std.wave();
            if wave.had {
                ch.psg_mode = (wave.val & 3) as u8;
            }
            ch.state.apply_pitch_macro();
            let ex1 = ch.state.std.ex1();
            if ex1.had {
                self.envelope[i / 3] = (ex1.val & 0xff) as u8;
            }
            ch.state.settle_phase();

            if ch.state.freq_changed || ch.state.key_on || ch.state.key_off {
                let period = clamp_freq(ch.state.bent_freq(true), MIN_PERIOD, MAX_PERIOD);
                let (octave, tone) = split_period(period);
                ch.state.freq = period;
                ch.octave = octave;
                port.stage(0x08 + i, tone);
                ch.state.key_on = false;
                ch.state.key_off = false;
                ch.state.freq_changed = false;
            }
            port.stage(i, ch.amplitude_reg(muted));
        }
        self.stage_shared();
        self.base.port.commit();
    }

    fn dispatch(&mut self, cmd: Command) -> i32 {
        let c = cmd.channel;
        if c >= CHANNELS {
            return HANDLED;
        }
        match cmd.kind {
            CommandKind::NoteOn => {
                let resources = Arc::clone(&self.base.resources);
                let clock = self.base.clock as f64;
                let state = &mut self.chan[c].state;
                state.note_on(cmd.value, resources.instrument(state.ins), |n| {
                    period_for_note(clock, TONE_DIVIDER, n)
                });
            }
            CommandKind::NoteOff => self.chan[c].state.note_off(),
            CommandKind::NoteOffEnv | CommandKind::EnvRelease => self.chan[c].state.env_release(),
            CommandKind::Instrument => {
                let state = &mut self.chan[c].state;
                if state.ins != cmd.value || cmd.value2 == 1 {
                    state.ins_changed = true;
                }
                state.ins = cmd.value;
            }
            CommandKind::Volume => {
                self.chan[c].state.set_volume(cmd.value.clamp(0, VOL_MAX));
            }
            CommandKind::GetVolume => return self.chan[c].state.vol,
            CommandKind::GetVolMax => return VOL_MAX,
            CommandKind::Pitch => {
                self.chan[c].state.pitch = cmd.value;
                self.chan[c].state.freq_changed = true;
            }
            CommandKind::NotePorta => {
                let dest = self.note_period(cmd.value2);
                let step = cmd.value * (8 - self.chan[c].octave as i32);
                return self.chan[c].state.porta_toward(dest, step);
            }
            CommandKind::Legato => {
                let period = self.note_period(cmd.value);
                let state = &mut self.chan[c].state;
                state.note = cmd.value;
                state.base_freq = period;
                state.freq_changed = true;
            }
            CommandKind::PrePorta => {
                let resources = Arc::clone(&self.base.resources);
                let state = &mut self.chan[c].state;
                state.std.init(resources.instrument(state.ins));
                state.in_porta = cmd.value != 0;
            }
            CommandKind::Panning => {
                let left = (cmd.value.clamp(0, 255) as u8) & 0xf0;
                let right = (cmd.value2.clamp(0, 255) as u8) >> 4;
                self.chan[c].pan = left | right;
            }
            CommandKind::StdNoiseMode => {
                self.chan[c].psg_mode = ((cmd.value & 1) | ((cmd.value & 16) >> 3)) as u8;
            }
            CommandKind::StdNoiseFreq => {
                self.noise[c / 3] = ((cmd.value & 1) | ((cmd.value & 16) >> 3)) as u8;
            }
            CommandKind::SaaEnvelope => {
                let value = (cmd.value & 0xff) as u8;
                self.envelope[c / 3] = value;
                // envelope writes restart the generator even when unchanged
                self.base.port.write(0x18 + c / 3, value);
            }
            CommandKind::MacroOff | CommandKind::MacroOn => {
                if let Some(kind) = MacroKind::from_index(cmd.value.max(0) as usize) {
                    self.chan[c].state.std.mask(kind, cmd.kind == CommandKind::MacroOff);
                }
            }
            CommandKind::AlwaysSetVolume => return 0,
            _ => {}
        }
        HANDLED
    }

    fn acquire(&mut self, out: &mut [i16], frames: usize) {
        for frame in out.chunks_exact_mut(2).take(frames) {
            apply_next_write(&mut self.base.port, &mut self.core);
            let (left, right) = self.core.clock();
            frame[0] = left.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            frame[1] = right.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            for (i, osc) in self.base.osc.iter_mut().enumerate() {
                osc.push_clamped(self.core.channel_output(i));
            }
        }
    }

    fn reset(&mut self) {
        self.base.reset();
        self.core.reset();
        for ch in &mut self.chan {
            *ch = SaaChannel::new();
        }
        self.noise = [0; 2];
        self.envelope = [0; 2];
        self.base.port.write(0x1c, 1);
        log::debug!("SAA1099 reset ({} Hz)", self.base.clock);
    }

    fn channel_status(&self, ch: usize) -> Option<ChannelStatus> {
        self.chan
            .get(ch)
            .map(|c| c.state.status(self.base.is_muted(ch)))
    }

    fn force_ins(&mut self) {
        for ch in &mut self.chan {
            ch.state.ins_changed = true;
            ch.state.freq_changed = true;
        }
        self.base.port.invalidate();
        self.base.port.write(0x18, self.envelope[0]);
        self.base.port.write(0x19, self.envelope[1]);
        self.base.port.write(0x16, self.noise[0] | (self.noise[1] << 4));
    }

    fn set_resources(&mut self, resources: Arc<SongResources>) {
        self.base.resources = resources;
    }

    fn output_channels(&self) -> usize {
        2
    }

    fn key_off_affects_arp(&self, _ch: usize) -> bool {
        true
    }
}
