//! Sound Unit model
//!
//! Eight synth voices with per-voice filter, sweeps, sync timer and PCM
//! playback from a small shared memory. Every register except the phase
//! reset flag is staged; a phase reset is written immediately with bit 0 of
//! the upper flags set, and the next commit puts the plain flags back.
//!
//! With `switch_roles` the note drives the sync timer (in periods) and the
//! sync timer macro drives the oscillator frequency.

pub mod chip;

use std::sync::Arc;

pub use chip::SuCore;

use crate::channel::{ChannelState, ChannelStatus};
use crate::chips::ChipModel;
use crate::command::{Command, CommandKind, HANDLED, NOTE_NULL};
use crate::config::ChipConfig;
use crate::dispatch::{apply_next_write, ChipBase, ChipCore, ChipDispatch, SampleMemory};
use crate::freq::{clamp_freq, freq_for_note, linear_pan, period_for_note};
use crate::instrument::{Instrument, InstrumentKind, SongResources, DEFAULT_CENTER_RATE};
use crate::macros::MacroKind;

/// Clock presets: 1.236 MHz, 1.19 MHz
pub const CLOCKS: &[u32] = &[1_236_000, 1_190_000];

const CHANNELS: usize = 8;
const REGISTERS: usize = 256;
const VOL_MAX: i32 = 127;
/// One waveform cycle is 2^22 phase units at clock / 4
const FREQ_BASE: f64 = 16_777_216.0;
const TIMER_DIVIDER: f64 = 4.0;
const DEFAULT_DUTY: u8 = 0x3f;

const SWEEP_FREQ: usize = 0;
const SWEEP_VOL: usize = 1;
const SWEEP_CUT: usize = 2;

/// Render samples into Sound Unit memory as signed 8-bit data
///
/// A zero byte follows every sample so a finished one-shot sample rests on
/// silence. The sample that runs past the end of memory keeps the part that
/// fits.
pub fn render_samples(resources: &SongResources, memory: &mut SampleMemory) {
    memory.clear(0);
    for (i, sample) in resources.samples.iter().enumerate() {
        let bytes: Vec<u8> = sample.to_pcm8().iter().map(|&s| s as u8).collect();
        if bytes.is_empty() {
            continue;
        }
        if memory.place_truncated(i, &bytes, 1).is_none() {
            break;
        }
        memory.reserve_tail(1);
    }
    log::debug!("Sound Unit sample memory: {} of {} bytes", memory.used(), memory.capacity());
}

#[derive(Debug, Clone, Copy, Default)]
struct Sweep {
    period: u16,
    amount: u8,
    bound: u8,
}

#[derive(Debug, Clone)]
struct SuChannel {
    state: ChannelState,
    pan: i8,
    duty: u8,
    wave: u8,
    pcm: bool,
    control: u8,
    cutoff: u16,
    base_cutoff: u16,
    resonance: u8,
    sync_timer: u16,
    switch_roles: bool,
    pcm_loop: bool,
    sweeps: [Sweep; 3],
    sample: Option<usize>,
    macro_vol_mul: i32,
    aud_pos: usize,
    set_pos: bool,
}

impl SuChannel {
    fn new() -> Self {
        Self {
            state: ChannelState::new(VOL_MAX),
            pan: 0,
            duty: DEFAULT_DUTY,
            wave: 0,
            pcm: false,
            control: 0,
            cutoff: u16::MAX,
            base_cutoff: u16::MAX,
            resonance: 0,
            sync_timer: 0,
            switch_roles: false,
            pcm_loop: false,
            sweeps: [Sweep::default(); 3],
            sample: None,
            macro_vol_mul: VOL_MAX,
            aud_pos: 0,
            set_pos: false,
        }
    }

    fn control_reg(&self) -> u8 {
        (self.wave & 7) | ((self.pcm as u8) << 3) | ((self.control & 15) << 4)
    }

    fn upper_flags(&self, muted: bool) -> u8 {
        let mut flags = ((self.pcm_loop as u8) << 2) | (((self.sync_timer > 0) as u8) << 3);
        for (bit, sweep) in [(4, SWEEP_FREQ), (5, SWEEP_VOL), (6, SWEEP_CUT)] {
            if self.sweeps[sweep].amount > 0 && !(muted && sweep == SWEEP_VOL) {
                flags |= 1 << bit;
            }
        }
        flags
    }

    fn level(&self, muted: bool) -> u8 {
        if muted || !self.state.active || (self.pcm && self.sample.is_none()) {
            0
        } else {
            (self.state.out_vol & 127) as u8
        }
    }
}

/// Sound Unit chip instance
#[derive(Debug)]
pub struct SoundUnit {
    base: ChipBase,
    core: SuCore,
    chan: [SuChannel; CHANNELS],
}

impl SoundUnit {
    /// New instance at power-on state, with the song's samples rendered
    pub fn new(config: &ChipConfig, resources: Arc<SongResources>) -> Self {
        let clock = config.clock();
        let memory_size = if config.sample_mem_64k { 65536 } else { 8192 };
        let mut core = SuCore::new(memory_size);
        render_samples(&resources, core.memory_mut());
        let mut chip = Self {
            base: ChipBase::new(config, resources, CHANNELS, REGISTERS, clock, clock / 4),
            core,
            chan: std::array::from_fn(|_| SuChannel::new()),
        };
        chip.reset();
        chip
    }

    fn note_freq(&self, ch: usize, note: i32) -> i32 {
        let clock = self.base.clock as f64;
        if self.chan[ch].switch_roles {
            period_for_note(clock, TIMER_DIVIDER, note)
        } else {
            freq_for_note(clock, FREQ_BASE, note)
        }
    }

    fn apply_instrument(ch: &mut SuChannel, ins: Option<&Instrument>) {
        let Some(ins) = ins else {
            ch.switch_roles = false;
            ch.pcm = false;
            return;
        };
        ch.switch_roles = ins.switch_roles;
        ch.pcm = ins.plays_sample();
        if ins.kind == InstrumentKind::SoundUnit {
            ch.base_cutoff = ins.base_cutoff;
            ch.resonance = ins.resonance;
            ch.control = (ch.control & 1) | ((ins.filter_mode & 7) << 1);
        }
        if !ch.state.std.ex1().has {
            ch.cutoff = ch.base_cutoff;
        }
    }

    fn key_on_sample(&mut self, i: usize) {
        let (index, aud_pos) = (self.chan[i].sample, self.chan[i].aud_pos);
        let entry = index.and_then(|s| self.core.memory().entry(s));
        let sample = index.and_then(|s| self.base.resources.sample(s));
        let (entry, sample) = match (entry, sample) {
            (Some(entry), Some(sample)) => (entry, sample),
            _ => {
                log::debug!("Sound Unit channel {i}: no sample in memory, staying silent");
                self.chan[i].sample = None;
                return;
            }
        };
        let last = self.core.memory().capacity() - 1;
        let start = (entry.offset + aud_pos.min(entry.len)).min(last);
        let end = (entry.offset + sample.loop_end().unwrap_or(entry.len)).min(last);
        let loop_start = sample.loop_start().map(|l| (entry.offset + l).min(last));
        let base = i * 32;
        let port = &mut self.base.port;
        port.write(base + 0x0a, (start & 0xff) as u8);
        port.write(base + 0x0b, (start >> 8) as u8);
        port.write(base + 0x0c, (end & 0xff) as u8);
        port.write(base + 0x0d, (end >> 8) as u8);
        if let Some(loop_start) = loop_start {
            port.write(base + 0x0e, (loop_start & 0xff) as u8);
            port.write(base + 0x0f, (loop_start >> 8) as u8);
        }
        self.chan[i].pcm_loop = loop_start.is_some();
    }

    fn stage_channel(&mut self, i: usize) {
        let muted = self.base.is_muted(i);
        let ch = &self.chan[i];
        let base = i * 32;
        let (osc, timer) = if ch.switch_roles {
            (ch.sync_timer, ch.state.freq as u16)
        } else {
            (ch.state.freq as u16, ch.sync_timer)
        };
        let mut regs: Vec<(usize, u8)> = vec![
            (0x00, (osc & 0xff) as u8),
            (0x01, (osc >> 8) as u8),
            (0x02, ch.level(muted)),
            (0x03, ch.pan as u8),
            (0x04, ch.control_reg()),
            (0x05, ch.upper_flags(muted)),
            (0x06, (ch.cutoff & 0xff) as u8),
            (0x07, (ch.cutoff >> 8) as u8),
            (0x08, ch.duty),
            (0x09, ch.resonance),
            (0x1e, (timer & 0xff) as u8),
            (0x1f, (timer >> 8) as u8),
        ];
        for (s, sweep) in ch.sweeps.iter().enumerate() {
            let at = 0x10 + s * 4;
            regs.extend([
                (at, (sweep.period & 0xff) as u8),
                (at + 1, (sweep.period >> 8) as u8),
                (at + 2, sweep.amount),
                (at + 3, sweep.bound),
            ]);
        }
        for (reg, val) in regs {
            self.base.port.stage(base + reg, val);
        }
    }

    fn sweep_slot(value2: i32) -> Option<usize> {
        match value2 {
            0 => Some(SWEEP_FREQ),
            1 => Some(SWEEP_VOL),
            2 => Some(SWEEP_CUT),
            _ => None,
        }
    }
}

impl ChipDispatch for SoundUnit {
    fn base(&self) -> &ChipBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChipBase {
        &mut self.base
    }

    fn model(&self) -> ChipModel {
        ChipModel::SoundUnit
    }

    fn tick(&mut self, _sys_tick: bool) {
        let resources = Arc::clone(&self.base.resources);
        for i in 0..CHANNELS {
            let ch = &mut self.chan[i];
            ch.state.std.next();

            let vol = ch.state.std.vol();
            if vol.had {
                let mul = ch.macro_vol_mul;
                let shift = if mul == 64 { 6 } else { 7 };
                ch.state.out_vol = ((ch.state.vol & 127) * vol.val.clamp(0, mul)) >> shift;
            }
            ch.state.apply_arp_macro();
            ch.state.apply_pitch_macro();
            let duty = ch.state.std.duty();
            if duty.had {
                ch.duty = (duty.val & 127) as u8;
            }
            let wave = ch.state.std.wave();
            if wave.had {
                ch.wave = (wave.val & 7) as u8;
            }
            let pan_l = ch.state.std.pan_l();
            if pan_l.had {
                ch.pan = pan_l.val.clamp(-127, 127) as i8;
            }
            let ex1 = ch.state.std.ex1();
            if ex1.had {
                let cutoff = (ex1.val & 16383) as i64 * ch.base_cutoff as i64 / 16380;
                ch.cutoff = cutoff.clamp(0, u16::MAX as i64) as u16;
            }
            let ex2 = ch.state.std.ex2();
            if ex2.had {
                ch.resonance = ex2.val.clamp(0, 255) as u8;
            }
            let ex3 = ch.state.std.ex3();
            if ex3.had {
                ch.control = (ex3.val & 15) as u8;
            }
            let ex4 = ch.state.std.ex4();
            if ex4.had {
                ch.sync_timer = (ex4.val & 0xffff) as u16;
            }
            let phase_reset = ch.state.std.phase_reset();
            let reset_phase = phase_reset.had && phase_reset.val == 1;
            ch.state.settle_phase();
            if ch.set_pos {
                ch.state.key_on = true;
                ch.set_pos = false;
            }

            if ch.state.freq_changed || ch.state.key_on || ch.state.key_off {
                let mut freq = ch.state.bent_freq(ch.switch_roles) as f64;
                if ch.pcm {
                    if let Some(sample) = ch.sample.and_then(|s| resources.sample(s)) {
                        freq *= sample.rate() as f64 / (DEFAULT_CENTER_RATE as f64 * 4.0);
                    }
                }
                ch.state.freq = clamp_freq(freq.round() as i32, 0, 65535);
                if ch.state.key_on && ch.pcm {
                    self.key_on_sample(i);
                }
                let ch = &mut self.chan[i];
                ch.state.key_on = false;
                ch.state.key_off = false;
                ch.state.freq_changed = false;
            }
            self.chan[i].aud_pos = 0;
            if reset_phase {
                let upper = self.chan[i].upper_flags(self.base.is_muted(i));
                self.base.port.write(i * 32 + 0x05, upper | 1);
            }
            self.stage_channel(i);
        }
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
                let ins = resources.instrument(self.chan[c].state.ins);
                let ch = &mut self.chan[c];
                Self::apply_instrument(ch, ins);
                ch.macro_vol_mul = match ins.map(|i| i.kind) {
                    Some(InstrumentKind::Sample) => 64,
                    _ => VOL_MAX,
                };
                if cmd.value != NOTE_NULL {
                    ch.sample = ins
                        .filter(|i| i.plays_sample())
                        .and_then(|i| i.sample)
                        .filter(|&s| s < resources.samples.len());
                }
                let base_freq = if cmd.value != NOTE_NULL {
                    self.note_freq(c, cmd.value)
                } else {
                    self.chan[c].state.base_freq
                };
                self.chan[c].state.note_on(cmd.value, ins, |_| base_freq);
            }
            CommandKind::NoteOff => {
                let ch = &mut self.chan[c];
                ch.sample = None;
                ch.state.note_off();
            }
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
            CommandKind::GetVolume => {
                let state = &self.chan[c].state;
                return if state.std.vol().has { state.vol } else { state.out_vol };
            }
            CommandKind::GetVolMax => return VOL_MAX,
            CommandKind::Panning => {
                self.chan[c].pan = (linear_pan(cmd.value, cmd.value2, 254) - 127) as i8;
            }
            CommandKind::Pitch => {
                self.chan[c].state.pitch = cmd.value;
                self.chan[c].state.freq_changed = true;
            }
            CommandKind::NotePorta => {
                let dest = self.note_freq(c, cmd.value2);
                return self.chan[c].state.porta_toward(dest, cmd.value);
            }
            CommandKind::Legato => {
                let freq = self.note_freq(c, cmd.value);
                let state = &mut self.chan[c].state;
                state.note = cmd.value;
                state.base_freq = freq;
                state.freq_changed = true;
            }
            CommandKind::PrePorta => {
                let resources = Arc::clone(&self.base.resources);
                let state = &mut self.chan[c].state;
                if state.active && cmd.value2 != 0 {
                    state.std.init(resources.instrument(state.ins));
                }
                state.in_porta = cmd.value != 0;
            }
            CommandKind::SamplePos => {
                let ch = &mut self.chan[c];
                ch.aud_pos = cmd.value.max(0) as usize;
                ch.set_pos = true;
            }
            CommandKind::Wave => self.chan[c].wave = (cmd.value & 7) as u8,
            CommandKind::StdNoiseMode => self.chan[c].duty = (cmd.value & 127) as u8,
            CommandKind::FilterCutoff => {
                let ch = &mut self.chan[c];
                ch.base_cutoff = (cmd.value.max(0) * 4).min(u16::MAX as i32) as u16;
                if !ch.state.std.ex1().has {
                    ch.cutoff = ch.base_cutoff;
                }
            }
            CommandKind::FilterResonance => self.chan[c].resonance = cmd.value.clamp(0, 255) as u8,
            CommandKind::FilterMode => self.chan[c].control = (cmd.value & 15) as u8,
            CommandKind::SuSweepPeriodLow => {
                if let Some(s) = Self::sweep_slot(cmd.value2) {
                    let sweep = &mut self.chan[c].sweeps[s];
                    sweep.period = (sweep.period & 0xff00) | (cmd.value & 0xff) as u16;
                }
            }
            CommandKind::SuSweepPeriodHigh => {
                if let Some(s) = Self::sweep_slot(cmd.value2) {
                    let sweep = &mut self.chan[c].sweeps[s];
                    sweep.period = (sweep.period & 0x00ff) | (((cmd.value & 0xff) as u16) << 8);
                }
            }
            CommandKind::SuSweepBound => {
                if let Some(s) = Self::sweep_slot(cmd.value2) {
                    self.chan[c].sweeps[s].bound = (cmd.value & 0xff) as u8;
                }
            }
            CommandKind::SuSweepEnable => {
                if let Some(s) = Self::sweep_slot(cmd.value2) {
                    self.chan[c].sweeps[s].amount = (cmd.value & 0xff) as u8;
                }
            }
            CommandKind::SuSyncPeriodLow => {
                let ch = &mut self.chan[c];
                ch.sync_timer = (ch.sync_timer & 0xff00) | (cmd.value & 0xff) as u16;
            }
            CommandKind::SuSyncPeriodHigh => {
                let ch = &mut self.chan[c];
                ch.sync_timer = (ch.sync_timer & 0x00ff) | (((cmd.value & 0xff) as u16) << 8);
            }
            CommandKind::MacroOff | CommandKind::MacroOn => {
                if let Some(kind) = MacroKind::from_index(cmd.value.max(0) as usize) {
                    self.chan[c].state.std.mask(kind, cmd.kind == CommandKind::MacroOff);
                }
            }
            CommandKind::AlwaysSetVolume => return 1,
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
            *ch = SuChannel::new();
        }
        for i in 0..CHANNELS {
            self.base.port.write(i * 32 + 0x08, DEFAULT_DUTY);
            self.base.port.write(i * 32 + 0x06, 0xff);
            self.base.port.write(i * 32 + 0x07, 0xff);
        }
        log::debug!("Sound Unit reset ({} Hz)", self.base.clock);
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
    }

    fn set_resources(&mut self, resources: Arc<SongResources>) {
        render_samples(&resources, self.core.memory_mut());
        self.base.resources = resources;
    }

    fn output_channels(&self) -> usize {
        2
    }

    fn key_off_affects_arp(&self, _ch: usize) -> bool {
        true
    }

    fn sample_memory(&self) -> Option<&SampleMemory> {
        Some(self.core.memory())
    }

    fn notify_ins_change(&mut self, ins: i32) {
        for ch in &mut self.chan {
            if ch.state.ins == ins {
                ch.state.ins_changed = true;
            }
        }
    }
}
