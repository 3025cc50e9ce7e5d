//! K007232 model
//!
//! Two sample channels with a 12-bit pitch counter. Samples are rendered
//! into a 16 MiB banked memory as 7-bit unsigned data followed by an end
//! marker; every key on re-programs the whole voice through the immediate
//! path, in the order the chip needs (key off, loop bit, bank, pitch,
//! start, key on, loop start).
//!
//! # Register map
//! - `ch * 6 + 0/1`: pitch low/high (12 bit)
//! - `ch * 6 + 2..=4`: start address (17 bit)
//! - `ch * 6 + 5`: key on (any write)
//! - `0x0c`: mono volume (channel 0 low nibble, channel 1 high nibble)
//! - `0x0d`: loop bits
//! - `0x10 + ch`: external stereo volume latch (left low, right high)
//! - `0x12 + ch`: external bank latch

pub mod chip;

use std::sync::Arc;

pub use chip::K007232Core;

use chip::{BANK_SIZE, END_MARKER};

use crate::channel::{ChannelState, ChannelStatus};
use crate::chips::ChipModel;
use crate::command::{Command, CommandKind, HANDLED, NOTE_NULL};
use crate::config::ChipConfig;
use crate::dispatch::{apply_next_write, ChipBase, ChipCore, ChipDispatch, SampleMemory};
use crate::freq::{clamp_freq, period_for_note};
use crate::instrument::{InstrumentKind, SongResources, DEFAULT_CENTER_RATE};
use crate::macros::MacroKind;

/// Clock presets: NTSC colour burst
pub const CLOCKS: &[u32] = &[3_579_545];

const CHANNELS: usize = 2;
const REGISTERS: usize = 20;
const CHIP_DIVIDER: f64 = 128.0;
const VOL_MAX: i32 = 15;
const CENTRE_PAN: u8 = 0xff;

/// Render samples into K007232 memory
///
/// Each sample is converted to 7-bit unsigned, truncated to one bank less
/// two bytes, terminated with an end marker and kept inside one 128 KiB
/// bank.
pub fn render_samples(resources: &SongResources, memory: &mut SampleMemory) {
    memory.clear(END_MARKER);
    for (i, sample) in resources.samples.iter().enumerate() {
        let length = sample.loop_end().unwrap_or_else(|| sample.len());
        let mut bytes: Vec<u8> = sample
            .to_pcm8()
            .iter()
            .take(length.min(BANK_SIZE - 2))
            .map(|&s| (((s as u8) ^ 0x80) >> 1) & 0x7f)
            .collect();
        if bytes.is_empty() {
            continue;
        }
        bytes.push(END_MARKER);
        if memory.place(i, &bytes, 1, Some(BANK_SIZE)).is_none() {
            break;
        }
    }
    log::debug!("K007232 sample memory: {} of {} bytes", memory.used(), memory.capacity());
}

#[derive(Debug, Clone)]
struct K007232Channel {
    state: ChannelState,
    sample: Option<usize>,
    panning: u8,
    macro_vol_mul: i32,
    aud_pos: usize,
    set_pos: bool,
}

impl K007232Channel {
    fn new() -> Self {
        Self {
            state: ChannelState::new(VOL_MAX),
            sample: None,
            panning: CENTRE_PAN,
            macro_vol_mul: VOL_MAX,
            aud_pos: 0,
            set_pos: false,
        }
    }

    fn level(&self, muted: bool) -> u8 {
        if muted {
            0
        } else {
            (self.state.out_vol & 15) as u8
        }
    }
}

/// K007232 chip instance
#[derive(Debug)]
pub struct K007232 {
    base: ChipBase,
    core: K007232Core,
    chan: [K007232Channel; CHANNELS],
    loop_bits: u8,
    stereo: bool,
}

impl K007232 {
    /// New instance at power-on state, with the song's samples rendered
    pub fn new(config: &ChipConfig, resources: Arc<SongResources>) -> Self {
        let clock = config.clock();
        let mut core = K007232Core::new(config.stereo);
        render_samples(&resources, core.memory_mut());
        let mut chip = Self {
            base: ChipBase::new(config, resources, CHANNELS, REGISTERS, clock, clock / 4),
            core,
            chan: std::array::from_fn(|_| K007232Channel::new()),
            loop_bits: 0,
            stereo: config.stereo,
        };
        chip.reset();
        chip
    }

    fn note_period(&self, note: i32) -> i32 {
        period_for_note(self.base.clock as f64, CHIP_DIVIDER, note)
    }

    fn center_rate(&self, sample: Option<usize>) -> u32 {
        sample
            .and_then(|s| self.base.resources.sample(s))
            .map_or(DEFAULT_CENTER_RATE, |s| s.rate())
    }

    fn key_off_voice(&mut self, i: usize) {
        let port = &mut self.base.port;
        port.write(i * 6 + 2, 0xff);
        port.write(i * 6 + 3, 0xff);
        port.write(i * 6 + 4, 0x01);
        port.write(i * 6 + 5, 0);
    }

    fn key_on_voice(&mut self, i: usize) {
        self.key_off_voice(i);
        let ch = &self.chan[i];
        let entry = ch.sample.and_then(|s| self.core.memory().entry(s));
        let sample = ch.sample.and_then(|s| self.base.resources.sample(s));
        let (entry, sample) = match (entry, sample) {
            (Some(entry), Some(sample)) => (entry, sample),
            _ => {
                log::debug!("K007232 channel {i}: no sample in memory, staying silent");
                self.loop_bits &= !(1 << i);
                self.base.port.write_if_changed(0x0d, self.loop_bits);
                return;
            }
        };
        let length = entry.len.saturating_sub(1);
        let bank = (entry.offset / BANK_SIZE) as u8;
        let base = entry.offset % BANK_SIZE;
        let mut start = base;
        if ch.aud_pos > 0 {
            start += ch.aud_pos.min(length.min(BANK_SIZE - 1));
        }
        let start = start.min(BANK_SIZE - 1);
        let loop_start = sample.loop_start().map(|l| (base + l).min(BANK_SIZE - 1));
        let freq = ch.state.freq;

        if loop_start.is_some() {
            self.loop_bits |= 1 << i;
        } else {
            self.loop_bits &= !(1 << i);
        }
        let port = &mut self.base.port;
        port.write_if_changed(0x0d, self.loop_bits);
        port.write_if_changed(0x12 + i, bank);
        port.write_if_changed(i * 6, (freq & 0xff) as u8);
        port.write_if_changed(i * 6 + 1, ((freq >> 8) & 0x0f) as u8);
        port.write(i * 6 + 2, (start & 0xff) as u8);
        port.write(i * 6 + 3, ((start >> 8) & 0xff) as u8);
        port.write(i * 6 + 4, ((start >> 16) & 0x01) as u8);
        port.write(i * 6 + 5, 0);
        if let Some(loop_start) = loop_start.filter(|&l| l != start) {
            port.write(i * 6 + 2, (loop_start & 0xff) as u8);
            port.write(i * 6 + 3, ((loop_start >> 8) & 0xff) as u8);
            port.write(i * 6 + 4, ((loop_start >> 16) & 0x01) as u8);
        }
    }
}

impl ChipDispatch for K007232 {
    fn base(&self) -> &ChipBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChipBase {
        &mut self.base
    }

    fn model(&self) -> ChipModel {
        ChipModel::K007232
    }

    fn tick(&mut self, _sys_tick: bool) {
        for i in 0..CHANNELS {
            let ch = &mut self.chan[i];
            ch.state.std.next();

            let vol = ch.state.std.vol();
            if vol.had {
                let mul = ch.macro_vol_mul;
                ch.state.out_vol = (ch.state.vol & 15) * vol.val.clamp(0, mul) / mul;
            }
            ch.state.apply_arp_macro();
            ch.state.apply_pitch_macro();
            let pan_l = ch.state.std.pan_l();
            if pan_l.had {
                ch.panning = (ch.panning & 0xf0) | (pan_l.val & 15) as u8;
            }
            let pan_r = ch.state.std.pan_r();
            if pan_r.had {
                ch.panning = (ch.panning & 0x0f) | (((pan_r.val & 15) as u8) << 4);
            }
            let phase_reset = ch.state.std.phase_reset();
            if phase_reset.had && phase_reset.val == 1 && ch.state.active {
                ch.aud_pos = 0;
                ch.set_pos = true;
            }
            ch.state.settle_phase();

            if ch.set_pos {
                ch.state.key_on = true;
                ch.set_pos = false;
            }

            if ch.state.freq_changed || ch.state.key_on || ch.state.key_off {
                let off = DEFAULT_CENTER_RATE as f64 / self.center_rate(self.chan[i].sample) as f64;
                let ch = &mut self.chan[i];
                let period = ch.state.bent_freq(true) as f64 * off;
                ch.state.freq = clamp_freq(0x1000 - period.round() as i32, 0, 4095);
                if ch.state.key_on {
                    ch.state.key_on = false;
                    self.key_on_voice(i);
                }
                let ch = &mut self.chan[i];
                if ch.state.key_off {
                    ch.state.key_off = false;
                    self.key_off_voice(i);
                    self.loop_bits &= !(1 << i);
                    self.base.port.write_if_changed(0x0d, self.loop_bits);
                }
                let ch = &mut self.chan[i];
                if ch.state.freq_changed {
                    ch.state.freq_changed = false;
                    let freq = ch.state.freq;
                    self.base.port.write_if_changed(i * 6, (freq & 0xff) as u8);
                    self.base.port.write_if_changed(i * 6 + 1, ((freq >> 8) & 0x0f) as u8);
                }
            }
            self.chan[i].aud_pos = 0;
        }

        let levels: [u8; CHANNELS] = std::array::from_fn(|i| self.chan[i].level(self.base.is_muted(i)));
        if self.stereo {
            for (i, &level) in levels.iter().enumerate() {
                let pan = self.chan[i].panning;
                let left = level as u32 * (pan & 15) as u32 / 15;
                let right = level as u32 * (pan >> 4) as u32 / 15;
                self.base.port.stage(0x10 + i, (left | (right << 4)) as u8);
            }
        } else {
            self.base.port.stage(0x0c, levels[0] | (levels[1] << 4));
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
                ch.macro_vol_mul = match ins.map(|i| i.kind) {
                    Some(InstrumentKind::Sample) => 64,
                    _ => VOL_MAX,
                };
                if cmd.value != NOTE_NULL {
                    ch.sample = ins
                        .and_then(|i| i.sample)
                        .filter(|&s| s < resources.samples.len());
                }
                let clock = self.base.clock as f64;
                ch.state
                    .note_on(cmd.value, ins, |n| period_for_note(clock, CHIP_DIVIDER, n));
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
                let left = (cmd.value.clamp(0, 255) as u8) >> 4;
                let right = (cmd.value2.clamp(0, 255) as u8) & 0xf0;
                self.chan[c].panning = left | right;
            }
            CommandKind::Pitch => {
                self.chan[c].state.pitch = cmd.value;
                self.chan[c].state.freq_changed = true;
            }
            CommandKind::NotePorta => {
                let dest = self.note_period(cmd.value2);
                return self.chan[c].state.porta_toward(dest, cmd.value);
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
        let stride = self.output_channels();
        for frame in out.chunks_exact_mut(stride).take(frames) {
            apply_next_write(&mut self.base.port, &mut self.core);
            let (left, right) = self.core.clock();
            frame[0] = left.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            if stride == 2 {
                frame[1] = right.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }
            for (i, osc) in self.base.osc.iter_mut().enumerate() {
                osc.push_clamped(self.core.channel_output(i));
            }
        }
    }

    fn reset(&mut self) {
        self.base.reset();
        self.core.reset();
        for ch in &mut self.chan {
            *ch = K007232Channel::new();
        }
        self.loop_bits = 0;
        for i in 0..CHANNELS {
            self.base.port.write(i * 6, 0);
            self.base.port.write(i * 6 + 1, 0);
            self.key_off_voice(i);
        }
        log::debug!("K007232 reset ({} Hz, stereo {})", self.base.clock, self.stereo);
    }

    fn channel_status(&self, ch: usize) -> Option<ChannelStatus> {
        self.chan
            .get(ch)
            .map(|c| c.state.status(self.base.is_muted(ch)))
    }

    fn force_ins(&mut self) {
        self.base.port.clear_queue();
        self.base.port.invalidate();
        for ch in &mut self.chan {
            ch.state.ins_changed = true;
            ch.state.freq_changed = true;
        }
        self.loop_bits = 0;
    }

    fn set_resources(&mut self, resources: Arc<SongResources>) {
        render_samples(&resources, self.core.memory_mut());
        self.base.resources = resources;
    }

    fn output_channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Instrument, Sample};
    use crate::registers::RegisterWrite;

    fn resources() -> Arc<SongResources> {
        Arc::new(SongResources {
            instruments: vec![Instrument::sample("a", 0), Instrument::sample("b", 1)],
            samples: vec![
                Sample::pcm8("short", vec![0, 64, 127, -128]),
                Sample::pcm8("loop", vec![10; 300]).with_loop(100, 300),
            ],
        })
    }

    fn chip(stereo: bool) -> K007232 {
        let mut config = ChipConfig::new(ChipModel::K007232);
        config.stereo = stereo;
        K007232::new(&config, resources())
    }

    fn drain(chip: &mut K007232) -> Vec<RegisterWrite> {
        std::iter::from_fn(|| chip.base.port.pop()).collect()
    }

    #[test]
    fn test_render_converts_to_seven_bit() {
        let chip = chip(false);
        let mem = chip.sample_memory().unwrap();
        let entry = mem.entry(0).unwrap();
        assert_eq!(entry.len, 5);
        assert_eq!(&mem.data()[0..5], &[0x40, 0x60, 0x7f, 0x00, END_MARKER]);
        let looped = mem.entry(1).unwrap();
        assert_eq!(looped.offset, 5);
        assert_eq!(looped.len, 301);
    }

    #[test]
    fn test_key_on_programs_start_address() {
        let mut chip = chip(false);
        drain(&mut chip);
        chip.dispatch(Command::new(1, CommandKind::Instrument, 1));
        chip.dispatch(Command::new(1, CommandKind::NoteOn, 48));
        chip.tick(true);
        let writes = drain(&mut chip);
        // forced key off comes first
        assert_eq!(writes[0], RegisterWrite::new(8, 0xff));
        assert_eq!(writes[3], RegisterWrite::new(11, 0));
        let key_on = writes
            .iter()
            .rposition(|w| w.addr == 11)
            .unwrap();
        assert_eq!(writes[key_on - 3], RegisterWrite::new(8, 5));
        assert_eq!(writes[key_on - 2], RegisterWrite::new(9, 0));
        // loop start follows the key on
        assert_eq!(writes[key_on + 1], RegisterWrite::new(8, 105));
        assert_eq!(chip.register_pool()[0x0d], 0x02);
    }

    #[test]
    fn test_frequency_at_center_rate() {
        let mut chip = chip(false);
        chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
        chip.dispatch(Command::new(0, CommandKind::NoteOn, 48));
        chip.tick(true);
        let period = period_for_note(3_579_545.0, 128.0, 48);
        assert_eq!(chip.chan[0].state.freq, 0x1000 - period);
        let pool = chip.register_pool();
        assert_eq!(((pool[1] as i32) << 8) | pool[0] as i32, 0x1000 - period);
    }

    #[test]
    fn test_mono_volume_and_mute() {
        let mut chip = chip(false);
        chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
        chip.dispatch(Command::new(0, CommandKind::Volume, 9));
        chip.dispatch(Command::new(0, CommandKind::NoteOn, 48));
        chip.tick(true);
        assert_eq!(chip.register_pool()[0x0c] & 0x0f, 9);
        chip.mute_channel(0, true);
        chip.tick(true);
        assert_eq!(chip.register_pool()[0x0c] & 0x0f, 0);
        assert_eq!(chip.chan[0].state.out_vol, 9);
    }

    #[test]
    fn test_stereo_latches() {
        let mut chip = chip(true);
        assert_eq!(chip.output_channels(), 2);
        chip.dispatch(Command::with_value2(0, CommandKind::Panning, 0xff, 0x00));
        chip.tick(true);
        assert_eq!(chip.register_pool()[0x10], 0x0f);
    }

    #[test]
    fn test_sample_plays_and_stops() {
        let mut chip = chip(false);
        chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
        chip.dispatch(Command::new(0, CommandKind::NoteOn, 48));
        chip.tick(true);
        let mut out = vec![0i16; 8192];
        chip.acquire(&mut out, 8192);
        assert!(out.iter().any(|&s| s != 0));
        assert!(out[4096..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_missing_sample_stays_silent() {
        let mut chip = chip(false);
        chip.dispatch(Command::new(0, CommandKind::NoteOn, 48));
        chip.tick(true);
        let mut out = vec![0i16; 512];
        chip.acquire(&mut out, 512);
        assert!(out.iter().all(|&s| s == 0));
    }
}
