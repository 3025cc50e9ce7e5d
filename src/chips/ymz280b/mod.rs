//! YMZ280B model
//!
//! Eight sample voices with per-voice level and 4-bit pan. Every key on
//! re-sends the four address registers through the immediate path after a
//! forced key off; the pitch, control, level and pan registers are staged
//! each tick.
//!
//! # Register map
//! - `ch * 4 + 0x00`: pitch low byte
//! - `ch * 4 + 0x01`: control (key 0x80, mode 0x60, loop 0x10, pitch bit 8)
//! - `ch * 4 + 0x02`: level, `ch * 4 + 0x03`: pan
//! - `0x20`/`0x40`/`0x60 + ch * 4 + {0..3}`: start, loop start, loop end and
//!   stop address (high, middle, low byte)
//! - `0xff`: key on enable

pub mod chip;

use std::sync::Arc;

pub use chip::YmzCore;

use crate::channel::{ChannelState, ChannelStatus};
use crate::chips::ChipModel;
use crate::command::{Command, CommandKind, HANDLED, NOTE_NULL};
use crate::config::ChipConfig;
use crate::dispatch::{apply_next_write, ChipBase, ChipCore, ChipDispatch, SampleMemory};
use crate::freq::{clamp_freq, freq_for_note, linear_pan, note_hz, NOTE_C4};
use crate::instrument::{InstrumentKind, Sample, SampleData, SongResources, DEFAULT_CENTER_RATE};
use crate::macros::MacroKind;

/// Clock presets: 16.9344 MHz, NTSC * 4, PAL * 16 / 5, 16 MHz, 50 / 3 MHz, 14 MHz
pub const CLOCKS: &[u32] = &[16_934_400, 14_318_180, 11_354_545, 16_000_000, 16_666_667, 14_000_000];

const CHANNELS: usize = 8;
const REGISTERS: usize = 256;
const VOL_MAX: i32 = 255;
const CENTRE_PAN: u8 = 8;
/// One output sample is 384 clocks; pitch is in 1/256 steps
const FREQ_SCALE: f64 = 256.0 * 384.0 * 256.0;

/// Control register bits for a sample's storage format
fn depth_bits(sample: &Sample) -> u8 {
    match sample.data {
        SampleData::YmzAdpcm(_) => 0x20,
        SampleData::Pcm8(_) => 0x40,
        SampleData::Pcm16(_) => 0x60,
    }
}

/// Scale a frame position into a byte offset for the sample's format
fn frame_to_bytes(sample: &Sample, frames: usize) -> usize {
    match sample.data {
        SampleData::YmzAdpcm(_) => frames / 2,
        SampleData::Pcm8(_) => frames,
        SampleData::Pcm16(_) => frames * 2,
    }
}

/// Render samples into YMZ280B memory in their native format
///
/// 16-bit samples are stored big-endian.
pub fn render_samples(resources: &SongResources, memory: &mut SampleMemory) {
    memory.clear(0);
    for (i, sample) in resources.samples.iter().enumerate() {
        let bytes: Vec<u8> = match &sample.data {
            SampleData::YmzAdpcm(d) => d.clone(),
            SampleData::Pcm8(d) => d.iter().map(|&s| s as u8).collect(),
            SampleData::Pcm16(d) => d.iter().flat_map(|s| s.to_be_bytes()).collect(),
        };
        if bytes.is_empty() {
            continue;
        }
        if memory.place(i, &bytes, 1, None).is_none() {
            break;
        }
    }
    log::debug!("YMZ280B sample memory: {} of {} bytes", memory.used(), memory.capacity());
}

#[derive(Debug, Clone)]
struct YmzChannel {
    state: ChannelState,
    sample: Option<usize>,
    panning: u8,
    macro_vol_mul: i32,
    aud_pos: usize,
    set_pos: bool,
}

impl YmzChannel {
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
}

/// YMZ280B chip instance
#[derive(Debug)]
pub struct Ymz280b {
    base: ChipBase,
    core: YmzCore,
    chan: [YmzChannel; CHANNELS],
}

impl Ymz280b {
    /// New instance at power-on state, with the song's samples rendered
    pub fn new(config: &ChipConfig, resources: Arc<SongResources>) -> Self {
        let clock = config.clock();
        let mut core = YmzCore::new();
        render_samples(&resources, core.memory_mut());
        let mut chip = Self {
            base: ChipBase::new(config, resources, CHANNELS, REGISTERS, clock, clock / 384),
            core,
            chan: std::array::from_fn(|_| YmzChannel::new()),
        };
        chip.reset();
        chip
    }

    /// Base frequency of a note: 256 x the pitch value that plays a sample
    /// at the default center rate on C-4
    fn note_freq(clock: u32, note: i32) -> i32 {
        let freq_base = DEFAULT_CENTER_RATE as f64 * FREQ_SCALE / note_hz(NOTE_C4);
        freq_for_note(clock as f64, freq_base, note)
    }

    fn program_addresses(&mut self, i: usize, sample: &Sample, offset: usize) {
        let capacity = self.core.memory().capacity();
        let mut start = offset;
        let end = (offset + sample.byte_len()).min(capacity - 1);
        let aud_pos = self.chan[i].aud_pos;
        if aud_pos > 0 {
            start = (start + frame_to_bytes(sample, aud_pos)).min(end);
        }
        let (loop_start, loop_end) = match sample.loop_start().zip(sample.loop_end()) {
            Some((ls, le)) => {
                let loop_end = (offset + frame_to_bytes(sample, le)).min(end);
                let loop_start = (offset + frame_to_bytes(sample, ls)).min(loop_end);
                (loop_start, loop_end)
            }
            None => (0, 0),
        };
        let port = &mut self.base.port;
        for (shift, bank) in [(16, 0x20), (8, 0x40), (0, 0x60)] {
            let reg = bank + i * 4;
            port.write(reg, ((start >> shift) & 0xff) as u8);
            port.write(reg + 1, ((loop_start >> shift) & 0xff) as u8);
            port.write(reg + 2, ((loop_end >> shift) & 0xff) as u8);
            port.write(reg + 3, ((end >> shift) & 0xff) as u8);
        }
    }
}

impl ChipDispatch for Ymz280b {
    fn base(&self) -> &ChipBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChipBase {
        &mut self.base
    }

    fn model(&self) -> ChipModel {
        ChipModel::Ymz280b
    }

    fn tick(&mut self, _sys_tick: bool) {
        let resources = Arc::clone(&self.base.resources);
        for i in 0..CHANNELS {
            let muted = self.base.is_muted(i);
            let ch = &mut self.chan[i];
            ch.state.std.next();

            let vol = ch.state.std.vol();
            if vol.had {
                let mul = ch.macro_vol_mul;
                ch.state.out_vol = (ch.state.vol & 0xff) * vol.val.clamp(0, mul) / mul;
            }
            ch.state.apply_arp_macro();
            ch.state.apply_pitch_macro();
            let pan_l = ch.state.std.pan_l();
            if pan_l.had {
                ch.panning = ((pan_l.val * 15 / 16 + 15) / 2 + 1).clamp(0, 15) as u8;
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
                let sample = ch.sample.and_then(|s| resources.sample(s));
                let off = sample.map_or(1.0, |s| s.rate() as f64 / DEFAULT_CENTER_RATE as f64);
                let max = if sample.is_some_and(|s| matches!(s.data, SampleData::YmzAdpcm(_))) {
                    255
                } else {
                    511
                };
                let fnum = (off * ch.state.bent_freq(false) as f64 / 256.0).round() as i32 - 1;
                ch.state.freq = clamp_freq(fnum, 0, max);
                let freq = ch.state.freq;
                let mut ctrl = sample.map_or(0, depth_bits)
                    | if ch.state.active { 0x80 } else { 0 }
                    | if sample.is_some_and(|s| s.is_loopable()) { 0x10 } else { 0 }
                    | ((freq >> 8) & 1) as u8;
                let entry = ch.sample.and_then(|s| self.core.memory().entry(s));
                if ch.state.key_on {
                    ch.state.key_on = false;
                    match sample.zip(entry) {
                        Some((sample, entry)) => {
                            self.base.port.write(0x01 + i * 4, ctrl & !0x80);
                            self.program_addresses(i, sample, entry.offset);
                        }
                        None => {
                            log::debug!("YMZ280B channel {i}: no sample in memory, staying silent");
                            ctrl &= !0x80;
                        }
                    }
                }
                let ch = &mut self.chan[i];
                ch.state.key_off = false;
                ch.state.freq_changed = false;
                self.base.port.stage(i * 4, (freq & 0xff) as u8);
                self.base.port.stage(0x01 + i * 4, ctrl);
            }
            let ch = &mut self.chan[i];
            ch.aud_pos = 0;
            let level = if muted { 0 } else { (ch.state.out_vol & 0xff) as u8 };
            let pan = ch.panning;
            self.base.port.stage(0x02 + i * 4, level);
            self.base.port.stage(0x03 + i * 4, pan);
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
                let clock = self.base.clock;
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
                ch.state.note_on(cmd.value, ins, |n| Self::note_freq(clock, n));
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
                let pan = linear_pan(cmd.value, cmd.value2, 15) + 1;
                self.chan[c].panning = pan.clamp(0, 15) as u8;
            }
            CommandKind::Pitch => {
                self.chan[c].state.pitch = cmd.value;
                self.chan[c].state.freq_changed = true;
            }
            CommandKind::NotePorta => {
                let dest = Self::note_freq(self.base.clock, cmd.value2);
                return self.chan[c].state.porta_toward(dest, cmd.value.saturating_mul(256));
            }
            CommandKind::Legato => {
                let freq = Self::note_freq(self.base.clock, cmd.value);
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
            *ch = YmzChannel::new();
        }
        self.base.port.write(0xff, 0x80);
        for i in 0..CHANNELS {
            self.base.port.write(0x02 + i * 4, VOL_MAX as u8);
            self.base.port.write(0x03 + i * 4, CENTRE_PAN);
        }
        log::debug!("YMZ280B reset ({} Hz)", self.base.clock);
    }

    fn channel_status(&self, ch: usize) -> Option<ChannelStatus> {
        self.chan
            .get(ch)
            .map(|c| c.state.status(self.base.is_muted(ch)))
    }

    fn force_ins(&mut self) {
        for i in 0..CHANNELS {
            let ch = &mut self.chan[i];
            ch.state.ins_changed = true;
            ch.state.freq_changed = true;
            ch.sample = None;
            let pan = ch.panning;
            self.base.port.write(0x03 + i * 4, pan);
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

    fn post_amp(&self) -> f32 {
        4.0
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
    use crate::instrument::Instrument;
    use crate::registers::RegisterWrite;

    fn resources() -> Arc<SongResources> {
        Arc::new(SongResources {
            instruments: vec![
                Instrument::sample("pcm8", 0),
                Instrument::sample("pcm16", 1),
                Instrument::sample("adpcm", 2),
            ],
            samples: vec![
                Sample::pcm8("a", vec![64; 1000]),
                Sample::pcm16("b", vec![1000; 400]).with_loop(100, 400),
                Sample {
                    name: "c".into(),
                    data: SampleData::YmzAdpcm(vec![0x77; 64]),
                    center_rate: 16000,
                    loop_range: None,
                },
            ],
        })
    }

    fn chip() -> Ymz280b {
        Ymz280b::new(&ChipConfig::new(ChipModel::Ymz280b), resources())
    }

    fn address(pool: &[u8], i: usize, slot: usize) -> usize {
        let reg = i * 4 + slot;
        ((pool[0x20 + reg] as usize) << 16) | ((pool[0x40 + reg] as usize) << 8) | pool[0x60 + reg] as usize
    }

    #[test]
    fn test_center_rate_pitch() {
        let mut chip = chip();
        chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_C4));
        chip.tick(true);
        // (fn + 1) / 256 * 44100 Hz ~ 8363 Hz
        let fnum = chip.chan[0].state.freq;
        let rate = (fnum + 1) as f64 * chip.rate() as f64 / 256.0;
        assert!((rate - 8363.0).abs() < 200.0, "rate {rate}");
        let pool = chip.register_pool();
        assert_eq!(pool[0x01], 0x80 | 0x40 | ((fnum >> 8) as u8));
    }

    #[test]
    fn test_addresses_scale_with_depth() {
        let mut chip = chip();
        chip.dispatch(Command::new(1, CommandKind::Instrument, 1));
        chip.dispatch(Command::new(1, CommandKind::NoteOn, NOTE_C4));
        chip.tick(true);
        let pool = chip.register_pool();
        // sample 1 follows the 1000 bytes of sample 0
        assert_eq!(address(pool, 1, 0), 1000);
        assert_eq!(address(pool, 1, 1), 1000 + 200);
        assert_eq!(address(pool, 1, 2), 1000 + 800);
        assert_eq!(address(pool, 1, 3), 1000 + 800);
        assert_eq!(pool[0x01 + 4] & 0x70, 0x70);
    }

    #[test]
    fn test_adpcm_pitch_range() {
        let mut chip = chip();
        chip.dispatch(Command::new(2, CommandKind::Instrument, 2));
        chip.dispatch(Command::new(2, CommandKind::NoteOn, 96));
        chip.tick(true);
        assert_eq!(chip.chan[2].state.freq, 255);
        assert_eq!(chip.register_pool()[0x01 + 8] & 0x61, 0x20);
    }

    #[test]
    fn test_key_on_forces_key_off_first() {
        let mut chip = chip();
        std::iter::from_fn(|| chip.base.port.pop()).count();
        chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_C4));
        chip.tick(true);
        let first = chip.base.port.pop().unwrap();
        assert_eq!(first.addr, 0x01);
        assert_eq!(first.val & 0x80, 0);
    }

    #[test]
    fn test_mute_zeroes_level() {
        let mut chip = chip();
        chip.dispatch(Command::new(3, CommandKind::NoteOn, NOTE_C4));
        chip.tick(true);
        assert_eq!(chip.register_pool()[0x02 + 12], 255);
        chip.mute_channel(3, true);
        chip.tick(true);
        assert_eq!(chip.register_pool()[0x02 + 12], 0);
        chip.tick(true);
        let writes: Vec<RegisterWrite> = std::iter::from_fn(|| chip.base.port.pop()).collect();
        assert!(!writes.contains(&RegisterWrite::new(0x02 + 12, 255)));
    }

    #[test]
    fn test_plays_and_stops() {
        let mut chip = chip();
        chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_C4));
        chip.tick(true);
        let mut out = vec![0i16; 4096 * 2];
        chip.acquire(&mut out, 4096);
        assert!(out.iter().any(|&s| s != 0));
        chip.dispatch(Command::new(0, CommandKind::NoteOff, 0));
        chip.tick(true);
        chip.acquire(&mut out, 4096);
        assert!(out[4096..].iter().all(|&s| s == 0));
    }
}
