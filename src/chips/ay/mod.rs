//! AY-3-8910 / YM2149 model
//!
//! Three square-wave voices sharing one noise generator and one envelope
//! generator. Channel volume, tone period and the mixer register are staged
//! every tick and deduplicated by the register port; envelope periods, IO
//! port writes and the sample-rate effects (DAC playback, timer effects)
//! take the immediate path.
//!
//! # Register map
//! - `0x00..=0x05`: tone period, low/high per channel
//! - `0x06`: noise period
//! - `0x07`: mixer ([`MixerFlags`])
//! - `0x08..=0x0a`: volume, bit 4 selects the envelope
//! - `0x0b`/`0x0c`: envelope period, `0x0d`: envelope shape
//! - `0x0e`/`0x0f`: IO ports

pub mod chip;
pub mod effects;
pub mod generators;
pub mod mixer;

use std::sync::Arc;

pub use chip::AyCore;
pub use mixer::MixerFlags;

use effects::{DacState, DacStep, TimerFx, TimerMode};

use crate::channel::{ChannelPhase, ChannelState, ChannelStatus};
use crate::chips::ChipModel;
use crate::command::{Command, CommandKind, HANDLED, NOTE_NULL};
use crate::config::ChipConfig;
use crate::dispatch::{apply_next_write, ChipBase, ChipCore, ChipDispatch};
use crate::freq::{clamp_freq, note_hz, period_for_note, NOTE_C4};
use crate::instrument::{Instrument, SongResources};
use crate::macros::MacroKind;

/// Clock presets: MSX, ZX Spectrum, Atari ST, Amstrad CPC, 1.5 MHz
pub const CLOCKS: &[u32] = &[1_789_772, 1_773_400, 2_000_000, 1_000_000, 1_500_000];

const CHANNELS: usize = 3;
const REGISTERS: usize = 16;
const TONE_DIVIDER: f64 = 16.0;
const MAX_PERIOD: i32 = 4095;
const VOL_MAX: i32 = 15;

/// psgMode bits
const MODE_TONE: u8 = 1;
const MODE_NOISE: u8 = 2;
const MODE_ENVELOPE: u8 = 4;

#[derive(Debug, Clone)]
struct AyChannel {
    state: ChannelState,
    psg_mode: u8,
    auto_env_num: i32,
    auto_env_den: i32,
    dac: DacState,
    timer: TimerFx,
}

impl AyChannel {
    fn new() -> Self {
        Self {
            state: ChannelState::new(VOL_MAX),
            psg_mode: MODE_TONE,
            auto_env_num: 0,
            auto_env_den: 0,
            dac: DacState::default(),
            timer: TimerFx::default(),
        }
    }

    fn volume_reg(&self, muted: bool) -> u8 {
        if muted || !self.state.active {
            0
        } else {
            ((self.state.out_vol & 15) as u8) | ((self.psg_mode & MODE_ENVELOPE) << 2)
        }
    }

    fn drives_volume_per_sample(&self) -> bool {
        self.dac.is_playing()
            || (self.timer.mode == TimerMode::Pwm && self.timer.is_active() && self.state.active)
    }
}

#[derive(Debug, Clone, Default)]
struct EnvelopeState {
    period: i32,
    mode: u8,
    slide: i32,
    slide_low: i32,
}

#[derive(Debug, Clone, Default)]
struct DacSample {
    data: Vec<i8>,
    loop_range: Option<(usize, usize)>,
    rate: u32,
}

/// AY-3-8910 / YM2149 chip instance
#[derive(Debug)]
pub struct Ay8910 {
    base: ChipBase,
    core: AyCore,
    chan: [AyChannel; CHANNELS],
    env: EnvelopeState,
    io_out: [bool; 2],
    dac_samples: Vec<DacSample>,
}

impl Ay8910 {
    /// New instance at power-on state
    pub fn new(config: &ChipConfig, resources: Arc<SongResources>) -> Self {
        let clock = config.clock();
        let rate = clock / 32;
        let dac_samples = render_dac_samples(&resources);
        let mut chip = Self {
            base: ChipBase::new(config, resources, CHANNELS, REGISTERS, clock, rate),
            core: AyCore::new(config.psg_variant),
            chan: std::array::from_fn(|_| AyChannel::new()),
            env: EnvelopeState::default(),
            io_out: [false; 2],
            dac_samples,
        };
        chip.reset();
        chip
    }

    fn note_period(&self, note: i32) -> i32 {
        period_for_note(self.base.clock as f64, TONE_DIVIDER, note)
    }

    fn write_env_period(&mut self) {
        let period = self.env.period;
        self.base.port.write(0x0b, (period & 0xff) as u8);
        self.base.port.write(0x0c, ((period >> 8) & 0xff) as u8);
    }

    fn start_dac(&mut self, c: usize, ins: &Instrument, note: i32) {
        let playable = ins
            .sample
            .filter(|&s| self.dac_samples.get(s).is_some_and(|d| !d.data.is_empty()));
        match playable {
            Some(s) => {
                let note = if note == NOTE_NULL { self.chan[c].state.note } else { note };
                let center = self.dac_samples[s].rate as f64;
                let rate = center * note_hz(note) / note_hz(NOTE_C4);
                self.chan[c].dac.start(s, rate.round() as u32);
            }
            None => {
                log::debug!("AY channel {c}: sample instrument without a playable sample");
                self.chan[c].dac.stop();
            }
        }
    }

    fn step_envelope_slide(&mut self) {
        if self.env.slide == 0 {
            return;
        }
        self.env.slide_low += self.env.slide;
        while self.env.slide_low > 7 {
            self.env.slide_low -= 8;
            if self.env.period < 0xffff {
                self.env.period += 1;
                self.write_env_period();
            }
        }
        while self.env.slide_low < -7 {
            self.env.slide_low += 8;
            if self.env.period > 0 {
                self.env.period -= 1;
                self.write_env_period();
            }
        }
    }
}

fn render_dac_samples(resources: &SongResources) -> Vec<DacSample> {
    resources
        .samples
        .iter()
        .map(|s| DacSample {
            data: s.to_pcm8(),
            loop_range: s.loop_start().zip(s.loop_end()),
            rate: s.rate(),
        })
        .collect()
}

impl ChipDispatch for Ay8910 {
    fn base(&self) -> &ChipBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChipBase {
        &mut self.base
    }

    fn model(&self) -> ChipModel {
        ChipModel::Ay8910
    }

    fn tick(&mut self, _sys_tick: bool) {
        for i in 0..CHANNELS {
            let muted = self.base.is_muted(i);
            let port = &mut self.base.port;
            let ch = &mut self.chan[i];
            ch.state.std.next();

            let vol = ch.state.std.vol();
            if vol.had {
                ch.state.out_vol = (vol.val - (VOL_MAX - (ch.state.vol & 15))).max(0);
            }
            if !ch.state.apply_arp_macro() {
                ch.state.end_fixed_arp();
            }
            let duty = ch.state.std.duty();
            if duty.had {
                port.stage(0x06, (31 - duty.val).clamp(0, 31) as u8);
            }
            let wave = ch.state.std.wave();
            if wave.had {
                ch.psg_mode = ((wave.val + 1) & 7) as u8;
            }
            ch.state.apply_pitch_macro();
            ch.state.settle_phase();

            let mut env_period = None;
            if ch.state.freq_changed || ch.state.key_on || ch.state.key_off {
                let freq = clamp_freq(ch.state.bent_freq(true), 0, MAX_PERIOD);
                ch.state.freq = freq;
                port.stage(i * 2, (freq & 0xff) as u8);
                port.stage(i * 2 + 1, (freq >> 8) as u8);
                if ch.state.key_on {
                    ch.timer.restart();
                }
                if ch.state.freq_changed && ch.auto_env_num > 0 && ch.auto_env_den > 0 {
                    env_period = Some((freq * ch.auto_env_den / ch.auto_env_num) >> 4);
                }
                ch.timer.update_period(freq);
                ch.state.key_on = false;
                ch.state.key_off = false;
                ch.state.freq_changed = false;
            }

            if !ch.drives_volume_per_sample() {
                port.stage(8 + i, ch.volume_reg(muted));
            }

            if let Some(period) = env_period {
                self.env.period = period;
                self.write_env_period();
            }
        }

        let tone = std::array::from_fn(|i| {
            self.chan[i].psg_mode & MODE_TONE != 0 && !self.chan[i].dac.is_playing()
        });
        let noise = std::array::from_fn(|i| {
            self.chan[i].psg_mode & MODE_NOISE != 0 && !self.chan[i].dac.is_playing()
        });
        self.base
            .port
            .stage(0x07, MixerFlags::for_channels(tone, noise, self.io_out).bits());

        self.step_envelope_slide();
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
                match ins.filter(|i| i.plays_sample()) {
                    Some(sample_ins) => self.start_dac(c, sample_ins, cmd.value),
                    None => self.chan[c].dac.stop(),
                }
                let clock = self.base.clock as f64;
                self.chan[c]
                    .state
                    .note_on(cmd.value, ins, |n| period_for_note(clock, TONE_DIVIDER, n));
            }
            CommandKind::NoteOff => {
                self.chan[c].dac.stop();
                self.chan[c].state.note_off();
            }
            CommandKind::NoteOffEnv | CommandKind::EnvRelease => {
                self.chan[c].state.env_release();
            }
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
                state.std.init(resources.instrument(state.ins));
                state.in_porta = cmd.value != 0;
            }
            CommandKind::SamplePos => {
                let dac = &mut self.chan[c].dac;
                if let Some(len) = dac.sample.and_then(|s| self.dac_samples.get(s)).map(|d| d.data.len()) {
                    dac.pos = (cmd.value.max(0) as usize).min(len.saturating_sub(1));
                }
            }
            CommandKind::StdNoiseMode => {
                if (0..16).contains(&cmd.value) {
                    self.chan[c].psg_mode = ((cmd.value + 1) & 7) as u8;
                }
            }
            CommandKind::StdNoiseFreq => {
                self.base.port.stage(0x06, (31 - cmd.value).clamp(0, 31) as u8);
            }
            CommandKind::MacroOff | CommandKind::MacroOn => {
                if let Some(kind) = MacroKind::from_index(cmd.value.max(0) as usize) {
                    self.chan[c].state.std.mask(kind, cmd.kind == CommandKind::MacroOff);
                }
            }
            CommandKind::AlwaysSetVolume => return 0,
            CommandKind::AyEnvelopeSet => {
                self.env.mode = ((cmd.value >> 4) & 15) as u8;
                self.base.port.stage(0x0d, self.env.mode);
                let ch = &mut self.chan[c];
                if cmd.value & 15 != 0 {
                    ch.psg_mode |= MODE_ENVELOPE;
                } else {
                    ch.psg_mode &= !MODE_ENVELOPE;
                }
            }
            CommandKind::AyEnvelopeLow => {
                self.env.period = (self.env.period & 0xff00) | (cmd.value & 0xff);
                self.write_env_period();
            }
            CommandKind::AyEnvelopeHigh => {
                self.env.period = (self.env.period & 0xff) | ((cmd.value & 0xff) << 8);
                self.write_env_period();
            }
            CommandKind::AyEnvelopeSlide => self.env.slide = cmd.value,
            CommandKind::AyAutoEnvelope => {
                let ch = &mut self.chan[c];
                ch.auto_env_num = (cmd.value >> 4) & 15;
                ch.auto_env_den = cmd.value & 15;
                ch.state.freq_changed = true;
            }
            CommandKind::AyIoWrite => {
                let io = (cmd.value & 1) as usize;
                self.io_out[io] = true;
                self.base.port.write(0x0e + io, (cmd.value2 & 0xff) as u8);
            }
            CommandKind::AyTimerFx => {
                let timer = &mut self.chan[c].timer;
                timer.mode = TimerMode::from_value(cmd.value);
                timer.restart();
            }
            CommandKind::AyTimerFxRatio => {
                let ch = &mut self.chan[c];
                ch.timer.num = (cmd.value >> 4) & 15;
                ch.timer.den = cmd.value & 15;
                ch.timer.update_period(ch.state.freq);
            }
            CommandKind::AyTimerFxOffset => {
                let ch = &mut self.chan[c];
                ch.timer.offset = cmd.value;
                ch.timer.update_period(ch.state.freq);
            }
            _ => {}
        }
        HANDLED
    }

    fn acquire(&mut self, out: &mut [i16], frames: usize) {
        let rate = self.base.rate;
        for slot in out.iter_mut().take(frames) {
            for i in 0..CHANNELS {
                let muted = self.base.muted[i];
                let port = &mut self.base.port;
                let ch = &mut self.chan[i];
                if let Some(sample) = ch.dac.sample.and_then(|s| self.dac_samples.get(s)) {
                    let step = ch.dac.step(
                        port,
                        8 + i,
                        &sample.data,
                        sample.loop_range,
                        ch.state.out_vol,
                        muted,
                        rate,
                    );
                    if step == DacStep::Ended {
                        ch.state.active = false;
                        ch.state.phase = ChannelPhase::Idle;
                    }
                } else if ch.dac.is_playing() {
                    ch.dac.stop();
                }
                if ch.state.active {
                    let vol_reg = ch.volume_reg(muted);
                    ch.timer.step(port, i, vol_reg, self.env.mode);
                }
            }

            apply_next_write(&mut self.base.port, &mut self.core);
            let (mix, _) = self.core.clock();
            *slot = mix.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            for (i, osc) in self.base.osc.iter_mut().enumerate() {
                osc.push_clamped(self.core.channel_output(i));
            }
        }
    }

    fn reset(&mut self) {
        self.base.reset();
        self.core.reset();
        for ch in &mut self.chan {
            *ch = AyChannel::new();
        }
        self.env = EnvelopeState::default();
        self.io_out = [false; 2];
        log::debug!("AY-3-8910 reset ({} Hz)", self.base.clock);
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
        self.write_env_period();
        self.base.port.write(0x0d, self.env.mode);
    }

    fn set_resources(&mut self, resources: Arc<SongResources>) {
        self.dac_samples = render_dac_samples(&resources);
        self.base.resources = resources;
    }

    fn key_off_affects_arp(&self, _ch: usize) -> bool {
        true
    }
}
