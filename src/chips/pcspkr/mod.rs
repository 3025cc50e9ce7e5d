//! PC speaker model
//!
//! One square-wave voice from PIT channel 2. The two pool registers hold the
//! divisor that is currently sounding, 0 while the speaker is gated off.
//! With [`SpeakerType::Real`] the rendered output is silent and every
//! divisor change is handed to a background thread that programs the real
//! speaker (feature `real-out`).

pub mod chip;
#[cfg(feature = "real-out")]
pub mod real_out;

use std::sync::Arc;
#[cfg(feature = "real-out")]
use std::time::Duration;

pub use chip::SpeakerCore;
#[cfg(feature = "real-out")]
use real_out::{BeepSink, NullSink, PortSink, RealOutput};

use crate::channel::{ChannelState, ChannelStatus};
use crate::chips::ChipModel;
use crate::command::{Command, CommandKind, HANDLED};
use crate::config::{ChipConfig, SpeakerType};
use crate::dispatch::{apply_next_write, ChipBase, ChipCore, ChipDispatch};
use crate::freq::{clamp_freq, period_for_note};
use crate::instrument::SongResources;
use crate::macros::MacroKind;
use crate::Result;

/// Clock presets: IBM PC 1193182 Hz, PC-98 38400 * 52 and 38400 * 64
pub const CLOCKS: &[u32] = &[1_193_182, 38_400 * 52, 38_400 * 64];

const CHANNELS: usize = 1;
const REGISTERS: usize = 2;
const VOL_MAX: i32 = 1;

/// PC speaker instance
#[derive(Debug)]
pub struct PcSpeaker {
    base: ChipBase,
    core: SpeakerCore,
    chan: ChannelState,
    last_period: u16,
    #[cfg(feature = "real-out")]
    real: Option<RealOutput>,
}

impl PcSpeaker {
    /// New instance at power-on state
    ///
    /// A real-hardware speaker type opens `/dev/port`; when that fails the
    /// output thread still runs against a null sink.
    pub fn new(config: &ChipConfig, resources: Arc<SongResources>) -> Result<Self> {
        #[cfg(feature = "real-out")]
        if config.speaker_type == SpeakerType::Real {
            let sink: Box<dyn BeepSink> = match PortSink::open(PortSink::DEVICE) {
                Ok(sink) => Box::new(sink),
                Err(e) => {
                    log::warn!("real PC speaker unavailable, output discarded: {e}");
                    Box::new(NullSink)
                }
            };
            return Self::with_sink(config, resources, sink);
        }
        Ok(Self::build(config, resources))
    }

    /// New instance sending real-hardware output to `sink`
    ///
    /// The sink is only used with [`SpeakerType::Real`].
    #[cfg(feature = "real-out")]
    pub fn with_sink(
        config: &ChipConfig,
        resources: Arc<SongResources>,
        sink: Box<dyn BeepSink>,
    ) -> Result<Self> {
        let mut chip = Self::build(config, resources);
        if config.speaker_type == SpeakerType::Real {
            let latency = Duration::from_millis(config.real_out_latency_ms as u64);
            chip.real = Some(RealOutput::start(sink, latency)?);
        }
        Ok(chip)
    }

    fn build(config: &ChipConfig, resources: Arc<SongResources>) -> Self {
        let clock = config.clock();
        let mut chip = Self {
            base: ChipBase::new(config, resources, CHANNELS, REGISTERS, clock, clock / 4),
            core: SpeakerCore::new(config.speaker_type),
            chan: ChannelState::new(VOL_MAX),
            last_period: 0,
            #[cfg(feature = "real-out")]
            real: None,
        };
        chip.reset();
        chip
    }

    fn note_period(clock: u32, note: i32) -> i32 {
        period_for_note(clock as f64, 1.0, note)
    }

    /// Forward a divisor change heard `frame` samples into this block
    #[cfg(feature = "real-out")]
    fn forward(&self, period: u16, frame: usize) {
        if let Some(real) = &self.real {
            let delay = Duration::from_secs_f64(frame as f64 / self.base.rate.max(1) as f64);
            real.beep(period, delay);
        }
    }

    #[cfg(not(feature = "real-out"))]
    fn forward(&self, _period: u16, _frame: usize) {}
}

impl ChipDispatch for PcSpeaker {
    fn base(&self) -> &ChipBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ChipBase {
        &mut self.base
    }

    fn model(&self) -> ChipModel {
        ChipModel::PcSpeaker
    }

    fn tick(&mut self, _sys_tick: bool) {
        let muted = self.base.is_muted(0);
        let ch = &mut self.chan;
        ch.std.next();

        let vol = ch.std.vol();
        if vol.had {
            ch.out_vol = (ch.vol != 0 && vol.val != 0) as i32;
        }
        ch.apply_arp_macro();
        ch.apply_pitch_macro();
        ch.settle_phase();

        if ch.freq_changed || ch.key_on || ch.key_off {
            ch.freq = clamp_freq(ch.bent_freq(true) - 1, 0, 0xffff);
            ch.freq_changed = false;
            ch.key_on = false;
            ch.key_off = false;
        }
        let on = ch.active && ch.out_vol > 0 && !muted;
        let period = if on { ch.freq as u16 } else { 0 };
        self.base.port.stage(0, (period & 0xff) as u8);
        self.base.port.stage(1, (period >> 8) as u8);
        self.base.port.commit();
    }

    fn dispatch(&mut self, cmd: Command) -> i32 {
        if cmd.channel >= CHANNELS {
            return HANDLED;
        }
        let clock = self.base.clock;
        match cmd.kind {
            CommandKind::NoteOn => {
                let resources = Arc::clone(&self.base.resources);
                let ins = resources.instrument(self.chan.ins);
                self.chan.note_on(cmd.value, ins, |n| Self::note_period(clock, n));
            }
            CommandKind::NoteOff => self.chan.note_off(),
            CommandKind::NoteOffEnv | CommandKind::EnvRelease => self.chan.env_release(),
            CommandKind::Instrument => {
                if self.chan.ins != cmd.value || cmd.value2 == 1 {
                    self.chan.ins_changed = true;
                }
                self.chan.ins = cmd.value;
            }
            CommandKind::Volume => {
                self.chan.set_volume(cmd.value.clamp(0, VOL_MAX));
            }
            CommandKind::GetVolume => return self.chan.vol,
            CommandKind::GetVolMax => return VOL_MAX,
            CommandKind::Pitch => {
                self.chan.pitch = cmd.value;
                self.chan.freq_changed = true;
            }
            CommandKind::NotePorta => {
                let dest = Self::note_period(clock, cmd.value2);
                return self.chan.porta_toward(dest, cmd.value);
            }
            CommandKind::Legato => {
                self.chan.note = cmd.value;
                self.chan.base_freq = Self::note_period(clock, cmd.value);
                self.chan.freq_changed = true;
            }
            CommandKind::PrePorta => {
                let resources = Arc::clone(&self.base.resources);
                if self.chan.active && cmd.value2 != 0 {
                    self.chan.std.init(resources.instrument(self.chan.ins));
                }
                self.chan.in_porta = cmd.value != 0;
            }
            CommandKind::MacroOff | CommandKind::MacroOn => {
                if let Some(kind) = MacroKind::from_index(cmd.value.max(0) as usize) {
                    self.chan.std.mask(kind, cmd.kind == CommandKind::MacroOff);
                }
            }
            CommandKind::AlwaysSetVolume => return 1,
            _ => {}
        }
        HANDLED
    }

    fn acquire(&mut self, out: &mut [i16], frames: usize) {
        for (i, sample) in out.iter_mut().take(frames).enumerate() {
            apply_next_write(&mut self.base.port, &mut self.core);
            let period = self.core.period();
            // forward whole divisors only, not a half-written low/high pair
            if period != self.last_period && self.base.port.pending_writes() == 0 {
                self.last_period = period;
                self.forward(period, i);
            }
            let (out, _) = self.core.clock();
            *sample = out.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            self.base.osc[0].push_clamped(self.core.channel_output(0));
        }
    }

    fn reset(&mut self) {
        self.base.reset();
        self.core.reset();
        self.chan = ChannelState::new(VOL_MAX);
        if self.last_period != 0 {
            self.last_period = 0;
            self.forward(0, 0);
        }
        log::debug!(
            "PC speaker reset ({} Hz, {:?})",
            self.base.clock,
            self.core.speaker()
        );
    }

    fn channel_status(&self, ch: usize) -> Option<ChannelStatus> {
        (ch < CHANNELS).then(|| self.chan.status(self.base.is_muted(ch)))
    }

    fn force_ins(&mut self) {
        self.chan.ins_changed = true;
        self.chan.freq_changed = true;
        self.base.port.invalidate();
    }

    fn set_resources(&mut self, resources: Arc<SongResources>) {
        self.base.resources = resources;
    }

    fn notify_playback_stop(&mut self) {
        if self.last_period != 0 {
            self.last_period = 0;
            self.forward(0, 0);
        }
    }

    fn notify_ins_change(&mut self, ins: i32) {
        if self.chan.ins == ins {
            self.chan.ins_changed = true;
        }
    }

    fn key_off_affects_arp(&self, _ch: usize) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freq::NOTE_A4;
    use crate::instrument::Instrument;
    use crate::macros::Macro;

    fn chip(speaker: SpeakerType) -> PcSpeaker {
        let mut config = ChipConfig::new(ChipModel::PcSpeaker);
        config.speaker_type = speaker;
        PcSpeaker::build(&config, Arc::default())
    }

    fn period(chip: &PcSpeaker) -> u16 {
        u16::from_le_bytes([chip.register_pool()[0], chip.register_pool()[1]])
    }

    #[test]
    fn test_a4_period() {
        let mut chip = chip(SpeakerType::Unfiltered);
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_A4));
        chip.tick(true);
        // 1193182 / 440 = 2711.8
        assert_eq!(period(&chip), 2711);
    }

    #[test]
    fn test_period_clamps() {
        let mut chip = chip(SpeakerType::Unfiltered);
        chip.dispatch(Command::new(0, CommandKind::NoteOn, -60));
        chip.tick(true);
        assert_eq!(period(&chip), 0xffff);
    }

    #[test]
    fn test_note_off_and_mute_gate() {
        let mut chip = chip(SpeakerType::Unfiltered);
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_A4));
        chip.tick(true);
        assert_ne!(period(&chip), 0);
        chip.mute_channel(0, true);
        chip.tick(true);
        assert_eq!(period(&chip), 0);
        chip.mute_channel(0, false);
        chip.tick(true);
        assert_eq!(period(&chip), 2711);
        chip.dispatch(Command::new(0, CommandKind::NoteOff, 0));
        chip.tick(true);
        assert_eq!(period(&chip), 0);
    }

    #[test]
    fn test_volume_is_on_off() {
        let mut chip = chip(SpeakerType::Unfiltered);
        assert_eq!(chip.dispatch(Command::new(0, CommandKind::GetVolMax, 0)), 1);
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_A4));
        chip.dispatch(Command::new(0, CommandKind::Volume, 0));
        chip.tick(true);
        assert_eq!(period(&chip), 0);
        chip.dispatch(Command::new(0, CommandKind::Volume, 9));
        assert_eq!(chip.dispatch(Command::new(0, CommandKind::GetVolume, 0)), 1);
        chip.tick(true);
        assert_eq!(period(&chip), 2711);
    }

    #[test]
    fn test_volume_macro_gates() {
        let resources = SongResources {
            instruments: vec![Instrument {
                macros: vec![Macro::new(MacroKind::Vol, vec![1, 0, 1])],
                ..Instrument::default()
            }],
            samples: Vec::new(),
        };
        let mut chip = PcSpeaker::build(&ChipConfig::new(ChipModel::PcSpeaker), resources.shared());
        chip.dispatch(Command::new(0, CommandKind::Instrument, 0));
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_A4));
        let heard: Vec<bool> = (0..3)
            .map(|_| {
                chip.tick(true);
                period(&chip) != 0
            })
            .collect();
        assert_eq!(heard, vec![true, false, true]);
    }

    #[test]
    fn test_unfiltered_renders_square() {
        let mut chip = chip(SpeakerType::Unfiltered);
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_A4));
        chip.tick(true);
        let mut out = vec![0i16; 2048];
        chip.acquire(&mut out, 2048);
        assert!(out.contains(&i16::MAX));
        assert!(out[1..].contains(&0));
        chip.dispatch(Command::new(0, CommandKind::NoteOff, 0));
        chip.tick(true);
        chip.acquire(&mut out, 2048);
        assert!(out[1..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_real_type_is_silent() {
        let mut chip = chip(SpeakerType::Real);
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_A4));
        chip.tick(true);
        let mut out = vec![0i16; 1024];
        chip.acquire(&mut out, 1024);
        assert!(out.iter().all(|&s| s == 0));
        assert!(chip.osc_buffer(0).unwrap().latest(1024).iter().any(|&s| s != 0));
    }

    #[cfg(feature = "real-out")]
    #[test]
    fn test_real_output_receives_periods() {
        use parking_lot::Mutex;

        #[derive(Clone, Default)]
        struct Recorder(Arc<Mutex<Vec<u16>>>);

        impl BeepSink for Recorder {
            fn set_period(&mut self, period: u16) -> Result<()> {
                self.0.lock().push(period);
                Ok(())
            }
        }

        let recorder = Recorder::default();
        let mut config = ChipConfig::new(ChipModel::PcSpeaker);
        config.speaker_type = SpeakerType::Real;
        config.real_out_latency_ms = 0;
        let mut chip = PcSpeaker::with_sink(&config, Arc::default(), Box::new(recorder.clone())).unwrap();
        chip.dispatch(Command::new(0, CommandKind::NoteOn, NOTE_A4));
        chip.tick(true);
        let mut out = vec![0i16; 64];
        chip.acquire(&mut out, 64);
        chip.dispatch(Command::new(0, CommandKind::NoteOff, 0));
        chip.tick(true);
        chip.acquire(&mut out, 64);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recorder.0.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        drop(chip);
        // both changes, then the shutdown silence
        assert_eq!(*recorder.0.lock(), vec![2711, 0, 0]);
    }
}
