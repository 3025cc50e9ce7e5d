//! AY-3-8910 / YM2149 emulation core
//!
//! Four internal phases (chip clock / 8) are run per output sample and
//! averaged, giving an output rate of chip clock / 32.

use super::generators::{EnvelopeGenerator, NoiseGenerator, ToneGenerator};
use super::mixer::MixerFlags;
use crate::config::PsgVariant;
use crate::dc_filter::DcFilter;
use crate::dispatch::ChipCore;

/// Internal phases per output sample
pub const PHASES: i32 = 4;

/// YM2149 output levels (32 steps, logarithmic)
pub const YM_LEVELS: [i32; 32] = [
    0, 20, 33, 53, 68, 88, 105, 125, 155, 193, 223, 258, 315, 385, 450, 525, 629, 753, 880, 1029,
    1252, 1523, 1779, 2077, 2542, 3110, 3697, 4395, 5575, 7073, 8789, 10922,
];

/// AY-3-8910 output levels (16 steps)
pub const AY_LEVELS: [i32; 16] = [
    0, 109, 158, 230, 335, 497, 704, 1173, 1383, 2239, 3192, 4072, 5379, 6939, 8799, 10922,
];

/// Register-level PSG emulation
#[derive(Debug, Clone)]
pub struct AyCore {
    regs: [u8; 16],
    tone: [ToneGenerator; 3],
    noise: NoiseGenerator,
    envelope: EnvelopeGenerator,
    mixer: MixerFlags,
    variant: PsgVariant,
    outputs: [i32; 3],
    dc: DcFilter,
}

impl AyCore {
    /// Core using the given level table
    pub fn new(variant: PsgVariant) -> Self {
        let mut core = Self {
            regs: [0; 16],
            tone: Default::default(),
            noise: NoiseGenerator::new(),
            envelope: EnvelopeGenerator::new(),
            mixer: MixerFlags::all(),
            variant,
            outputs: [0; 3],
            dc: DcFilter::new(),
        };
        core.reset();
        core
    }

    /// Register contents
    pub fn registers(&self) -> &[u8; 16] {
        &self.regs
    }

    /// Output level for a 5-bit level index
    #[inline]
    fn level(&self, index: u32) -> i32 {
        match self.variant {
            PsgVariant::Ym2149 => YM_LEVELS[(index & 31) as usize],
            PsgVariant::Ay8910 => AY_LEVELS[((index & 31) >> 1) as usize],
        }
    }

    #[inline]
    fn channel_level(&self, ch: usize, env_level: u32) -> i32 {
        let vol = self.regs[8 + ch];
        if vol & 0x10 != 0 {
            self.level(env_level)
        } else {
            let v = (vol & 0x0f) as u32;
            if v == 0 {
                0
            } else {
                self.level(v * 2 + 1)
            }
        }
    }

    fn tone_period(&self, ch: usize) -> u32 {
        (((self.regs[ch * 2 + 1] & 0x0f) as u32) << 8) | self.regs[ch * 2] as u32
    }
}

impl ChipCore for AyCore {
    fn write(&mut self, addr: u16, val: u8) {
        let addr = (addr & 0x0f) as usize;
        self.regs[addr] = val;
        match addr {
            0..=5 => {
                let ch = addr >> 1;
                let period = self.tone_period(ch);
                self.tone[ch].set_period(period);
            }
            6 => self.noise.set_period((val & 0x1f) as u32),
            7 => self.mixer = MixerFlags::from_register(val),
            11 | 12 => {
                let period = ((self.regs[12] as u32) << 8) | self.regs[11] as u32;
                self.envelope.set_period(period);
            }
            13 => self.envelope.set_shape(val & 0x0f),
            _ => {}
        }
    }

    fn clock(&mut self) -> (i32, i32) {
        let mut acc = [0i32; 3];
        for _ in 0..PHASES {
            let noise = self.noise.tick();
            self.envelope.tick();
            let env = self.envelope.level();
            for (ch, sum) in acc.iter_mut().enumerate() {
                let tone = self.tone[ch].tick();
                let gate = (tone || !self.mixer.tone_enabled(ch))
                    && (noise || !self.mixer.noise_enabled(ch));
                if gate {
                    *sum += self.channel_level(ch, env);
                }
            }
        }
        for (out, sum) in self.outputs.iter_mut().zip(acc) {
            *out = sum / PHASES;
        }
        let mixed = self.dc.process(self.outputs.iter().sum());
        (mixed, mixed)
    }

    fn channel_output(&self, ch: usize) -> i32 {
        self.outputs.get(ch).copied().unwrap_or(0)
    }

    fn reset(&mut self) {
        self.regs = [0; 16];
        self.regs[7] = 0xff;
        for tone in &mut self.tone {
            tone.reset();
        }
        self.noise.reset();
        self.envelope.reset();
        self.mixer = MixerFlags::all();
        self.outputs = [0; 3];
        self.dc.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(core: &mut AyCore, n: usize) -> Vec<i32> {
        (0..n).map(|_| core.clock().0).collect()
    }

    #[test]
    fn test_silent_after_reset() {
        let mut core = AyCore::new(PsgVariant::Ym2149);
        assert!(render(&mut core, 100).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_tone_channel_toggles() {
        let mut core = AyCore::new(PsgVariant::Ym2149);
        core.write(0, 20);
        core.write(1, 0);
        core.write(7, 0x3e);
        core.write(8, 0x0f);
        render(&mut core, 10);
        let outs: Vec<i32> = (0..40)
            .map(|_| {
                core.clock();
                core.channel_output(0)
            })
            .collect();
        assert!(outs.contains(&10922));
        assert!(outs.contains(&0));
    }

    #[test]
    fn test_disabled_sources_give_constant_level() {
        let mut core = AyCore::new(PsgVariant::Ay8910);
        core.write(7, 0x3f);
        core.write(9, 0x0f);
        core.clock();
        assert_eq!(core.channel_output(1), 10922);
        core.write(9, 0x07);
        core.clock();
        assert_eq!(core.channel_output(1), AY_LEVELS[7]);
    }

    #[test]
    fn test_envelope_mode_uses_envelope_level() {
        let mut core = AyCore::new(PsgVariant::Ym2149);
        core.write(7, 0x3f);
        core.write(11, 0xff);
        core.write(12, 0xff);
        core.write(13, 0x00);
        core.write(8, 0x10);
        core.clock();
        assert_eq!(core.channel_output(0), 10922);
    }
}
