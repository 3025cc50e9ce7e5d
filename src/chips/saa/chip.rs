//! SAA1099 emulation core
//!
//! Runs at chip clock / 256. Tone generators count in steps of
//! `2^octave` per sample and flip after `511 - N` steps; noise generators
//! shift once every 1, 2 or 4 samples, or on each rising edge of the first
//! tone generator of their trio.

use crate::dispatch::ChipCore;

/// Output scale per channel (amplitude 15, full envelope, tone and noise)
const CHANNEL_GAIN: i32 = 8;

#[derive(Debug, Clone, Copy, Default)]
struct Tone {
    counter: u32,
    level: bool,
}

#[derive(Debug, Clone, Copy)]
struct Noise {
    lfsr: u32,
    counter: u32,
}

impl Default for Noise {
    fn default() -> Self {
        Self { lfsr: 1, counter: 0 }
    }
}

impl Noise {
    #[inline]
    fn shift(&mut self) {
        let feedback = ((self.lfsr >> 17) ^ (self.lfsr >> 10)) & 1;
        self.lfsr = ((self.lfsr << 1) | (feedback ^ 1)) & 0x3ffff;
    }

    #[inline]
    fn output(&self) -> bool {
        self.lfsr & 1 != 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Envelope {
    control: u8,
    step: u8,
}

impl Envelope {
    fn enabled(&self) -> bool {
        self.control & 0x80 != 0
    }

    fn advance(&mut self) {
        self.step = ((self.step + 1) & 0x3f) | (self.step & 0x20);
    }

    /// Envelope level (0-15) for the left and right side
    fn levels(&self) -> (i32, i32) {
        let step = self.step as i32;
        let level = match (self.control >> 1) & 7 {
            0 => 0,
            1 => 15,
            2 => if step < 16 { 15 - step } else { 0 },
            3 => 15 - (step & 15),
            4 => match step {
                0..=15 => step,
                16..=31 => 31 - step,
                _ => 0,
            },
            5 => {
                let s = step & 31;
                if s < 16 {
                    s
                } else {
                    31 - s
                }
            }
            6 => if step < 16 { step } else { 0 },
            _ => step & 15,
        };
        let level = if self.control & 0x10 != 0 { level & 0x0e } else { level };
        let right = if self.control & 0x01 != 0 { 15 - level } else { level };
        (level, right)
    }
}

/// Register-level SAA1099 emulation
#[derive(Debug, Clone)]
pub struct SaaCore {
    regs: [u8; 32],
    tone: [Tone; 6],
    noise: [Noise; 2],
    envelope: [Envelope; 2],
    outputs: [i32; 6],
}

impl SaaCore {
    /// Powered-down core
    pub fn new() -> Self {
        Self {
            regs: [0; 32],
            tone: [Tone::default(); 6],
            noise: [Noise::default(); 2],
            envelope: [Envelope::default(); 2],
            outputs: [0; 6],
        }
    }

    /// Register contents
    pub fn registers(&self) -> &[u8; 32] {
        &self.regs
    }

    fn octave(&self, ch: usize) -> u32 {
        let reg = self.regs[0x10 + (ch >> 1)];
        (if ch & 1 == 0 { reg } else { reg >> 4 } & 7) as u32
    }

    fn step_tone(&mut self, ch: usize) -> bool {
        let limit = (511 - self.regs[0x08 + ch] as u32).max(1);
        let octave = self.octave(ch);
        let tone = &mut self.tone[ch];
        tone.counter += 1 << octave;
        let mut rising = false;
        while tone.counter >= limit {
            tone.counter -= limit;
            tone.level = !tone.level;
            rising |= tone.level;
        }
        rising
    }
}

impl Default for SaaCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipCore for SaaCore {
    fn write(&mut self, addr: u16, val: u8) {
        let addr = (addr & 0x1f) as usize;
        self.regs[addr] = val;
        match addr {
            0x18 | 0x19 => {
                let env = &mut self.envelope[addr - 0x18];
                env.control = val;
                env.step = 0;
            }
            0x1c if val & 0x02 != 0 => {
                for tone in &mut self.tone {
                    *tone = Tone::default();
                }
            }
            _ => {}
        }
    }

    fn clock(&mut self) -> (i32, i32) {
        if self.regs[0x1c] & 0x01 == 0 {
            self.outputs = [0; 6];
            return (0, 0);
        }
        let mut rising = [false; 6];
        for (ch, r) in rising.iter_mut().enumerate() {
            *r = self.step_tone(ch);
        }
        // internally clocked envelopes follow tone generators 1 and 4
        for gen in 0..2 {
            if self.envelope[gen].enabled()
                && self.envelope[gen].control & 0x20 == 0
                && rising[gen * 3 + 1]
            {
                self.envelope[gen].advance();
            }
        }
        let noise_ctl = self.regs[0x16];
        for gen in 0..2 {
            let mode = (noise_ctl >> (gen * 4)) & 3;
            let noise = &mut self.noise[gen];
            if mode == 3 {
                if rising[gen * 3] {
                    noise.shift();
                }
            } else {
                noise.counter += 1;
                if noise.counter >= 1 << mode {
                    noise.counter = 0;
                    noise.shift();
                }
            }
        }

        let tone_en = self.regs[0x14];
        let noise_en = self.regs[0x15];
        let (mut left, mut right) = (0, 0);
        for ch in 0..6 {
            let gen = ch / 3;
            let t = tone_en & (1 << ch) != 0;
            let n = noise_en & (1 << ch) != 0;
            let gate = match (t, n) {
                (true, true) => self.tone[ch].level as i32 + self.noise[gen].output() as i32,
                (true, false) => self.tone[ch].level as i32 * 2,
                (false, true) => self.noise[gen].output() as i32 * 2,
                (false, false) => 0,
            };
            let amp = self.regs[ch];
            let (mut amp_l, mut amp_r) = ((amp & 0x0f) as i32 * 16, (amp >> 4) as i32 * 16);
            if ch % 3 == 2 && self.envelope[gen].enabled() {
                let (env_l, env_r) = self.envelope[gen].levels();
                amp_l = amp_l * env_l / 15;
                amp_r = amp_r * env_r / 15;
            }
            let out_l = amp_l * gate * CHANNEL_GAIN;
            let out_r = amp_r * gate * CHANNEL_GAIN;
            self.outputs[ch] = (out_l + out_r) / 2;
            left += out_l;
            right += out_r;
        }
        (left, right)
    }

    fn channel_output(&self, ch: usize) -> i32 {
        self.outputs.get(ch).copied().unwrap_or(0)
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered() -> SaaCore {
        let mut core = SaaCore::new();
        core.write(0x1c, 1);
        core
    }

    #[test]
    fn test_power_off_is_silent() {
        let mut core = SaaCore::new();
        core.write(0x00, 0xff);
        core.write(0x14, 0x01);
        assert_eq!(core.clock(), (0, 0));
    }

    #[test]
    fn test_tone_half_period() {
        let mut core = powered();
        core.write(0x08, (511 - 300) as u8);
        core.write(0x10, 0x02);
        // 300 / 4 = 75 samples per half cycle
        let mut flips = 0;
        let mut last = core.tone[0].level;
        for _ in 0..750 {
            core.clock();
            if core.tone[0].level != last {
                flips += 1;
                last = core.tone[0].level;
            }
        }
        assert_eq!(flips, 10);
    }

    #[test]
    fn test_amplitude_nibbles_route_sides() {
        let mut core = powered();
        core.write(0x00, 0x0f);
        core.write(0x14, 0x01);
        core.write(0x08, 0xff);
        core.write(0x10, 0x07);
        let mut max_l = 0;
        let mut max_r = 0;
        for _ in 0..100 {
            let (l, r) = core.clock();
            max_l = max_l.max(l);
            max_r = max_r.max(r);
        }
        assert!(max_l > 0);
        assert_eq!(max_r, 0);
    }

    #[test]
    fn test_envelope_levels() {
        let mut env = Envelope {
            control: 0x80 | (2 << 1),
            step: 0,
        };
        assert_eq!(env.levels(), (15, 15));
        for _ in 0..15 {
            env.advance();
        }
        assert_eq!(env.levels().0, 0);
        for _ in 0..100 {
            env.advance();
        }
        assert_eq!(env.levels().0, 0);
        env.control |= 0x01;
        assert_eq!(env.levels(), (0, 15));
    }
}
