//! Sound Unit emulation core
//!
//! Eight voices, each a 32-byte register block laid out little-endian:
//!
//! | offset | field |
//! |--------|-------|
//! | 0x00 | frequency (16 bit) |
//! | 0x02 | volume (signed) |
//! | 0x03 | pan (signed, negative is left) |
//! | 0x04 | shape 0-2, PCM 3, ring 4, filter mode 5-7 |
//! | 0x05 | phase reset 0, filter reset 1, PCM loop 2, timer sync 3, sweeps 4-6 |
//! | 0x06 | cutoff (16 bit) |
//! | 0x08 | duty, 0x09 resonance |
//! | 0x0a/0x0c/0x0e | PCM position, end and loop (16 bit) |
//! | 0x10/0x14/0x18 | frequency/volume/cutoff sweep: period (16 bit), amount, bound |
//! | 0x1e | sync timer (16 bit) |
//!
//! The core updates the frequency, volume, cutoff and PCM position fields
//! itself while sweeps and PCM playback run.

use crate::dispatch::{ChipCore, SampleMemory};

const CHANNELS: usize = 8;
const BLOCK: usize = 32;

const FLAG_PCM: u16 = 1 << 3;
const FLAG_RING: u16 = 1 << 4;
const FLAG_PHASE_RESET: u16 = 1 << 8;
const FLAG_FILTER_RESET: u16 = 1 << 9;
const FLAG_PCM_LOOP: u16 = 1 << 10;
const FLAG_TIMER_SYNC: u16 = 1 << 11;
const FLAG_FREQ_SWEEP: u16 = 1 << 12;
const FLAG_VOL_SWEEP: u16 = 1 << 13;
const FLAG_CUT_SWEEP: u16 = 1 << 14;

const LFSR_SEED: u32 = 0xaaaa;

/// Register-level Sound Unit emulation
#[derive(Debug)]
pub struct SuCore {
    regs: [u8; 256],
    memory: SampleMemory,
    cycle: [u32; CHANNELS],
    timer: [i32; CHANNELS],
    lfsr: [u32; CHANNELS],
    pcm_frac: [u32; CHANNELS],
    ns: [i8; CHANNELS],
    low: [i32; CHANNELS],
    high: [i32; CHANNELS],
    band: [i32; CHANNELS],
    sweep_timers: [[i32; 3]; CHANNELS],
    outputs: [i32; CHANNELS],
    sine: [i8; 256],
    triangle: [i8; 256],
    pan_left: [i32; 256],
    pan_right: [i32; 256],
}

impl SuCore {
    /// Core with `memory_size` bytes of PCM memory (8 KiB or 64 KiB)
    pub fn new(memory_size: usize) -> Self {
        let mut pan_left = [127; 256];
        let mut pan_right = [127; 256];
        for i in 0..128 {
            pan_left[i] = 127 - i as i32;
            pan_right[128 + i] = i as i32 - 1;
        }
        pan_right[128] = 0;
        Self {
            regs: [0; 256],
            memory: SampleMemory::new(memory_size, 0),
            cycle: [0; CHANNELS],
            timer: [0; CHANNELS],
            lfsr: [LFSR_SEED; CHANNELS],
            pcm_frac: [0; CHANNELS],
            ns: [0; CHANNELS],
            low: [0; CHANNELS],
            high: [0; CHANNELS],
            band: [0; CHANNELS],
            sweep_timers: [[1; 3]; CHANNELS],
            outputs: [0; CHANNELS],
            sine: std::array::from_fn(|i| ((i as f64 / 128.0 * std::f64::consts::PI).sin() * 127.0) as i8),
            triangle: std::array::from_fn(|i| if i > 127 { (255 - i) as i8 } else { i as i8 }),
            pan_left,
            pan_right,
        }
    }

    /// PCM memory
    pub fn memory(&self) -> &SampleMemory {
        &self.memory
    }

    /// PCM memory, for rendering
    pub fn memory_mut(&mut self) -> &mut SampleMemory {
        &mut self.memory
    }

    fn reg16(&self, ch: usize, off: usize) -> u16 {
        let at = ch * BLOCK + off;
        u16::from_le_bytes([self.regs[at], self.regs[at + 1]])
    }

    fn set_reg16(&mut self, ch: usize, off: usize, val: u16) {
        let at = ch * BLOCK + off;
        self.regs[at..at + 2].copy_from_slice(&val.to_le_bytes());
    }

    fn reg(&self, ch: usize, off: usize) -> u8 {
        self.regs[ch * BLOCK + off]
    }

    fn set_flag(&mut self, ch: usize, flag: u16, on: bool) {
        let flags = self.reg16(ch, 0x04);
        let flags = if on { flags | flag } else { flags & !flag };
        self.set_reg16(ch, 0x04, flags);
    }

    /// Current PCM position of a voice
    pub fn pcm_position(&self, ch: usize) -> u16 {
        self.reg16(ch, 0x0a)
    }

    fn waveform(&self, ch: usize, flags: u16) -> i8 {
        let cycle = self.cycle[ch];
        let duty = self.reg(ch, 0x08);
        let pulse = if ((cycle >> 15) & 127) as u8 > duty { 127i8 } else { 0 };
        let index = ((cycle >> 14) & 255) as usize;
        if flags & FLAG_PCM != 0 {
            let mask = self.memory.capacity().saturating_sub(1);
            let pos = self.reg16(ch, 0x0a) as usize & mask;
            return self.memory.data().get(pos).map_or(0, |&b| b as i8);
        }
        match flags & 7 {
            0 => pulse,
            1 => (cycle >> 14) as u8 as i8,
            2 => self.sine[index],
            3 => self.triangle[index],
            4 | 5 => ((self.lfsr[ch] & 1) * 127) as i8,
            6 => pulse ^ self.sine[index],
            _ => pulse ^ self.triangle[index],
        }
    }

    fn step_lfsr(&mut self, ch: usize, shape: u16) {
        let l = self.lfsr[ch];
        if shape == 4 {
            self.lfsr[ch] = (l >> 1) | (((l ^ (l >> 2) ^ (l >> 3) ^ (l >> 5)) & 1) << 31);
            return;
        }
        let tap = match (self.reg(ch, 0x08) >> 4) & 3 {
            0 => (l >> 3) ^ (l >> 4),
            1 => (l >> 2) ^ (l >> 3),
            2 => l ^ (l >> 2) ^ (l >> 3),
            _ => l ^ (l >> 2) ^ (l >> 3) ^ (l >> 5),
        };
        let mut next = (l >> 1) | ((tap & 1) << 5);
        if next & 63 == 0 {
            next = LFSR_SEED;
        }
        self.lfsr[ch] = next;
    }

    fn advance_pcm(&mut self, ch: usize, flags: u16) {
        let freq = self.reg16(ch, 0x00) as u32;
        self.pcm_frac[ch] += freq.min(0x8000);
        if self.pcm_frac[ch] < 0x8000 {
            return;
        }
        self.pcm_frac[ch] -= 0x8000;
        let mask = (self.memory.capacity().max(1) - 1) as u16;
        let looping = flags & FLAG_PCM_LOOP != 0;
        let end = self.reg16(ch, 0x0c);
        let restart = self.reg16(ch, 0x0e);
        let mut pos = self.reg16(ch, 0x0a);
        if pos < end {
            pos += 1;
            if pos == end && looping {
                pos = restart;
            }
            pos &= mask;
        } else if looping {
            pos = restart;
        }
        self.set_reg16(ch, 0x0a, pos);
    }

    fn advance_oscillator(&mut self, ch: usize, flags: u16) {
        let freq = self.reg16(ch, 0x00) as u32;
        let old = self.cycle[ch];
        let shape = flags & 7;
        let step = if shape == 5 {
            let mul = 1 << ((self.reg(ch, 0x08) >> 4) & 3);
            (freq * mul).wrapping_sub(freq >> 3)
        } else {
            freq
        };
        self.cycle[ch] = old.wrapping_add(step);
        if (self.cycle[ch] & 0xf8_0000) != (old & 0xf8_0000) {
            self.step_lfsr(ch, shape);
        }
        if flags & FLAG_TIMER_SYNC != 0 {
            self.timer[ch] -= 1;
            if self.timer[ch] <= 0 {
                self.cycle[ch] = 0;
                self.timer[ch] = self.reg16(ch, 0x1e) as i32;
                self.lfsr[ch] = LFSR_SEED;
            }
        }
    }

    fn filter(&mut self, ch: usize, input: i32, mode: u16) -> i32 {
        let cutoff = self.reg16(ch, 0x06) as i64;
        let damping = 256 - self.reg(ch, 0x09) as i64;
        let clamp = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        self.low[ch] = clamp(self.low[ch] as i64 + ((cutoff * self.band[ch] as i64) >> 16));
        self.high[ch] = clamp(input as i64 - self.low[ch] as i64 - ((damping * self.band[ch] as i64) >> 8));
        self.band[ch] = clamp(((cutoff * self.high[ch] as i64) >> 16) + self.band[ch] as i64);
        let mut out = 0i64;
        if mode & 1 != 0 {
            out += self.low[ch] as i64;
        }
        if mode & 2 != 0 {
            out += self.high[ch] as i64;
        }
        if mode & 4 != 0 {
            out += self.band[ch] as i64;
        }
        clamp(out)
    }

    fn sweep_volume(&mut self, ch: usize) {
        let ctl = self.reg(ch, 0x16);
        let amount = (ctl & 31) as i8;
        let up = ctl & 0x20 != 0;
        let looping = ctl & 0x40 != 0;
        let invert = ctl & 0x80 != 0;
        let bound = self.reg(ch, 0x17) as i32;
        let mut vol = self.reg(ch, 0x02) as i8;
        let mut flip = false;
        if up {
            vol = vol.wrapping_add(amount);
            if vol as i32 > bound && !looping {
                vol = bound as i8;
            }
            if vol < 0 {
                if !looping {
                    vol = 0x7f;
                } else if invert {
                    flip = true;
                    vol = (0xffu8.wrapping_sub(vol as u8)) as i8;
                } else {
                    vol &= 0x7f;
                }
            }
        } else {
            vol = vol.wrapping_sub(amount);
            if vol < 0 {
                if !looping {
                    vol = 0;
                } else if invert {
                    flip = true;
                    vol = vol.wrapping_neg();
                } else {
                    vol &= 0x7f;
                }
            }
            if (vol as i32) < bound && !looping {
                vol = bound as i8;
            }
        }
        if flip {
            self.regs[ch * BLOCK + 0x16] ^= 0x20;
        }
        self.regs[ch * BLOCK + 0x02] = vol as u8;
    }

    fn sweep_frequency(&mut self, ch: usize) {
        let ctl = self.reg(ch, 0x12);
        let amount = (ctl & 0x7f) as u32;
        let bound = self.reg(ch, 0x13) as u32;
        let freq = self.reg16(ch, 0x00) as u32;
        let next = if ctl & 0x80 != 0 {
            if freq > 0xffff - amount {
                0xffff
            } else {
                let f = (freq * (0x80 + amount)) >> 7;
                if (f >> 8) > bound {
                    bound << 8
                } else {
                    f
                }
            }
        } else if freq < amount {
            0
        } else {
            let f = (freq * (0xff - amount)) >> 8;
            if (f >> 8) < bound {
                bound << 8
            } else {
                f
            }
        };
        self.set_reg16(ch, 0x00, next.min(0xffff) as u16);
    }

    fn sweep_cutoff(&mut self, ch: usize) {
        let ctl = self.reg(ch, 0x1a);
        let amount = (ctl & 0x7f) as u32;
        let bound = self.reg(ch, 0x1b) as u32;
        let cutoff = self.reg16(ch, 0x06) as u32;
        let next = if ctl & 0x80 != 0 {
            if cutoff > 0xffff - amount {
                0xffff
            } else {
                let c = cutoff + amount;
                if (c >> 8) > bound {
                    bound << 8
                } else {
                    c
                }
            }
        } else if cutoff < amount {
            0
        } else {
            let c = ((2048 - amount) * cutoff) >> 11;
            if (c >> 8) < bound {
                bound << 8
            } else {
                c
            }
        };
        self.set_reg16(ch, 0x06, next.min(0xffff) as u16);
    }

    fn run_sweeps(&mut self, ch: usize, flags: u16) {
        for (slot, flag, period_reg) in [
            (0, FLAG_VOL_SWEEP, 0x14),
            (1, FLAG_FREQ_SWEEP, 0x10),
            (2, FLAG_CUT_SWEEP, 0x18),
        ] {
            if flags & flag == 0 {
                continue;
            }
            self.sweep_timers[ch][slot] -= 1;
            if self.sweep_timers[ch][slot] > 0 {
                continue;
            }
            self.sweep_timers[ch][slot] = self.reg16(ch, period_reg) as i32;
            match slot {
                0 => self.sweep_volume(ch),
                1 => self.sweep_frequency(ch),
                _ => self.sweep_cutoff(ch),
            }
        }
    }

    /// Run one voice for one sample, returning its left/right contribution
    fn step_voice(&mut self, ch: usize) -> (i32, i32) {
        let flags = self.reg16(ch, 0x04);
        let vol = self.reg(ch, 0x02) as i8;
        if vol == 0 && flags & FLAG_VOL_SWEEP == 0 {
            self.ns[ch] = 0;
            return (0, 0);
        }
        let mut ns = self.waveform(ch, flags);
        if flags & FLAG_RING != 0 {
            ns = ((ns as i32 * self.ns[(ch + 1) % CHANNELS] as i32) >> 7) as i8;
        }
        self.ns[ch] = ns;

        if flags & FLAG_PCM != 0 {
            self.advance_pcm(ch, flags);
        } else {
            self.advance_oscillator(ch, flags);
        }

        let gain = if flags & FLAG_PCM != 0 { 4 } else { 2 };
        let mut out = ns as i32 * vol as i32 * gain;
        let mode = (flags >> 5) & 7;
        if mode != 0 {
            out = self.filter(ch, out, mode);
        }
        let pan = self.reg(ch, 0x03) as usize;
        let left = ((out as i64 * self.pan_left[pan] as i64) >> 8) as i32;
        let right = ((out as i64 * self.pan_right[pan] as i64) >> 8) as i32;

        self.run_sweeps(ch, flags);
        if flags & FLAG_PHASE_RESET != 0 {
            self.cycle[ch] = 0;
            self.timer[ch] = self.reg16(ch, 0x1e) as i32;
            self.set_flag(ch, FLAG_PHASE_RESET, false);
        }
        if flags & FLAG_FILTER_RESET != 0 {
            self.low[ch] = 0;
            self.high[ch] = 0;
            self.band[ch] = 0;
            self.set_flag(ch, FLAG_FILTER_RESET, false);
        }
        (left, right)
    }
}

impl ChipCore for SuCore {
    fn write(&mut self, addr: u16, val: u8) {
        self.regs[(addr & 0xff) as usize] = val;
    }

    fn clock(&mut self) -> (i32, i32) {
        let mut left = 0;
        let mut right = 0;
        for ch in 0..CHANNELS {
            let (l, r) = self.step_voice(ch);
            self.outputs[ch] = (l + r) / 2;
            left += l;
            right += r;
        }
        ((left >> 2).clamp(-32767, 32767), (right >> 2).clamp(-32767, 32767))
    }

    fn channel_output(&self, ch: usize) -> i32 {
        self.outputs.get(ch).copied().unwrap_or(0)
    }

    fn reset(&mut self) {
        self.regs = [0; 256];
        self.cycle = [0; CHANNELS];
        self.timer = [0; CHANNELS];
        self.lfsr = [LFSR_SEED; CHANNELS];
        self.pcm_frac = [0; CHANNELS];
        self.ns = [0; CHANNELS];
        self.low = [0; CHANNELS];
        self.high = [0; CHANNELS];
        self.band = [0; CHANNELS];
        self.sweep_timers = [[1; 3]; CHANNELS];
        self.outputs = [0; CHANNELS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(core: &mut SuCore, ch: u16, freq: u16, vol: u8, control: u8) {
        let base = ch * 32;
        core.write(base, (freq & 0xff) as u8);
        core.write(base + 1, (freq >> 8) as u8);
        core.write(base + 2, vol);
        core.write(base + 4, control);
        core.write(base + 8, 63);
    }

    #[test]
    fn test_pulse_period() {
        let mut core = SuCore::new(8192);
        voice(&mut core, 0, 0x4000, 64, 0);
        let left: Vec<i32> = (0..256).map(|_| core.clock().0).collect();
        assert!(left[..128].iter().all(|&s| s == 0));
        // 127 * 64 * 2 panned centre (127/256) over 4
        assert!(left[128..].iter().all(|&s| s == 2016));
    }

    #[test]
    fn test_silent_at_zero_volume() {
        let mut core = SuCore::new(8192);
        voice(&mut core, 3, 0x4000, 0, 2);
        assert!((0..512).all(|_| core.clock() == (0, 0)));
    }

    #[test]
    fn test_pan_extremes() {
        let mut core = SuCore::new(8192);
        voice(&mut core, 0, 0x4000, 64, 0);
        core.write(3, (-127i8) as u8);
        let frames: Vec<(i32, i32)> = (0..256).map(|_| core.clock()).collect();
        assert!(frames.iter().all(|&(_, r)| r == 0));
        assert!(frames.iter().any(|&(l, _)| l != 0));
    }

    #[test]
    fn test_pcm_plays_to_end_and_holds() {
        let mut core = SuCore::new(8192);
        core.memory_mut().place(0, &[10, 20, 30, 40, 0], 1, None);
        voice(&mut core, 0, 0x8000, 127, FLAG_PCM as u8);
        core.write(0x0c, 4);
        let left: Vec<i32> = (0..8).map(|_| core.clock().0).collect();
        assert!(left[0] > 0 && left[3] > left[0]);
        assert_eq!(core.pcm_position(0), 4);
        assert!(left[4..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_pcm_loop_restarts() {
        let mut core = SuCore::new(8192);
        core.memory_mut().place(0, &[10, 20, 30, 40], 1, None);
        voice(&mut core, 0, 0x8000, 127, FLAG_PCM as u8);
        core.write(0x0c, 4);
        core.write(0x0e, 2);
        core.write(0x05, (FLAG_PCM_LOOP >> 8) as u8);
        for _ in 0..20 {
            core.clock();
            assert!(core.pcm_position(0) < 4);
        }
    }

    #[test]
    fn test_volume_sweep_down_to_bound() {
        let mut core = SuCore::new(8192);
        voice(&mut core, 0, 0x4000, 64, 0);
        core.write(0x14, 1);
        core.write(0x16, 4);
        core.write(0x17, 8);
        core.write(0x05, (FLAG_VOL_SWEEP >> 8) as u8);
        for _ in 0..100 {
            core.clock();
        }
        assert_eq!(core.reg(0, 0x02), 8);
    }

    #[test]
    fn test_sync_timer_resets_phase() {
        let mut core = SuCore::new(8192);
        voice(&mut core, 0, 0x100, 64, 1);
        core.write(0x1e, 10);
        core.write(0x05, (FLAG_TIMER_SYNC >> 8) as u8);
        for _ in 0..95 {
            core.clock();
        }
        assert!(core.cycle[0] <= 10 * 0x100);
    }

    #[test]
    fn test_phase_reset_flag_clears() {
        let mut core = SuCore::new(8192);
        voice(&mut core, 0, 0x1000, 64, 0);
        for _ in 0..10 {
            core.clock();
        }
        core.write(0x05, (FLAG_PHASE_RESET >> 8) as u8);
        core.clock();
        assert_eq!(core.cycle[0], 0);
        assert_eq!(core.reg(0, 0x05) & 1, 0);
    }
}
