//! YMZ280B emulation core
//!
//! Eight voices playing 4-bit ADPCM, 8-bit or 16-bit PCM from a 16 MiB
//! memory. Addresses are kept in nibbles internally so all three formats
//! share one cursor; a voice advances `(fn + 1) / 256` source samples per
//! output sample and linearly interpolates between the last two.

use crate::adpcm::{nibble_at, AdpcmState};
use crate::dispatch::{ChipCore, SampleMemory};

/// Sample memory size (24-bit addressing)
pub const MEMORY_SIZE: usize = 1 << 24;

const FRAC_BITS: u32 = 8;
const FRAC_ONE: u32 = 1 << FRAC_BITS;

/// Playback format selected by control register bits 5-6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceMode {
    /// Bits clear: no playback
    #[default]
    Off,
    /// 4-bit ADPCM
    Adpcm,
    /// 8-bit PCM
    Pcm8,
    /// 16-bit big-endian PCM
    Pcm16,
}

impl VoiceMode {
    fn from_control(ctrl: u8) -> Self {
        match (ctrl >> 5) & 3 {
            1 => VoiceMode::Adpcm,
            2 => VoiceMode::Pcm8,
            3 => VoiceMode::Pcm16,
            _ => VoiceMode::Off,
        }
    }

    fn nibbles_per_sample(self) -> u32 {
        match self {
            VoiceMode::Adpcm => 1,
            VoiceMode::Pcm8 => 2,
            VoiceMode::Pcm16 => 4,
            VoiceMode::Off => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    fnum: u16,
    looping: bool,
    mode: VoiceMode,
    keyon: bool,
    playing: bool,
    ended: bool,
    level: u8,
    pan: u8,
    start: u32,
    loop_start: u32,
    loop_end: u32,
    stop: u32,
    position: u32,
    adpcm: AdpcmState,
    loop_adpcm: AdpcmState,
    loop_count: u32,
    output_pos: u32,
    prev: i16,
    curr: i16,
}

impl Voice {
    fn output_step(&self) -> u32 {
        let fnum = if self.mode == VoiceMode::Adpcm {
            self.fnum & 0xff
        } else {
            self.fnum & 0x1ff
        };
        fnum as u32 + 1
    }

    /// Left/right gain (0-255) from level and pan
    fn gains(&self) -> (i32, i32) {
        let level = self.level as i32;
        let pan = self.pan as i32;
        match pan {
            8 => (level, level),
            0..=7 => (level, if pan == 0 { 0 } else { level * (pan - 1) / 7 }),
            _ => (level * (15 - pan) / 7, level),
        }
    }
}

/// Register-level YMZ280B emulation
#[derive(Debug)]
pub struct YmzCore {
    voices: [Voice; 8],
    keyon_enable: bool,
    memory: SampleMemory,
    outputs: [i32; 8],
}

impl YmzCore {
    /// Powered-on core with empty memory
    pub fn new() -> Self {
        Self {
            voices: [Voice::default(); 8],
            keyon_enable: false,
            memory: SampleMemory::new(MEMORY_SIZE, 0),
            outputs: [0; 8],
        }
    }

    /// Sample memory
    pub fn memory(&self) -> &SampleMemory {
        &self.memory
    }

    /// Sample memory, for rendering
    pub fn memory_mut(&mut self) -> &mut SampleMemory {
        &mut self.memory
    }

    /// True while a voice is playing
    pub fn is_playing(&self, ch: usize) -> bool {
        self.voices.get(ch).is_some_and(|v| v.playing)
    }

    fn byte(&self, nibble_pos: u32) -> u8 {
        let addr = (nibble_pos >> 1) as usize & (MEMORY_SIZE - 1);
        self.memory.data().get(addr).copied().unwrap_or(0)
    }

    /// Decode the next source sample of a voice
    fn fetch(&mut self, v: usize) -> i16 {
        let mut voice = self.voices[v];
        if !voice.playing || voice.mode == VoiceMode::Off {
            return 0;
        }
        if voice.looping && voice.keyon && voice.position >= voice.loop_end {
            voice.position = voice.loop_start;
            voice.adpcm = voice.loop_adpcm;
            voice.loop_count += 1;
        }
        if voice.position >= voice.stop {
            voice.playing = false;
            voice.ended = true;
            self.voices[v] = voice;
            return 0;
        }
        if voice.looping && voice.position == voice.loop_start && voice.loop_count == 0 {
            voice.loop_adpcm = voice.adpcm;
        }
        let pos = voice.position;
        let sample = match voice.mode {
            VoiceMode::Adpcm => {
                let byte = [self.byte(pos & !1)];
                voice.adpcm.decode_nibble(nibble_at(&byte, (pos & 1) as usize))
            }
            VoiceMode::Pcm8 => ((self.byte(pos) as i8) as i16) << 8,
            VoiceMode::Pcm16 => i16::from_be_bytes([self.byte(pos), self.byte(pos + 2)]),
            VoiceMode::Off => 0,
        };
        voice.position += voice.mode.nibbles_per_sample();
        self.voices[v] = voice;
        sample
    }

    fn step_voice(&mut self, v: usize) -> (i32, i32) {
        let voice = self.voices[v];
        if !voice.playing && voice.prev == 0 && voice.curr == 0 {
            self.voices[v].output_pos = FRAC_ONE;
            return (0, 0);
        }
        let step = voice.output_step();
        let mut output_pos = voice.output_pos;
        let (mut prev, mut curr) = (voice.prev, voice.curr);
        while output_pos >= FRAC_ONE {
            output_pos -= FRAC_ONE;
            prev = curr;
            curr = if self.voices[v].playing {
                self.fetch(v)
            } else {
                // ramp back to silence after the end
                ((curr as i32 * 15) >> 4) as i16
            };
        }
        let voice = &mut self.voices[v];
        voice.prev = prev;
        voice.curr = curr;
        let interp = (prev as i32 * (FRAC_ONE - output_pos) as i32 + curr as i32 * output_pos as i32)
            >> FRAC_BITS;
        voice.output_pos = output_pos + step;
        let (l, r) = voice.gains();
        (interp * l / 256, interp * r / 256)
    }
}

impl Default for YmzCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChipCore for YmzCore {
    fn write(&mut self, addr: u16, val: u8) {
        let addr = addr & 0xff;
        if addr >= 0x80 {
            if addr == 0xff {
                self.keyon_enable = val & 0x80 != 0;
                if !self.keyon_enable {
                    for voice in &mut self.voices {
                        voice.playing = false;
                    }
                }
            }
            return;
        }
        let keyon_enable = self.keyon_enable;
        let voice = &mut self.voices[((addr >> 2) & 7) as usize];
        let val32 = val as u32;
        match addr & 0xe3 {
            0x00 => voice.fnum = (voice.fnum & 0x100) | val as u16,
            0x01 => {
                voice.fnum = (voice.fnum & 0xff) | ((val as u16 & 1) << 8);
                voice.looping = val & 0x10 != 0;
                let mut val = val;
                if val & 0x60 == 0 {
                    val &= 0x7f;
                } else {
                    voice.mode = VoiceMode::from_control(val);
                }
                let key = val & 0x80 != 0;
                if !voice.keyon && key && keyon_enable {
                    voice.playing = true;
                    voice.ended = false;
                    voice.position = voice.start;
                    voice.adpcm = AdpcmState::default();
                    voice.loop_adpcm = AdpcmState::default();
                    voice.loop_count = 0;
                } else if voice.keyon && !key {
                    voice.playing = false;
                }
                voice.keyon = key;
            }
            0x02 => voice.level = val,
            0x03 => voice.pan = val & 0x0f,
            0x20 => voice.start = (voice.start & 0x01fffe) | (val32 << 17),
            0x21 => voice.loop_start = (voice.loop_start & 0x01fffe) | (val32 << 17),
            0x22 => voice.loop_end = (voice.loop_end & 0x01fffe) | (val32 << 17),
            0x23 => voice.stop = (voice.stop & 0x01fffe) | (val32 << 17),
            0x40 => voice.start = (voice.start & 0x1fe01fe) | (val32 << 9),
            0x41 => voice.loop_start = (voice.loop_start & 0x1fe01fe) | (val32 << 9),
            0x42 => voice.loop_end = (voice.loop_end & 0x1fe01fe) | (val32 << 9),
            0x43 => voice.stop = (voice.stop & 0x1fe01fe) | (val32 << 9),
            0x60 => voice.start = (voice.start & 0x1fffe00) | (val32 << 1),
            0x61 => voice.loop_start = (voice.loop_start & 0x1fffe00) | (val32 << 1),
            0x62 => voice.loop_end = (voice.loop_end & 0x1fffe00) | (val32 << 1),
            0x63 => voice.stop = (voice.stop & 0x1fffe00) | (val32 << 1),
            _ => {}
        }
    }

    fn clock(&mut self) -> (i32, i32) {
        let mut left = 0;
        let mut right = 0;
        for v in 0..8 {
            let (l, r) = self.step_voice(v);
            self.outputs[v] = (l + r) / 2;
            left += l;
            right += r;
        }
        (left / 8, right / 8)
    }

    fn channel_output(&self, ch: usize) -> i32 {
        self.outputs.get(ch).copied().unwrap_or(0)
    }

    fn reset(&mut self) {
        self.voices = [Voice::default(); 8];
        self.keyon_enable = false;
        self.outputs = [0; 8];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(core: &mut YmzCore, v: u16, start: u32, end: u32, ctrl: u8) {
        let base = v * 4;
        for (reg, addr) in [(0x20, start), (0x23, end)] {
            core.write(reg + base, (addr >> 16) as u8);
            core.write(reg + 0x20 + base, (addr >> 8) as u8);
            core.write(reg + 0x40 + base, addr as u8);
        }
        core.write(0x02 + base, 255);
        core.write(0x03 + base, 8);
        core.write(base, 0xff);
        core.write(0x01 + base, ctrl);
    }

    #[test]
    fn test_pan_gains() {
        let mut voice = Voice {
            level: 255,
            pan: 8,
            ..Voice::default()
        };
        assert_eq!(voice.gains(), (255, 255));
        voice.pan = 1;
        assert_eq!(voice.gains(), (255, 0));
        voice.pan = 15;
        assert_eq!(voice.gains(), (0, 255));
    }

    #[test]
    fn test_key_on_needs_enable() {
        let mut core = YmzCore::new();
        core.memory_mut().place(0, &[0x40; 16], 1, None);
        program(&mut core, 0, 0, 16, 0xc0);
        assert!(!core.is_playing(0));
        core.write(0x01, 0x40);
        core.write(0xff, 0x80);
        core.write(0x01, 0xc0);
        assert!(core.is_playing(0));
    }

    #[test]
    fn test_pcm8_plays_to_stop_address() {
        let mut core = YmzCore::new();
        core.write(0xff, 0x80);
        core.memory_mut().place(0, &[0x40; 8], 1, None);
        program(&mut core, 0, 0, 8, 0xc0);
        let mut heard = false;
        for _ in 0..8 {
            let (l, _) = core.clock();
            heard |= l != 0;
        }
        assert!(heard);
        for _ in 0..4 {
            core.clock();
        }
        assert!(!core.is_playing(0));
        for _ in 0..200 {
            core.clock();
        }
        assert_eq!(core.clock(), (0, 0));
    }

    #[test]
    fn test_loop_keeps_playing() {
        let mut core = YmzCore::new();
        core.write(0xff, 0x80);
        core.memory_mut().place(0, &[0x20; 8], 1, None);
        for (reg, addr) in [(0x21u16, 2u32), (0x22, 6)] {
            core.write(reg, (addr >> 16) as u8);
            core.write(reg + 0x20, (addr >> 8) as u8);
            core.write(reg + 0x40, addr as u8);
        }
        program(&mut core, 0, 0, 8, 0xd0);
        for _ in 0..100 {
            core.clock();
        }
        assert!(core.is_playing(0));
    }
}
