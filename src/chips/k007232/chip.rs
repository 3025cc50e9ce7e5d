//! K007232 emulation core
//!
//! Two PCM voices reading 7-bit unsigned samples from a banked ROM. Each
//! voice counts from its 12-bit pitch value up to 0x1000 once per output
//! sample and steps its address on every rollover. A byte with bit 7 set is
//! the end marker: the voice jumps back to the start register (when its loop
//! bit is set) or stops.
//!
//! The volume latches and bank registers sit outside the chip on real
//! boards; the core models them too so the register pool reads back one
//! consistent picture.

use crate::dispatch::{ChipCore, SampleMemory};

/// Sample memory size (24-bit addressing)
pub const MEMORY_SIZE: usize = 1 << 24;

/// Bank size; one voice addresses 17 bits within its bank
pub const BANK_SIZE: usize = 1 << 17;

/// Fill value and end marker
pub const END_MARKER: u8 = 0xc0;

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    pitch: u16,
    start: u32,
    addr: u32,
    counter: u16,
    data: u8,
    busy: bool,
    bank: u32,
    out: i32,
}

/// Register-level K007232 emulation with its off-chip latches
#[derive(Debug)]
pub struct K007232Core {
    voices: [Voice; 2],
    loop_bits: u8,
    mono_volume: u8,
    stereo_volume: [u8; 2],
    stereo: bool,
    memory: SampleMemory,
    outputs: [i32; 2],
}

impl K007232Core {
    /// New core; `stereo` routes the two external volume latches to the
    /// left/right outputs instead of the shared mono latch
    pub fn new(stereo: bool) -> Self {
        Self {
            voices: [Voice::default(); 2],
            loop_bits: 0,
            mono_volume: 0,
            stereo_volume: [0; 2],
            stereo,
            memory: SampleMemory::new(MEMORY_SIZE, END_MARKER),
            outputs: [0; 2],
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
    pub fn is_busy(&self, ch: usize) -> bool {
        self.voices.get(ch).is_some_and(|v| v.busy)
    }

    fn read(&self, voice: &Voice) -> u8 {
        let addr = ((voice.bank << 17) | (voice.addr & 0x1ffff)) as usize & (MEMORY_SIZE - 1);
        self.memory.data().get(addr).copied().unwrap_or(END_MARKER)
    }

    fn key_on(&mut self, ch: usize) {
        let mut voice = self.voices[ch];
        voice.addr = voice.start;
        voice.counter = voice.pitch;
        voice.data = self.read(&voice);
        voice.busy = voice.data & 0x80 == 0;
        self.voices[ch] = voice;
    }

    fn step_voice(&mut self, ch: usize) {
        let mut voice = self.voices[ch];
        if !voice.busy {
            self.voices[ch].out = 0;
            return;
        }
        voice.counter += 1;
        if voice.counter >= 0x1000 {
            voice.counter = voice.pitch;
            voice.addr = (voice.addr + 1) & 0x1ffff;
            voice.data = self.read(&voice);
            if voice.data & 0x80 != 0 {
                if self.loop_bits & (1 << ch) != 0 {
                    voice.addr = voice.start;
                    voice.data = self.read(&voice);
                } else {
                    voice.busy = false;
                }
            }
        }
        voice.out = if voice.busy {
            (voice.data & 0x7f) as i32 - 0x40
        } else {
            0
        };
        self.voices[ch] = voice;
    }
}

impl ChipCore for K007232Core {
    fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x00..=0x0b => {
                let ch = addr as usize / 6;
                let voice = &mut self.voices[ch];
                match addr % 6 {
                    0 => voice.pitch = (voice.pitch & 0xf00) | val as u16,
                    1 => voice.pitch = (voice.pitch & 0x0ff) | ((val as u16 & 0x0f) << 8),
                    2 => voice.start = (voice.start & 0x1ff00) | val as u32,
                    3 => voice.start = (voice.start & 0x100ff) | ((val as u32) << 8),
                    4 => voice.start = (voice.start & 0x0ffff) | ((val as u32 & 1) << 16),
                    _ => self.key_on(ch),
                }
            }
            0x0c => self.mono_volume = val,
            0x0d => self.loop_bits = val,
            0x10 | 0x11 => self.stereo_volume[addr as usize - 0x10] = val,
            0x12 | 0x13 => self.voices[addr as usize - 0x12].bank = val as u32,
            _ => {}
        }
    }

    fn clock(&mut self) -> (i32, i32) {
        self.step_voice(0);
        self.step_voice(1);
        let out = [self.voices[0].out, self.voices[1].out];
        if self.stereo {
            let mut left = 0;
            let mut right = 0;
            for ch in 0..2 {
                let vol = self.stereo_volume[ch];
                let l = out[ch] * (vol & 0x0f) as i32;
                let r = out[ch] * (vol >> 4) as i32;
                self.outputs[ch] = (l + r) << 4;
                left += l;
                right += r;
            }
            (left << 4, right << 4)
        } else {
            let l = out[0] * (self.mono_volume & 0x0f) as i32;
            let r = out[1] * (self.mono_volume >> 4) as i32;
            self.outputs = [l << 5, r << 5];
            let mix = (l + r) << 4;
            (mix, mix)
        }
    }

    fn channel_output(&self, ch: usize) -> i32 {
        self.outputs.get(ch).copied().unwrap_or(0)
    }

    fn reset(&mut self) {
        self.voices = [Voice::default(); 2];
        self.loop_bits = 0;
        self.mono_volume = 0;
        self.stereo_volume = [0; 2];
        self.outputs = [0; 2];
    }
}
