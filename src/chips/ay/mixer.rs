//! Mixer control register (R7)

use bitflags::bitflags;

bitflags! {
    /// R7 bits; a set tone/noise bit disables that source
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MixerFlags: u8 {
        /// Channel A tone disable
        const TONE_A = 0x01;
        /// Channel B tone disable
        const TONE_B = 0x02;
        /// Channel C tone disable
        const TONE_C = 0x04;
        /// Channel A noise disable
        const NOISE_A = 0x08;
        /// Channel B noise disable
        const NOISE_B = 0x10;
        /// Channel C noise disable
        const NOISE_C = 0x20;
        /// IO port A is an output
        const IO_A_OUT = 0x40;
        /// IO port B is an output
        const IO_B_OUT = 0x80;
    }
}

impl MixerFlags {
    /// Build R7 from the enabled sources of each channel and the IO
    /// port directions
    pub fn for_channels(tone: [bool; 3], noise: [bool; 3], io_out: [bool; 2]) -> Self {
        let mut enabled = 0u8;
        for ch in 0..3 {
            enabled |= (tone[ch] as u8) << ch;
            enabled |= (noise[ch] as u8) << (ch + 3);
        }
        let mut flags = MixerFlags::from_bits_truncate(!enabled & 0x3f);
        flags.set(MixerFlags::IO_A_OUT, io_out[0]);
        flags.set(MixerFlags::IO_B_OUT, io_out[1]);
        flags
    }

    /// Raw register value
    pub fn from_register(value: u8) -> Self {
        MixerFlags::from_bits_truncate(value)
    }

    /// Tone enabled on a channel
    #[inline]
    pub fn tone_enabled(&self, ch: usize) -> bool {
        self.bits() & (1 << ch) == 0
    }

    /// Noise enabled on a channel
    #[inline]
    pub fn noise_enabled(&self, ch: usize) -> bool {
        self.bits() & (8 << ch) == 0
    }
}
