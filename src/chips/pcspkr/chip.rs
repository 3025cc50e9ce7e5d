//! PC speaker core
//!
//! A PIT channel 2 square wave counted down 4 clocks per output sample,
//! followed by one of the speaker output stages. Register 0/1 hold the
//! divisor; a divisor of 0 gates the speaker off.

use crate::config::SpeakerType;
use crate::dispatch::ChipCore;

/// Clocks consumed per output sample
pub const CLOCK_DIVIDER: i32 = 4;

const CONE_CUT: f32 = 0.04;
const PIEZO_CUT: f32 = 0.05;
const PIEZO_RESONANCE: f32 = 0.06;

/// Register-level PC speaker emulation
#[derive(Debug, Clone)]
pub struct SpeakerCore {
    regs: [u8; 2],
    speaker: SpeakerType,
    pos: i32,
    low: f32,
    band: f32,
    square: i32,
    output: i32,
}

impl SpeakerCore {
    /// Silent core with the given output stage
    pub fn new(speaker: SpeakerType) -> Self {
        Self {
            regs: [0; 2],
            speaker,
            pos: 0,
            low: 0.0,
            band: 0.0,
            square: 0,
            output: 0,
        }
    }

    /// Current PIT divisor (0 = off)
    pub fn period(&self) -> u16 {
        u16::from_le_bytes(self.regs)
    }

    /// Output stage
    pub fn speaker(&self) -> SpeakerType {
        self.speaker
    }

    /// Advance the counter and report whether the wave is high
    fn step_counter(&mut self, threshold_pad: i32) -> bool {
        let freq = self.period() as i32;
        self.pos -= CLOCK_DIVIDER;
        if self.pos > freq {
            self.pos = freq;
        }
        while self.pos < 0 {
            if freq < 1 {
                self.pos = 1;
            } else {
                self.pos += freq;
            }
        }
        self.pos > (freq + threshold_pad) >> 1
    }

    fn filtered(value: f32) -> i32 {
        (value.clamp(-1.0, 1.0) * 32767.0) as i32
    }
}

impl ChipCore for SpeakerCore {
    fn write(&mut self, addr: u16, val: u8) {
        self.regs[(addr & 1) as usize] = val;
    }

    fn clock(&mut self) -> (i32, i32) {
        if self.period() == 0 {
            self.square = 0;
            self.output = match self.speaker {
                // let the filters ring down
                SpeakerType::Cone | SpeakerType::Piezo => self.settle(0.0),
                _ => 0,
            };
            return (self.output, self.output);
        }
        self.output = match self.speaker {
            SpeakerType::Unfiltered | SpeakerType::Real => {
                self.square = if self.step_counter(0) { 32767 } else { 0 };
                if self.speaker == SpeakerType::Real {
                    0
                } else {
                    self.square
                }
            }
            SpeakerType::Cone => {
                let high = self.step_counter(16);
                self.square = if high { 32767 } else { 0 };
                self.settle(if high { 1.0 } else { 0.0 })
            }
            SpeakerType::Piezo => {
                let high = self.step_counter(64);
                self.square = if high { 32767 } else { 0 };
                self.settle(if high { 1.0 } else { 0.0 })
            }
        };
        (self.output, self.output)
    }

    fn channel_output(&self, ch: usize) -> i32 {
        match ch {
            0 if self.speaker == SpeakerType::Real => self.square,
            0 => self.output,
            _ => 0,
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.speaker);
    }
}

impl SpeakerCore {
    /// Run the output filter one step toward `next`
    fn settle(&mut self, next: f32) -> i32 {
        match self.speaker {
            SpeakerType::Cone => {
                self.low += CONE_CUT * self.band;
                self.band += CONE_CUT * (next - self.low - self.band);
                Self::filtered((self.low + self.band) * 0.75)
            }
            SpeakerType::Piezo => {
                self.low += PIEZO_CUT * self.band;
                self.band += PIEZO_CUT * (next - self.low - PIEZO_RESONANCE * self.band);
                Self::filtered(self.band * 0.15 - (next - self.low) * 0.06)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_period(core: &mut SpeakerCore, period: u16) {
        core.write(0, (period & 0xff) as u8);
        core.write(1, (period >> 8) as u8);
    }

    #[test]
    fn test_square_period() {
        let mut core = SpeakerCore::new(SpeakerType::Unfiltered);
        set_period(&mut core, 400);
        let out: Vec<i32> = (0..400).map(|_| core.clock().0).collect();
        // 100 samples per cycle, 49 of them above the midpoint
        let highs = out.iter().filter(|&&s| s == 32767).count();
        assert_eq!(highs, 196);
        assert!(out.iter().all(|&s| s == 0 || s == 32767));
    }

    #[test]
    fn test_zero_period_is_silent() {
        let mut core = SpeakerCore::new(SpeakerType::Unfiltered);
        for _ in 0..64 {
            assert_eq!(core.clock(), (0, 0));
        }
    }

    #[test]
    fn test_cone_stays_bounded() {
        let mut core = SpeakerCore::new(SpeakerType::Cone);
        set_period(&mut core, 200);
        let out: Vec<i32> = (0..4000).map(|_| core.clock().0).collect();
        assert!(out.iter().any(|&s| s != 0));
        assert!(out.iter().all(|&s| (-32767..=32767).contains(&s)));
    }

    #[test]
    fn test_piezo_rings_down() {
        let mut core = SpeakerCore::new(SpeakerType::Piezo);
        set_period(&mut core, 300);
        for _ in 0..2000 {
            core.clock();
        }
        set_period(&mut core, 0);
        for _ in 0..20000 {
            core.clock();
        }
        assert!(core.clock().0.abs() < 16);
    }

    #[test]
    fn test_real_renders_silence_but_feeds_scope() {
        let mut core = SpeakerCore::new(SpeakerType::Real);
        set_period(&mut core, 400);
        let mut scope_high = false;
        for _ in 0..200 {
            assert_eq!(core.clock(), (0, 0));
            scope_high |= core.channel_output(0) == 32767;
        }
        assert!(scope_high);
    }
}
