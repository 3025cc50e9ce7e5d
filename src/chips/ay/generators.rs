//! PSG sound generators
//!
//! All generators are stepped once per internal phase (chip clock / 8).

/// Tone generator for one channel
///
/// The output flips every `period` phases, so one full cycle lasts
/// `16 * period` chip clocks.
#[derive(Clone, Debug, Default)]
pub struct ToneGenerator {
    counter: u32,
    period: u32,
    output: bool,
}

impl ToneGenerator {
    /// Set the 12-bit period (0 behaves as 1)
    #[inline]
    pub fn set_period(&mut self, period: u32) {
        self.period = period.max(1);
    }

    /// Current period
    #[inline]
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Advance one phase and return the square output
    #[inline]
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.period {
            self.counter = 0;
            self.output = !self.output;
        }
        self.output
    }

    /// Current output
    #[inline]
    pub fn output(&self) -> bool {
        self.output
    }

    /// Restart the waveform
    pub fn reset(&mut self) {
        self.counter = 0;
        self.period = 1;
        self.output = false;
    }
}

/// Shared noise generator (17-bit LFSR, taps at bits 13 and 16)
///
/// Runs at half the tone rate: one shift every `2 * period` phases.
#[derive(Clone, Debug)]
pub struct NoiseGenerator {
    counter: u32,
    period: u32,
    lfsr: u32,
    output: bool,
}

impl NoiseGenerator {
    /// Fresh generator (LFSR seeded with 1)
    pub fn new() -> Self {
        Self {
            counter: 0,
            period: 1,
            lfsr: 1,
            output: false,
        }
    }

    /// Set the 5-bit period (0 behaves as 1)
    #[inline]
    pub fn set_period(&mut self, period: u32) {
        self.period = period.max(1);
    }

    /// Advance one phase
    #[inline]
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.period * 2 {
            self.counter = 0;
            let lsb = self.lfsr & 1;
            self.lfsr >>= 1;
            if lsb != 0 {
                self.lfsr ^= 0x12000;
            }
            self.output = lsb != 0;
        }
        self.output
    }

    /// Current output
    #[inline]
    pub fn output(&self) -> bool {
        self.output
    }

    /// Reseed
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        Self::new()
    }
}

const ENV_MASK: i32 = 0x1f;

/// Envelope generator: 16 shapes, 32 steps per ramp
///
/// Shapes without the continue bit behave like their continuing
/// counterpart with hold set and alternate equal to attack.
#[derive(Clone, Debug, Default)]
pub struct EnvelopeGenerator {
    counter: u32,
    period: u32,
    step: i32,
    attack: i32,
    hold: bool,
    alternate: bool,
    holding: bool,
}

impl EnvelopeGenerator {
    /// Fresh generator
    pub fn new() -> Self {
        Self {
            period: 1,
            ..Self::default()
        }
    }

    /// Set the 16-bit period (0 behaves as 1)
    #[inline]
    pub fn set_period(&mut self, period: u32) {
        self.period = period.max(1);
    }

    /// Load a shape from R13 and restart the envelope
    pub fn set_shape(&mut self, shape: u8) {
        self.attack = if shape & 0x04 != 0 { ENV_MASK } else { 0 };
        if shape & 0x08 == 0 {
            self.hold = true;
            self.alternate = self.attack != 0;
        } else {
            self.hold = shape & 0x01 != 0;
            self.alternate = shape & 0x02 != 0;
        }
        self.step = ENV_MASK;
        self.holding = false;
        self.counter = 0;
    }

    /// Advance one phase
    #[inline]
    pub fn tick(&mut self) {
        if self.holding {
            return;
        }
        self.counter += 1;
        if self.counter < self.period {
            return;
        }
        self.counter = 0;
        self.step -= 1;
        if self.step < 0 {
            if self.hold {
                if self.alternate {
                    self.attack ^= ENV_MASK;
                }
                self.holding = true;
                self.step = 0;
            } else {
                if self.alternate && (self.step & (ENV_MASK + 1)) != 0 {
                    self.attack ^= ENV_MASK;
                }
                self.step &= ENV_MASK;
            }
        }
    }

    /// Current level (0-31)
    #[inline]
    pub fn level(&self) -> u32 {
        (self.step ^ self.attack) as u32
    }

    /// Back to power-on
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
