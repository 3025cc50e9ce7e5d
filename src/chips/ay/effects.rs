//! Sample-rate effects: DAC playback and timer effects
//!
//! Both run once per output sample inside `acquire` and talk to the chip
//! through immediate register writes, so their traffic shares the FIFO
//! (and its ordering) with the tick-rate writes.

use crate::registers::RegisterPort;

/// DAC playback cursor of one channel
#[derive(Debug, Clone, Default)]
pub struct DacState {
    /// Sample being played
    pub sample: Option<usize>,
    /// Read cursor (frames)
    pub pos: usize,
    /// Phase accumulator
    pub period: u32,
    /// Playback rate in Hz
    pub rate: u32,
    /// Last level written
    pub out: u8,
}

/// What a DAC step did to the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DacStep {
    /// Nothing to do this sample
    Idle,
    /// Still playing
    Playing,
    /// Reached the end of a non-looping sample
    Ended,
}

impl DacState {
    /// Start playing `sample` at `rate` Hz
    pub fn start(&mut self, sample: usize, rate: u32) {
        self.sample = Some(sample);
        self.pos = 0;
        self.period = 0;
        self.rate = rate;
        self.out = u8::MAX;
    }

    /// Stop playback
    pub fn stop(&mut self) {
        self.sample = None;
    }

    /// True while a sample is playing
    pub fn is_playing(&self) -> bool {
        self.sample.is_some()
    }

    /// Advance one output sample at `out_rate` Hz
    ///
    /// Each crossing of the rate accumulator writes the next sample value
    /// (scaled by `out_vol`, 0..15) to the volume register `reg`. The cursor
    /// stays below the end: it wraps into `loop_range` or stops playback.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        port: &mut RegisterPort,
        reg: usize,
        data: &[i8],
        loop_range: Option<(usize, usize)>,
        out_vol: i32,
        muted: bool,
        out_rate: u32,
    ) -> DacStep {
        if self.sample.is_none() || self.rate == 0 {
            return DacStep::Idle;
        }
        let end = loop_range.map_or(data.len(), |(_, e)| e.min(data.len()));
        if self.pos >= end {
            self.sample = None;
            return DacStep::Ended;
        }
        self.period += self.rate;
        while self.period >= out_rate {
            self.period -= out_rate;
            let level = if muted { 0 } else { dac_level(data[self.pos], out_vol) };
            if level != self.out {
                self.out = level;
                port.write(reg, level);
            }
            self.pos += 1;
            if self.pos >= end {
                match loop_range {
                    Some((start, _)) if start < end => self.pos = start,
                    _ => {
                        self.sample = None;
                        return DacStep::Ended;
                    }
                }
            }
        }
        DacStep::Playing
    }
}

/// 4-bit volume for a signed sample value at an output volume
#[inline]
pub fn dac_level(sample: i8, out_vol: i32) -> u8 {
    let unsigned = ((sample as u8) ^ 0x80) >> 4;
    (unsigned as i32 * out_vol.clamp(0, 15) / 15) as u8
}

/// Timer effect mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerMode {
    /// Disabled
    #[default]
    Off,
    /// Toggle the volume register between the output volume and silence
    Pwm,
    /// Retrigger the envelope shape register
    SyncBuzzer,
}

impl TimerMode {
    /// Mode for a command value
    pub fn from_value(value: i32) -> Self {
        match value {
            1 => TimerMode::Pwm,
            2 => TimerMode::SyncBuzzer,
            _ => TimerMode::Off,
        }
    }
}

/// Per-channel timer effect
///
/// The period is derived at tick rate from the tone period; the phase
/// advances per output sample.
#[derive(Debug, Clone, Default)]
pub struct TimerFx {
    /// Mode
    pub mode: TimerMode,
    /// Ratio numerator
    pub num: i32,
    /// Ratio denominator
    pub den: i32,
    /// Period offset in samples
    pub offset: i32,
    /// Period in samples
    pub period: i32,
    counter: i32,
    high: bool,
}

impl TimerFx {
    /// True when the effect is running
    pub fn is_active(&self) -> bool {
        self.mode != TimerMode::Off && self.num > 0 && self.den > 0
    }

    /// Recompute the period from a tone period (chip clock / 16 units)
    ///
    /// One output sample is 32 chip clocks.
    pub fn update_period(&mut self, tone_period: i32) {
        if self.num > 0 && self.den > 0 {
            let samples = tone_period as i64 * 16 * self.den as i64 / (self.num as i64 * 32);
            self.period = (samples as i32 + self.offset).max(1);
        }
    }

    /// Restart the phase
    pub fn restart(&mut self) {
        self.counter = 0;
        self.high = true;
    }

    /// Advance one output sample
    pub fn step(&mut self, port: &mut RegisterPort, ch: usize, vol_reg: u8, env_shape: u8) {
        if !self.is_active() {
            return;
        }
        self.counter += 1;
        if self.counter < self.period {
            return;
        }
        self.counter = 0;
        match self.mode {
            TimerMode::Pwm => {
                self.high = !self.high;
                port.write(8 + ch, if self.high { vol_reg } else { 0 });
            }
            TimerMode::SyncBuzzer => port.write(0x0d, env_shape),
            TimerMode::Off => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterWrite;

    #[test]
    fn test_dac_level() {
        assert_eq!(dac_level(127, 15), 15);
        assert_eq!(dac_level(-128, 15), 0);
        assert_eq!(dac_level(0, 15), 8);
        assert_eq!(dac_level(127, 0), 0);
    }

    #[test]
    fn test_dac_stops_at_end() {
        let mut port = RegisterPort::new(16, 64);
        let mut dac = DacState::default();
        dac.start(0, 100);
        let data = [127i8, -128, 127];
        let mut steps = Vec::new();
        for _ in 0..3 {
            steps.push(dac.step(&mut port, 8, &data, None, 15, false, 100));
        }
        assert_eq!(steps, vec![DacStep::Playing, DacStep::Playing, DacStep::Ended]);
        assert!(!dac.is_playing());
        let writes: Vec<u16> = std::iter::from_fn(|| port.pop()).map(|w| w.val).collect();
        assert_eq!(writes, vec![15, 0, 15]);
    }

    #[test]
    fn test_dac_loops() {
        let mut port = RegisterPort::new(16, 64);
        let mut dac = DacState::default();
        dac.start(0, 100);
        let data = [0i8, 127, -128];
        for _ in 0..10 {
            assert_eq!(
                dac.step(&mut port, 8, &data, Some((1, 3)), 15, false, 100),
                DacStep::Playing
            );
        }
        assert!(dac.pos >= 1 && dac.pos < 3);
    }

    #[test]
    fn test_pwm_toggles_volume() {
        let mut port = RegisterPort::new(16, 64);
        let mut timer = TimerFx {
            mode: TimerMode::Pwm,
            num: 1,
            den: 1,
            ..TimerFx::default()
        };
        timer.update_period(4);
        assert_eq!(timer.period, 2);
        timer.restart();
        for _ in 0..4 {
            timer.step(&mut port, 1, 12, 0);
        }
        assert_eq!(port.pop(), Some(RegisterWrite::new(9, 0)));
        assert_eq!(port.pop(), Some(RegisterWrite::new(9, 12)));
        assert!(port.pop().is_none());
    }
}
