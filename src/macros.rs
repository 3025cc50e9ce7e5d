//! Instrument macro engine
//!
//! A macro is a per-instrument value sequence stepped once per tick. Each
//! channel owns one [`MacroEngine`] holding a [`MacroSlot`] per
//! [`MacroKind`]. After [`MacroEngine::next`] a slot reports whether it
//! produced a value this step (`had`) and whether it will keep running
//! (`will`); models only touch registers for slots with `had` set.

use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;

/// Number of macro kinds
pub const MACRO_COUNT: usize = 12;

/// Parameter driven by a macro
///
/// The discriminant is also the index used by `MacroOff`/`MacroOn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacroKind {
    /// Volume
    Vol = 0,
    /// Arpeggio
    Arp = 1,
    /// Duty / noise frequency
    Duty = 2,
    /// Waveform
    Wave = 3,
    /// Pitch offset
    Pitch = 4,
    /// Chip specific #1
    Ex1 = 5,
    /// Chip specific #2
    Ex2 = 6,
    /// Chip specific #3
    Ex3 = 7,
    /// Left panning
    PanL = 8,
    /// Right panning
    PanR = 9,
    /// Phase reset trigger
    PhaseReset = 10,
    /// Chip specific #4
    Ex4 = 11,
}

impl MacroKind {
    /// Every kind, in index order
    pub const ALL: [MacroKind; MACRO_COUNT] = [
        MacroKind::Vol,
        MacroKind::Arp,
        MacroKind::Duty,
        MacroKind::Wave,
        MacroKind::Pitch,
        MacroKind::Ex1,
        MacroKind::Ex2,
        MacroKind::Ex3,
        MacroKind::PanL,
        MacroKind::PanR,
        MacroKind::PhaseReset,
        MacroKind::Ex4,
    ];

    /// Slot index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Kind for a raw index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// How macro values are interpreted
///
/// Arpeggio: relative offset from the note, or absolute (fixed) note.
/// Pitch: relative (accumulating) or absolute offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MacroMode {
    /// Offset / accumulate
    #[default]
    Relative,
    /// Fixed value
    Absolute,
}

/// One macro definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    /// Driven parameter
    pub kind: MacroKind,
    /// Step values
    pub values: Vec<i32>,
    /// Index to jump back to at the end
    #[serde(default)]
    pub loop_point: Option<usize>,
    /// Index to hold at until release
    #[serde(default)]
    pub release_point: Option<usize>,
    /// Value interpretation
    #[serde(default)]
    pub mode: MacroMode,
    /// Ticks per step (0 and 1 both mean every tick)
    #[serde(default = "default_speed")]
    pub speed: u8,
    /// Ticks to wait before the first step
    #[serde(default)]
    pub delay: u8,
}

fn default_speed() -> u8 {
    1
}

impl Macro {
    /// Plain sequence stepped every tick
    pub fn new(kind: MacroKind, values: Vec<i32>) -> Self {
        Self {
            kind,
            values,
            loop_point: None,
            release_point: None,
            mode: MacroMode::Relative,
            speed: 1,
            delay: 0,
        }
    }

    /// Set the loop point
    pub fn with_loop(mut self, loop_point: usize) -> Self {
        self.loop_point = Some(loop_point);
        self
    }

    /// Set the release point
    pub fn with_release(mut self, release_point: usize) -> Self {
        self.release_point = Some(release_point);
        self
    }

    /// Set the interpretation mode
    pub fn with_mode(mut self, mode: MacroMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set step speed and start delay
    pub fn with_timing(mut self, speed: u8, delay: u8) -> Self {
        self.speed = speed;
        self.delay = delay;
        self
    }
}

/// Running state of one macro on one channel
#[derive(Debug, Clone, Default)]
pub struct MacroSlot {
    /// Produced a value this step
    pub had: bool,
    /// Sequence is running
    pub has: bool,
    /// Sequence will produce values after this step
    pub will: bool,
    /// Sequence ended on this step
    pub finished: bool,
    /// Last value produced
    pub val: i32,
    /// Interpretation of `val`
    pub mode: MacroMode,
    /// Disabled by `MacroOff`
    pub masked: bool,
    values: Vec<i32>,
    loop_point: Option<usize>,
    release_point: Option<usize>,
    pos: usize,
    speed: u8,
    speed_left: u8,
    delay_left: u8,
    held: bool,
}

impl MacroSlot {
    fn init(&mut self, source: &Macro) {
        self.values.clear();
        self.values.extend_from_slice(&source.values);
        self.loop_point = source.loop_point.filter(|&p| p < source.values.len());
        self.release_point = source.release_point.filter(|&p| p < source.values.len());
        self.mode = source.mode;
        self.speed = source.speed.max(1);
        self.delay_left = source.delay;
        self.restart();
    }

    fn clear(&mut self) {
        self.values.clear();
        self.has = false;
        self.had = false;
        self.will = false;
        self.finished = false;
        self.held = false;
        self.val = 0;
        self.mode = MacroMode::Relative;
    }

    fn restart(&mut self) {
        self.pos = 0;
        self.speed_left = 0;
        self.held = false;
        self.had = false;
        self.finished = false;
        self.has = !self.values.is_empty();
        self.will = self.has;
    }

    /// Handle the end of the sequence; false when it stopped
    fn wrap(&mut self) -> bool {
        if self.pos < self.values.len() {
            return true;
        }
        let loop_ok = match (self.loop_point, self.release_point) {
            (Some(lp), Some(rel)) => lp >= rel,
            (Some(_), None) => true,
            (None, _) => false,
        };
        match self.loop_point {
            Some(lp) if loop_ok => {
                self.pos = lp;
                true
            }
            _ => {
                self.has = false;
                self.will = false;
                self.finished = true;
                false
            }
        }
    }

    fn step(&mut self, released: bool) {
        self.had = false;
        self.finished = false;
        if !self.has || self.masked {
            return;
        }
        if self.delay_left > 0 {
            self.delay_left -= 1;
            return;
        }
        if self.speed_left > 0 {
            self.speed_left -= 1;
            return;
        }
        self.speed_left = self.speed - 1;

        if self.held {
            if !released {
                return;
            }
            self.held = false;
            self.pos += 1;
            if !self.wrap() {
                return;
            }
        }

        self.val = self.values[self.pos];
        self.had = true;
        self.pos += 1;

        match self.release_point {
            Some(rel) if !released && self.pos > rel => match self.loop_point {
                Some(lp) if lp < rel => self.pos = lp,
                _ => {
                    self.pos = rel;
                    self.held = true;
                }
            },
            _ => {
                self.wrap();
            }
        }
        self.will = self.has;
    }

    fn release(&mut self) {
        // loop-before-release sustains until here
        if let (Some(rel), Some(lp)) = (self.release_point, self.loop_point) {
            if lp < rel && !self.held && self.has {
                self.pos = rel + 1;
                self.wrap();
            }
        }
    }
}

/// Per-channel set of macro slots
#[derive(Debug, Clone, Default)]
pub struct MacroEngine {
    slots: [MacroSlot; MACRO_COUNT],
    released: bool,
}

impl MacroEngine {
    /// Create an idle engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the macros of an instrument (or stop everything for `None`)
    ///
    /// Masks set by `MacroOff` survive.
    pub fn init(&mut self, instrument: Option<&Instrument>) {
        self.released = false;
        for slot in &mut self.slots {
            slot.clear();
        }
        if let Some(ins) = instrument {
            for source in &ins.macros {
                self.slots[source.kind.index()].init(source);
            }
        }
    }

    /// Advance every running macro by one tick
    pub fn next(&mut self) {
        let released = self.released;
        for slot in &mut self.slots {
            slot.step(released);
        }
    }

    /// Leave release points; loops after them start applying
    pub fn release(&mut self) {
        self.released = true;
        for slot in &mut self.slots {
            slot.release();
        }
    }

    /// True once [`release`](Self::release) was called since the last init
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Mask or unmask one macro
    pub fn mask(&mut self, kind: MacroKind, masked: bool) {
        self.slots[kind.index()].masked = masked;
    }

    /// Restart one macro from its first step
    pub fn restart(&mut self, kind: MacroKind) {
        self.slots[kind.index()].restart();
    }

    /// Slot for a kind
    #[inline]
    pub fn get(&self, kind: MacroKind) -> &MacroSlot {
        &self.slots[kind.index()]
    }

    /// True if any macro is still running
    pub fn any_running(&self) -> bool {
        self.slots.iter().any(|s| s.has)
    }

    /// Volume slot
    pub fn vol(&self) -> &MacroSlot {
        self.get(MacroKind::Vol)
    }

    /// Arpeggio slot
    pub fn arp(&self) -> &MacroSlot {
        self.get(MacroKind::Arp)
    }

    /// Duty slot
    pub fn duty(&self) -> &MacroSlot {
        self.get(MacroKind::Duty)
    }

    /// Waveform slot
    pub fn wave(&self) -> &MacroSlot {
        self.get(MacroKind::Wave)
    }

    /// Pitch slot
    pub fn pitch(&self) -> &MacroSlot {
        self.get(MacroKind::Pitch)
    }

    /// Extended slot 1
    pub fn ex1(&self) -> &MacroSlot {
        self.get(MacroKind::Ex1)
    }

    /// Extended slot 2
    pub fn ex2(&self) -> &MacroSlot {
        self.get(MacroKind::Ex2)
    }

    /// Extended slot 3
    pub fn ex3(&self) -> &MacroSlot {
        self.get(MacroKind::Ex3)
    }

    /// Extended slot 4
    pub fn ex4(&self) -> &MacroSlot {
        self.get(MacroKind::Ex4)
    }

    /// Left panning slot
    pub fn pan_l(&self) -> &MacroSlot {
        self.get(MacroKind::PanL)
    }

    /// Right panning slot
    pub fn pan_r(&self) -> &MacroSlot {
        self.get(MacroKind::PanR)
    }

    /// Phase reset slot
    pub fn phase_reset(&self) -> &MacroSlot {
        self.get(MacroKind::PhaseReset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Instrument;

    fn engine_with(m: Macro) -> MacroEngine {
        let mut ins = Instrument::default();
        ins.macros.push(m);
        let mut engine = MacroEngine::new();
        engine.init(Some(&ins));
        engine
    }

    fn run(engine: &mut MacroEngine, kind: MacroKind, ticks: usize) -> Vec<Option<i32>> {
        (0..ticks)
            .map(|_| {
                engine.next();
                let slot = engine.get(kind);
                slot.had.then_some(slot.val)
            })
            .collect()
    }

    #[test]
    fn test_plain_sequence_ends() {
        let mut engine = engine_with(Macro::new(MacroKind::Vol, vec![15, 10, 5]));
        assert_eq!(
            run(&mut engine, MacroKind::Vol, 5),
            vec![Some(15), Some(10), Some(5), None, None]
        );
        assert!(!engine.vol().has);
    }

    #[test]
    fn test_will_goes_false_on_last_step() {
        let mut engine = engine_with(Macro::new(MacroKind::Vol, vec![1, 2]));
        engine.next();
        assert!(engine.vol().will);
        engine.next();
        assert!(engine.vol().had);
        assert!(!engine.vol().will);
        assert!(engine.vol().finished);
    }

    #[test]
    fn test_loop() {
        let mut engine = engine_with(Macro::new(MacroKind::Arp, vec![0, 4, 7]).with_loop(1));
        assert_eq!(
            run(&mut engine, MacroKind::Arp, 6),
            vec![Some(0), Some(4), Some(7), Some(4), Some(7), Some(4)]
        );
    }

    #[test]
    fn test_release_point_holds() {
        let mut engine =
            engine_with(Macro::new(MacroKind::Vol, vec![15, 12, 8, 4, 0]).with_release(1));
        assert_eq!(
            run(&mut engine, MacroKind::Vol, 4),
            vec![Some(15), Some(12), None, None]
        );
        assert!(engine.vol().will);
        engine.release();
        assert_eq!(
            run(&mut engine, MacroKind::Vol, 4),
            vec![Some(8), Some(4), Some(0), None]
        );
    }

    #[test]
    fn test_loop_after_release_only_applies_after_release() {
        let mut engine = engine_with(
            Macro::new(MacroKind::Vol, vec![10, 9, 8, 7])
                .with_release(1)
                .with_loop(2),
        );
        assert_eq!(run(&mut engine, MacroKind::Vol, 3), vec![Some(10), Some(9), None]);
        engine.release();
        assert_eq!(
            run(&mut engine, MacroKind::Vol, 4),
            vec![Some(8), Some(7), Some(8), Some(7)]
        );
    }

    #[test]
    fn test_sustain_loop_before_release() {
        let mut engine = engine_with(
            Macro::new(MacroKind::Vol, vec![1, 2, 3, 4])
                .with_loop(0)
                .with_release(1),
        );
        assert_eq!(
            run(&mut engine, MacroKind::Vol, 4),
            vec![Some(1), Some(2), Some(1), Some(2)]
        );
        engine.release();
        assert_eq!(run(&mut engine, MacroKind::Vol, 3), vec![Some(3), Some(4), None]);
    }

    #[test]
    fn test_speed_and_delay() {
        let mut engine =
            engine_with(Macro::new(MacroKind::Duty, vec![1, 2]).with_timing(2, 1));
        assert_eq!(
            run(&mut engine, MacroKind::Duty, 5),
            vec![None, Some(1), None, Some(2), None]
        );
    }

    #[test]
    fn test_mask() {
        let mut engine = engine_with(Macro::new(MacroKind::Wave, vec![3, 3, 3]));
        engine.mask(MacroKind::Wave, true);
        engine.next();
        assert!(!engine.wave().had);
        engine.mask(MacroKind::Wave, false);
        engine.next();
        assert!(engine.wave().had);
    }

    #[test]
    fn test_init_none_stops_everything() {
        let mut engine = engine_with(Macro::new(MacroKind::Vol, vec![1, 2, 3]));
        engine.init(None);
        engine.next();
        assert!(!engine.any_running());
        assert!(!engine.vol().had);
    }
}
