//! DC offset removal
//!
//! PSG and beeper outputs are unipolar: a silent-but-enabled channel sits at
//! a constant level. A running average over the last 2048 samples is
//! subtracted to centre the mix around zero.

const HISTORY_BITS: usize = 11;
const HISTORY_SIZE: usize = 1 << HISTORY_BITS;

/// Running-average DC blocker
#[derive(Clone)]
pub struct DcFilter {
    history: Box<[i32; HISTORY_SIZE]>,
    position: usize,
    sum: i64,
}

impl DcFilter {
    /// Filter with an empty history
    pub fn new() -> Self {
        Self {
            history: Box::new([0; HISTORY_SIZE]),
            position: 0,
            sum: 0,
        }
    }

    /// Feed one sample, get it back with the running average removed
    #[inline]
    pub fn process(&mut self, sample: i32) -> i32 {
        self.sum += sample as i64 - self.history[self.position] as i64;
        self.history[self.position] = sample;
        self.position = (self.position + 1) & (HISTORY_SIZE - 1);
        sample - (self.sum >> HISTORY_BITS) as i32
    }

    /// Clear the history
    pub fn reset(&mut self) {
        self.history.fill(0);
        self.position = 0;
        self.sum = 0;
    }
}

impl Default for DcFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DcFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcFilter")
            .field("position", &self.position)
            .field("sum", &self.sum)
            .finish_non_exhaustive()
    }
}
