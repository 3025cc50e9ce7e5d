//! Per-channel oscilloscope ring

/// Entries per oscilloscope ring
pub const OSC_BUFFER_SIZE: usize = 65536;

const MASK: usize = OSC_BUFFER_SIZE - 1;

/// Ring of recent channel output samples, for visualization only
#[derive(Debug, Clone)]
pub struct OscBuffer {
    data: Box<[i16]>,
    needle: usize,
    rate: u32,
}

impl OscBuffer {
    /// Empty ring for a channel rendered at `rate` Hz
    pub fn new(rate: u32) -> Self {
        Self {
            data: vec![0; OSC_BUFFER_SIZE].into_boxed_slice(),
            needle: 0,
            rate,
        }
    }

    /// Record one sample
    #[inline]
    pub fn push(&mut self, sample: i16) {
        self.data[self.needle] = sample;
        self.needle = (self.needle + 1) & MASK;
    }

    /// Record one sample from a wider mixer value, saturating
    #[inline]
    pub fn push_clamped(&mut self, sample: i32) {
        self.push(sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    /// Next write position
    pub fn needle(&self) -> usize {
        self.needle
    }

    /// Sample rate of the recorded data
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Change the recorded rate (after a clock change)
    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate;
    }

    /// Whole ring; the oldest sample sits at [`needle`](Self::needle)
    pub fn data(&self) -> &[i16] {
        &self.data
    }

    /// The `n` most recent samples, oldest first
    pub fn latest(&self, n: usize) -> Vec<i16> {
        let n = n.min(OSC_BUFFER_SIZE);
        let start = self.needle.wrapping_sub(n) & MASK;
        (0..n).map(|i| self.data[(start + i) & MASK]).collect()
    }

    /// Zero the ring
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.needle = 0;
    }
}
