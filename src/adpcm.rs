//! YMZ280B 4-bit ADPCM codec
//!
//! Each nibble holds a 3-bit magnitude and a sign bit. The step size adapts
//! through [`INDEX_SCALE`]; the high nibble of a byte is played first.

/// Step size scale per magnitude (8.8 fixed point)
pub const INDEX_SCALE: [i32; 8] = [0x0e6, 0x0e6, 0x0e6, 0x0e6, 0x133, 0x199, 0x200, 0x266];

const STEP_MIN: i32 = 0x7f;
const STEP_MAX: i32 = 0x6000;

/// Decoder/encoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdpcmState {
    /// Current output value
    pub signal: i32,
    /// Current step size
    pub step: i32,
}

impl Default for AdpcmState {
    fn default() -> Self {
        Self {
            signal: 0,
            step: STEP_MIN,
        }
    }
}

impl AdpcmState {
    /// Apply one nibble and return the new sample
    #[inline]
    pub fn decode_nibble(&mut self, nibble: u8) -> i16 {
        let magnitude = (nibble & 7) as i32;
        let mut diff = magnitude * 2 + 1;
        if nibble & 8 != 0 {
            diff = -diff;
        }
        self.signal = (self.signal + self.step * diff / 8).clamp(-32768, 32767);
        self.step = ((self.step * INDEX_SCALE[magnitude as usize]) >> 8).clamp(STEP_MIN, STEP_MAX);
        self.signal as i16
    }

    /// Pick the nibble that best tracks `target`, then apply it
    #[inline]
    pub fn encode_sample(&mut self, target: i16) -> u8 {
        let delta = target as i32 - self.signal;
        let magnitude = (delta.abs() * 4 / self.step).min(7) as u8;
        let nibble = magnitude | if delta < 0 { 8 } else { 0 };
        self.decode_nibble(nibble);
        nibble
    }
}

/// Nibble `pos` of an ADPCM stream (high nibble first)
#[inline]
pub fn nibble_at(data: &[u8], pos: usize) -> u8 {
    let byte = data.get(pos >> 1).copied().unwrap_or(0);
    (byte >> ((!pos & 1) << 2)) & 0x0f
}

/// Decode a whole ADPCM stream (two samples per byte)
pub fn decode(data: &[u8]) -> Vec<i16> {
    let mut state = AdpcmState::default();
    (0..data.len() * 2)
        .map(|pos| state.decode_nibble(nibble_at(data, pos)))
        .collect()
}

/// Encode 16-bit PCM into ADPCM; an odd trailing sample is padded
pub fn encode(samples: &[i16]) -> Vec<u8> {
    let mut state = AdpcmState::default();
    samples
        .chunks(2)
        .map(|pair| {
            let hi = state.encode_sample(pair[0]);
            let lo = pair.get(1).map_or(0, |&s| state.encode_sample(s));
            (hi << 4) | lo
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nibble_order() {
        let data = [0xa5, 0x3c];
        assert_eq!(nibble_at(&data, 0), 0x0a);
        assert_eq!(nibble_at(&data, 1), 0x05);
        assert_eq!(nibble_at(&data, 2), 0x03);
        assert_eq!(nibble_at(&data, 3), 0x0c);
    }

    #[test]
    fn test_step_stays_in_range() {
        let mut state = AdpcmState::default();
        for _ in 0..100 {
            state.decode_nibble(7);
        }
        assert_eq!(state.step, STEP_MAX);
        assert_eq!(state.signal, 32767);
        for _ in 0..100 {
            state.decode_nibble(0);
        }
        assert_eq!(state.step, STEP_MIN);
    }

    #[test]
    fn test_encode_tracks_sine() {
        let pcm: Vec<i16> = (0..2000)
            .map(|i| ((i as f64 * 0.03).sin() * 12000.0) as i16)
            .collect();
        let decoded = decode(&encode(&pcm));
        assert_eq!(decoded.len(), pcm.len());
        let max_err = pcm[200..]
            .iter()
            .zip(&decoded[200..])
            .map(|(a, b)| (*a as i32 - *b as i32).abs())
            .max()
            .unwrap();
        assert!(max_err < 3000, "error too large: {max_err}");
    }
}
