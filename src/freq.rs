//! Note and frequency helpers shared by every model

/// Note number of A-4 (440 Hz)
pub const NOTE_A4: i32 = 57;

/// Note number of C-4
pub const NOTE_C4: i32 = 48;

/// Pitch units per semitone
pub const PITCH_STEPS: i32 = 128;

/// Frequency of a note in Hz (equal temperament, A-4 = 440 Hz)
#[inline]
pub fn note_hz(note: i32) -> f64 {
    440.0 * 2f64.powf((note - NOTE_A4) as f64 / 12.0)
}

/// Hardware period for a note: `round(clock / (divider * hz))`
pub fn period_for_note(clock: f64, divider: f64, note: i32) -> i32 {
    let period = (clock / (divider * note_hz(note))).round();
    period.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Hardware frequency value for a note: `round(hz * freq_base / clock)`
pub fn freq_for_note(clock: f64, freq_base: f64, note: i32) -> i32 {
    let freq = (note_hz(note) * freq_base / clock).round();
    freq.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Apply pitch bend (1/128 semitone) and an arpeggio offset (semitones)
///
/// Period-mode chips get a smaller value for a higher pitch, frequency-mode
/// chips a larger one.
pub fn calc_freq(base: i32, pitch: i32, arp_off: i32, period_mode: bool) -> i32 {
    let semitones = arp_off as f64 + pitch as f64 / PITCH_STEPS as f64;
    let ratio = 2f64.powf(semitones / 12.0);
    let value = if period_mode {
        base as f64 / ratio
    } else {
        base as f64 * ratio
    };
    value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

/// Saturating clamp into the model's representable range
#[inline]
pub fn clamp_freq(value: i32, min: i32, max: i32) -> i32 {
    value.clamp(min, max)
}

/// Fold split left/right panning into one linear value in `0..=max`
///
/// Equal sides give the centre, a silent side pins to the opposite end.
pub fn linear_pan(left: i32, right: i32, max: i32) -> i32 {
    let diff = right - left;
    let pan = if diff == 0 {
        0.5
    } else {
        (1.0 + diff as f64 / left.max(right) as f64) * 0.5
    };
    (pan * max as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_note_hz() {
        assert_relative_eq!(note_hz(NOTE_A4), 440.0);
        assert_relative_eq!(note_hz(NOTE_A4 + 12), 880.0);
        assert_relative_eq!(note_hz(NOTE_C4), 261.6255653, epsilon = 1e-6);
    }

    #[test]
    fn test_period_for_note() {
        // 1789772 / (16 * 261.6256) = 427.56
        assert_eq!(period_for_note(1_789_772.0, 16.0, NOTE_C4), 428);
    }

    #[test]
    fn test_calc_freq_direction() {
        let base = 1000;
        assert!(calc_freq(base, 128, 0, false) > base);
        assert!(calc_freq(base, 128, 0, true) < base);
        assert_eq!(calc_freq(base, 0, 12, false), 2000);
        assert_eq!(calc_freq(base, 0, 12, true), 500);
        assert_eq!(calc_freq(base, 0, 0, true), base);
    }

    #[test]
    fn test_clamp_freq_saturates() {
        assert_eq!(clamp_freq(-5, 0, 4095), 0);
        assert_eq!(clamp_freq(99_999, 0, 4095), 4095);
        assert_eq!(clamp_freq(100, 0, 4095), 100);
    }

    #[test]
    fn test_linear_pan() {
        assert_eq!(linear_pan(255, 255, 254), 127);
        assert_eq!(linear_pan(255, 0, 254), 0);
        assert_eq!(linear_pan(0, 255, 254), 254);
    }
}
