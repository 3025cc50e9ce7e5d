//! Instruments, samples and the shared song resources

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adpcm;
use crate::macros::Macro;

/// Sample rate at which a sample plays at its natural pitch on C-4 by default
pub const DEFAULT_CENTER_RATE: u32 = 8363;

/// Instrument family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstrumentKind {
    /// Plain tone instrument (PSG style)
    #[default]
    Standard,
    /// Sample playback (DAC on tone chips)
    Sample,
    /// Sound Unit synth patch
    SoundUnit,
    /// Beeper
    Beeper,
}

/// One instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instrument {
    /// Display name
    pub name: String,
    /// Family
    pub kind: InstrumentKind,
    /// Macro sequences
    pub macros: Vec<Macro>,
    /// Sample index for sample playback
    pub sample: Option<usize>,
    /// Sound Unit: drive the sync timer instead of the oscillator frequency
    pub switch_roles: bool,
    /// Filter cutoff at full macro range
    pub base_cutoff: u16,
    /// Filter resonance
    pub resonance: u8,
    /// Filter mode bits (low, high, band)
    pub filter_mode: u8,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: InstrumentKind::Standard,
            macros: Vec::new(),
            sample: None,
            switch_roles: false,
            base_cutoff: u16::MAX,
            resonance: 0,
            filter_mode: 0,
        }
    }
}

impl Instrument {
    /// Sample playback instrument
    pub fn sample(name: &str, sample: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: InstrumentKind::Sample,
            sample: Some(sample),
            ..Self::default()
        }
    }

    /// True if this instrument plays a sample
    pub fn plays_sample(&self) -> bool {
        self.kind == InstrumentKind::Sample || (self.kind == InstrumentKind::SoundUnit && self.sample.is_some())
    }
}

/// Raw sample data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "data")]
pub enum SampleData {
    /// Signed 8-bit PCM
    Pcm8(Vec<i8>),
    /// Signed 16-bit PCM
    Pcm16(Vec<i16>),
    /// YMZ280B ADPCM, two frames per byte
    YmzAdpcm(Vec<u8>),
}

impl Default for SampleData {
    fn default() -> Self {
        SampleData::Pcm8(Vec::new())
    }
}

/// One sample
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sample {
    /// Display name
    pub name: String,
    /// Sample frames
    pub data: SampleData,
    /// Playback rate that sounds as C-4
    pub center_rate: u32,
    /// Loop region in frames, `[start, end)`
    pub loop_range: Option<(usize, usize)>,
}

impl Sample {
    /// 8-bit sample with the default center rate
    pub fn pcm8(name: &str, data: Vec<i8>) -> Self {
        Self {
            name: name.to_string(),
            data: SampleData::Pcm8(data),
            center_rate: DEFAULT_CENTER_RATE,
            loop_range: None,
        }
    }

    /// 16-bit sample with the default center rate
    pub fn pcm16(name: &str, data: Vec<i16>) -> Self {
        Self {
            name: name.to_string(),
            data: SampleData::Pcm16(data),
            center_rate: DEFAULT_CENTER_RATE,
            loop_range: None,
        }
    }

    /// Set the loop region
    pub fn with_loop(mut self, start: usize, end: usize) -> Self {
        self.loop_range = Some((start, end));
        self
    }

    /// Length in frames
    pub fn len(&self) -> usize {
        match &self.data {
            SampleData::Pcm8(d) => d.len(),
            SampleData::Pcm16(d) => d.len(),
            SampleData::YmzAdpcm(d) => d.len() * 2,
        }
    }

    /// True for an empty sample
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length in bytes
    pub fn byte_len(&self) -> usize {
        match &self.data {
            SampleData::Pcm8(d) => d.len(),
            SampleData::Pcm16(d) => d.len() * 2,
            SampleData::YmzAdpcm(d) => d.len(),
        }
    }

    /// Center rate, falling back to the default for 0
    pub fn rate(&self) -> u32 {
        if self.center_rate == 0 {
            DEFAULT_CENTER_RATE
        } else {
            self.center_rate
        }
    }

    /// True when the loop region is usable
    pub fn is_loopable(&self) -> bool {
        matches!(self.loop_range, Some((start, end)) if start < end && end <= self.len())
    }

    /// Loop start frame
    pub fn loop_start(&self) -> Option<usize> {
        self.loop_range.filter(|_| self.is_loopable()).map(|(s, _)| s)
    }

    /// Loop end frame
    pub fn loop_end(&self) -> Option<usize> {
        self.loop_range.filter(|_| self.is_loopable()).map(|(_, e)| e)
    }

    /// 16-bit rendition
    pub fn to_pcm16(&self) -> Vec<i16> {
        match &self.data {
            SampleData::Pcm8(d) => d.iter().map(|&s| (s as i16) << 8).collect(),
            SampleData::Pcm16(d) => d.clone(),
            SampleData::YmzAdpcm(d) => adpcm::decode(d),
        }
    }

    /// 8-bit rendition
    pub fn to_pcm8(&self) -> Vec<i8> {
        match &self.data {
            SampleData::Pcm8(d) => d.clone(),
            _ => self.to_pcm16().iter().map(|&s| (s >> 8) as i8).collect(),
        }
    }
}

/// Instruments and samples of a song, shared read-only between chips
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongResources {
    /// Instrument list
    pub instruments: Vec<Instrument>,
    /// Sample list
    pub samples: Vec<Sample>,
}

impl SongResources {
    /// Wrap for sharing
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Instrument by (possibly negative) index
    pub fn instrument(&self, index: i32) -> Option<&Instrument> {
        usize::try_from(index).ok().and_then(|i| self.instruments.get(i))
    }

    /// Sample by index
    pub fn sample(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        let s8 = Sample::pcm8("a", vec![0; 10]);
        assert_eq!((s8.len(), s8.byte_len()), (10, 10));
        let s16 = Sample::pcm16("b", vec![0; 10]);
        assert_eq!((s16.len(), s16.byte_len()), (10, 20));
        let adpcm = Sample {
            data: SampleData::YmzAdpcm(vec![0; 10]),
            ..Sample::default()
        };
        assert_eq!((adpcm.len(), adpcm.byte_len()), (20, 10));
    }

    #[test]
    fn test_loop_validation() {
        let s = Sample::pcm8("a", vec![0; 10]).with_loop(2, 8);
        assert!(s.is_loopable());
        assert_eq!(s.loop_start(), Some(2));
        assert_eq!(s.loop_end(), Some(8));
        let bad = Sample::pcm8("a", vec![0; 10]).with_loop(5, 20);
        assert!(!bad.is_loopable());
        assert_eq!(bad.loop_start(), None);
    }

    #[test]
    fn test_to_pcm8() {
        let s = Sample::pcm16("a", vec![0x7f00, -0x8000, 0x0100]);
        assert_eq!(s.to_pcm8(), vec![127, -128, 1]);
    }

    #[test]
    fn test_resources_lookup() {
        let res = SongResources {
            instruments: vec![Instrument::sample("kick", 0)],
            samples: vec![Sample::pcm8("kick", vec![1, 2, 3])],
        };
        assert!(res.instrument(-1).is_none());
        assert!(res.instrument(0).unwrap().plays_sample());
        assert!(res.sample(1).is_none());
    }

    #[test]
    fn test_resources_json() {
        let json = r#"{
            "instruments": [{"name": "lead", "macros": [{"kind": "Vol", "values": [15, 12, 8]}]}],
            "samples": [{"name": "s", "data": {"format": "Pcm8", "data": [1, -1]}}]
        }"#;
        let res: SongResources = serde_json::from_str(json).unwrap();
        assert_eq!(res.instruments[0].macros[0].values, vec![15, 12, 8]);
        assert_eq!(res.instruments[0].base_cutoff, u16::MAX);
        assert_eq!(res.samples[0].len(), 2);
        assert_eq!(res.samples[0].rate(), DEFAULT_CENTER_RATE);
    }
}
