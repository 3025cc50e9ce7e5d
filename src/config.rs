//! Chip instance configuration

use serde::{Deserialize, Serialize};

use crate::chips::ChipModel;
use crate::{DispatchError, Result};

/// Default FIFO capacity (slots)
pub const DEFAULT_FIFO_CAPACITY: usize = 4096;

/// Default scheduling latency for the real beeper output
pub const DEFAULT_REAL_OUT_LATENCY_MS: u32 = 20;

/// Level table used by the PSG core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PsgVariant {
    /// General Instrument AY-3-8910 (16 levels)
    #[default]
    Ay8910,
    /// Yamaha YM2149 (32 envelope levels)
    Ym2149,
}

/// PC speaker output stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpeakerType {
    /// Raw square wave
    #[default]
    Unfiltered = 0,
    /// Cone speaker (two-pole low-pass)
    Cone = 1,
    /// Piezo buzzer (resonant band-pass)
    Piezo = 2,
    /// Forward to the real PC speaker; rendered output is silent
    Real = 3,
}

/// Configuration of one chip instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChipConfig {
    /// Chip model
    pub model: ChipModel,
    /// Index into the model's clock preset table
    pub clock_sel: usize,
    /// Clock in Hz, overriding the preset
    pub custom_clock: Option<u32>,
    /// K007232: emulate stereo with the external volume latches
    pub stereo: bool,
    /// PC speaker output stage
    pub speaker_type: SpeakerType,
    /// Sound Unit: 64 KiB sample memory instead of 8 KiB
    pub sample_mem_64k: bool,
    /// PSG level table
    pub psg_variant: PsgVariant,
    /// Register write FIFO capacity
    pub fifo_capacity: usize,
    /// Start with register dump logging enabled
    pub dump_writes: bool,
    /// Real beeper output scheduling latency
    pub real_out_latency_ms: u32,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            model: ChipModel::Ay8910,
            clock_sel: 0,
            custom_clock: None,
            stereo: false,
            speaker_type: SpeakerType::Unfiltered,
            sample_mem_64k: false,
            psg_variant: PsgVariant::Ay8910,
            fifo_capacity: DEFAULT_FIFO_CAPACITY,
            dump_writes: false,
            real_out_latency_ms: DEFAULT_REAL_OUT_LATENCY_MS,
        }
    }
}

impl ChipConfig {
    /// Default configuration for a model
    pub fn new(model: ChipModel) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    /// Select a clock preset
    pub fn with_clock_sel(mut self, clock_sel: usize) -> Self {
        self.clock_sel = clock_sel;
        self
    }

    /// Check the configuration before building a chip
    pub fn validate(&self) -> Result<()> {
        if self.fifo_capacity == 0 {
            return Err(DispatchError::Config("FIFO capacity must be non-zero".into()));
        }
        match self.custom_clock {
            Some(0) => Err(DispatchError::Config("custom clock must be non-zero".into())),
            Some(_) => Ok(()),
            None => {
                let presets = self.model.clock_presets();
                if self.clock_sel >= presets.len() {
                    Err(DispatchError::Config(format!(
                        "clock selection {} out of range for {} ({} presets)",
                        self.clock_sel,
                        self.model.name(),
                        presets.len()
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Effective chip clock in Hz
    pub fn clock(&self) -> u32 {
        self.custom_clock.unwrap_or_else(|| {
            let presets = self.model.clock_presets();
            presets
                .get(self.clock_sel)
                .or_else(|| presets.first())
                .copied()
                .unwrap_or(1_000_000)
        })
    }
}
