//! Concrete chip models

pub mod ay;
pub mod k007232;
pub mod pcspkr;
pub mod saa;
pub mod sound_unit;
pub mod ymz280b;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ChipConfig;
use crate::dispatch::ChipDispatch;
use crate::instrument::SongResources;
use crate::Result;

/// Supported chip models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipModel {
    /// AY-3-8910 / YM2149 3-voice PSG
    Ay8910,
    /// Philips SAA1099 6-voice tone/noise
    Saa1099,
    /// Konami K007232 2-voice PCM
    K007232,
    /// Yamaha YMZ280B 8-voice ADPCM/PCM
    Ymz280b,
    /// tildearrow Sound Unit 8-voice synth
    SoundUnit,
    /// PC speaker beeper
    PcSpeaker,
}

impl ChipModel {
    /// Every model
    pub const ALL: [ChipModel; 6] = [
        ChipModel::Ay8910,
        ChipModel::Saa1099,
        ChipModel::K007232,
        ChipModel::Ymz280b,
        ChipModel::SoundUnit,
        ChipModel::PcSpeaker,
    ];

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            ChipModel::Ay8910 => "AY-3-8910",
            ChipModel::Saa1099 => "SAA1099",
            ChipModel::K007232 => "K007232",
            ChipModel::Ymz280b => "YMZ280B",
            ChipModel::SoundUnit => "Sound Unit",
            ChipModel::PcSpeaker => "PC Speaker",
        }
    }

    /// Clock presets in Hz, selected by `ChipConfig::clock_sel`
    pub fn clock_presets(self) -> &'static [u32] {
        match self {
            ChipModel::Ay8910 => ay::CLOCKS,
            ChipModel::Saa1099 => saa::CLOCKS,
            ChipModel::K007232 => k007232::CLOCKS,
            ChipModel::Ymz280b => ymz280b::CLOCKS,
            ChipModel::SoundUnit => sound_unit::CLOCKS,
            ChipModel::PcSpeaker => pcspkr::CLOCKS,
        }
    }
}

/// Build a chip instance from its configuration
pub fn create_chip(
    config: &ChipConfig,
    resources: Arc<SongResources>,
) -> Result<Box<dyn ChipDispatch>> {
    config.validate()?;
    log::debug!(
        "creating {} at {} Hz",
        config.model.name(),
        config.clock()
    );
    let chip: Box<dyn ChipDispatch> = match config.model {
        ChipModel::Ay8910 => Box::new(ay::Ay8910::new(config, resources)),
        ChipModel::Saa1099 => Box::new(saa::Saa1099::new(config, resources)),
        ChipModel::K007232 => Box::new(k007232::K007232::new(config, resources)),
        ChipModel::Ymz280b => Box::new(ymz280b::Ymz280b::new(config, resources)),
        ChipModel::SoundUnit => Box::new(sound_unit::SoundUnit::new(config, resources)),
        ChipModel::PcSpeaker => Box::new(pcspkr::PcSpeaker::new(config, resources)?),
    };
    Ok(chip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_model_builds() {
        for model in ChipModel::ALL {
            let chip = create_chip(&ChipConfig::new(model), Arc::default()).unwrap();
            assert_eq!(chip.model(), model);
            assert!(chip.rate() > 0);
            assert!(chip.channel_count() > 0);
            assert_eq!(chip.register_pool_size(), chip.register_pool().len());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ChipConfig::new(ChipModel::Ay8910);
        config.clock_sel = 42;
        assert!(create_chip(&config, Arc::default()).is_err());
    }
}
