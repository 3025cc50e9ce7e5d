//! Offline rendering of a timed command list
//!
//! A [`RenderJob`] names a chip configuration, the song resources and a list
//! of commands stamped with the tick they fire on. Rendering dispatches each
//! tick's commands, runs the chip's tick and then renders the samples up to
//! the next tick, the same split a tracker engine uses.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chips::create_chip;
use crate::command::Command;
use crate::config::ChipConfig;
use crate::instrument::SongResources;
use crate::registers::{export_csv, parse_write_list, RegisterWrite};
use crate::{DispatchError, Result};

/// Default engine tick rate (NTSC frame rate)
pub const DEFAULT_TICK_RATE: f64 = 60.0;

/// Ticks rendered after the last event when the job gives no length
pub const DEFAULT_TAIL_TICKS: u64 = 60;

/// Paces engine ticks against output samples
///
/// The fractional part of samples-per-tick is carried so long renders do not
/// drift.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    samples_per_tick: f64,
    carry: f64,
    ticks: u64,
    samples: u64,
}

impl TickClock {
    /// Clock for a chip running at `rate` Hz and an engine ticking at
    /// `tick_rate` Hz
    pub fn new(rate: u32, tick_rate: f64) -> Self {
        Self {
            samples_per_tick: rate as f64 / tick_rate,
            carry: 0.0,
            ticks: 0,
            samples: 0,
        }
    }

    /// Frames to render until the next tick
    pub fn next_block(&mut self) -> usize {
        let exact = self.samples_per_tick + self.carry;
        let frames = exact.floor();
        self.carry = exact - frames;
        self.ticks += 1;
        self.samples += frames as u64;
        frames as usize
    }

    /// Ticks elapsed
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Frames handed out so far
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// A command fired on a given tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedCommand {
    /// Tick number, from 0
    pub tick: u64,
    /// The command
    #[serde(flatten)]
    pub command: Command,
}

/// Everything needed to render one chip offline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderJob {
    /// Chip instance
    pub chip: ChipConfig,
    /// Instruments and samples
    pub resources: SongResources,
    /// Engine ticks per second
    pub tick_rate: f64,
    /// Total length in ticks; defaults to the last event plus a tail
    pub ticks: Option<u64>,
    /// Register writes applied before the first tick (`"07=38, 08=0f"`)
    pub pokes: Option<String>,
    /// Channels muted for the whole render
    pub muted: Vec<usize>,
    /// Timed command list
    pub events: Vec<TimedCommand>,
}

impl Default for RenderJob {
    fn default() -> Self {
        Self {
            chip: ChipConfig::default(),
            resources: SongResources::default(),
            tick_rate: DEFAULT_TICK_RATE,
            ticks: None,
            pokes: None,
            muted: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Output of a render
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    /// Interleaved samples
    pub samples: Vec<i16>,
    /// Interleaved channel count (1 or 2)
    pub channels: u16,
    /// Sample rate in Hz
    pub rate: u32,
    /// Register writes, when the job enabled the dump
    pub dump: Vec<RegisterWrite>,
    /// Writes dropped on FIFO overflow
    pub dropped_writes: u64,
}

impl Rendered {
    /// Length in frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Length in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.rate.max(1) as f64
    }
}

impl RenderJob {
    /// Parse a job from JSON
    pub fn from_json(text: &str) -> Result<Self> {
        let job: RenderJob = serde_json::from_str(text)?;
        job.validate()?;
        Ok(job)
    }

    /// Check the job before rendering
    pub fn validate(&self) -> Result<()> {
        if !(self.tick_rate.is_finite() && self.tick_rate > 0.0) {
            return Err(DispatchError::Parse(format!(
                "tick rate must be positive, got {}",
                self.tick_rate
            )));
        }
        self.chip.validate()
    }

    /// Length of the render in ticks
    pub fn length_ticks(&self) -> u64 {
        self.ticks.unwrap_or_else(|| {
            self.events
                .iter()
                .map(|e| e.tick + 1)
                .max()
                .unwrap_or(0)
                + DEFAULT_TAIL_TICKS
        })
    }

    /// Run the job
    pub fn render(&self) -> Result<Rendered> {
        self.validate()?;
        let mut chip = create_chip(&self.chip, self.resources.clone().shared())?;
        if let Some(pokes) = &self.pokes {
            let writes = parse_write_list(pokes)?;
            log::debug!("applying {} register pokes", writes.len());
            chip.poke_list(&writes);
        }
        for &ch in &self.muted {
            chip.mute_channel(ch, true);
        }

        let mut events: Vec<TimedCommand> = self.events.clone();
        events.sort_by_key(|e| e.tick);
        let mut pending = events.iter().peekable();

        let channels = chip.output_channels();
        let gain = chip.post_amp();
        let mut clock = TickClock::new(chip.rate(), self.tick_rate);
        let mut block = Vec::new();
        let mut samples = Vec::new();
        for tick in 0..self.length_ticks() {
            while let Some(event) = pending.next_if(|e| e.tick == tick) {
                chip.dispatch(event.command);
            }
            chip.tick(true);
            let frames = clock.next_block();
            block.clear();
            block.resize(frames * channels, 0i16);
            chip.acquire(&mut block, frames);
            samples.extend(
                block
                    .iter()
                    .map(|&s| (s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16),
            );
        }
        chip.notify_playback_stop();

        let rendered = Rendered {
            samples,
            channels: channels as u16,
            rate: chip.rate(),
            dump: chip.take_register_dump(),
            dropped_writes: chip.base().port.dropped_writes(),
        };
        if rendered.dropped_writes > 0 {
            log::warn!(
                "{}: {} register writes dropped on FIFO overflow",
                self.chip.model.name(),
                rendered.dropped_writes
            );
        }
        log::debug!(
            "rendered {} ticks, {} frames at {} Hz",
            clock.ticks(),
            rendered.frames(),
            rendered.rate
        );
        Ok(rendered)
    }
}

/// Write a render as 16-bit PCM WAV
pub fn write_wav(path: &Path, rendered: &Rendered) -> Result<()> {
    let spec = hound::WavSpec {
        channels: rendered.channels.max(1),
        sample_rate: rendered.rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in &rendered.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write a register dump as CSV
pub fn write_dump_csv(path: &Path, writes: &[RegisterWrite]) -> Result<()> {
    let file = File::create(path)?;
    export_csv(writes, BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chips::ChipModel;
    use crate::command::CommandKind;

    #[test]
    fn test_tick_clock_carries_fraction() {
        let mut clock = TickClock::new(44_100, 60.0);
        let total: usize = (0..60).map(|_| clock.next_block()).sum();
        assert_eq!(total, 44_100);
        assert_eq!(clock.ticks(), 60);
    }

    #[test]
    fn test_job_json() {
        let job = RenderJob::from_json(
            r#"{
                "chip": {"model": "Saa1099"},
                "tick_rate": 50,
                "events": [
                    {"tick": 0, "channel": 0, "kind": "NoteOn", "value": 48},
                    {"tick": 10, "channel": 0, "kind": "NoteOff"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(job.chip.model, ChipModel::Saa1099);
        assert_eq!(job.events[1].command, Command::new(0, CommandKind::NoteOff, 0));
        assert_eq!(job.length_ticks(), 11 + DEFAULT_TAIL_TICKS);
    }

    #[test]
    fn test_bad_tick_rate() {
        let err = RenderJob::from_json(r#"{"tick_rate": 0}"#).unwrap_err();
        assert!(matches!(err, DispatchError::Parse(_)));
    }

    #[test]
    fn test_render_length_and_sound() {
        let job = RenderJob {
            chip: ChipConfig::new(ChipModel::Ay8910),
            ticks: Some(30),
            events: vec![TimedCommand {
                tick: 0,
                command: Command::new(0, CommandKind::NoteOn, 48),
            }],
            ..RenderJob::default()
        };
        let out = job.render().unwrap();
        assert_eq!(out.channels, 1);
        let expected = (out.rate as f64 * 30.0 / 60.0).floor() as usize;
        assert!(out.frames().abs_diff(expected) <= 1);
        assert!(out.samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_bad_pokes_rejected() {
        let job = RenderJob {
            pokes: Some("zz=1".into()),
            ..RenderJob::default()
        };
        assert!(matches!(job.render(), Err(DispatchError::Parse(_))));
    }
}
