//! Chip dispatch layer for tracker engines
//!
//! Drives emulated sound chips from a uniform musical event stream. Each chip
//! model translates tracker commands and ticks into hardware register writes,
//! queues those writes in a bounded FIFO and renders audio sample by sample
//! through its chip core.
//!
//! # Layers
//! - [`fifo`]: bounded register write queue
//! - [`registers`]: pending/committed snapshot pair and the commit discipline
//! - [`macros`]: per-tick instrument modulation sequences
//! - [`channel`]: per-voice state shared by every model
//! - [`dispatch`]: the [`ChipDispatch`] and [`ChipCore`] traits
//! - [`chips`]: concrete models (AY-3-8910/YM2149, SAA1099, K007232,
//!   YMZ280B, Sound Unit, PC speaker)
//! - [`render`]: offline rendering of timed command lists to WAV
//!
//! # Crate feature flags
//! - `real-out` (default): background thread forwarding PC speaker frequency
//!   changes to real hardware
//!
//! # Quick start
//! ```no_run
//! use std::sync::Arc;
//! use chipdispatch::{create_chip, ChipConfig, ChipModel, Command, CommandKind, SongResources};
//!
//! let config = ChipConfig::new(ChipModel::Ay8910);
//! let mut chip = create_chip(&config, Arc::new(SongResources::default())).unwrap();
//! chip.dispatch(Command::new(0, CommandKind::NoteOn, 48));
//! chip.tick(true);
//! let mut audio = vec![0i16; 1024 * chip.output_channels()];
//! chip.acquire(&mut audio, 1024);
//! ```

#![warn(missing_docs)]

pub mod adpcm;
pub mod channel;
pub mod chips;
pub mod command;
pub mod config;
pub mod dc_filter;
pub mod dispatch;
pub mod fifo;
pub mod freq;
pub mod instrument;
pub mod macros;
pub mod osc;
pub mod registers;
pub mod render;

/// Error types for chip dispatch operations
///
/// The emulation path itself (tick, dispatch, acquire) never fails; these
/// errors come from construction, parsing and export.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error while parsing a register write list or render job
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Register dump export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// WAV writing error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Real-hardware output error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for DispatchError {
    /// Converts a String into `DispatchError::Other`.
    ///
    /// Prefer the specific variants (`Config`, `Parse`) where the failure
    /// has a known category.
    fn from(msg: String) -> Self {
        DispatchError::Other(msg)
    }
}

impl From<&str> for DispatchError {
    fn from(msg: &str) -> Self {
        DispatchError::Other(msg.to_string())
    }
}

/// Result type for fallible chip dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

// Public API exports
pub use channel::{ChannelPhase, ChannelState, ChannelStatus};
pub use chips::{create_chip, ChipModel};
pub use command::{Command, CommandKind, HANDLED, NOTE_NULL, PORTA_DONE};
pub use config::{ChipConfig, PsgVariant, SpeakerType};
pub use dispatch::{ChipBase, ChipCore, ChipDispatch, SampleEntry, SampleMemory};
pub use fifo::WriteFifo;
pub use instrument::{Instrument, InstrumentKind, Sample, SampleData, SongResources};
pub use macros::{Macro, MacroEngine, MacroKind, MacroMode};
pub use osc::OscBuffer;
pub use registers::{export_csv, parse_write_list, RegisterPort, RegisterWrite};
pub use render::{RenderJob, Rendered, TimedCommand};
