//! Chip dispatch interface
//!
//! [`ChipDispatch`] is what the sequencer and the audio pipeline see: one
//! object per chip instance, driven by `tick`/`dispatch` and drained by
//! `acquire`. [`ChipCore`] is the narrow seam between a model and its
//! emulation core.
//!
//! The bookkeeping every model shares (register port, oscilloscope rings,
//! mute flags, song resources) lives in [`ChipBase`]; the trait's provided
//! methods work on it so models only implement what differs.

use std::sync::Arc;

use crate::channel::ChannelStatus;
use crate::chips::ChipModel;
use crate::command::Command;
use crate::config::ChipConfig;
use crate::instrument::SongResources;
use crate::osc::OscBuffer;
use crate::registers::{RegisterPort, RegisterWrite};

/// Emulation core of one chip
///
/// Cores only see register writes and clock steps; they know nothing about
/// notes, macros or instruments.
pub trait ChipCore: Send {
    /// Apply one register write
    fn write(&mut self, addr: u16, val: u8);

    /// Advance one output sample; returns the (left, right) mix
    ///
    /// Mono cores return the same value twice.
    fn clock(&mut self) -> (i32, i32);

    /// Last output of one channel, for the oscilloscope
    fn channel_output(&self, ch: usize) -> i32;

    /// Back to power-on state
    fn reset(&mut self);
}

/// Pop one queued write and hand it to the core
///
/// Returns false when the queue was empty.
#[inline]
pub fn apply_next_write<C: ChipCore + ?Sized>(port: &mut RegisterPort, core: &mut C) -> bool {
    match port.pop() {
        Some(w) => {
            core.write(w.addr as u16, w.val as u8);
            true
        }
        None => false,
    }
}

/// Where one sample landed in a model's sample memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Byte offset
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

/// Sample memory image rendered from the song's samples
#[derive(Debug, Clone)]
pub struct SampleMemory {
    data: Vec<u8>,
    entries: Vec<Option<SampleEntry>>,
    used: usize,
}

impl SampleMemory {
    /// Empty memory of `capacity` bytes filled with `fill`
    pub fn new(capacity: usize, fill: u8) -> Self {
        Self {
            data: vec![fill; capacity],
            entries: Vec::new(),
            used: 0,
        }
    }

    /// Total size in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes in use
    pub fn used(&self) -> usize {
        self.used
    }

    /// Memory contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Location of a sample, `None` if it was not placed
    pub fn entry(&self, sample: usize) -> Option<SampleEntry> {
        self.entries.get(sample).copied().flatten()
    }

    /// Forget every sample and refill
    pub fn clear(&mut self, fill: u8) {
        self.data.fill(fill);
        self.entries.clear();
        self.used = 0;
    }

    /// Copy a sample in after the ones already placed
    ///
    /// The start is aligned to `align` bytes; with `bank` set the sample
    /// never straddles a bank boundary (and is truncated to one bank). Out
    /// of memory leaves the sample unplaced.
    pub fn place(
        &mut self,
        sample: usize,
        bytes: &[u8],
        align: usize,
        bank: Option<usize>,
    ) -> Option<SampleEntry> {
        let align = align.max(1);
        let mut offset = self.used.div_ceil(align) * align;
        let mut len = bytes.len();
        if let Some(bank) = bank {
            len = len.min(bank);
            if len > 0 && offset / bank != (offset + len - 1) / bank {
                offset = (offset / bank + 1) * bank;
            }
        }
        if self.entries.len() <= sample {
            self.entries.resize(sample + 1, None);
        }
        if offset + len > self.data.len() {
            log::warn!(
                "sample memory full: sample {} ({} bytes) does not fit ({} of {} used)",
                sample,
                len,
                self.used,
                self.data.len()
            );
            self.entries[sample] = None;
            return None;
        }
        self.data[offset..offset + len].copy_from_slice(&bytes[..len]);
        let entry = SampleEntry { offset, len };
        self.entries[sample] = Some(entry);
        self.used = offset + len;
        Some(entry)
    }

    /// Like [`place`](Self::place) without a bank, keeping the prefix that fits
    ///
    /// Only a sample that would start past the end of memory is left
    /// unplaced.
    pub fn place_truncated(
        &mut self,
        sample: usize,
        bytes: &[u8],
        align: usize,
    ) -> Option<SampleEntry> {
        let align = align.max(1);
        let offset = self.used.div_ceil(align) * align;
        let room = self.data.len().saturating_sub(offset);
        if room == 0 || bytes.len() <= room {
            return self.place(sample, bytes, align, None);
        }
        log::warn!(
            "sample memory full: sample {} truncated from {} to {} bytes",
            sample,
            bytes.len(),
            room
        );
        self.place(sample, &bytes[..room], align, None)
    }

    /// Reserve `extra` bytes after the last placed sample (end markers)
    pub fn reserve_tail(&mut self, extra: usize) {
        self.used = (self.used + extra).min(self.data.len());
    }
}

/// State every model carries
#[derive(Debug)]
pub struct ChipBase {
    /// Register write path
    pub port: RegisterPort,
    /// One oscilloscope ring per channel
    pub osc: Vec<OscBuffer>,
    /// Mute flag per channel
    pub muted: Vec<bool>,
    /// Song instruments and samples
    pub resources: Arc<SongResources>,
    /// Instance configuration
    pub config: ChipConfig,
    /// Chip clock in Hz
    pub clock: u32,
    /// Output sample rate in Hz
    pub rate: u32,
}

impl ChipBase {
    /// Build the shared state for a model
    pub fn new(
        config: &ChipConfig,
        resources: Arc<SongResources>,
        channels: usize,
        pool_size: usize,
        clock: u32,
        rate: u32,
    ) -> Self {
        let mut port = RegisterPort::new(pool_size, config.fifo_capacity);
        port.set_dump_writes(config.dump_writes);
        Self {
            port,
            osc: (0..channels).map(|_| OscBuffer::new(rate)).collect(),
            muted: vec![false; channels],
            resources,
            config: config.clone(),
            clock,
            rate,
        }
    }

    /// True if the channel is muted (out-of-range channels count as muted)
    #[inline]
    pub fn is_muted(&self, ch: usize) -> bool {
        self.muted.get(ch).copied().unwrap_or(true)
    }

    /// Clear the queue, the snapshot and the oscilloscopes
    pub fn reset(&mut self) {
        self.port.reset();
        for osc in &mut self.osc {
            osc.clear();
        }
    }
}

/// One chip instance as seen by the sequencer and the audio pipeline
///
/// `tick`/`dispatch` and `acquire` are never called concurrently for one
/// instance; separate instances are independent.
pub trait ChipDispatch: Send {
    /// Shared state
    fn base(&self) -> &ChipBase;

    /// Shared state, mutable
    fn base_mut(&mut self) -> &mut ChipBase;

    /// Chip model
    fn model(&self) -> ChipModel;

    /// Advance one musical tick; `sys_tick` marks the coarser system tick
    fn tick(&mut self, sys_tick: bool);

    /// Handle one command; see [`HANDLED`](crate::HANDLED)
    fn dispatch(&mut self, cmd: Command) -> i32;

    /// Render `frames` frames into `out` (interleaved, `output_channels()`
    /// values per frame)
    fn acquire(&mut self, out: &mut [i16], frames: usize);

    /// Power-on state for channels and core
    fn reset(&mut self);

    /// Channel snapshot
    fn channel_status(&self, ch: usize) -> Option<ChannelStatus>;

    /// Rewrite every register on the next tick
    fn force_ins(&mut self);

    /// Replace the song resources (re-renders sample memory)
    fn set_resources(&mut self, resources: Arc<SongResources>);

    /// Number of channels
    fn channel_count(&self) -> usize {
        self.base().muted.len()
    }

    /// Output sample rate in Hz
    fn rate(&self) -> u32 {
        self.base().rate
    }

    /// Chip clock in Hz
    fn chip_clock(&self) -> u32 {
        self.base().clock
    }

    /// Values per output frame (1 mono, 2 stereo)
    fn output_channels(&self) -> usize {
        1
    }

    /// True for stereo output
    fn is_stereo(&self) -> bool {
        self.output_channels() == 2
    }

    /// Mute or unmute a channel without touching its musical state
    fn mute_channel(&mut self, ch: usize, mute: bool) {
        if let Some(m) = self.base_mut().muted.get_mut(ch) {
            *m = mute;
        }
    }

    /// Mute flag of a channel
    fn is_muted(&self, ch: usize) -> bool {
        self.base().is_muted(ch)
    }

    /// Last value written to each register
    fn register_pool(&self) -> &[u8] {
        self.base().port.pool()
    }

    /// Register pool length
    fn register_pool_size(&self) -> usize {
        self.register_pool().len()
    }

    /// Write a register directly, bypassing channel state
    fn poke(&mut self, addr: u32, val: u16) {
        self.base_mut().port.write(addr as usize, val as u8);
    }

    /// Write several registers directly
    fn poke_list(&mut self, writes: &[RegisterWrite]) {
        for w in writes {
            self.poke(w.addr, w.val);
        }
    }

    /// Oscilloscope ring of a channel
    fn osc_buffer(&self, ch: usize) -> Option<&OscBuffer> {
        self.base().osc.get(ch)
    }

    /// An instrument was edited
    fn notify_ins_change(&mut self, _ins: i32) {}

    /// Playback stopped
    fn notify_playback_stop(&mut self) {}

    /// Rendered sample memory, for models that have one
    fn sample_memory(&self) -> Option<&SampleMemory> {
        None
    }

    /// Start or stop mirroring writes into the register dump
    fn set_dump_writes(&mut self, enabled: bool) {
        self.base_mut().port.set_dump_writes(enabled);
    }

    /// Take the register dump collected so far
    fn take_register_dump(&mut self) -> Vec<RegisterWrite> {
        self.base_mut().port.take_dump()
    }

    /// Suppress register writes (seeking)
    fn set_skip_writes(&mut self, skip: bool) {
        self.base_mut().port.set_skip_writes(skip);
    }

    /// Whether a key off also stops the arpeggio
    fn key_off_affects_arp(&self, _ch: usize) -> bool {
        false
    }

    /// Gain applied by the mixer after this chip
    fn post_amp(&self) -> f32 {
        1.0
    }

    /// Writes waiting in the FIFO
    fn pending_writes(&self) -> usize {
        self.base().port.pending_writes()
    }
}
