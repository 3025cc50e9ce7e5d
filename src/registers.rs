//! Register snapshot, commit discipline and register dumps
//!
//! Every model talks to its chip core through a [`RegisterPort`]:
//!
//! - **deferred** writes ([`RegisterPort::stage`]) land in a pending array and
//!   are only queued when [`RegisterPort::commit`] finds they differ from the
//!   last committed value. Several logical writes to one address within a
//!   tick collapse into one physical write.
//! - **immediate** writes ([`RegisterPort::write`]) go straight into the FIFO
//!   for values that must change at a precise moment (envelope periods, phase
//!   resets, IO ports, sample-rate effects).
//!
//! Both paths can mirror into an append-only dump for export.

use std::io::Write;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{hex_digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, opt, value},
    multi::{many1, separated_list0},
    sequence::{delimited, preceded, separated_pair, terminated},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::fifo::WriteFifo;
use crate::{DispatchError, Result};

/// A single register write (address, value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct RegisterWrite {
    /// Register address
    pub addr: u32,
    /// Value written
    pub val: u16,
}

impl RegisterWrite {
    /// Create a new write
    pub const fn new(addr: u32, val: u16) -> Self {
        Self { addr, val }
    }
}

/// Pending/committed register arrays indexed by address
///
/// `None` in the committed array means "unknown", which forces the next
/// commit of that address.
#[derive(Debug, Clone)]
pub struct RegisterSnapshot {
    pending: Vec<Option<u8>>,
    committed: Vec<Option<u8>>,
}

impl RegisterSnapshot {
    /// Create a snapshot covering `size` addresses, all unknown
    pub fn new(size: usize) -> Self {
        Self {
            pending: vec![None; size],
            committed: vec![None; size],
        }
    }

    /// Number of addresses covered
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True for a zero-sized snapshot
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record a pending value; out-of-range addresses are ignored
    #[inline]
    pub fn stage(&mut self, addr: usize, val: u8) {
        if let Some(slot) = self.pending.get_mut(addr) {
            *slot = Some(val);
        }
    }

    /// Pending value at an address
    pub fn pending(&self, addr: usize) -> Option<u8> {
        self.pending.get(addr).copied().flatten()
    }

    /// Last committed value at an address
    pub fn committed(&self, addr: usize) -> Option<u8> {
        self.committed.get(addr).copied().flatten()
    }

    /// Mark a value as committed (and pending) without a diff
    #[inline]
    pub fn force(&mut self, addr: usize, val: u8) {
        if addr < self.pending.len() {
            self.pending[addr] = Some(val);
            self.committed[addr] = Some(val);
        }
    }

    /// Collect every address whose pending value differs from the committed
    /// one, in ascending address order, and mark them committed
    pub fn take_changes(&mut self, out: &mut Vec<(usize, u8)>) {
        for (addr, (pending, committed)) in self
            .pending
            .iter()
            .zip(self.committed.iter_mut())
            .enumerate()
        {
            if let Some(val) = *pending {
                if *committed != Some(val) {
                    *committed = Some(val);
                    out.push((addr, val));
                }
            }
        }
    }

    /// Forget committed values so every pending value is written again
    pub fn invalidate(&mut self) {
        self.committed.fill(None);
    }

    /// Back to power-on: everything unknown
    pub fn reset(&mut self) {
        self.pending.fill(None);
        self.committed.fill(None);
    }
}

/// Register write path of one chip instance
///
/// Owns the FIFO drained by `acquire`, the snapshot used for deduplication,
/// the register pool shown to diagnostics and the optional write dump.
#[derive(Debug, Clone)]
pub struct RegisterPort {
    fifo: WriteFifo,
    snapshot: RegisterSnapshot,
    pool: Vec<u8>,
    dump: Option<Vec<RegisterWrite>>,
    skip_writes: bool,
    scratch: Vec<(usize, u8)>,
}

impl RegisterPort {
    /// Create a port covering `size` registers with a FIFO of
    /// `fifo_capacity` slots
    pub fn new(size: usize, fifo_capacity: usize) -> Self {
        Self {
            fifo: WriteFifo::new(fifo_capacity),
            snapshot: RegisterSnapshot::new(size),
            pool: vec![0; size],
            dump: None,
            skip_writes: false,
            scratch: Vec::with_capacity(size),
        }
    }

    /// Deferred write: flushed by the next [`commit`](Self::commit) if it
    /// changes the register
    #[inline]
    pub fn stage(&mut self, addr: usize, val: u8) {
        if self.skip_writes {
            return;
        }
        self.snapshot.stage(addr, val);
    }

    /// Immediate write: queued right away, bypassing the diff
    pub fn write(&mut self, addr: usize, val: u8) {
        if self.skip_writes {
            return;
        }
        self.snapshot.force(addr, val);
        if let Some(slot) = self.pool.get_mut(addr) {
            *slot = val;
        }
        self.enqueue(RegisterWrite::new(addr as u32, val as u16));
    }

    /// Immediate write, skipped when the committed value already matches
    pub fn write_if_changed(&mut self, addr: usize, val: u8) {
        if self.snapshot.committed(addr) != Some(val) {
            self.write(addr, val);
        }
    }

    /// Queue every staged register whose value changed since the last
    /// commit, in address order
    ///
    /// Returns the number of writes queued.
    pub fn commit(&mut self) -> usize {
        if self.skip_writes {
            return 0;
        }
        let mut changes = std::mem::take(&mut self.scratch);
        changes.clear();
        self.snapshot.take_changes(&mut changes);
        for &(addr, val) in &changes {
            self.pool[addr] = val;
            self.enqueue(RegisterWrite::new(addr as u32, val as u16));
        }
        let count = changes.len();
        self.scratch = changes;
        count
    }

    fn enqueue(&mut self, write: RegisterWrite) {
        self.fifo.push(write);
        if let Some(dump) = self.dump.as_mut() {
            dump.push(write);
        }
    }

    /// Next write for the chip core
    #[inline]
    pub fn pop(&mut self) -> Option<RegisterWrite> {
        self.fifo.pop()
    }

    /// Number of writes waiting in the FIFO
    pub fn pending_writes(&self) -> usize {
        self.fifo.len()
    }

    /// Writes dropped on FIFO overflow
    pub fn dropped_writes(&self) -> u64 {
        self.fifo.dropped()
    }

    /// Drop queued writes without touching the snapshot
    pub fn clear_queue(&mut self) {
        self.fifo.clear();
    }

    /// Force every staged register to be written again on the next commit
    pub fn invalidate(&mut self) {
        self.snapshot.invalidate();
    }

    /// Clear the queue, the snapshot and the pool
    pub fn reset(&mut self) {
        self.fifo.clear();
        self.snapshot.reset();
        self.pool.fill(0);
    }

    /// Pending value at an address
    pub fn pending(&self, addr: usize) -> Option<u8> {
        self.snapshot.pending(addr)
    }

    /// Last committed value at an address
    pub fn committed(&self, addr: usize) -> Option<u8> {
        self.snapshot.committed(addr)
    }

    /// Register pool: last value sent to each address (0 if never written)
    pub fn pool(&self) -> &[u8] {
        &self.pool
    }

    /// Mutable register pool, for models that track off-chip latches
    pub fn pool_mut(&mut self) -> &mut [u8] {
        &mut self.pool
    }

    /// Enable or disable mirroring into the write dump
    pub fn set_dump_writes(&mut self, enabled: bool) {
        match (enabled, self.dump.is_some()) {
            (true, false) => self.dump = Some(Vec::new()),
            (false, true) => self.dump = None,
            _ => {}
        }
    }

    /// True while writes are mirrored into the dump
    pub fn dump_writes(&self) -> bool {
        self.dump.is_some()
    }

    /// Take the dumped writes collected so far
    pub fn take_dump(&mut self) -> Vec<RegisterWrite> {
        self.dump.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Suppress every write (used while seeking)
    pub fn set_skip_writes(&mut self, skip: bool) {
        self.skip_writes = skip;
    }
}

/// Export a register dump as `addr,val` CSV rows
pub fn export_csv<W: Write>(writes: &[RegisterWrite], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for write in writes {
        csv.serialize(write)?;
    }
    csv.flush()?;
    Ok(())
}

fn hex_number(input: &str) -> IResult<&str, &str> {
    preceded(opt(alt((tag("0x"), tag("0X"), tag("$")))), hex_digit1)(input)
}

fn hex_u32(input: &str) -> IResult<&str, u32> {
    map_res(hex_number, |digits| u32::from_str_radix(digits, 16))(input)
}

fn hex_u16(input: &str) -> IResult<&str, u16> {
    map_res(hex_number, |digits| u16::from_str_radix(digits, 16))(input)
}

fn write_entry(input: &str) -> IResult<&str, RegisterWrite> {
    map(
        separated_pair(
            hex_u32,
            delimited(multispace0, one_of("=:"), multispace0),
            hex_u16,
        ),
        |(addr, val)| RegisterWrite::new(addr, val),
    )(input)
}

fn separator(input: &str) -> IResult<&str, ()> {
    value((), many1(one_of(",; \t\r\n")))(input)
}

fn write_list(input: &str) -> IResult<&str, Vec<RegisterWrite>> {
    all_consuming(delimited(
        multispace0,
        separated_list0(separator, write_entry),
        terminated(opt(separator), multispace0),
    ))(input)
}

/// Parse a register write list such as `"07=38, 08=0f; 0x09:$0f"`
///
/// Addresses and values are hexadecimal, optionally prefixed with `0x` or
/// `$`. Entries are separated by commas, semicolons or whitespace.
pub fn parse_write_list(input: &str) -> Result<Vec<RegisterWrite>> {
    write_list(input)
        .map(|(_, writes)| writes)
        .map_err(|e| DispatchError::Parse(format!("invalid register write list: {e}")))
}
