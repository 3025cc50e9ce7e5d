//! Real PC speaker output
//!
//! Period changes are queued with a due time and played by a background
//! thread, so the render thread never blocks on port I/O. The thread waits
//! on a condition variable until the front event is due and exits when the
//! stop flag is raised.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{DispatchError, Result};

/// PIT mode/command port
const PIT_COMMAND: u64 = 0x43;
/// PIT channel 2 data port
const PIT_CHANNEL2: u64 = 0x42;
/// Keyboard controller port B (speaker gate bits 0-1)
const SPEAKER_GATE: u64 = 0x61;

/// Destination for speaker periods
pub trait BeepSink: Send {
    /// Program the PIT divisor; 0 silences the speaker
    fn set_period(&mut self, period: u16) -> Result<()>;
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl BeepSink for NullSink {
    fn set_period(&mut self, _period: u16) -> Result<()> {
        Ok(())
    }
}

/// Sink writing the PIT and speaker gate through a port device such as
/// `/dev/port`
#[derive(Debug)]
pub struct PortSink {
    device: File,
}

impl PortSink {
    /// Default port device
    pub const DEVICE: &'static str = "/dev/port";

    /// Open a port device for reading and writing
    pub fn open(path: &str) -> Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DispatchError::AudioDevice(format!("{path}: {e}")))?;
        Ok(Self { device })
    }

    fn out(&mut self, port: u64, val: u8) -> Result<()> {
        self.device.seek(SeekFrom::Start(port))?;
        self.device.write_all(&[val])?;
        Ok(())
    }

    fn input(&mut self, port: u64) -> Result<u8> {
        let mut byte = [0u8];
        self.device.seek(SeekFrom::Start(port))?;
        self.device.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

impl BeepSink for PortSink {
    fn set_period(&mut self, period: u16) -> Result<()> {
        let gate = self.input(SPEAKER_GATE)?;
        if period == 0 {
            return self.out(SPEAKER_GATE, gate & !3);
        }
        // channel 2, lobyte/hibyte, square wave
        self.out(PIT_COMMAND, 0xb6)?;
        self.out(PIT_CHANNEL2, (period & 0xff) as u8)?;
        self.out(PIT_CHANNEL2, (period >> 8) as u8)?;
        self.out(SPEAKER_GATE, gate | 3)
    }
}

/// One queued period change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeepEvent {
    /// When the change should be heard
    pub due: Instant,
    /// PIT divisor, 0 for silence
    pub period: u16,
}

#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<VecDeque<BeepEvent>>,
    wake: Condvar,
    quit: AtomicBool,
}

/// Background thread driving a [`BeepSink`]
#[derive(Debug)]
pub struct RealOutput {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    latency: Duration,
}

impl RealOutput {
    /// Spawn the output thread
    ///
    /// `latency` is added to every event so changes line up with audio that
    /// is still buffered downstream.
    pub fn start(sink: Box<dyn BeepSink>, latency: Duration) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("pcspkr-out".into())
            .spawn(move || run(thread_shared, sink))
            .map_err(|e| DispatchError::AudioDevice(format!("cannot start output thread: {e}")))?;
        log::debug!("PC speaker output thread started");
        Ok(Self {
            shared,
            handle: Some(handle),
            latency,
        })
    }

    /// Queue a period change `delay` from now
    pub fn beep(&self, period: u16, delay: Duration) {
        let due = Instant::now() + delay + self.latency;
        self.shared.queue.lock().push_back(BeepEvent { due, period });
        self.shared.wake.notify_one();
    }

    /// Events not yet played
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Stop the thread and wait for it
    ///
    /// Queued events are dropped and the speaker is switched off.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.quit.store(true, Ordering::Release);
        {
            // hold the lock so the wake-up cannot slip between check and wait
            let _queue = self.shared.queue.lock();
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            log::warn!("PC speaker output thread panicked");
        }
        log::debug!("PC speaker output thread stopped");
    }
}

impl Drop for RealOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Block until the front event is due; `None` once stop is requested
fn next_event(shared: &Shared) -> Option<BeepEvent> {
    let mut queue = shared.queue.lock();
    loop {
        if shared.quit.load(Ordering::Acquire) {
            return None;
        }
        match queue.front().map(|e| e.due) {
            Some(due) if due <= Instant::now() => return queue.pop_front(),
            Some(due) => {
                shared.wake.wait_until(&mut queue, due);
            }
            None => shared.wake.wait(&mut queue),
        }
    }
}

fn run(shared: Arc<Shared>, mut sink: Box<dyn BeepSink>) {
    while let Some(event) = next_event(&shared) {
        if let Err(e) = sink.set_period(event.period) {
            log::warn!("PC speaker write failed: {e}");
        }
    }
    // leave the speaker off
    if let Err(e) = sink.set_period(0) {
        log::warn!("PC speaker write failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u16>>>);

    impl BeepSink for Recorder {
        fn set_period(&mut self, period: u16) -> Result<()> {
            self.0.lock().push(period);
            Ok(())
        }
    }

    fn wait_for(recorder: &Recorder, count: usize) -> Vec<u16> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.0.lock().len() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        recorder.0.lock().clone()
    }

    #[test]
    fn test_events_play_in_order() {
        let recorder = Recorder::default();
        let mut out = RealOutput::start(Box::new(recorder.clone()), Duration::ZERO).unwrap();
        out.beep(1000, Duration::ZERO);
        out.beep(2000, Duration::from_millis(2));
        out.beep(0, Duration::from_millis(4));
        assert_eq!(wait_for(&recorder, 3), vec![1000, 2000, 0]);
        out.shutdown();
        assert_eq!(recorder.0.lock().len(), 4);
    }

    #[test]
    fn test_shutdown_while_idle() {
        let recorder = Recorder::default();
        let mut out = RealOutput::start(Box::new(recorder.clone()), Duration::ZERO).unwrap();
        out.shutdown();
        out.shutdown();
        assert_eq!(*recorder.0.lock(), vec![0]);
    }

    #[test]
    fn test_drop_stops_pending_events() {
        let recorder = Recorder::default();
        {
            let out = RealOutput::start(Box::new(recorder.clone()), Duration::from_secs(60)).unwrap();
            out.beep(1234, Duration::ZERO);
        }
        assert_eq!(*recorder.0.lock(), vec![0]);
    }

    #[test]
    fn test_null_sink() {
        assert!(NullSink.set_period(100).is_ok());
    }
}
