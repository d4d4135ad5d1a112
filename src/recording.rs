//! Recording hand-off
//!
//! The callback offers each processed frame to a `RecordingTap`, which pushes it
//! into a bounded SPSC ring and returns immediately. A worker thread owned by the
//! `Recorder` drains the ring into a `RecordingSink`. A full ring drops the frame
//! and counts it; the callback never waits on the sink.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ringbuf::{Consumer, Producer, RingBuffer};

use crate::error::{EngineError, EngineResult};
use crate::frame::Frame;
use crate::meters::Meters;

const DRAIN_INTERVAL: Duration = Duration::from_millis(5);

/// Receives processed frames while recording is active. Owns its file format.
pub trait RecordingSink: Send {
    fn start(&mut self) -> EngineResult<()>;
    fn add_audio(&mut self, frame: &Frame) -> EngineResult<()>;
    /// Finish the recording; file-backed sinks return where it was written.
    fn stop(&mut self) -> EngineResult<Option<PathBuf>>;
}

// =============================================================================
// SINKS
// =============================================================================

/// 16-bit mono WAV files named `recording_<unix-secs>.wav`.
pub struct WavRecordingSink {
    dir: PathBuf,
    sample_rate: u32,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: Option<PathBuf>,
}

impl WavRecordingSink {
    pub fn new(dir: impl AsRef<Path>, sample_rate: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            sample_rate,
            writer: None,
            path: None,
        }
    }
}

impl RecordingSink for WavRecordingSink {
    fn start(&mut self) -> EngineResult<()> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self.dir.join(format!("recording_{}.wav", secs));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        self.writer = Some(hound::WavWriter::create(&path, spec)?);
        self.path = Some(path);
        Ok(())
    }

    fn add_audio(&mut self, frame: &Frame) -> EngineResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EngineError::Resource("wav sink not started".into()))?;
        for &s in frame.samples() {
            writer.write_sample(s)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<Option<PathBuf>> {
        if let Some(w) = self.writer.take() {
            w.finalize()?;
        }
        Ok(self.path.take())
    }
}

/// Keeps frames in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<Frame>>>,
    started: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        match self.frames.lock() {
            Ok(f) => f.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl RecordingSink for MemorySink {
    fn start(&mut self) -> EngineResult<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn add_audio(&mut self, frame: &Frame) -> EngineResult<()> {
        self.frames
            .lock()
            .map_err(|_| EngineError::Resource("memory sink poisoned".into()))?
            .push(frame.clone());
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<Option<PathBuf>> {
        self.started.store(false, Ordering::Release);
        Ok(None)
    }
}

// =============================================================================
// HAND-OFF QUEUE
// =============================================================================

/// Callback side of the recording queue.
pub struct RecordingTap {
    producer: Producer<Frame>,
    active: Arc<AtomicBool>,
    meters: Arc<Meters>,
}

impl RecordingTap {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns false when recording is off or the frame was dropped.
    pub fn offer(&mut self, frame: &Frame) -> bool {
        if !self.is_active() {
            return false;
        }
        if self.producer.push(frame.clone()).is_err() {
            self.meters.inc_recording_dropped();
            return false;
        }
        true
    }
}

struct Session {
    stop: Arc<AtomicBool>,
    worker: JoinHandle<(Consumer<Frame>, Box<dyn RecordingSink>, EngineResult<u64>)>,
}

/// Control side: starts and stops the drain worker.
pub struct Recorder {
    consumer: Option<Consumer<Frame>>,
    active: Arc<AtomicBool>,
    session: Option<Session>,
}

pub fn recording_channel(capacity: usize, meters: Arc<Meters>) -> (RecordingTap, Recorder) {
    let (producer, consumer) = RingBuffer::<Frame>::new(capacity.max(1)).split();
    let active = Arc::new(AtomicBool::new(false));
    (
        RecordingTap {
            producer,
            active: Arc::clone(&active),
            meters,
        },
        Recorder {
            consumer: Some(consumer),
            active,
            session: None,
        },
    )
}

impl Recorder {
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn start(&mut self, mut sink: Box<dyn RecordingSink>) -> EngineResult<()> {
        if self.session.is_some() {
            return Err(EngineError::Resource("recording already active".into()));
        }
        let mut consumer = self
            .consumer
            .take()
            .ok_or_else(|| EngineError::Resource("recording queue unavailable".into()))?;
        // Frames left over from a previous session
        while consumer.pop().is_some() {}

        if let Err(e) = sink.start() {
            self.consumer = Some(consumer);
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("orionwave-recorder".into())
            .spawn(move || drain_loop(consumer, sink, stop_worker));
        let worker = spawned.map_err(EngineError::resource)?;

        self.session = Some(Session { stop, worker });
        self.active.store(true, Ordering::Release);
        log::info!("recording started");
        Ok(())
    }

    /// Flush the queue into the sink and finish it. `Ok(None)` if not recording.
    pub fn stop(&mut self) -> EngineResult<Option<PathBuf>> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        self.active.store(false, Ordering::Release);
        session.stop.store(true, Ordering::Release);

        let (consumer, mut sink, written) = session
            .worker
            .join()
            .map_err(|_| EngineError::Resource("recording worker panicked".into()))?;
        self.consumer = Some(consumer);

        let path = sink.stop()?;
        let frames = written?;
        match &path {
            Some(p) => log::info!("recording stopped: {} frames to {}", frames, p.display()),
            None => log::info!("recording stopped: {} frames", frames),
        }
        Ok(path)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.stop() {
                log::error!("recording teardown failed: {}", e);
            }
        }
    }
}

fn drain_loop(
    mut consumer: Consumer<Frame>,
    mut sink: Box<dyn RecordingSink>,
    stop: Arc<AtomicBool>,
) -> (Consumer<Frame>, Box<dyn RecordingSink>, EngineResult<u64>) {
    let mut written = 0u64;
    let mut first_err = None;
    loop {
        // Read the flag before draining so the last frames are not missed.
        let stopping = stop.load(Ordering::Acquire);
        while let Some(frame) = consumer.pop() {
            match sink.add_audio(&frame) {
                Ok(()) => written += 1,
                Err(e) => {
                    if first_err.is_none() {
                        log::error!("recording sink rejected a frame: {}", e);
                        first_err = Some(e);
                    }
                }
            }
        }
        if stopping {
            break;
        }
        std::thread::sleep(DRAIN_INTERVAL);
    }
    let result = match first_err {
        Some(e) => Err(e),
        None => Ok(written),
    };
    (consumer, sink, result)
}
