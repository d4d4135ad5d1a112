//! Device boundary
//!
//! The audio driver is an external collaborator: it owns the physical streams
//! and calls `VoicePipeline::process_frame` once per chunk. This module only
//! names what the engine needs from it and sequences teardown.
//!
//! # Design Notes
//! - Shutdown order is fixed: input stream, output stream, recording flush,
//!   automation, device release, statistics. Each step runs even if an earlier
//!   one failed; failures are logged and collected, never retried.

use std::path::PathBuf;

use crate::control::PipelineHandle;
use crate::error::EngineResult;
use crate::frame::Frame;

/// Blocking reader used outside the callback (noise calibration, offline runs).
/// An empty frame means end of input.
pub trait FrameSource {
    fn read_frame(&mut self) -> EngineResult<Frame>;
}

pub trait StreamHandle: Send {
    fn stop(&mut self) -> EngineResult<()>;
    fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

pub trait DeviceHost: Send {
    fn release(&mut self) -> EngineResult<()>;
}

/// Serves fixed-size frames from an in-memory buffer, then empty frames.
pub struct BufferSource {
    samples: Vec<i16>,
    chunk: usize,
    pos: usize,
}

impl BufferSource {
    pub fn new(samples: Vec<i16>, chunk: usize) -> Self {
        Self {
            samples,
            chunk: chunk.max(1),
            pos: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.pos
    }
}

impl FrameSource for BufferSource {
    fn read_frame(&mut self) -> EngineResult<Frame> {
        let end = (self.pos + self.chunk).min(self.samples.len());
        let frame = Frame::new(self.samples[self.pos..end].to_vec());
        self.pos = end;
        Ok(frame)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownStep {
    pub name: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    pub steps: Vec<ShutdownStep>,
    pub recording: Option<PathBuf>,
    pub stats_file: Option<PathBuf>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    fn record(&mut self, name: &'static str, result: EngineResult<()>) {
        let error = match result {
            Ok(()) => None,
            Err(e) => {
                log::error!("shutdown step '{}' failed: {}", name, e);
                Some(e.to_string())
            }
        };
        self.steps.push(ShutdownStep { name, error });
    }
}

/// Streams and device opened by the driver for one pipeline.
pub struct StreamSession {
    input: Option<Box<dyn StreamHandle>>,
    output: Option<Box<dyn StreamHandle>>,
    host: Option<Box<dyn DeviceHost>>,
    handle: PipelineHandle,
}

fn stop_stream(stream: Option<Box<dyn StreamHandle>>) -> EngineResult<()> {
    let Some(mut s) = stream else {
        return Ok(());
    };
    let stopped = s.stop();
    let closed = s.close();
    stopped.and(closed)
}

impl StreamSession {
    pub fn new(
        handle: PipelineHandle,
        input: Box<dyn StreamHandle>,
        output: Box<dyn StreamHandle>,
        host: Box<dyn DeviceHost>,
    ) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            host: Some(host),
            handle,
        }
    }

    /// Best-effort teardown. A second call only repeats the non-device steps.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        report.record("input_stream", stop_stream(self.input.take()));
        report.record("output_stream", stop_stream(self.output.take()));

        let recording = self.handle.stop_recording().map(|path| {
            report.recording = path;
        });
        report.record("recording", recording);

        self.handle.stop_automation();
        report.record("automation", Ok(()));

        let released = match self.host.take() {
            Some(mut h) => h.release(),
            None => Ok(()),
        };
        report.record("device", released);

        self.handle.drain_realtime_log();

        let stats = match self.handle.config().stats_path.clone() {
            Some(path) => self.handle.save_statistics(&path).map(|()| {
                log::info!("performance statistics written to {}", path.display());
                report.stats_file = Some(path);
            }),
            None => Ok(()),
        };
        report.record("statistics", stats);

        report
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.input.is_some() || self.output.is_some() || self.host.is_some() {
            let report = self.shutdown();
            if !report.is_clean() {
                log::warn!("stream session dropped with shutdown errors");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::EngineError;
    use crate::VoicePipeline;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct FakeStream {
        name: &'static str,
        journal: Journal,
        fail: bool,
    }

    impl StreamHandle for FakeStream {
        fn stop(&mut self) -> EngineResult<()> {
            self.journal.lock().unwrap().push(self.name);
            if self.fail {
                return Err(EngineError::Resource("device gone".into()));
            }
            Ok(())
        }
    }

    struct FakeHost(Journal);

    impl DeviceHost for FakeHost {
        fn release(&mut self) -> EngineResult<()> {
            self.0.lock().unwrap().push("host");
            Ok(())
        }
    }

    #[test]
    fn test_shutdown_order_and_best_effort() {
        let mut cfg = EngineConfig::default();
        cfg.stats_path = None;
        let (_pipeline, handle) = VoicePipeline::new(cfg).unwrap();
        let journal: Journal = Arc::default();
        let mut session = StreamSession::new(
            handle.clone(),
            Box::new(FakeStream {
                name: "input",
                journal: journal.clone(),
                fail: true,
            }),
            Box::new(FakeStream {
                name: "output",
                journal: journal.clone(),
                fail: false,
            }),
            Box::new(FakeHost(journal.clone())),
        );

        let report = session.shutdown();
        assert_eq!(*journal.lock().unwrap(), vec!["input", "output", "host"]);
        assert!(!report.is_clean());
        let names: Vec<_> = report.steps.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "input_stream",
                "output_stream",
                "recording",
                "automation",
                "device",
                "statistics"
            ]
        );
        assert!(report.steps[1..].iter().all(|s| s.error.is_none()));
        // Automation refuses work after shutdown.
        assert!(handle
            .automate("reverb", "mix", 0.0, 1.0, 0.1, crate::automation::Curve::Linear)
            .is_err());
    }

    #[test]
    fn test_buffer_source_ends_with_empty_frame() {
        let mut src = BufferSource::new(vec![1; 10], 4);
        assert_eq!(src.read_frame().unwrap().len(), 4);
        assert_eq!(src.read_frame().unwrap().len(), 4);
        assert_eq!(src.read_frame().unwrap().len(), 2);
        assert!(src.read_frame().unwrap().is_empty());
        assert_eq!(src.remaining(), 0);
    }

    #[test]
    fn test_stats_persisted_on_shutdown() {
        let path =
            std::env::temp_dir().join(format!("orionwave-stats-{}.json", std::process::id()));
        let mut cfg = EngineConfig::default();
        cfg.stats_path = Some(path.clone());
        let (_pipeline, handle) = VoicePipeline::new(cfg).unwrap();
        let journal: Journal = Arc::default();
        let mut session = StreamSession::new(
            handle,
            Box::new(FakeStream {
                name: "input",
                journal: journal.clone(),
                fail: false,
            }),
            Box::new(FakeStream {
                name: "output",
                journal: journal.clone(),
                fail: false,
            }),
            Box::new(FakeHost(journal)),
        );
        let report = session.shutdown();
        assert!(report.is_clean());
        assert_eq!(report.stats_file.as_deref(), Some(path.as_path()));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("total_runtime_secs"));
        std::fs::remove_file(&path).ok();
    }
}
