//! Push-driven frame loop
//!
//! The frame source runs on one thread and the pipeline on another. Frames
//! travel through an unbounded channel and are processed strictly in arrival
//! order, one pass at a time; results come back as [`StreamEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::frame::{FrameSize, OutputGrid, OwnedFrame};
use crate::pipeline::{Pipeline, SettingsHandle};
use crate::source::{FrameSource, SourceHandle, spawn_source};

/// Outcome of one pass, or a rejected settings update
#[derive(Debug)]
pub enum StreamEvent {
    Frame(OutputGrid),
    Error(Error),
}

pub struct AsciiStream;

impl AsciiStream {
    /// Starts streaming `source` through `pipeline` at `fps` frames per second
    ///
    /// # Errors
    /// * `DimensionMismatch` if the source does not produce frames of the
    ///   pipeline's surface size
    /// * `InvalidConfig` if `fps` is zero
    pub fn spawn<S>(pipeline: Pipeline, source: S, fps: u32) -> Result<StreamHandle>
    where
        S: FrameSource + 'static,
    {
        if fps == 0 {
            return Err(Error::InvalidConfig("fps must be positive".to_string()));
        }
        if source.size() != pipeline.surface() {
            return Err(Error::surface_mismatch(pipeline.surface(), source.size()));
        }

        let settings = pipeline.settings();
        let surface = pipeline.surface();
        let stopped = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();

        let worker = {
            let stopped = Arc::clone(&stopped);
            thread::Builder::new()
                .name("ascii-pipeline".to_string())
                .spawn(move || run_worker(pipeline, frame_rx, event_tx, stopped))
                .map_err(|e| Error::Source(format!("cannot start pipeline thread: {e}")))?
        };
        let source = spawn_source(source, fps, frame_tx)?;

        log::info!("streaming {} frames at {} fps", surface, fps);

        Ok(StreamHandle {
            settings,
            surface,
            source,
            events,
            stopped,
            worker: Some(worker),
        })
    }
}

fn run_worker(
    mut pipeline: Pipeline,
    frames: Receiver<Result<OwnedFrame>>,
    events: Sender<StreamEvent>,
    stopped: Arc<AtomicBool>,
) {
    for message in frames {
        if stopped.load(Ordering::SeqCst) {
            break;
        }

        let event = match message {
            Ok(frame) => {
                if let Err(e) = pipeline.apply_pending() {
                    log::warn!("settings update rejected: {e}");
                    if events.send(StreamEvent::Error(e)).is_err() {
                        break;
                    }
                }
                match pipeline.process_frame(&frame.as_frame()) {
                    Ok(grid) => StreamEvent::Frame(grid),
                    Err(e) => StreamEvent::Error(e),
                }
            }
            Err(e) => StreamEvent::Error(e),
        };

        // Results of a pass that finished after stop() are dropped
        if stopped.load(Ordering::SeqCst) || events.send(event).is_err() {
            break;
        }
    }

    pipeline.release();
    log::debug!("pipeline worker stopped");
}

/// Controls a running stream. Dropping the handle stops the stream.
pub struct StreamHandle {
    settings: SettingsHandle,
    surface: FrameSize,
    source: SourceHandle,
    events: Receiver<StreamEvent>,
    stopped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Handle for posting configuration updates, applied before the next frame
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn surface(&self) -> FrameSize {
        self.surface
    }

    pub fn fps(&self) -> u32 {
        self.source.fps()
    }

    /// Zero is ignored
    pub fn set_fps(&self, fps: u32) {
        self.source.set_fps(fps);
    }

    pub fn events(&self) -> &Receiver<StreamEvent> {
        &self.events
    }

    /// Drains the events received so far without blocking
    pub fn poll(&self) -> Vec<StreamEvent> {
        self.events.try_iter().collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stops the source and the pipeline and releases compute resources
    ///
    /// Frames still queued are dropped unprocessed. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.source.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("pipeline worker panicked");
            }
            log::info!("stream stopped");
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
