//! Replay face tracker.
//!
//! Plays back a recorded face-tracking stream in place of a live tracking
//! service. Recordings are JSON lines, one [`TrackingUpdate`] per line:
//!
//! ```text
//! {"kind":"pose","pose":{"position":[0,0,-0.5],"orientation":[0,0,0,1],"forward_axis":[0,0,-1],"up_axis":[0,1,0]},"blendshapes":{"jaw_open":0.2}}
//! {"kind":"face_lost"}
//! ```

use goldeneyes_core::session::{FaceTracker, PoseSink, TrackingConfig, TrackingError};
use goldeneyes_core::{SessionCounter, SessionHandle, TrackingEvent, TrackingUpdate};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("recording not found: {0}")]
    NotFound(String),
    #[error("failed to read recording {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("recording {0} contains no frames")]
    Empty(String),
}

/// Parse a JSON-lines recording. Blank lines are skipped.
pub fn parse_recording(src: &str) -> Result<Vec<TrackingUpdate>, ReplayError> {
    src.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| ReplayError::Parse {
                line: i + 1,
                source,
            })
        })
        .collect()
}

/// Read and parse a recording from disk.
pub fn load_recording(path: &Path) -> Result<Vec<TrackingUpdate>, ReplayError> {
    if !path.exists() {
        return Err(ReplayError::NotFound(path.display().to_string()));
    }
    let src = std::fs::read_to_string(path).map_err(|source| ReplayError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let frames = parse_recording(&src)?;
    if frames.is_empty() {
        return Err(ReplayError::Empty(path.display().to_string()));
    }
    Ok(frames)
}

struct ReplayRun {
    handle: SessionHandle,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Tracker that replays a recording on a background thread.
///
/// Without `reset_tracking`, a restarted replay resumes where the previous
/// one stopped.
pub struct ReplayTracker {
    path: PathBuf,
    interval: Duration,
    looping: bool,
    cursor: Arc<AtomicUsize>,
    sessions: SessionCounter,
    running: Option<ReplayRun>,
}

impl ReplayTracker {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            looping: false,
            cursor: Arc::new(AtomicUsize::new(0)),
            sessions: SessionCounter::default(),
            running: None,
        }
    }

    /// Restart from the first frame after the last one instead of finishing.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the next frame to deliver.
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    fn join_run(run: ReplayRun) {
        run.stop.store(true, Ordering::Release);
        run.thread.thread().unpark();
        if run.thread.join().is_err() {
            tracing::error!(session = %run.handle, "replay thread panicked");
        }
    }
}

impl FaceTracker for ReplayTracker {
    fn start(
        &mut self,
        config: &TrackingConfig,
        sink: Arc<dyn PoseSink>,
    ) -> Result<SessionHandle, TrackingError> {
        if let Some(run) = &self.running {
            if !run.thread.is_finished() {
                return Err(TrackingError::AlreadyRunning(run.handle));
            }
        }
        if let Some(run) = self.running.take() {
            Self::join_run(run);
        }

        let frames =
            load_recording(&self.path).map_err(|e| TrackingError::Unavailable(e.to_string()))?;

        if config.reset_tracking || self.position() >= frames.len() {
            self.cursor.store(0, Ordering::Release);
        }

        let handle = self.sessions.next();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = ReplayWorker {
            handle,
            frames,
            interval: self.interval,
            looping: self.looping,
            cursor: Arc::clone(&self.cursor),
            stop: Arc::clone(&stop),
            sink,
        };

        let thread = std::thread::Builder::new()
            .name("goldeneyes-replay".into())
            .spawn(move || worker.run())
            .map_err(|e| TrackingError::Unavailable(format!("failed to spawn replay thread: {e}")))?;

        tracing::info!(
            session = %handle,
            path = %self.path.display(),
            from = self.position(),
            "replay started"
        );
        self.running = Some(ReplayRun {
            handle,
            stop,
            thread,
        });
        Ok(handle)
    }

    fn stop(&mut self, handle: SessionHandle) {
        match self.running.take() {
            Some(run) if run.handle == handle => {
                Self::join_run(run);
                tracing::info!(session = %handle, at = self.position(), "replay stopped");
            }
            other => {
                tracing::debug!(session = %handle, "stop for a replay that is not running");
                self.running = other;
            }
        }
    }
}

impl Drop for ReplayTracker {
    fn drop(&mut self) {
        if let Some(run) = self.running.take() {
            Self::join_run(run);
        }
    }
}

struct ReplayWorker {
    handle: SessionHandle,
    frames: Vec<TrackingUpdate>,
    interval: Duration,
    looping: bool,
    cursor: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    sink: Arc<dyn PoseSink>,
}

impl ReplayWorker {
    fn run(self) {
        let mut index = self.cursor.load(Ordering::Acquire);
        let mut delivered = 0usize;

        while !self.stop.load(Ordering::Acquire) {
            if index >= self.frames.len() {
                if self.looping {
                    index = 0;
                } else {
                    break;
                }
            }

            let event = TrackingEvent {
                session: self.handle,
                update: self.frames[index].clone(),
            };
            if !self.sink.deliver(event) {
                tracing::debug!(session = %self.handle, "sink closed; ending replay");
                break;
            }
            index += 1;
            delivered += 1;
            self.cursor.store(index, Ordering::Release);

            self.pause();
        }

        if index >= self.frames.len() && !self.looping {
            self.sink.finished(self.handle);
        }
        tracing::debug!(session = %self.handle, delivered, "replay thread exiting");
    }

    /// Sleep for one frame interval, waking early on stop.
    fn pause(&self) {
        if self.interval.is_zero() {
            return;
        }
        let deadline = Instant::now() + self.interval;
        loop {
            if self.stop.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::park_timeout(deadline - now);
        }
    }
}
