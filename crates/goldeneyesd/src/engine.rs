use goldeneyes_core::projector::ConfigError;
use goldeneyes_core::session::{SessionError, SessionStatus};
use goldeneyes_core::{
    FaceAnchorProjector, FaceTracker, MarkerTransform, PoseSink, ProjectorConfig, SceneTree,
    SessionHandle, TrackingConfig, TrackingEvent, TrackingSession, TrackingUpdate,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("projector configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages consumed by the engine thread. UI requests and tracker events
/// share this queue, so they are applied strictly in arrival order.
enum EngineRequest {
    SetTrackingEnabled {
        enabled: bool,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    CurrentTransforms {
        reply: oneshot::Sender<Option<[MarkerTransform; 2]>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Tracking(TrackingEvent),
    SourceFinished(SessionHandle),
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Start or stop tracking. Returns whether tracking is active afterwards.
    pub async fn set_tracking_enabled(&self, enabled: bool) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SetTrackingEnabled {
                enabled,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// World-space marker transforms, `None` while tracking is off.
    pub async fn current_marker_transforms(
        &self,
    ) -> Result<Option<[MarkerTransform; 2]>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CurrentTransforms { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Ask the engine thread to stop tracking and exit.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineRequest::Shutdown).await;
    }
}

/// Tracker side of the engine queue.
///
/// Never blocks the tracker thread. Events that do not fit in the queue wait
/// in an overflow list, oldest first, and the engine moves them into the
/// queue as it drains it. Consecutive poses in the overflow collapse to the
/// latest one; face-lost and end-of-stream events are always kept.
struct TrackerQueue {
    tx: mpsc::Sender<EngineRequest>,
    overflow: Mutex<VecDeque<EngineRequest>>,
}

impl TrackerQueue {
    fn new(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self {
            tx,
            overflow: Mutex::new(VecDeque::new()),
        }
    }

    fn overflow(&self) -> MutexGuard<'_, VecDeque<EngineRequest>> {
        self.overflow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false once the engine has gone away.
    fn push(&self, req: EngineRequest) -> bool {
        let mut overflow = self.overflow();
        if overflow.is_empty() {
            return match self.tx.try_send(req) {
                Ok(()) => true,
                Err(TrySendError::Full(req)) => {
                    tracing::trace!("engine queue full; holding tracker event");
                    overflow.push_back(req);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            };
        }
        if self.tx.is_closed() {
            overflow.clear();
            return false;
        }
        if is_pose(&req) && overflow.back().is_some_and(is_pose) {
            tracing::trace!("superseding held pose");
            overflow.pop_back();
        }
        overflow.push_back(req);
        true
    }

    /// Move held events into the queue while it has room.
    fn flush(&self) {
        let mut overflow = self.overflow();
        while let Some(req) = overflow.pop_front() {
            match self.tx.try_send(req) {
                Ok(()) => {}
                Err(TrySendError::Full(req)) => {
                    overflow.push_front(req);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    overflow.clear();
                    break;
                }
            }
        }
    }
}

fn is_pose(req: &EngineRequest) -> bool {
    matches!(
        req,
        EngineRequest::Tracking(TrackingEvent {
            update: TrackingUpdate::Pose { .. },
            ..
        })
    )
}

struct EngineSink {
    queue: Arc<TrackerQueue>,
}

impl PoseSink for EngineSink {
    fn deliver(&self, event: TrackingEvent) -> bool {
        self.queue.push(EngineRequest::Tracking(event))
    }

    fn finished(&self, session: SessionHandle) {
        self.queue.push(EngineRequest::SourceFinished(session));
    }
}

/// Spawn the tracking session on a dedicated OS thread.
///
/// Validates the projector configuration up front, then enters a request
/// loop until [`EngineHandle::shutdown`] is called.
pub fn spawn_engine<T>(
    tracker: T,
    projector: ProjectorConfig,
    queue_depth: usize,
) -> Result<(EngineHandle, std::thread::JoinHandle<()>), EngineError>
where
    T: FaceTracker + 'static,
{
    let projector = FaceAnchorProjector::new(projector)?;
    tracing::info!(
        placement = projector.config().placement.name(),
        base_scale = projector.config().base_scale,
        scale_factor = projector.config().scale_factor,
        lost_face = ?projector.config().lost_face,
        "projector configured"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));
    let queue = Arc::new(TrackerQueue::new(tx.clone()));
    let sink: Arc<dyn PoseSink> = Arc::new(EngineSink {
        queue: Arc::clone(&queue),
    });
    let mut session = TrackingSession::new(
        tracker,
        SceneTree::new(),
        projector,
        sink,
        TrackingConfig::default(),
    );

    let thread = std::thread::Builder::new()
        .name("goldeneyes-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::SetTrackingEnabled { enabled, reply } => {
                        let result = session
                            .set_tracking_enabled(enabled)
                            .map_err(EngineError::from);
                        if let Err(e) = &result {
                            tracing::warn!(enabled, error = %e, "tracking toggle failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::CurrentTransforms { reply } => {
                        let _ = reply.send(session.current_marker_transforms());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(session.status());
                    }
                    EngineRequest::Tracking(event) => {
                        if let Err(e) = session.handle_event(event) {
                            tracing::warn!(error = %e, "failed to apply tracker event");
                        }
                    }
                    EngineRequest::SourceFinished(handle) => {
                        if session.handle() == Some(handle) {
                            tracing::info!(session = %handle, "tracking source exhausted; markers frozen");
                        }
                    }
                    EngineRequest::Shutdown => break,
                }
                queue.flush();
            }
            if let Err(e) = session.set_tracking_enabled(false) {
                tracing::warn!(error = %e, "failed to stop tracking on shutdown");
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, thread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use goldeneyes_core::session::TrackingError;
    use goldeneyes_core::{BlendshapeSample, FacePose, LostFacePolicy, PlacementPolicy, SessionCounter};
    use glam::{Quat, Vec3};

    /// Delivers a fixed script of updates synchronously from `start`.
    struct ScriptedTracker {
        script: Vec<TrackingUpdate>,
        available: bool,
        sessions: SessionCounter,
    }

    impl ScriptedTracker {
        fn new(script: Vec<TrackingUpdate>, available: bool) -> Self {
            Self {
                script,
                available,
                sessions: SessionCounter::default(),
            }
        }
    }

    impl FaceTracker for ScriptedTracker {
        fn start(
            &mut self,
            _config: &TrackingConfig,
            sink: Arc<dyn PoseSink>,
        ) -> Result<SessionHandle, TrackingError> {
            if !self.available {
                return Err(TrackingError::Unavailable("no front camera".into()));
            }
            let handle = self.sessions.next();
            for update in &self.script {
                sink.deliver(TrackingEvent {
                    session: handle,
                    update: update.clone(),
                });
            }
            sink.finished(handle);
            Ok(handle)
        }

        fn stop(&mut self, _handle: SessionHandle) {}
    }

    fn projector() -> ProjectorConfig {
        ProjectorConfig::new(
            PlacementPolicy::ForwardUp {
                forward_offset: 0.05,
                upward_offset: 0.02,
            },
            1.0,
            2.0,
        )
    }

    fn pose(jaw_open: f32) -> TrackingUpdate {
        TrackingUpdate::Pose {
            pose: FacePose {
                position: Vec3::new(0.0, 0.0, -0.5),
                orientation: Quat::IDENTITY,
                forward_axis: Vec3::new(0.0, 0.0, -1.0),
                up_axis: Vec3::Y,
                eye_joints: None,
            },
            blendshapes: BlendshapeSample::new(jaw_open),
        }
    }

    #[tokio::test]
    async fn test_toggle_and_read_transforms() {
        let tracker = ScriptedTracker::new(vec![pose(0.0), pose(1.0)], true);
        let (engine, thread) = spawn_engine(tracker, projector(), 16).unwrap();

        assert!(engine.current_marker_transforms().await.unwrap().is_none());
        assert!(engine.set_tracking_enabled(true).await.unwrap());

        let [left, right] = engine.current_marker_transforms().await.unwrap().unwrap();
        assert!(left.position.abs_diff_eq(Vec3::new(0.0, 0.02, -0.45), 1e-6));
        assert!(right.position.abs_diff_eq(Vec3::new(0.0, 0.02, -0.55), 1e-6));
        assert_eq!(left.scale, 3.0);

        let status = engine.status().await.unwrap();
        assert!(status.tracking);
        assert_eq!(status.updates, 2);

        assert!(!engine.set_tracking_enabled(false).await.unwrap());
        assert!(engine.current_marker_transforms().await.unwrap().is_none());

        engine.shutdown().await;
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            engine.status().await,
            Err(EngineError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_face_lost_survives_full_queue() {
        let mut config = projector();
        config.lost_face = LostFacePolicy::Hide;
        let tracker = ScriptedTracker::new(
            vec![pose(0.0), pose(0.5), pose(1.0), TrackingUpdate::FaceLost],
            true,
        );
        let (engine, thread) = spawn_engine(tracker, config, 1).unwrap();

        assert!(engine.set_tracking_enabled(true).await.unwrap());

        // Held events drain as the engine works through its queue.
        let mut hidden = false;
        for _ in 0..100 {
            let status = engine.status().await.unwrap();
            if status.updates > 0 && !status.face_visible {
                hidden = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(hidden, "face-lost event was dropped");

        let [left, right] = engine.current_marker_transforms().await.unwrap().unwrap();
        assert!(!left.visible && !right.visible);
        // The last pose before the loss still lands: only intermediate poses
        // may be superseded.
        assert_eq!(left.scale, 3.0);

        engine.shutdown().await;
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_overflow_keeps_transitions_and_latest_pose() {
        let (tx, mut rx) = mpsc::channel(1);
        let queue = TrackerQueue::new(tx);
        let handle = SessionCounter::default().next();
        let event = |update| {
            EngineRequest::Tracking(TrackingEvent {
                session: handle,
                update,
            })
        };

        assert!(queue.push(event(pose(0.1))));
        assert!(queue.push(event(pose(0.2))));
        assert!(queue.push(event(TrackingUpdate::FaceLost)));
        assert!(queue.push(event(pose(0.3))));
        assert!(queue.push(event(pose(0.4))));
        assert!(queue.push(EngineRequest::SourceFinished(handle)));

        let mut seen = Vec::new();
        while let Ok(req) = rx.try_recv() {
            seen.push(match req {
                EngineRequest::Tracking(TrackingEvent {
                    update: TrackingUpdate::Pose { blendshapes, .. },
                    ..
                }) => format!("pose {}", blendshapes.jaw_open),
                EngineRequest::Tracking(_) => "face_lost".to_string(),
                EngineRequest::SourceFinished(_) => "finished".to_string(),
                _ => "other".to_string(),
            });
            queue.flush();
        }
        assert_eq!(
            seen,
            ["pose 0.1", "pose 0.2", "face_lost", "pose 0.4", "finished"]
        );

        drop(rx);
        assert!(!queue.push(event(pose(0.5))));
    }

    #[tokio::test]
    async fn test_unavailable_tracker_reports_error() {
        let tracker = ScriptedTracker::new(Vec::new(), false);
        let (engine, _thread) = spawn_engine(tracker, projector(), 4).unwrap();

        let err = engine.set_tracking_enabled(true).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Session(SessionError::Tracking(TrackingError::Unavailable(_)))
        ));
        assert!(!engine.status().await.unwrap().tracking);
        engine.shutdown().await;
    }

    #[test]
    fn test_invalid_projector_rejected() {
        let mut config = projector();
        config.min_scale = 0.0;
        let tracker = ScriptedTracker::new(Vec::new(), true);
        assert!(matches!(
            spawn_engine(tracker, config, 4),
            Err(EngineError::Config(_))
        ));
    }
}
