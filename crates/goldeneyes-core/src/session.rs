//! Tracking session: owns the eye markers between tracking start and stop.
//!
//! The session is single-writer. Callers serialize toggles and tracker
//! events onto one thread (the daemon does this with a single queue);
//! nothing here is reentrant.

use crate::projector::{FaceAnchorProjector, LostFacePolicy, Projection};
use crate::scene::{NodeId, NodeKind, SceneError, SceneGraph};
use crate::types::{
    BlendshapeSample, FacePose, MarkerId, MarkerTransform, SessionHandle, TrackingEvent,
    TrackingUpdate,
};
use glam::{Quat, Vec3};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("face tracking unavailable: {0}")]
    Unavailable(String),
    #[error("tracker already running as {0}")]
    AlreadyRunning(SessionHandle),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("tracking error: {0}")]
    Tracking(#[from] TrackingError),
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),
}

/// Options passed to the tracker on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackingConfig {
    /// Discard any tracking history and start from a fresh state.
    pub reset_tracking: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            reset_tracking: true,
        }
    }
}

/// Receives tracker events. Returns false once the receiver is gone,
/// telling the tracker to stop producing.
pub trait PoseSink: Send + Sync {
    fn deliver(&self, event: TrackingEvent) -> bool;

    /// Called when a finite source has delivered its last event.
    fn finished(&self, _session: SessionHandle) {}
}

/// External face-tracking service.
pub trait FaceTracker: Send {
    /// Begin delivering events to `sink`, each stamped with the returned handle.
    fn start(
        &mut self,
        config: &TrackingConfig,
        sink: Arc<dyn PoseSink>,
    ) -> Result<SessionHandle, TrackingError>;

    /// Stop delivering events for `handle`. Events already queued may still arrive.
    fn stop(&mut self, handle: SessionHandle);
}

impl<T: FaceTracker + ?Sized> FaceTracker for Box<T> {
    fn start(
        &mut self,
        config: &TrackingConfig,
        sink: Arc<dyn PoseSink>,
    ) -> Result<SessionHandle, TrackingError> {
        (**self).start(config, sink)
    }

    fn stop(&mut self, handle: SessionHandle) {
        (**self).stop(handle)
    }
}

/// One eye marker and the scene node it owns.
#[derive(Debug, Clone)]
pub struct EyeMarker {
    pub id: MarkerId,
    node: NodeId,
    /// Offset from the parent node.
    pub local_offset: Vec3,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: f32,
    attached: bool,
}

impl EyeMarker {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    fn transform(&self) -> MarkerTransform {
        MarkerTransform {
            id: self.id,
            position: self.position,
            orientation: self.orientation,
            scale: self.scale,
            visible: self.attached,
        }
    }
}

#[derive(Debug)]
struct ActiveTracking {
    handle: SessionHandle,
    anchor: NodeId,
    markers: [EyeMarker; 2],
    face_visible: bool,
    updates: u64,
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Tracking(ActiveTracking),
}

/// Summary of the session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub tracking: bool,
    pub session: Option<SessionHandle>,
    pub face_visible: bool,
    pub updates: u64,
    pub placement: &'static str,
    pub lost_face: LostFacePolicy,
}

/// Owns the tracker, the scene and, while tracking, the two eye markers.
pub struct TrackingSession<T: FaceTracker, S: SceneGraph> {
    tracker: T,
    scene: S,
    projector: FaceAnchorProjector,
    sink: Arc<dyn PoseSink>,
    config: TrackingConfig,
    state: SessionState,
}

impl<T: FaceTracker, S: SceneGraph> TrackingSession<T, S> {
    pub fn new(
        tracker: T,
        scene: S,
        projector: FaceAnchorProjector,
        sink: Arc<dyn PoseSink>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            tracker,
            scene,
            projector,
            sink,
            config,
            state: SessionState::Idle,
        }
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, SessionState::Tracking(_))
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        match &self.state {
            SessionState::Tracking(active) => Some(active.handle),
            SessionState::Idle => None,
        }
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn projector(&self) -> &FaceAnchorProjector {
        &self.projector
    }

    /// Markers owned by the session, indexed by [`MarkerId::index`].
    pub fn markers(&self) -> Option<&[EyeMarker; 2]> {
        match &self.state {
            SessionState::Tracking(active) => Some(&active.markers),
            SessionState::Idle => None,
        }
    }

    /// World-space marker transforms, or `None` while idle.
    pub fn current_marker_transforms(&self) -> Option<[MarkerTransform; 2]> {
        self.markers().map(|m| [m[0].transform(), m[1].transform()])
    }

    pub fn status(&self) -> SessionStatus {
        let config = self.projector.config();
        let (session, face_visible, updates) = match &self.state {
            SessionState::Tracking(active) => {
                (Some(active.handle), active.face_visible, active.updates)
            }
            SessionState::Idle => (None, false, 0),
        };
        SessionStatus {
            tracking: self.is_tracking(),
            session,
            face_visible,
            updates,
            placement: config.placement.name(),
            lost_face: config.lost_face,
        }
    }

    /// Start or stop tracking. Returns whether tracking is active afterwards.
    ///
    /// Starting creates the anchor and both markers; stopping detaches and
    /// destroys them. Requesting the current state is a no-op.
    pub fn set_tracking_enabled(&mut self, enabled: bool) -> Result<bool, SessionError> {
        match (enabled, self.is_tracking()) {
            (true, false) => self.start()?,
            (false, true) => self.stop(),
            _ => tracing::debug!(enabled, "tracking already in requested state"),
        }
        Ok(self.is_tracking())
    }

    fn start(&mut self) -> Result<(), SessionError> {
        let handle = self.tracker.start(&self.config, Arc::clone(&self.sink))?;

        match self.build_markers(handle) {
            Ok(active) => {
                tracing::info!(
                    session = %handle,
                    placement = self.projector.config().placement.name(),
                    "tracking started"
                );
                self.state = SessionState::Tracking(active);
                Ok(())
            }
            Err(e) => {
                tracing::error!(session = %handle, error = %e, "failed to attach eye markers");
                self.tracker.stop(handle);
                Err(e.into())
            }
        }
    }

    fn build_markers(&mut self, handle: SessionHandle) -> Result<ActiveTracking, SceneError> {
        let radius = self.projector.config().marker_radius;
        let rest = self.projector.rest();

        let anchor = self.scene.create_node(NodeKind::Anchor);
        let nodes = MarkerId::ALL.map(|_| self.scene.create_node(NodeKind::Sphere { radius }));

        let markers = MarkerId::ALL.map(|id| {
            let placement = rest.marker(id);
            EyeMarker {
                id,
                node: nodes[id.index()],
                local_offset: placement.local.position,
                position: placement.world.position,
                orientation: placement.world.orientation,
                scale: rest.scale,
                attached: false,
            }
        });

        let mut active = ActiveTracking {
            handle,
            anchor,
            markers,
            face_visible: false,
            updates: 0,
        };

        if let Err(e) = self.attach_markers(&mut active, &rest) {
            self.teardown(&mut active);
            return Err(e);
        }
        Ok(active)
    }

    fn attach_markers(
        &mut self,
        active: &mut ActiveTracking,
        rest: &Projection,
    ) -> Result<(), SceneError> {
        let root = self.scene.root();
        self.scene.attach(active.anchor, root)?;
        for marker in active.markers.iter_mut() {
            let local = rest.marker(marker.id).local;
            self.scene
                .set_transform(marker.node, local.position, local.orientation, rest.scale)?;
            self.scene.attach(marker.node, active.anchor)?;
            marker.attached = true;
        }
        Ok(())
    }

    fn stop(&mut self) {
        let SessionState::Tracking(mut active) =
            std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            return;
        };
        self.tracker.stop(active.handle);
        self.teardown(&mut active);
        tracing::info!(session = %active.handle, updates = active.updates, "tracking stopped");
    }

    /// Detach and destroy the markers and the anchor. Keeps going on error so
    /// no node is left behind because an earlier one failed.
    fn teardown(&mut self, active: &mut ActiveTracking) {
        for marker in active.markers.iter_mut() {
            if marker.attached {
                if let Err(e) = self.scene.detach(marker.node) {
                    tracing::warn!(marker = %marker.id, error = %e, "failed to detach marker");
                }
                marker.attached = false;
            }
            if let Err(e) = self.scene.remove_node(marker.node) {
                tracing::warn!(marker = %marker.id, error = %e, "failed to remove marker node");
            }
        }

        if let Err(e) = self.scene.detach(active.anchor) {
            tracing::debug!(error = %e, "anchor was not attached");
        }
        if let Err(e) = self.scene.remove_node(active.anchor) {
            tracing::warn!(error = %e, "failed to remove anchor node");
        }
    }

    /// Apply one tracker event. Events for a session other than the current
    /// one (including any that arrive while idle) are dropped.
    pub fn handle_event(&mut self, event: TrackingEvent) -> Result<(), SessionError> {
        let current = match &self.state {
            SessionState::Tracking(active) => active.handle,
            SessionState::Idle => {
                tracing::trace!(session = %event.session, "dropping event while idle");
                return Ok(());
            }
        };
        if event.session != current {
            tracing::debug!(
                event_session = %event.session,
                current = %current,
                "dropping stale tracker event"
            );
            return Ok(());
        }

        match event.update {
            TrackingUpdate::Pose { pose, blendshapes } if pose.is_valid() => {
                self.apply_pose(&pose, blendshapes)
            }
            TrackingUpdate::Pose { .. } => {
                tracing::warn!("discarding non-finite face pose");
                self.face_lost()
            }
            TrackingUpdate::FaceLost => self.face_lost(),
        }
    }

    fn apply_pose(
        &mut self,
        pose: &FacePose,
        blendshapes: BlendshapeSample,
    ) -> Result<(), SessionError> {
        if !blendshapes.in_range() {
            tracing::debug!(jaw_open = blendshapes.jaw_open, "clamping jaw_open into [0, 1]");
        }
        let projection = self.projector.project(pose, blendshapes);

        let SessionState::Tracking(active) = &mut self.state else {
            return Ok(());
        };

        if let Some(anchor) = projection.anchor {
            self.scene
                .set_transform(active.anchor, anchor.position, anchor.orientation, 1.0)?;
        }

        for marker in active.markers.iter_mut() {
            let placement = projection.marker(marker.id);
            if !marker.attached {
                self.scene.attach(marker.node, active.anchor)?;
                marker.attached = true;
            }
            self.scene.set_transform(
                marker.node,
                placement.local.position,
                placement.local.orientation,
                projection.scale,
            )?;
            marker.local_offset = placement.local.position;
            marker.position = placement.world.position;
            marker.orientation = placement.world.orientation;
            marker.scale = projection.scale;
        }

        if !active.face_visible {
            tracing::debug!(session = %active.handle, "face acquired");
        }
        active.face_visible = true;
        active.updates += 1;
        Ok(())
    }

    fn face_lost(&mut self) -> Result<(), SessionError> {
        let policy = self.projector.config().lost_face;
        let SessionState::Tracking(active) = &mut self.state else {
            return Ok(());
        };

        if active.face_visible {
            tracing::debug!(session = %active.handle, ?policy, "face lost");
        }
        active.face_visible = false;

        if policy == LostFacePolicy::Hide {
            for marker in active.markers.iter_mut().filter(|m| m.attached) {
                self.scene.detach(marker.node)?;
                marker.attached = false;
            }
        }
        Ok(())
    }
}

impl<T: FaceTracker, S: SceneGraph> Drop for TrackingSession<T, S> {
    fn drop(&mut self) {
        self.stop();
    }
}
