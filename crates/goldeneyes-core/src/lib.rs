//! goldeneyes-core — Face-anchored eye marker placement.
//!
//! Projects a tracked face pose and its jaw-open blendshape onto two sphere
//! eye markers, and owns those markers for the lifetime of a tracking session.

pub mod projector;
pub mod scene;
pub mod session;
pub mod types;

pub use projector::{FaceAnchorProjector, LostFacePolicy, PlacementPolicy, ProjectorConfig};
pub use scene::{NodeId, SceneGraph, SceneTree};
pub use session::{FaceTracker, PoseSink, TrackingConfig, TrackingError, TrackingSession};
pub use types::{
    BlendshapeSample, FacePose, MarkerId, MarkerTransform, SessionCounter, SessionHandle,
    TrackingEvent, TrackingUpdate,
};
