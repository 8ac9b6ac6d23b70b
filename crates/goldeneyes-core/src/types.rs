use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Which of the two eye markers a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerId {
    Left,
    Right,
}

impl MarkerId {
    pub const ALL: [MarkerId; 2] = [MarkerId::Left, MarkerId::Right];

    /// Slot in the two-marker arena.
    pub fn index(self) -> usize {
        match self {
            MarkerId::Left => 0,
            MarkerId::Right => 1,
        }
    }

    /// -1 for the left marker, +1 for the right marker.
    pub fn sign(self) -> f32 {
        match self {
            MarkerId::Left => -1.0,
            MarkerId::Right => 1.0,
        }
    }

    /// Offsets are configured for the right marker; the left one is the
    /// mirror image across the YZ plane.
    pub fn mirror(self, offset: Vec3) -> Vec3 {
        match self {
            MarkerId::Left => Vec3::new(-offset.x, offset.y, offset.z),
            MarkerId::Right => offset,
        }
    }
}

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkerId::Left => write!(f, "left"),
            MarkerId::Right => write!(f, "right"),
        }
    }
}

/// Position and orientation of a node, without scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Placement {
    pub const IDENTITY: Placement = Placement {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Compose a child placement expressed in this placement's frame.
    pub fn then(&self, local: &Placement) -> Placement {
        Placement {
            position: self.position + self.orientation * local.position,
            orientation: self.orientation * local.orientation,
        }
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Translation of the platform's per-eye joint transforms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeJoints {
    pub left: Vec3,
    pub right: Vec3,
}

impl EyeJoints {
    pub fn get(&self, id: MarkerId) -> Vec3 {
        match id {
            MarkerId::Left => self.left,
            MarkerId::Right => self.right,
        }
    }
}

/// Face anchor pose as reported by the tracking service for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacePose {
    pub position: Vec3,
    pub orientation: Quat,
    pub forward_axis: Vec3,
    pub up_axis: Vec3,
    /// Present only when the tracker reports per-eye transforms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eye_joints: Option<EyeJoints>,
}

impl FacePose {
    /// True when every component is finite and the orientation is non-degenerate.
    pub fn is_valid(&self) -> bool {
        let joints_ok = self
            .eye_joints
            .map(|j| j.left.is_finite() && j.right.is_finite())
            .unwrap_or(true);
        self.position.is_finite()
            && self.orientation.is_finite()
            && self.orientation.length_squared() > f32::EPSILON
            && self.forward_axis.is_finite()
            && self.up_axis.is_finite()
            && joints_ok
    }

    pub fn placement(&self) -> Placement {
        Placement::new(self.position, self.orientation.normalize())
    }
}

impl Default for FacePose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            forward_axis: Vec3::Z,
            up_axis: Vec3::Y,
            eye_joints: None,
        }
    }
}

/// Blendshape coefficients sampled alongside a pose.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BlendshapeSample {
    pub jaw_open: f32,
}

impl BlendshapeSample {
    pub fn new(jaw_open: f32) -> Self {
        Self { jaw_open }
    }

    /// Whether `jaw_open` already lies in [0, 1].
    pub fn in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.jaw_open)
    }

    /// Jaw-open coefficient clamped to [0, 1]. NaN reads as a closed jaw.
    pub fn jaw_open_clamped(&self) -> f32 {
        if self.jaw_open.is_nan() {
            0.0
        } else {
            self.jaw_open.clamp(0.0, 1.0)
        }
    }
}

/// Snapshot of one marker, in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerTransform {
    pub id: MarkerId,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: f32,
    /// False while the marker is detached because no face is tracked.
    pub visible: bool,
}

/// Identifies one run of the external tracker, from start to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Hands out session handles for one tracker, starting at 1.
///
/// Each tracker owns its counter, so handles are unique per tracker and a
/// restarted tracker never reuses the handle of a run it already stopped.
#[derive(Debug, Default)]
pub struct SessionCounter {
    last: u64,
}

impl SessionCounter {
    pub fn next(&mut self) -> SessionHandle {
        self.last += 1;
        SessionHandle(self.last)
    }

    /// The most recently issued handle, if any.
    pub fn last(&self) -> Option<SessionHandle> {
        (self.last > 0).then_some(SessionHandle(self.last))
    }
}

/// What the tracker observed for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingUpdate {
    Pose {
        pose: FacePose,
        #[serde(default)]
        blendshapes: BlendshapeSample,
    },
    FaceLost,
}

/// A tracker update stamped with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingEvent {
    pub session: SessionHandle,
    pub update: TrackingUpdate,
}
