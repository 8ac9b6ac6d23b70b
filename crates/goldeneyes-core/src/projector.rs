//! Face-relative eye marker placement.
//!
//! Turns one face pose plus a jaw-open coefficient into two marker
//! placements and a shared uniform scale. Pure arithmetic: the same input
//! always yields the same output.

use crate::types::{BlendshapeSample, FacePose, MarkerId, Placement};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MIN_SCALE: f32 = 0.01;
const DEFAULT_MARKER_RADIUS: f32 = 0.036;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("min_scale must be positive, got {0}")]
    NonPositiveMinScale(f32),
    #[error("marker_radius must be positive, got {0}")]
    NonPositiveRadius(f32),
    #[error("scale_factor must not be negative, got {0}")]
    NegativeScaleFactor(f32),
    #[error("non-finite value in field `{0}`")]
    NonFinite(&'static str),
}

/// How markers are positioned relative to the tracked face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Markers sit at the tracker's eye joints in world space, nudged by
    /// `joint_nudge`. Without eye joints they stay at `rest_offset` from
    /// the world origin.
    EyeJoints {
        joint_nudge: Vec3,
        rest_offset: Vec3,
    },
    /// Markers straddle the face position along its forward axis and are
    /// lifted along its up axis.
    ForwardUp {
        forward_offset: f32,
        upward_offset: f32,
    },
    /// The anchor follows the face; markers keep a fixed local offset and
    /// their own local rotation under it.
    ParentRelative {
        local_offset: Vec3,
        #[serde(default = "identity_rotation")]
        local_rotation: Quat,
    },
}

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

impl PlacementPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            PlacementPolicy::EyeJoints { .. } => "eye_joints",
            PlacementPolicy::ForwardUp { .. } => "forward_up",
            PlacementPolicy::ParentRelative { .. } => "parent_relative",
        }
    }
}

/// What to do with the markers while no face is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LostFacePolicy {
    /// Keep the markers at their last transforms.
    #[default]
    Freeze,
    /// Detach the markers until a face is seen again.
    Hide,
}

impl std::str::FromStr for LostFacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "freeze" => Ok(Self::Freeze),
            "hide" => Ok(Self::Hide),
            other => Err(format!("unknown lost-face policy: {other} (expected freeze or hide)")),
        }
    }
}

/// Projector parameters. Loaded from presets or built directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorConfig {
    pub placement: PlacementPolicy,
    pub base_scale: f32,
    pub scale_factor: f32,
    #[serde(default = "default_min_scale")]
    pub min_scale: f32,
    #[serde(default = "default_marker_radius")]
    pub marker_radius: f32,
    #[serde(default)]
    pub lost_face: LostFacePolicy,
}

fn default_min_scale() -> f32 {
    DEFAULT_MIN_SCALE
}

fn default_marker_radius() -> f32 {
    DEFAULT_MARKER_RADIUS
}

impl ProjectorConfig {
    pub fn new(placement: PlacementPolicy, base_scale: f32, scale_factor: f32) -> Self {
        Self {
            placement,
            base_scale,
            scale_factor,
            min_scale: DEFAULT_MIN_SCALE,
            marker_radius: DEFAULT_MARKER_RADIUS,
            lost_face: LostFacePolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scalars = [
            ("base_scale", self.base_scale),
            ("scale_factor", self.scale_factor),
            ("min_scale", self.min_scale),
            ("marker_radius", self.marker_radius),
        ];
        for (field, value) in scalars {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite(field));
            }
        }
        if self.min_scale <= 0.0 {
            return Err(ConfigError::NonPositiveMinScale(self.min_scale));
        }
        if self.marker_radius <= 0.0 {
            return Err(ConfigError::NonPositiveRadius(self.marker_radius));
        }
        // Scale must not shrink as the jaw opens.
        if self.scale_factor < 0.0 {
            return Err(ConfigError::NegativeScaleFactor(self.scale_factor));
        }

        match &self.placement {
            PlacementPolicy::EyeJoints {
                joint_nudge,
                rest_offset,
            } => {
                if !joint_nudge.is_finite() {
                    return Err(ConfigError::NonFinite("joint_nudge"));
                }
                if !rest_offset.is_finite() {
                    return Err(ConfigError::NonFinite("rest_offset"));
                }
            }
            PlacementPolicy::ForwardUp {
                forward_offset,
                upward_offset,
            } => {
                if !forward_offset.is_finite() {
                    return Err(ConfigError::NonFinite("forward_offset"));
                }
                if !upward_offset.is_finite() {
                    return Err(ConfigError::NonFinite("upward_offset"));
                }
            }
            PlacementPolicy::ParentRelative {
                local_offset,
                local_rotation,
            } => {
                if !local_offset.is_finite() {
                    return Err(ConfigError::NonFinite("local_offset"));
                }
                if !local_rotation.is_finite() || local_rotation.length_squared() <= f32::EPSILON {
                    return Err(ConfigError::NonFinite("local_rotation"));
                }
            }
        }
        Ok(())
    }
}

/// One marker's placement, both relative to its scene parent and in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerPlacement {
    pub id: MarkerId,
    pub local: Placement,
    pub world: Placement,
}

/// Output of a single projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Where the anchor node goes. `None` means the anchor stays at the world origin.
    pub anchor: Option<Placement>,
    pub markers: [MarkerPlacement; 2],
    pub scale: f32,
}

impl Projection {
    pub fn marker(&self, id: MarkerId) -> &MarkerPlacement {
        &self.markers[id.index()]
    }
}

/// Maps face poses and blendshape samples to eye marker transforms.
#[derive(Debug, Clone)]
pub struct FaceAnchorProjector {
    config: ProjectorConfig,
}

impl FaceAnchorProjector {
    pub fn new(config: ProjectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// `max(min_scale, base_scale + jaw_open * scale_factor)`, with `jaw_open`
    /// clamped to [0, 1].
    pub fn scale_for(&self, sample: BlendshapeSample) -> f32 {
        let jaw = sample.jaw_open_clamped();
        (self.config.base_scale + jaw * self.config.scale_factor).max(self.config.min_scale)
    }

    /// Placement used when markers are first created, before any pose arrives.
    pub fn rest(&self) -> Projection {
        self.project(&FacePose::default(), BlendshapeSample::default())
    }

    pub fn project(&self, pose: &FacePose, sample: BlendshapeSample) -> Projection {
        let scale = self.scale_for(sample);

        let (anchor, markers) = match &self.config.placement {
            PlacementPolicy::EyeJoints {
                joint_nudge,
                rest_offset,
            } => {
                let markers = MarkerId::ALL.map(|id| {
                    let position = match pose.eye_joints {
                        Some(joints) => joints.get(id) + id.mirror(*joint_nudge),
                        None => id.mirror(*rest_offset),
                    };
                    let placement = Placement::new(position, Quat::IDENTITY);
                    MarkerPlacement {
                        id,
                        local: placement,
                        world: placement,
                    }
                });
                (None, markers)
            }
            PlacementPolicy::ForwardUp {
                forward_offset,
                upward_offset,
            } => {
                let orientation = pose.placement().orientation;
                let markers = MarkerId::ALL.map(|id| {
                    let position = pose.position
                        + id.sign() * *forward_offset * pose.forward_axis
                        + *upward_offset * pose.up_axis;
                    let placement = Placement::new(position, orientation);
                    MarkerPlacement {
                        id,
                        local: placement,
                        world: placement,
                    }
                });
                (None, markers)
            }
            PlacementPolicy::ParentRelative {
                local_offset,
                local_rotation,
            } => {
                let parent = pose.placement();
                let rotation = local_rotation.normalize();
                let markers = MarkerId::ALL.map(|id| {
                    let local = Placement::new(id.mirror(*local_offset), rotation);
                    MarkerPlacement {
                        id,
                        local,
                        world: parent.then(&local),
                    }
                });
                (Some(parent), markers)
            }
        };

        Projection {
            anchor,
            markers,
            scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EyeJoints;

    fn forward_up(base_scale: f32, scale_factor: f32) -> FaceAnchorProjector {
        FaceAnchorProjector::new(ProjectorConfig::new(
            PlacementPolicy::ForwardUp {
                forward_offset: 0.05,
                upward_offset: 0.02,
            },
            base_scale,
            scale_factor,
        ))
        .unwrap()
    }

    fn parent_relative(local_rotation: Quat) -> FaceAnchorProjector {
        FaceAnchorProjector::new(ProjectorConfig::new(
            PlacementPolicy::ParentRelative {
                local_offset: Vec3::new(-0.03, 0.05, 0.0),
                local_rotation,
            },
            1.0,
            1.6,
        ))
        .unwrap()
    }

    fn facing_camera() -> FacePose {
        FacePose {
            position: Vec3::new(0.0, 0.0, -0.5),
            orientation: Quat::IDENTITY,
            forward_axis: Vec3::new(0.0, 0.0, -1.0),
            up_axis: Vec3::Y,
            eye_joints: None,
        }
    }

    #[test]
    fn test_forward_up_example() {
        let projection = forward_up(1.0, 2.0).project(&facing_camera(), BlendshapeSample::new(0.0));
        let left = projection.marker(MarkerId::Left).world.position;
        let right = projection.marker(MarkerId::Right).world.position;
        assert!(left.abs_diff_eq(Vec3::new(0.0, 0.02, -0.45), 1e-6));
        assert!(right.abs_diff_eq(Vec3::new(0.0, 0.02, -0.55), 1e-6));
        assert!(projection.anchor.is_none());
    }

    #[test]
    fn test_scale_endpoints() {
        let projector = forward_up(1.0, 2.0);
        assert_eq!(projector.scale_for(BlendshapeSample::new(0.0)), 1.0);
        assert_eq!(projector.scale_for(BlendshapeSample::new(1.0)), 3.0);
    }

    #[test]
    fn test_scale_monotonic_in_jaw_open() {
        let projector = forward_up(0.3, 0.5);
        let mut previous = f32::NEG_INFINITY;
        for step in 0..=100 {
            let scale = projector.scale_for(BlendshapeSample::new(step as f32 / 100.0));
            assert!(scale >= previous, "scale decreased at step {step}");
            previous = scale;
        }
    }

    #[test]
    fn test_out_of_range_jaw_is_clamped() {
        let projector = forward_up(1.0, 2.0);
        assert_eq!(projector.scale_for(BlendshapeSample::new(-3.0)), 1.0);
        assert_eq!(projector.scale_for(BlendshapeSample::new(9.0)), 3.0);
        assert_eq!(projector.scale_for(BlendshapeSample::new(f32::NAN)), 1.0);
    }

    #[test]
    fn test_scale_never_below_minimum() {
        let mut config = ProjectorConfig::new(
            PlacementPolicy::ForwardUp {
                forward_offset: 0.05,
                upward_offset: 0.0,
            },
            -2.0,
            0.5,
        );
        config.min_scale = 0.1;
        let projector = FaceAnchorProjector::new(config).unwrap();
        assert_eq!(projector.scale_for(BlendshapeSample::new(0.0)), 0.1);
        assert_eq!(projector.scale_for(BlendshapeSample::new(1.0)), 0.1);
    }

    #[test]
    fn test_eye_joints_follow_tracker_with_mirrored_nudge() {
        let projector = FaceAnchorProjector::new(ProjectorConfig::new(
            PlacementPolicy::EyeJoints {
                joint_nudge: Vec3::new(-0.005, 0.01, 0.0),
                rest_offset: Vec3::new(-0.0305, 0.0497, -0.03),
            },
            0.3,
            0.5,
        ))
        .unwrap();

        let pose = FacePose {
            eye_joints: Some(EyeJoints {
                left: Vec3::new(0.03, 0.02, 0.01),
                right: Vec3::new(-0.03, 0.02, 0.01),
            }),
            ..facing_camera()
        };
        let projection = projector.project(&pose, BlendshapeSample::new(1.0));
        let left = projection.marker(MarkerId::Left).world.position;
        let right = projection.marker(MarkerId::Right).world.position;
        assert!(left.abs_diff_eq(Vec3::new(0.035, 0.03, 0.01), 1e-6));
        assert!(right.abs_diff_eq(Vec3::new(-0.035, 0.03, 0.01), 1e-6));
        assert!((left.x + right.x).abs() < 1e-6);
        assert!((projection.scale - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_eye_joints_static_without_joints() {
        let projector = FaceAnchorProjector::new(ProjectorConfig::new(
            PlacementPolicy::EyeJoints {
                joint_nudge: Vec3::ZERO,
                rest_offset: Vec3::new(-0.0305, 0.0497, -0.03),
            },
            0.3,
            0.5,
        ))
        .unwrap();

        let moved = FacePose {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..facing_camera()
        };
        let projection = projector.project(&moved, BlendshapeSample::new(0.5));
        assert_eq!(projection, {
            let mut rest = projector.rest();
            rest.scale = projection.scale;
            rest
        });
        assert!(projection
            .marker(MarkerId::Left)
            .world
            .position
            .abs_diff_eq(Vec3::new(0.0305, 0.0497, -0.03), 1e-6));
    }

    #[test]
    fn test_parent_relative_inherits_anchor() {
        let projector = parent_relative(Quat::IDENTITY);
        let pose = FacePose {
            orientation: Quat::from_rotation_y(std::f32::consts::PI),
            ..facing_camera()
        };
        let projection = projector.project(&pose, BlendshapeSample::new(0.0));

        let anchor = projection.anchor.unwrap();
        assert!(anchor.position.abs_diff_eq(pose.position, 1e-6));

        let right = projection.marker(MarkerId::Right);
        assert!(right.local.position.abs_diff_eq(Vec3::new(-0.03, 0.05, 0.0), 1e-6));
        // Half a turn about Y flips x.
        assert!(right
            .world
            .position
            .abs_diff_eq(Vec3::new(0.03, 0.05, -0.5), 1e-5));
        assert!(right.world.orientation.abs_diff_eq(pose.orientation, 1e-6));
        assert!(right.local.orientation.abs_diff_eq(Quat::IDENTITY, 1e-6));
    }

    #[test]
    fn test_parent_relative_uses_marker_local_rotation() {
        let tilt = Quat::from_rotation_x(0.3);
        let projector = parent_relative(tilt);
        let pose = FacePose {
            orientation: Quat::from_rotation_y(0.7),
            ..facing_camera()
        };
        let projection = projector.project(&pose, BlendshapeSample::new(0.0));
        let left = projection.marker(MarkerId::Left);
        assert!(left.local.orientation.abs_diff_eq(tilt, 1e-6));
        assert!(left.world.orientation.abs_diff_eq(pose.orientation * tilt, 1e-6));
    }

    #[test]
    fn test_symmetric_local_offsets_mirror() {
        let projection = parent_relative(Quat::IDENTITY).project(&facing_camera(), BlendshapeSample::new(0.2));
        let left = projection.marker(MarkerId::Left).local.position;
        let right = projection.marker(MarkerId::Right).local.position;
        assert_eq!(left.x, -right.x);
        assert_eq!(left.y, right.y);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let projector = parent_relative(Quat::from_rotation_z(0.1));
        let pose = FacePose {
            orientation: Quat::from_rotation_y(0.4),
            ..facing_camera()
        };
        let sample = BlendshapeSample::new(0.6);
        assert_eq!(projector.project(&pose, sample), projector.project(&pose, sample));
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let mut config = ProjectorConfig::new(
            PlacementPolicy::ForwardUp {
                forward_offset: 0.05,
                upward_offset: 0.02,
            },
            1.0,
            2.0,
        );
        config.min_scale = 0.0;
        assert_eq!(
            FaceAnchorProjector::new(config.clone()).unwrap_err(),
            ConfigError::NonPositiveMinScale(0.0)
        );

        config.min_scale = 0.01;
        config.scale_factor = f32::INFINITY;
        assert_eq!(
            FaceAnchorProjector::new(config).unwrap_err(),
            ConfigError::NonFinite("scale_factor")
        );
    }

    #[test]
    fn test_validate_rejects_negative_scale_factor() {
        let config = ProjectorConfig::new(
            PlacementPolicy::ForwardUp {
                forward_offset: 0.05,
                upward_offset: 0.02,
            },
            1.0,
            -0.5,
        );
        assert_eq!(
            FaceAnchorProjector::new(config.clone()).unwrap_err(),
            ConfigError::NegativeScaleFactor(-0.5)
        );

        // A flat scale is still allowed.
        let flat = ProjectorConfig {
            scale_factor: 0.0,
            ..config
        };
        let projector = FaceAnchorProjector::new(flat).unwrap();
        assert_eq!(
            projector.scale_for(BlendshapeSample::new(0.0)),
            projector.scale_for(BlendshapeSample::new(1.0))
        );
    }

    #[test]
    fn test_lost_face_policy_from_str() {
        assert_eq!("Hide".parse::<LostFacePolicy>(), Ok(LostFacePolicy::Hide));
        assert_eq!("freeze".parse::<LostFacePolicy>(), Ok(LostFacePolicy::Freeze));
        assert!("vanish".parse::<LostFacePolicy>().is_err());
    }
}
