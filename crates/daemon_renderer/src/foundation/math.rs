//! Math utilities and types
//!
//! nalgebra aliases plus the renderer's orientation conventions.
//!
//! An [`Axis`] stores the three basis vectors of an orientation as matrix
//! *rows*: row 0 is forward, row 1 is left and row 2 is up. With that layout
//! composing an attachment onto a parent is a plain matrix product
//! (`child * parent`) and moving a local offset into the parent frame is
//! `parent.transpose() * offset`.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, UnitQuaternion, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = UnitQuaternion<f32>;

/// Orientation basis with forward/left/up stored as rows
pub type Axis = Mat3;

/// Pitch/yaw/roll angles in degrees
pub type Angles = Vec3;

/// Build an axis from pitch/yaw/roll angles in degrees.
pub fn axis_from_angles(angles: &Angles) -> Axis {
    let (sp, cp) = angles.x.to_radians().sin_cos();
    let (sy, cy) = angles.y.to_radians().sin_cos();
    let (sr, cr) = angles.z.to_radians().sin_cos();

    let forward = Vec3::new(cp * cy, cp * sy, -sp);
    let right = Vec3::new(
        -sr * sp * cy + cr * sy,
        -sr * sp * sy - cr * cy,
        -sr * cp,
    );
    let up = Vec3::new(cr * sp * cy + sr * sy, cr * sp * sy - sr * cy, cr * cp);

    Axis::from_rows(&[forward.transpose(), (-right).transpose(), up.transpose()])
}

/// Rotate a point into the frame described by `axis`.
pub fn rotate_by_axis(axis: &Axis, point: &Vec3) -> Vec3 {
    axis.transpose() * point
}

/// Position and basis of an entity or tag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Origin in the parent space
    pub origin: Vec3,
    /// Basis vectors as rows
    pub axis: Axis,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}

impl Orientation {
    /// Origin at zero, identity basis
    pub fn identity() -> Self {
        Self {
            origin: Vec3::zeros(),
            axis: Axis::identity(),
        }
    }

    /// Create an orientation from an origin and basis
    pub const fn new(origin: Vec3, axis: Axis) -> Self {
        Self { origin, axis }
    }

    /// Place `local` (expressed in this orientation's frame) into the parent frame.
    ///
    /// The resulting origin is `self.origin + sum(local.origin[i] * self.axis[i])`
    /// and the resulting basis is `local.axis * self.axis`.
    pub fn attach(&self, local: &Self) -> Self {
        Self {
            origin: self.origin + rotate_by_axis(&self.axis, &local.origin),
            axis: local.axis * self.axis,
        }
    }

    /// Orientation described by a bone transform.
    pub fn from_bone(bone: &BoneTransform) -> Self {
        Self {
            origin: bone.trans,
            axis: bone.rot.to_rotation_matrix().into_inner().transpose(),
        }
    }

    /// Linear blend of two orientations; the basis rows are lerped without renormalization.
    pub fn lerp(&self, other: &Self, frac: f32) -> Self {
        Self {
            origin: self.origin.lerp(&other.origin, frac),
            axis: self.axis * (1.0 - frac) + other.axis * frac,
        }
    }
}

/// Rotation, translation and uniform scale of one bone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneTransform {
    /// Rotation
    pub rot: Quat,
    /// Translation
    pub trans: Vec3,
    /// Uniform scale
    pub scale: f32,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl BoneTransform {
    /// Identity transform
    pub fn identity() -> Self {
        Self {
            rot: Quat::identity(),
            trans: Vec3::zeros(),
            scale: 1.0,
        }
    }

    /// Apply `self` first, then `parent`.
    pub fn then(&self, parent: &Self) -> Self {
        Self {
            rot: parent.rot * self.rot,
            trans: parent.rot * (self.trans * parent.scale) + parent.trans,
            scale: parent.scale * self.scale,
        }
    }

    /// Interpolate towards `other`; rotations are slerped.
    pub fn lerp(&self, other: &Self, frac: f32) -> Self {
        Self {
            rot: self.rot.slerp(&other.rot, frac),
            trans: self.trans.lerp(&other.trans, frac),
            scale: self.scale + (other.scale - self.scale) * frac,
        }
    }

    /// Transform a point
    pub fn transform_point(&self, point: &Vec3) -> Vec3 {
        self.rot * (point * self.scale) + self.trans
    }
}

/// Axis aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum corner
    pub mins: Vec3,
    /// Maximum corner
    pub maxs: Vec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            mins: Vec3::zeros(),
            maxs: Vec3::zeros(),
        }
    }
}

impl Bounds {
    /// Create bounds from corners
    pub const fn new(mins: Vec3, maxs: Vec3) -> Self {
        Self { mins, maxs }
    }

    /// Bounds that any point will expand
    pub fn cleared() -> Self {
        Self {
            mins: Vec3::repeat(f32::MAX),
            maxs: Vec3::repeat(f32::MIN),
        }
    }

    /// Expand to contain `point`
    pub fn add_point(&mut self, point: &Vec3) {
        self.mins = self.mins.inf(point);
        self.maxs = self.maxs.sup(point);
    }

    /// Smallest bounds containing both
    pub fn union(&self, other: &Self) -> Self {
        Self {
            mins: self.mins.inf(&other.mins),
            maxs: self.maxs.sup(&other.maxs),
        }
    }

    /// Interpolate corners
    pub fn lerp(&self, other: &Self, frac: f32) -> Self {
        Self {
            mins: self.mins.lerp(&other.mins, frac),
            maxs: self.maxs.lerp(&other.maxs, frac),
        }
    }

    /// Scale both corners uniformly
    pub fn scaled(&self, scale: f32) -> Self {
        Self {
            mins: self.mins * scale,
            maxs: self.maxs * scale,
        }
    }

    /// Axis aligned bounds of the eight corners rotated by `axis`.
    pub fn rotated(&self, axis: &Axis) -> Self {
        let mut out = Self::cleared();
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.mins.x } else { self.maxs.x },
                if i & 2 == 0 { self.mins.y } else { self.maxs.y },
                if i & 4 == 0 { self.mins.z } else { self.maxs.z },
            );
            out.add_point(&rotate_by_axis(axis, &corner));
        }
        out
    }

    /// Radius of the sphere around the origin enclosing the box
    pub fn radius(&self) -> f32 {
        self.mins.abs().sup(&self.maxs.abs()).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_axis_from_zero_angles_is_identity() {
        let axis = axis_from_angles(&Angles::zeros());
        assert_relative_eq!(axis, Axis::identity(), epsilon = 1e-6);
    }

    #[test]
    fn test_axis_from_yaw_turns_forward_to_left() {
        let axis = axis_from_angles(&Angles::new(0.0, 90.0, 0.0));
        assert_relative_eq!(axis.row(0).transpose(), Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(axis.row(1).transpose(), Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(axis.row(2).transpose(), Vec3::new(0.0, 0.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_attach_offsets_along_parent_axes() {
        let parent = Orientation::new(
            Vec3::new(10.0, 0.0, 0.0),
            axis_from_angles(&Angles::new(0.0, 90.0, 0.0)),
        );
        let local = Orientation::new(Vec3::new(2.0, 0.0, 1.0), Axis::identity());
        let world = parent.attach(&local);

        // forward of the parent now points along +y
        assert_relative_eq!(world.origin, Vec3::new(10.0, 2.0, 1.0), epsilon = 1e-5);
        assert_relative_eq!(world.axis, parent.axis, epsilon = 1e-6);
    }

    #[test]
    fn test_bone_then_applies_parent_scale() {
        let child = BoneTransform {
            trans: Vec3::new(1.0, 0.0, 0.0),
            ..BoneTransform::identity()
        };
        let parent = BoneTransform {
            rot: Quat::from_axis_angle(&Vec3::z_axis(), std::f32::consts::FRAC_PI_2),
            trans: Vec3::new(0.0, 0.0, 5.0),
            scale: 2.0,
        };
        let combined = child.then(&parent);
        assert_relative_eq!(combined.trans, Vec3::new(0.0, 2.0, 5.0), epsilon = 1e-5);
        assert_relative_eq!(combined.scale, 2.0);
    }

    #[test]
    fn test_orientation_from_bone_matches_rotation() {
        let bone = BoneTransform {
            rot: Quat::from_axis_angle(&Vec3::z_axis(), std::f32::consts::FRAC_PI_2),
            ..BoneTransform::identity()
        };
        let orientation = Orientation::from_bone(&bone);
        let expected = axis_from_angles(&Angles::new(0.0, 90.0, 0.0));
        assert_relative_eq!(orientation.axis, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_rotated_bounds_grow_to_fit() {
        let bounds = Bounds::new(Vec3::new(-1.0, -2.0, 0.0), Vec3::new(1.0, 2.0, 1.0));
        let rotated = bounds.rotated(&axis_from_angles(&Angles::new(0.0, 90.0, 0.0)));
        assert_relative_eq!(rotated.mins, Vec3::new(-2.0, -1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(rotated.maxs, Vec3::new(2.0, 1.0, 1.0), epsilon = 1e-5);
    }
}
