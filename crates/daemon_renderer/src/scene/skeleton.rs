//! Per-entity skeleton construction
//!
//! A skeleton starts relative (each bone in its parent's space) as it comes
//! out of an animation, gets blended and modified in that form, and is then
//! converted to absolute transforms with the entity scale applied at the
//! root bones.

use crate::foundation::math::{axis_from_angles, Angles, BoneTransform, Bounds, Quat};
use crate::scene::entity_cache::RefEntity;
use crate::scene::model_cache::{Animation, AnimationHandle, ModelCache, MAX_BONES};

/// Whether bone transforms are relative to their parent or absolute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkeletonKind {
    /// Local to the parent bone
    #[default]
    Relative,
    /// Model space
    Absolute,
}

/// One bone of a built skeleton
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkeletonBone {
    /// Parent bone
    pub parent: Option<usize>,
    /// Transform, see [`SkeletonKind`]
    pub transform: BoneTransform,
}

/// Skeleton of one entity for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    kind: SkeletonKind,
    bones: Vec<SkeletonBone>,
    bounds: Bounds,
    scale: f32,
}

impl Default for Skeleton {
    fn default() -> Self {
        Self {
            kind: SkeletonKind::Relative,
            bones: Vec::new(),
            bounds: Bounds::default(),
            scale: 1.0,
        }
    }
}

/// Animation sample: two frames and the blend between them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationPose {
    /// Animation to sample
    pub animation: AnimationHandle,
    /// Frame blended from
    pub start_frame: usize,
    /// Frame blended to
    pub end_frame: usize,
    /// Blend factor, 0 is `start_frame`
    pub lerp: f32,
    /// Zero the translation of root bones
    pub clear_origin: bool,
}

/// Per-bone override applied while building a skeleton
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoneMod {
    /// Extra rotation applied to one bone of the sampled animations
    BoneRotate {
        /// Bone index
        index: usize,
        /// Rotation multiplied onto the bone
        rotation: Quat,
    },
    /// Sample a second pose that later mods copy bones from
    BuildExtraSkeleton(AnimationPose),
    /// Replace one bone with the extra pose's bone
    BoneFromExtraSkeleton {
        /// Bone index
        index: usize,
    },
}

impl Skeleton {
    /// Absolute skeleton of `num_bones` unparented identity bones
    pub fn identity(num_bones: usize) -> Self {
        Self {
            kind: SkeletonKind::Absolute,
            bones: vec![
                SkeletonBone {
                    parent: None,
                    transform: BoneTransform::identity(),
                };
                num_bones
            ],
            bounds: Bounds::default(),
            scale: 1.0,
        }
    }

    /// Sample an animation into a relative skeleton
    pub fn sample(animation: &Animation, pose: &AnimationPose) -> Self {
        let from = animation.frame(pose.start_frame);
        let to = animation.frame(pose.end_frame);
        let bones = from
            .iter()
            .zip(to)
            .take(MAX_BONES)
            .enumerate()
            .map(|(index, (a, b))| {
                let parent = animation.parent(index);
                let mut transform = a.lerp(b, pose.lerp);
                if pose.clear_origin && parent.is_none() {
                    transform.trans.fill(0.0);
                }
                SkeletonBone { parent, transform }
            })
            .collect();

        Self {
            kind: SkeletonKind::Relative,
            bones,
            bounds: animation
                .frame_bounds(pose.start_frame)
                .union(&animation.frame_bounds(pose.end_frame)),
            scale: 1.0,
        }
    }

    /// Relative or absolute
    pub const fn kind(&self) -> SkeletonKind {
        self.kind
    }

    /// Bones in model order
    pub fn bones(&self) -> &[SkeletonBone] {
        &self.bones
    }

    /// Mutable bones in model order
    pub fn bones_mut(&mut self) -> &mut [SkeletonBone] {
        &mut self.bones
    }

    /// One bone
    pub fn bone(&self, index: usize) -> Option<&SkeletonBone> {
        self.bones.get(index)
    }

    /// Bone transforms in model order
    pub fn transforms(&self) -> impl Iterator<Item = BoneTransform> + '_ {
        self.bones.iter().map(|bone| bone.transform)
    }

    /// Model space bounds
    pub const fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Entity scale baked into the root bones
    pub const fn scale(&self) -> f32 {
        self.scale
    }

    /// Multiply a rotation onto one bone; out of range bones are ignored
    pub fn rotate_bone(&mut self, index: usize, rotation: &Quat) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.transform.rot *= rotation;
        }
    }

    /// Blend towards `other` by `frac`, bone by bone
    pub fn blend(&mut self, other: &Self, frac: f32) {
        for (bone, target) in self.bones.iter_mut().zip(&other.bones) {
            bone.transform = bone.transform.lerp(&target.transform, frac);
        }
        self.bounds = self.bounds.lerp(&other.bounds, frac);
    }

    /// Convert to absolute transforms. Root bones take `scale`, children inherit it.
    pub fn make_absolute(&mut self, scale: f32) {
        self.scale = scale;
        if self.kind == SkeletonKind::Relative {
            for index in 0..self.bones.len() {
                let parent = self.bones[index].parent.filter(|parent| *parent < index);
                self.bones[index].transform = match parent {
                    Some(parent) => {
                        let parent = self.bones[parent].transform;
                        self.bones[index].transform.then(&parent)
                    }
                    None => {
                        let mut root = self.bones[index].transform;
                        root.trans *= scale;
                        root.scale *= scale;
                        root
                    }
                };
            }
        }
        self.kind = SkeletonKind::Absolute;
        self.bounds = self.bounds.scaled(scale);
    }
}

fn sample_pose(models: &ModelCache, pose: &AnimationPose) -> Option<Skeleton> {
    match models.animation(pose.animation) {
        Some(animation) => Some(Skeleton::sample(animation, pose)),
        None => {
            log::warn!("Skeleton references an unknown animation, ignoring it");
            None
        }
    }
}

/// Build the absolute skeleton of an entity from its animation state.
///
/// The primary pose takes the `BoneRotate` mods; a secondary pose takes
/// them too and is blended in by `blend_lerp`. Without any pose the result
/// is an identity skeleton of [`MAX_BONES`] bones.
pub fn build_skeleton(entity: &RefEntity, models: &ModelCache) -> Skeleton {
    let scale = if entity.scale == 0.0 { 1.0 } else { entity.scale };

    let mut primary = entity.animation.as_ref().and_then(|pose| sample_pose(models, pose));
    let secondary = entity.animation2.as_ref().and_then(|pose| sample_pose(models, pose));

    let rotate = |skeleton: &mut Skeleton| {
        for bone_mod in &entity.bone_mods {
            if let BoneMod::BoneRotate { index, rotation } = bone_mod {
                skeleton.rotate_bone(*index, rotation);
            }
        }
    };

    if let Some(skeleton) = primary.as_mut() {
        rotate(skeleton);
    }
    let mut skeleton = match (primary, secondary) {
        (Some(mut primary), Some(mut secondary)) => {
            rotate(&mut secondary);
            if entity.blend_lerp > 0.0 {
                primary.blend(&secondary, entity.blend_lerp);
            }
            primary
        }
        (Some(primary), None) => primary,
        (None, Some(mut secondary)) => {
            rotate(&mut secondary);
            secondary
        }
        (None, None) => {
            let mut skeleton = Skeleton::identity(MAX_BONES);
            skeleton.scale = scale;
            apply_bounds_rotation(&mut skeleton, entity.bounds_rotation.as_ref());
            return skeleton;
        }
    };

    let mut extra: Option<Skeleton> = None;
    for bone_mod in &entity.bone_mods {
        match bone_mod {
            BoneMod::BuildExtraSkeleton(pose) if entity.animation.is_some() => {
                let pose = AnimationPose {
                    clear_origin: entity.animation.as_ref().is_some_and(|p| p.clear_origin),
                    ..*pose
                };
                extra = sample_pose(models, &pose);
            }
            BoneMod::BoneFromExtraSkeleton { index } => {
                let source = extra.as_ref().and_then(|extra| extra.bone(*index)).copied();
                if let (Some(source), Some(bone)) = (source, skeleton.bones.get_mut(*index)) {
                    *bone = source;
                }
            }
            _ => {}
        }
    }

    skeleton.make_absolute(scale);
    apply_bounds_rotation(&mut skeleton, entity.bounds_rotation.as_ref());
    skeleton
}

fn apply_bounds_rotation(skeleton: &mut Skeleton, rotation: Option<&Angles>) {
    if let Some(angles) = rotation {
        let rotated = skeleton.bounds.rotated(&axis_from_angles(angles));
        skeleton.bounds = skeleton.bounds.union(&rotated);
    }
}
