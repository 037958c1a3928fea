//! Loaded models and skeletal animations
//!
//! Model loaders hand finished models to the [`ModelCache`], which gives out
//! generation checked handles. Entities refer to models and animations by
//! those handles only, so a handle kept across a level reload resolves to
//! nothing instead of to a different model.

use crate::foundation::collections::{new_key_type, SlotMap};
use crate::foundation::math::{Bounds, BoneTransform, Orientation};
use crate::render::commands::ShaderHandle;
use crate::scene::skeleton::Skeleton;

/// Bone limit of a skeletal model
pub const MAX_BONES: usize = 256;

new_key_type! {
    /// Handle to a cached model
    pub struct ModelHandle;

    /// Handle to a cached skeletal animation
    pub struct AnimationHandle;
}

/// Model format, decides how an entity using it is transformed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    /// Vertex animated mesh with per-frame tags (MD3)
    Mesh,
    /// Skeletal MD5 model
    Md5,
    /// Skeletal IQM model
    Iqm,
    /// Inline brush model
    Bsp,
    /// Failed to load
    #[default]
    Bad,
}

impl ModelKind {
    /// Whether entities using this model need a skeleton
    pub const fn is_skeletal(self) -> bool {
        matches!(self, Self::Md5 | Self::Iqm)
    }
}

/// Bone of a skeletal model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBone {
    /// Bone name, tags on skeletal models are looked up by it
    pub name: String,
    /// Parent bone, always lower than the bone's own index
    pub parent: Option<usize>,
}

/// Named attachment point of a mesh model, one orientation per frame
#[derive(Debug, Clone, PartialEq)]
pub struct MeshTag {
    /// Tag name
    pub name: String,
    /// Orientation relative to the model, per animation frame
    pub frames: Vec<Orientation>,
}

/// Static GPU surface of a skeletal model.
///
/// Surfaces only reference the bones their vertices are weighted to, so
/// each carries a remap from model bone index to surface bone index and
/// back.
#[derive(Debug, Clone, PartialEq)]
pub struct VboSurface {
    name: String,
    shader: ShaderHandle,
    num_verts: usize,
    num_indexes: usize,
    bone_remap: Vec<u16>,
    bone_remap_inverse: Vec<u16>,
}

impl VboSurface {
    /// Build a surface from per-bone reference counts indexed by model bone
    pub fn new(name: &str, shader: ShaderHandle, num_verts: usize, num_indexes: usize, bone_references: &[u32]) -> Self {
        let mut bone_remap = vec![0; bone_references.len().min(MAX_BONES)];
        let mut bone_remap_inverse = Vec::new();
        for (bone, references) in bone_references.iter().take(MAX_BONES).enumerate() {
            if *references > 0 {
                bone_remap[bone] = bone_remap_inverse.len() as u16;
                bone_remap_inverse.push(bone as u16);
            }
        }
        Self {
            name: name.to_string(),
            shader,
            num_verts,
            num_indexes,
            bone_remap,
            bone_remap_inverse,
        }
    }

    /// Surface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Material
    pub const fn shader(&self) -> ShaderHandle {
        self.shader
    }

    /// Vertex count
    pub const fn num_verts(&self) -> usize {
        self.num_verts
    }

    /// Index count
    pub const fn num_indexes(&self) -> usize {
        self.num_indexes
    }

    /// Number of bones the surface references
    pub fn num_bone_remap(&self) -> usize {
        self.bone_remap_inverse.len()
    }

    /// Surface bone index of a model bone
    pub fn remap(&self, model_bone: usize) -> Option<u16> {
        self.bone_remap_inverse
            .contains(&(model_bone as u16))
            .then(|| self.bone_remap[model_bone])
    }

    /// Bones of `skeleton` in surface order, ready for upload
    pub fn skinning_bones(&self, skeleton: &Skeleton) -> Vec<BoneTransform> {
        self.bone_remap_inverse
            .iter()
            .map(|bone| skeleton.bone(usize::from(*bone)).map_or_else(BoneTransform::identity, |b| b.transform))
            .collect()
    }
}

/// A loaded model
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    name: String,
    kind: ModelKind,
    bounds: Bounds,
    bones: Vec<ModelBone>,
    tags: Vec<MeshTag>,
    surfaces: Vec<VboSurface>,
}

impl Model {
    /// Vertex animated mesh
    pub fn mesh(name: &str, bounds: Bounds) -> Self {
        Self {
            name: name.to_string(),
            kind: ModelKind::Mesh,
            bounds,
            bones: Vec::new(),
            tags: Vec::new(),
            surfaces: Vec::new(),
        }
    }

    /// Skeletal model; bones past [`MAX_BONES`] are dropped
    pub fn skeletal(name: &str, kind: ModelKind, bounds: Bounds, mut bones: Vec<ModelBone>) -> Self {
        if bones.len() > MAX_BONES {
            log::warn!("Model '{name}' has {} bones, keeping {MAX_BONES}", bones.len());
            bones.truncate(MAX_BONES);
        }
        Self {
            name: name.to_string(),
            kind,
            bounds,
            bones,
            tags: Vec::new(),
            surfaces: Vec::new(),
        }
    }

    /// Placeholder for a model that failed to load
    pub fn bad(name: &str) -> Self {
        Self {
            kind: ModelKind::Bad,
            ..Self::mesh(name, Bounds::default())
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, name: &str, frames: Vec<Orientation>) -> Self {
        self.tags.push(MeshTag {
            name: name.to_string(),
            frames,
        });
        self
    }

    /// Add a surface
    pub fn with_surface(mut self, surface: VboSurface) -> Self {
        self.surfaces.push(surface);
        self
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model format
    pub const fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Model space bounds
    pub const fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Skeleton bones
    pub fn bones(&self) -> &[ModelBone] {
        &self.bones
    }

    /// Static surfaces
    pub fn surfaces(&self) -> &[VboSurface] {
        &self.surfaces
    }

    /// Index of a bone by name
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    /// Orientation of a tag relative to the model.
    ///
    /// Skeletal models resolve the tag as the bone of that name in the
    /// entity's built skeleton. Mesh models blend the tag between
    /// `old_frame` and `frame` by `frac`. Unknown tags give `None`.
    pub fn lerp_tag(&self, name: &str, skeleton: &Skeleton, old_frame: usize, frame: usize, frac: f32) -> Option<Orientation> {
        if self.kind.is_skeletal() {
            let bone = skeleton.bone(self.bone_index(name)?)?;
            return Some(Orientation::from_bone(&bone.transform));
        }

        let tag = self.tags.iter().find(|tag| tag.name == name)?;
        let last = tag.frames.len().checked_sub(1)?;
        let from = &tag.frames[old_frame.min(last)];
        let to = &tag.frames[frame.min(last)];
        Some(from.lerp(to, frac))
    }
}

/// Skeletal animation, local bone transforms per frame
#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    name: String,
    parents: Vec<Option<usize>>,
    frames: Vec<Vec<BoneTransform>>,
    bounds: Vec<Bounds>,
}

impl Animation {
    /// Create an animation. Every frame should hold one transform per parent entry.
    pub fn new(name: &str, parents: Vec<Option<usize>>, frames: Vec<Vec<BoneTransform>>, bounds: Vec<Bounds>) -> Self {
        Self {
            name: name.to_string(),
            parents,
            frames,
            bounds,
        }
    }

    /// Animation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bones per frame
    pub fn num_bones(&self) -> usize {
        self.parents.len()
    }

    /// Frame count
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Parent of a bone
    pub fn parent(&self, bone: usize) -> Option<usize> {
        self.parents.get(bone).copied().flatten()
    }

    /// Local transforms of a frame, clamped to the last frame
    pub fn frame(&self, frame: usize) -> &[BoneTransform] {
        let last = self.frames.len().saturating_sub(1);
        self.frames.get(frame.min(last)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bounds of a frame, clamped to the last frame
    pub fn frame_bounds(&self, frame: usize) -> Bounds {
        let last = self.bounds.len().saturating_sub(1);
        self.bounds.get(frame.min(last)).copied().unwrap_or_default()
    }
}

/// Every model and animation the renderer knows about
#[derive(Debug, Default)]
pub struct ModelCache {
    models: SlotMap<ModelHandle, Model>,
    animations: SlotMap<AnimationHandle, Animation>,
}

impl ModelCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a model
    pub fn register_model(&mut self, model: Model) -> ModelHandle {
        log::debug!("Registered model '{}' ({:?})", model.name, model.kind);
        self.models.insert(model)
    }

    /// Store an animation
    pub fn register_animation(&mut self, animation: Animation) -> AnimationHandle {
        log::debug!("Registered animation '{}' with {} frames", animation.name, animation.num_frames());
        self.animations.insert(animation)
    }

    /// Look up a model
    pub fn model(&self, handle: ModelHandle) -> Option<&Model> {
        self.models.get(handle)
    }

    /// Look up an animation
    pub fn animation(&self, handle: AnimationHandle) -> Option<&Animation> {
        self.animations.get(handle)
    }

    /// Find a model by name
    pub fn find_model(&self, name: &str) -> Option<ModelHandle> {
        self.models.iter().find(|(_, model)| model.name == name).map(|(handle, _)| handle)
    }

    /// Drop a model; its handle stops resolving
    pub fn remove_model(&mut self, handle: ModelHandle) -> Option<Model> {
        self.models.remove(handle)
    }

    /// Number of models
    pub fn num_models(&self) -> usize {
        self.models.len()
    }

    /// Number of animations
    pub fn num_animations(&self) -> usize {
        self.animations.len()
    }

    /// Forget everything, used on level reload
    pub fn clear(&mut self) {
        self.models.clear();
        self.animations.clear();
    }
}
