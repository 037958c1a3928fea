//! Per-SMP-frame data
//!
//! One [`FrameData`] holds everything the back end reads for a frame: the
//! command list plus the arenas its records point into. Two of them exist
//! and alternate between front end and back end.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{BoneTransform, Bounds, Orientation};
use crate::render::commands::{ArenaSpan, RenderCommandList, ShaderHandle};
use crate::scene::entity_cache::{EntitySink, RefEntityType, MAX_REF_ENTITIES};
use crate::scene::model_cache::ModelHandle;

/// Number of alternating frames
pub const SMP_FRAMES: usize = 2;

/// 2D polygon vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PolyVert {
    /// Screen position; z is ignored by 2D draws
    pub xyz: [f32; 3],
    /// Texture coordinates
    pub st: [f32; 2],
    /// Vertex color
    pub modulate: [u8; 4],
}

impl PolyVert {
    /// Create a vertex
    pub const fn new(x: f32, y: f32, s: f32, t: f32, modulate: [u8; 4]) -> Self {
        Self {
            xyz: [x, y, 0.0],
            st: [s, t],
            modulate,
        }
    }
}

/// An entity as the back end sees it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmittedEntity {
    /// Entity cache id
    pub id: u16,
    /// Entity type
    pub kind: RefEntityType,
    /// Model, if any
    pub model: Option<ModelHandle>,
    /// Material override
    pub custom_shader: Option<ShaderHandle>,
    /// World placement
    pub orientation: Orientation,
    /// World space bounds
    pub bounds: Bounds,
    /// Skinning bones in the frame's bone arena, in model bone order
    pub bones: ArenaSpan,
    /// Color modulation
    pub shader_rgba: [u8; 4],
}

/// Everything one frame hands to the back end
#[derive(Debug, Clone)]
pub struct FrameData {
    index: usize,
    /// Recorded commands
    pub commands: RenderCommandList,
    poly_verts: Vec<PolyVert>,
    poly_indexes: Vec<u32>,
    max_poly_verts: usize,
    max_poly_indexes: usize,
    entities: Vec<SubmittedEntity>,
    bones: Vec<BoneTransform>,
}

impl FrameData {
    /// Create empty frame data for SMP frame `index`
    pub fn new(index: usize, command_capacity: usize, max_poly_verts: usize, max_poly_indexes: usize) -> Self {
        Self {
            index,
            commands: RenderCommandList::new(command_capacity),
            poly_verts: Vec::with_capacity(max_poly_verts),
            poly_indexes: Vec::with_capacity(max_poly_indexes),
            max_poly_verts,
            max_poly_indexes,
            entities: Vec::new(),
            bones: Vec::new(),
        }
    }

    /// SMP frame index, 0 or 1
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Copy vertices into the polygon arena; `None` when the arena is full
    pub fn push_poly_verts(&mut self, verts: &[PolyVert]) -> Option<ArenaSpan> {
        if self.poly_verts.len() + verts.len() > self.max_poly_verts {
            return None;
        }
        let span = ArenaSpan::new(u32::try_from(self.poly_verts.len()).ok()?, u32::try_from(verts.len()).ok()?);
        self.poly_verts.extend_from_slice(verts);
        Some(span)
    }

    /// Copy indexes into the index arena; `None` when the arena is full
    pub fn push_poly_indexes(&mut self, indexes: &[u32]) -> Option<ArenaSpan> {
        if self.poly_indexes.len() + indexes.len() > self.max_poly_indexes {
            return None;
        }
        let span = ArenaSpan::new(
            u32::try_from(self.poly_indexes.len()).ok()?,
            u32::try_from(indexes.len()).ok()?,
        );
        self.poly_indexes.extend_from_slice(indexes);
        Some(span)
    }

    /// Whether both polygon arenas can take `verts` and `indexes` more elements
    pub fn has_poly_room(&self, verts: usize, indexes: usize) -> bool {
        self.poly_verts.len() + verts <= self.max_poly_verts
            && self.poly_indexes.len() + indexes <= self.max_poly_indexes
    }

    /// Vertices of a span
    pub fn poly_verts(&self, span: ArenaSpan) -> &[PolyVert] {
        self.poly_verts.get(span.range()).unwrap_or(&[])
    }

    /// Indexes of a span
    pub fn poly_indexes(&self, span: ArenaSpan) -> &[u32] {
        self.poly_indexes.get(span.range()).unwrap_or(&[])
    }

    /// Running vertex count, `r_numPolyVerts`
    pub fn num_poly_verts(&self) -> usize {
        self.poly_verts.len()
    }

    /// Running index count, `r_numPolyIndexes`
    pub fn num_poly_indexes(&self) -> usize {
        self.poly_indexes.len()
    }

    /// Number of entities submitted so far
    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    /// Entities of a span
    pub fn entities(&self, span: ArenaSpan) -> &[SubmittedEntity] {
        self.entities.get(span.range()).unwrap_or(&[])
    }

    /// The whole bone arena
    pub fn bones(&self) -> &[BoneTransform] {
        &self.bones
    }

    /// Entities submitted since `first`
    pub fn entity_span_since(&self, first: usize) -> ArenaSpan {
        let count = self.entities.len().saturating_sub(first);
        ArenaSpan::new(
            u32::try_from(first).unwrap_or(u32::MAX),
            u32::try_from(count).unwrap_or(0),
        )
    }

    /// Recycle for a new frame
    pub fn reset(&mut self) {
        self.commands.reset();
        self.poly_verts.clear();
        self.poly_indexes.clear();
        self.entities.clear();
        self.bones.clear();
    }
}

impl EntitySink for FrameData {
    fn add_entity(&mut self, mut entity: SubmittedEntity, bones: &[BoneTransform]) -> bool {
        if self.entities.len() >= MAX_REF_ENTITIES {
            return false;
        }
        let (Ok(first), Ok(count)) = (u32::try_from(self.bones.len()), u32::try_from(bones.len())) else {
            return false;
        };
        entity.bones = ArenaSpan::new(first, count);
        self.bones.extend_from_slice(bones);
        self.entities.push(entity);
        true
    }
}
