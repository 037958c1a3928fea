//! Entity cache
//!
//! Game logic pushes entity state into a fixed table indexed by a stable
//! entity id; a parallel [`ActiveIdSet`] marks which ids are live. Once per
//! frame [`EntityCache::add_ref_entities`] walks the live ids, computes
//! each entity's world transform and skeleton, and submits it to the
//! frame.
//!
//! ## Tag Attachment
//!
//! An entity can be placed on a named tag of another entity's model. The
//! parent is transformed first, the tag is read from its model (or its
//! built skeleton), and the child is placed relative to the parent's world
//! orientation. Transforms are memoized per frame, so a parent shared by
//! several children is only transformed once. An entity reached again while
//! its own transform is still being resolved is part of a cycle and is
//! reported as [`RenderError::AttachmentCycle`].

use crate::foundation::collections::{ActiveIdSet, IDS_PER_BLOCK};
use crate::foundation::math::{Angles, Axis, BoneTransform, Bounds, Orientation, Vec3};
use crate::render::commands::{ArenaSpan, ShaderHandle};
use crate::render::frame::SubmittedEntity;
use crate::render::{RenderError, RenderResult};
use crate::scene::model_cache::{ModelCache, ModelHandle};
use crate::scene::skeleton::{build_skeleton, AnimationPose, BoneMod, Skeleton};

/// Size of the entity table
pub const MAX_REF_ENTITIES: usize = 8191;

/// What an entity draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefEntityType {
    /// A model, possibly skeletal
    #[default]
    Model,
    /// Camera facing sprite
    Sprite,
    /// Portal or mirror surface marker
    PortalSurface,
}

/// How an entity is positioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityTag {
    /// Own origin and axis
    #[default]
    None,
    /// On a tag of the attachment entity, taking the tag's axis
    OnTag,
    /// On a tag of the attachment entity, taking the tag's axis but keeping its own backlerp
    OnTagRotated,
}

/// Entity state as game logic describes it
#[derive(Debug, Clone, PartialEq)]
pub struct RefEntity {
    /// What to draw
    pub kind: RefEntityType,
    /// Live this frame
    pub active: bool,
    /// Model, `None` draws nothing
    pub model: Option<ModelHandle>,
    /// Material override
    pub custom_shader: Option<ShaderHandle>,
    /// World origin, replaced when positioned on a tag
    pub origin: Vec3,
    /// World axis, replaced when positioned on a tag
    pub axis: Axis,
    /// Uniform scale, 0 means 1
    pub scale: f32,
    /// Vertex animation frame
    pub frame: usize,
    /// Vertex animation frame blended from
    pub old_frame: usize,
    /// 0 is fully `frame`, 1 is fully `old_frame`
    pub backlerp: f32,
    /// Color modulation
    pub shader_rgba: [u8; 4],
    /// Tag placement mode
    pub position_on_tag: EntityTag,
    /// Entity carrying the tag
    pub attachment_entity: u16,
    /// Tag name
    pub tag: String,
    /// Primary skeletal animation
    pub animation: Option<AnimationPose>,
    /// Secondary skeletal animation
    pub animation2: Option<AnimationPose>,
    /// Weight of the secondary animation
    pub blend_lerp: f32,
    /// Bone overrides
    pub bone_mods: Vec<BoneMod>,
    /// Grow the skeleton bounds by a rotated copy of themselves
    pub bounds_rotation: Option<Angles>,
}

impl Default for RefEntity {
    fn default() -> Self {
        Self {
            kind: RefEntityType::Model,
            active: false,
            model: None,
            custom_shader: None,
            origin: Vec3::zeros(),
            axis: Axis::identity(),
            scale: 1.0,
            frame: 0,
            old_frame: 0,
            backlerp: 0.0,
            shader_rgba: [255; 4],
            position_on_tag: EntityTag::None,
            attachment_entity: 0,
            tag: String::new(),
            animation: None,
            animation2: None,
            blend_lerp: 0.0,
            bone_mods: Vec::new(),
            bounds_rotation: None,
        }
    }
}

/// One slot of the entity table
#[derive(Debug, Clone, Default)]
pub struct CachedEntity {
    /// Latest state, with origin and axis resolved once transformed
    pub e: RefEntity,
    local_axis: Axis,
    skeleton: Skeleton,
    transform_frame: Option<u64>,
    in_progress: bool,
}

impl CachedEntity {
    /// Axis as last sent by game logic, before tag placement
    pub const fn local_axis(&self) -> &Axis {
        &self.local_axis
    }

    /// Skeleton built by the last transform
    pub const fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// Frame the transform was last computed for
    pub const fn transform_frame(&self) -> Option<u64> {
        self.transform_frame
    }

    /// World origin and axis
    pub const fn orientation(&self) -> Orientation {
        Orientation::new(self.e.origin, self.e.axis)
    }
}

/// State update for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    /// Entity id
    pub id: u16,
    /// New state
    pub entity: RefEntity,
}

/// Tag query from game logic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LerpTagUpdate {
    /// Entity carrying the tag
    pub id: u16,
    /// Tag name
    pub tag: String,
}

/// Answer to a [`LerpTagUpdate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LerpTagSync {
    /// World orientation of the entity
    pub entity: Orientation,
    /// Tag orientation relative to the entity
    pub tag: Orientation,
}

/// Per-frame entity cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityCacheStats {
    /// Transforms computed (memoized repeats not counted)
    pub transforms: u32,
    /// Skeletons built
    pub skeletons_built: u32,
    /// Entities submitted to the frame
    pub entities_added: u32,
}

/// Receives transformed entities, normally the current frame
pub trait EntitySink {
    /// Store an entity and its bones. Returns false when the sink is full.
    fn add_entity(&mut self, entity: SubmittedEntity, bones: &[BoneTransform]) -> bool;
}

/// Fixed table of entities plus the active id set
#[derive(Debug, Clone)]
pub struct EntityCache {
    entities: Vec<CachedEntity>,
    active: ActiveIdSet,
    highest_active_id: usize,
    frame_count: u64,
    stats: EntityCacheStats,
}

impl EntityCache {
    /// Empty cache
    pub fn new() -> Self {
        Self {
            entities: vec![CachedEntity::default(); MAX_REF_ENTITIES],
            active: ActiveIdSet::new(MAX_REF_ENTITIES),
            highest_active_id: 0,
            frame_count: 0,
            stats: EntityCacheStats::default(),
        }
    }

    /// Start a new frame; transforms from earlier frames become stale
    pub fn set_frame_count(&mut self, frame_count: u64) {
        self.frame_count = frame_count;
    }

    /// Current frame number
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Active id bitset
    pub const fn active_ids(&self) -> &ActiveIdSet {
        &self.active
    }

    /// Upper bound used for the next active id scan
    pub const fn highest_active_id(&self) -> usize {
        self.highest_active_id
    }

    /// One entity slot
    pub fn entity(&self, id: usize) -> Option<&CachedEntity> {
        self.entities.get(id)
    }

    /// Counters since the last [`Self::take_stats`]
    pub const fn stats(&self) -> &EntityCacheStats {
        &self.stats
    }

    /// Read and reset the counters
    pub fn take_stats(&mut self) -> EntityCacheStats {
        std::mem::take(&mut self.stats)
    }

    /// Compute the world transform and skeleton of an entity for the current frame.
    ///
    /// Does nothing if already done this frame. Attachment parents are
    /// transformed first.
    pub fn transform_entity(&mut self, id: usize, models: &ModelCache) -> RenderResult<()> {
        let current = self.frame_count;
        let entity = self.entities.get_mut(id).ok_or(RenderError::EntityOutOfRange(id))?;
        if entity.transform_frame == Some(current) {
            return Ok(());
        }
        if entity.in_progress {
            log::warn!("Entity {id} is attached to itself through a tag chain");
            return Err(RenderError::AttachmentCycle(id));
        }

        entity.in_progress = true;
        let result = self.resolve_transform(id, models);
        let entity = &mut self.entities[id];
        entity.in_progress = false;
        if result.is_ok() {
            entity.transform_frame = Some(current);
            self.stats.transforms += 1;
        }
        result
    }

    fn resolve_transform(&mut self, id: usize, models: &ModelCache) -> RenderResult<()> {
        let mode = self.entities[id].e.position_on_tag;
        if mode != EntityTag::None {
            let parent_id = usize::from(self.entities[id].e.attachment_entity);
            self.transform_entity(parent_id, models)?;

            let tag = self.lerp_tag(parent_id, &self.entities[id].e.tag, models);
            let parent = &self.entities[parent_id];
            let parent_orientation = parent.orientation();
            let parent_backlerp = parent.e.backlerp;

            let entity = &mut self.entities[id];
            if mode == EntityTag::OnTag {
                entity.e.backlerp = parent_backlerp;
            }
            let placed = parent_orientation.attach(&tag);
            entity.e.origin = placed.origin;
            entity.e.axis = placed.axis;
        }

        let entity = &self.entities[id];
        if entity.e.kind != RefEntityType::Model {
            return Ok(());
        }
        let Some(handle) = entity.e.model else {
            return Ok(());
        };
        let model = models.model(handle).ok_or(RenderError::UnknownModel(id))?;
        if model.kind().is_skeletal() {
            let skeleton = build_skeleton(&entity.e, models);
            self.entities[id].skeleton = skeleton;
            self.stats.skeletons_built += 1;
        }
        Ok(())
    }

    /// Tag orientation on an already transformed entity; identity when the tag does not exist
    fn lerp_tag(&self, id: usize, tag: &str, models: &ModelCache) -> Orientation {
        let Some(entity) = self.entities.get(id) else {
            return Orientation::identity();
        };
        let resolved = entity.e.model.and_then(|handle| models.model(handle)).and_then(|model| {
            model.lerp_tag(tag, &entity.skeleton, entity.e.old_frame, entity.e.frame, 1.0 - entity.e.backlerp)
        });
        resolved.unwrap_or_else(|| {
            log::debug!("Entity {id} has no tag '{tag}'");
            Orientation::identity()
        })
    }

    /// Transform every active entity and submit it to `sink`.
    ///
    /// Returns the number of entities submitted. The highest id found
    /// bounds the next scan. An entity that fails to transform is logged
    /// and skipped; the rest are still submitted.
    pub fn add_ref_entities(&mut self, models: &ModelCache, sink: &mut dyn EntitySink) -> usize {
        let mut highest_found = 0;
        let mut added = 0;
        let last_block = self.highest_active_id / IDS_PER_BLOCK;

        for block_index in 0..=last_block.min(self.active.blocks().len().saturating_sub(1)) {
            let mut block = self.active.blocks()[block_index];
            while block != 0 {
                let id = block.trailing_zeros() as usize + block_index * IDS_PER_BLOCK;
                block &= block - 1;

                highest_found = id;
                if let Err(err) = self.transform_entity(id, models) {
                    log::warn!("Skipping entity {id}: {err}");
                    continue;
                }
                if self.submit(id, models, sink) {
                    added += 1;
                }
            }
        }

        self.highest_active_id = highest_found;
        self.stats.entities_added += added as u32;
        added
    }

    fn submit(&self, id: usize, models: &ModelCache, sink: &mut dyn EntitySink) -> bool {
        let entity = &self.entities[id];
        let model = entity.e.model.and_then(|handle| models.model(handle));
        let skeletal = model.is_some_and(|model| model.kind().is_skeletal());

        let local_bounds = match model {
            Some(_) if skeletal => *entity.skeleton.bounds(),
            Some(model) => model.bounds().scaled(if entity.e.scale == 0.0 { 1.0 } else { entity.e.scale }),
            None => Bounds::default(),
        };
        let rotated = local_bounds.rotated(&entity.e.axis);
        let bounds = Bounds::new(rotated.mins + entity.e.origin, rotated.maxs + entity.e.origin);

        let submitted = SubmittedEntity {
            id: id as u16,
            kind: entity.e.kind,
            model: entity.e.model,
            custom_shader: entity.e.custom_shader,
            orientation: entity.orientation(),
            bounds,
            bones: ArenaSpan::default(),
            shader_rgba: entity.e.shader_rgba,
        };

        let added = if skeletal {
            let bones: Vec<BoneTransform> = entity.skeleton.transforms().collect();
            sink.add_entity(submitted, &bones)
        } else {
            sink.add_entity(submitted, &[])
        };
        if !added {
            log::debug!("Entity list full, dropping entity {id}");
        }
        added
    }

    /// Apply a batch of entity updates from game logic.
    ///
    /// An entity already transformed this frame keeps its resolved origin
    /// and axis when the update places it on a tag, so it does not jump
    /// back to the unresolved position for the rest of the frame. A batch
    /// with an out of range id is rejected whole.
    pub fn sync_from_cgame(&mut self, updates: &[EntityUpdate]) -> RenderResult<()> {
        if let Some(bad) = updates.iter().map(|update| usize::from(update.id)).find(|&id| id >= self.entities.len()) {
            return Err(RenderError::EntityOutOfRange(bad));
        }
        let current = self.frame_count;
        for update in updates {
            let id = usize::from(update.id);
            let slot = &mut self.entities[id];
            let flip = slot.e.active != update.entity.active;

            let keep_resolved =
                update.entity.position_on_tag != EntityTag::None && slot.transform_frame == Some(current);
            let (origin, axis) = (slot.e.origin, slot.e.axis);
            slot.e = update.entity.clone();
            if keep_resolved {
                slot.e.origin = origin;
                slot.e.axis = axis;
            }
            slot.local_axis = update.entity.axis;

            if flip {
                self.active.toggle(id);
            }
            if update.entity.active {
                self.highest_active_id = self.highest_active_id.max(id);
            }
        }
        Ok(())
    }

    /// Answer tag queries from game logic, transforming the queried entities first
    pub fn sync_to_cgame(&mut self, queries: &[LerpTagUpdate], models: &ModelCache) -> RenderResult<Vec<LerpTagSync>> {
        let mut answers = Vec::with_capacity(queries.len());
        for query in queries {
            let id = usize::from(query.id);
            self.transform_entity(id, models)?;
            answers.push(LerpTagSync {
                entity: self.entities[id].orientation(),
                tag: self.lerp_tag(id, &query.tag, models),
            });
        }
        Ok(answers)
    }

    /// Reset every slot and the active set, used on level load
    pub fn clear(&mut self) {
        self.highest_active_id = 0;
        self.active.clear();
        self.entities.fill(CachedEntity::default());
        log::debug!("Entity cache cleared");
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{axis_from_angles, Quat};
    use crate::scene::model_cache::{Animation, Model, ModelBone, ModelKind};
    use approx::assert_relative_eq;

    #[derive(Default)]
    struct Collected {
        entities: Vec<SubmittedEntity>,
        bones: usize,
        limit: Option<usize>,
    }

    impl EntitySink for Collected {
        fn add_entity(&mut self, entity: SubmittedEntity, bones: &[BoneTransform]) -> bool {
            if self.limit.is_some_and(|limit| self.entities.len() >= limit) {
                return false;
            }
            self.bones += bones.len();
            self.entities.push(entity);
            true
        }
    }

    fn update(id: u16, entity: RefEntity) -> EntityUpdate {
        EntityUpdate { id, entity }
    }

    fn active() -> RefEntity {
        RefEntity {
            active: true,
            ..RefEntity::default()
        }
    }

    fn tagged_mesh(models: &mut ModelCache) -> ModelHandle {
        let tag = Orientation::new(Vec3::new(1.0, 0.0, 0.0), Axis::identity());
        models.register_model(Model::mesh("models/players/body.md3", Bounds::default()).with_tag("tag_weapon", vec![tag]))
    }

    fn skeletal(models: &mut ModelCache) -> ModelHandle {
        let bones = vec![
            ModelBone { name: "root".into(), parent: None },
            ModelBone { name: "hand".into(), parent: Some(0) },
        ];
        models.register_model(Model::skeletal("models/players/human.iqm", ModelKind::Iqm, Bounds::default(), bones))
    }

    #[test]
    fn test_activation_sets_bitset_words() {
        let mut cache = EntityCache::new();
        cache.clear();
        cache.sync_from_cgame(&[update(5, active()), update(70, active())]).unwrap();

        assert_eq!(cache.active_ids().blocks()[0], 1 << 5);
        assert_eq!(cache.active_ids().blocks()[1], 1 << 6);

        let mut sink = Collected::default();
        let added = cache.add_ref_entities(&ModelCache::new(), &mut sink);
        assert_eq!(added, 2);
        assert!(cache.highest_active_id() >= 70);
        assert_eq!(sink.entities.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 70]);

        // deactivating flips the bit back
        cache.sync_from_cgame(&[update(5, RefEntity::default())]).unwrap();
        assert_eq!(cache.active_ids().blocks()[0], 0);
    }

    #[test]
    fn test_child_is_placed_on_parent_tag() {
        let mut models = ModelCache::new();
        let body = tagged_mesh(&mut models);
        let mut cache = EntityCache::new();
        cache.set_frame_count(1);

        let parent = RefEntity {
            model: Some(body),
            origin: Vec3::new(10.0, 0.0, 0.0),
            axis: axis_from_angles(&Angles::new(0.0, 90.0, 0.0)),
            backlerp: 0.3,
            ..active()
        };
        let child = RefEntity {
            position_on_tag: EntityTag::OnTag,
            attachment_entity: 1,
            tag: "tag_weapon".into(),
            ..active()
        };
        // child before parent in id order
        cache.sync_from_cgame(&[update(0, child), update(1, parent)]).unwrap();
        cache.transform_entity(0, &models).unwrap();

        assert_eq!(cache.entity(1).unwrap().transform_frame(), Some(1));
        let placed = cache.entity(0).unwrap();
        assert_relative_eq!(placed.e.origin, Vec3::new(10.0, 1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(placed.e.axis, cache.entity(1).unwrap().e.axis, epsilon = 1e-6);
        assert_relative_eq!(placed.e.backlerp, 0.3);
    }

    #[test]
    fn test_rotated_tag_takes_tag_axis_and_keeps_backlerp() {
        let mut models = ModelCache::new();
        let tag = Orientation::new(Vec3::new(1.0, 0.0, 0.0), axis_from_angles(&Angles::new(0.0, 0.0, 30.0)));
        let body = models.register_model(Model::mesh("models/players/body.md3", Bounds::default()).with_tag("tag_flag", vec![tag]));
        let mut cache = EntityCache::new();
        cache.set_frame_count(1);

        let parent_axis = axis_from_angles(&Angles::new(0.0, 90.0, 0.0));
        let parent = RefEntity {
            model: Some(body),
            axis: parent_axis,
            backlerp: 0.2,
            ..active()
        };
        let child = RefEntity {
            position_on_tag: EntityTag::OnTagRotated,
            attachment_entity: 1,
            tag: "tag_flag".into(),
            axis: axis_from_angles(&Angles::new(0.0, 90.0, 0.0)),
            backlerp: 0.7,
            ..active()
        };
        cache.sync_from_cgame(&[update(0, child), update(1, parent)]).unwrap();
        cache.transform_entity(0, &models).unwrap();

        // the entity's own yaw does not leak into the placement
        let placed = cache.entity(0).unwrap();
        assert_relative_eq!(placed.e.axis, tag.axis * parent_axis, epsilon = 1e-6);
        assert_relative_eq!(placed.e.origin, Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(placed.e.backlerp, 0.7);
        assert_relative_eq!(*placed.local_axis(), axis_from_angles(&Angles::new(0.0, 90.0, 0.0)), epsilon = 1e-6);
    }

    #[test]
    fn test_transform_is_memoized_per_frame() {
        let mut models = ModelCache::new();
        let human = skeletal(&mut models);
        let mut cache = EntityCache::new();
        cache.set_frame_count(1);
        cache.sync_from_cgame(&[update(3, RefEntity { model: Some(human), ..active() })]).unwrap();

        cache.transform_entity(3, &models).unwrap();
        let first = cache.entity(3).unwrap().skeleton().clone();
        cache.transform_entity(3, &models).unwrap();
        assert_eq!(cache.stats().skeletons_built, 1);
        assert_eq!(cache.entity(3).unwrap().skeleton(), &first);

        cache.set_frame_count(2);
        cache.transform_entity(3, &models).unwrap();
        assert_eq!(cache.take_stats().skeletons_built, 2);
        assert_eq!(cache.stats().transforms, 0);
    }

    #[test]
    fn test_attachment_cycle_is_an_error() {
        let models = ModelCache::new();
        let mut cache = EntityCache::new();
        cache.set_frame_count(1);
        let on = |parent: u16| RefEntity {
            position_on_tag: EntityTag::OnTag,
            attachment_entity: parent,
            tag: "tag_head".into(),
            ..active()
        };
        cache.sync_from_cgame(&[update(1, on(2)), update(2, on(1))]).unwrap();

        let err = cache.transform_entity(1, &models).unwrap_err();
        assert!(matches!(err, RenderError::AttachmentCycle(1)));
        assert_eq!(cache.entity(1).unwrap().transform_frame(), None);
        // the cycle is reported again instead of being half-cached
        assert!(cache.transform_entity(2, &models).is_err());
    }

    #[test]
    fn test_unknown_model_is_an_error() {
        let mut models = ModelCache::new();
        let handle = tagged_mesh(&mut models);
        models.clear();
        let mut cache = EntityCache::new();
        cache.sync_from_cgame(&[update(9, RefEntity { model: Some(handle), ..active() })]).unwrap();

        let err = cache.transform_entity(9, &models).unwrap_err();
        assert!(matches!(err, RenderError::UnknownModel(9)));

        let mut sink = Collected::default();
        assert_eq!(cache.add_ref_entities(&models, &mut sink), 0);
        assert!(sink.entities.is_empty());
    }

    #[test]
    fn test_broken_entities_do_not_block_healthy_ones() {
        let mut models = ModelCache::new();
        let gone = tagged_mesh(&mut models);
        models.clear();
        let mut cache = EntityCache::new();
        cache.set_frame_count(1);
        let on = |parent: u16| RefEntity {
            position_on_tag: EntityTag::OnTag,
            attachment_entity: parent,
            tag: "tag_head".into(),
            ..active()
        };
        cache
            .sync_from_cgame(&[
                update(1, on(2)),
                update(2, on(1)),
                update(5, active()),
                update(7, RefEntity { model: Some(gone), ..active() }),
                update(200, active()),
            ])
            .unwrap();

        let mut sink = Collected::default();
        assert_eq!(cache.add_ref_entities(&models, &mut sink), 2);
        assert_eq!(sink.entities.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 200]);
        assert_eq!(cache.highest_active_id(), 200);
    }

    #[test]
    fn test_sync_keeps_resolved_transform_of_tagged_entity() {
        let mut models = ModelCache::new();
        let body = tagged_mesh(&mut models);
        let mut cache = EntityCache::new();
        cache.set_frame_count(4);
        let parent = RefEntity {
            model: Some(body),
            origin: Vec3::new(0.0, 0.0, 5.0),
            ..active()
        };
        let child = RefEntity {
            position_on_tag: EntityTag::OnTag,
            attachment_entity: 1,
            tag: "tag_weapon".into(),
            ..active()
        };
        cache.sync_from_cgame(&[update(0, child.clone()), update(1, parent)]).unwrap();
        cache.transform_entity(0, &models).unwrap();

        cache.sync_from_cgame(&[update(0, child.clone())]).unwrap();
        assert_relative_eq!(cache.entity(0).unwrap().e.origin, Vec3::new(1.0, 0.0, 5.0), epsilon = 1e-5);

        // untagged updates always take the new origin
        let moved = RefEntity {
            origin: Vec3::new(7.0, 7.0, 7.0),
            ..active()
        };
        cache.sync_from_cgame(&[update(0, moved)]).unwrap();
        assert_relative_eq!(cache.entity(0).unwrap().e.origin, Vec3::new(7.0, 7.0, 7.0));

        // next frame the tagged update is not yet resolved
        cache.set_frame_count(5);
        cache.sync_from_cgame(&[update(0, child)]).unwrap();
        assert_relative_eq!(cache.entity(0).unwrap().e.origin, Vec3::zeros());
    }

    #[test]
    fn test_sync_to_cgame_resolves_skeletal_tags() {
        let mut models = ModelCache::new();
        let human = skeletal(&mut models);
        let wave = models.register_animation(Animation::new(
            "wave",
            vec![None, Some(0)],
            vec![vec![
                BoneTransform::identity(),
                BoneTransform {
                    trans: Vec3::new(0.0, 0.0, 2.0),
                    ..BoneTransform::identity()
                },
            ]],
            vec![Bounds::default()],
        ));
        let mut cache = EntityCache::new();
        cache.set_frame_count(1);
        let entity = RefEntity {
            model: Some(human),
            origin: Vec3::new(3.0, 0.0, 0.0),
            animation: Some(AnimationPose {
                animation: wave,
                start_frame: 0,
                end_frame: 0,
                lerp: 0.0,
                clear_origin: false,
            }),
            bone_mods: vec![BoneMod::BoneRotate {
                index: 5,
                rotation: Quat::identity(),
            }],
            ..active()
        };
        cache.sync_from_cgame(&[update(2, entity)]).unwrap();

        let answers = cache
            .sync_to_cgame(&[LerpTagUpdate { id: 2, tag: "hand".into() }], &models)
            .unwrap();
        assert_eq!(answers.len(), 1);
        assert_relative_eq!(answers[0].entity.origin, Vec3::new(3.0, 0.0, 0.0));
        assert_relative_eq!(answers[0].tag.origin, Vec3::new(0.0, 0.0, 2.0), epsilon = 1e-5);
    }

    #[test]
    fn test_skeletal_entities_submit_bones() {
        let mut models = ModelCache::new();
        let human = skeletal(&mut models);
        let mut cache = EntityCache::new();
        cache.sync_from_cgame(&[update(0, RefEntity { model: Some(human), ..active() }), update(1, active())]).unwrap();

        let mut sink = Collected {
            limit: Some(1),
            ..Collected::default()
        };
        assert_eq!(cache.add_ref_entities(&models, &mut sink), 1);
        assert_eq!(sink.bones, crate::scene::model_cache::MAX_BONES);
        assert_eq!(cache.stats().entities_added, 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut cache = EntityCache::new();
        cache.sync_from_cgame(&[update(100, active())]).unwrap();
        cache.clear();
        assert_eq!(cache.active_ids().count(), 0);
        assert_eq!(cache.highest_active_id(), 0);
        assert!(!cache.entity(100).unwrap().e.active);
        assert!(cache.sync_from_cgame(&[update(9000, active())]).is_err());
    }

    #[test]
    fn test_out_of_range_batch_is_rejected_whole() {
        let mut cache = EntityCache::new();
        let err = cache
            .sync_from_cgame(&[update(3, active()), update(9000, active()), update(4, active())])
            .unwrap_err();
        assert!(matches!(err, RenderError::EntityOutOfRange(9000)));
        assert_eq!(cache.active_ids().count(), 0);
        assert!(!cache.entity(3).unwrap().e.active);
        assert_eq!(cache.highest_active_id(), 0);
    }
}
