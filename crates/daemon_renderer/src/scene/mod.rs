//! Scene side of the renderer
//!
//! Entities sent by game logic, their per-frame transforms and skeletons,
//! and the models and animations they reference.
//!
//! ```text
//! game logic ──sync_from_cgame──▶ EntityCache ──add_ref_entities──▶ FrameData
//!                                     │
//!                                     ▼
//!                          ModelCache + build_skeleton
//! ```

pub mod entity_cache;
pub mod model_cache;
pub mod skeleton;

pub use entity_cache::{
    CachedEntity, EntityCache, EntityCacheStats, EntitySink, EntityTag, EntityUpdate, LerpTagSync, LerpTagUpdate,
    RefEntity, RefEntityType, MAX_REF_ENTITIES,
};
pub use model_cache::{Animation, AnimationHandle, Model, ModelBone, ModelCache, ModelHandle, ModelKind, VboSurface, MAX_BONES};
pub use skeleton::{build_skeleton, AnimationPose, BoneMod, Skeleton, SkeletonKind};
