//! Texture residency management
//!
//! Bindless textures must be made resident before a shader may sample
//! them, and drivers cap how many handles can be resident at once. The
//! [`TextureManager`] tracks every texture that has been bound, makes new
//! ones resident on demand, and evicts the least valuable resident texture
//! when the driver refuses.
//!
//! ## Priorities
//!
//! Each texture carries a base [`TexturePriority`] and an adjusted priority
//! recomputed once per frame from how often it was bound:
//!
//! ```text
//! adjusted = base + frame_binds / all_frame_binds * 0.5 + total_binds / all_total_binds * 1.5
//! ```
//!
//! Eviction picks the resident texture with the lowest adjusted priority,
//! the most recently tracked one on ties. Persistent textures are never
//! evicted.
//!
//! ## Fallback
//!
//! Without bindless support textures are bound to image units instead.
//! Unit 0 is reserved for [`TextureManager::bind_reserved_texture`]; a
//! texture sequence pins the units used by one draw so a later bind in the
//! same draw cannot replace them.

use crate::foundation::collections::{new_key_type, SlotMap};
use crate::render::device::{
    BindlessHandle, DeviceCapabilities, GraphicsDevice, NativeHandle, TextureDesc, TextureTarget,
    EXT_BINDLESS_TEXTURE,
};
use crate::render::{RenderError, RenderResult};

new_key_type! {
    /// Generation checked texture reference
    pub struct TextureKey;
}

/// Importance of keeping a texture resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TexturePriority {
    /// First to go
    Low = 0,
    /// Regular material textures
    #[default]
    Medium = 1,
    /// Frequently sampled textures
    High = 2,
    /// Never evicted
    Persistent = 5,
}

impl TexturePriority {
    const fn weight(self) -> f32 {
        self as u8 as f32
    }
}

/// A texture known to the manager
#[derive(Debug, Clone)]
pub struct Texture {
    name: String,
    native: NativeHandle,
    target: TextureTarget,
    width: u32,
    height: u32,
    bindless: BindlessHandle,
    resident: bool,
    frame_bind_counter: u32,
    total_bind_counter: u32,
    base_priority: TexturePriority,
    adjusted_priority: f32,
}

impl Texture {
    fn new(name: String, native: NativeHandle, target: TextureTarget, width: u32, height: u32, priority: TexturePriority) -> Self {
        Self {
            name,
            native,
            target,
            width,
            height,
            bindless: 0,
            resident: false,
            frame_bind_counter: 0,
            total_bind_counter: 0,
            base_priority: priority,
            adjusted_priority: priority.weight(),
        }
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native texture object
    pub const fn native(&self) -> NativeHandle {
        self.native
    }

    /// Dimensionality
    pub const fn target(&self) -> TextureTarget {
        self.target
    }

    /// Width and height after downscaling
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the bindless handle was generated
    pub const fn has_bindless_handle(&self) -> bool {
        self.bindless != 0
    }

    /// Bindless handle, 0 until generated
    pub const fn bindless_handle(&self) -> BindlessHandle {
        self.bindless
    }

    /// Whether the bindless handle is resident
    pub const fn is_resident(&self) -> bool {
        self.resident
    }

    /// Base priority
    pub const fn base_priority(&self) -> TexturePriority {
        self.base_priority
    }

    /// Priority used for eviction
    pub const fn adjusted_priority(&self) -> f32 {
        self.adjusted_priority
    }

    /// Binds since the last priority update
    pub const fn frame_bind_count(&self) -> u32 {
        self.frame_bind_counter
    }

    /// Binds over the texture's lifetime
    pub const fn total_bind_count(&self) -> u32 {
        self.total_bind_counter
    }
}

/// Tracks bindless residency, or image units when bindless is unavailable
#[derive(Debug)]
pub struct TextureManager {
    textures: SlotMap<TextureKey, Texture>,
    tracked: Vec<TextureKey>,
    units: Vec<Option<TextureKey>>,
    pinned: Vec<bool>,
    in_sequence: bool,
    bindless: bool,
    pic_mip: u8,
    total_frame_binds: u64,
    total_binds: u64,
}

impl TextureManager {
    /// Create a manager for a device.
    ///
    /// Bindless mode is used when `allow_bindless` is set and the device
    /// reports the extension.
    pub fn new(caps: &DeviceCapabilities, allow_bindless: bool, pic_mip: u8) -> Self {
        let available = caps.has_extension(EXT_BINDLESS_TEXTURE);
        if allow_bindless && !available {
            log::warn!("{EXT_BINDLESS_TEXTURE} not found, falling back to texture units");
        }
        let units = caps.max_texture_units.max(2);
        Self {
            textures: SlotMap::with_key(),
            tracked: Vec::new(),
            units: vec![None; units],
            pinned: vec![false; units],
            in_sequence: false,
            bindless: allow_bindless && available,
            pic_mip,
            total_frame_binds: 0,
            total_binds: 0,
        }
    }

    /// Whether bindless mode is active
    pub const fn is_bindless(&self) -> bool {
        self.bindless
    }

    /// Set the downscale steps for textures created from now on
    pub fn set_pic_mip(&mut self, pic_mip: u8) {
        self.pic_mip = pic_mip;
    }

    /// Create a texture on the device, downscaled by `pic_mip` unless the description opts out
    pub fn create_texture(
        &mut self,
        device: &mut dyn GraphicsDevice,
        desc: &TextureDesc,
        priority: TexturePriority,
    ) -> RenderResult<TextureKey> {
        let mut desc = desc.clone();
        if !desc.no_pic_mip {
            desc.width = (desc.width >> self.pic_mip).max(1);
            desc.height = (desc.height >> self.pic_mip).max(1);
        }
        let native = device.create_texture(&desc);
        if native == 0 {
            return Err(RenderError::Device(format!("failed to create texture '{}'", desc.name)));
        }
        log::debug!("Created texture '{}' {}x{} as {native}", desc.name, desc.width, desc.height);
        Ok(self.register_texture(desc.name, native, desc.target, desc.width, desc.height, priority))
    }

    /// Wrap a texture created elsewhere (image loaders, render targets)
    pub fn register_texture(
        &mut self,
        name: impl Into<String>,
        native: NativeHandle,
        target: TextureTarget,
        width: u32,
        height: u32,
        priority: TexturePriority,
    ) -> TextureKey {
        self.textures
            .insert(Texture::new(name.into(), native, target, width, height, priority))
    }

    /// Look up a texture
    pub fn texture(&self, key: TextureKey) -> Option<&Texture> {
        self.textures.get(key)
    }

    /// Number of textures known to the manager
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Whether no textures are known
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Number of textures in the residency tracking list
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Number of textures flagged resident
    pub fn resident_count(&self) -> usize {
        self.textures.values().filter(|t| t.resident).count()
    }

    /// Bind `key` for the sampler at `location`.
    ///
    /// Returns the bindless handle (or image unit) now used by the
    /// sampler; a location of -1 binds nothing and returns 0.
    pub fn bind_texture(
        &mut self,
        device: &mut dyn GraphicsDevice,
        location: i32,
        key: TextureKey,
    ) -> RenderResult<u64> {
        let texture = self.textures.get_mut(key).ok_or(RenderError::UnknownTexture)?;
        texture.frame_bind_counter += 1;
        texture.total_bind_counter += 1;
        self.total_frame_binds += 1;
        self.total_binds += 1;

        if location == -1 {
            return Ok(0);
        }

        if self.bindless {
            self.bind_bindless(device, location, key)
        } else {
            self.bind_unit(device, location, key)
        }
    }

    fn bind_bindless(&mut self, device: &mut dyn GraphicsDevice, location: i32, key: TextureKey) -> RenderResult<u64> {
        let texture = self.textures.get_mut(key).ok_or(RenderError::UnknownTexture)?;
        if texture.resident {
            device.set_uniform_handle(location, texture.bindless);
            return Ok(texture.bindless);
        }

        // generating the handle freezes the texture's state, so it happens as late as possible
        if texture.bindless == 0 {
            let handle = device.texture_handle(texture.native);
            if handle == 0 {
                log::error!("Failed to generate bindless handle for '{}'", texture.name);
                return Err(RenderError::BindlessHandleFailed(texture.name.clone()));
            }
            texture.bindless = handle;
        }
        let handle = texture.bindless;

        if !self.tracked.contains(&key) {
            self.tracked.push(key);
        }

        device.make_handle_resident(handle);
        while !device.is_handle_resident(handle) {
            let Some(victim) = self.eviction_candidate(key) else {
                log::error!("No texture space available");
                return Err(RenderError::NoTextureSpace);
            };
            self.make_non_resident(device, victim);
            device.make_handle_resident(handle);
        }

        if let Some(texture) = self.textures.get_mut(key) {
            texture.resident = true;
        }
        device.set_uniform_handle(location, handle);
        Ok(handle)
    }

    fn eviction_candidate(&self, incoming: TextureKey) -> Option<TextureKey> {
        let mut best: Option<(TextureKey, f32)> = None;
        for &key in self.tracked.iter().rev() {
            if key == incoming {
                continue;
            }
            let Some(texture) = self.textures.get(key) else {
                continue;
            };
            if !texture.resident || texture.base_priority == TexturePriority::Persistent {
                continue;
            }
            if best.map_or(true, |(_, priority)| texture.adjusted_priority < priority) {
                best = Some((key, texture.adjusted_priority));
            }
        }
        best.map(|(key, _)| key)
    }

    fn make_non_resident(&mut self, device: &mut dyn GraphicsDevice, key: TextureKey) {
        if let Some(texture) = self.textures.get_mut(key) {
            if texture.resident {
                device.make_handle_non_resident(texture.bindless);
                texture.resident = false;
                log::debug!("Evicted texture '{}'", texture.name);
            }
        }
    }

    fn bind_unit(&mut self, device: &mut dyn GraphicsDevice, location: i32, key: TextureKey) -> RenderResult<u64> {
        let unit = if let Some(unit) = self.units.iter().position(|bound| *bound == Some(key)) {
            unit
        } else {
            let unit = self.free_or_replaceable_unit().ok_or_else(|| {
                log::error!("No texture units available");
                RenderError::NoTextureSpace
            })?;
            let texture = self.textures.get(key).ok_or(RenderError::UnknownTexture)?;
            device.bind_texture_unit(unit_index(unit), texture.target, texture.native);
            self.units[unit] = Some(key);
            unit
        };

        if self.in_sequence {
            self.pinned[unit] = true;
        }
        device.set_uniform_unit(location, unit_index(unit));
        Ok(unit as u64)
    }

    fn free_or_replaceable_unit(&self) -> Option<usize> {
        if let Some(free) = (1..self.units.len()).find(|&unit| self.units[unit].is_none()) {
            return Some(free);
        }
        (1..self.units.len())
            .filter(|&unit| !self.pinned[unit])
            .min_by(|&a, &b| self.unit_priority(a).total_cmp(&self.unit_priority(b)))
    }

    fn unit_priority(&self, unit: usize) -> f32 {
        self.units[unit]
            .and_then(|key| self.textures.get(key))
            .map_or(f32::MIN, |texture| texture.adjusted_priority)
    }

    /// Bind a texture to the reserved unit 0, outside residency tracking
    pub fn bind_reserved_texture(&self, device: &mut dyn GraphicsDevice, target: TextureTarget, native: NativeHandle) {
        device.bind_texture_unit(0, target, native);
    }

    /// Start pinning the units bound by one draw
    pub fn start_texture_sequence(&mut self) {
        self.in_sequence = true;
    }

    /// Release the units pinned since [`Self::start_texture_sequence`]
    pub fn end_texture_sequence(&mut self) {
        self.in_sequence = false;
        self.pinned.fill(false);
    }

    /// Revoke residency of every tracked texture
    pub fn all_non_resident(&mut self, device: &mut dyn GraphicsDevice) {
        for key in self.tracked.clone() {
            self.make_non_resident(device, key);
        }
    }

    /// Forget tracking and unit assignments.
    ///
    /// Residency is left as is; textures keep their handles until destroyed.
    pub fn free_textures(&mut self) {
        self.tracked.clear();
        self.units.fill(None);
        self.pinned.fill(false);
        self.in_sequence = false;
    }

    /// Revoke residency, forget the texture and delete its native object
    pub fn destroy_texture(&mut self, device: &mut dyn GraphicsDevice, key: TextureKey) -> RenderResult<()> {
        self.make_non_resident(device, key);
        let texture = self.textures.remove(key).ok_or(RenderError::UnknownTexture)?;
        self.tracked.retain(|&tracked| tracked != key);
        for unit in &mut self.units {
            if *unit == Some(key) {
                *unit = None;
            }
        }
        device.delete_texture(texture.native);
        Ok(())
    }

    /// Recompute adjusted priorities from this frame's binds and start a new frame
    pub fn update_adjusted_priorities(&mut self) {
        let frame_total = self.total_frame_binds as f32;
        let all_total = self.total_binds as f32;
        for texture in self.textures.values_mut() {
            let frame_share = if frame_total > 0.0 {
                texture.frame_bind_counter as f32 / frame_total
            } else {
                0.0
            };
            let total_share = if all_total > 0.0 {
                texture.total_bind_counter as f32 / all_total
            } else {
                0.0
            };
            texture.adjusted_priority = texture.base_priority.weight() + frame_share * 0.5 + total_share * 1.5;
            texture.frame_bind_counter = 0;
        }
        self.total_frame_binds = 0;
    }
}

fn unit_index(unit: usize) -> u32 {
    u32::try_from(unit).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::{DeviceOp, HeadlessDevice, ImageFormat};
    use approx::assert_relative_eq;

    fn setup(budget: usize) -> (HeadlessDevice, TextureManager) {
        let device = HeadlessDevice::default().with_residency_budget(budget);
        let manager = TextureManager::new(device.capabilities(), true, 0);
        (device, manager)
    }

    fn make(device: &mut HeadlessDevice, manager: &mut TextureManager, name: &str, priority: TexturePriority) -> TextureKey {
        manager
            .create_texture(device, &TextureDesc::new_2d(name, ImageFormat::Rgba8, 64, 64), priority)
            .unwrap()
    }

    #[test]
    fn test_unbound_location_is_a_no_op() {
        let (mut device, mut manager) = setup(4);
        let key = make(&mut device, &mut manager, "a", TexturePriority::Medium);
        assert_eq!(manager.bind_texture(&mut device, -1, key).unwrap(), 0);
        assert!(!manager.texture(key).unwrap().has_bindless_handle());
        assert_eq!(manager.tracked_count(), 0);
        assert_eq!(manager.texture(key).unwrap().total_bind_count(), 1);
    }

    #[test]
    fn test_resident_texture_fast_path() {
        let (mut device, mut manager) = setup(4);
        let probe = device.probe();
        let key = make(&mut device, &mut manager, "a", TexturePriority::Medium);

        let first = manager.bind_texture(&mut device, 3, key).unwrap();
        let second = manager.bind_texture(&mut device, 3, key).unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.tracked_count(), 1);
        assert_eq!(probe.resident_count(), 1);
        let uploads = probe
            .ops()
            .into_iter()
            .filter(|op| matches!(op, DeviceOp::UniformHandle { location: 3, .. }))
            .count();
        assert_eq!(uploads, 2);
    }

    #[test]
    fn test_budget_overflow_evicts_exactly_one() {
        let (mut device, mut manager) = setup(3);
        let probe = device.probe();
        let keys: Vec<_> = (0..4)
            .map(|i| make(&mut device, &mut manager, &format!("tex{i}"), TexturePriority::Medium))
            .collect();

        for &key in &keys {
            manager.bind_texture(&mut device, 0, key).unwrap();
        }

        let natives: Vec<_> = keys.iter().map(|&k| manager.texture(k).unwrap().native()).collect();
        assert!(probe.is_texture_resident(natives[3]));
        let evicted = natives[..3].iter().filter(|&&n| !probe.is_texture_resident(n)).count();
        assert_eq!(evicted, 1);
        assert_eq!(probe.resident_count(), 3);
        // equal priorities: the most recently tracked other texture goes first
        assert!(!manager.texture(keys[2]).unwrap().is_resident());
        for &key in &keys {
            let texture = manager.texture(key).unwrap();
            assert!(texture.has_bindless_handle());
            assert_eq!(texture.is_resident(), probe.is_texture_resident(texture.native()));
        }
    }

    #[test]
    fn test_eviction_follows_adjusted_priority() {
        let (mut device, mut manager) = setup(2);
        let busy = make(&mut device, &mut manager, "busy", TexturePriority::Medium);
        let idle = make(&mut device, &mut manager, "idle", TexturePriority::Medium);
        let incoming = make(&mut device, &mut manager, "incoming", TexturePriority::Medium);

        manager.bind_texture(&mut device, 0, busy).unwrap();
        manager.bind_texture(&mut device, 0, idle).unwrap();
        for _ in 0..5 {
            manager.bind_texture(&mut device, 0, busy).unwrap();
        }
        manager.update_adjusted_priorities();
        assert!(manager.texture(busy).unwrap().adjusted_priority() > manager.texture(idle).unwrap().adjusted_priority());
        assert_eq!(manager.texture(busy).unwrap().frame_bind_count(), 0);

        manager.bind_texture(&mut device, 0, incoming).unwrap();
        assert!(manager.texture(busy).unwrap().is_resident());
        assert!(!manager.texture(idle).unwrap().is_resident());
    }

    #[test]
    fn test_adjusted_priority_formula() {
        let (mut device, mut manager) = setup(8);
        let a = make(&mut device, &mut manager, "a", TexturePriority::High);
        let b = make(&mut device, &mut manager, "b", TexturePriority::Low);
        manager.bind_texture(&mut device, 0, a).unwrap();
        manager.bind_texture(&mut device, 0, a).unwrap();
        manager.bind_texture(&mut device, 0, a).unwrap();
        manager.bind_texture(&mut device, 0, b).unwrap();
        manager.update_adjusted_priorities();

        assert_relative_eq!(manager.texture(a).unwrap().adjusted_priority(), 2.0 + 0.75 * 0.5 + 0.75 * 1.5);
        assert_relative_eq!(manager.texture(b).unwrap().adjusted_priority(), 0.25 * 0.5 + 0.25 * 1.5);
    }

    #[test]
    fn test_persistent_textures_are_never_evicted() {
        let (mut device, mut manager) = setup(1);
        let keep = make(&mut device, &mut manager, "keep", TexturePriority::Persistent);
        let other = make(&mut device, &mut manager, "other", TexturePriority::Low);

        manager.bind_texture(&mut device, 0, keep).unwrap();
        let result = manager.bind_texture(&mut device, 0, other);
        assert!(matches!(result, Err(RenderError::NoTextureSpace)));
        assert!(manager.texture(keep).unwrap().is_resident());
        assert!(!manager.texture(other).unwrap().is_resident());
    }

    #[test]
    fn test_handle_failure_leaves_texture_untracked() {
        let (mut device, mut manager) = setup(4);
        device.probe().set_fail_texture_handles(true);
        let key = make(&mut device, &mut manager, "broken", TexturePriority::Medium);

        let result = manager.bind_texture(&mut device, 0, key);
        assert!(matches!(result, Err(RenderError::BindlessHandleFailed(_))));
        assert_eq!(manager.tracked_count(), 0);
        assert!(!manager.texture(key).unwrap().has_bindless_handle());
    }

    #[test]
    fn test_free_textures_keeps_residency() {
        let (mut device, mut manager) = setup(4);
        let probe = device.probe();
        let key = make(&mut device, &mut manager, "a", TexturePriority::Medium);
        manager.bind_texture(&mut device, 0, key).unwrap();

        manager.free_textures();
        assert_eq!(manager.tracked_count(), 0);
        assert_eq!(probe.resident_count(), 1);

        manager.destroy_texture(&mut device, key).unwrap();
        assert_eq!(probe.resident_count(), 0);
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn test_all_non_resident() {
        let (mut device, mut manager) = setup(4);
        let probe = device.probe();
        for name in ["a", "b", "c"] {
            let key = make(&mut device, &mut manager, name, TexturePriority::Medium);
            manager.bind_texture(&mut device, 0, key).unwrap();
        }
        manager.all_non_resident(&mut device);
        assert_eq!(probe.resident_count(), 0);
        assert_eq!(manager.resident_count(), 0);
    }

    #[test]
    fn test_pic_mip_downscales_unless_opted_out() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let mut device = device;
        let mut manager = TextureManager::new(device.capabilities(), true, 2);

        let scaled = make(&mut device, &mut manager, "scaled", TexturePriority::Medium);
        let exact = manager
            .create_texture(
                &mut device,
                &TextureDesc::new_2d("exact", ImageFormat::Rgba8, 64, 64).render_target(),
                TexturePriority::Medium,
            )
            .unwrap();

        assert_eq!(manager.texture(scaled).unwrap().dimensions(), (16, 16));
        let native = manager.texture(exact).unwrap().native();
        assert_eq!(probe.texture_desc(native).unwrap().width, 64);
    }

    #[test]
    fn test_unit_fallback_reuses_and_replaces() {
        let mut caps = DeviceCapabilities::default();
        caps.max_texture_units = 3;
        let mut device = HeadlessDevice::new(caps);
        let mut manager = TextureManager::new(device.capabilities(), false, 0);
        assert!(!manager.is_bindless());

        let a = make(&mut device, &mut manager, "a", TexturePriority::Medium);
        let b = make(&mut device, &mut manager, "b", TexturePriority::High);
        let c = make(&mut device, &mut manager, "c", TexturePriority::Medium);

        assert_eq!(manager.bind_texture(&mut device, 0, a).unwrap(), 1);
        assert_eq!(manager.bind_texture(&mut device, 1, b).unwrap(), 2);
        assert_eq!(manager.bind_texture(&mut device, 0, a).unwrap(), 1);
        manager.update_adjusted_priorities();

        // a has the lower adjusted priority and loses its unit
        assert_eq!(manager.bind_texture(&mut device, 2, c).unwrap(), 1);
    }

    #[test]
    fn test_sequence_pins_units() {
        let mut caps = DeviceCapabilities::default();
        caps.max_texture_units = 3;
        let mut device = HeadlessDevice::new(caps);
        let mut manager = TextureManager::new(device.capabilities(), false, 0);
        let a = make(&mut device, &mut manager, "a", TexturePriority::Medium);
        let b = make(&mut device, &mut manager, "b", TexturePriority::Medium);
        let c = make(&mut device, &mut manager, "c", TexturePriority::Medium);

        manager.start_texture_sequence();
        manager.bind_texture(&mut device, 0, a).unwrap();
        manager.bind_texture(&mut device, 1, b).unwrap();
        assert!(matches!(manager.bind_texture(&mut device, 2, c), Err(RenderError::NoTextureSpace)));
        manager.end_texture_sequence();

        assert!(manager.bind_texture(&mut device, 2, c).is_ok());
    }
}
