//! # Renderer
//!
//! Owns everything the pipeline needs: shared GPU state, both SMP frames and
//! their dispatcher, the entity cache and the model cache. Game and UI code
//! talk to the renderer only through the entry points here.
//!
//! ## Frame Lifecycle
//!
//! ```text
//! begin_frame ─▶ render_scene / stretch_pic / polys_2d ... ─▶ end_frame
//!                       (records into the current frame)         │
//!                                                                ▼
//!                                          issue ─▶ back end ─▶ toggle
//! ```
//!
//! Every recording entry point silently does nothing while the renderer is
//! not registered (before creation finished or after shutdown), and a
//! command that does not fit in the frame is dropped without error.

use std::sync::Arc;

use crate::config::ConfigError;
use crate::core::{RenderSpeeds, RendererConfig, WindowConfig};
use crate::foundation::math::Mat4;
use crate::foundation::time::Stopwatch;
use crate::render::backend::BackendCounters;
use crate::render::commands::{
    ArenaSpan, ClearBufferCommand, CommandRecord, DrawBufferCommand, DrawViewCommand, FinalisePortalCommand,
    GradientPicCommand, GradientType, PicRect, Poly2dCommand, Poly2dIndexedCommand, PostProcessCommand,
    PreparePortalCommand, ResetMatrixTransformCommand, RotatedPicCommand, ScissorSetCommand, SetColorCommand,
    SetColorGradingCommand, SetMatrixTransformCommand, SetupLightsCommand, ShaderHandle, StretchPicCommand,
    SurfaceHandle, VideoFrameCommand, ViewDef,
};
use crate::render::context::{GpuContext, GpuState};
use crate::render::device::{
    DrawBufferTarget, GraphicsDevice, Rect, TextureDesc, TextureMode, VideoCapture, EXT_BINDLESS_TEXTURE,
};
use crate::render::dispatch::{FrameDispatcher, SmpStats};
use crate::render::frame::{FrameData, PolyVert};
use crate::render::resources::{ShaderStage, TextureKey, TexturePriority};
use crate::render::{RenderError, RenderResult};
use crate::scene::entity_cache::{EntityCache, EntityUpdate, LerpTagSync, LerpTagUpdate};
use crate::scene::model_cache::ModelCache;

/// Edge length of a color grading image
pub const COLOR_GRADE_MAP_SIZE: u32 = 16;
/// Texel count of a color grading image
pub const COLOR_GRADE_MAP_STORE_SIZE: u32 = COLOR_GRADE_MAP_SIZE * COLOR_GRADE_MAP_SIZE * COLOR_GRADE_MAP_SIZE;

/// Time spent on one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTimes {
    /// Front end recording time
    pub front_end_msec: u32,
    /// Back end execution time reported by the last idle handshake
    pub back_end_msec: u32,
}

/// The render pipeline
pub struct Renderer {
    config: RendererConfig,
    window: WindowConfig,
    context: Arc<GpuContext>,
    dispatcher: FrameDispatcher,
    entities: EntityCache,
    models: ModelCache,
    registered: bool,
    frame_count: u64,
    clip_region: [f32; 4],
    front_end: Stopwatch,
    pending_texture_mode: Option<TextureMode>,
    draw_buffer: DrawBufferTarget,
}

impl Renderer {
    /// Bring the renderer up on `device`.
    ///
    /// Fails if a required extension is missing, the configuration is
    /// invalid, or the render targets cannot be built.
    pub fn new(device: Box<dyn GraphicsDevice>, config: RendererConfig, window: WindowConfig) -> RenderResult<Self> {
        log::info!("----- Initializing renderer -----");
        config.validate()?;
        window.validate()?;

        let caps = device.capabilities().clone();
        if let Some(missing) = caps.missing_required().next() {
            log::error!("Required extension {} is missing", missing.name);
            return Err(RenderError::MissingExtension(missing.name.clone()));
        }
        if config.bindless_textures && !caps.has_extension(EXT_BINDLESS_TEXTURE) {
            log::warn!("{EXT_BINDLESS_TEXTURE} not available, using texture units");
        }

        let texture_mode = parse_texture_mode(&config.texture_mode)?;
        let draw_buffer = parse_draw_buffer(&config.draw_buffer)?;

        let context = Arc::new(GpuContext::new(GpuState::new(device, &config)));
        {
            let mut guard = context.acquire()?;
            let gpu: &mut GpuState = &mut guard;
            gpu.device.set_texture_mode(texture_mode);
            gpu.fbos.init_fbos(&mut *gpu.device, &mut gpu.textures, &config, &window)?;
        }

        let dispatcher = FrameDispatcher::new(Arc::clone(&context), &config)?;
        log::info!(
            "Renderer ready: {}x{}, {} render thread",
            window.width,
            window.height,
            if dispatcher.is_threaded() { "with" } else { "without" }
        );

        Ok(Self {
            config,
            window,
            context,
            dispatcher,
            entities: EntityCache::new(),
            models: ModelCache::new(),
            registered: true,
            frame_count: 0,
            clip_region: [0.0; 4],
            front_end: Stopwatch::new(),
            pending_texture_mode: None,
            draw_buffer,
        })
    }

    /// Active configuration
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Window the render targets follow
    pub const fn window(&self) -> &WindowConfig {
        &self.window
    }

    /// Whether entry points record commands
    pub const fn is_registered(&self) -> bool {
        self.registered
    }

    /// Frames begun so far
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Shared GPU state
    pub const fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Frame dispatcher
    pub const fn dispatcher(&self) -> &FrameDispatcher {
        &self.dispatcher
    }

    /// Handshake statistics
    pub const fn smp_stats(&self) -> &SmpStats {
        self.dispatcher.stats()
    }

    /// Entity cache
    pub const fn entity_cache(&self) -> &EntityCache {
        &self.entities
    }

    /// Loaded models and animations
    pub const fn models(&self) -> &ModelCache {
        &self.models
    }

    /// Mutable model cache for loaders
    pub fn models_mut(&mut self) -> &mut ModelCache {
        &mut self.models
    }

    /// The frame currently being recorded
    pub fn current_frame(&mut self) -> Option<&mut FrameData> {
        self.dispatcher.current_frame()
    }

    fn record<T: CommandRecord>(&mut self, record: T) -> RenderResult<bool> {
        if !self.registered {
            return Ok(false);
        }
        let Some(frame) = self.dispatcher.current_frame() else {
            return Ok(false);
        };
        Ok(frame.commands.get_render_command(record)?.is_some())
    }

    /// Latch a texture mode change; applied at the next [`Self::begin_frame`]
    pub fn set_texture_mode(&mut self, name: &str) -> RenderResult<()> {
        let mode = parse_texture_mode(name)?;
        self.config.texture_mode = name.to_string();
        self.pending_texture_mode = Some(mode);
        Ok(())
    }

    /// Select `GL_BACK` or `GL_FRONT` from the next frame on
    pub fn set_draw_buffer(&mut self, name: &str) -> RenderResult<()> {
        self.draw_buffer = parse_draw_buffer(name)?;
        self.config.draw_buffer = name.to_string();
        Ok(())
    }

    /// Start or stop the render thread
    pub fn set_smp(&mut self, enabled: bool) -> RenderResult<()> {
        self.config.smp = enabled;
        self.dispatcher.set_smp(enabled)
    }

    /// Start a frame: apply latched settings and record the draw buffer
    pub fn begin_frame(&mut self) -> RenderResult<()> {
        if !self.registered {
            return Ok(());
        }
        self.frame_count += 1;
        self.entities.set_frame_count(self.frame_count);
        self.front_end.start();

        if let Some(mode) = self.pending_texture_mode.take() {
            self.sync_render_thread()?;
            let mut gpu = self.context.acquire()?;
            gpu.device.set_texture_mode(mode);
        }

        self.record(DrawBufferCommand { target: self.draw_buffer })?;
        Ok(())
    }

    /// Finish the frame: swap, hand it to the back end and switch frames
    pub fn end_frame(&mut self) -> RenderResult<FrameTimes> {
        if !self.registered {
            return Ok(FrameTimes::default());
        }
        let Some(frame) = self.dispatcher.current_frame() else {
            return Ok(FrameTimes::default());
        };
        frame.commands.push_swap_buffers();
        let front_end_msec = self.front_end.take_msec();

        let issued = self.dispatcher.issue(true);
        self.dispatcher.toggle();
        issued?;

        let counters = *self.dispatcher.last_counters();
        self.log_speeds(&counters);
        Ok(FrameTimes {
            front_end_msec,
            back_end_msec: counters.msec,
        })
    }

    fn log_speeds(&mut self, counters: &BackendCounters) {
        let entity_stats = self.entities.take_stats();
        match self.config.speeds {
            RenderSpeeds::Off => {}
            RenderSpeeds::General => log::info!(
                "{} views {} portals {} batches {} surfs {} verts {} tris {} draws",
                counters.views,
                counters.portals,
                counters.batches,
                counters.surfaces,
                counters.vertexes,
                counters.indexes / 3,
                counters.draw_elements
            ),
            RenderSpeeds::Entities => log::info!(
                "{} transforms {} skeletons {} entities {} bones",
                entity_stats.transforms,
                entity_stats.skeletons_built,
                entity_stats.entities_added,
                counters.bones
            ),
            RenderSpeeds::Smp => {
                let stats = self.dispatcher.stats();
                log::info!(
                    "{} frames {} blocked on render {} blocked on main",
                    stats.frames_issued,
                    stats.blocked_on_render,
                    stats.blocked_on_main
                );
            }
        }
    }

    /// Issue pending commands and wait until the back end is idle.
    ///
    /// Call before touching GPU state the back end may be using.
    pub fn sync_render_thread(&mut self) -> RenderResult<()> {
        if !self.registered {
            return Ok(());
        }
        self.dispatcher.sync()
    }

    /// Set the 2D draw color
    pub fn set_color(&mut self, color: [f32; 4]) -> RenderResult<()> {
        self.record(SetColorCommand { color })?;
        Ok(())
    }

    /// Bind a color grading image to `slot`.
    ///
    /// Ignored when color grading is off, the slot is out of range or the
    /// image is not a 16x16x16 grading map.
    pub fn set_color_grading(&mut self, slot: u8, image: TextureKey) -> RenderResult<()> {
        if !self.config.color_grading || !self.registered || slot > 3 {
            return Ok(());
        }
        let dimensions = {
            let gpu = self.context.acquire()?;
            gpu.textures.texture(image).map(|texture| texture.dimensions())
        };
        let Some((width, height)) = dimensions else {
            return Ok(());
        };
        if width != COLOR_GRADE_MAP_SIZE && height != COLOR_GRADE_MAP_SIZE {
            return Ok(());
        }
        if width * height != COLOR_GRADE_MAP_STORE_SIZE {
            return Ok(());
        }
        self.record(SetColorGradingCommand { slot, image })?;
        Ok(())
    }

    /// Clip later stretch pics to `[left, top, right, bottom]`; `None` stops clipping
    pub fn set_clip_region(&mut self, region: Option<[f32; 4]>) {
        self.clip_region = region.unwrap_or([0.0; 4]);
    }

    /// Draw an axis aligned pic, clipped against the clip region
    pub fn stretch_pic(&mut self, mut pic: PicRect, shader: ShaderHandle) -> RenderResult<()> {
        if !self.registered || clip_pic(&self.clip_region, &mut pic) {
            return Ok(());
        }
        self.record(StretchPicCommand { shader, pic })?;
        Ok(())
    }

    /// Draw a pic rotated by `angle` degrees around its center
    pub fn rotated_pic(&mut self, pic: PicRect, shader: ShaderHandle, angle: f32) -> RenderResult<()> {
        self.record(RotatedPicCommand { shader, pic, angle })?;
        Ok(())
    }

    /// Draw a pic fading from the current color to `gradient_color`
    pub fn gradient_pic(
        &mut self,
        pic: PicRect,
        shader: ShaderHandle,
        gradient_color: [u8; 4],
        gradient_type: GradientType,
    ) -> RenderResult<()> {
        self.record(GradientPicCommand {
            shader,
            pic,
            gradient_color,
            gradient_type,
        })?;
        Ok(())
    }

    /// Draw a 2D triangle fan. Dropped when the polygon arena is full.
    pub fn polys_2d(&mut self, verts: &[PolyVert], shader: ShaderHandle) -> RenderResult<()> {
        if !self.registered {
            return Ok(());
        }
        let Some(frame) = self.dispatcher.current_frame() else {
            return Ok(());
        };
        if !frame.has_poly_room(verts.len(), 0) {
            return Ok(());
        }
        let verts_span = arena_span(frame.num_poly_verts(), verts.len());
        if frame
            .commands
            .get_render_command(Poly2dCommand { shader, verts: verts_span })?
            .is_some()
        {
            frame.push_poly_verts(verts);
        }
        Ok(())
    }

    /// Draw indexed 2D triangles offset by `translation`. Dropped when either arena is full.
    pub fn polys_2d_indexed(
        &mut self,
        verts: &[PolyVert],
        indexes: &[u32],
        translation: [i32; 2],
        shader: ShaderHandle,
    ) -> RenderResult<()> {
        if !self.registered {
            return Ok(());
        }
        let Some(frame) = self.dispatcher.current_frame() else {
            return Ok(());
        };
        if !frame.has_poly_room(verts.len(), indexes.len()) {
            return Ok(());
        }
        let command = Poly2dIndexedCommand {
            shader,
            verts: arena_span(frame.num_poly_verts(), verts.len()),
            indexes: arena_span(frame.num_poly_indexes(), indexes.len()),
            translation,
        };
        if frame.commands.get_render_command(command)?.is_some() {
            frame.push_poly_verts(verts);
            frame.push_poly_indexes(indexes);
        }
        Ok(())
    }

    /// Disabling the scissor sets it to the whole window; enabling is a no-op
    pub fn scissor_enable(&mut self, enable: bool) -> RenderResult<()> {
        if enable {
            return Ok(());
        }
        let (width, height) = (self.window.width as i32, self.window.height as i32);
        self.scissor_set(Rect::new(0, 0, width, height))
    }

    /// Set the scissor rectangle
    pub fn scissor_set(&mut self, rect: Rect) -> RenderResult<()> {
        self.record(ScissorSetCommand { rect })?;
        Ok(())
    }

    /// Transform later 2D geometry until [`Self::reset_matrix_transform`]
    pub fn set_matrix_transform(&mut self, matrix: Mat4) -> RenderResult<()> {
        self.record(SetMatrixTransformCommand { matrix })?;
        Ok(())
    }

    /// Drop the 2D transform
    pub fn reset_matrix_transform(&mut self) -> RenderResult<()> {
        self.record(ResetMatrixTransformCommand)?;
        Ok(())
    }

    /// Capture this frame for video recording
    pub fn take_video_frame(&mut self, capture: VideoCapture) -> RenderResult<()> {
        self.record(VideoFrameCommand { capture })?;
        Ok(())
    }

    /// Submit the active entities and record the passes of one 3D view
    pub fn render_scene(&mut self, view: &ViewDef) -> RenderResult<()> {
        if !self.registered {
            return Ok(());
        }
        let Some(frame) = self.dispatcher.current_frame() else {
            return Ok(());
        };
        let first = frame.num_entities();
        self.entities.add_ref_entities(&self.models, frame);
        let entities = frame.entity_span_since(first);

        let view = *view;
        if self.config.realtime_lighting {
            self.record(SetupLightsCommand { view })?;
        }
        self.record(ClearBufferCommand { view })?;
        if self.config.realtime_lighting {
            self.record(DrawViewCommand {
                view,
                depth_pass: true,
                entities,
            })?;
        }
        self.record(DrawViewCommand {
            view,
            depth_pass: false,
            entities,
        })?;
        self.record(PostProcessCommand { view })?;
        Ok(())
    }

    /// Mark a portal surface before its view is drawn
    pub fn add_prepare_portal(&mut self, view: &ViewDef, surface: SurfaceHandle) -> RenderResult<()> {
        self.record(PreparePortalCommand { view: *view, surface })?;
        Ok(())
    }

    /// Restore after a portal view
    pub fn add_finalise_portal(&mut self, view: &ViewDef, surface: SurfaceHandle) -> RenderResult<()> {
        self.record(FinalisePortalCommand { view: *view, surface })?;
        Ok(())
    }

    /// Apply entity updates from game logic
    pub fn sync_entity_cache_from_cgame(&mut self, updates: &[EntityUpdate]) -> RenderResult<()> {
        self.entities.sync_from_cgame(updates)
    }

    /// Answer tag queries from game logic
    pub fn sync_entity_cache_to_cgame(&mut self, queries: &[LerpTagUpdate]) -> RenderResult<Vec<LerpTagSync>> {
        self.entities.sync_to_cgame(queries, &self.models)
    }

    /// Reset the entity cache, used on level load
    pub fn clear_entity_cache(&mut self) {
        self.entities.clear();
    }

    /// Create a texture on the device
    pub fn create_texture(&mut self, desc: &TextureDesc, priority: TexturePriority) -> RenderResult<TextureKey> {
        let mut guard = self.context.acquire()?;
        let gpu: &mut GpuState = &mut guard;
        gpu.textures.create_texture(&mut *gpu.device, desc, priority)
    }

    /// Destroy a texture. Waits for the back end first.
    pub fn destroy_texture(&mut self, key: TextureKey) -> RenderResult<()> {
        self.sync_render_thread()?;
        let mut guard = self.context.acquire()?;
        let gpu: &mut GpuState = &mut guard;
        gpu.shaders.forget_texture(key);
        gpu.textures.destroy_texture(&mut *gpu.device, key)
    }

    /// Register a shader's texture bindings
    pub fn register_shader(&mut self, name: &str, stages: Vec<ShaderStage>) -> RenderResult<ShaderHandle> {
        let mut gpu = self.context.acquire()?;
        Ok(gpu.shaders.register(name, stages))
    }

    /// Rebuild the render targets for a new window size
    pub fn restart_video(&mut self, window: WindowConfig) -> RenderResult<()> {
        window.validate()?;
        self.sync_render_thread()?;
        log::info!("Restarting video at {}x{}", window.width, window.height);
        {
            let mut guard = self.context.acquire()?;
            let gpu: &mut GpuState = &mut guard;
            gpu.fbos.shutdown_fbos(&mut *gpu.device, &mut gpu.textures);
            gpu.fbos.init_fbos(&mut *gpu.device, &mut gpu.textures, &self.config, &window)?;
        }
        self.window = window;
        Ok(())
    }

    /// Log the FBO table
    pub fn list_fbos(&self) -> RenderResult<Vec<String>> {
        let gpu = self.context.acquire()?;
        Ok(gpu.fbos.list_fbos())
    }

    /// Stop the render thread and release every GPU resource
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if !self.registered {
            return Ok(());
        }
        log::info!("----- Shutting down renderer -----");
        let synced = self.dispatcher.sync();
        let stopped = self.dispatcher.shutdown();
        {
            let mut guard = self.context.acquire()?;
            let gpu: &mut GpuState = &mut guard;
            gpu.fbos.shutdown_fbos(&mut *gpu.device, &mut gpu.textures);
            gpu.textures.all_non_resident(&mut *gpu.device);
            gpu.textures.free_textures();
            gpu.shaders.clear();
        }
        self.entities.clear();
        self.registered = false;
        synced.and(stopped)
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("registered", &self.registered)
            .field("frame_count", &self.frame_count)
            .field("window", &self.window)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

fn parse_texture_mode(name: &str) -> RenderResult<TextureMode> {
    TextureMode::from_name(name)
        .ok_or_else(|| ConfigError::Invalid(format!("bad texture mode '{name}'")).into())
}

fn parse_draw_buffer(name: &str) -> RenderResult<DrawBufferTarget> {
    DrawBufferTarget::from_name(name)
        .ok_or_else(|| ConfigError::Invalid(format!("bad draw buffer '{name}'")).into())
}

fn arena_span(first: usize, count: usize) -> ArenaSpan {
    ArenaSpan::new(
        u32::try_from(first).unwrap_or(u32::MAX),
        u32::try_from(count).unwrap_or(0),
    )
}

/// Clip a pic against `[left, top, right, bottom]`, adjusting its texture
/// coordinates proportionally. Returns true when nothing is left to draw.
/// An empty region clips nothing.
pub fn clip_pic(region: &[f32; 4], pic: &mut PicRect) -> bool {
    let [clip_left, clip_top, clip_right, clip_bottom] = *region;
    if clip_right <= clip_left || clip_bottom <= clip_top {
        return false;
    }

    let (left, top) = (pic.x, pic.y);
    let (right, bottom) = (pic.x + pic.w, pic.y + pic.h);
    let (s1, t1, s2, t2) = (pic.s1, pic.t1, pic.s2, pic.t2);

    if right <= clip_left || left >= clip_right || bottom <= clip_top || top >= clip_bottom {
        return true;
    }

    if left < clip_left {
        let f = (clip_left - left) / (right - left);
        pic.s1 = f * (s2 - s1) + s1;
        pic.x = clip_left;
        pic.w -= clip_left - left;
    }
    if right > clip_right {
        let f = (clip_right - right) / (left - right);
        pic.s2 = f * (s1 - s2) + s2;
        pic.w = clip_right - pic.x;
    }
    if top < clip_top {
        let f = (clip_top - top) / (bottom - top);
        pic.t1 = f * (t2 - t1) + t1;
        pic.y = clip_top;
        pic.h -= clip_top - top;
    }
    if bottom > clip_bottom {
        let f = (clip_bottom - bottom) / (top - bottom);
        pic.t2 = f * (t1 - t2) + t2;
        pic.h = clip_bottom - pic.y;
    }
    false
}
