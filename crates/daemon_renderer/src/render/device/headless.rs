//! In-memory graphics device
//!
//! Implements every [`GraphicsDevice`] call against plain bookkeeping:
//! handle allocation, renderbuffer storage, framebuffer attachments and
//! completeness, a bindless residency budget, a streamed 2D vertex buffer
//! and a log of draw level operations. A [`HeadlessProbe`] shares the state so tests can inspect it
//! while the device itself lives on the render thread.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::{
    AttachmentPoint, BindlessHandle, DeviceCapabilities, DrawBufferTarget, FramebufferStatus,
    GraphicsDevice, ImageFormat, NativeHandle, PolyDraw, PortalPhase, PostProcessPass, QuadDraw,
    Rect, TextureDesc, TextureMode, TextureTarget, VideoCapture, ViewDraw, EXT_TEXTURE_FLOAT,
};
use crate::render::commands::{ShaderHandle, SurfaceHandle, ViewDef};
use crate::render::frame::PolyVert;
use crate::render::{RenderError, RenderResult};

const BINDLESS_HANDLE_BASE: u64 = 0x0001_0000_0000;

/// Operations recorded by the headless device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOp {
    /// Context bound to a thread
    MakeCurrent(ThreadId),
    /// Context released by a thread
    ReleaseCurrent(ThreadId),
    /// Texture filtering changed
    TextureMode(TextureMode),
    /// Framebuffer bound
    BindFramebuffer(Option<NativeHandle>),
    /// Bindless handle uploaded
    UniformHandle {
        /// Uniform location
        location: i32,
        /// Handle
        handle: BindlessHandle,
    },
    /// Texture unit uploaded
    UniformUnit {
        /// Uniform location
        location: i32,
        /// Unit
        unit: u32,
    },
    /// Light tiles built
    SetupLights {
        /// Scene time of the view
        time: i32,
    },
    /// Render target cleared
    Clear,
    /// View drawn
    DrawView {
        /// Depth pre-pass
        depth_pass: bool,
        /// Entity count
        entities: usize,
        /// Bones referenced by those entities
        bones: usize,
        /// Bound framebuffer
        target: Option<NativeHandle>,
    },
    /// Portal stencil phase
    Portal(PortalPhase, SurfaceHandle),
    /// Post processing pass
    PostProcess(PostProcessPass),
    /// Draw buffer selected
    DrawBuffer(DrawBufferTarget),
    /// Scissor set
    Scissor(Rect),
    /// 2D quad drawn
    Quad(QuadDraw),
    /// 2D polygons drawn
    Polys {
        /// Material
        shader: ShaderHandle,
        /// Vertices as drawn
        verts: Vec<PolyVert>,
        /// Index count, 0 for fans
        indexes: usize,
    },
    /// Frame presented
    Swap,
    /// Frame captured
    Capture(VideoCapture),
}

/// Storage allocated for a renderbuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderbufferStorage {
    /// Internal format
    pub format: ImageFormat,
    /// Sample count
    pub samples: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachmentSource {
    Renderbuffer(NativeHandle),
    Texture(NativeHandle),
}

#[derive(Debug)]
struct HeadlessState {
    caps: DeviceCapabilities,
    next_handle: NativeHandle,
    textures: HashMap<NativeHandle, TextureDesc>,
    framebuffers: HashMap<NativeHandle, HashMap<AttachmentPoint, AttachmentSource>>,
    renderbuffers: HashMap<NativeHandle, Option<RenderbufferStorage>>,
    bound_framebuffer: Option<NativeHandle>,
    bindless: HashMap<NativeHandle, BindlessHandle>,
    resident: HashSet<BindlessHandle>,
    residency_budget: usize,
    fail_texture_handles: bool,
    errors: VecDeque<u32>,
    current_thread: Option<ThreadId>,
    recording: bool,
    ops: Vec<DeviceOp>,
    poly_stream: Vec<u8>,
}

impl HeadlessState {
    fn alloc(&mut self) -> NativeHandle {
        self.next_handle += 1;
        self.next_handle
    }

    fn record(&mut self, op: DeviceOp) {
        if self.recording {
            self.ops.push(op);
        }
    }

    fn attachment_info(&self, source: AttachmentSource) -> Option<(ImageFormat, u32, u32)> {
        match source {
            AttachmentSource::Renderbuffer(rb) => self
                .renderbuffers
                .get(&rb)
                .copied()
                .flatten()
                .map(|s| (s.format, s.width, s.height)),
            AttachmentSource::Texture(tex) => self
                .textures
                .get(&tex)
                .map(|desc| (desc.format, desc.width, desc.height)),
        }
    }

    fn status(&self, framebuffer: NativeHandle) -> FramebufferStatus {
        let Some(attachments) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Unknown(0x0506);
        };
        if attachments.is_empty() {
            return FramebufferStatus::MissingAttachment;
        }

        let float_targets = self.caps.has_extension(EXT_TEXTURE_FLOAT);
        let mut size = None;
        for (point, source) in attachments {
            let Some((format, width, height)) = self.attachment_info(*source) else {
                return FramebufferStatus::IncompleteAttachment;
            };
            if format.class() != point.class() {
                return FramebufferStatus::IncompleteAttachment;
            }
            if format.is_float() && !float_targets {
                return FramebufferStatus::Unsupported;
            }
            match size {
                None => size = Some((width, height)),
                Some(existing) if existing != (width, height) => {
                    return FramebufferStatus::IncompleteDimensions;
                }
                Some(_) => {}
            }
        }
        FramebufferStatus::Complete
    }
}

/// Headless [`GraphicsDevice`]
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Arc<Mutex<HeadlessState>>,
    caps: DeviceCapabilities,
}

impl HeadlessDevice {
    /// Create a device with the given capabilities and an unlimited residency budget
    pub fn new(caps: DeviceCapabilities) -> Self {
        let state = HeadlessState {
            caps: caps.clone(),
            next_handle: 0,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            renderbuffers: HashMap::new(),
            bound_framebuffer: None,
            bindless: HashMap::new(),
            resident: HashSet::new(),
            residency_budget: usize::MAX,
            fail_texture_handles: false,
            errors: VecDeque::new(),
            current_thread: None,
            recording: true,
            ops: Vec::new(),
            poly_stream: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            caps,
        }
    }

    /// Limit how many bindless handles can be resident at once
    pub fn with_residency_budget(self, budget: usize) -> Self {
        self.state.lock().residency_budget = budget;
        self
    }

    /// Handle for inspecting the device from another thread
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(DeviceCapabilities::default())
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn make_current(&mut self) -> RenderResult<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let current = state.current_thread;
        match current {
            Some(owner) if owner != me => Err(RenderError::Device(format!(
                "context is current on {owner:?}, cannot make it current on {me:?}"
            ))),
            _ => {
                state.current_thread = Some(me);
                state.record(DeviceOp::MakeCurrent(me));
                Ok(())
            }
        }
    }

    fn release_current(&mut self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.current_thread == Some(me) {
            state.current_thread = None;
            state.record(DeviceOp::ReleaseCurrent(me));
        }
    }

    fn poll_error(&mut self) -> Option<u32> {
        self.state.lock().errors.pop_front()
    }

    fn set_texture_mode(&mut self, mode: TextureMode) {
        self.state.lock().record(DeviceOp::TextureMode(mode));
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> NativeHandle {
        if desc.width == 0 || desc.height == 0 {
            return 0;
        }
        let mut state = self.state.lock();
        let handle = state.alloc();
        state.textures.insert(handle, desc.clone());
        handle
    }

    fn delete_texture(&mut self, texture: NativeHandle) {
        let mut state = self.state.lock();
        state.textures.remove(&texture);
        if let Some(handle) = state.bindless.remove(&texture) {
            state.resident.remove(&handle);
        }
    }

    fn create_framebuffer(&mut self) -> NativeHandle {
        let mut state = self.state.lock();
        let handle = state.alloc();
        state.framebuffers.insert(handle, HashMap::new());
        handle
    }

    fn delete_framebuffer(&mut self, framebuffer: NativeHandle) {
        let mut state = self.state.lock();
        state.framebuffers.remove(&framebuffer);
        if state.bound_framebuffer == Some(framebuffer) {
            state.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<NativeHandle>) {
        let mut state = self.state.lock();
        state.bound_framebuffer = framebuffer;
        state.record(DeviceOp::BindFramebuffer(framebuffer));
    }

    fn framebuffer_status(&mut self, framebuffer: NativeHandle) -> FramebufferStatus {
        self.state.lock().status(framebuffer)
    }

    fn create_renderbuffer(&mut self) -> NativeHandle {
        let mut state = self.state.lock();
        let handle = state.alloc();
        state.renderbuffers.insert(handle, None);
        handle
    }

    fn delete_renderbuffer(&mut self, renderbuffer: NativeHandle) {
        self.state.lock().renderbuffers.remove(&renderbuffer);
    }

    fn renderbuffer_storage(&mut self, renderbuffer: NativeHandle, format: ImageFormat, samples: u32, width: u32, height: u32) {
        if let Some(storage) = self.state.lock().renderbuffers.get_mut(&renderbuffer) {
            *storage = Some(RenderbufferStorage {
                format,
                samples,
                width,
                height,
            });
        }
    }

    fn attach_renderbuffer(&mut self, framebuffer: NativeHandle, point: AttachmentPoint, renderbuffer: NativeHandle) {
        if let Some(attachments) = self.state.lock().framebuffers.get_mut(&framebuffer) {
            attachments.insert(point, AttachmentSource::Renderbuffer(renderbuffer));
        }
    }

    fn attach_texture(&mut self, framebuffer: NativeHandle, point: AttachmentPoint, _target: TextureTarget, texture: NativeHandle, _layer: u32) {
        if let Some(attachments) = self.state.lock().framebuffers.get_mut(&framebuffer) {
            attachments.insert(point, AttachmentSource::Texture(texture));
        }
    }

    fn texture_handle(&mut self, texture: NativeHandle) -> BindlessHandle {
        let mut state = self.state.lock();
        if state.fail_texture_handles || !state.textures.contains_key(&texture) {
            return 0;
        }
        *state
            .bindless
            .entry(texture)
            .or_insert(BINDLESS_HANDLE_BASE + u64::from(texture))
    }

    fn make_handle_resident(&mut self, handle: BindlessHandle) {
        let mut state = self.state.lock();
        if state.resident.len() < state.residency_budget {
            state.resident.insert(handle);
        }
    }

    fn make_handle_non_resident(&mut self, handle: BindlessHandle) {
        self.state.lock().resident.remove(&handle);
    }

    fn is_handle_resident(&self, handle: BindlessHandle) -> bool {
        self.state.lock().resident.contains(&handle)
    }

    fn set_uniform_handle(&mut self, location: i32, handle: BindlessHandle) {
        self.state.lock().record(DeviceOp::UniformHandle { location, handle });
    }

    fn bind_texture_unit(&mut self, _unit: u32, _target: TextureTarget, _texture: NativeHandle) {}

    fn set_uniform_unit(&mut self, location: i32, unit: u32) {
        self.state.lock().record(DeviceOp::UniformUnit { location, unit });
    }

    fn setup_lights(&mut self, view: &ViewDef) {
        self.state.lock().record(DeviceOp::SetupLights { time: view.time });
    }

    fn clear(&mut self, _view: &ViewDef) {
        self.state.lock().record(DeviceOp::Clear);
    }

    fn draw_view(&mut self, draw: &ViewDraw<'_>) {
        let bones = draw.entities.iter().map(|e| e.bones.count as usize).sum();
        self.state.lock().record(DeviceOp::DrawView {
            depth_pass: draw.depth_pass,
            entities: draw.entities.len(),
            bones,
            target: draw.target,
        });
    }

    fn portal(&mut self, phase: PortalPhase, surface: SurfaceHandle) {
        self.state.lock().record(DeviceOp::Portal(phase, surface));
    }

    fn post_process(&mut self, pass: &PostProcessPass) {
        self.state.lock().record(DeviceOp::PostProcess(*pass));
    }

    fn set_draw_buffer(&mut self, target: DrawBufferTarget) {
        self.state.lock().record(DeviceOp::DrawBuffer(target));
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.state.lock().record(DeviceOp::Scissor(rect));
    }

    fn draw_quad(&mut self, quad: &QuadDraw) {
        self.state.lock().record(DeviceOp::Quad(*quad));
    }

    fn draw_polys(&mut self, polys: &PolyDraw<'_>) {
        let mut state = self.state.lock();
        // vertices then indexes, packed the way a streamed buffer upload sees them
        let vertex_bytes: &[u8] = bytemuck::cast_slice(polys.verts);
        let index_bytes: &[u8] = polys.indexes.map(bytemuck::cast_slice::<u32, u8>).unwrap_or(&[]);
        state.poly_stream.clear();
        state.poly_stream.extend_from_slice(vertex_bytes);
        state.poly_stream.extend_from_slice(index_bytes);

        let verts = state.poly_stream[..vertex_bytes.len()]
            .chunks_exact(std::mem::size_of::<PolyVert>())
            .map(bytemuck::pod_read_unaligned::<PolyVert>)
            .collect();
        let indexes = index_bytes.len() / std::mem::size_of::<u32>();
        state.record(DeviceOp::Polys {
            shader: polys.shader,
            verts,
            indexes,
        });
    }

    fn swap_buffers(&mut self) {
        self.state.lock().record(DeviceOp::Swap);
    }

    fn capture_frame(&mut self, capture: &VideoCapture) {
        self.state.lock().record(DeviceOp::Capture(*capture));
    }
}

/// Shared view of a [`HeadlessDevice`]
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessProbe {
    /// Recorded operations so far
    pub fn ops(&self) -> Vec<DeviceOp> {
        self.state.lock().ops.clone()
    }

    /// Take and clear the recorded operations
    pub fn take_ops(&self) -> Vec<DeviceOp> {
        std::mem::take(&mut self.state.lock().ops)
    }

    /// Stop or resume recording operations
    pub fn set_recording(&self, recording: bool) {
        self.state.lock().recording = recording;
    }

    /// Queue an error code for the next `poll_error`
    pub fn push_error(&self, code: u32) {
        self.state.lock().errors.push_back(code);
    }

    /// Pending error codes
    pub fn pending_errors(&self) -> usize {
        self.state.lock().errors.len()
    }

    /// Make bindless handle creation fail
    pub fn set_fail_texture_handles(&self, fail: bool) {
        self.state.lock().fail_texture_handles = fail;
    }

    /// Change the residency budget
    pub fn set_residency_budget(&self, budget: usize) {
        self.state.lock().residency_budget = budget;
    }

    /// Number of resident bindless handles
    pub fn resident_count(&self) -> usize {
        self.state.lock().resident.len()
    }

    /// Whether a texture's bindless handle is resident
    pub fn is_texture_resident(&self, texture: NativeHandle) -> bool {
        let state = self.state.lock();
        state
            .bindless
            .get(&texture)
            .is_some_and(|handle| state.resident.contains(handle))
    }

    /// Bytes of the last 2D polygon upload
    pub fn poly_stream_len(&self) -> usize {
        self.state.lock().poly_stream.len()
    }

    /// Live textures
    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Description a texture was created with
    pub fn texture_desc(&self, texture: NativeHandle) -> Option<TextureDesc> {
        self.state.lock().textures.get(&texture).cloned()
    }

    /// Live framebuffers
    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    /// Live renderbuffers
    pub fn live_renderbuffers(&self) -> usize {
        self.state.lock().renderbuffers.len()
    }

    /// Storage of a renderbuffer
    pub fn renderbuffer_storage(&self, renderbuffer: NativeHandle) -> Option<RenderbufferStorage> {
        self.state.lock().renderbuffers.get(&renderbuffer).copied().flatten()
    }

    /// Attachment points in use on a framebuffer
    pub fn attachment_count(&self, framebuffer: NativeHandle) -> usize {
        self.state
            .lock()
            .framebuffers
            .get(&framebuffer)
            .map_or(0, HashMap::len)
    }

    /// Currently bound framebuffer
    pub fn bound_framebuffer(&self) -> Option<NativeHandle> {
        self.state.lock().bound_framebuffer
    }

    /// Thread the context is current on
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.state.lock().current_thread
    }
}
