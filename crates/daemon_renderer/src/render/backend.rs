//! Command list executor
//!
//! Replays one finalized [`FrameData`] against the device. The executor
//! owns the back-end state that persists across command lists (2D color,
//! matrix transform, scissor, color grading slots, the ping-pong main
//! target and the draw buffer) and the back-end counters.
//!
//! ## Context
//!
//! [`BackendExecutor::execute`] acquires the [`GpuContext`] for the whole
//! list, so it runs equally on the main thread or the render thread.

use std::sync::Arc;

use crate::core::RendererConfig;
use crate::foundation::math::{Mat4, Vec4};
use crate::foundation::time::Stopwatch;
use crate::render::commands::{
    DrawViewCommand, GradientPicCommand, GradientType, PicRect, Poly2dCommand, Poly2dIndexedCommand,
    RenderCommand, RotatedPicCommand, ShaderHandle, StretchPicCommand, ViewDef, ViewFlags,
};
use crate::render::context::{GpuContext, GpuState};
use crate::render::device::{
    DrawBufferTarget, PolyDraw, PortalPhase, PostProcessPass, QuadDraw, Rect, ViewDraw,
};
use crate::render::frame::{FrameData, PolyVert};
use crate::render::resources::TextureKey;
use crate::render::RenderResult;

/// Color grading slots
pub const COLOR_GRADE_SLOTS: usize = 4;
/// Sampler location of color grading slot 0; slots follow consecutively
pub const COLOR_GRADE_LOCATION: i32 = 12;

/// Back-end statistics, read and reset only while the back end is idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCounters {
    /// Color views drawn
    pub views: u32,
    /// Portals prepared
    pub portals: u32,
    /// Draw batches issued
    pub batches: u32,
    /// Surfaces drawn
    pub surfaces: u32,
    /// Vertices submitted
    pub vertexes: u32,
    /// Indexes submitted
    pub indexes: u32,
    /// Indexed draw calls
    pub draw_elements: u32,
    /// Entities drawn
    pub entities: u32,
    /// Bones uploaded
    pub bones: u32,
    /// Time spent executing command lists
    pub msec: u32,
}

impl BackendCounters {
    /// Add another set of counters to this one
    pub fn accumulate(&mut self, other: &Self) {
        self.views += other.views;
        self.portals += other.portals;
        self.batches += other.batches;
        self.surfaces += other.surfaces;
        self.vertexes += other.vertexes;
        self.indexes += other.indexes;
        self.draw_elements += other.draw_elements;
        self.entities += other.entities;
        self.bones += other.bones;
        self.msec += other.msec;
    }

    fn add_batch(&mut self, verts: usize, indexes: usize) {
        self.batches += 1;
        self.draw_elements += 1;
        self.vertexes += to_u32(verts);
        self.indexes += to_u32(indexes);
    }
}

/// Executes command lists against the shared GPU state
#[derive(Debug)]
pub struct BackendExecutor {
    context: Arc<GpuContext>,
    color: [f32; 4],
    matrix: Option<Mat4>,
    scissor: Option<Rect>,
    color_grades: [Option<TextureKey>; COLOR_GRADE_SLOTS],
    main_index: usize,
    draw_buffer: DrawBufferTarget,
    check_errors: bool,
    counters: BackendCounters,
}

impl BackendExecutor {
    /// Create an executor over `context`
    pub fn new(context: Arc<GpuContext>, config: &RendererConfig) -> Self {
        Self {
            context,
            color: [1.0; 4],
            matrix: None,
            scissor: None,
            color_grades: [None; COLOR_GRADE_SLOTS],
            main_index: 0,
            draw_buffer: DrawBufferTarget::Back,
            check_errors: config.check_gl_errors,
            counters: BackendCounters::default(),
        }
    }

    /// The shared GPU state
    pub const fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Current 2D color
    pub const fn color(&self) -> [f32; 4] {
        self.color
    }

    /// Active 2D matrix transform
    pub const fn matrix(&self) -> Option<&Mat4> {
        self.matrix.as_ref()
    }

    /// Last scissor rectangle
    pub const fn scissor(&self) -> Option<Rect> {
        self.scissor
    }

    /// Images bound to the color grading slots
    pub const fn color_grades(&self) -> &[Option<TextureKey>; COLOR_GRADE_SLOTS] {
        &self.color_grades
    }

    /// Main target the next view draws into
    pub const fn main_index(&self) -> usize {
        self.main_index
    }

    /// Selected draw buffer
    pub const fn draw_buffer(&self) -> DrawBufferTarget {
        self.draw_buffer
    }

    /// Counters accumulated so far
    pub const fn counters(&self) -> &BackendCounters {
        &self.counters
    }

    /// Return the counters and start over
    pub fn take_counters(&mut self) -> BackendCounters {
        std::mem::take(&mut self.counters)
    }

    /// Run every command of `frame` up to its `EndOfList`.
    ///
    /// GPU errors polled afterwards are logged, not returned. When a record
    /// fails, the remaining records are skipped except `SwapBuffers`, so the
    /// frame is still presented, and the first error is returned.
    pub fn execute(&mut self, frame: &FrameData) -> RenderResult<()> {
        let context = Arc::clone(&self.context);
        let mut guard = context.acquire()?;
        let gpu: &mut GpuState = &mut guard;
        let mut stopwatch = Stopwatch::start_new();

        let result = self.run_commands(gpu, frame);

        if self.check_errors {
            gpu.check_errors("execute_render_commands");
        }
        gpu.error_log.flush();
        gpu.textures.update_adjusted_priorities();
        self.counters.msec += stopwatch.take_msec();
        result
    }

    fn run_commands(&mut self, gpu: &mut GpuState, frame: &FrameData) -> RenderResult<()> {
        let mut failed = None;
        for command in frame.commands.commands() {
            match command {
                RenderCommand::EndOfList(_) => break,
                RenderCommand::SwapBuffers(_) => swap_buffers(gpu),
                _ if failed.is_some() => {}
                _ => {
                    if let Err(err) = self.run_command(gpu, frame, command) {
                        log::error!("Command list {}: {err}, skipping to the swap", frame.index());
                        failed = Some(err);
                    }
                }
            }
        }
        failed.map_or(Ok(()), Err)
    }

    fn run_command(&mut self, gpu: &mut GpuState, frame: &FrameData, command: &RenderCommand) -> RenderResult<()> {
        match command {
            RenderCommand::SetupLights(cmd) => {
                let light_tile = gpu.fbos.targets().light_tile;
                if let Some(id) = light_tile {
                    gpu.fbos.bind_fbo(&mut *gpu.device, id)?;
                }
                gpu.device.setup_lights(&cmd.view);
            }
            RenderCommand::ClearBuffer(cmd) => self.clear_buffer(gpu, &cmd.view)?,
            RenderCommand::DrawView(cmd) => self.draw_view(gpu, frame, cmd)?,
            RenderCommand::PreparePortal(cmd) => {
                gpu.device.portal(PortalPhase::Prepare, cmd.surface);
                self.counters.portals += 1;
            }
            RenderCommand::FinalisePortal(cmd) => gpu.device.portal(PortalPhase::Finalise, cmd.surface),
            RenderCommand::PostProcess(cmd) => self.post_process(gpu, &cmd.view)?,
            RenderCommand::SetColor(cmd) => self.color = cmd.color,
            RenderCommand::SetColorGrading(cmd) => {
                if let Some(slot) = self.color_grades.get_mut(usize::from(cmd.slot)) {
                    *slot = Some(cmd.image);
                }
            }
            RenderCommand::StretchPic(cmd) => self.stretch_pic(gpu, cmd)?,
            RenderCommand::RotatedPic(cmd) => self.rotated_pic(gpu, cmd)?,
            RenderCommand::GradientPic(cmd) => self.gradient_pic(gpu, cmd)?,
            RenderCommand::Poly2d(cmd) => self.poly_2d(gpu, frame, cmd)?,
            RenderCommand::Poly2dIndexed(cmd) => self.poly_2d_indexed(gpu, frame, cmd)?,
            RenderCommand::ScissorSet(cmd) => {
                self.scissor = Some(cmd.rect);
                gpu.device.set_scissor(cmd.rect);
            }
            RenderCommand::SetMatrixTransform(cmd) => self.matrix = Some(cmd.matrix),
            RenderCommand::ResetMatrixTransform(_) => self.matrix = None,
            RenderCommand::DrawBuffer(cmd) => {
                self.draw_buffer = cmd.target;
                gpu.device.set_draw_buffer(cmd.target);
            }
            RenderCommand::VideoFrame(cmd) => gpu.device.capture_frame(&cmd.capture),
            RenderCommand::SwapBuffers(_) => swap_buffers(gpu),
            RenderCommand::EndOfList(_) => {}
        }
        Ok(())
    }

    fn bind_main(&self, gpu: &mut GpuState) -> RenderResult<()> {
        let main = gpu.fbos.targets().main[self.main_index];
        match main {
            Some(id) => gpu.fbos.bind_fbo(&mut *gpu.device, id),
            None => {
                gpu.fbos.bind_null_fbo(&mut *gpu.device);
                Ok(())
            }
        }
    }

    fn clear_buffer(&self, gpu: &mut GpuState, view: &ViewDef) -> RenderResult<()> {
        self.bind_main(gpu)?;
        gpu.device.clear(view);
        let msaa = gpu.fbos.targets().msaa;
        if let Some(msaa) = msaa {
            gpu.fbos.bind_fbo(&mut *gpu.device, msaa)?;
            gpu.device.clear(view);
        }
        Ok(())
    }

    fn draw_view(&mut self, gpu: &mut GpuState, frame: &FrameData, cmd: &DrawViewCommand) -> RenderResult<()> {
        self.bind_main(gpu)?;
        let entities = frame.entities(cmd.entities);
        for entity in entities {
            if let Some(shader) = entity.custom_shader {
                bind_shader(gpu, shader)?;
            }
        }
        let target = gpu.fbos.current().and_then(|id| gpu.fbos.fbo_handle(id));
        gpu.device.draw_view(&ViewDraw {
            view: &cmd.view,
            depth_pass: cmd.depth_pass,
            entities,
            bones: frame.bones(),
            target,
        });

        if !cmd.depth_pass {
            self.counters.views += 1;
            self.counters.entities += to_u32(entities.len());
            self.counters.surfaces += to_u32(entities.len());
            self.counters.bones += entities.iter().map(|e| e.bones.count).sum::<u32>();
        }
        self.counters.batches += 1;
        Ok(())
    }

    fn post_process(&mut self, gpu: &mut GpuState, view: &ViewDef) -> RenderResult<()> {
        let targets = gpu.fbos.targets();
        let handle = |id| gpu.fbos.fbo_handle(id);
        let source = targets.main[self.main_index].and_then(handle);
        let bloom = match (view.flags.contains(ViewFlags::NO_BLOOM), targets.contrast, targets.bloom) {
            (false, Some(contrast), [Some(blur0), Some(blur1)]) => {
                match (handle(contrast), handle(blur0), handle(blur1)) {
                    (Some(c), Some(b0), Some(b1)) => Some([c, b0, b1]),
                    _ => None,
                }
            }
            _ => None,
        };

        let GpuState { device, textures, .. } = &mut *gpu;
        textures.start_texture_sequence();
        let mut color_grades = 0;
        let mut result = Ok(());
        for (slot, image) in self.color_grades.iter().enumerate() {
            let Some(image) = *image else { continue };
            let location = COLOR_GRADE_LOCATION + i32::try_from(slot).unwrap_or(0);
            if let Err(err) = textures.bind_texture(&mut **device, location, image) {
                result = Err(err);
                break;
            }
            color_grades += 1;
        }
        textures.end_texture_sequence();
        result?;

        gpu.fbos.bind_null_fbo(&mut *gpu.device);
        gpu.device.post_process(&PostProcessPass {
            source,
            destination: None,
            bloom,
            color_grades,
        });
        // the next view draws into the other main target
        self.main_index ^= 1;
        Ok(())
    }

    fn draw_quad(&mut self, gpu: &mut GpuState, shader: ShaderHandle, mut verts: [PolyVert; 4]) -> RenderResult<()> {
        if let Some(matrix) = &self.matrix {
            transform_verts(matrix, &mut verts);
        }
        bind_shader(gpu, shader)?;
        gpu.device.draw_quad(&QuadDraw { shader, verts });
        self.counters.add_batch(4, 6);
        Ok(())
    }

    fn stretch_pic(&mut self, gpu: &mut GpuState, cmd: &StretchPicCommand) -> RenderResult<()> {
        let quad = stretch_quad(&cmd.pic, color_bytes(self.color));
        self.draw_quad(gpu, cmd.shader, quad)
    }

    fn rotated_pic(&mut self, gpu: &mut GpuState, cmd: &RotatedPicCommand) -> RenderResult<()> {
        let quad = rotated_quad(&cmd.pic, cmd.angle, color_bytes(self.color));
        self.draw_quad(gpu, cmd.shader, quad)
    }

    fn gradient_pic(&mut self, gpu: &mut GpuState, cmd: &GradientPicCommand) -> RenderResult<()> {
        let quad = gradient_quad(&cmd.pic, color_bytes(self.color), cmd.gradient_color, cmd.gradient_type);
        self.draw_quad(gpu, cmd.shader, quad)
    }

    fn poly_2d(&mut self, gpu: &mut GpuState, frame: &FrameData, cmd: &Poly2dCommand) -> RenderResult<()> {
        let mut verts = frame.poly_verts(cmd.verts).to_vec();
        if verts.len() < 3 {
            return Ok(());
        }
        if let Some(matrix) = &self.matrix {
            transform_verts(matrix, &mut verts);
        }
        bind_shader(gpu, cmd.shader)?;
        gpu.device.draw_polys(&PolyDraw {
            shader: cmd.shader,
            verts: &verts,
            indexes: None,
        });
        self.counters.add_batch(verts.len(), (verts.len() - 2) * 3);
        Ok(())
    }

    fn poly_2d_indexed(
        &mut self,
        gpu: &mut GpuState,
        frame: &FrameData,
        cmd: &Poly2dIndexedCommand,
    ) -> RenderResult<()> {
        let mut verts = frame.poly_verts(cmd.verts).to_vec();
        let indexes = frame.poly_indexes(cmd.indexes);
        #[allow(clippy::cast_precision_loss)]
        let (tx, ty) = (cmd.translation[0] as f32, cmd.translation[1] as f32);
        for vert in &mut verts {
            vert.xyz = [vert.xyz[0] + tx, vert.xyz[1] + ty, 0.0];
        }
        if let Some(matrix) = &self.matrix {
            transform_verts(matrix, &mut verts);
        }
        if let Some(rect) = self.scissor {
            gpu.device.set_scissor(rect);
        }
        bind_shader(gpu, cmd.shader)?;
        gpu.device.draw_polys(&PolyDraw {
            shader: cmd.shader,
            verts: &verts,
            indexes: Some(indexes),
        });
        self.counters.add_batch(verts.len(), indexes.len());
        Ok(())
    }
}

fn swap_buffers(gpu: &mut GpuState) {
    gpu.fbos.bind_null_fbo(&mut *gpu.device);
    gpu.device.swap_buffers();
}

/// Bind every texture of a shader, pinning units for the duration
fn bind_shader(gpu: &mut GpuState, shader: ShaderHandle) -> RenderResult<()> {
    let GpuState {
        device,
        textures,
        shaders,
        ..
    } = gpu;
    textures.start_texture_sequence();
    let result = shaders
        .stages(shader)
        .iter()
        .try_for_each(|stage| textures.bind_texture(&mut **device, stage.location, stage.texture).map(|_| ()));
    textures.end_texture_sequence();
    result
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn color_bytes(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn transform_verts(matrix: &Mat4, verts: &mut [PolyVert]) {
    for vert in verts {
        let p = matrix * Vec4::new(vert.xyz[0], vert.xyz[1], 0.0, 1.0);
        vert.xyz = [p.x, p.y, 0.0];
    }
}

/// Axis aligned quad of a pic, corners clockwise from the top left
pub fn stretch_quad(pic: &PicRect, color: [u8; 4]) -> [PolyVert; 4] {
    let PicRect { x, y, w, h, s1, t1, s2, t2 } = *pic;
    [
        PolyVert::new(x, y, s1, t1, color),
        PolyVert::new(x + w, y, s2, t1, color),
        PolyVert::new(x + w, y + h, s2, t2, color),
        PolyVert::new(x, y + h, s1, t2, color),
    ]
}

/// Quad of a pic rotated by `angle` degrees around its center
pub fn rotated_quad(pic: &PicRect, angle: f32, color: [u8; 4]) -> [PolyVert; 4] {
    let PicRect { x, y, w, h, s1, t1, s2, t2 } = *pic;
    let (mx, my) = (x + w / 2.0, y + h / 2.0);
    let (sin_a, cos_a) = angle.to_radians().sin_cos();
    let (cw, ch) = (cos_a * w / 2.0, cos_a * h / 2.0);
    let (sw, sh) = (sin_a * w / 2.0, sin_a * h / 2.0);
    [
        PolyVert::new(mx - cw - sh, my + sw - ch, s1, t1, color),
        PolyVert::new(mx + cw - sh, my - sw - ch, s2, t1, color),
        PolyVert::new(mx + cw + sh, my - sw + ch, s2, t2, color),
        PolyVert::new(mx - cw + sh, my + sw + ch, s1, t2, color),
    ]
}

/// Quad of a pic fading from `color` to `gradient`
pub fn gradient_quad(pic: &PicRect, color: [u8; 4], gradient: [u8; 4], kind: GradientType) -> [PolyVert; 4] {
    let mut quad = stretch_quad(pic, color);
    let faded = match kind {
        GradientType::Vertical => [2, 3],
        GradientType::Horizontal => [1, 2],
    };
    for i in faded {
        quad[i].modulate = gradient;
    }
    quad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::commands::{
        ArenaSpan, ClearBufferCommand, PostProcessCommand, ResetMatrixTransformCommand, SetColorCommand,
        SetMatrixTransformCommand, SwapBuffersCommand,
    };
    use crate::render::device::{DeviceOp, HeadlessDevice, HeadlessProbe, TextureDesc, ImageFormat};
    use crate::render::resources::{ShaderStage, TexturePriority};
    use approx::assert_relative_eq;

    fn setup() -> (Arc<GpuContext>, HeadlessProbe) {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let state = GpuState::new(Box::new(device), &RendererConfig::new());
        (Arc::new(GpuContext::new(state)), probe)
    }

    fn quads(ops: &[DeviceOp]) -> Vec<QuadDraw> {
        ops.iter()
            .filter_map(|op| match op {
                DeviceOp::Quad(quad) => Some(*quad),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_rotated_quad_matches_stretch_at_zero() {
        let pic = PicRect::new(10.0, 20.0, 40.0, 30.0, 0.0, 0.0, 1.0, 1.0);
        let rotated = rotated_quad(&pic, 0.0, [255; 4]);
        let straight = stretch_quad(&pic, [255; 4]);
        for (a, b) in rotated.iter().zip(&straight) {
            assert_relative_eq!(a.xyz[0], b.xyz[0], epsilon = 1e-4);
            assert_relative_eq!(a.xyz[1], b.xyz[1], epsilon = 1e-4);
        }

        let quarter = rotated_quad(&pic, 90.0, [255; 4]);
        // center stays put, extents swap
        let cx = quarter.iter().map(|v| v.xyz[0]).sum::<f32>() / 4.0;
        assert_relative_eq!(cx, 30.0, epsilon = 1e-4);
        let width = quarter.iter().map(|v| v.xyz[0]).fold(f32::MIN, f32::max)
            - quarter.iter().map(|v| v.xyz[0]).fold(f32::MAX, f32::min);
        assert_relative_eq!(width, 30.0, epsilon = 1e-3);
    }

    #[test]
    fn test_gradient_quad_colors() {
        let pic = PicRect::new(0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0);
        let vertical = gradient_quad(&pic, [255; 4], [0, 0, 0, 255], GradientType::Vertical);
        assert_eq!(vertical[0].modulate, [255; 4]);
        assert_eq!(vertical[3].modulate, [0, 0, 0, 255]);
        let horizontal = gradient_quad(&pic, [255; 4], [0, 0, 0, 255], GradientType::Horizontal);
        assert_eq!(horizontal[1].modulate, [0, 0, 0, 255]);
        assert_eq!(horizontal[3].modulate, [255; 4]);
    }

    #[test]
    fn test_execute_applies_color_and_matrix() {
        let (context, probe) = setup();
        let mut executor = BackendExecutor::new(Arc::clone(&context), &RendererConfig::new());
        let mut frame = FrameData::new(0, 1 << 16, 64, 64);
        let pic = PicRect::new(0.0, 0.0, 8.0, 8.0, 0.0, 0.0, 1.0, 1.0);

        let translate = Mat4::new_translation(&Vec3::new(100.0, 50.0, 0.0));
        frame.commands.get_render_command(SetColorCommand { color: [1.0, 0.0, 0.0, 1.0] }).unwrap();
        frame.commands.get_render_command(SetMatrixTransformCommand { matrix: translate }).unwrap();
        frame.commands.get_render_command(StretchPicCommand { shader: ShaderHandle::DEFAULT, pic }).unwrap();
        frame.commands.get_render_command(ResetMatrixTransformCommand).unwrap();
        frame.commands.get_render_command(StretchPicCommand { shader: ShaderHandle::DEFAULT, pic }).unwrap();
        frame.commands.finalize();
        probe.take_ops();

        executor.execute(&frame).unwrap();

        let drawn = quads(&probe.ops());
        assert_eq!(drawn.len(), 2);
        assert_eq!(drawn[0].verts[0].xyz, [100.0, 50.0, 0.0]);
        assert_eq!(drawn[0].verts[0].modulate, [255, 0, 0, 255]);
        assert_eq!(drawn[1].verts[0].xyz, [0.0, 0.0, 0.0]);
        assert_eq!(executor.counters().batches, 2);
        assert_eq!(executor.counters().vertexes, 8);
        assert!(executor.matrix().is_none());
    }

    #[test]
    fn test_execute_stops_at_end_of_list() {
        let (context, probe) = setup();
        let mut executor = BackendExecutor::new(context, &RendererConfig::new());
        let mut frame = FrameData::new(0, 1 << 16, 64, 64);
        frame.commands.finalize();
        // records pushed after finalize are refused; a raw swap would be past the end anyway
        assert!(frame.commands.get_render_command(SwapBuffersCommand).unwrap().is_none());

        executor.execute(&frame).unwrap();
        assert!(!probe.ops().contains(&DeviceOp::Swap));
    }

    #[test]
    fn test_shader_textures_become_resident() {
        let (context, probe) = setup();
        let shader = {
            let mut gpu = context.acquire().unwrap();
            let gpu: &mut GpuState = &mut gpu;
            let key = gpu
                .textures
                .create_texture(
                    &mut *gpu.device,
                    &TextureDesc::new_2d("gfx/2d/crosshair", ImageFormat::Rgba8, 32, 32),
                    TexturePriority::High,
                )
                .unwrap();
            gpu.shaders.register("crosshair", vec![ShaderStage { location: 0, texture: key }])
        };
        let mut executor = BackendExecutor::new(Arc::clone(&context), &RendererConfig::new());
        let mut frame = FrameData::new(0, 1 << 16, 64, 64);
        let pic = PicRect::new(0.0, 0.0, 8.0, 8.0, 0.0, 0.0, 1.0, 1.0);
        frame.commands.get_render_command(StretchPicCommand { shader, pic }).unwrap();
        frame.commands.finalize();

        executor.execute(&frame).unwrap();
        assert_eq!(probe.resident_count(), 1);
        assert!(probe
            .ops()
            .iter()
            .any(|op| matches!(op, DeviceOp::UniformHandle { location: 0, .. })));
    }

    #[test]
    fn test_post_process_flips_main_target() {
        let (context, probe) = setup();
        {
            let mut gpu = context.acquire().unwrap();
            let gpu: &mut GpuState = &mut gpu;
            let config = RendererConfig::new().with_fbo_features(true, false, false);
            gpu.fbos
                .init_fbos(
                    &mut *gpu.device,
                    &mut gpu.textures,
                    &config,
                    &crate::core::WindowConfig::new(320, 240),
                )
                .unwrap();
        }
        let mut executor = BackendExecutor::new(Arc::clone(&context), &RendererConfig::new());
        let mut frame = FrameData::new(0, 1 << 16, 64, 64);
        let view = ViewDef::default();
        frame.commands.get_render_command(ClearBufferCommand { view }).unwrap();
        frame
            .commands
            .get_render_command(DrawViewCommand { view, depth_pass: false, entities: ArenaSpan::default() })
            .unwrap();
        frame.commands.get_render_command(PostProcessCommand { view }).unwrap();
        frame.commands.push_swap_buffers();
        frame.commands.finalize();
        probe.take_ops();

        executor.execute(&frame).unwrap();

        assert_eq!(executor.main_index(), 1);
        assert_eq!(executor.counters().views, 1);
        let ops = probe.ops();
        let pass = ops
            .iter()
            .find_map(|op| match op {
                DeviceOp::PostProcess(pass) => Some(*pass),
                _ => None,
            })
            .unwrap();
        assert!(pass.bloom.is_some());
        assert!(pass.source.is_some());
        assert_eq!(ops.iter().filter(|op| **op == DeviceOp::Swap).count(), 1);
        assert_eq!(probe.current_thread(), None);
    }

    #[test]
    fn test_failed_record_skips_to_swap() {
        let (context, probe) = setup();
        probe.set_residency_budget(0);
        let shader = {
            let mut gpu = context.acquire().unwrap();
            let gpu: &mut GpuState = &mut gpu;
            let key = gpu
                .textures
                .create_texture(
                    &mut *gpu.device,
                    &TextureDesc::new_2d("gfx/2d/console", ImageFormat::Rgba8, 32, 32),
                    TexturePriority::Persistent,
                )
                .unwrap();
            gpu.shaders.register("console", vec![ShaderStage { location: 0, texture: key }])
        };
        let mut executor = BackendExecutor::new(Arc::clone(&context), &RendererConfig::new());
        let mut frame = FrameData::new(0, 1 << 16, 64, 64);
        let pic = PicRect::new(0.0, 0.0, 8.0, 8.0, 0.0, 0.0, 1.0, 1.0);
        frame.commands.get_render_command(StretchPicCommand { shader, pic }).unwrap();
        frame.commands.get_render_command(SetColorCommand { color: [0.0, 1.0, 0.0, 1.0] }).unwrap();
        frame.commands.get_render_command(StretchPicCommand { shader: ShaderHandle::DEFAULT, pic }).unwrap();
        frame.commands.push_swap_buffers();
        frame.commands.finalize();
        probe.take_ops();

        let err = executor.execute(&frame).unwrap_err();
        assert!(matches!(err, crate::render::RenderError::NoTextureSpace));
        let ops = probe.ops();
        assert!(quads(&ops).is_empty());
        assert_eq!(ops.iter().filter(|op| **op == DeviceOp::Swap).count(), 1);
        // records after the failure are not applied
        assert_eq!(executor.color(), [1.0; 4]);
        assert_eq!(probe.current_thread(), None);
    }

    #[test]
    fn test_polled_errors_are_drained() {
        let (context, probe) = setup();
        let mut executor = BackendExecutor::new(context, &RendererConfig::new());
        let mut frame = FrameData::new(0, 1 << 16, 64, 64);
        frame.commands.finalize();
        probe.push_error(0x0500);
        probe.push_error(0x0500);

        executor.execute(&frame).unwrap();
        assert_eq!(probe.pending_errors(), 0);
    }
}
