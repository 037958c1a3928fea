//! Texture residency and render target lifecycle across frames

use super::{count_ops, headless_renderer};
use crate::core::{RendererConfig, WindowConfig};
use crate::render::commands::{PicRect, ShaderHandle};
use crate::render::device::{DeviceOp, ImageFormat, TextureDesc};
use crate::render::resources::{ShaderStage, TextureKey, TexturePriority};
use crate::render::{RenderError, Renderer};

fn pic() -> PicRect {
    PicRect::new(0.0, 0.0, 16.0, 16.0, 0.0, 0.0, 1.0, 1.0)
}

fn textured_shader(renderer: &mut Renderer, name: &str, priority: TexturePriority) -> (TextureKey, ShaderHandle) {
    let texture = renderer
        .create_texture(&TextureDesc::new_2d(name, ImageFormat::Rgba8, 64, 64), priority)
        .unwrap();
    let shader = renderer
        .register_shader(name, vec![ShaderStage { location: 0, texture }])
        .unwrap();
    (texture, shader)
}

fn is_resident(renderer: &Renderer, key: TextureKey) -> bool {
    let gpu = renderer.context().acquire().unwrap();
    gpu.textures.texture(key).is_some_and(|texture| texture.is_resident())
}

fn draw_frame(renderer: &mut Renderer, shaders: &[ShaderHandle]) -> Result<(), RenderError> {
    renderer.begin_frame()?;
    for &shader in shaders {
        renderer.stretch_pic(pic(), shader)?;
    }
    renderer.end_frame().map(|_| ())
}

#[test]
fn test_residency_pressure_evicts_lowest_priority() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new());
    probe.set_residency_budget(2);
    let (font, font_shader) = textured_shader(&mut renderer, "gfx/2d/bigchars", TexturePriority::Persistent);
    let (decal, decal_shader) = textured_shader(&mut renderer, "gfx/decals/blood", TexturePriority::Low);
    let (wall, wall_shader) = textured_shader(&mut renderer, "textures/base/wall", TexturePriority::Medium);

    draw_frame(&mut renderer, &[font_shader, decal_shader]).unwrap();
    assert!(is_resident(&renderer, font));
    assert!(is_resident(&renderer, decal));

    draw_frame(&mut renderer, &[wall_shader]).unwrap();
    assert!(is_resident(&renderer, font));
    assert!(!is_resident(&renderer, decal));
    assert!(is_resident(&renderer, wall));
    assert_eq!(probe.resident_count(), 2);
}

#[test]
fn test_no_evictable_texture_fails_the_frame_but_presents_it() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new());
    probe.set_residency_budget(1);
    let (_, first) = textured_shader(&mut renderer, "gfx/2d/bigchars", TexturePriority::Persistent);
    let (_, second) = textured_shader(&mut renderer, "gfx/2d/console", TexturePriority::Persistent);
    probe.take_ops();

    let result = draw_frame(&mut renderer, &[first, second, first]);
    assert!(matches!(result, Err(RenderError::NoTextureSpace)));
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Quad(_))), 1);
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap)), 1);

    draw_frame(&mut renderer, &[first]).unwrap();
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap)), 2);
}

#[test]
fn test_destroy_texture_waits_for_recorded_draws() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new().with_smp(true));
    let (texture, shader) = textured_shader(&mut renderer, "gfx/2d/crosshair", TexturePriority::High);
    let textures = probe.live_textures();

    renderer.begin_frame().unwrap();
    probe.take_ops();
    renderer.stretch_pic(pic(), shader).unwrap();
    renderer.destroy_texture(texture).unwrap();

    // the render thread drew with the texture before the main thread took the context to delete it
    let ops = probe.take_ops();
    let main = std::thread::current().id();
    let drawn = ops.iter().position(|op| matches!(op, DeviceOp::Quad(_))).unwrap();
    let deleted = ops.iter().rposition(|op| *op == DeviceOp::MakeCurrent(main)).unwrap();
    assert!(drawn < deleted);
    assert!(ops[..drawn]
        .iter()
        .any(|op| matches!(op, DeviceOp::UniformHandle { location: 0, .. })));
    assert_eq!(probe.live_textures(), textures - 1);

    renderer.end_frame().unwrap();
    draw_frame(&mut renderer, &[shader]).unwrap();
    renderer.sync_render_thread().unwrap();
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap)), 2);
}

#[test]
fn test_restart_video_rebuilds_targets_at_new_size() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new().with_smp(true));
    let before = renderer.list_fbos().unwrap();
    let framebuffers = probe.live_framebuffers();
    let textures = probe.live_textures();
    assert!(framebuffers > 0);

    draw_frame(&mut renderer, &[]).unwrap();
    renderer.restart_video(WindowConfig::new(1280, 720)).unwrap();
    renderer.restart_video(WindowConfig::new(1280, 720)).unwrap();

    assert_eq!(renderer.list_fbos().unwrap().len(), before.len());
    assert_eq!(probe.live_framebuffers(), framebuffers);
    assert_eq!(probe.live_textures(), textures);
    assert_eq!(renderer.window().width, 1280);

    let gpu = renderer.context().acquire().unwrap();
    let main = gpu.fbos.targets().main[0].unwrap();
    assert_eq!(gpu.fbos.fbo(main).unwrap().dimensions(), (1280, 720));
    drop(gpu);

    draw_frame(&mut renderer, &[]).unwrap();
}

#[test]
fn test_destroyed_texture_leaves_shaders_drawable() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new());
    let (texture, shader) = textured_shader(&mut renderer, "gfx/2d/crosshair", TexturePriority::High);
    let textures = probe.live_textures();

    renderer.destroy_texture(texture).unwrap();
    assert_eq!(probe.live_textures(), textures - 1);
    assert!(matches!(renderer.destroy_texture(texture), Err(RenderError::UnknownTexture)));

    draw_frame(&mut renderer, &[shader]).unwrap();
}
