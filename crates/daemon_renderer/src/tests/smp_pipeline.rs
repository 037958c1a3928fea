//! Frame handoff between the front end and the back end

use super::{count_ops, headless_renderer};
use crate::core::RendererConfig;
use crate::render::commands::{PicRect, ShaderHandle, ViewDef};
use crate::render::device::DeviceOp;

fn pic() -> PicRect {
    PicRect::new(0.0, 0.0, 32.0, 32.0, 0.0, 0.0, 1.0, 1.0)
}

#[test]
fn test_threaded_frames_alternate_and_execute_off_main_thread() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new().with_smp(true));
    assert!(renderer.dispatcher().is_threaded());
    probe.take_ops();

    let mut recorded_into = Vec::new();
    for _ in 0..4 {
        renderer.begin_frame().unwrap();
        recorded_into.push(renderer.dispatcher().smp_frame());
        renderer.stretch_pic(pic(), ShaderHandle::DEFAULT).unwrap();
        renderer.end_frame().unwrap();
    }
    renderer.sync_render_thread().unwrap();

    assert_eq!(recorded_into, vec![0, 1, 0, 1]);
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap)), 4);
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Quad(_))), 4);

    let main = std::thread::current().id();
    assert!(probe
        .ops()
        .iter()
        .any(|op| matches!(op, DeviceOp::MakeCurrent(thread) if *thread != main)));
    assert_eq!(renderer.smp_stats().frames_issued, 5);
}

#[test]
fn test_inline_frames_stay_on_frame_zero() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new());
    probe.take_ops();

    for _ in 0..3 {
        renderer.begin_frame().unwrap();
        assert_eq!(renderer.dispatcher().smp_frame(), 0);
        renderer.render_scene(&ViewDef::default()).unwrap();
        renderer.end_frame().unwrap();
    }

    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap)), 3);
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::PostProcess(_))), 3);
    let main = std::thread::current().id();
    assert!(probe
        .ops()
        .iter()
        .all(|op| !matches!(op, DeviceOp::MakeCurrent(thread) if *thread != main)));
}

#[test]
fn test_full_command_buffer_drops_commands_but_still_swaps() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new().with_max_render_commands(1024));
    probe.take_ops();

    renderer.begin_frame().unwrap();
    for _ in 0..200 {
        renderer.stretch_pic(pic(), ShaderHandle::DEFAULT).unwrap();
    }
    let frame = renderer.current_frame().unwrap();
    let recorded = frame.commands.len();
    assert!(recorded < 200);
    assert!(frame.commands.used() <= frame.commands.capacity());
    renderer.end_frame().unwrap();

    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Quad(_))), recorded - 1);
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap)), 1);
}

#[test]
fn test_toggling_smp_mid_session_keeps_rendering() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new());
    probe.take_ops();

    renderer.begin_frame().unwrap();
    renderer.end_frame().unwrap();
    renderer.set_smp(true).unwrap();
    assert!(renderer.dispatcher().is_threaded());

    renderer.begin_frame().unwrap();
    renderer.end_frame().unwrap();
    renderer.set_smp(false).unwrap();
    assert!(!renderer.dispatcher().is_threaded());

    renderer.begin_frame().unwrap();
    renderer.end_frame().unwrap();
    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap)), 3);
}

#[test]
fn test_skip_backend_records_without_drawing() {
    let (mut renderer, probe) = headless_renderer(RendererConfig::new().with_skip_backend(true));
    probe.take_ops();

    renderer.begin_frame().unwrap();
    renderer.stretch_pic(pic(), ShaderHandle::DEFAULT).unwrap();
    renderer.end_frame().unwrap();

    assert_eq!(count_ops(&probe, |op| matches!(op, DeviceOp::Swap | DeviceOp::Quad(_))), 0);
    assert_eq!(renderer.smp_stats().frames_issued, 1);
}
