//! Pipeline tests
//!
//! Drive a full [`Renderer`] over the headless device and check what
//! reaches the GPU seam.

mod resource_lifecycle;
mod smp_pipeline;

use crate::core::{RendererConfig, WindowConfig};
use crate::render::device::{DeviceOp, HeadlessDevice, HeadlessProbe};
use crate::render::Renderer;

fn headless_renderer(config: RendererConfig) -> (Renderer, HeadlessProbe) {
    let device = HeadlessDevice::default();
    let probe = device.probe();
    let renderer = Renderer::new(Box::new(device), config, WindowConfig::new(640, 480)).unwrap();
    (renderer, probe)
}

fn count_ops(probe: &HeadlessProbe, matches: impl Fn(&DeviceOp) -> bool) -> usize {
    probe.ops().iter().filter(|op| matches(op)).count()
}
