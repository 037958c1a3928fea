//! GPU state shared by the front end and the back end
//!
//! The device and the resource managers that talk to it live behind one
//! mutex. Locking it through [`GpuContext::acquire`] also makes the device
//! context current on the calling thread and releases it when the guard
//! drops, so "who may issue GPU calls" and "who holds the lock" are the
//! same question.

use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

use crate::core::RendererConfig;
use crate::foundation::logging::SuppressedLog;
use crate::render::device::GraphicsDevice;
use crate::render::resources::{FboRegistry, ShaderTable, TextureManager};
use crate::render::RenderResult;

/// Device plus everything that owns GPU objects on it
pub struct GpuState {
    /// The device
    pub device: Box<dyn GraphicsDevice>,
    /// Texture residency
    pub textures: TextureManager,
    /// Framebuffer objects and render target images
    pub fbos: FboRegistry,
    /// Shader to texture bindings
    pub shaders: ShaderTable,
    /// Repeat-suppressing GPU error reporter
    pub error_log: SuppressedLog,
}

impl GpuState {
    /// Build the resource managers for a device
    pub fn new(device: Box<dyn GraphicsDevice>, config: &RendererConfig) -> Self {
        let caps = device.capabilities().clone();
        Self {
            textures: TextureManager::new(&caps, config.bindless_textures, config.pic_mip),
            fbos: FboRegistry::new(caps.max_renderbuffer_size, caps.max_color_attachments),
            shaders: ShaderTable::new(),
            error_log: SuppressedLog::new(config.gl_error_repeat_limit),
            device,
        }
    }

    /// Drain polled GPU errors into the suppressing log; returns how many were seen
    pub fn check_errors(&mut self, context: &str) -> usize {
        let mut count = 0;
        while let Some(code) = self.device.poll_error() {
            self.error_log.report(code, context);
            count += 1;
        }
        count
    }
}

impl std::fmt::Debug for GpuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuState")
            .field("textures", &self.textures.len())
            .field("fbos", &self.fbos.len())
            .field("shaders", &self.shaders.len())
            .finish_non_exhaustive()
    }
}

/// Shared handle to the GPU state
#[derive(Debug)]
pub struct GpuContext {
    state: Mutex<GpuState>,
}

impl GpuContext {
    /// Wrap the GPU state
    pub fn new(state: GpuState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Lock the state and make the context current on this thread.
    ///
    /// Fails if the device reports the context is still owned elsewhere.
    pub fn acquire(&self) -> RenderResult<ContextGuard<'_>> {
        let mut guard = self.state.lock();
        guard.device.make_current()?;
        Ok(ContextGuard { guard })
    }
}

/// Exclusive access to the GPU state with the context current
pub struct ContextGuard<'a> {
    guard: MutexGuard<'a, GpuState>,
}

impl Deref for ContextGuard<'_> {
    type Target = GpuState;

    fn deref(&self) -> &GpuState {
        &self.guard
    }
}

impl DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut GpuState {
        &mut self.guard
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.guard.device.release_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::{DeviceOp, HeadlessDevice};
    use std::sync::Arc;

    #[test]
    fn test_acquire_makes_and_releases_current() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let context = GpuContext::new(GpuState::new(Box::new(device), &RendererConfig::new()));

        {
            let _gpu = context.acquire().unwrap();
            assert_eq!(probe.current_thread(), Some(std::thread::current().id()));
        }
        assert_eq!(probe.current_thread(), None);
        let ops = probe.take_ops();
        assert!(matches!(ops[0], DeviceOp::MakeCurrent(_)));
        assert!(matches!(ops[1], DeviceOp::ReleaseCurrent(_)));
    }

    #[test]
    fn test_context_moves_between_threads() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let context = Arc::new(GpuContext::new(GpuState::new(Box::new(device), &RendererConfig::new())));

        let remote = Arc::clone(&context);
        let owner = std::thread::spawn(move || {
            let _gpu = remote.acquire().unwrap();
            std::thread::current().id()
        })
        .join()
        .unwrap();

        assert!(context.acquire().is_ok());
        let ops = probe.ops();
        assert!(ops.contains(&DeviceOp::MakeCurrent(owner)));
        assert!(ops.contains(&DeviceOp::ReleaseCurrent(owner)));
    }

    #[test]
    fn test_check_errors_drains_queue() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let mut state = GpuState::new(Box::new(device), &RendererConfig::new());
        probe.push_error(0x0502);
        probe.push_error(0x0502);

        assert_eq!(state.check_errors("test"), 2);
        assert_eq!(probe.pending_errors(), 0);
        assert_eq!(state.error_log.occurrences(0x0502), 2);
    }
}
