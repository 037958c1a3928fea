//! Front-end to back-end frame handoff
//!
//! Two [`FrameData`] buffers alternate. The front end records into the
//! current one; [`FrameDispatcher::issue`] closes it and either executes it
//! on the calling thread or hands it to the render thread, and
//! [`FrameDispatcher::toggle`] moves recording to the other buffer.
//!
//! ## Render Thread
//!
//! The render thread owns the [`BackendExecutor`]. Frames travel to it
//! boxed through a single slot channel and come back through a second one
//! together with the execution result and the counters gathered while
//! running them. A `None` job tells the thread to exit. The context is
//! acquired by the executor for each list, which asserts that nobody else
//! holds it at the handoff.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::core::RendererConfig;
use crate::render::backend::{BackendCounters, BackendExecutor};
use crate::render::context::GpuContext;
use crate::render::frame::{FrameData, SMP_FRAMES};
use crate::render::{RenderError, RenderResult};

/// Handshake statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmpStats {
    /// Issues that found the previous frame not yet completed
    pub blocked_on_render: u64,
    /// Issues that found the render thread done and waiting
    pub blocked_on_main: u64,
    /// Command lists issued
    pub frames_issued: u64,
}

struct FrameCompletion {
    frame: Box<FrameData>,
    result: RenderResult<()>,
    counters: BackendCounters,
}

struct RenderThread {
    jobs: Sender<Option<Box<FrameData>>>,
    completions: Receiver<FrameCompletion>,
    handle: Option<JoinHandle<()>>,
    in_flight: bool,
}

impl RenderThread {
    fn stop(mut self) {
        if self.jobs.send(None).is_err() {
            log::warn!("Render thread already gone");
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Render thread panicked");
            }
        }
        log::info!("Render thread stopped");
    }
}

enum Mode {
    Inline(BackendExecutor),
    Threaded(RenderThread),
    Stopped,
}

/// Owns both SMP frames and runs them inline or on the render thread
pub struct FrameDispatcher {
    frames: [Option<Box<FrameData>>; SMP_FRAMES],
    smp_frame: usize,
    mode: Mode,
    context: Arc<GpuContext>,
    config: RendererConfig,
    stats: SmpStats,
    counters: BackendCounters,
    last_counters: BackendCounters,
    spawn_failures: u32,
    #[cfg(test)]
    fail_spawns: u32,
}

impl FrameDispatcher {
    /// Create both frames and start the render thread if `config.smp` is set.
    ///
    /// Failing to start the thread falls back to inline execution.
    pub fn new(context: Arc<GpuContext>, config: &RendererConfig) -> RenderResult<Self> {
        let frames = [0, 1].map(|index| {
            Some(Box::new(FrameData::new(
                index,
                config.max_render_commands,
                config.max_poly_verts,
                config.max_poly_indexes,
            )))
        });
        let executor = BackendExecutor::new(Arc::clone(&context), config);
        let mut dispatcher = Self {
            frames,
            smp_frame: 0,
            mode: Mode::Inline(executor),
            context,
            config: config.clone(),
            stats: SmpStats::default(),
            counters: BackendCounters::default(),
            last_counters: BackendCounters::default(),
            spawn_failures: 0,
            #[cfg(test)]
            fail_spawns: 0,
        };
        if config.smp {
            dispatcher.set_smp(true)?;
        }
        Ok(dispatcher)
    }

    /// Index of the frame being recorded
    pub const fn smp_frame(&self) -> usize {
        self.smp_frame
    }

    /// Whether a render thread is running
    pub const fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded(_))
    }

    /// Whether the dispatcher has been shut down
    pub const fn is_stopped(&self) -> bool {
        matches!(self.mode, Mode::Stopped)
    }

    /// Handshake statistics
    pub const fn stats(&self) -> &SmpStats {
        &self.stats
    }

    /// Counters read by the last issue that asked for them
    pub const fn last_counters(&self) -> &BackendCounters {
        &self.last_counters
    }

    /// Skip execution of issued lists
    pub fn set_skip_backend(&mut self, skip: bool) {
        self.config.skip_backend = skip;
    }

    /// Print `R` or `.` per issued frame
    pub fn set_show_smp(&mut self, show: bool) {
        self.config.show_smp = show;
    }

    /// The frame being recorded; `None` only while it is in flight
    pub fn current_frame(&mut self) -> Option<&mut FrameData> {
        self.frames[self.smp_frame].as_deref_mut()
    }

    /// Read access to either frame, `None` while it is in flight
    pub fn frame(&self, index: usize) -> Option<&FrameData> {
        self.frames.get(index).and_then(|frame| frame.as_deref())
    }

    /// Start or stop the render thread. Pending work is synchronized first.
    pub fn set_smp(&mut self, enabled: bool) -> RenderResult<()> {
        if enabled == self.is_threaded() || self.is_stopped() {
            return Ok(());
        }
        self.wait_for_completion()?;
        match std::mem::replace(&mut self.mode, Mode::Stopped) {
            Mode::Inline(executor) if enabled => {
                let (mode, result) = self.spawn_render_thread(executor);
                self.mode = mode;
                result
            }
            Mode::Threaded(thread) if !enabled => {
                thread.stop();
                self.mode = Mode::Inline(self.new_executor());
                self.smp_frame = 0;
                Ok(())
            }
            other => {
                self.mode = other;
                Ok(())
            }
        }
    }

    fn new_executor(&self) -> BackendExecutor {
        BackendExecutor::new(Arc::clone(&self.context), &self.config)
    }

    #[cfg(test)]
    fn injected_spawn_failure(&mut self) -> bool {
        if self.fail_spawns > 0 {
            self.fail_spawns -= 1;
            return true;
        }
        false
    }

    #[cfg(not(test))]
    const fn injected_spawn_failure(&mut self) -> bool {
        false
    }

    fn spawn_render_thread(&mut self, executor: BackendExecutor) -> (Mode, RenderResult<()>) {
        let (job_tx, job_rx) = bounded::<Option<Box<FrameData>>>(1);
        let (done_tx, done_rx) = bounded::<FrameCompletion>(1);

        let spawned = if self.injected_spawn_failure() {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "thread creation refused"))
        } else {
            thread::Builder::new()
                .name("render-backend".to_string())
                .spawn(move || render_loop(executor, &job_rx, &done_tx))
        };

        match spawned {
            Ok(handle) => {
                self.spawn_failures = 0;
                log::info!("Render thread started");
                let thread = RenderThread {
                    jobs: job_tx,
                    completions: done_rx,
                    handle: Some(handle),
                    in_flight: false,
                };
                (Mode::Threaded(thread), Ok(()))
            }
            Err(err) => {
                self.spawn_failures += 1;
                let inline = Mode::Inline(self.new_executor());
                if self.spawn_failures > 1 {
                    return (
                        inline,
                        Err(RenderError::RenderThread(format!(
                            "failed to start render thread {} times in a row: {err}",
                            self.spawn_failures
                        ))),
                    );
                }
                log::warn!("Failed to start render thread ({err}), rendering on the main thread");
                (inline, Ok(()))
            }
        }
    }

    fn wait_for_completion(&mut self) -> RenderResult<()> {
        let Mode::Threaded(thread) = &mut self.mode else {
            return Ok(());
        };
        if !thread.in_flight {
            return Ok(());
        }
        let completion = thread
            .completions
            .recv()
            .map_err(|_| RenderError::RenderThread("render thread exited unexpectedly".to_string()))?;
        thread.in_flight = false;

        self.counters.accumulate(&completion.counters);
        let mut frame = completion.frame;
        frame.reset();
        let index = frame.index();
        self.frames[index] = Some(frame);
        completion.result
    }

    /// Close the current frame and hand it to the back end.
    ///
    /// Waits for the previous frame first if the render thread still has
    /// it. Counters are only read here, while the back end is idle, and
    /// only when `run_performance_counters` is set. Errors raised by the
    /// previous threaded frame surface here.
    pub fn issue(&mut self, run_performance_counters: bool) -> RenderResult<()> {
        if let Mode::Threaded(thread) = &self.mode {
            if thread.in_flight && thread.completions.is_empty() {
                self.stats.blocked_on_render += 1;
                if self.config.show_smp {
                    log::info!("R");
                }
            } else {
                self.stats.blocked_on_main += 1;
                if self.config.show_smp {
                    log::info!(".");
                }
            }
        }
        let waited = self.wait_for_completion();

        if run_performance_counters {
            self.last_counters = std::mem::take(&mut self.counters);
        }

        let index = self.smp_frame;
        let Some(mut frame) = self.frames[index].take() else {
            return waited.and(Err(RenderError::RenderThread(format!("frame {index} is still in flight"))));
        };
        frame.commands.finalize();
        self.stats.frames_issued += 1;

        if self.config.skip_backend {
            frame.reset();
            self.frames[index] = Some(frame);
            return waited;
        }

        match &mut self.mode {
            Mode::Inline(executor) => {
                let result = executor.execute(&frame);
                self.counters.accumulate(&executor.take_counters());
                frame.reset();
                self.frames[index] = Some(frame);
                waited.and(result)
            }
            Mode::Threaded(thread) => {
                if let Err(err) = thread.jobs.send(Some(frame)) {
                    // the job comes back inside the error
                    if let Some(mut frame) = err.into_inner() {
                        frame.reset();
                        self.frames[index] = Some(frame);
                    }
                    return Err(RenderError::RenderThread("render thread is not accepting frames".to_string()));
                }
                thread.in_flight = true;
                waited
            }
            Mode::Stopped => {
                frame.reset();
                self.frames[index] = Some(frame);
                waited
            }
        }
    }

    /// Issue pending commands and wait until the back end is idle
    pub fn sync(&mut self) -> RenderResult<()> {
        let issued = self.issue(false);
        let waited = self.wait_for_completion();
        issued.and(waited)
    }

    /// Switch recording to the other frame
    pub fn toggle(&mut self) {
        self.smp_frame = if self.is_threaded() { self.smp_frame ^ 1 } else { 0 };
        if let Some(frame) = self.frames[self.smp_frame].as_mut() {
            frame.reset();
        }
    }

    /// Finish in-flight work and stop the render thread
    pub fn shutdown(&mut self) -> RenderResult<()> {
        let waited = self.wait_for_completion();
        if let Mode::Threaded(thread) = std::mem::replace(&mut self.mode, Mode::Stopped) {
            thread.stop();
        }
        waited
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        if self.is_threaded() {
            if let Err(err) = self.shutdown() {
                log::warn!("Render thread shutdown: {err}");
            }
        }
    }
}

impl std::fmt::Debug for FrameDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDispatcher")
            .field("smp_frame", &self.smp_frame)
            .field("threaded", &self.is_threaded())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn render_loop(
    mut executor: BackendExecutor,
    jobs: &Receiver<Option<Box<FrameData>>>,
    completions: &Sender<FrameCompletion>,
) {
    log::debug!("Render thread waiting for frames");
    while let Ok(Some(frame)) = jobs.recv() {
        let result = executor.execute(&frame);
        let counters = executor.take_counters();
        if completions.send(FrameCompletion { frame, result, counters }).is_err() {
            break;
        }
    }
    log::debug!("Render thread leaving its loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::commands::{PicRect, ShaderHandle, StretchPicCommand};
    use crate::render::context::GpuState;
    use crate::render::device::{DeviceOp, HeadlessDevice, HeadlessProbe};

    fn setup(config: &RendererConfig) -> (FrameDispatcher, HeadlessProbe) {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let context = Arc::new(GpuContext::new(GpuState::new(Box::new(device), config)));
        (FrameDispatcher::new(context, config).unwrap(), probe)
    }

    fn record_frame(dispatcher: &mut FrameDispatcher) {
        let frame = dispatcher.current_frame().unwrap();
        let pic = PicRect::new(0.0, 0.0, 4.0, 4.0, 0.0, 0.0, 1.0, 1.0);
        frame
            .commands
            .get_render_command(StretchPicCommand { shader: ShaderHandle::DEFAULT, pic })
            .unwrap();
        frame.commands.push_swap_buffers();
    }

    fn swaps(probe: &HeadlessProbe) -> usize {
        probe.ops().iter().filter(|op| **op == DeviceOp::Swap).count()
    }

    #[test]
    fn test_inline_executes_immediately() {
        let config = RendererConfig::new();
        let (mut dispatcher, probe) = setup(&config);

        record_frame(&mut dispatcher);
        dispatcher.issue(true).unwrap();
        assert_eq!(swaps(&probe), 1);
        assert_eq!(dispatcher.current_frame().unwrap().commands.used(), 0);

        dispatcher.toggle();
        assert_eq!(dispatcher.smp_frame(), 0);

        dispatcher.issue(true).unwrap();
        assert_eq!(dispatcher.last_counters().batches, 1);
    }

    #[test]
    fn test_threaded_frames_alternate() {
        let config = RendererConfig::new().with_smp(true);
        let (mut dispatcher, probe) = setup(&config);
        assert!(dispatcher.is_threaded());

        let mut recorded = Vec::new();
        for _ in 0..6 {
            recorded.push(dispatcher.smp_frame());
            record_frame(&mut dispatcher);
            dispatcher.issue(false).unwrap();
            // the issued frame is with the back end, the other one is free
            let issued = dispatcher.smp_frame();
            dispatcher.toggle();
            assert_ne!(dispatcher.smp_frame(), issued);
            assert!(dispatcher.current_frame().is_some());
        }
        dispatcher.sync().unwrap();

        assert_eq!(recorded, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(swaps(&probe), 6);
        let stats = *dispatcher.stats();
        assert_eq!(stats.blocked_on_render + stats.blocked_on_main, stats.frames_issued);
        assert_eq!(stats.frames_issued, 7);
        assert!(dispatcher.frame(0).is_some() && dispatcher.frame(1).is_some());
    }

    #[test]
    fn test_backend_runs_on_render_thread() {
        let config = RendererConfig::new().with_smp(true);
        let (mut dispatcher, probe) = setup(&config);
        record_frame(&mut dispatcher);
        dispatcher.sync().unwrap();

        let main = std::thread::current().id();
        let owners: Vec<_> = probe
            .ops()
            .iter()
            .filter_map(|op| match op {
                DeviceOp::MakeCurrent(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert!(!owners.is_empty());
        assert!(owners.iter().all(|id| *id != main));
        assert_eq!(probe.current_thread(), None);
    }

    #[test]
    fn test_issue_counts_unfinished_frame_as_blocked_on_render() {
        let config = RendererConfig::new().with_smp(true);
        let (mut dispatcher, probe) = setup(&config);
        let context = Arc::clone(&dispatcher.context);
        let (held_tx, held_rx) = bounded::<()>(0);
        let holder = std::thread::spawn(move || {
            let _gpu = context.acquire().unwrap();
            held_tx.send(()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(200));
        });
        held_rx.recv().unwrap();

        // the back end cannot get the context, so the first frame stays unfinished
        record_frame(&mut dispatcher);
        dispatcher.issue(false).unwrap();
        dispatcher.toggle();
        record_frame(&mut dispatcher);
        dispatcher.issue(false).unwrap();

        // the first issue had nothing outstanding
        let stats = *dispatcher.stats();
        assert_eq!(stats.blocked_on_main, 1);
        assert_eq!(stats.blocked_on_render, 1);

        holder.join().unwrap();
        dispatcher.sync().unwrap();
        assert_eq!(swaps(&probe), 2);
        let stats = *dispatcher.stats();
        assert_eq!(stats.blocked_on_render + stats.blocked_on_main, stats.frames_issued);
    }

    #[test]
    fn test_skip_backend_discards_lists() {
        let config = RendererConfig::new().with_skip_backend(true);
        let (mut dispatcher, probe) = setup(&config);
        record_frame(&mut dispatcher);
        dispatcher.issue(false).unwrap();

        assert!(probe.ops().is_empty());
        assert_eq!(dispatcher.current_frame().unwrap().commands.used(), 0);
    }

    #[test]
    fn test_spawn_failure_falls_back_then_errors() {
        let config = RendererConfig::new();
        let (mut dispatcher, probe) = setup(&config);
        dispatcher.fail_spawns = 2;

        dispatcher.set_smp(true).unwrap();
        assert!(!dispatcher.is_threaded());
        record_frame(&mut dispatcher);
        dispatcher.issue(false).unwrap();
        assert_eq!(swaps(&probe), 1);

        let err = dispatcher.set_smp(true).unwrap_err();
        assert!(matches!(err, RenderError::RenderThread(_)));
        assert_eq!(err.severity(), crate::render::Severity::FatalForProcess);
        assert!(!dispatcher.is_threaded());

        dispatcher.set_smp(true).unwrap();
        assert!(dispatcher.is_threaded());
    }

    #[test]
    fn test_shutdown_stops_thread_and_drops_later_frames() {
        let config = RendererConfig::new().with_smp(true);
        let (mut dispatcher, probe) = setup(&config);
        record_frame(&mut dispatcher);
        dispatcher.issue(false).unwrap();
        dispatcher.shutdown().unwrap();
        assert!(dispatcher.is_stopped());
        assert_eq!(swaps(&probe), 1);

        dispatcher.toggle();
        record_frame(&mut dispatcher);
        dispatcher.issue(false).unwrap();
        assert_eq!(swaps(&probe), 1);
    }

    #[test]
    fn test_disable_smp_returns_to_inline() {
        let config = RendererConfig::new().with_smp(true);
        let (mut dispatcher, probe) = setup(&config);
        record_frame(&mut dispatcher);
        dispatcher.issue(false).unwrap();
        dispatcher.toggle();

        dispatcher.set_smp(false).unwrap();
        assert!(!dispatcher.is_threaded());
        assert_eq!(dispatcher.smp_frame(), 0);
        assert_eq!(swaps(&probe), 1);
    }
}
