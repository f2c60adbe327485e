use std::path::PathBuf;

use anyhow::{Context, Result};
use raw_window_handle::HasWindowHandle;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalPosition, LogicalSize, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::core::{App, AppControl, FrameCtx, WindowCtx};
use crate::device::{create_backend, BackendKind, GpuError, GpuInit, GraphicsContext};
use crate::input::{translate_window_event, InputFrame, InputState};
use crate::logging::CORE_TARGET;
use crate::time::{write_elapsed, FrameClock, LifetimeTimer};

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub position: LogicalPosition<f64>,
    /// Initial client area. Headless runs use it as the surface size in pixels.
    pub initial_size: LogicalSize<f64>,
    /// When set, the application lifetime is written here on shutdown.
    pub lifetime_log: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "Seacrest Engine Sandbox".to_string(),
            position: LogicalPosition::new(100.0, 100.0),
            initial_size: LogicalSize::new(1280.0, 720.0),
            lifetime_log: None,
        }
    }
}

/// Runtime context passed to the application.
///
/// Commands are buffered and applied after the current frame returns.
#[derive(Debug, Default)]
pub struct RuntimeCtx {
    commands: Vec<Command>,
    fatal: Option<GpuError>,
}

impl RuntimeCtx {
    pub fn exit(&mut self) {
        self.commands.push(Command::Exit);
    }

    /// Ignored when running headless.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.commands.push(Command::SetTitle(title.into()));
    }

    /// Ends the run with `error` once the frame returns. The first error wins.
    pub(crate) fn fail(&mut self, error: GpuError) {
        self.fatal.get_or_insert(error);
        self.exit();
    }
}

#[derive(Debug)]
enum Command {
    SetTitle(String),
    Exit,
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    /// Opens the window and runs `app` until it exits or the window closes.
    pub fn run<A>(config: RuntimeConfig, gpu_init: GpuInit, app: A) -> Result<()>
    where
        A: App + 'static,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let timer = LifetimeTimer::start()?;
        let mut state = WindowedState {
            config,
            gpu_init,
            app,
            timer,
            session: None,
            window: None,
            exit_requested: false,
            error: None,
        };

        let pumped = event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error");

        let shutdown = state.shutdown();
        pumped?;
        shutdown
    }

    /// Runs `app` on a windowless backend for `frames` frames, or until it
    /// exits. Returns the number of frames driven.
    ///
    /// `gpu_init.backend` must be [`BackendKind::Headless`].
    pub fn run_headless<A>(config: RuntimeConfig, gpu_init: GpuInit, frames: u64, mut app: A) -> Result<u64>
    where
        A: App,
    {
        anyhow::ensure!(
            matches!(gpu_init.backend, BackendKind::Headless(_)),
            "run_headless needs the headless backend, got {:?}",
            gpu_init.backend
        );

        let timer = LifetimeTimer::start()?;
        let width = config.initial_size.width.round() as u32;
        let height = config.initial_size.height.round() as u32;
        let mut session = Session::start(&gpu_init, None, width, height, &mut app)?;

        let mut driven = 0;
        let mut result = Ok(());
        while driven < frames {
            driven += 1;
            match session.frame(&mut app, None, &timer) {
                Ok(commands) => {
                    if commands.iter().any(|c| matches!(c, Command::Exit)) {
                        break;
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let shutdown = session.shutdown(&mut app, timer, config.lifetime_log.as_deref());
        result?;
        shutdown?;
        log::info!(target: CORE_TARGET, "headless run finished after {driven} frames");
        Ok(driven)
    }
}

/// Per-window engine state.
struct Session {
    gpu: GraphicsContext,
    input: InputState,
    input_frame: InputFrame,
    clock: FrameClock,
}

impl Session {
    fn start<A: App>(
        gpu_init: &GpuInit,
        window: Option<&Window>,
        width: u32,
        height: u32,
        app: &mut A,
    ) -> Result<Self> {
        let handle = window
            .map(|w| w.window_handle().map(|h| h.as_raw()))
            .transpose()
            .context("window has no native handle")?;
        let backend = create_backend(gpu_init, handle).context("failed to create GPU backend")?;
        let mut gpu = GraphicsContext::new(backend, gpu_init.clone(), width, height)
            .context("failed to create graphics context")?;

        app.on_start(&mut gpu).context("application start failed")?;

        Ok(Self {
            gpu,
            input: InputState::default(),
            input_frame: InputFrame::default(),
            clock: FrameClock::new(),
        })
    }

    /// Drives one frame and returns the commands the app issued.
    ///
    /// An `Exit` from the app is returned as a command; a GPU error raised
    /// through the frame context is returned as `Err`.
    fn frame<A: App>(&mut self, app: &mut A, window: Option<&Window>, timer: &LifetimeTimer) -> Result<Vec<Command>> {
        let mut runtime = RuntimeCtx::default();
        let control = {
            let mut ctx = FrameCtx {
                window: window.map(|window| WindowCtx { window }),
                gpu: &mut self.gpu,
                input: &self.input,
                input_frame: &self.input_frame,
                time: self.clock.tick(),
                lifetime: timer.elapsed(),
                runtime: &mut runtime,
                stats: None,
            };
            app.on_frame(&mut ctx)
        };
        self.input_frame.clear();

        if let Some(error) = runtime.fatal.take() {
            return Err(anyhow::Error::new(error).context("fatal GPU error"));
        }
        if control == AppControl::Exit {
            runtime.exit();
        }

        self.gpu.poll_readbacks().context("failed to write screenshot")?;

        Ok(runtime.commands)
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        let was_hidden = self.gpu.size().0 == 0 || self.gpu.size().1 == 0;
        self.gpu
            .resize(size.width, size.height)
            .context("failed to resize swapchain")?;
        if was_hidden {
            self.clock.reset();
        }
        Ok(())
    }

    /// Idles the GPU, writes outstanding screenshots, lets the app release
    /// its objects and stops the lifetime timer.
    ///
    /// Every step runs even when an earlier one fails; the first error is
    /// returned.
    fn shutdown<A: App>(
        mut self,
        app: &mut A,
        mut timer: LifetimeTimer,
        lifetime_log: Option<&std::path::Path>,
    ) -> Result<()> {
        let mut first = match self.gpu.flush() {
            Ok(()) => self
                .gpu
                .poll_readbacks()
                .map_err(|e| anyhow::Error::new(e).context("failed to write screenshot"))
                .err(),
            Err(e) => Some(anyhow::Error::new(e).context("failed to idle the GPU")),
        };
        if let Some(e) = &first {
            log::error!(target: CORE_TARGET, "{e:#}");
        }

        app.on_shutdown(&mut self.gpu);
        drop(self);

        match timer.stop() {
            Ok(elapsed) => {
                log::info!(target: CORE_TARGET, "application ran for {elapsed:.2}s");
                if let Some(path) = lifetime_log {
                    if let Err(e) = write_elapsed(path, elapsed) {
                        first.get_or_insert(e);
                    }
                }
            }
            Err(e) => {
                first.get_or_insert(e);
            }
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct WindowedState<A>
where
    A: App + 'static,
{
    config: RuntimeConfig,
    gpu_init: GpuInit,
    app: A,
    timer: LifetimeTimer,

    // Declared before `window`: the swapchain must go before its window.
    session: Option<Session>,
    window: Option<Window>,

    exit_requested: bool,
    error: Option<anyhow::Error>,
}

impl<A> WindowedState<A>
where
    A: App + 'static,
{
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!(target: CORE_TARGET, "{error:#}");
        self.error.get_or_insert(error);
        self.exit_requested = true;
        event_loop.exit();
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_position(self.config.position)
            .with_inner_size(self.config.initial_size);

        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;
        let size = window.inner_size();
        let session = Session::start(&self.gpu_init, Some(&window), size.width, size.height, &mut self.app)?;

        window.request_redraw();
        self.session = Some(session);
        self.window = Some(window);
        Ok(())
    }

    fn apply_commands(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::SetTitle(title) => {
                    if let Some(window) = &self.window {
                        window.set_title(&title);
                    }
                }
                Command::Exit => self.exit_requested = true,
            }
        }
    }

    fn shutdown(mut self) -> Result<()> {
        let stopped = match self.session.take() {
            Some(session) => session.shutdown(&mut self.app, self.timer, self.config.lifetime_log.as_deref()),
            None => Ok(()),
        };
        self.window = None;

        match self.error {
            Some(error) => Err(error),
            None => stopped,
        }
    }
}

impl<A> ApplicationHandler for WindowedState<A>
where
    A: App + 'static,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exit_requested {
            return;
        }

        if let Err(e) = self.create_window(event_loop) {
            self.fail(event_loop, e.context("failed to start"));
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);

        // Continuous redraw.
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if self.exit_requested {
            event_loop.exit();
            return;
        }

        let (Some(session), Some(window)) = (self.session.as_mut(), self.window.as_ref()) else {
            return;
        };

        if let Some(ev) = translate_window_event(window.scale_factor(), &event) {
            session.input.apply_event(&mut session.input_frame, &ev);
        }

        if self.app.on_window_event(&event) == AppControl::Exit {
            self.exit_requested = true;
            event_loop.exit();
            return;
        }

        let outcome = match &event {
            WindowEvent::CloseRequested => {
                self.exit_requested = true;
                Ok(())
            }

            WindowEvent::Resized(size) => {
                window.request_redraw();
                session.resize(*size)
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                window.request_redraw();
                session.resize(window.inner_size())
            }

            WindowEvent::RedrawRequested => session
                .frame(&mut self.app, Some(window), &self.timer)
                .map(|commands| self.apply_commands(commands)),

            _ => Ok(()),
        };

        if let Err(e) = outcome {
            self.fail(event_loop, e);
            return;
        }

        if self.exit_requested {
            event_loop.exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClearColor, HeadlessConfig};
    use crate::input::Key;

    struct CountingApp {
        started: bool,
        frames: u64,
        exit_after: Option<u64>,
        shut_down: bool,
        screenshot: Option<PathBuf>,
        /// Frame whose recording fails with a device error.
        fail_on: Option<u64>,
    }

    impl CountingApp {
        fn new() -> Self {
            Self {
                started: false,
                frames: 0,
                exit_after: None,
                shut_down: false,
                screenshot: None,
                fail_on: None,
            }
        }
    }

    impl App for &mut CountingApp {
        fn on_start(&mut self, gpu: &mut GraphicsContext) -> Result<()> {
            assert_eq!(gpu.backend_name(), "headless");
            self.started = true;
            Ok(())
        }

        fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
            assert!(ctx.window.is_none());
            assert!(!ctx.input.key_down(Key::Escape));
            assert_eq!(ctx.time.frame_index, self.frames);

            if let Some(path) = self.screenshot.take() {
                ctx.gpu.request_screenshot(path);
            }
            if self.fail_on == Some(self.frames) {
                return ctx.render(ClearColor::rgb_hex(0x161616), |_, _| {
                    Err(GpuError::DeviceRemoved("lost during recording".into()))
                });
            }
            let control = ctx.render(ClearColor::rgb_hex(0x161616), |_, _| Ok(()));
            assert_eq!(ctx.stats.map(|s| s.frame_number), Some(self.frames + 1));

            self.frames += 1;
            if self.exit_after == Some(self.frames) {
                return AppControl::Exit;
            }
            control
        }

        fn on_shutdown(&mut self, gpu: &mut GraphicsContext) {
            assert_eq!(gpu.frame_number(), self.frames);
            self.shut_down = true;
        }
    }

    fn small() -> RuntimeConfig {
        RuntimeConfig {
            initial_size: LogicalSize::new(64.0, 32.0),
            ..RuntimeConfig::default()
        }
    }

    fn headless() -> GpuInit {
        GpuInit::headless(HeadlessConfig::default())
    }

    #[test]
    fn default_window_matches_sandbox_layout() {
        let config = RuntimeConfig::default();
        assert_eq!(config.title, "Seacrest Engine Sandbox");
        assert_eq!(config.position, LogicalPosition::new(100.0, 100.0));
        assert_eq!(config.initial_size, LogicalSize::new(1280.0, 720.0));
    }

    #[test]
    fn headless_run_drives_every_callback() {
        let mut app = CountingApp::new();
        let driven = Runtime::run_headless(small(), headless(), 5, &mut app).unwrap();
        assert_eq!(driven, 5);
        assert!(app.started);
        assert_eq!(app.frames, 5);
        assert!(app.shut_down);
    }

    #[test]
    fn app_exit_stops_the_loop() {
        let mut app = CountingApp::new();
        app.exit_after = Some(2);
        let driven = Runtime::run_headless(small(), headless(), 10, &mut app).unwrap();
        assert_eq!(driven, 2);
        assert!(app.shut_down);
    }

    #[test]
    fn last_frame_screenshot_is_written_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.png");
        let mut app = CountingApp::new();
        app.screenshot = Some(path.clone());

        Runtime::run_headless(small(), headless(), 1, &mut app).unwrap();

        let image = image::open(&path).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (64, 32));
        assert_eq!(image.get_pixel(0, 0).0, [0x16, 0x16, 0x16, 0xff]);
    }

    #[test]
    fn lifetime_is_logged_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("lifetime.txt");
        let config = RuntimeConfig {
            lifetime_log: Some(log.clone()),
            ..small()
        };
        let mut app = CountingApp::new();
        Runtime::run_headless(config, headless(), 1, &mut app).unwrap();
        assert!(std::fs::read_to_string(&log).unwrap().starts_with("Elapsed Time: "));
    }

    #[test]
    fn gpu_error_ends_the_run_with_that_error() {
        let mut app = CountingApp::new();
        app.fail_on = Some(1);

        let err = Runtime::run_headless(small(), headless(), 5, &mut app).unwrap_err();

        assert!(matches!(err.downcast_ref::<GpuError>(), Some(GpuError::DeviceRemoved(_))));
        assert_eq!(app.frames, 1);
        assert!(app.shut_down);
    }

    #[test]
    fn failed_screenshot_still_runs_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("file");
        std::fs::write(&not_a_dir, b"x").unwrap();
        let log = dir.path().join("lifetime.txt");
        let config = RuntimeConfig {
            lifetime_log: Some(log.clone()),
            ..small()
        };
        let gpu_init = GpuInit::headless(HeadlessConfig {
            queue_latency: 4,
            ..HeadlessConfig::default()
        });
        let mut app = CountingApp::new();
        app.screenshot = Some(not_a_dir.join("shot.png"));

        let err = Runtime::run_headless(config, gpu_init, 1, &mut app).unwrap_err();

        assert!(matches!(err.downcast_ref::<GpuError>(), Some(GpuError::Screenshot(_))));
        assert!(app.shut_down);
        assert!(std::fs::read_to_string(&log).unwrap().starts_with("Elapsed Time: "));
    }

    #[test]
    fn native_backend_is_rejected_headless() {
        let mut app = CountingApp::new();
        assert!(Runtime::run_headless(small(), GpuInit::default(), 1, &mut app).is_err());
        assert!(!app.started);
    }
}
