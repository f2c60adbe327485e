use winit::window::Window;

use crate::device::{ClearColor, DescriptorHeap, FrameEncoder, FrameStats, GpuResult, GraphicsContext};
use crate::input::{InputFrame, InputState};
use crate::logging::CORE_TARGET;
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

use super::app::AppControl;

/// Handle to the window being rendered.
pub struct WindowCtx<'a> {
    pub window: &'a Window,
}

impl<'a> WindowCtx<'a> {
    /// Window size in logical pixels.
    pub fn logical_size(&self) -> (f32, f32) {
        let logical: winit::dpi::LogicalSize<f64> = self
            .window
            .inner_size()
            .to_logical(self.window.scale_factor());
        (logical.width as f32, logical.height as f32)
    }

    pub fn scale_factor(&self) -> f64 {
        self.window.scale_factor()
    }
}

/// Per-frame context passed to [`App::on_frame`](super::App::on_frame).
pub struct FrameCtx<'a> {
    /// `None` when running headless.
    pub window: Option<WindowCtx<'a>>,
    pub gpu: &'a mut GraphicsContext,
    pub input: &'a InputState,
    pub input_frame: &'a InputFrame,
    pub time: FrameTime,
    /// Seconds since startup, as published by the lifetime timer.
    pub lifetime: f64,
    pub runtime: &'a mut RuntimeCtx,
    /// Stats of the last successful `render` call this frame.
    pub stats: Option<FrameStats>,
}

impl<'a> FrameCtx<'a> {
    /// Renders and presents one frame through
    /// [`GraphicsContext::render_frame`].
    ///
    /// GPU errors are fatal: the error is logged, handed to the runtime
    /// (which ends the run with it) and `Exit` returned.
    pub fn render<F>(&mut self, clear: ClearColor, record: F) -> AppControl
    where
        F: FnOnce(&mut FrameEncoder<'_>, &DescriptorHeap) -> GpuResult<()>,
    {
        if let Some(window) = &self.window {
            window.window.pre_present_notify();
        }

        match self.gpu.render_frame(clear, record) {
            Ok(stats) => {
                self.stats = stats;
                AppControl::Continue
            }
            Err(e) => {
                log::error!(target: CORE_TARGET, "frame {} failed: {e}", self.gpu.frame_number() + 1);
                self.runtime.fail(e);
                AppControl::Exit
            }
        }
    }
}
