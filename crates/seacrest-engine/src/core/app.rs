use winit::event::WindowEvent;

use crate::device::GraphicsContext;

use super::ctx::FrameCtx;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract implemented by clients of the engine.
///
/// Call order: `on_start` once after the graphics context exists, then
/// `on_window_event`/`on_frame` until one returns `Exit` or the window
/// closes, then `on_shutdown` once while the context is still alive.
pub trait App {
    /// Creates GPU objects (root signatures, pipelines, buffers).
    ///
    /// An error aborts startup.
    fn on_start(&mut self, gpu: &mut GraphicsContext) -> anyhow::Result<()> {
        let _ = gpu;
        Ok(())
    }

    /// Raw window events. Not called in headless mode.
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let _ = event;
        AppControl::Continue
    }

    /// Called once per frame.
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl;

    /// Releases GPU objects. The GPU is idle when this runs.
    fn on_shutdown(&mut self, gpu: &mut GraphicsContext) {
        let _ = gpu;
    }
}
