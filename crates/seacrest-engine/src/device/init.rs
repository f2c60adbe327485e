use super::backend::Backend;
use super::error::{GpuError, GpuResult};
use super::headless::{HeadlessBackend, HeadlessConfig};

/// Device the context runs on.
#[derive(Debug, Clone)]
pub enum BackendKind {
    /// First hardware adapter that supports feature level 11.0.
    Hardware,
    /// Microsoft's software rasterizer.
    Warp,
    /// In-process simulated device. Needs no window.
    Headless(HeadlessConfig),
}

/// Initialization parameters for the GPU layer.
///
/// Keep this structure small. Add flags only when a concrete backend
/// requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    pub backend: BackendKind,

    /// Swapchain buffers and frame slots. 2 or 3.
    pub frame_count: u32,

    /// Present sync interval; 1 waits for vblank, 0 presents immediately.
    pub sync_interval: u32,

    /// Enables the native debug layer before device creation.
    ///
    /// Defaults to on in debug builds.
    pub debug_layer: bool,

    /// Descriptors in the shader-visible CBV/SRV/UAV heap.
    pub shader_heap_capacity: u32,

    /// Bytes of upload memory each frame may use for constants.
    pub upload_bytes_per_frame: u64,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            backend: BackendKind::Hardware,
            frame_count: 2,
            sync_interval: 1,
            debug_layer: cfg!(debug_assertions),
            shader_heap_capacity: 64,
            upload_bytes_per_frame: 64 * 1024,
        }
    }
}

impl GpuInit {
    /// Defaults on the headless backend.
    pub fn headless(config: HeadlessConfig) -> Self {
        Self {
            backend: BackendKind::Headless(config),
            debug_layer: false,
            ..Self::default()
        }
    }
}

/// Creates the backend selected by `init.backend`.
///
/// Native backends need the window the swapchain presents to.
pub fn create_backend(
    init: &GpuInit,
    window: Option<raw_window_handle::RawWindowHandle>,
) -> GpuResult<Box<dyn Backend>> {
    match &init.backend {
        BackendKind::Headless(config) => Ok(Box::new(HeadlessBackend::new(config.clone()))),
        BackendKind::Hardware | BackendKind::Warp => {
            let window = window.ok_or_else(|| {
                GpuError::Unsupported("native backends need a window".into())
            })?;
            create_native(init, window)
        }
    }
}

#[cfg(windows)]
fn create_native(init: &GpuInit, window: raw_window_handle::RawWindowHandle) -> GpuResult<Box<dyn Backend>> {
    let warp = matches!(init.backend, BackendKind::Warp);
    Ok(Box::new(super::d3d12::D3d12Backend::new(
        window,
        warp,
        init.debug_layer,
    )?))
}

#[cfg(not(windows))]
fn create_native(init: &GpuInit, _window: raw_window_handle::RawWindowHandle) -> GpuResult<Box<dyn Backend>> {
    Err(GpuError::Unsupported(format!(
        "{:?} backend requires Windows; use the headless backend",
        init.backend
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_double_buffer_with_vsync() {
        let init = GpuInit::default();
        assert_eq!(init.frame_count, 2);
        assert_eq!(init.sync_interval, 1);
        assert!(matches!(init.backend, BackendKind::Hardware));
    }

    #[test]
    fn headless_needs_no_window() {
        let backend = create_backend(&GpuInit::headless(HeadlessConfig::default()), None).unwrap();
        assert_eq!(backend.name(), "headless");
    }

    #[test]
    fn native_backend_without_window_is_rejected() {
        assert!(matches!(
            create_backend(&GpuInit::default(), None),
            Err(GpuError::Unsupported(_))
        ));
    }
}
