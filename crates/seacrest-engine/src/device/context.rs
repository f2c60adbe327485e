use std::path::PathBuf;

use crate::logging::CORE_TARGET;

use super::backend::{Backend, BufferDesc, Format, HeapKind, ResourceId, SwapchainDesc};
use super::command::{
    ClearColor, FrameEncoder, RecordedFrame, ScissorRect, TextureCopyLayout, VertexBufferView, Viewport,
};
use super::descriptor::{DescriptorHeap, DescriptorHeapDesc, DescriptorHeapKind};
use super::error::{GpuError, GpuResult};
use super::fence::FenceTimeline;
use super::frame::FrameRing;
use super::init::GpuInit;
use super::pipeline::{Pipeline, PipelineDesc};
use super::readback::{self, PendingReadback};
use super::root_signature::{RootSignature, RootSignatureDesc};
use super::state::{ResourceState, StateOverlay, StateTracker};
use super::upload::UploadRing;

/// Result of one submitted frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameStats {
    /// Frames submitted so far, counting this one.
    pub frame_number: u64,
    /// Frame slot the frame was recorded into.
    pub slot: usize,
    /// Fence value signaled after the frame's command list.
    pub fence_value: u64,
    /// Whether the CPU blocked on the slot's previous fence.
    pub waited: bool,
    pub draw_calls: u32,
    pub barriers: u32,
}

/// Owns the device, queue and swapchain plus everything recorded against them.
///
/// Created once at startup. All GPU work is issued from the thread that owns
/// the context; per-slot resources are only reused after their fence value
/// has been reached. Dropping the context waits for the GPU to go idle.
pub struct GraphicsContext {
    backend: Box<dyn Backend>,

    /// Current surface size in physical pixels; zero while minimized.
    size: (u32, u32),
    sync_interval: u32,

    rtv_heap: DescriptorHeap,
    shader_heap: DescriptorHeap,
    frames: FrameRing,
    fence: FenceTimeline,
    states: StateTracker,
    upload: UploadRing,

    /// Buffers created through the context and released on drop.
    owned: Vec<ResourceId>,

    screenshot_request: Option<PathBuf>,
    readbacks: Vec<PendingReadback>,

    frame_number: u64,
}

impl GraphicsContext {
    pub fn new(mut backend: Box<dyn Backend>, init: GpuInit, width: u32, height: u32) -> GpuResult<Self> {
        if !(2..=3).contains(&init.frame_count) {
            return Err(GpuError::Unsupported(format!(
                "frame count {} (expected 2 or 3)",
                init.frame_count
            )));
        }
        if width == 0 || height == 0 {
            return Err(GpuError::Unsupported("surface has zero size".into()));
        }

        let back_buffers = backend.create_swapchain(&SwapchainDesc {
            width,
            height,
            buffer_count: init.frame_count,
            format: Format::Rgba8Unorm,
        })?;

        let mut rtv_heap = DescriptorHeap::new(
            backend.as_mut(),
            DescriptorHeapDesc {
                kind: DescriptorHeapKind::Rtv,
                capacity: init.frame_count,
                shader_visible: false,
            },
        )?;
        let frames = FrameRing::new(backend.as_mut(), &mut rtv_heap, &back_buffers)?;

        let mut states = StateTracker::new();
        for &back_buffer in &back_buffers {
            states.register(back_buffer, ResourceState::Present);
        }

        let shader_heap = DescriptorHeap::new(
            backend.as_mut(),
            DescriptorHeapDesc {
                kind: DescriptorHeapKind::CbvSrvUav,
                capacity: init.shader_heap_capacity,
                shader_visible: true,
            },
        )?;

        let upload = UploadRing::new(
            backend.as_mut(),
            init.upload_bytes_per_frame,
            init.frame_count as usize,
        )?;
        states.register_pinned(upload.buffer(), HeapKind::Upload.initial_state());

        // Setup work has to finish before the first frame touches anything.
        let mut fence = FenceTimeline::new();
        fence.flush(backend.as_mut())?;

        log::info!(
            target: CORE_TARGET,
            "graphics context ready: backend={}, {}x{}, {} frames",
            backend.name(),
            width,
            height,
            init.frame_count
        );

        Ok(Self {
            backend,
            size: (width, height),
            sync_interval: init.sync_interval,
            rtv_heap,
            shader_heap,
            frames,
            fence,
            states,
            upload,
            owned: Vec::new(),
            screenshot_request: None,
            readbacks: Vec::new(),
            frame_number: 0,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frames submitted so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn states(&self) -> &StateTracker {
        &self.states
    }

    /// Shader-visible CBV/SRV/UAV heap.
    pub fn shader_heap(&mut self) -> &mut DescriptorHeap {
        &mut self.shader_heap
    }

    pub fn create_root_signature(&mut self, desc: RootSignatureDesc) -> GpuResult<RootSignature> {
        desc.validate()?;
        let id = self.backend.create_root_signature(&desc)?;
        log::debug!(
            target: CORE_TARGET,
            "root signature {:?}: {} parameters, cost {}",
            id,
            desc.parameters.len(),
            desc.cost()
        );
        Ok(RootSignature::new(id, desc))
    }

    pub fn create_pipeline(&mut self, root_signature: &RootSignature, desc: &PipelineDesc) -> GpuResult<Pipeline> {
        if desc.root_signature != root_signature.id() {
            return Err(GpuError::Binding(format!(
                "pipeline '{}' names {:?} but was given {:?}",
                desc.label,
                desc.root_signature,
                root_signature.id()
            )));
        }
        let id = self.backend.create_pipeline(desc)?;
        log::debug!(target: CORE_TARGET, "pipeline '{}' created", desc.label);
        Ok(Pipeline::new(id, root_signature, desc))
    }

    /// Creates a CPU-writable buffer holding `data`.
    ///
    /// The buffer lives on the upload heap and stays in `GenericRead`, which
    /// makes it usable as a vertex or constant buffer without transitions.
    pub fn create_buffer_with_data(&mut self, label: &'static str, data: &[u8]) -> GpuResult<ResourceId> {
        let buffer = self.backend.create_buffer(&BufferDesc {
            label,
            size: data.len() as u64,
            heap: HeapKind::Upload,
        })?;
        self.backend.write_buffer(buffer, 0, data)?;
        self.states
            .register_pinned(buffer, HeapKind::Upload.initial_state());
        self.owned.push(buffer);
        Ok(buffer)
    }

    pub fn create_vertex_buffer<T: bytemuck::Pod>(
        &mut self,
        label: &'static str,
        vertices: &[T],
    ) -> GpuResult<VertexBufferView> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let buffer = self.create_buffer_with_data(label, bytes)?;
        Ok(VertexBufferView {
            buffer,
            address: self.backend.buffer_address(buffer)?,
            size: bytes.len() as u32,
            stride: std::mem::size_of::<T>() as u32,
        })
    }

    /// Releases a buffer created by this context once no frame uses it.
    pub fn release_buffer(&mut self, buffer: ResourceId) -> GpuResult<()> {
        let Some(at) = self.owned.iter().position(|b| *b == buffer) else {
            return Err(GpuError::UnknownResource(buffer));
        };
        self.fence.wait(self.backend.as_mut(), self.frames.latest_fence())?;
        self.owned.swap_remove(at);
        self.states.unregister(buffer);
        self.backend.release(buffer);
        Ok(())
    }

    /// Copies the next frame's back buffer to `path` as a PNG.
    ///
    /// The file is written by [`poll_readbacks`](Self::poll_readbacks) once
    /// the frame's fence has been reached.
    pub fn request_screenshot(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if let Some(previous) = self.screenshot_request.replace(path) {
            log::warn!(
                target: CORE_TARGET,
                "screenshot request for {} replaced before it was taken",
                previous.display()
            );
        }
    }

    /// Writes every screenshot whose frame has completed. Returns their paths.
    pub fn poll_readbacks(&mut self) -> GpuResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        let mut waiting = Vec::new();
        let mut failure = None;

        for pending in std::mem::take(&mut self.readbacks) {
            if failure.is_some() {
                waiting.push(pending);
                continue;
            }
            match self.fence.is_reached(self.backend.as_ref(), pending.fence) {
                Ok(true) => {}
                Ok(false) => {
                    waiting.push(pending);
                    continue;
                }
                Err(e) => {
                    failure = Some(e);
                    waiting.push(pending);
                    continue;
                }
            }

            let result = self.finish_readback(&pending);
            self.states.unregister(pending.buffer);
            self.backend.release(pending.buffer);
            match result {
                Ok(()) => {
                    log::info!(target: CORE_TARGET, "screenshot saved to {}", pending.path.display());
                    written.push(pending.path);
                }
                Err(e) => failure = Some(e),
            }
        }

        self.readbacks = waiting;
        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn finish_readback(&mut self, pending: &PendingReadback) -> GpuResult<()> {
        let mut data = vec![0u8; pending.layout.size() as usize];
        self.backend.read_buffer(pending.buffer, 0, &mut data)?;
        let pixels = readback::strip_row_pitch(&data, &pending.layout);
        readback::write_png(&pending.path, &pending.layout, pixels)
    }

    /// Blocks until all submitted work is done.
    pub fn flush(&mut self) -> GpuResult<()> {
        self.fence.flush(self.backend.as_mut())?;
        Ok(())
    }

    /// Resizes the swapchain.
    ///
    /// A zero size (minimized window) is recorded and frames are skipped
    /// until a non-zero size arrives.
    pub fn resize(&mut self, width: u32, height: u32) -> GpuResult<()> {
        if width == 0 || height == 0 {
            log::debug!(target: CORE_TARGET, "surface minimized, deferring resize");
            self.size = (width, height);
            return Ok(());
        }
        if self.size == (width, height) {
            return Ok(());
        }

        self.flush()?;

        let old: Vec<ResourceId> = self.frames.slots().iter().map(|s| s.back_buffer).collect();
        let back_buffers = self.backend.resize_swapchain(width, height)?;
        for back_buffer in old {
            self.states.unregister(back_buffer);
        }
        for &back_buffer in &back_buffers {
            self.states.register(back_buffer, ResourceState::Present);
        }
        self.frames.rebind(self.backend.as_mut(), &back_buffers)?;
        self.upload.reset();
        self.size = (width, height);

        log::debug!(target: CORE_TARGET, "swapchain resized to {width}x{height}");
        Ok(())
    }

    /// Records, submits and presents one frame.
    ///
    /// The back buffer is cleared to `clear` and left bound as the render
    /// target with a full viewport and scissor before `record` runs. Returns
    /// `None` when the surface has zero size.
    pub fn render_frame<F>(&mut self, clear: ClearColor, record: F) -> GpuResult<Option<FrameStats>>
    where
        F: FnOnce(&mut FrameEncoder<'_>, &DescriptorHeap) -> GpuResult<()>,
    {
        if self.size.0 == 0 || self.size.1 == 0 {
            return Ok(None);
        }

        let slot_index = self.frames.current_index();
        let slot = *self.frames.current();

        // The allocator, back buffer and upload region of this slot are only
        // free once the frame that last used them has retired.
        let waited = self.fence.wait(self.backend.as_mut(), slot.fence_value)?;
        self.backend.reset_command_allocator(slot.allocator)?;
        let completed = self.fence.completed(self.backend.as_ref())?;
        self.upload.begin_frame(slot_index, completed)?;

        let readback = match self.screenshot_request.take() {
            Some(path) => match self.create_readback(path) {
                Ok(readback) => Some(readback),
                Err(e) => {
                    self.upload.abandon();
                    return Err(e);
                }
            },
            None => None,
        };

        let encoder = FrameEncoder::new(
            StateOverlay::new(&self.states),
            &mut self.upload,
            slot.back_buffer,
            slot.rtv,
            self.size,
        );
        let copy = readback.as_ref().map(|r| (r.buffer, r.layout));
        let recorded = match record_frame(encoder, clear, &self.shader_heap, copy, record) {
            Ok(recorded) => recorded,
            Err(e) => {
                self.upload.abandon();
                if let Some(readback) = readback {
                    self.states.unregister(readback.buffer);
                    self.backend.release(readback.buffer);
                }
                return Err(e);
            }
        };

        self.upload.flush(self.backend.as_mut())?;
        self.backend.execute(slot.allocator, &recorded.commands)?;
        self.states.commit(recorded.final_states);

        let fence_value = self.fence.signal(self.backend.as_mut())?;
        self.frames.current_mut().fence_value = fence_value;
        self.upload.end_frame(fence_value);
        if let Some(mut readback) = readback {
            readback.fence = fence_value;
            self.readbacks.push(readback);
        }

        self.backend.present(self.sync_interval)?;
        self.frames
            .advance_to(self.backend.current_back_buffer_index())?;
        self.frame_number += 1;

        let stats = FrameStats {
            frame_number: self.frame_number,
            slot: slot_index,
            fence_value,
            waited,
            draw_calls: recorded.draw_calls,
            barriers: recorded.barriers,
        };
        log::trace!(target: CORE_TARGET, "{stats:?}");
        Ok(Some(stats))
    }

    fn create_readback(&mut self, path: PathBuf) -> GpuResult<PendingReadback> {
        let layout = TextureCopyLayout::new(self.size.0, self.size.1, Format::Rgba8Unorm);
        let buffer = self.backend.create_buffer(&BufferDesc {
            label: "seacrest screenshot readback",
            size: layout.size(),
            heap: HeapKind::Readback,
        })?;
        self.states
            .register_pinned(buffer, HeapKind::Readback.initial_state());
        Ok(PendingReadback {
            path,
            buffer,
            layout,
            fence: 0,
        })
    }
}

fn record_frame<F>(
    mut encoder: FrameEncoder<'_>,
    clear: ClearColor,
    shader_heap: &DescriptorHeap,
    readback: Option<(ResourceId, TextureCopyLayout)>,
    record: F,
) -> GpuResult<RecordedFrame>
where
    F: FnOnce(&mut FrameEncoder<'_>, &DescriptorHeap) -> GpuResult<()>,
{
    let back_buffer = encoder.back_buffer();
    let (width, height) = encoder.size();

    encoder.transition(back_buffer, ResourceState::RenderTarget)?;
    encoder.bind_back_buffer()?;
    encoder.set_viewport(Viewport::full(width, height));
    encoder.set_scissor(ScissorRect::full(width, height));
    encoder.clear_back_buffer(clear)?;

    record(&mut encoder, shader_heap)?;

    if let Some((buffer, layout)) = readback {
        encoder.transition(back_buffer, ResourceState::CopySource)?;
        encoder.copy_texture_to_buffer(back_buffer, buffer, layout)?;
    }
    encoder.transition(back_buffer, ResourceState::Present)?;
    encoder.finish()
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        if let Err(e) = self.fence.flush(self.backend.as_mut()) {
            log::error!(target: CORE_TARGET, "failed to idle the GPU on shutdown: {e}");
            return;
        }
        for readback in self.readbacks.drain(..) {
            self.backend.release(readback.buffer);
        }
        for buffer in self.owned.drain(..) {
            self.backend.release(buffer);
        }
        self.backend.release(self.upload.buffer());
        log::debug!(
            target: CORE_TARGET,
            "graphics context destroyed after {} frames ({} rtvs)",
            self.frame_number,
            self.rtv_heap.live()
        );
    }
}
