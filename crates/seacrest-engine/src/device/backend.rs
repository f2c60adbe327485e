use super::command::Command;
use super::descriptor::{CpuDescriptor, DescriptorHeapDesc, DescriptorHeapKind, HeapStart};
use super::error::GpuResult;
use super::pipeline::PipelineDesc;
use super::root_signature::RootSignatureDesc;
use super::state::ResourceState;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AllocatorId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RootSignatureId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorHeapId(pub u32);

/// Texel format of render targets.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Format {
    Rgba8Unorm,
}

impl Format {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Rgba8Unorm => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: Format,
}

/// Memory heap a buffer lives in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HeapKind {
    /// GPU-local memory.
    Default,
    /// CPU-writable, GPU-readable.
    Upload,
    /// GPU-writable, CPU-readable.
    Readback,
}

impl HeapKind {
    /// State a buffer is created in.
    pub fn initial_state(self) -> ResourceState {
        match self {
            HeapKind::Default => ResourceState::Common,
            HeapKind::Upload => ResourceState::GenericRead,
            HeapKind::Readback => ResourceState::CopyDest,
        }
    }

    /// Upload and readback buffers can never leave their initial state.
    pub fn is_pinned(self) -> bool {
        !matches!(self, HeapKind::Default)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub heap: HeapKind,
}

/// Native explicit-API device, queue and swapchain.
///
/// Implementations perform calls as requested and do not track resource
/// states themselves; ordering rules live in [`GraphicsContext`].
///
/// [`GraphicsContext`]: super::GraphicsContext
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Creates the swapchain and returns its back buffers, all in `Present`.
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GpuResult<Vec<ResourceId>>;

    /// Resizes the swapchain. The GPU must be idle and previously returned
    /// back-buffer ids are invalid afterwards.
    fn resize_swapchain(&mut self, width: u32, height: u32) -> GpuResult<Vec<ResourceId>>;

    fn current_back_buffer_index(&self) -> u32;

    fn descriptor_increment(&self, kind: DescriptorHeapKind) -> u32;
    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDesc) -> GpuResult<HeapStart>;
    fn create_render_target_view(&mut self, resource: ResourceId, dest: CpuDescriptor) -> GpuResult<()>;

    fn create_command_allocator(&mut self) -> GpuResult<AllocatorId>;
    fn reset_command_allocator(&mut self, allocator: AllocatorId) -> GpuResult<()>;

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureId>;
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineId>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> GpuResult<ResourceId>;
    fn buffer_address(&self, buffer: ResourceId) -> GpuResult<u64>;
    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> GpuResult<()>;
    fn read_buffer(&mut self, buffer: ResourceId, offset: u64, out: &mut [u8]) -> GpuResult<()>;
    fn release(&mut self, resource: ResourceId);

    /// Records `commands` into a list backed by `allocator` and submits it.
    fn execute(&mut self, allocator: AllocatorId, commands: &[Command]) -> GpuResult<()>;

    /// Enqueues a fence signal after all previously submitted work.
    fn signal(&mut self, value: u64) -> GpuResult<()>;
    fn completed_value(&self) -> u64;
    /// Blocks the calling thread until the fence reaches `value`.
    fn wait_for_value(&mut self, value: u64) -> GpuResult<()>;

    fn present(&mut self, sync_interval: u32) -> GpuResult<()>;
}
