//! GPU device, command recording and synchronization.
//!
//! This module is responsible for:
//! - creating the device, queue and swapchain behind the [`Backend`] seam
//! - descriptor heaps, root signatures and pipelines
//! - recording frames with resource-state validation
//! - fence-based CPU/GPU synchronization and per-frame resource reuse

mod backend;
mod command;
mod context;
mod descriptor;
mod error;
mod fence;
mod frame;
mod headless;
mod init;
mod pipeline;
mod readback;
mod root_signature;
mod state;
mod upload;

#[cfg(windows)]
mod d3d12;

pub use backend::{
    AllocatorId, Backend, BufferDesc, DescriptorHeapId, Format, HeapKind, PipelineId, ResourceId,
    RootSignatureId, SwapchainDesc,
};
pub use command::{ClearColor, Command, FrameEncoder, ScissorRect, TextureCopyLayout, VertexBufferView, Viewport};
pub use context::{FrameStats, GraphicsContext};
pub use descriptor::{
    CpuDescriptor, DescriptorHeap, DescriptorHeapDesc, DescriptorHeapKind, DescriptorSlot, GpuDescriptor, HeapStart,
};
pub use error::{GpuError, GpuResult};
pub use fence::FenceTimeline;
pub use frame::{FrameRing, FrameSlot};
pub use headless::{HeadlessBackend, HeadlessConfig, HeadlessProbe};
pub use init::{BackendKind, GpuInit, create_backend};
pub use pipeline::{Pipeline, PipelineDesc, PrimitiveTopology, ShaderSource, VertexAttribute, VertexFormat};
pub use root_signature::{
    AddressMode, DescriptorRange, MAX_ROOT_COST, RangeKind, RootParameter, RootParameterKind, RootSignature,
    RootSignatureDesc, SamplerFilter, ShaderVisibility, StaticSampler,
};
pub use state::{Barrier, ResourceState, StateTracker};
pub use upload::{CONSTANT_BUFFER_ALIGNMENT, UploadAllocation, UploadRing};

#[cfg(windows)]
pub use d3d12::D3d12Backend;
