use super::backend::{AllocatorId, ResourceId};
use super::state::ResourceState;

/// Errors raised by the GPU layer.
///
/// Every variant is fatal for the frame loop: there is no retry path. The
/// typed variants exist so invariant violations can be told apart from
/// native API failures in logs and tests.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// A native API call failed.
    #[error("{call} failed: HRESULT 0x{code:08X} ({message})")]
    Device {
        call: &'static str,
        code: u32,
        message: String,
    },

    /// The device was lost or a deferred validation failed on the GPU timeline.
    #[error("device removed: {0}")]
    DeviceRemoved(String),

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("resource {0:?} is not tracked")]
    UnknownResource(ResourceId),

    #[error("resource {resource:?} is in state {actual:?}, expected {expected:?}")]
    InvalidState {
        resource: ResourceId,
        expected: ResourceState,
        actual: ResourceState,
    },

    #[error("resource {resource:?} is pinned to {pinned:?} and cannot transition to {requested:?}")]
    PinnedState {
        resource: ResourceId,
        pinned: ResourceState,
        requested: ResourceState,
    },

    #[error("command allocator {0:?} still has work in flight")]
    AllocatorInUse(AllocatorId),

    #[error("fence went backwards: completed {completed}, previously observed {observed}")]
    FenceRegression { completed: u64, observed: u64 },

    #[error("fence value {0} was never signaled")]
    FenceNeverSignaled(u64),

    #[error("descriptor heap full ({capacity} descriptors)")]
    DescriptorHeapFull { capacity: u32 },

    #[error("descriptor {index} freed twice")]
    DescriptorDoubleFree { index: u32 },

    #[error("invalid root signature: {0}")]
    RootSignature(String),

    #[error("invalid binding: {0}")]
    Binding(String),

    #[error("upload ring out of space: requested {requested} bytes, {remaining} remaining")]
    UploadOutOfSpace { requested: u64, remaining: u64 },

    #[error("upload region {slot} still in flight (fence {fence}, completed {completed})")]
    UploadInFlight { slot: usize, fence: u64, completed: u64 },

    #[error("readback buffer {0:?} is still being written by the GPU")]
    ReadbackNotReady(ResourceId),

    #[error("screenshot encoding failed: {0}")]
    Screenshot(String),
}

#[cfg_attr(not(windows), allow(dead_code))]
impl GpuError {
    pub(crate) fn device(call: &'static str, code: u32, message: impl Into<String>) -> Self {
        Self::Device {
            call,
            code,
            message: message.into(),
        }
    }
}

/// Shorthand for results produced by the GPU layer.
pub type GpuResult<T> = std::result::Result<T, GpuError>;
