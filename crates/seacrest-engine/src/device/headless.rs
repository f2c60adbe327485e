//! Software device used for tests and windowless runs.
//!
//! Submitted work is queued and retired lazily so that the CPU can run ahead
//! of the simulated GPU by `queue_latency` command lists. Barriers, clears and
//! copies are executed against CPU memory, and every barrier's `before` state
//! is checked against the state the resource actually has when the GPU gets
//! to it. Violations found on the GPU timeline mark the device as removed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::logging::CORE_TARGET;

use super::backend::{
    AllocatorId, Backend, BufferDesc, DescriptorHeapId, HeapKind, PipelineId, ResourceId,
    RootSignatureId, SwapchainDesc,
};
use super::command::Command;
use super::descriptor::{CpuDescriptor, DescriptorHeapDesc, DescriptorHeapKind, GpuDescriptor, HeapStart};
use super::error::{GpuError, GpuResult};
use super::pipeline::PipelineDesc;
use super::root_signature::RootSignatureDesc;
use super::state::ResourceState;

const BUFFER_PLACEMENT_ALIGNMENT: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Command lists the simulated GPU may lag behind the CPU.
    pub queue_latency: usize,
    pub descriptor_increment: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            queue_latency: 1,
            descriptor_increment: 32,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    presents: AtomicU64,
    command_lists: AtomicU64,
    barriers: AtomicU64,
    draws: AtomicU64,
    waits: AtomicU64,
}

/// Read-only view of headless device activity, shareable across owners.
#[derive(Debug, Clone, Default)]
pub struct HeadlessProbe(Arc<Counters>);

impl HeadlessProbe {
    pub fn presents(&self) -> u64 {
        self.0.presents.load(Ordering::Relaxed)
    }

    pub fn command_lists(&self) -> u64 {
        self.0.command_lists.load(Ordering::Relaxed)
    }

    pub fn barriers(&self) -> u64 {
        self.0.barriers.load(Ordering::Relaxed)
    }

    pub fn draws(&self) -> u64 {
        self.0.draws.load(Ordering::Relaxed)
    }

    /// Number of blocking fence waits the CPU performed.
    pub fn waits(&self) -> u64 {
        self.0.waits.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[derive(Debug)]
enum Resource {
    Texture {
        width: u32,
        height: u32,
        state: ResourceState,
        pixels: Vec<u8>,
    },
    Buffer {
        heap: HeapKind,
        state: ResourceState,
        bytes: Vec<u8>,
        address: u64,
    },
}

impl Resource {
    fn state_mut(&mut self) -> &mut ResourceState {
        match self {
            Resource::Texture { state, .. } | Resource::Buffer { state, .. } => state,
        }
    }
}

#[derive(Debug)]
enum QueueOp {
    Execute {
        allocator: AllocatorId,
        commands: Vec<Command>,
    },
    Signal(u64),
    Present {
        back_buffer: ResourceId,
    },
}

#[derive(Debug)]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    probe: HeadlessProbe,

    next_id: u32,
    resources: HashMap<ResourceId, Resource>,
    swapchain: Vec<ResourceId>,
    back_buffer_index: u32,

    heaps: Vec<DescriptorHeapDesc>,
    rtvs: HashMap<usize, ResourceId>,
    allocators: Vec<u32>,
    root_signatures: usize,
    pipelines: usize,

    queue: VecDeque<QueueOp>,
    completed: u64,
    next_address: u64,
    removed: Option<String>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            probe: HeadlessProbe::default(),
            next_id: 0,
            resources: HashMap::new(),
            swapchain: Vec::new(),
            back_buffer_index: 0,
            heaps: Vec::new(),
            rtvs: HashMap::new(),
            allocators: Vec::new(),
            root_signatures: 0,
            pipelines: 0,
            queue: VecDeque::new(),
            completed: 0,
            next_address: BUFFER_PLACEMENT_ALIGNMENT,
            removed: None,
        }
    }

    pub fn probe(&self) -> HeadlessProbe {
        self.probe.clone()
    }

    pub fn buffer_contents(&self, buffer: ResourceId) -> Option<&[u8]> {
        match self.resources.get(&buffer) {
            Some(Resource::Buffer { bytes, .. }) => Some(bytes),
            _ => None,
        }
    }

    /// RGBA8 pixels of a texture as last written by the simulated GPU.
    pub fn texture_pixels(&self, texture: ResourceId) -> Option<&[u8]> {
        match self.resources.get(&texture) {
            Some(Resource::Texture { pixels, .. }) => Some(pixels),
            _ => None,
        }
    }

    /// Operations queued but not yet retired.
    pub fn pending_ops(&self) -> usize {
        self.queue.len()
    }

    fn alloc_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    fn check_removed(&self) -> GpuResult<()> {
        match &self.removed {
            Some(reason) => Err(GpuError::DeviceRemoved(reason.clone())),
            None => Ok(()),
        }
    }

    fn create_back_buffers(&mut self, width: u32, height: u32, count: u32) -> Vec<ResourceId> {
        let ids: Vec<ResourceId> = (0..count)
            .map(|_| {
                let id = self.alloc_id();
                self.resources.insert(
                    id,
                    Resource::Texture {
                        width,
                        height,
                        state: ResourceState::Present,
                        pixels: vec![0; (width * height * 4) as usize],
                    },
                );
                id
            })
            .collect();
        self.swapchain = ids.clone();
        self.back_buffer_index = 0;
        ids
    }

    fn pending_executes(&self) -> usize {
        self.queue
            .iter()
            .filter(|op| matches!(op, QueueOp::Execute { .. }))
            .count()
    }

    /// Retires queued work until the GPU is at most `queue_latency` lists behind.
    fn pump(&mut self) {
        loop {
            let ready = match self.queue.front() {
                None => false,
                Some(QueueOp::Execute { .. }) => self.pending_executes() > self.config.queue_latency,
                Some(_) => true,
            };
            if !ready {
                break;
            }
            self.retire_one();
        }
    }

    fn retire_one(&mut self) {
        let Some(op) = self.queue.pop_front() else {
            return;
        };

        match op {
            QueueOp::Execute { allocator, commands } => {
                if let Some(in_flight) = self.allocators.get_mut(allocator.0 as usize) {
                    *in_flight = in_flight.saturating_sub(1);
                }
                if self.removed.is_none() {
                    if let Err(reason) = self.run(&commands) {
                        log::error!(target: CORE_TARGET, "headless device removed: {reason}");
                        self.removed = Some(reason);
                    }
                }
                HeadlessProbe::bump(&self.probe.0.command_lists, 1);
            }
            QueueOp::Signal(value) => {
                self.completed = self.completed.max(value);
            }
            QueueOp::Present { back_buffer } => {
                let state = match self.resources.get(&back_buffer) {
                    Some(Resource::Texture { state, .. }) => Some(*state),
                    _ => None,
                };
                match state {
                    Some(s) if s.is_same_native(ResourceState::Present) => {}
                    Some(s) => {
                        self.removed
                            .get_or_insert_with(|| format!("presented back buffer in state {s:?}"));
                    }
                    None => {
                        self.removed
                            .get_or_insert_with(|| format!("presented unknown back buffer {back_buffer:?}"));
                    }
                }
                HeadlessProbe::bump(&self.probe.0.presents, 1);
            }
        }
    }

    fn run(&mut self, commands: &[Command]) -> Result<(), String> {
        for command in commands {
            match command {
                Command::Barriers(batch) => {
                    for barrier in batch {
                        let resource = self
                            .resources
                            .get_mut(&barrier.resource)
                            .ok_or_else(|| format!("barrier on released resource {:?}", barrier.resource))?;
                        let state = resource.state_mut();
                        if !state.is_same_native(barrier.before) {
                            return Err(format!(
                                "barrier on {:?} expects {:?} but resource is {:?}",
                                barrier.resource, barrier.before, state
                            ));
                        }
                        *state = barrier.after;
                    }
                    HeadlessProbe::bump(&self.probe.0.barriers, batch.len() as u64);
                }
                Command::SetRenderTarget { target, rtv } => {
                    self.check_rtv(*target, *rtv)?;
                }
                Command::ClearRenderTarget { target, rtv, color } => {
                    self.check_rtv(*target, *rtv)?;
                    match self.resources.get_mut(target) {
                        Some(Resource::Texture { state, pixels, .. }) => {
                            if *state != ResourceState::RenderTarget {
                                return Err(format!("clear of {target:?} in state {state:?}"));
                            }
                            let texel = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                            for px in pixels.chunks_exact_mut(4) {
                                px.copy_from_slice(&texel);
                            }
                        }
                        _ => return Err(format!("clear of non-texture {target:?}")),
                    }
                }
                Command::Draw { .. } => {
                    HeadlessProbe::bump(&self.probe.0.draws, 1);
                }
                Command::CopyTextureToBuffer { src, dst, layout } => {
                    let (width, height, texels) = match self.resources.get(src) {
                        Some(Resource::Texture {
                            width,
                            height,
                            state: ResourceState::CopySource,
                            pixels,
                        }) => (*width, *height, pixels.clone()),
                        _ => return Err(format!("copy from {src:?} needs a texture in CopySource")),
                    };
                    if layout.width != width || layout.height != height {
                        return Err(format!("copy layout does not match {src:?}"));
                    }
                    match self.resources.get_mut(dst) {
                        Some(Resource::Buffer {
                            state: ResourceState::CopyDest,
                            bytes,
                            ..
                        }) if bytes.len() as u64 >= layout.size() => {
                            let row = (width * 4) as usize;
                            for y in 0..height as usize {
                                let at = y * layout.row_pitch as usize;
                                bytes[at..at + row].copy_from_slice(&texels[y * row..(y + 1) * row]);
                            }
                        }
                        _ => return Err(format!("copy into {dst:?} needs a large enough buffer in CopyDest")),
                    }
                }
                Command::CopyBuffer {
                    dst,
                    dst_offset,
                    src,
                    src_offset,
                    size,
                } => {
                    let data = match self.resources.get(src) {
                        Some(Resource::Buffer { bytes, .. }) => {
                            let start = *src_offset as usize;
                            bytes
                                .get(start..start + *size as usize)
                                .ok_or_else(|| format!("copy source range out of bounds on {src:?}"))?
                                .to_vec()
                        }
                        _ => return Err(format!("copy from non-buffer {src:?}")),
                    };
                    match self.resources.get_mut(dst) {
                        Some(Resource::Buffer { state, .. }) if !state.is_same_native(ResourceState::CopyDest) => {
                            return Err(format!("copy into {dst:?} in state {state:?}"));
                        }
                        Some(Resource::Buffer { bytes, .. }) => {
                            let start = *dst_offset as usize;
                            bytes
                                .get_mut(start..start + data.len())
                                .ok_or_else(|| format!("copy destination range out of bounds on {dst:?}"))?
                                .copy_from_slice(&data);
                        }
                        _ => return Err(format!("copy into non-buffer {dst:?}")),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_rtv(&self, target: ResourceId, rtv: CpuDescriptor) -> Result<(), String> {
        match self.rtvs.get(&rtv.0) {
            Some(bound) if *bound == target => Ok(()),
            Some(bound) => Err(format!("rtv {rtv:?} views {bound:?}, not {target:?}")),
            None => Err(format!("rtv {rtv:?} was never created")),
        }
    }

    fn queued_write_targets(&self, buffer: ResourceId) -> bool {
        self.queue.iter().any(|op| match op {
            QueueOp::Execute { commands, .. } => commands.iter().any(|c| match c {
                Command::CopyTextureToBuffer { dst, .. } | Command::CopyBuffer { dst, .. } => *dst == buffer,
                _ => false,
            }),
            _ => false,
        })
    }
}

impl Backend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> GpuResult<Vec<ResourceId>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::Unsupported("swapchain with zero size".into()));
        }
        if !(2..=16).contains(&desc.buffer_count) {
            return Err(GpuError::Unsupported(format!(
                "swapchain buffer count {}",
                desc.buffer_count
            )));
        }
        Ok(self.create_back_buffers(desc.width, desc.height, desc.buffer_count))
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> GpuResult<Vec<ResourceId>> {
        self.check_removed()?;
        if !self.queue.is_empty() {
            return Err(GpuError::Unsupported("swapchain resize with work in flight".into()));
        }
        let count = self.swapchain.len() as u32;
        for old in std::mem::take(&mut self.swapchain) {
            self.resources.remove(&old);
            self.rtvs.retain(|_, r| *r != old);
        }
        Ok(self.create_back_buffers(width, height, count))
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.back_buffer_index
    }

    fn descriptor_increment(&self, _kind: DescriptorHeapKind) -> u32 {
        self.config.descriptor_increment
    }

    fn create_descriptor_heap(&mut self, desc: &DescriptorHeapDesc) -> GpuResult<HeapStart> {
        let id = self.heaps.len() as u32;
        self.heaps.push(*desc);
        Ok(HeapStart {
            id: DescriptorHeapId(id),
            cpu: CpuDescriptor((id as usize + 1) << 24),
            gpu: desc
                .shader_visible
                .then(|| GpuDescriptor((id as u64 + 1) << 40)),
        })
    }

    fn create_render_target_view(&mut self, resource: ResourceId, dest: CpuDescriptor) -> GpuResult<()> {
        match self.resources.get(&resource) {
            Some(Resource::Texture { .. }) => {
                self.rtvs.insert(dest.0, resource);
                Ok(())
            }
            _ => Err(GpuError::UnknownResource(resource)),
        }
    }

    fn create_command_allocator(&mut self) -> GpuResult<AllocatorId> {
        self.allocators.push(0);
        Ok(AllocatorId(self.allocators.len() as u32 - 1))
    }

    fn reset_command_allocator(&mut self, allocator: AllocatorId) -> GpuResult<()> {
        self.check_removed()?;
        match self.allocators.get(allocator.0 as usize) {
            Some(0) => Ok(()),
            Some(_) => Err(GpuError::AllocatorInUse(allocator)),
            None => Err(GpuError::Unsupported(format!("unknown allocator {allocator:?}"))),
        }
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> GpuResult<RootSignatureId> {
        desc.validate()?;
        self.root_signatures += 1;
        Ok(RootSignatureId(self.root_signatures as u32 - 1))
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineId> {
        if desc.root_signature.0 as usize >= self.root_signatures {
            return Err(GpuError::Binding(format!(
                "pipeline '{}' references unknown root signature",
                desc.label
            )));
        }
        for stage in [&desc.vertex, &desc.pixel] {
            if stage.source.trim().is_empty() || stage.entry_point.is_empty() {
                return Err(GpuError::Unsupported(format!(
                    "pipeline '{}' has an empty shader stage",
                    desc.label
                )));
            }
        }
        self.pipelines += 1;
        Ok(PipelineId(self.pipelines as u32 - 1))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> GpuResult<ResourceId> {
        if desc.size == 0 {
            return Err(GpuError::Unsupported(format!("buffer '{}' with zero size", desc.label)));
        }
        let id = self.alloc_id();
        let address = self.next_address;
        self.next_address += desc.size.div_ceil(BUFFER_PLACEMENT_ALIGNMENT) * BUFFER_PLACEMENT_ALIGNMENT;
        self.resources.insert(
            id,
            Resource::Buffer {
                heap: desc.heap,
                state: desc.heap.initial_state(),
                bytes: vec![0; desc.size as usize],
                address,
            },
        );
        Ok(id)
    }

    fn buffer_address(&self, buffer: ResourceId) -> GpuResult<u64> {
        match self.resources.get(&buffer) {
            Some(Resource::Buffer { address, .. }) => Ok(*address),
            _ => Err(GpuError::UnknownResource(buffer)),
        }
    }

    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> GpuResult<()> {
        match self.resources.get_mut(&buffer) {
            Some(Resource::Buffer {
                heap: HeapKind::Upload,
                bytes,
                ..
            }) => {
                let start = offset as usize;
                let dst = bytes.get_mut(start..start + data.len()).ok_or_else(|| {
                    GpuError::Binding(format!("write past the end of {buffer:?}"))
                })?;
                dst.copy_from_slice(data);
                Ok(())
            }
            Some(_) => Err(GpuError::Binding(format!("{buffer:?} is not CPU writable"))),
            None => Err(GpuError::UnknownResource(buffer)),
        }
    }

    fn read_buffer(&mut self, buffer: ResourceId, offset: u64, out: &mut [u8]) -> GpuResult<()> {
        self.check_removed()?;
        if self.queued_write_targets(buffer) {
            return Err(GpuError::ReadbackNotReady(buffer));
        }
        match self.resources.get(&buffer) {
            Some(Resource::Buffer {
                heap: HeapKind::Readback,
                bytes,
                ..
            }) => {
                let start = offset as usize;
                let src = bytes.get(start..start + out.len()).ok_or_else(|| {
                    GpuError::Binding(format!("read past the end of {buffer:?}"))
                })?;
                out.copy_from_slice(src);
                Ok(())
            }
            Some(_) => Err(GpuError::Binding(format!("{buffer:?} is not CPU readable"))),
            None => Err(GpuError::UnknownResource(buffer)),
        }
    }

    fn release(&mut self, resource: ResourceId) {
        self.resources.remove(&resource);
    }

    fn execute(&mut self, allocator: AllocatorId, commands: &[Command]) -> GpuResult<()> {
        self.check_removed()?;
        let in_flight = self
            .allocators
            .get_mut(allocator.0 as usize)
            .ok_or_else(|| GpuError::Unsupported(format!("unknown allocator {allocator:?}")))?;
        *in_flight += 1;

        self.queue.push_back(QueueOp::Execute {
            allocator,
            commands: commands.to_vec(),
        });
        self.pump();
        self.check_removed()
    }

    fn signal(&mut self, value: u64) -> GpuResult<()> {
        self.check_removed()?;
        self.queue.push_back(QueueOp::Signal(value));
        self.pump();
        self.check_removed()
    }

    fn completed_value(&self) -> u64 {
        self.completed
    }

    fn wait_for_value(&mut self, value: u64) -> GpuResult<()> {
        HeadlessProbe::bump(&self.probe.0.waits, 1);
        while self.completed < value && !self.queue.is_empty() {
            self.retire_one();
        }
        self.check_removed()?;
        if self.completed < value {
            return Err(GpuError::FenceNeverSignaled(value));
        }
        Ok(())
    }

    fn present(&mut self, _sync_interval: u32) -> GpuResult<()> {
        self.check_removed()?;
        let back_buffer = *self
            .swapchain
            .get(self.back_buffer_index as usize)
            .ok_or_else(|| GpuError::Unsupported("present without a swapchain".into()))?;
        self.queue.push_back(QueueOp::Present { back_buffer });
        self.back_buffer_index = (self.back_buffer_index + 1) % self.swapchain.len() as u32;
        self.pump();
        self.check_removed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::state::Barrier;

    fn swapchain(backend: &mut HeadlessBackend) -> Vec<ResourceId> {
        backend
            .create_swapchain(&SwapchainDesc {
                width: 2,
                height: 2,
                buffer_count: 2,
                format: crate::device::Format::Rgba8Unorm,
            })
            .unwrap()
    }

    #[test]
    fn allocator_reset_rejected_while_in_flight() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            queue_latency: 2,
            ..HeadlessConfig::default()
        });
        let alloc = backend.create_command_allocator().unwrap();
        backend.execute(alloc, &[]).unwrap();
        assert!(matches!(
            backend.reset_command_allocator(alloc),
            Err(GpuError::AllocatorInUse(_))
        ));

        backend.signal(1).unwrap();
        backend.wait_for_value(1).unwrap();
        backend.reset_command_allocator(alloc).unwrap();
    }

    #[test]
    fn mismatched_barrier_removes_device() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            queue_latency: 0,
            ..HeadlessConfig::default()
        });
        let back = swapchain(&mut backend);
        let alloc = backend.create_command_allocator().unwrap();

        let bad = Command::Barriers(vec![Barrier {
            resource: back[0],
            before: ResourceState::RenderTarget,
            after: ResourceState::Present,
        }]);
        assert!(matches!(
            backend.execute(alloc, &[bad]),
            Err(GpuError::DeviceRemoved(_))
        ));
        assert!(backend.signal(1).is_err());
    }

    #[test]
    fn present_in_render_target_state_removes_device() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            queue_latency: 0,
            ..HeadlessConfig::default()
        });
        let back = swapchain(&mut backend);
        let alloc = backend.create_command_allocator().unwrap();
        let to_rt = Command::Barriers(vec![Barrier {
            resource: back[0],
            before: ResourceState::Present,
            after: ResourceState::RenderTarget,
        }]);
        backend.execute(alloc, &[to_rt]).unwrap();
        assert!(matches!(backend.present(1), Err(GpuError::DeviceRemoved(_))));
    }

    #[test]
    fn present_rotates_back_buffers() {
        let mut backend = HeadlessBackend::default();
        swapchain(&mut backend);
        assert_eq!(backend.current_back_buffer_index(), 0);
        backend.present(1).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 1);
        backend.present(1).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 0);
        assert_eq!(backend.probe().presents(), 2);
    }

    #[test]
    fn readback_not_ready_while_copy_pending() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            queue_latency: 4,
            ..HeadlessConfig::default()
        });
        let back = swapchain(&mut backend);
        let readback = backend
            .create_buffer(&BufferDesc {
                label: "readback",
                size: 512,
                heap: HeapKind::Readback,
            })
            .unwrap();
        let alloc = backend.create_command_allocator().unwrap();
        let layout = crate::device::TextureCopyLayout::new(2, 2, crate::device::Format::Rgba8Unorm);
        backend
            .execute(
                alloc,
                &[Command::CopyTextureToBuffer {
                    src: back[0],
                    dst: readback,
                    layout,
                }],
            )
            .unwrap();

        let mut out = [0u8; 4];
        assert!(matches!(
            backend.read_buffer(readback, 0, &mut out),
            Err(GpuError::ReadbackNotReady(_))
        ));
    }

    #[test]
    fn queued_copies_and_clears_land_on_retire() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            queue_latency: 1,
            ..HeadlessConfig::default()
        });
        let back = swapchain(&mut backend);
        let rtv = CpuDescriptor(0x40);
        backend.create_render_target_view(back[0], rtv).unwrap();
        let buffer = |backend: &mut HeadlessBackend, heap| {
            backend
                .create_buffer(&BufferDesc {
                    label: "copy",
                    size: 4,
                    heap,
                })
                .unwrap()
        };
        let src = buffer(&mut backend, HeapKind::Upload);
        let dst = buffer(&mut backend, HeapKind::Readback);
        backend.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();
        let alloc = backend.create_command_allocator().unwrap();

        backend
            .execute(
                alloc,
                &[
                    Command::CopyBuffer {
                        dst,
                        dst_offset: 0,
                        src,
                        src_offset: 0,
                        size: 4,
                    },
                    Command::Barriers(vec![Barrier {
                        resource: back[0],
                        before: ResourceState::Present,
                        after: ResourceState::RenderTarget,
                    }]),
                    Command::ClearRenderTarget {
                        target: back[0],
                        rtv,
                        color: [1.0, 0.0, 0.0, 1.0],
                    },
                ],
            )
            .unwrap();
        backend.signal(1).unwrap();
        assert_eq!(backend.pending_ops(), 2);
        assert_eq!(backend.buffer_contents(dst), Some(&[0u8; 4][..]));
        assert_eq!(backend.texture_pixels(back[0]), Some(&[0u8; 16][..]));

        backend.wait_for_value(1).unwrap();
        assert_eq!(backend.pending_ops(), 0);
        assert_eq!(backend.buffer_contents(dst), Some(&[1u8, 2, 3, 4][..]));
        let pixels = backend.texture_pixels(back[0]).unwrap();
        assert!(pixels.chunks_exact(4).all(|px| px == [255, 0, 0, 255]));
    }

    #[test]
    fn copy_into_upload_buffer_removes_device() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            queue_latency: 0,
            ..HeadlessConfig::default()
        });
        let desc = BufferDesc {
            label: "upload",
            size: 4,
            heap: HeapKind::Upload,
        };
        let src = backend.create_buffer(&desc).unwrap();
        let dst = backend.create_buffer(&desc).unwrap();
        let alloc = backend.create_command_allocator().unwrap();
        let copy = Command::CopyBuffer {
            dst,
            dst_offset: 0,
            src,
            src_offset: 0,
            size: 4,
        };
        assert!(matches!(
            backend.execute(alloc, &[copy]),
            Err(GpuError::DeviceRemoved(_))
        ));
    }

    #[test]
    fn upload_buffers_only_accept_cpu_writes() {
        let mut backend = HeadlessBackend::default();
        let default = backend
            .create_buffer(&BufferDesc {
                label: "vb",
                size: 64,
                heap: HeapKind::Default,
            })
            .unwrap();
        assert!(backend.write_buffer(default, 0, &[1]).is_err());
    }
}
