use super::backend::{AllocatorId, Backend, ResourceId};
use super::descriptor::{CpuDescriptor, DescriptorHeap};
use super::error::{GpuError, GpuResult};

/// Per-frame resources for one swapchain buffer.
#[derive(Debug, Copy, Clone)]
pub struct FrameSlot {
    /// Allocator backing this slot's command list.
    pub allocator: AllocatorId,

    pub back_buffer: ResourceId,
    pub rtv: CpuDescriptor,

    /// Fence value of the last submission recorded through `allocator`.
    ///
    /// 0 when the slot has never been submitted.
    pub fence_value: u64,
}

/// Fixed ring of frame slots indexed by the swapchain's back-buffer index.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameRing {
    /// Creates one allocator and one RTV per back buffer.
    ///
    /// `rtv_heap` must hold at least `back_buffers.len()` free slots.
    pub fn new(
        backend: &mut dyn Backend,
        rtv_heap: &mut DescriptorHeap,
        back_buffers: &[ResourceId],
    ) -> GpuResult<Self> {
        let mut slots = Vec::with_capacity(back_buffers.len());
        for &back_buffer in back_buffers {
            let rtv = rtv_heap.allocate()?.cpu;
            backend.create_render_target_view(back_buffer, rtv)?;
            slots.push(FrameSlot {
                allocator: backend.create_command_allocator()?,
                back_buffer,
                rtv,
                fence_value: 0,
            });
        }

        Ok(Self {
            slots,
            current: backend.current_back_buffer_index() as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Highest fence value stored on any slot.
    pub fn latest_fence(&self) -> u64 {
        self.slots.iter().map(|s| s.fence_value).max().unwrap_or(0)
    }

    /// Moves to the slot the swapchain will render into next.
    pub fn advance_to(&mut self, index: u32) -> GpuResult<()> {
        let index = index as usize;
        if index >= self.slots.len() {
            return Err(GpuError::Unsupported(format!(
                "back buffer index {index} outside a ring of {}",
                self.slots.len()
            )));
        }
        self.current = index;
        Ok(())
    }

    /// Points the slots at new back buffers after a swapchain resize.
    ///
    /// The GPU must be idle. RTV handles are reused and fence values cleared.
    pub fn rebind(&mut self, backend: &mut dyn Backend, back_buffers: &[ResourceId]) -> GpuResult<()> {
        if back_buffers.len() != self.slots.len() {
            return Err(GpuError::Unsupported(format!(
                "resize changed buffer count from {} to {}",
                self.slots.len(),
                back_buffers.len()
            )));
        }
        for (slot, &back_buffer) in self.slots.iter_mut().zip(back_buffers) {
            backend.create_render_target_view(back_buffer, slot.rtv)?;
            slot.back_buffer = back_buffer;
            slot.fence_value = 0;
        }
        self.advance_to(backend.current_back_buffer_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::{Format, SwapchainDesc};
    use crate::device::descriptor::{DescriptorHeapDesc, DescriptorHeapKind};
    use crate::device::headless::HeadlessBackend;

    fn ring(backend: &mut HeadlessBackend, count: u32) -> (FrameRing, DescriptorHeap) {
        let back = backend
            .create_swapchain(&SwapchainDesc {
                width: 4,
                height: 4,
                buffer_count: count,
                format: Format::Rgba8Unorm,
            })
            .unwrap();
        let mut heap = DescriptorHeap::new(
            backend,
            DescriptorHeapDesc {
                kind: DescriptorHeapKind::Rtv,
                capacity: count,
                shader_visible: false,
            },
        )
        .unwrap();
        let ring = FrameRing::new(backend, &mut heap, &back).unwrap();
        (ring, heap)
    }

    #[test]
    fn one_allocator_and_rtv_per_slot() {
        let mut backend = HeadlessBackend::default();
        let (ring, heap) = ring(&mut backend, 3);
        assert_eq!(ring.len(), 3);
        assert_eq!(heap.live(), 3);

        let slots = ring.slots();
        assert_ne!(slots[0].allocator, slots[1].allocator);
        assert_ne!(slots[1].rtv, slots[2].rtv);
        assert!(slots.iter().all(|s| s.fence_value == 0));
    }

    #[test]
    fn advance_follows_back_buffer_index() {
        let mut backend = HeadlessBackend::default();
        let (mut ring, _heap) = ring(&mut backend, 2);
        assert_eq!(ring.current_index(), 0);

        ring.advance_to(1).unwrap();
        assert_eq!(ring.current().back_buffer, ring.slots()[1].back_buffer);
        assert!(ring.advance_to(2).is_err());
    }

    #[test]
    fn rebind_clears_fences_and_keeps_rtvs() {
        let mut backend = HeadlessBackend::default();
        let (mut ring, _heap) = ring(&mut backend, 2);
        ring.current_mut().fence_value = 5;
        let rtvs: Vec<_> = ring.slots().iter().map(|s| s.rtv).collect();
        assert_eq!(ring.latest_fence(), 5);

        let resized = backend.resize_swapchain(8, 8).unwrap();
        ring.rebind(&mut backend, &resized).unwrap();

        assert_eq!(ring.latest_fence(), 0);
        assert_eq!(ring.slots()[0].back_buffer, resized[0]);
        assert_eq!(rtvs, ring.slots().iter().map(|s| s.rtv).collect::<Vec<_>>());
    }
}
