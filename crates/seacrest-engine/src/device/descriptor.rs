use super::backend::{Backend, DescriptorHeapId};
use super::error::{GpuError, GpuResult};

/// Kind of descriptor stored in a heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorHeapKind {
    Rtv,
    Dsv,
    CbvSrvUav,
    Sampler,
}

impl DescriptorHeapKind {
    /// RTV and DSV heaps are CPU-only.
    pub fn can_be_shader_visible(self) -> bool {
        matches!(self, DescriptorHeapKind::CbvSrvUav | DescriptorHeapKind::Sampler)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorHeapDesc {
    pub kind: DescriptorHeapKind,
    pub capacity: u32,
    pub shader_visible: bool,
}

/// CPU descriptor handle (an opaque address).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct CpuDescriptor(pub usize);

/// GPU descriptor handle; only exists for shader-visible heaps.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct GpuDescriptor(pub u64);

impl CpuDescriptor {
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as usize * increment as usize)
    }
}

impl GpuDescriptor {
    pub fn offset(self, index: u32, increment: u32) -> Self {
        Self(self.0 + index as u64 * increment as u64)
    }
}

/// Start handles of a heap as reported by the backend.
#[derive(Debug, Copy, Clone)]
pub struct HeapStart {
    pub id: DescriptorHeapId,
    pub cpu: CpuDescriptor,
    pub gpu: Option<GpuDescriptor>,
}

/// Allocated slot in a [`DescriptorHeap`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorSlot {
    pub index: u32,
    pub cpu: CpuDescriptor,
    pub gpu: Option<GpuDescriptor>,
}

/// Descriptor heap with slot allocation.
///
/// Freed slots are reused before the high-water mark grows.
#[derive(Debug)]
pub struct DescriptorHeap {
    desc: DescriptorHeapDesc,
    start: HeapStart,
    increment: u32,
    next: u32,
    free: Vec<u32>,
    live: Vec<bool>,
}

impl DescriptorHeap {
    pub fn new(backend: &mut dyn Backend, desc: DescriptorHeapDesc) -> GpuResult<Self> {
        if desc.capacity == 0 {
            return Err(GpuError::Unsupported("descriptor heap with zero capacity".into()));
        }
        if desc.shader_visible && !desc.kind.can_be_shader_visible() {
            return Err(GpuError::Unsupported(format!(
                "{:?} heaps cannot be shader visible",
                desc.kind
            )));
        }

        let start = backend.create_descriptor_heap(&desc)?;
        let increment = backend.descriptor_increment(desc.kind);

        Ok(Self {
            desc,
            start,
            increment,
            next: 0,
            free: Vec::new(),
            live: vec![false; desc.capacity as usize],
        })
    }

    pub fn id(&self) -> DescriptorHeapId {
        self.start.id
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.desc.kind
    }

    pub fn shader_visible(&self) -> bool {
        self.desc.shader_visible
    }

    pub fn capacity(&self) -> u32 {
        self.desc.capacity
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    /// Number of slots currently allocated.
    pub fn live(&self) -> u32 {
        self.live.iter().filter(|l| **l).count() as u32
    }

    pub fn cpu(&self, index: u32) -> CpuDescriptor {
        debug_assert!(index < self.desc.capacity);
        self.start.cpu.offset(index, self.increment)
    }

    pub fn gpu(&self, index: u32) -> Option<GpuDescriptor> {
        debug_assert!(index < self.desc.capacity);
        self.start.gpu.map(|g| g.offset(index, self.increment))
    }

    pub fn allocate(&mut self) -> GpuResult<DescriptorSlot> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.next < self.desc.capacity => {
                self.next += 1;
                self.next - 1
            }
            None => {
                return Err(GpuError::DescriptorHeapFull {
                    capacity: self.desc.capacity,
                });
            }
        };

        self.live[index as usize] = true;
        Ok(self.slot(index))
    }

    pub fn free(&mut self, slot: DescriptorSlot) -> GpuResult<()> {
        let index = slot.index;
        match self.live.get_mut(index as usize) {
            Some(live) if *live => {
                *live = false;
                self.free.push(index);
                Ok(())
            }
            _ => Err(GpuError::DescriptorDoubleFree { index }),
        }
    }

    fn slot(&self, index: u32) -> DescriptorSlot {
        DescriptorSlot {
            index,
            cpu: self.cpu(index),
            gpu: self.gpu(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessBackend;

    fn heap(kind: DescriptorHeapKind, capacity: u32, shader_visible: bool) -> GpuResult<DescriptorHeap> {
        let mut backend = HeadlessBackend::default();
        DescriptorHeap::new(
            &mut backend,
            DescriptorHeapDesc {
                kind,
                capacity,
                shader_visible,
            },
        )
    }

    #[test]
    fn handles_advance_by_increment() {
        let mut h = heap(DescriptorHeapKind::CbvSrvUav, 4, true).unwrap();
        let a = h.allocate().unwrap();
        let b = h.allocate().unwrap();
        assert_eq!(b.cpu.0 - a.cpu.0, h.increment() as usize);
        assert_eq!(b.gpu.unwrap().0 - a.gpu.unwrap().0, h.increment() as u64);
    }

    #[test]
    fn rtv_heaps_have_no_gpu_handles() {
        let mut h = heap(DescriptorHeapKind::Rtv, 2, false).unwrap();
        assert!(h.allocate().unwrap().gpu.is_none());
    }

    #[test]
    fn rtv_heap_cannot_be_shader_visible() {
        assert!(matches!(
            heap(DescriptorHeapKind::Rtv, 2, true),
            Err(GpuError::Unsupported(_))
        ));
    }

    #[test]
    fn exhaustion_and_reuse() {
        let mut h = heap(DescriptorHeapKind::Sampler, 2, true).unwrap();
        let a = h.allocate().unwrap();
        let _b = h.allocate().unwrap();
        assert!(matches!(h.allocate(), Err(GpuError::DescriptorHeapFull { capacity: 2 })));

        h.free(a).unwrap();
        let c = h.allocate().unwrap();
        assert_eq!(c.index, a.index);
        assert_eq!(h.live(), 2);
    }

    #[test]
    fn double_free_is_detected() {
        let mut h = heap(DescriptorHeapKind::CbvSrvUav, 2, false).unwrap();
        let a = h.allocate().unwrap();
        h.free(a).unwrap();
        assert!(matches!(h.free(a), Err(GpuError::DescriptorDoubleFree { index: 0 })));
    }
}
