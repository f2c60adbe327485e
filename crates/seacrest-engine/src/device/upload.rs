use super::backend::{Backend, BufferDesc, HeapKind, ResourceId};
use super::error::{GpuError, GpuResult};

/// Alignment of constant buffer views.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Sub-range of the upload ring handed out for one frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UploadAllocation {
    /// GPU virtual address, usable as a root CBV or vertex buffer location.
    pub address: u64,
    /// Offset from the start of the ring buffer.
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, Default)]
struct Region {
    /// Fence value of the last frame that wrote this region.
    fence: u64,
}

/// Upload-heap buffer split into one region per frame slot.
///
/// A region is only written after the fence of the frame that last used it
/// has been reached. Writes made while recording are staged and copied into
/// mapped memory right before submission.
#[derive(Debug)]
pub struct UploadRing {
    buffer: ResourceId,
    base_address: u64,
    per_frame: u64,
    regions: Vec<Region>,
    active: Option<usize>,
    cursor: u64,
    staged: Vec<(u64, Vec<u8>)>,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl UploadRing {
    pub fn new(backend: &mut dyn Backend, per_frame: u64, frames: usize) -> GpuResult<Self> {
        let per_frame = align_up(per_frame.max(1), CONSTANT_BUFFER_ALIGNMENT);
        let buffer = backend.create_buffer(&BufferDesc {
            label: "seacrest upload ring",
            size: per_frame * frames as u64,
            heap: HeapKind::Upload,
        })?;
        let base_address = backend.buffer_address(buffer)?;

        Ok(Self {
            buffer,
            base_address,
            per_frame,
            regions: vec![Region::default(); frames],
            active: None,
            cursor: 0,
            staged: Vec::new(),
        })
    }

    pub fn buffer(&self) -> ResourceId {
        self.buffer
    }

    pub fn per_frame(&self) -> u64 {
        self.per_frame
    }

    /// Opens `slot`'s region for writing.
    pub fn begin_frame(&mut self, slot: usize, completed: u64) -> GpuResult<()> {
        let region = self.regions[slot];
        if region.fence > completed {
            return Err(GpuError::UploadInFlight {
                slot,
                fence: region.fence,
                completed,
            });
        }
        self.active = Some(slot);
        self.cursor = 0;
        self.staged.clear();
        Ok(())
    }

    pub fn push(&mut self, bytes: &[u8]) -> GpuResult<UploadAllocation> {
        let slot = self
            .active
            .ok_or_else(|| GpuError::Binding("upload outside of a frame".into()))?;

        let size = bytes.len() as u64;
        let start = align_up(self.cursor, CONSTANT_BUFFER_ALIGNMENT);
        if start + size > self.per_frame {
            return Err(GpuError::UploadOutOfSpace {
                requested: size,
                remaining: self.per_frame.saturating_sub(start),
            });
        }

        let offset = slot as u64 * self.per_frame + start;
        self.staged.push((offset, bytes.to_vec()));
        self.cursor = start + size;

        Ok(UploadAllocation {
            address: self.base_address + offset,
            offset,
            size,
        })
    }

    /// Copies staged writes into the mapped buffer.
    pub(crate) fn flush(&mut self, backend: &mut dyn Backend) -> GpuResult<()> {
        for (offset, data) in self.staged.drain(..) {
            backend.write_buffer(self.buffer, offset, &data)?;
        }
        Ok(())
    }

    /// Closes the active region; it stays locked until `fence` is reached.
    pub(crate) fn end_frame(&mut self, fence: u64) {
        if let Some(slot) = self.active.take() {
            self.regions[slot].fence = fence;
        }
    }

    /// Drops a recording that was never submitted.
    pub(crate) fn abandon(&mut self) {
        self.active = None;
        self.staged.clear();
    }

    /// Forgets region fences. Only valid once the GPU is idle.
    pub(crate) fn reset(&mut self) {
        self.abandon();
        self.regions.iter_mut().for_each(|r| r.fence = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::HeadlessBackend;

    #[test]
    fn regions_are_disjoint_per_slot() {
        let mut backend = HeadlessBackend::default();
        let mut ring = UploadRing::new(&mut backend, 512, 2).unwrap();

        ring.begin_frame(0, 0).unwrap();
        let a = ring.push(&[1; 16]).unwrap();
        ring.end_frame(1);

        ring.begin_frame(1, 0).unwrap();
        let b = ring.push(&[2; 16]).unwrap();
        assert_eq!(b.offset - a.offset, 512);
    }

    #[test]
    fn region_locked_until_fence_reached() {
        let mut backend = HeadlessBackend::default();
        let mut ring = UploadRing::new(&mut backend, 256, 2).unwrap();

        ring.begin_frame(0, 0).unwrap();
        ring.end_frame(3);

        assert!(matches!(
            ring.begin_frame(0, 2),
            Err(GpuError::UploadInFlight { slot: 0, fence: 3, completed: 2 })
        ));
        ring.begin_frame(0, 3).unwrap();
    }

    #[test]
    fn out_of_space_reports_remaining() {
        let mut backend = HeadlessBackend::default();
        let mut ring = UploadRing::new(&mut backend, 300, 1).unwrap();
        assert_eq!(ring.per_frame(), 512);

        ring.begin_frame(0, 0).unwrap();
        ring.push(&[0; 300]).unwrap();
        assert!(matches!(
            ring.push(&[0; 300]),
            Err(GpuError::UploadOutOfSpace { requested: 300, remaining: 0 })
        ));
    }

    #[test]
    fn flush_writes_into_the_buffer() {
        let mut backend = HeadlessBackend::default();
        let mut ring = UploadRing::new(&mut backend, 256, 1).unwrap();
        ring.begin_frame(0, 0).unwrap();
        ring.push(&[7, 8, 9]).unwrap();
        ring.flush(&mut backend).unwrap();

        assert_eq!(&backend.buffer_contents(ring.buffer()).unwrap()[..3], &[7, 8, 9]);
    }

    #[test]
    fn push_outside_frame_fails() {
        let mut backend = HeadlessBackend::default();
        let mut ring = UploadRing::new(&mut backend, 256, 1).unwrap();
        assert!(ring.push(&[0]).is_err());
    }
}
