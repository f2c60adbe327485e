use crate::logging::CORE_TARGET;

use super::backend::Backend;
use super::error::{GpuError, GpuResult};

/// CPU-side view of the queue fence.
///
/// Values are handed out monotonically starting at 1; 0 means "never
/// submitted" and is always complete.
#[derive(Debug)]
pub struct FenceTimeline {
    next: u64,
    observed: u64,
}

impl Default for FenceTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceTimeline {
    pub fn new() -> Self {
        Self { next: 1, observed: 0 }
    }

    /// Last value enqueued on the GPU queue.
    pub fn last_signaled(&self) -> u64 {
        self.next - 1
    }

    /// Enqueues the next fence value and returns it.
    pub fn signal(&mut self, backend: &mut dyn Backend) -> GpuResult<u64> {
        let value = self.next;
        backend.signal(value)?;
        self.next += 1;
        Ok(value)
    }

    /// Reads the completed value, rejecting a fence that moved backwards.
    pub fn completed(&mut self, backend: &dyn Backend) -> GpuResult<u64> {
        let completed = backend.completed_value();
        if completed < self.observed {
            return Err(GpuError::FenceRegression {
                completed,
                observed: self.observed,
            });
        }
        self.observed = completed;
        Ok(completed)
    }

    pub fn is_reached(&mut self, backend: &dyn Backend, value: u64) -> GpuResult<bool> {
        Ok(value == 0 || self.completed(backend)? >= value)
    }

    /// Blocks until `value` is reached. Returns whether the CPU had to wait.
    pub fn wait(&mut self, backend: &mut dyn Backend, value: u64) -> GpuResult<bool> {
        if self.is_reached(backend, value)? {
            return Ok(false);
        }
        if value > self.last_signaled() {
            return Err(GpuError::FenceNeverSignaled(value));
        }

        log::trace!(target: CORE_TARGET, "waiting for fence {value}");
        backend.wait_for_value(value)?;

        if !self.is_reached(backend, value)? {
            return Err(GpuError::DeviceRemoved(format!(
                "fence wait for {value} returned early"
            )));
        }
        Ok(true)
    }

    /// Signals and waits, leaving the queue idle.
    pub fn flush(&mut self, backend: &mut dyn Backend) -> GpuResult<u64> {
        let value = self.signal(backend)?;
        self.wait(backend, value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::headless::{HeadlessBackend, HeadlessConfig};

    fn lagging(latency: usize) -> HeadlessBackend {
        HeadlessBackend::new(HeadlessConfig {
            queue_latency: latency,
            ..HeadlessConfig::default()
        })
    }

    #[test]
    fn values_start_at_one() {
        let mut backend = lagging(0);
        let mut fence = FenceTimeline::new();
        assert_eq!(fence.last_signaled(), 0);
        assert_eq!(fence.signal(&mut backend).unwrap(), 1);
        assert_eq!(fence.signal(&mut backend).unwrap(), 2);
    }

    #[test]
    fn zero_is_always_reached() {
        let mut backend = lagging(0);
        let mut fence = FenceTimeline::new();
        assert!(!fence.wait(&mut backend, 0).unwrap());
    }

    #[test]
    fn wait_blocks_only_when_needed() {
        let mut backend = lagging(0);
        let mut fence = FenceTimeline::new();
        let v = fence.signal(&mut backend).unwrap();
        assert!(!fence.wait(&mut backend, v).unwrap());
    }

    #[test]
    fn lagging_queue_forces_a_wait() {
        let mut backend = lagging(4);
        let mut fence = FenceTimeline::new();
        let alloc = backend.create_command_allocator().unwrap();
        backend.execute(alloc, &[]).unwrap();
        let v = fence.signal(&mut backend).unwrap();

        assert!(!fence.is_reached(&backend, v).unwrap());
        assert!(fence.wait(&mut backend, v).unwrap());
        assert!(fence.is_reached(&backend, v).unwrap());
    }

    #[test]
    fn waiting_on_unsignaled_value_fails() {
        let mut backend = lagging(0);
        let mut fence = FenceTimeline::new();
        assert!(matches!(
            fence.wait(&mut backend, 5),
            Err(GpuError::FenceNeverSignaled(5))
        ));
    }

    #[test]
    fn flush_leaves_queue_idle() {
        let mut backend = lagging(8);
        let mut fence = FenceTimeline::new();
        let alloc = backend.create_command_allocator().unwrap();
        for _ in 0..3 {
            backend.execute(alloc, &[]).unwrap();
        }
        let v = fence.flush(&mut backend).unwrap();
        assert_eq!(backend.completed_value(), v);
        backend.reset_command_allocator(alloc).unwrap();
    }
}
