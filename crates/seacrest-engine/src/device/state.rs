use std::collections::HashMap;

use super::backend::ResourceId;
use super::error::{GpuError, GpuResult};

/// Usage state of a GPU resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    CopySource,
    CopyDest,
    PixelShaderResource,
    VertexAndConstantBuffer,
    GenericRead,
    UnorderedAccess,
}

impl ResourceState {
    /// Whether two states map to the same native state.
    ///
    /// `Present` and `Common` share a value, so a transition between them is a
    /// bookkeeping change only and must not emit a barrier.
    pub fn is_same_native(self, other: ResourceState) -> bool {
        self.canonical() == other.canonical()
    }

    fn canonical(self) -> ResourceState {
        match self {
            ResourceState::Present => ResourceState::Common,
            other => other,
        }
    }
}

/// Resource transition declaration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Debug, Copy, Clone)]
struct Tracked {
    state: ResourceState,
    pinned: bool,
}

/// Current usage state of every live resource, as of the last submitted frame.
///
/// Resources on upload and readback heaps are registered as pinned: their
/// state is fixed at creation and any transition is rejected.
#[derive(Debug, Default)]
pub struct StateTracker {
    resources: HashMap<ResourceId, Tracked>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: ResourceId, initial: ResourceState) {
        self.resources.insert(
            resource,
            Tracked {
                state: initial,
                pinned: false,
            },
        );
    }

    pub fn register_pinned(&mut self, resource: ResourceId, state: ResourceState) {
        self.resources.insert(resource, Tracked { state, pinned: true });
    }

    pub fn unregister(&mut self, resource: ResourceId) {
        self.resources.remove(&resource);
    }

    pub fn state(&self, resource: ResourceId) -> GpuResult<ResourceState> {
        self.resources
            .get(&resource)
            .map(|t| t.state)
            .ok_or(GpuError::UnknownResource(resource))
    }

    pub fn is_pinned(&self, resource: ResourceId) -> bool {
        self.resources.get(&resource).is_some_and(|t| t.pinned)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Applies the final states of a submitted frame.
    pub(crate) fn commit<I>(&mut self, states: I)
    where
        I: IntoIterator<Item = (ResourceId, ResourceState)>,
    {
        for (resource, state) in states {
            if let Some(tracked) = self.resources.get_mut(&resource) {
                tracked.state = state;
            }
        }
    }
}

/// Per-frame view over a [`StateTracker`].
///
/// Transitions land in a local overlay so an abandoned recording leaves the
/// tracker untouched.
#[derive(Debug)]
pub(crate) struct StateOverlay<'a> {
    base: &'a StateTracker,
    pending: HashMap<ResourceId, ResourceState>,
}

impl<'a> StateOverlay<'a> {
    pub(crate) fn new(base: &'a StateTracker) -> Self {
        Self {
            base,
            pending: HashMap::new(),
        }
    }

    pub(crate) fn state(&self, resource: ResourceId) -> GpuResult<ResourceState> {
        match self.pending.get(&resource) {
            Some(state) => Ok(*state),
            None => self.base.state(resource),
        }
    }

    pub(crate) fn require(&self, resource: ResourceId, expected: ResourceState) -> GpuResult<()> {
        let actual = self.state(resource)?;
        if actual.is_same_native(expected) {
            return Ok(());
        }
        Err(GpuError::InvalidState {
            resource,
            expected,
            actual,
        })
    }

    /// Moves `resource` to `after`, returning the barrier to record (if any).
    pub(crate) fn transition(
        &mut self,
        resource: ResourceId,
        after: ResourceState,
    ) -> GpuResult<Option<Barrier>> {
        let before = self.state(resource)?;
        if before == after {
            return Ok(None);
        }
        if self.base.is_pinned(resource) {
            return Err(GpuError::PinnedState {
                resource,
                pinned: before,
                requested: after,
            });
        }

        self.pending.insert(resource, after);

        if before.is_same_native(after) {
            return Ok(None);
        }
        Ok(Some(Barrier {
            resource,
            before,
            after,
        }))
    }

    pub(crate) fn into_pending(self) -> HashMap<ResourceId, ResourceState> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RT: ResourceId = ResourceId(1);
    const UPLOAD: ResourceId = ResourceId(2);

    fn tracker() -> StateTracker {
        let mut t = StateTracker::new();
        t.register(RT, ResourceState::Present);
        t.register_pinned(UPLOAD, ResourceState::GenericRead);
        t
    }

    #[test]
    fn transition_emits_barrier_with_before_state() {
        let t = tracker();
        let mut overlay = StateOverlay::new(&t);
        let barrier = overlay
            .transition(RT, ResourceState::RenderTarget)
            .unwrap()
            .unwrap();
        assert_eq!(barrier.before, ResourceState::Present);
        assert_eq!(barrier.after, ResourceState::RenderTarget);
        assert_eq!(overlay.state(RT).unwrap(), ResourceState::RenderTarget);
    }

    #[test]
    fn same_state_is_a_no_op() {
        let t = tracker();
        let mut overlay = StateOverlay::new(&t);
        assert!(overlay.transition(RT, ResourceState::Present).unwrap().is_none());
    }

    #[test]
    fn present_and_common_share_a_native_state() {
        let t = tracker();
        let mut overlay = StateOverlay::new(&t);
        assert!(overlay.transition(RT, ResourceState::Common).unwrap().is_none());
        assert_eq!(overlay.state(RT).unwrap(), ResourceState::Common);
        overlay.require(RT, ResourceState::Present).unwrap();
    }

    #[test]
    fn pinned_resources_reject_transitions() {
        let t = tracker();
        let mut overlay = StateOverlay::new(&t);
        let err = overlay
            .transition(UPLOAD, ResourceState::CopyDest)
            .unwrap_err();
        assert!(matches!(err, GpuError::PinnedState { .. }));
    }

    #[test]
    fn overlay_does_not_touch_tracker_until_commit() {
        let mut t = tracker();
        let pending = {
            let mut overlay = StateOverlay::new(&t);
            overlay.transition(RT, ResourceState::CopySource).unwrap();
            overlay.into_pending()
        };
        assert_eq!(t.state(RT).unwrap(), ResourceState::Present);
        t.commit(pending);
        assert_eq!(t.state(RT).unwrap(), ResourceState::CopySource);
    }

    #[test]
    fn require_reports_actual_state() {
        let t = tracker();
        let overlay = StateOverlay::new(&t);
        match overlay.require(RT, ResourceState::RenderTarget) {
            Err(GpuError::InvalidState { actual, .. }) => assert_eq!(actual, ResourceState::Present),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_resource_is_an_error() {
        let t = tracker();
        let overlay = StateOverlay::new(&t);
        assert!(matches!(
            overlay.state(ResourceId(99)),
            Err(GpuError::UnknownResource(_))
        ));
    }
}
