use super::{InstanceId, MAX_REFIT_QUEUE};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefitRequest {
    pub instance: InstanceId,
    pub transform: Option<prism_graphics::Transform>,
    pub rebuild_blas: bool,
}

/// Bounded FIFO of pending refits.
#[derive(Debug, Default)]
pub struct RefitQueue {
    entries: Vec<RefitRequest>,
    overflow: bool,
}

impl RefitQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set once the queue has rejected a request since the last reset.
    pub fn has_overflowed(&self) -> bool {
        self.overflow
    }

    /// Returns `false` when the queue is at capacity.
    pub fn push(&mut self, request: RefitRequest) -> bool {
        if self.entries.len() >= MAX_REFIT_QUEUE {
            self.overflow = true;
            return false;
        }
        self.entries.push(request);
        true
    }

    /// Take every request, in insertion order.
    pub fn drain(&mut self) -> Vec<RefitRequest> {
        std::mem::take(&mut self.entries)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.overflow = false;
    }
}
