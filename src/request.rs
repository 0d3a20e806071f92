use std::sync::atomic::{AtomicBool, Ordering};

/// A single pending edge request, raised by the control thread and consumed
/// by the audio thread.
///
/// Raising is idempotent: any number of `raise` calls between two `take`
/// calls collapse into one request.
#[derive(Debug, Default)]
pub struct RequestSlot {
    pending: AtomicBool,
}

impl RequestSlot {
    pub const fn new() -> Self {
        RequestSlot {
            pending: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Consumes the request. Returns `true` exactly once per raised edge.
    #[inline]
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}
