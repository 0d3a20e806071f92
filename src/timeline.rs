use std::sync::atomic::{AtomicUsize, Ordering};

/// Timing shared by every track of a session.
///
/// The base length is set once per session (or per clear cycle) by the
/// first track that finishes a loop. The read cursor shadows the tracks'
/// own cursors: it is used for display and to start new tracks in phase,
/// never for mixing.
#[derive(Debug, Default)]
pub struct TimelineCoordinator {
    base_length: AtomicUsize,
    read_cursor: AtomicUsize,
}

impl TimelineCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base length if none is set yet. The first committer wins;
    /// returns whether this call was it.
    pub fn set_base_length(&self, length: usize) -> bool {
        if length == 0 {
            return false;
        }
        self.base_length
            .compare_exchange(0, length, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn base_length(&self) -> usize {
        self.base_length.load(Ordering::Acquire)
    }

    pub fn has_base_length(&self) -> bool {
        self.base_length() > 0
    }

    /// Forgets the base length and rewinds the cursor.
    pub fn reset_base_length(&self) {
        self.base_length.store(0, Ordering::Release);
        self.read_cursor.store(0, Ordering::Release);
    }

    pub fn read_cursor(&self) -> usize {
        self.read_cursor.load(Ordering::Acquire)
    }

    pub fn reset_read_cursor(&self) {
        self.read_cursor.store(0, Ordering::Release);
    }

    /// Adds `samples` to the cursor, wrapping at the base length.
    ///
    /// Only the audio thread calls this, so a plain load/store pair is enough.
    pub fn advance_read_cursor(&self, samples: usize) {
        let base = self.base_length();
        let mut position = self.read_cursor() + samples;
        if base > 0 && position >= base {
            position %= base;
        }
        self.read_cursor.store(position, Ordering::Release);
    }

    pub fn wrapped_read_cursor(&self) -> usize {
        let base = self.base_length();
        let position = self.read_cursor();
        if base > 0 { position % base } else { position }
    }

    pub fn would_exceed_base_length(&self, position: usize) -> bool {
        let base = self.base_length();
        base > 0 && position >= base
    }
}
