use parking_lot::Mutex;

use crate::frame::TransportFrame;

pub const POOL_SIZE_INITIAL: usize = 10;
pub const POOL_SIZE_MAX: usize = 100;

/// Bounded free list of relay frames.
///
/// Obtaining from an empty pool allocates a fresh frame; releasing into a
/// full pool discards the frame. The pool never retains more than
/// [`POOL_SIZE_MAX`] frames.
pub struct TransportMessagePool {
    frames: Mutex<Vec<TransportFrame>>,
}

impl Default for TransportMessagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportMessagePool {
    pub fn new() -> Self {
        let mut frames = Vec::with_capacity(POOL_SIZE_INITIAL);
        frames.resize_with(POOL_SIZE_INITIAL, TransportFrame::new);
        Self {
            frames: Mutex::new(frames),
        }
    }

    pub fn obtain(&self) -> TransportFrame {
        self.frames.lock().pop().unwrap_or_else(TransportFrame::new)
    }

    /// Returns whether the frame was retained.
    pub fn release(&self, frame: TransportFrame) -> bool {
        let mut frames = self.frames.lock();
        if frames.len() >= POOL_SIZE_MAX {
            return false;
        }
        frames.push(frame);
        true
    }

    pub fn retained(&self) -> usize {
        self.frames.lock().len()
    }
}
