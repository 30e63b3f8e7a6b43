use parking_lot::Mutex;

use crate::common::FrameId;

/// Doubly linked list over dense frame ids. Frame ids double as node
/// indices, which keeps every operation O(1) without heap churn.
struct LruState {
    /// Most-recently-unpinned end
    head: Option<FrameId>,
    /// Least-recently-unpinned end (victims come from here)
    tail: Option<FrameId>,
    prev: Vec<Option<FrameId>>,
    next: Vec<Option<FrameId>>,
    present: Vec<bool>,
    len: usize,
}

impl LruState {
    fn new(num_frames: usize) -> Self {
        Self {
            head: None,
            tail: None,
            prev: vec![None; num_frames],
            next: vec![None; num_frames],
            present: vec![false; num_frames],
            len: 0,
        }
    }

    fn push_front(&mut self, frame_id: FrameId) {
        let i = frame_id.as_usize();
        self.prev[i] = None;
        self.next[i] = self.head;
        match self.head {
            Some(old) => self.prev[old.as_usize()] = Some(frame_id),
            None => self.tail = Some(frame_id),
        }
        self.head = Some(frame_id);
        self.present[i] = true;
        self.len += 1;
    }

    fn unlink(&mut self, frame_id: FrameId) {
        let i = frame_id.as_usize();
        match self.prev[i] {
            Some(p) => self.next[p.as_usize()] = self.next[i],
            None => self.head = self.next[i],
        }
        match self.next[i] {
            Some(n) => self.prev[n.as_usize()] = self.prev[i],
            None => self.tail = self.prev[i],
        }
        self.prev[i] = None;
        self.next[i] = None;
        self.present[i] = false;
        self.len -= 1;
    }
}

/// LRU replacement policy.
///
/// Tracks eviction-eligible frames in the order they became eligible. A
/// frame enters candidacy when its pin count drops to zero (`unpin`), leaves
/// on `pin` or `victim`, and redundant unpins do not move it - the first
/// unpin wins its position.
pub struct LruReplacer {
    num_frames: usize,
    state: Mutex<LruState>,
}

impl LruReplacer {
    /// Creates a replacer able to track frames `0..num_frames`.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            state: Mutex::new(LruState::new(num_frames)),
        }
    }

    /// Removes and returns the least-recently-unpinned frame, or None if no
    /// frame is eligible.
    pub fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let frame_id = state.tail?;
        state.unlink(frame_id);
        Some(frame_id)
    }

    /// Removes the frame from eviction candidacy. No-op if absent.
    pub fn pin(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.num_frames {
            return;
        }
        let mut state = self.state.lock();
        if state.present[frame_id.as_usize()] {
            state.unlink(frame_id);
        }
    }

    /// Makes the frame eligible for eviction at the most-recently-used end.
    /// No-op if it is already eligible.
    pub fn unpin(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.num_frames {
            return;
        }
        let mut state = self.state.lock();
        if !state.present[frame_id.as_usize()] {
            state.push_front(frame_id);
        }
    }

    /// Returns the number of eviction-eligible frames.
    pub fn size(&self) -> usize {
        self.state.lock().len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_empty() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_victim_order() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));
        replacer.unpin(FrameId::new(3));
        assert_eq!(replacer.size(), 3);

        // Least recently unpinned first
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), Some(FrameId::new(3)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_lru_replacer_pin_removes() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));
        replacer.pin(FrameId::new(1));

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    }

    #[test]
    fn test_lru_replacer_pin_absent_is_noop() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.pin(FrameId::new(5));

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    }

    #[test]
    fn test_lru_replacer_first_unpin_wins() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));
        // Redundant unpin must not move frame 1 to the MRU end
        replacer.unpin(FrameId::new(1));

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
    }

    #[test]
    fn test_lru_replacer_reinsert_after_pin() {
        let replacer = LruReplacer::new(10);

        replacer.unpin(FrameId::new(1));
        replacer.unpin(FrameId::new(2));
        replacer.pin(FrameId::new(1));
        replacer.unpin(FrameId::new(1));

        // Frame 1 re-entered candidacy after frame 2
        assert_eq!(replacer.victim(), Some(FrameId::new(2)));
        assert_eq!(replacer.victim(), Some(FrameId::new(1)));
    }
}
