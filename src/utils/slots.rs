/// Per-slot delivery status within a window.
///
/// A slot is exactly one of empty, buffered-unacked, received, or
/// discarded. Received and discarded are only ever set for a slot that
/// holds a buffered value, and are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Buffered,
    Received,
    Discarded,
}

/// Fixed-size arena indexed by window-relative slot.
///
/// Holds an owned value per occupied slot plus the two parallel status
/// vectors. The absolute sequence number of slot `i` is
/// `first_seq_num + i`; the arena itself only knows relative indices.
pub struct SlotArena<T> {
    slots: Vec<Option<T>>,
    received: Vec<bool>,
    discarded: Vec<bool>,
}

impl<T> SlotArena<T> {
    fn check_rep(&self) {
        assert_eq!(self.slots.len(), self.received.len());
        assert_eq!(self.slots.len(), self.discarded.len());
        for i in 0..self.slots.len() {
            if self.received[i] || self.discarded[i] {
                assert!(self.slots[i].is_some());
                assert!(!(self.received[i] && self.discarded[i]));
            }
        }
    }

    #[must_use]
    pub fn new(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        let this = SlotArena {
            slots,
            received: vec![false; size],
            discarded: vec![false; size],
        };
        this.check_rep();
        this
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<&T> {
        self.slots[i].as_ref()
    }

    #[must_use]
    pub fn get_mut(&mut self, i: usize) -> Option<&mut T> {
        self.slots[i].as_mut()
    }

    /// Places a value into an empty slot. Returns the value back if the
    /// slot is already occupied; the caller decides whether that is fatal.
    pub fn occupy(&mut self, i: usize, v: T) -> Result<(), T> {
        if self.slots[i].is_some() {
            return Err(v);
        }
        self.slots[i] = Some(v);
        self.check_rep();
        Ok(())
    }

    pub fn take(&mut self, i: usize) -> Option<T> {
        let v = self.slots[i].take();
        self.received[i] = false;
        self.discarded[i] = false;
        self.check_rep();
        v
    }

    #[must_use]
    pub fn status(&self, i: usize) -> SlotStatus {
        if self.received[i] {
            SlotStatus::Received
        } else if self.discarded[i] {
            SlotStatus::Discarded
        } else if self.slots[i].is_some() {
            SlotStatus::Buffered
        } else {
            SlotStatus::Empty
        }
    }

    #[must_use]
    pub fn is_received(&self, i: usize) -> bool {
        self.received[i]
    }

    #[must_use]
    pub fn is_discarded(&self, i: usize) -> bool {
        self.discarded[i]
    }

    pub fn mark_received(&mut self, i: usize) {
        assert!(self.slots[i].is_some());
        assert!(!self.discarded[i]);
        self.received[i] = true;
        self.check_rep();
    }

    pub fn mark_discarded(&mut self, i: usize) {
        assert!(self.slots[i].is_some());
        assert!(!self.received[i]);
        self.discarded[i] = true;
        self.check_rep();
    }

    /// Shifts every slot and its status down by `k`, clearing the `k`
    /// vacated slots at the tail. Slots below `k` must have been taken
    /// out beforehand.
    pub fn shift_down(&mut self, k: usize) {
        if k == 0 {
            return;
        }
        let size = self.slots.len();
        assert!(k <= size);
        for i in 0..k {
            assert!(self.slots[i].is_none());
        }
        for i in k..size {
            self.slots[i - k] = self.slots[i].take();
            self.received[i - k] = self.received[i];
            self.discarded[i - k] = self.discarded[i];
            self.received[i] = false;
            self.discarded[i] = false;
        }
        self.check_rep();
    }

    /// Count of leading slots that are either received or discarded,
    /// scanning at most `extent` slots.
    #[must_use]
    pub fn leading_handled(&self, extent: usize) -> usize {
        let mut k = 0;
        for i in 0..extent.min(self.slots.len()) {
            if self.received[i] || self.discarded[i] {
                k += 1;
            } else {
                break;
            }
        }
        k
    }
}

#[cfg(test)]
mod tests {
    use super::{SlotArena, SlotStatus};

    #[test]
    fn occupy_and_mark() {
        let mut arena: SlotArena<u8> = SlotArena::new(4);
        assert_eq!(arena.status(0), SlotStatus::Empty);

        arena.occupy(0, 10).unwrap();
        assert_eq!(arena.status(0), SlotStatus::Buffered);

        assert!(arena.occupy(0, 11).is_err());

        arena.mark_received(0);
        assert_eq!(arena.status(0), SlotStatus::Received);

        assert_eq!(arena.take(0), Some(10));
        assert_eq!(arena.status(0), SlotStatus::Empty);
    }

    #[test]
    fn shift_preserves_status() {
        let mut arena: SlotArena<u8> = SlotArena::new(4);
        for i in 0..3 {
            arena.occupy(i, i as u8).unwrap();
        }
        arena.mark_received(0);
        arena.mark_discarded(1);
        arena.mark_received(2);

        assert_eq!(arena.leading_handled(3), 3);

        arena.take(0);
        arena.take(1);
        arena.shift_down(2);

        assert_eq!(arena.get(0), Some(&2));
        assert!(arena.is_received(0));
        assert_eq!(arena.status(1), SlotStatus::Empty);
        assert_eq!(arena.status(3), SlotStatus::Empty);
    }

    #[test]
    fn leading_handled_stops_at_hole() {
        let mut arena: SlotArena<u8> = SlotArena::new(4);
        arena.occupy(0, 0).unwrap();
        arena.occupy(2, 2).unwrap();
        arena.mark_received(0);
        arena.mark_received(2);
        assert_eq!(arena.leading_handled(4), 1);
    }
}
