//! The two per-connection AM entities.
//!
//! [`TxEntity`] fragments submitted units into window-sequenced fragments,
//! retransmits on timeout, and advances its window through the explicit
//! advance-request handshake. [`RxEntity`] reassembles fragments into
//! units, generates cumulative/bitmap acknowledgments, and answers
//! advance requests. One pair exists per logical channel; dropping an
//! entity purges all of its buffers and timers.

mod rx;
mod tx;

use crate::utils::Seq;

pub use rx::*;
pub use tx::*;

/// Upper-layer unit submitted for reliable delivery. The sequence number
/// is assigned by the upper layer and is unique per logical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdu {
    pub seq: Seq,
    pub payload: Vec<u8>,
}

/// Sliding-window descriptor shared by both entities.
///
/// `first` is the oldest unacknowledged (tx) or undelivered (rx) fragment,
/// `next` the next sequence number to allocate or expect. Invariant:
/// `next - first <= size`.
#[derive(Debug, Clone, Copy)]
pub struct WindowDesc {
    pub first: Seq,
    pub next: Seq,
    pub size: usize,
}

impl WindowDesc {
    #[must_use]
    pub fn new(size: usize) -> Self {
        WindowDesc {
            first: Seq::from_u32(0),
            next: Seq::from_u32(0),
            size,
        }
    }

    /// Slots currently spanned by the window.
    #[must_use]
    pub fn extent(&self) -> usize {
        self.next.sub_seq(self.first) as usize
    }

    /// Window-relative index of `seq`, if `seq` is at or above the floor.
    #[must_use]
    pub fn index_of(&self, seq: Seq) -> Option<usize> {
        if seq < self.first {
            return None;
        }
        Some(seq.sub_seq(self.first) as usize)
    }
}

/// Window-advance request bookkeeping: own counter for outgoing requests
/// and the newest request number issued, used to drop stale retry copies.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceDesc {
    pub next_seq: Seq,
    pub last_sent: Option<Seq>,
}

impl AdvanceDesc {
    #[must_use]
    pub fn new() -> Self {
        AdvanceDesc {
            next_seq: Seq::from_u32(0),
            last_sent: None,
        }
    }
}

impl Default for AdvanceDesc {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the unit currently being fragmented; reset once the whole
/// unit has been split.
#[derive(Debug, Clone, Copy)]
pub struct FragDesc {
    pub frag_unit: usize,
    pub total: u32,
    pub emitted: u32,
    pub first_seq: Seq,
}

impl FragDesc {
    #[must_use]
    pub fn new(frag_unit: usize) -> Self {
        assert!(frag_unit > 0);
        FragDesc {
            frag_unit,
            total: 0,
            emitted: 0,
            first_seq: Seq::from_u32(0),
        }
    }

    /// Number of fragments a unit of `len` bytes splits into.
    #[must_use]
    pub fn fragments_of(&self, len: usize) -> u32 {
        ((len + self.frag_unit - 1) / self.frag_unit) as u32
    }

    pub fn start(&mut self, len: usize, first_seq: Seq) {
        self.total = self.fragments_of(len);
        self.emitted = 0;
        self.first_seq = first_seq;
    }

    /// Counts an emitted fragment; returns true once the unit is done.
    pub fn add_fragment(&mut self) -> bool {
        self.emitted += 1;
        self.emitted >= self.total
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.emitted = 0;
        self.first_seq = Seq::from_u32(0);
    }
}

/// Fatal protocol-invariant breach. Never recoverable: the caller must
/// tear the affected connection down and report the violation.
#[derive(Debug, PartialEq, Eq)]
pub enum Violation {
    /// A fragment was directed at an already-occupied window slot.
    SlotOccupied { seq: Seq },
    /// An acknowledgment named a slot outside the transmit window.
    AckOutOfWindow { seq: Seq, first: Seq },
    /// A slot that must hold a buffered fragment was empty.
    MissingFragment { seq: Seq },
    /// A retransmission timer fired for an already-acknowledged fragment.
    TimeoutForAcked { seq: Seq },
    /// A timer fired for a fragment no longer inside the window.
    TimerOutOfWindow { seq: Seq, first: Seq },
    /// An already-discarded slot was asked to be discarded again.
    RedundantDiscard { seq: Seq },
    /// A received fragment fell beyond the receive window.
    FragmentOutOfWindow { seq: Seq, first: Seq },
    /// Fragments of the same unit disagree on total/first/last metadata,
    /// or adjacent fragments name units where siblings are required.
    GroupMismatch { seq: Seq, unit: Seq },
    /// A buffered fragment and a newcomer with the same sequence number
    /// belong to different units.
    OverlappingUnits { seq: Seq, buffered: Seq, incoming: Seq },
    /// An advance-request retry timer fired with no stored retry copy.
    UnknownAdvanceRetry { seq: Seq },
}

/// Notifications raised by the sender entity towards the lower layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The outbound buffer has data; the lower layer may pull.
    DataAvailable,
}
