use std::{
    collections::{BTreeMap, VecDeque},
    time::{Duration, Instant},
};

use log::{debug, error, trace, warn};

use crate::{
    protocol::{DataHdr, LinkKind, Pdu},
    timer::{TimerKind, TimerQueue},
    utils::{Seq, SlotArena},
};

use super::{AdvanceDesc, Event, FragDesc, Sdu, Violation, WindowDesc};

/// Sender side of an AM connection.
///
/// Owns the transmit window, the per-slot retry copies, the outbound
/// buffer drained by credit pulls, and the retransmission timer set.
pub struct TxEntity {
    sdu_queue: VecDeque<Sdu>,
    /// Unit currently being split; survives across calls so a unit larger
    /// than the whole window keeps emitting fragments as slots free.
    current: Option<Sdu>,
    wnd: WindowDesc,
    slots: SlotArena<Pdu>,
    outbound: VecDeque<Pdu>,
    advance_rtx: BTreeMap<Seq, Pdu>,
    advance: AdvanceDesc,
    frag: FragDesc,
    timers: TimerQueue,
    events: VecDeque<Event>,

    // stat
    stat: LocalStat,

    // const
    max_retx: u8,
    frag_rtx_timeout: Duration,
    ctrl_rtx_timeout: Duration,
    sdu_queue_cap: Option<usize>,
    link: LinkKind,
}

pub struct TxConfig {
    pub window_size: usize,
    pub frag_unit: usize,
    pub max_retx: u8,
    pub frag_rtx_timeout: Duration,
    pub ctrl_rtx_timeout: Duration,
    /// Optional bound on the submission queue. The engine itself imposes
    /// no limit; a bound is a policy choice of the caller.
    pub sdu_queue_cap: Option<usize>,
    pub link: LinkKind,
}

impl TxConfig {
    #[must_use]
    pub fn build(self) -> TxEntity {
        assert!(self.window_size > 0);
        let this = TxEntity {
            sdu_queue: VecDeque::new(),
            current: None,
            wnd: WindowDesc::new(self.window_size),
            slots: SlotArena::new(self.window_size),
            outbound: VecDeque::new(),
            advance_rtx: BTreeMap::new(),
            advance: AdvanceDesc::new(),
            frag: FragDesc::new(self.frag_unit),
            timers: TimerQueue::new(),
            events: VecDeque::new(),
            stat: LocalStat::default(),
            max_retx: self.max_retx,
            frag_rtx_timeout: self.frag_rtx_timeout,
            ctrl_rtx_timeout: self.ctrl_rtx_timeout,
            sdu_queue_cap: self.sdu_queue_cap,
            link: self.link,
        };
        this.check_rep();
        this
    }

    #[must_use]
    pub fn default() -> TxConfig {
        TxConfig {
            window_size: 16,
            frag_unit: 1024,
            max_retx: 3,
            frag_rtx_timeout: Duration::from_millis(2_000),
            ctrl_rtx_timeout: Duration::from_millis(2_000),
            sdu_queue_cap: None,
            link: LinkKind::Cellular,
        }
    }
}

#[derive(Debug)]
pub enum SubmitError {
    /// The caller-imposed submission bound was hit; the unit is returned.
    ChannelOverload(Sdu),
    /// The unit would split into more fragments than the wire header's
    /// fragment-count field can carry; the unit is returned.
    UnitTooLarge(Sdu),
    Violation(Violation),
}

/// Result of a credit pull.
#[derive(Debug, PartialEq, Eq)]
pub enum Pull {
    Pdu(Pdu),
    /// Non-consuming stand-in: the head-of-line PDU needs `wire_len`
    /// bytes of credit and stays queued for the next pull.
    Notice(CreditNotice),
}

#[derive(Debug, PartialEq, Eq)]
pub struct CreditNotice {
    pub seq: Seq,
    pub wire_len: usize,
}

#[derive(Default)]
struct LocalStat {
    units_submitted: u64,
    fragments_created: u64,
    retransmissions: u64,
    ctrl_retransmissions: u64,
    exhausted_units: u64,
    advance_requests: u64,
    acks: u64,
    stale_acks: u64,
    pulls: u64,
    credit_shortfalls: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TxStat {
    pub units_submitted: u64,
    pub fragments_created: u64,
    pub retransmissions: u64,
    pub ctrl_retransmissions: u64,
    pub exhausted_units: u64,
    pub advance_requests: u64,
    pub acks: u64,
    pub stale_acks: u64,
    pub pulls: u64,
    pub credit_shortfalls: u64,
    pub first_seq: Seq,
    pub next_seq: Seq,
}

impl TxEntity {
    #[inline]
    fn check_rep(&self) {
        assert!(self.wnd.extent() <= self.wnd.size);
        assert_eq!(self.slots.size(), self.wnd.size);
        if self.current.is_some() {
            assert!(self.frag.emitted < self.frag.total);
        }
        if let Some(cap) = self.sdu_queue_cap {
            assert!(self.sdu_queue.len() <= cap);
        }
    }

    #[must_use]
    pub fn stat(&self) -> TxStat {
        TxStat {
            units_submitted: self.stat.units_submitted,
            fragments_created: self.stat.fragments_created,
            retransmissions: self.stat.retransmissions,
            ctrl_retransmissions: self.stat.ctrl_retransmissions,
            exhausted_units: self.stat.exhausted_units,
            advance_requests: self.stat.advance_requests,
            acks: self.stat.acks,
            stale_acks: self.stat.stale_acks,
            pulls: self.stat.pulls,
            credit_shortfalls: self.stat.credit_shortfalls,
            first_seq: self.wnd.first,
            next_seq: self.wnd.next,
        }
    }

    #[must_use]
    pub fn first_seq(&self) -> Seq {
        self.wnd.first
    }

    #[must_use]
    pub fn next_seq(&self) -> Seq {
        self.wnd.next
    }

    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    #[must_use]
    pub fn pop_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Accepts a unit for reliable delivery and fills the window with as
    /// many of its fragments as fit.
    pub fn submit(&mut self, sdu: Sdu, now: Instant) -> Result<(), SubmitError> {
        if sdu.payload.is_empty() {
            trace!("tx: dropping empty unit {}", sdu.seq);
            return Ok(());
        }
        let count = self.frag.fragments_of(sdu.payload.len());
        if count > u32::from(u16::MAX) {
            warn!("tx: unit {} needs {} fragments, rejecting", sdu.seq, count);
            return Err(SubmitError::UnitTooLarge(sdu));
        }
        self.sdu_queue.push_back(sdu);
        self.fragment_and_fill(now)
            .map_err(SubmitError::Violation)?;
        // the bound applies to the backlog left after filling the window
        if let Some(cap) = self.sdu_queue_cap {
            if self.sdu_queue.len() > cap {
                let sdu = self.sdu_queue.pop_back().unwrap();
                warn!("tx: submission queue full, rejecting unit {}", sdu.seq);
                return Err(SubmitError::ChannelOverload(sdu));
            }
        }
        self.stat.units_submitted += 1;
        self.check_rep();
        Ok(())
    }

    /// Splits queued units into fragments while the window has room.
    ///
    /// Admission is all-or-nothing for a unit that can fit in an empty
    /// window: one whose fragment count exceeds the free space is
    /// deferred, never partially started. A unit larger than the whole
    /// window is admitted regardless, and its remaining fragments are
    /// emitted here as acknowledged slots free up.
    pub fn fragment_and_fill(&mut self, now: Instant) -> Result<(), Violation> {
        loop {
            let free = self.wnd.size - self.wnd.extent();
            if free == 0 {
                break;
            }
            if self.current.is_none() {
                let Some(sdu) = self.sdu_queue.front() else {
                    break;
                };
                let count = self.frag.fragments_of(sdu.payload.len());
                if count as usize > free && count as usize <= self.wnd.size {
                    trace!(
                        "tx: unit {} needs {} slots, {} free, deferring",
                        sdu.seq,
                        count,
                        free
                    );
                    break;
                }
                let sdu = self.sdu_queue.pop_front().unwrap();
                self.frag.start(sdu.payload.len(), self.wnd.next);
                debug!(
                    "tx: fragmenting unit {} ({} bytes) into {} fragments of {}",
                    sdu.seq,
                    sdu.payload.len(),
                    count,
                    self.frag.frag_unit
                );
                self.current = Some(sdu);
            }

            let sdu = self.current.take().unwrap();
            let first = self.frag.first_seq;
            let last = first.add_u32(self.frag.total - 1);
            let mut done = false;
            for _ in 0..free {
                let offset = self.frag.emitted as usize * self.frag.frag_unit;
                let end = (offset + self.frag.frag_unit).min(sdu.payload.len());
                let pdu = Pdu::Data {
                    hdr: DataHdr {
                        seq: self.wnd.next,
                        unit: sdu.seq,
                        total: self.frag.total as u16,
                        first,
                        last,
                        retx: 0,
                        link: self.link,
                    },
                    payload: sdu.payload[offset..end].to_vec(),
                };
                self.store_and_send(pdu, now)?;
                if self.frag.add_fragment() {
                    done = true;
                    break;
                }
            }
            if done {
                self.frag.reset();
            } else {
                self.current = Some(sdu);
            }
        }
        self.check_rep();
        Ok(())
    }

    /// Keeps a retry copy in the window slot, arms the retransmission
    /// timer, and hands the fragment to the outbound buffer.
    fn store_and_send(&mut self, pdu: Pdu, now: Instant) -> Result<(), Violation> {
        let seq = pdu.seq();
        let index = self.wnd.index_of(seq).unwrap();
        if self.slots.is_received(index) || self.slots.is_discarded(index) {
            error!("tx: slot {} already marked at fill time", seq);
            return Err(Violation::SlotOccupied { seq });
        }
        if self.slots.occupy(index, pdu.clone()).is_err() {
            error!("tx: slot {} already occupied", seq);
            return Err(Violation::SlotOccupied { seq });
        }
        self.timers
            .schedule(TimerKind::FragRetx, seq, now + self.frag_rtx_timeout);
        self.wnd.next.increment();
        self.stat.fragments_created += 1;
        self.buffer_pdu(pdu);
        Ok(())
    }

    /// Queues a PDU for the lower layer. A single pending-data event is
    /// raised on the empty-to-non-empty transition.
    fn buffer_pdu(&mut self, pdu: Pdu) {
        let was_empty = self.outbound.is_empty();
        trace!("tx: buffering {:?} pdu {}", pdu.kind(), pdu.seq());
        self.outbound.push_back(pdu);
        if was_empty {
            self.events.push_back(Event::DataAvailable);
        }
    }

    /// Credit pull from the lower layer: hands over the head-of-line PDU
    /// if it fits in `max_bytes`, otherwise a non-consuming stand-in
    /// notice. A successful hand-over that leaves data queued raises a
    /// pending-data event; a notice raises nothing, since the buffer
    /// state has not changed.
    #[must_use]
    pub fn pull(&mut self, max_bytes: usize) -> Option<Pull> {
        let head = self.outbound.front()?;
        if head.wire_len() > max_bytes {
            trace!(
                "tx: pdu {} needs {} bytes, {} granted",
                head.seq(),
                head.wire_len(),
                max_bytes
            );
            self.stat.credit_shortfalls += 1;
            return Some(Pull::Notice(CreditNotice {
                seq: head.seq(),
                wire_len: head.wire_len(),
            }));
        }
        let pdu = self.outbound.pop_front().unwrap();
        self.stat.pulls += 1;
        if !self.outbound.is_empty() {
            self.events.push_back(Event::DataAvailable);
        }
        Some(Pull::Pdu(pdu))
    }

    /// Dispatches every timer due at `now`.
    pub fn handle_timers(&mut self, now: Instant) -> Result<(), Violation> {
        while let Some((kind, key)) = self.timers.pop_due(now) {
            match kind {
                TimerKind::FragRetx => self.frag_timeout(key, now)?,
                TimerKind::AdvanceRetx => self.advance_timeout(key, now)?,
                TimerKind::StatusReport => unreachable!("not armed by the tx entity"),
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn frag_timeout(&mut self, seq: Seq, now: Instant) -> Result<(), Violation> {
        let Some(index) = self.wnd.index_of(seq) else {
            error!("tx: timer fired for {} below window floor {}", seq, self.wnd.first);
            return Err(Violation::TimerOutOfWindow {
                seq,
                first: self.wnd.first,
            });
        };
        if index >= self.wnd.size {
            error!("tx: timer fired for {} beyond the window", seq);
            return Err(Violation::TimerOutOfWindow {
                seq,
                first: self.wnd.first,
            });
        }
        if self.slots.is_received(index) {
            // ack must have canceled this timer
            return Err(Violation::TimeoutForAcked { seq });
        }
        let Some(Pdu::Data { hdr, .. }) = self.slots.get(index) else {
            return Err(Violation::MissingFragment { seq });
        };
        if u32::from(hdr.retx) + 1 > u32::from(self.max_retx) {
            debug!("tx: fragment {} exhausted {} retransmissions", seq, self.max_retx);
            self.discard_cascade(seq, now)
        } else {
            let Some(Pdu::Data { hdr, .. }) = self.slots.get_mut(index) else {
                unreachable!()
            };
            hdr.retx += 1;
            trace!("tx: retransmitting fragment {} (attempt {})", seq, hdr.retx);
            let copy = self.slots.get(index).unwrap().clone();
            self.timers
                .schedule(TimerKind::FragRetx, seq, now + self.frag_rtx_timeout);
            self.stat.retransmissions += 1;
            self.buffer_pdu(copy);
            Ok(())
        }
    }

    /// Discards a fragment that exhausted its retransmissions together
    /// with every sibling of the same parent unit, then checks whether
    /// the window can be advanced past the dead slots.
    fn discard_cascade(&mut self, seq: Seq, now: Instant) -> Result<(), Violation> {
        let index = self.wnd.index_of(seq).unwrap();
        if self.slots.is_discarded(index) {
            error!("tx: redundant discard of {}", seq);
            return Err(Violation::RedundantDiscard { seq });
        }
        let unit = match self.slots.get(index) {
            Some(Pdu::Data { hdr, .. }) => hdr.unit,
            _ => return Err(Violation::MissingFragment { seq }),
        };
        self.slots.mark_discarded(index);
        self.timers.cancel(TimerKind::FragRetx, seq);

        // forward scan over buffered siblings
        for i in index + 1..self.wnd.extent() {
            let sibling = matches!(
                self.slots.get(i),
                Some(Pdu::Data { hdr, .. }) if hdr.unit == unit
            );
            if !sibling {
                break;
            }
            if !self.slots.is_discarded(i) && !self.slots.is_received(i) {
                self.slots.mark_discarded(i);
                self.timers
                    .cancel(TimerKind::FragRetx, self.wnd.first.add_u32(i as u32));
            }
        }
        // backward scan; every slot below the window extent must be occupied
        for i in (0..index).rev() {
            let Some(slot) = self.slots.get(i) else {
                return Err(Violation::MissingFragment {
                    seq: self.wnd.first.add_u32(i as u32),
                });
            };
            let sibling = matches!(slot, Pdu::Data { hdr, .. } if hdr.unit == unit);
            if !sibling {
                break;
            }
            if !self.slots.is_discarded(i) && !self.slots.is_received(i) {
                self.slots.mark_discarded(i);
                self.timers
                    .cancel(TimerKind::FragRetx, self.wnd.first.add_u32(i as u32));
            }
        }
        self.stat.exhausted_units += 1;
        warn!("tx: dropped unit {} after retransmission exhaustion", unit);
        self.check_advance(now);
        Ok(())
    }

    /// Issues an advance request past the leading received/discarded run,
    /// unless an equal-or-newer request is already outstanding.
    pub fn check_advance(&mut self, now: Instant) {
        let k = self.slots.leading_handled(self.wnd.extent());
        if k == 0 {
            return;
        }
        let target = self.wnd.first.add_u32(k as u32);
        let outstanding = self.advance_rtx.values().any(|pdu| match pdu {
            Pdu::AdvanceRequest { floor, .. } => *floor >= target,
            _ => false,
        });
        if outstanding {
            trace!("tx: advance to {} already requested", target);
            return;
        }
        self.send_advance_request(target, now);
    }

    fn send_advance_request(&mut self, floor: Seq, now: Instant) {
        let seq = self.advance.next_seq;
        debug!("tx: requesting window advance [{}] to floor {}", seq, floor);
        let pdu = Pdu::AdvanceRequest { seq, floor };
        self.advance_rtx.insert(seq, pdu.clone());
        self.advance.last_sent = Some(seq);
        self.timers
            .schedule(TimerKind::AdvanceRetx, seq, now + self.ctrl_rtx_timeout);
        self.advance.next_seq.increment();
        self.stat.advance_requests += 1;
        self.buffer_pdu(pdu);
    }

    fn advance_timeout(&mut self, seq: Seq, now: Instant) -> Result<(), Violation> {
        if !self.advance_rtx.contains_key(&seq) {
            error!("tx: advance retry timer fired for unknown request {}", seq);
            return Err(Violation::UnknownAdvanceRetry { seq });
        }
        if self.advance.last_sent > Some(seq) {
            // superseded by a newer request
            trace!("tx: dropping stale advance retry {}", seq);
            self.advance_rtx.remove(&seq);
            return Ok(());
        }
        let copy = self.advance_rtx.get(&seq).unwrap().clone();
        debug!("tx: retransmitting advance request {}", seq);
        self.timers
            .schedule(TimerKind::AdvanceRetx, seq, now + self.ctrl_rtx_timeout);
        self.stat.ctrl_retransmissions += 1;
        self.buffer_pdu(copy);
        Ok(())
    }

    /// Feed for acknowledgment-side control PDUs arriving off the wire.
    pub fn on_control(&mut self, pdu: &Pdu, now: Instant) -> Result<(), Violation> {
        match pdu {
            Pdu::CumulativeAck { ack } => {
                self.recv_cumulative_ack(*ack, now)?;
            }
            Pdu::BitmapAck { ack, base, bits } => {
                self.recv_cumulative_ack(*ack, now)?;
                for (i, &bit) in bits.iter().enumerate() {
                    if bit {
                        self.recv_ack(base.add_u32(i as u32))?;
                    }
                }
            }
            Pdu::AdvanceAck { seq, floor } => {
                self.recv_advance_ack(*seq, *floor, now)?;
            }
            Pdu::Data { .. } | Pdu::AdvanceRequest { .. } => {
                warn!("tx: ignoring receiver-bound {:?} pdu", pdu.kind());
            }
        }
        self.check_rep();
        Ok(())
    }

    /// Per-fragment selective acknowledgment.
    fn recv_ack(&mut self, seq: Seq) -> Result<(), Violation> {
        let Some(index) = self.wnd.index_of(seq) else {
            // already shifted out, nothing to do
            self.stat.stale_acks += 1;
            return Ok(());
        };
        if index >= self.wnd.size {
            error!("tx: ack {} outside window at {}", seq, self.wnd.first);
            return Err(Violation::AckOutOfWindow {
                seq,
                first: self.wnd.first,
            });
        }
        if self.slots.is_received(index) || self.slots.is_discarded(index) {
            // duplicate, or the unit was already condemned locally
            return Ok(());
        }
        if self.slots.get(index).is_none() {
            return Err(Violation::MissingFragment { seq });
        }
        self.timers.cancel(TimerKind::FragRetx, seq);
        self.slots.mark_received(index);
        self.stat.acks += 1;
        Ok(())
    }

    /// Marks every slot up to `seq` received (idempotent), then checks
    /// advance eligibility.
    fn recv_cumulative_ack(&mut self, seq: Seq, now: Instant) -> Result<(), Violation> {
        if seq < self.wnd.first {
            // the peer has not yet seen our advance; stale, ignore
            self.stat.stale_acks += 1;
            return Ok(());
        }
        let upto = seq.sub_seq(self.wnd.first) as usize;
        if upto >= self.wnd.size {
            error!("tx: cumulative ack {} outside window at {}", seq, self.wnd.first);
            return Err(Violation::AckOutOfWindow {
                seq,
                first: self.wnd.first,
            });
        }
        for i in 0..=upto {
            if !self.slots.is_received(i) && !self.slots.is_discarded(i) {
                self.recv_ack(self.wnd.first.add_u32(i as u32))?;
            }
        }
        self.check_advance(now);
        Ok(())
    }

    /// Advance acknowledgment: shifts the window, releases acknowledged
    /// and discarded fragments, and admits deferred units into the freed
    /// space.
    fn recv_advance_ack(&mut self, req_seq: Seq, floor: Seq, now: Instant) -> Result<(), Violation> {
        self.move_window(floor, now)?;
        if self.advance_rtx.remove(&req_seq).is_some() {
            self.timers.cancel(TimerKind::AdvanceRetx, req_seq);
        } else {
            // ack for a retry copy already dropped as obsolete
            trace!("tx: advance ack {} has no retry copy", req_seq);
        }
        Ok(())
    }

    fn move_window(&mut self, new_first: Seq, now: Instant) -> Result<(), Violation> {
        if new_first <= self.wnd.first {
            // ineffective shift
            return Ok(());
        }
        let pos = new_first.sub_seq(self.wnd.first) as usize;
        let extent = self.wnd.extent();
        if pos > extent {
            error!(
                "tx: advance ack to {} beyond allocated extent at {}",
                new_first, self.wnd.first
            );
            return Err(Violation::AckOutOfWindow {
                seq: new_first,
                first: self.wnd.first,
            });
        }
        debug!("tx: moving window {} -> {}", self.wnd.first, new_first);
        for i in 0..pos {
            let seq = self.wnd.first.add_u32(i as u32);
            if self.slots.take(i).is_none() {
                return Err(Violation::MissingFragment { seq });
            }
            self.timers.cancel(TimerKind::FragRetx, seq);
        }
        for i in pos..extent {
            if self.slots.get(i).is_none() {
                return Err(Violation::MissingFragment {
                    seq: self.wnd.first.add_u32(i as u32),
                });
            }
        }
        self.slots.shift_down(pos);
        self.wnd.first = new_first;
        self.check_rep();
        self.fragment_and_fill(now)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::{
        entity::{Event, Sdu, Violation},
        protocol::Pdu,
        utils::Seq,
    };

    use super::{Pull, SubmitError, TxConfig};

    fn config(window_size: usize, frag_unit: usize) -> TxConfig {
        TxConfig {
            window_size,
            frag_unit,
            max_retx: 2,
            frag_rtx_timeout: Duration::from_millis(100),
            ctrl_rtx_timeout: Duration::from_millis(300),
            sdu_queue_cap: None,
            ..TxConfig::default()
        }
    }

    fn sdu(seq: u32, len: usize) -> Sdu {
        Sdu {
            seq: Seq::from_u32(seq),
            payload: vec![seq as u8; len],
        }
    }

    fn pulled(tx: &mut super::TxEntity) -> Pdu {
        match tx.pull(usize::MAX).unwrap() {
            Pull::Pdu(pdu) => pdu,
            Pull::Notice(_) => panic!(),
        }
    }

    #[test]
    fn fragments_with_short_tail() {
        // window 4, fragment unit 100, one 250-byte unit
        let mut tx = config(4, 100).build();
        let now = Instant::now();
        tx.submit(sdu(0, 250), now).unwrap();

        assert_eq!(tx.outbound_len(), 3);
        assert_eq!(tx.pop_event(), Some(Event::DataAvailable));
        assert_eq!(tx.pop_event(), None);

        let lens: Vec<usize> = (0..3)
            .map(|_| match pulled(&mut tx) {
                Pdu::Data { payload, .. } => payload.len(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(lens, vec![100, 100, 50]);
        assert_eq!(tx.next_seq(), Seq::from_u32(3));
    }

    #[test]
    fn insufficient_credit_yields_notice() {
        let mut tx = config(4, 100).build();
        let now = Instant::now();
        tx.submit(sdu(0, 250), now).unwrap();

        // 50 bytes of credit cannot carry a 100-byte fragment
        match tx.pull(50).unwrap() {
            Pull::Notice(notice) => {
                assert_eq!(notice.seq, Seq::from_u32(0));
                assert!(notice.wire_len > 50);
            }
            Pull::Pdu(_) => panic!(),
        }
        // the fragment stays queued
        assert_eq!(tx.outbound_len(), 3);
        match tx.pull(notice_len(&tx)).unwrap() {
            Pull::Pdu(pdu) => assert_eq!(pdu.seq(), Seq::from_u32(0)),
            Pull::Notice(_) => panic!(),
        }
    }

    fn notice_len(tx: &super::TxEntity) -> usize {
        tx.outbound.front().unwrap().wire_len()
    }

    #[test]
    fn defers_unit_that_does_not_fit() {
        let mut tx = config(4, 100).build();
        let now = Instant::now();
        tx.submit(sdu(0, 300), now).unwrap();
        // 2 fragments > 1 free slot: deferred, not partially started
        tx.submit(sdu(1, 200), now).unwrap();
        assert_eq!(tx.next_seq(), Seq::from_u32(3));
        assert_eq!(tx.outbound_len(), 3);
    }

    #[test]
    fn oversized_unit_trickles_through_window() {
        let mut tx = config(4, 100).build();
        let now = Instant::now();
        // 5 fragments in a 4-slot window: the first four go out at once
        tx.submit(sdu(0, 500), now).unwrap();
        assert_eq!(tx.next_seq(), Seq::from_u32(4));
        assert_eq!(tx.outbound_len(), 4);
        while tx.pull(usize::MAX).is_some() {}

        // acknowledging the first four frees a slot for the fifth
        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(3) }, now)
            .unwrap();
        tx.on_control(
            &Pdu::AdvanceAck {
                seq: Seq::from_u32(0),
                floor: Seq::from_u32(4),
            },
            now,
        )
        .unwrap();
        assert_eq!(tx.next_seq(), Seq::from_u32(5));

        let mut tail = false;
        while let Some(Pull::Pdu(pdu)) = tx.pull(usize::MAX) {
            if let Pdu::Data { hdr, payload } = pdu {
                assert_eq!(hdr.seq, Seq::from_u32(4));
                assert_eq!(hdr.total, 5);
                assert_eq!(hdr.last, Seq::from_u32(4));
                assert_eq!(payload.len(), 100);
                tail = true;
            }
        }
        assert!(tail);
    }

    #[test]
    fn unit_beyond_fragment_count_field_is_rejected() {
        let mut tx = config(4, 1).build();
        let now = Instant::now();
        match tx.submit(sdu(0, usize::from(u16::MAX) + 1), now) {
            Err(SubmitError::UnitTooLarge(returned)) => {
                assert_eq!(returned.seq, Seq::from_u32(0));
            }
            _ => panic!(),
        }
        // nothing was admitted
        assert_eq!(tx.next_seq(), Seq::from_u32(0));
        assert_eq!(tx.outbound_len(), 0);
    }

    #[test]
    fn notice_pull_raises_no_event() {
        let mut tx = config(4, 100).build();
        let now = Instant::now();
        tx.submit(sdu(0, 200), now).unwrap();
        assert_eq!(tx.pop_event(), Some(Event::DataAvailable));

        // under-credited pulls consume nothing and signal nothing
        for _ in 0..3 {
            assert!(matches!(tx.pull(10), Some(Pull::Notice(_))));
        }
        assert_eq!(tx.pop_event(), None);

        // a hand-over that leaves data behind re-raises the event
        assert!(matches!(tx.pull(usize::MAX), Some(Pull::Pdu(_))));
        assert_eq!(tx.pop_event(), Some(Event::DataAvailable));
    }

    #[test]
    fn submission_bound_rejects() {
        let mut tx = TxConfig {
            sdu_queue_cap: Some(0),
            ..config(1, 100)
        }
        .build();
        let now = Instant::now();
        // the first unit goes straight into the window, the queue stays empty
        tx.submit(sdu(0, 100), now).unwrap();
        // window full: the second unit would sit in the queue, which is bounded to 0
        match tx.submit(sdu(1, 100), now) {
            Err(SubmitError::ChannelOverload(returned)) => {
                assert_eq!(returned.seq, Seq::from_u32(1));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn timeout_retransmits_until_exhaustion_then_cascades() {
        let mut tx = config(8, 100).build();
        let mut now = Instant::now();
        tx.submit(sdu(0, 200), now).unwrap(); // fragments 0,1
        tx.submit(sdu(1, 200), now).unwrap(); // fragments 2,3
        while tx.pull(usize::MAX).is_some() {}

        // acknowledge fragments 0,1 so the window floor run is received
        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(1) }, now)
            .unwrap();
        // an advance request for floor 2 goes out
        assert_eq!(tx.stat().advance_requests, 1);
        while tx.pull(usize::MAX).is_some() {}

        // maxRetx = 2: two retransmissions, the third firing discards
        for _ in 0..3 {
            now += Duration::from_millis(150);
            tx.handle_timers(now).unwrap();
        }
        assert_eq!(tx.stat().retransmissions, 2 * 2); // both fragments of unit 1
        assert_eq!(tx.stat().exhausted_units, 1);

        // cascade marked fragment 3 (same parent) discarded too,
        // and a new advance request for floor 4 was issued
        let stat = tx.stat();
        assert_eq!(stat.advance_requests, 2);
        let floors: Vec<Seq> = drain_floors(&mut tx);
        assert!(floors.contains(&Seq::from_u32(4)));
    }

    fn drain_floors(tx: &mut super::TxEntity) -> Vec<Seq> {
        let mut floors = Vec::new();
        while let Some(pull) = tx.pull(usize::MAX) {
            if let Pull::Pdu(Pdu::AdvanceRequest { floor, .. }) = pull {
                floors.push(floor);
            }
        }
        floors
    }

    #[test]
    fn cumulative_ack_is_idempotent_and_triggers_advance() {
        let mut tx = config(8, 100).build();
        let now = Instant::now();
        for i in 0..6 {
            tx.submit(sdu(i, 100), now).unwrap();
        }
        while tx.pull(usize::MAX).is_some() {}

        // move the floor to 2 first
        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(1) }, now)
            .unwrap();
        tx.on_control(
            &Pdu::AdvanceAck {
                seq: Seq::from_u32(0),
                floor: Seq::from_u32(2),
            },
            now,
        )
        .unwrap();
        assert_eq!(tx.first_seq(), Seq::from_u32(2));

        // cumulative ack for 5 with firstSeqNum = 2 marks slots 2..=5
        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(5) }, now)
            .unwrap();
        let first_acks = tx.stat().acks;
        let floors = drain_floors(&mut tx);
        assert!(floors.contains(&Seq::from_u32(6)));

        // redelivery changes nothing observable
        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(5) }, now)
            .unwrap();
        assert_eq!(tx.stat().acks, first_acks);
        assert!(drain_floors(&mut tx).is_empty());
    }

    #[test]
    fn bitmap_ack_marks_noncontiguous() {
        let mut tx = config(8, 100).build();
        let now = Instant::now();
        for i in 0..4 {
            tx.submit(sdu(i, 100), now).unwrap();
        }
        while tx.pull(usize::MAX).is_some() {}

        // nothing contiguous received: ack is below the floor and ignored,
        // bits mark fragments 1 and 3
        tx.on_control(
            &Pdu::BitmapAck {
                ack: Seq::from_u32(0).add_u32(u32::MAX), // floor - 1
                base: Seq::from_u32(1),
                bits: vec![true, false, true],
            },
            now,
        )
        .unwrap();
        assert_eq!(tx.stat().acks, 2);
        assert_eq!(tx.first_seq(), Seq::from_u32(0));
    }

    #[test]
    fn advance_ack_shifts_and_refills() {
        let mut tx = config(4, 100).build();
        let now = Instant::now();
        tx.submit(sdu(0, 400), now).unwrap(); // fills the window
        tx.submit(sdu(1, 200), now).unwrap(); // deferred
        while tx.pull(usize::MAX).is_some() {}
        assert_eq!(tx.next_seq(), Seq::from_u32(4));

        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(3) }, now)
            .unwrap();
        tx.on_control(
            &Pdu::AdvanceAck {
                seq: Seq::from_u32(0),
                floor: Seq::from_u32(4),
            },
            now,
        )
        .unwrap();

        // freed space admits the deferred unit immediately
        assert_eq!(tx.first_seq(), Seq::from_u32(4));
        assert_eq!(tx.next_seq(), Seq::from_u32(6));
        // repeated advance ack is ineffective
        tx.on_control(
            &Pdu::AdvanceAck {
                seq: Seq::from_u32(0),
                floor: Seq::from_u32(4),
            },
            now,
        )
        .unwrap();
        assert_eq!(tx.first_seq(), Seq::from_u32(4));
    }

    #[test]
    fn stale_advance_retry_is_dropped() {
        let mut tx = config(8, 100).build();
        let mut now = Instant::now();
        for i in 0..2 {
            tx.submit(sdu(i, 100), now).unwrap();
        }
        while tx.pull(usize::MAX).is_some() {}

        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(0) }, now)
            .unwrap();
        tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(1) }, now)
            .unwrap();
        assert_eq!(tx.stat().advance_requests, 2);

        // request 0 is stale once request 1 exists; its timer firing
        // produces no retransmission
        now += Duration::from_millis(400);
        tx.handle_timers(now).unwrap();
        assert_eq!(tx.stat().ctrl_retransmissions, 1); // only request 1 resent
    }

    #[test]
    fn out_of_window_ack_is_fatal() {
        let mut tx = config(4, 100).build();
        let now = Instant::now();
        tx.submit(sdu(0, 100), now).unwrap();
        let result = tx.on_control(&Pdu::CumulativeAck { ack: Seq::from_u32(9) }, now);
        assert_eq!(
            result,
            Err(Violation::AckOutOfWindow {
                seq: Seq::from_u32(9),
                first: Seq::from_u32(0),
            })
        );
    }

    #[test]
    fn ordering_within_unit() {
        let mut tx = config(8, 100).build();
        let now = Instant::now();
        tx.submit(sdu(0, 550), now).unwrap();
        let mut prev: Option<Seq> = None;
        while let Some(Pull::Pdu(pdu)) = tx.pull(usize::MAX) {
            if let Some(p) = prev {
                assert!(p < pdu.seq());
            }
            prev = Some(pdu.seq());
        }
    }
}
