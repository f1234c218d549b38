use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use crate::{
    protocol::{DataHdr, Pdu},
    timer::{TimerKind, TimerQueue},
    utils::{Seq, SlotArena},
};

use super::{Sdu, Violation, WindowDesc};

/// Receiver side of an AM connection.
///
/// Buffers fragments in the receive window, delivers a unit exactly once
/// when all of its fragments are in, generates cumulative and bitmap
/// acknowledgments, and answers window-advance requests.
pub struct RxEntity {
    wnd: WindowDesc,
    slots: SlotArena<(DataHdr, Vec<u8>)>,
    /// Fragments shifted below the floor whose group straddles it; kept
    /// until the group completes or a later advance obsoletes them.
    pending: VecDeque<(DataHdr, Vec<u8>)>,
    delivered: VecDeque<Sdu>,
    control: VecDeque<Pdu>,
    timers: TimerQueue,
    last_ack_at: Option<Instant>,

    // stat
    stat: LocalStat,

    // const
    ack_interval: Duration,
    status_interval: Duration,
}

pub struct RxConfig {
    pub window_size: usize,
    /// Minimum spacing between two acknowledgment PDUs.
    pub ack_interval: Duration,
    /// Period of the standing status-report timer.
    pub status_interval: Duration,
}

impl RxConfig {
    #[must_use]
    pub fn build(self) -> RxEntity {
        assert!(self.window_size > 0);
        let this = RxEntity {
            wnd: WindowDesc::new(self.window_size),
            slots: SlotArena::new(self.window_size),
            pending: VecDeque::new(),
            delivered: VecDeque::new(),
            control: VecDeque::new(),
            timers: TimerQueue::new(),
            last_ack_at: None,
            stat: LocalStat::default(),
            ack_interval: self.ack_interval,
            status_interval: self.status_interval,
        };
        this.check_rep();
        this
    }

    #[must_use]
    pub fn default() -> RxConfig {
        RxConfig {
            window_size: 16,
            ack_interval: Duration::from_millis(100),
            status_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct LocalStat {
    fragments_received: u64,
    duplicates: u64,
    stale: u64,
    units_delivered: u64,
    status_reports: u64,
    advance_requests: u64,
    fragments_dropped: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RxStat {
    pub fragments_received: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub units_delivered: u64,
    pub status_reports: u64,
    pub advance_requests: u64,
    pub fragments_dropped: u64,
    pub first_seq: Seq,
    pub next_seq: Seq,
}

impl RxEntity {
    #[inline]
    fn check_rep(&self) {
        assert!(self.wnd.extent() <= self.wnd.size);
        assert_eq!(self.slots.size(), self.wnd.size);
        for (hdr, _) in &self.pending {
            assert!(hdr.seq < self.wnd.first);
            assert!(self.wnd.first <= hdr.last);
        }
    }

    #[must_use]
    pub fn stat(&self) -> RxStat {
        RxStat {
            fragments_received: self.stat.fragments_received,
            duplicates: self.stat.duplicates,
            stale: self.stat.stale,
            units_delivered: self.stat.units_delivered,
            status_reports: self.stat.status_reports,
            advance_requests: self.stat.advance_requests,
            fragments_dropped: self.stat.fragments_dropped,
            first_seq: self.wnd.first,
            next_seq: self.wnd.next,
        }
    }

    #[must_use]
    pub fn first_seq(&self) -> Seq {
        self.wnd.first
    }

    #[must_use]
    pub fn pop_delivered(&mut self) -> Option<Sdu> {
        self.delivered.pop_front()
    }

    /// Drains the next acknowledgment-side PDU bound for the peer.
    #[must_use]
    pub fn pop_control(&mut self) -> Option<Pdu> {
        self.control.pop_front()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Feed for sender-originated PDUs arriving off the wire.
    pub fn on_pdu(&mut self, pdu: Pdu, now: Instant) -> Result<(), Violation> {
        match pdu {
            Pdu::Data { hdr, payload } => self.handle_data(hdr, payload, now)?,
            Pdu::AdvanceRequest { seq, floor } => self.handle_advance_request(seq, floor, now)?,
            Pdu::AdvanceAck { .. } | Pdu::CumulativeAck { .. } | Pdu::BitmapAck { .. } => {
                warn!("rx: ignoring sender-bound {:?} pdu", pdu.kind());
            }
        }
        self.check_rep();
        Ok(())
    }

    fn handle_data(
        &mut self,
        hdr: DataHdr,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<(), Violation> {
        let Some(index) = self.wnd.index_of(hdr.seq) else {
            trace!("rx: fragment {} below floor {}", hdr.seq, self.wnd.first);
            self.stat.stale += 1;
            return Ok(());
        };
        if index >= self.wnd.size {
            return Err(Violation::FragmentOutOfWindow {
                seq: hdr.seq,
                first: self.wnd.first,
            });
        }
        if self.slots.is_received(index) {
            let (buffered, _) = self.slots.get(index).unwrap();
            if buffered.unit != hdr.unit {
                return Err(Violation::OverlappingUnits {
                    seq: hdr.seq,
                    buffered: buffered.unit,
                    incoming: hdr.unit,
                });
            }
            // a true duplicate agrees on the whole group extent
            if buffered.total != hdr.total
                || buffered.first != hdr.first
                || buffered.last != hdr.last
            {
                return Err(Violation::GroupMismatch {
                    seq: hdr.seq,
                    unit: hdr.unit,
                });
            }
            trace!("rx: duplicate fragment {}", hdr.seq);
            self.stat.duplicates += 1;
            return Ok(());
        }

        let expected = self.wnd.next;
        if self.slots.occupy(index, (hdr.clone(), payload)).is_err() {
            return Err(Violation::SlotOccupied { seq: hdr.seq });
        }
        self.slots.mark_received(index);
        if hdr.seq >= expected {
            self.wnd.next = hdr.seq;
            self.wnd.next.increment();
        }
        self.stat.fragments_received += 1;
        trace!("rx: stored fragment {} of unit {}", hdr.seq, hdr.unit);

        if !self.timers.busy(TimerKind::StatusReport, Seq::from_u32(0)) {
            self.timers.schedule(
                TimerKind::StatusReport,
                Seq::from_u32(0),
                now + self.status_interval,
            );
        }
        self.check_complete(index, now)?;
        if hdr.seq != expected {
            // out-of-sequence arrival, tell the sender about the holes
            self.send_status_report(now);
        }
        Ok(())
    }

    /// Delivers the group around the fragment at `index` if every member
    /// is in, either fully inside the window or with a head retained in
    /// `pending` from an earlier advance.
    fn check_complete(&mut self, index: usize, now: Instant) -> Result<(), Violation> {
        let hdr = self.slots.get(index).map(|(h, _)| h.clone()).unwrap();
        let end = hdr.last.sub_seq(self.wnd.first) as usize;
        if end >= self.wnd.size {
            // the tail cannot have arrived yet
            return Ok(());
        }
        let start = self.wnd.index_of(hdr.first);
        for i in start.unwrap_or(0)..=end {
            if !self.slots.is_received(i) {
                return Ok(());
            }
            let (h, _) = self.slots.get(i).unwrap();
            if h.unit != hdr.unit
                || h.total != hdr.total
                || h.first != hdr.first
                || h.last != hdr.last
            {
                return Err(Violation::GroupMismatch {
                    seq: h.seq,
                    unit: hdr.unit,
                });
            }
        }
        if start.is_none() {
            // the group's head sits below the floor, in pending
            let needed = self.wnd.first.sub_seq(hdr.first);
            let mut have = 0u32;
            let mut expect = hdr.first;
            for (h, _) in &self.pending {
                if h.unit != hdr.unit {
                    continue;
                }
                if h.seq != expect
                    || h.total != hdr.total
                    || h.first != hdr.first
                    || h.last != hdr.last
                {
                    return Err(Violation::GroupMismatch {
                        seq: h.seq,
                        unit: hdr.unit,
                    });
                }
                expect.increment();
                have += 1;
            }
            if have != needed {
                return Ok(());
            }
        }

        let mut payload = Vec::new();
        if start.is_none() {
            let mut rest = VecDeque::new();
            while let Some((h, p)) = self.pending.pop_front() {
                if h.unit == hdr.unit {
                    payload.extend_from_slice(&p);
                } else {
                    rest.push_back((h, p));
                }
            }
            self.pending = rest;
        }
        for i in start.unwrap_or(0)..=end {
            let (_, p) = self.slots.get(i).unwrap();
            payload.extend_from_slice(p);
        }
        debug!(
            "rx: unit {} complete, {} bytes, delivering",
            hdr.unit,
            payload.len()
        );
        self.delivered.push_back(Sdu {
            seq: hdr.unit,
            payload,
        });
        self.stat.units_delivered += 1;
        self.send_status_report(now);
        Ok(())
    }

    /// Emits a cumulative or bitmap acknowledgment for the current window
    /// state, subject to the minimum ack spacing.
    fn send_status_report(&mut self, now: Instant) {
        if let Some(at) = self.last_ack_at {
            if now < at + self.ack_interval {
                trace!("rx: ack suppressed by spacing");
                return;
            }
        }
        let extent = self.wnd.extent();
        let mut cum = 0;
        while cum < extent && self.slots.is_received(cum) {
            cum += 1;
        }
        let mut bits: Vec<bool> = (cum + 1..extent).map(|i| self.slots.is_received(i)).collect();
        while bits.last() == Some(&false) {
            bits.pop();
        }
        if cum == 0 && bits.is_empty() {
            return;
        }
        // ack names floor + cum - 1; with cum == 0 it falls below the
        // floor and the sender ignores the cumulative part
        let ack = self.wnd.first.add_u32((cum as u32).wrapping_sub(1));
        let pdu = if bits.is_empty() {
            Pdu::CumulativeAck { ack }
        } else {
            Pdu::BitmapAck {
                ack,
                base: self.wnd.first.add_u32(cum as u32 + 1),
                bits,
            }
        };
        trace!("rx: reporting {:?}", pdu.kind());
        self.control.push_back(pdu);
        self.stat.status_reports += 1;
        self.last_ack_at = Some(now);
    }

    /// Window-advance request from the sender: discards everything below
    /// the requested floor except fragments of a group that straddles it,
    /// then echoes the (possibly already current) floor back.
    fn handle_advance_request(
        &mut self,
        seq: Seq,
        floor: Seq,
        _now: Instant,
    ) -> Result<(), Violation> {
        self.stat.advance_requests += 1;
        if floor > self.wnd.first {
            let pos = floor.sub_seq(self.wnd.first) as usize;
            if pos > self.wnd.size {
                return Err(Violation::FragmentOutOfWindow {
                    seq: floor,
                    first: self.wnd.first,
                });
            }
            debug!("rx: advancing window {} -> {}", self.wnd.first, floor);
            for i in 0..pos {
                if let Some((h, p)) = self.slots.take(i) {
                    if h.last >= floor {
                        self.pending.push_back((h, p));
                    } else {
                        self.stat.fragments_dropped += 1;
                    }
                }
            }
            self.slots.shift_down(pos);
            self.wnd.first = floor;
            if self.wnd.next < self.wnd.first {
                self.wnd.next = self.wnd.first;
            }
            let before = self.pending.len();
            self.pending.retain(|(h, _)| h.last >= floor);
            self.stat.fragments_dropped += (before - self.pending.len()) as u64;
        } else {
            trace!("rx: stale advance request {} to floor {}", seq, floor);
        }
        self.control.push_back(Pdu::AdvanceAck {
            seq,
            floor: self.wnd.first,
        });
        Ok(())
    }

    /// Fires the standing status-report timer; re-armed while fragments
    /// remain buffered.
    pub fn handle_timers(&mut self, now: Instant) {
        while let Some((kind, _)) = self.timers.pop_due(now) {
            match kind {
                TimerKind::StatusReport => {
                    self.send_status_report(now);
                    let extent = self.wnd.extent();
                    if (0..extent).any(|i| self.slots.is_received(i)) {
                        self.timers.schedule(
                            TimerKind::StatusReport,
                            Seq::from_u32(0),
                            now + self.status_interval,
                        );
                    }
                }
                TimerKind::FragRetx | TimerKind::AdvanceRetx => {
                    unreachable!("not armed by the rx entity")
                }
            }
        }
    }
}
