//! The per-endpoint sender-state reconstructor (C5).
//!
//! One [`Endpoint`] tracks everything about the packets *one side* of a TCP
//! connection has transmitted: MSS inference and wire-packet splitting,
//! retransmission classification (fast retransmit / TLP / RTO), SACK
//! bookkeeping (including recovery from truncated SACK options), and the
//! goodput/in-flight counters the attribution engine (C7) reads back out.
//!
//! Packets live in a [`PacketArena`] shared by the whole [`Flow`](crate::flow::Flow)
//! (both endpoints), since cross-direction back-references (`trigger_packet`,
//! `ack_packet`, a SACK-lookalike FIFO entry) point at packets the *peer*
//! endpoint owns. An `Endpoint` itself only keeps arena indices.

use std::collections::VecDeque;
use std::net::Ipv4Addr;

use crate::packet::{PacketArena, PacketId, RawPacket, TcpFlags, TimerSnapshot};
use crate::sack::{SackRange, TcpSacks};
use crate::seq;
use crate::timer::TcpTimer;

/// Minimum inferred MSS; payloads smaller than this never set an inferred
/// MSS (a detail silent in the distilled spec, present throughout the
/// reference implementation, and preserved here — see `DESIGN.md`).
const K_MIN_MSS: u32 = 536;
const MAX_SEGMENTS_PER_FRAME: usize = 10;
const MAX_TRIGGER_PACKET_DELAY_US: i64 = 2_000;
const MAX_UNMATCHED_RTX: u32 = 100;
const FIRE_TOLERANCE_PCT: f64 = 0.2;

#[derive(Debug, Clone, Copy, Default)]
struct RtoDescriptor {
    armed_by: Option<PacketId>,
    delay_us: i32,
    armed_at_us: i64,
    backoffs: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct TlpDescriptor {
    armed_by: Option<PacketId>,
    delay_us: i32,
    armed_at_us: i64,
    delayed_ack: bool,
}

fn within_fire_tolerance(observed_ts: u64, armed_at_us: i64, delay_us: i32) -> bool {
    if delay_us <= 0 {
        return false;
    }
    let observed_interval = observed_ts as i64 - armed_at_us;
    let diff = (observed_interval - delay_us as i64).abs() as f64;
    diff <= FIRE_TOLERANCE_PCT * delay_us as f64
}

/// One half of a TCP flow: the sender-side state machine described in
/// `SPEC_FULL.md` §4.5.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,

    packets: Vec<PacketId>,
    head: Option<PacketId>,
    tail: Option<PacketId>,
    unacked: VecDeque<PacketId>,

    /// The SACK ranges the peer has signalled for *this* endpoint's data.
    sack_state: TcpSacks,
    timer: TcpTimer,
    rto: RtoDescriptor,
    tlp: TlpDescriptor,

    pub seq_acked: u32,
    pub seq_next: u32,
    pub acked_bytes: u32,
    pub min_rtt_us: Option<i32>,
    pub num_rtos: u8,
    pub unmatched_rtx: u32,
    pub num_data_packets: u32,

    seq_initialized: bool,
    rto_high_seq: Option<u32>,
    is_tlp_enabled: bool,
    num_retransmissions_total: u32,
    last_classified_tlp: Option<PacketId>,
    bogus: bool,

    advertised_mss: Option<u32>,
    mss: Option<u32>,
    timestamp_ok: bool,

    lookalikes: VecDeque<PacketId>,

    base_seq: Option<u32>,
    base_ack: Option<u32>,

    highest_seq_sent: u32,
    highest_seq_initialized: bool,

    /// Most recent packet received *from the peer* (any packet, not just
    /// ones carrying an ACK) — the back-reference used both for `last_ack`
    /// snapshots and for the "triggered by an incoming ACK" retransmission
    /// rule. Set by the owning [`Flow`](crate::flow::Flow), not by this
    /// endpoint itself.
    last_received: Option<PacketId>,
}

impl Endpoint {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Endpoint {
            addr,
            port,
            packets: Vec::new(),
            head: None,
            tail: None,
            unacked: VecDeque::new(),
            sack_state: TcpSacks::empty(),
            timer: TcpTimer::new(),
            rto: RtoDescriptor::default(),
            tlp: TlpDescriptor::default(),
            seq_acked: 0,
            seq_next: 0,
            acked_bytes: 0,
            min_rtt_us: None,
            num_rtos: 0,
            unmatched_rtx: 0,
            num_data_packets: 0,
            seq_initialized: false,
            rto_high_seq: None,
            is_tlp_enabled: true,
            num_retransmissions_total: 0,
            last_classified_tlp: None,
            bogus: false,
            advertised_mss: None,
            mss: None,
            timestamp_ok: false,
            lookalikes: VecDeque::new(),
            base_seq: None,
            base_ack: None,
            highest_seq_sent: 0,
            highest_seq_initialized: false,
            last_received: None,
        }
    }

    pub fn is_bogus(&self) -> bool {
        self.bogus
    }

    pub fn packets(&self) -> &[PacketId] {
        &self.packets
    }

    pub fn timer(&self) -> &TcpTimer {
        &self.timer
    }

    pub fn sack_state(&self) -> &TcpSacks {
        &self.sack_state
    }

    /// Installs the MSS the peer advertised in its SYN, reduced by the
    /// 12-byte timestamp-option overhead if this endpoint's own segments
    /// carry timestamps. A no-op once an MSS (advertised or inferred) is
    /// already set.
    pub fn set_advertised_mss(&mut self, mss: u16) {
        if self.advertised_mss.is_none() && self.mss.is_none() {
            self.advertised_mss = Some(mss as u32);
        }
    }

    pub(crate) fn note_received_from_peer(&mut self, id: PacketId) {
        self.last_received = Some(id);
    }

    fn to_relative_seq(&mut self, seq: u32) -> u32 {
        let base = *self.base_seq.get_or_insert(seq);
        seq.wrapping_sub(base).wrapping_add(1)
    }

    fn to_relative_ack(&mut self, ack: u32) -> u32 {
        let base = *self.base_ack.get_or_insert(ack);
        ack.wrapping_sub(base).wrapping_add(1)
    }

    fn maybe_infer_mss(&mut self, raw: &RawPacket) {
        if self.mss.is_some() {
            return;
        }
        if let Some(adv) = self.advertised_mss {
            let reduced = if self.timestamp_ok { adv.saturating_sub(12) } else { adv };
            self.mss = Some(reduced.max(1));
            return;
        }
        if raw.is_syn() || raw.data_len < K_MIN_MSS {
            return;
        }
        let data_len = raw.data_len;
        if data_len <= 1460 {
            self.mss = Some(data_len);
            return;
        }
        for k in 2..=10u32 {
            if data_len % k == 0 && data_len / k <= 1460 {
                self.mss = Some(data_len / k);
                return;
            }
        }
    }

    /// Splits an oversized captured frame into consecutive wire packets, at
    /// most [`MAX_SEGMENTS_PER_FRAME`] of them (a frame needing more is
    /// silently truncated at the cap, matching the reference implementation).
    fn split_into_wire_packets(&self, raw: RawPacket) -> Vec<RawPacket> {
        let mss = match self.mss {
            Some(m) if m > 0 => m,
            _ => return vec![raw],
        };
        if raw.data_len == 0 || raw.data_len <= mss {
            return vec![raw];
        }

        let mut segments = Vec::new();
        let mut remaining = raw.data_len;
        let mut seq = raw.seq;
        let mut first = true;
        while remaining > 0 && segments.len() < MAX_SEGMENTS_PER_FRAME {
            let take = remaining.min(mss);
            let is_last = remaining <= mss;
            let mut seg = raw.clone();
            seg.seq = seq;
            seg.data_len = take;
            if !first {
                seg.flags.remove(TcpFlags::SYN);
                seg.mss_opt = None;
            }
            if !is_last {
                seg.flags.remove(TcpFlags::FIN);
            }
            segments.push(seg);
            seq = seq.wrapping_add(take);
            remaining -= take;
            first = false;
        }
        if remaining > 0 {
            log::trace!(
                "endpoint {}:{}: frame needing >{} segments truncated at the split cap",
                self.addr,
                self.port,
                MAX_SEGMENTS_PER_FRAME
            );
        }
        segments
    }

    /// Ingests one captured frame sent by this endpoint: infers/uses the
    /// MSS, splits it into wire packets if needed, and runs the per-packet
    /// `AddPacket` pipeline on each. Returns the arena ids of every wire
    /// packet produced (in transmission order).
    pub fn add_packet(&mut self, arena: &mut PacketArena, raw: RawPacket) -> Vec<PacketId> {
        if self.bogus {
            return Vec::new();
        }
        if raw.is_syn() {
            self.timestamp_ok = raw.timestamp_ok;
        }
        self.maybe_infer_mss(&raw);

        let wire_packets = self.split_into_wire_packets(raw);
        wire_packets.into_iter().map(|wp| self.add_wire_packet(arena, wp)).collect()
    }

    fn add_wire_packet(&mut self, arena: &mut PacketArena, raw: RawPacket) -> PacketId {
        let ts = raw.ts_us;
        let relative_seq = self.to_relative_seq(raw.seq);
        let relative_ack = self.to_relative_ack(raw.ack);
        let id = arena.push(raw.clone(), relative_seq, relative_ack);

        if let Some(tail) = self.tail {
            arena.get_mut(tail).next = Some(id);
            arena.get_mut(id).prev = Some(tail);
        }
        self.tail = Some(id);
        self.head.get_or_insert(id);
        self.packets.push(id);

        if let Some(last_recv) = self.last_received {
            let last_ts = arena.get(last_recv).raw.ts_us;
            if (ts as i64 - last_ts as i64).abs() <= MAX_TRIGGER_PACKET_DELAY_US {
                arena.get_mut(id).trigger_packet = Some(last_recv);
            }
        }

        if raw.requires_ack() {
            let seq_end = raw.seq_end();
            let is_retransmission = if !self.seq_initialized {
                self.seq_next = seq_end;
                self.seq_acked = raw.seq;
                self.seq_initialized = true;
                false
            } else {
                let advanced = seq::after(seq_end, self.seq_next);
                if advanced {
                    self.seq_next = seq_end;
                }
                !advanced || self.rto_high_seq.is_some()
            };

            if !is_retransmission
                && (!self.highest_seq_initialized || seq::after(seq_end, self.highest_seq_sent))
            {
                self.highest_seq_sent = seq_end;
                self.highest_seq_initialized = true;
            }

            if raw.data_len > 0 {
                self.num_data_packets += 1;
            }

            if is_retransmission {
                self.classify_retransmission(arena, id);
            }

            let sack_bytes = self.sack_state.num_bytes();
            let unacked_bytes = self.seq_next.wrapping_sub(self.seq_acked).saturating_sub(sack_bytes);
            let rto_us = self.timer.get_rto(self.num_rtos);
            let tlp_us = self.timer.get_tlp(false);
            let tlp_delayed_us = self.timer.get_tlp(true);
            {
                let p = arena.get_mut(id);
                p.unacked_bytes = unacked_bytes;
                p.last_ack = self.last_received;
                p.timer_at_tx = TimerSnapshot { rto_us, tlp_us, tlp_delayed_us };
            }

            self.unacked.push_back(id);
            if self.rto.armed_by.is_none() {
                self.arm_timers(arena, id);
            }

            if let Some(high) = self.rto_high_seq {
                if seq::after(self.seq_next, high) {
                    self.rto_high_seq = None;
                }
            }
        }

        id
    }

    /// First matching rule wins: triggered-by-ACK, TLP, RTO, else unmatched.
    /// See `SPEC_FULL.md` §4.5 "Retransmission classification".
    fn classify_retransmission(&mut self, arena: &mut PacketArena, id: PacketId) {
        self.num_retransmissions_total += 1;
        let ts = arena.get(id).raw.ts_us;
        let mut classified = false;

        if let Some(last_recv) = self.last_received {
            let ack_ts = arena.get(last_recv).raw.ts_us;
            if (ts as i64 - ack_ts as i64).abs() <= MAX_TRIGGER_PACKET_DELAY_US {
                let trigger = arena.get(last_recv).trigger_packet.or(Some(last_recv));
                let is_slow_start = self.rto_high_seq.is_some();
                let p = arena.get_mut(id);
                p.classification.is_rtx = true;
                p.trigger_packet = trigger;
                if is_slow_start {
                    p.classification.is_slow_start_rtx = true;
                } else {
                    p.classification.is_fast_rtx = true;
                }
                classified = true;
            }
        }

        if !classified && self.is_tlp_enabled {
            if let Some(armed_by) = self.tlp.armed_by {
                let is_highest =
                    self.highest_seq_initialized && arena.get(id).raw.seq_end() == self.highest_seq_sent;
                if is_highest && within_fire_tolerance(ts, self.tlp.armed_at_us, self.tlp.delay_us) {
                    let p = arena.get_mut(id);
                    p.classification.is_rtx = true;
                    p.classification.is_tlp = true;
                    p.tlp_delayed_ack = self.tlp.delayed_ack;
                    p.armed_by = Some(armed_by);
                    classified = true;
                    self.last_classified_tlp = Some(id);
                }
            }
        }

        if !classified {
            if let Some(armed_by) = self.rto.armed_by {
                if within_fire_tolerance(ts, self.rto.armed_at_us, self.rto.delay_us) {
                    self.num_rtos += 1;

                    // Reversal: the immediately preceding classified event
                    // was a TLP armed by the same packet, and this one also
                    // looks like a (no-backoff) RTO — treat the TLP as
                    // having never happened and recount this as the first
                    // RTO of the loss event.
                    if self.num_rtos == 1 {
                        if let Some(prev_tlp) = self.last_classified_tlp {
                            if arena.get(prev_tlp).armed_by == Some(armed_by) {
                                arena.get_mut(prev_tlp).classification.is_tlp = false;
                                log::debug!(
                                    "endpoint {}:{}: reclassifying prior TLP as the first RTO of this loss event",
                                    self.addr,
                                    self.port
                                );
                            }
                        }
                    }

                    let p = arena.get_mut(id);
                    p.classification.is_rtx = true;
                    p.classification.is_rto_rtx = true;
                    p.armed_by = Some(armed_by);
                    p.backoffs = self.rto.backoffs;
                    self.rto_high_seq = Some(self.seq_next);
                    classified = true;

                    if self.num_retransmissions_total == 1 && !arena.get(id).classification.is_tlp {
                        self.is_tlp_enabled = false;
                    }
                }
            }
        }

        if !classified {
            arena.get_mut(id).classification.is_rtx = true;
            self.unmatched_rtx += 1;
            if self.unmatched_rtx > MAX_UNMATCHED_RTX {
                self.bogus = true;
                log::debug!(
                    "endpoint {}:{}: latched bogus after {} unmatched retransmissions",
                    self.addr,
                    self.port,
                    self.unmatched_rtx
                );
            }
        }

        self.link_prev_tx(arena, id);
        self.recover_sack_lookalikes(arena, id);
        self.arm_timers(arena, id);
    }

    /// Walks the endpoint's packet list from the back looking for the
    /// transmission this retransmission replaces, links the retransmission
    /// graph, and flags out-of-order packets sent in between.
    fn link_prev_tx(&mut self, arena: &mut PacketArena, id: PacketId) {
        let target_seq = arena.get(id).raw.seq;
        let mut cur = arena.get(id).prev;
        let mut found = None;
        while let Some(cid) = cur {
            let c = arena.get(cid);
            if (c.raw.data_len > 0 || c.raw.is_syn())
                && (target_seq == c.raw.seq || seq::between(target_seq, c.raw.seq, c.raw.seq_end()))
            {
                found = Some(cid);
                break;
            }
            cur = c.prev;
        }

        let Some(prev_id) = found else { return };

        let mut walker = arena.get(prev_id).next;
        while let Some(wid) = walker {
            if wid == id {
                break;
            }
            if arena.get(wid).raw.data_len > 0 {
                arena.get_mut(wid).out_of_order = true;
            }
            walker = arena.get(wid).next;
        }

        let first_tx = arena.get(prev_id).first_tx;
        let prev_ts = arena.get(prev_id).raw.ts_us;
        let cur_ts = arena.get(id).raw.ts_us;

        arena.get_mut(prev_id).rtx = Some(id);
        arena.get_mut(prev_id).rtx_delay_us = Some(cur_ts as i64 - prev_ts as i64);

        {
            let p = arena.get_mut(id);
            p.prev_tx = Some(prev_id);
            p.first_tx = first_tx;
        }

        if let Some(origin) = first_tx {
            let total_delay = cur_ts as i64 - arena.get(origin).raw.ts_us as i64;
            let attempts = arena.get(origin).num_rtx_attempts + 1;
            let o = arena.get_mut(origin);
            o.final_rtx_delay_us = Some(total_delay);
            o.num_rtx_attempts = attempts;
        }
    }

    /// Pairs any older, non-retransmitted unacked packet below this
    /// retransmission's sequence with the oldest SACK-lookalike dup-ACK
    /// that arrived at least `min_rtt_us` after it was sent, treating the
    /// pairing as an implicit SACK. See `SPEC_FULL.md` §4.5.
    fn recover_sack_lookalikes(&mut self, arena: &mut PacketArena, rtx_id: PacketId) {
        let Some(min_rtt) = self.min_rtt_us else { return };
        loop {
            let rtx_seq = arena.get(rtx_id).raw.seq;
            let candidate = self.unacked.iter().copied().find(|&pid| {
                pid != rtx_id && arena.get(pid).rtx.is_none() && seq::before(arena.get(pid).raw.seq, rtx_seq)
            });
            let Some(pkt_id) = candidate else { return };

            let pkt_ts = arena.get(pkt_id).raw.ts_us;
            let lookalike_pos = self
                .lookalikes
                .iter()
                .position(|&lid| arena.get(lid).raw.ts_us as i64 - pkt_ts as i64 >= min_rtt as i64);
            let Some(pos) = lookalike_pos else { return };
            let lookalike_id = self.lookalikes.remove(pos).unwrap();

            let data_len = arena.get(pkt_id).raw.data_len;
            let seq_start = arena.get(pkt_id).raw.seq;
            let seq_end = arena.get(pkt_id).raw.seq_end();
            let is_original = arena.get(pkt_id).prev_tx.is_none();

            self.handle_acked_packet(arena, pkt_id, lookalike_id, is_original);
            self.sack_state.add(SackRange { start: seq_start, end: seq_end });
            self.unacked.retain(|&id| id != pkt_id);
            self.arm_timers(arena, lookalike_id);

            for &pid in &self.packets {
                if pid == pkt_id {
                    continue;
                }
                let p = arena.get_mut(pid);
                if p.ack_packet.is_none() && seq::after(p.raw.seq, seq_start) {
                    p.unacked_bytes = p.unacked_bytes.saturating_sub(data_len);
                }
            }

            log::trace!(
                "endpoint {}:{}: sack-lookalike recovered packet at seq {}",
                self.addr,
                self.port,
                seq_start
            );
        }
    }

    /// Handles a peer packet that carries an ACK (or the equivalent
    /// SACK-lookalike pairing): advances `seq_acked`, removes newly
    /// fully-acked/SACKed packets from the unacked list, feeds RTT samples,
    /// and marks DSACKed retransmissions spurious.
    pub fn process_ack(&mut self, arena: &mut PacketArena, ack_id: PacketId, raw: &RawPacket) {
        if self.bogus {
            return;
        }
        let ack = raw.ack;
        let ack_moved = seq::after(ack, self.seq_acked);
        let mut newly_acked = false;

        if ack_moved {
            self.acked_bytes += ack.wrapping_sub(self.seq_acked);
            self.seq_acked = ack;
            if let Some(high) = self.rto_high_seq {
                if !seq::after(high, ack) {
                    self.rto_high_seq = None;
                }
            }
            if seq::after(ack, self.seq_next) {
                self.bogus = true;
                log::debug!(
                    "endpoint {}:{}: latched bogus, ack {} exceeds seq_next {}",
                    self.addr,
                    self.port,
                    ack,
                    self.seq_next
                );
            }
        } else if ack == self.seq_acked && raw.unknown_option_size >= 10 {
            self.lookalikes.push_back(ack_id);
        }

        if ack_moved || !raw.sacks.is_empty() {
            self.sack_state.add_all(&raw.sacks);
            self.sack_state.remove_acked(self.seq_acked);
            let seq_acked = self.seq_acked;
            let sack_ranges: Vec<SackRange> = self.sack_state.ranges().to_vec();

            let pending: Vec<PacketId> = self.unacked.drain(..).collect();
            for pid in pending {
                let (seq_start, seq_end) = {
                    let p = arena.get(pid);
                    (p.raw.seq, p.raw.seq_end())
                };
                let fully_acked = !seq::after(seq_end, seq_acked);
                let sack_covered =
                    sack_ranges.iter().any(|r| seq::range_included(seq_start, seq_end, r.start, r.end));
                if fully_acked || sack_covered {
                    let is_original = arena.get(pid).prev_tx.is_none();
                    self.handle_acked_packet(arena, pid, ack_id, is_original);
                    newly_acked = true;
                } else {
                    self.unacked.push_back(pid);
                }
            }

            if newly_acked {
                self.arm_timers(arena, ack_id);
            }
            if self.unacked.is_empty() {
                self.rto.armed_by = None;
                self.tlp.armed_by = None;
            }
        }

        for r in raw.sacks.ranges() {
            if !seq::after(r.end, ack) {
                self.mark_spurious(arena, r.start, r.end);
            }
        }
    }

    fn handle_acked_packet(&mut self, arena: &mut PacketArena, pkt_id: PacketId, ack_id: PacketId, is_original: bool) {
        let ack_ts = arena.get(ack_id).raw.ts_us;
        let pkt_ts = arena.get(pkt_id).raw.ts_us;
        let delay = ack_ts as i64 - pkt_ts as i64;
        {
            let p = arena.get_mut(pkt_id);
            p.ack_packet = Some(ack_id);
            p.ack_delay_us = Some(delay);
            p.acked_bytes = self.acked_bytes;
        }

        if is_original {
            let rtt = delay.max(0) as i32;
            if self.min_rtt_us.map_or(true, |m| rtt < m) {
                self.min_rtt_us = Some(rtt);
            }
            if arena.get(pkt_id).rtx.is_none() {
                self.timer.add_sample(pkt_id, self.seq_acked, self.seq_next, rtt);
            }
        }
    }

    /// Marks the most recent not-already-spurious retransmission covering
    /// `[start, end)` as spurious (a DSACK signal).
    fn mark_spurious(&mut self, arena: &mut PacketArena, start: u32, end: u32) {
        for &pid in self.packets.iter().rev() {
            let p = arena.get(pid);
            if p.prev_tx.is_some()
                && !p.classification.is_spurious_rtx
                && seq::range_included(p.raw.seq, p.raw.seq_end(), start, end)
            {
                arena.get_mut(pid).classification.is_spurious_rtx = true;
                return;
            }
        }
    }

    fn arm_timers(&mut self, arena: &PacketArena, id: PacketId) {
        let ts = arena.get(id).raw.ts_us as i64;
        self.rto = RtoDescriptor {
            armed_by: Some(id),
            delay_us: self.timer.get_rto(self.num_rtos),
            armed_at_us: ts,
            backoffs: self.num_rtos,
        };

        let non_lost_remaining = self.unacked.iter().filter(|&&pid| !arena.get(pid).is_lost(arena)).count();
        let delayed_ack = non_lost_remaining == 1;
        self.tlp = TlpDescriptor {
            armed_by: Some(id),
            delay_us: self.timer.get_tlp(delayed_ack),
            armed_at_us: ts,
            delayed_ack,
        };
    }

    /// Counts packets satisfying an arbitrary predicate over this
    /// endpoint's transmitted sequence (the "apply a predicate and count"
    /// pattern used throughout the reference implementation's counters).
    pub fn count_by<F>(&self, arena: &PacketArena, pred: F) -> usize
    where
        F: Fn(&crate::packet::PacketRecord) -> bool,
    {
        self.packets.iter().map(|&id| arena.get(id)).filter(|p| pred(p)).count()
    }

    fn is_sample_eligible(arena: &PacketArena, p: &crate::packet::PacketRecord) -> bool {
        !p.is_lost(arena) && !p.out_of_order && p.ack_delay_us.map_or(false, |d| d != 0)
    }

    /// `(unacked_bytes, ack_delay_us)` pairs over every in-order, non-lost,
    /// acked packet this endpoint transmitted — the whole-history sample set
    /// for the delay-attribution engine's linear fit.
    pub fn unacked_bytes_rtt_pairs(&self, arena: &PacketArena) -> Vec<(f64, f64)> {
        self.packets
            .iter()
            .map(|&id| arena.get(id))
            .filter(|p| Self::is_sample_eligible(arena, p))
            .map(|p| (p.unacked_bytes as f64, p.ack_delay_us.unwrap() as f64))
            .collect()
    }

    /// The same pairs as [`Self::unacked_bytes_rtt_pairs`], but restricted to
    /// at most `num_samples` eligible packets immediately around `target` in
    /// transmission order: half before and half after, or all `num_samples`
    /// before it when `use_older_packets_only` is set. Mirrors the
    /// reference implementation's fixed-size circular buffer so the two
    /// alternate fits `CalculateRttLinearFit` tries stay a local estimate
    /// rather than a whole-flow average.
    pub fn unacked_bytes_rtt_pairs_around_packet(
        &self,
        arena: &PacketArena,
        target: PacketId,
        num_samples: u8,
        use_older_packets_only: bool,
    ) -> Vec<(f64, f64)> {
        let max_distance = if use_older_packets_only {
            num_samples as usize
        } else {
            num_samples as usize / 2
        };
        if max_distance == 0 {
            return Vec::new();
        }

        let mut before: Vec<Option<(f64, f64)>> = vec![None; max_distance];
        let mut count = 0usize;
        let mut target_pos = None;

        for (i, &id) in self.packets.iter().enumerate() {
            let p = arena.get(id);
            if Self::is_sample_eligible(arena, p) {
                before[count % max_distance] = Some((p.unacked_bytes as f64, p.ack_delay_us.unwrap() as f64));
                count += 1;
            }
            if id == target {
                target_pos = Some(i);
                break;
            }
        }
        let Some(target_pos) = target_pos else {
            return Vec::new();
        };
        if count == 0 {
            return Vec::new();
        }

        let end_index = count - 1;
        let start_index = count.saturating_sub(max_distance);
        let mut pairs: Vec<(f64, f64)> =
            (start_index..=end_index).filter_map(|i| before[i % max_distance]).collect();

        if use_older_packets_only {
            return pairs;
        }

        let mut after_count = 0usize;
        for &id in self.packets.iter().skip(target_pos + 1) {
            if after_count >= max_distance {
                break;
            }
            let p = arena.get(id);
            if Self::is_sample_eligible(arena, p) {
                pairs.push((p.unacked_bytes as f64, p.ack_delay_us.unwrap() as f64));
                after_count += 1;
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TcpFlags;

    fn raw(seq: u32, ack: u32, data_len: u32, flags: TcpFlags, ts_us: u64) -> RawPacket {
        RawPacket {
            ts_us,
            arrival_index: 0,
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 1234,
            dst_port: 80,
            seq,
            ack,
            flags,
            data_len,
            sacks: TcpSacks::empty(),
            mss_opt: None,
            timestamp_ok: false,
            unknown_option_size: 0,
        }
    }

    #[test]
    fn mss_inference_picks_even_divisor() {
        let mut ep = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
        let mut arena = PacketArena::new();
        // 2920 = 2 * 1460
        ep.add_packet(&mut arena, raw(1, 1, 2920, TcpFlags::ACK, 0));
        assert_eq!(ep.mss, Some(1460));
    }

    #[test]
    fn small_payload_never_sets_inferred_mss() {
        let mut ep = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
        let mut arena = PacketArena::new();
        ep.add_packet(&mut arena, raw(1, 1, 100, TcpFlags::ACK, 0));
        assert_eq!(ep.mss, None);
    }

    #[test]
    fn oversized_frame_splits_into_wire_packets() {
        let mut ep = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
        ep.set_advertised_mss(1000);
        let mut arena = PacketArena::new();
        let ids = ep.add_packet(&mut arena, raw(1, 1, 2500, TcpFlags::ACK, 0));
        assert_eq!(ids.len(), 3);
        assert_eq!(arena.get(ids[0]).raw.data_len, 1000);
        assert_eq!(arena.get(ids[1]).raw.seq, 1001);
        assert_eq!(arena.get(ids[2]).raw.data_len, 500);
    }

    #[test]
    fn ack_advances_seq_acked_and_feeds_rtt_sample() {
        let mut ep = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
        let mut arena = PacketArena::new();
        let ids = ep.add_packet(&mut arena, raw(1, 1, 100, TcpFlags::ACK, 1_000));
        let data_id = ids[0];

        let ack = raw(500, 101, 0, TcpFlags::ACK, 51_000);
        let ack_id = arena.push(ack.clone(), 1, 1);
        ep.process_ack(&mut arena, ack_id, &ack);

        assert_eq!(ep.seq_acked, 101);
        assert_eq!(arena.get(data_id).ack_delay_us, Some(50_000));
        assert!(ep.timer().has_sample());
    }

    #[test]
    fn dup_ack_with_truncated_option_is_queued_as_lookalike() {
        let mut ep = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
        let mut arena = PacketArena::new();
        ep.add_packet(&mut arena, raw(1, 1, 100, TcpFlags::ACK, 0));
        ep.seq_acked = 1; // nothing acked yet in this minimal harness

        let mut dup = raw(500, 1, 0, TcpFlags::ACK, 1_000);
        dup.unknown_option_size = 12;
        let dup_id = arena.push(dup.clone(), 1, 1);
        ep.process_ack(&mut arena, dup_id, &dup);

        assert_eq!(ep.lookalikes.len(), 1);
    }
}
