//! The packet record and the arena that owns it.
//!
//! Packets reference each other in many directions (previous/next in an
//! endpoint's transmission order, previous-transmission/retransmission,
//! first-transmission, trigger). Rather than model that as a graph of
//! `Rc<RefCell<_>>` nodes, every packet lives in a single growable
//! [`PacketArena`] and cross-references are [`PacketId`] indices into it.
//! This keeps the graph acyclic-by-construction to inspect (no reference
//! cycles to break on drop) and makes packets cheap to hand around by value.

use std::net::Ipv4Addr;

use crate::sack::TcpSacks;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const PSH = 0b0000_1000;
        const ACK = 0b0001_0000;
        const URG = 0b0010_0000;
    }
}

/// Stable index into a [`PacketArena`]. Cheap to copy, valid for the
/// lifetime of the arena that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u32);

impl PacketId {
    pub(crate) fn new(idx: u32) -> Self {
        PacketId(idx)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// The header-parse layer's decoded-frame output, and the sole type the
/// rest of this crate ingests. Everything upstream of this (datalink/IP/TCP
/// parsing, PCAP iteration) lives outside this crate.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub ts_us: u64,
    pub arrival_index: u64,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub data_len: u32,
    pub sacks: TcpSacks,
    pub mss_opt: Option<u16>,
    pub timestamp_ok: bool,
    pub unknown_option_size: u32,
}

impl RawPacket {
    pub fn is_syn(&self) -> bool {
        self.flags.contains(TcpFlags::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.flags.contains(TcpFlags::ACK)
    }

    /// A SYN or FIN consumes one sequence number even without payload; a
    /// packet "requires an ACK" (and therefore takes part in the sender's
    /// sequence-number bookkeeping) if it carries data or is a SYN.
    pub fn requires_ack(&self) -> bool {
        self.data_len > 0 || self.is_syn()
    }

    pub fn seq_end(&self) -> u32 {
        let consumed = self.data_len
            + self.flags.contains(TcpFlags::SYN) as u32
            + self.flags.contains(TcpFlags::FIN) as u32;
        self.seq.wrapping_add(consumed)
    }
}

/// A snapshot of the three live timer estimates, taken at the moment a
/// packet was transmitted (or at the moment it armed the timers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerSnapshot {
    pub rto_us: i32,
    pub tlp_us: i32,
    pub tlp_delayed_us: i32,
}

/// Which timer (if any) fired to produce this retransmission, and whatever
/// extra bookkeeping that classification needs downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtxClassification {
    pub is_rtx: bool,
    pub is_fast_rtx: bool,
    pub is_rto_rtx: bool,
    pub is_slow_start_rtx: bool,
    pub is_tlp: bool,
    pub is_spurious_rtx: bool,
    pub is_dupack: bool,
}

/// One packet plus every annotation the endpoint reconstructor (C5) and the
/// delay-attribution engine (C7) hang off it. See `SPEC_FULL.md` §3 for the
/// semantics of each field.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub id: PacketId,
    pub raw: RawPacket,

    pub relative_seq: u32,
    pub relative_ack: u32,

    // Endpoint-local doubly linked list, in transmission order.
    pub prev: Option<PacketId>,
    pub next: Option<PacketId>,

    // Retransmission graph.
    pub prev_tx: Option<PacketId>,
    pub first_tx: Option<PacketId>,
    pub rtx: Option<PacketId>,

    /// The opposite-direction packet whose arrival provoked this
    /// transmission (the ACK/data packet underneath a fast retransmission).
    pub trigger_packet: Option<PacketId>,

    /// The packet that armed the timer which, upon firing, produced this
    /// retransmission (only meaningful when `classification.is_rto_rtx` or
    /// `classification.is_tlp`).
    pub armed_by: Option<PacketId>,

    pub out_of_order: bool,

    pub unacked_bytes: u32,
    pub acked_bytes: u32,

    pub ack_packet: Option<PacketId>,
    pub ack_delay_us: Option<i64>,
    pub last_ack: Option<PacketId>,

    pub rtx_delay_us: Option<i64>,
    pub final_rtx_delay_us: Option<i64>,
    pub num_rtx_attempts: u32,

    pub classification: RtxClassification,

    /// Backoff count (`num_rtos`) in effect when this packet was armed as an
    /// RTO candidate; needed to recompute a queue-free RTO later.
    pub backoffs: u8,
    /// Whether the TLP timer that produced this packet was armed with
    /// `delayed_ack = true`.
    pub tlp_delayed_ack: bool,

    pub timer_at_tx: TimerSnapshot,
}

impl PacketRecord {
    /// A packet is lost iff it has a successor retransmission that is not
    /// itself spurious (the `is_spurious_rtx` flag is carried by the
    /// retransmission that a DSACK covers, not by the original — see
    /// `mark_spurious` in `endpoint.rs`), hence the arena lookup.
    pub fn is_lost(&self, arena: &PacketArena) -> bool {
        match self.rtx {
            Some(rtx) => !arena.get(rtx).classification.is_spurious_rtx,
            None => false,
        }
    }

    pub fn is_sacked(&self) -> bool {
        self.ack_packet.is_none() && self.unacked_bytes == 0
    }
}

/// Owns every packet ever observed for one endpoint (or, transiently, for a
/// flow before its packets are handed to an endpoint). Packets are appended
/// and never removed; all cross-references are [`PacketId`]s into this
/// arena.
#[derive(Debug, Clone, Default)]
pub struct PacketArena {
    packets: Vec<PacketRecord>,
}

impl PacketArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn get(&self, id: PacketId) -> &PacketRecord {
        &self.packets[id.index() as usize]
    }

    pub fn get_mut(&mut self, id: PacketId) -> &mut PacketRecord {
        &mut self.packets[id.index() as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketRecord> {
        self.packets.iter()
    }

    /// Inserts a freshly-decoded packet, returning its arena id. `first_tx`
    /// is self-initialized to the new packet's own id (idempotent under
    /// re-application, per the invariant in `SPEC_FULL.md` §3).
    pub fn push(&mut self, raw: RawPacket, relative_seq: u32, relative_ack: u32) -> PacketId {
        let id = PacketId::new(self.packets.len() as u32);
        self.packets.push(PacketRecord {
            id,
            raw,
            relative_seq,
            relative_ack,
            prev: None,
            next: None,
            prev_tx: None,
            first_tx: Some(id),
            rtx: None,
            trigger_packet: None,
            armed_by: None,
            out_of_order: false,
            unacked_bytes: 0,
            acked_bytes: 0,
            ack_packet: None,
            ack_delay_us: None,
            last_ack: None,
            rtx_delay_us: None,
            final_rtx_delay_us: None,
            num_rtx_attempts: 0,
            classification: RtxClassification::default(),
            backoffs: 0,
            tlp_delayed_ack: false,
            timer_at_tx: TimerSnapshot::default(),
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(seq: u32, data_len: u32, flags: TcpFlags) -> RawPacket {
        RawPacket {
            ts_us: 0,
            arrival_index: 0,
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 1234,
            dst_port: 80,
            seq,
            ack: 0,
            flags,
            data_len,
            sacks: TcpSacks::empty(),
            mss_opt: None,
            timestamp_ok: false,
            unknown_option_size: 0,
        }
    }

    #[test]
    fn seq_end_accounts_for_syn_and_data() {
        assert_eq!(raw(100, 0, TcpFlags::SYN).seq_end(), 101);
        assert_eq!(raw(100, 50, TcpFlags::empty()).seq_end(), 150);
        assert_eq!(raw(100, 0, TcpFlags::ACK).seq_end(), 100);
    }

    #[test]
    fn first_tx_self_initializes() {
        let mut arena = PacketArena::new();
        let id = arena.push(raw(0, 10, TcpFlags::ACK), 1, 1);
        assert_eq!(arena.get(id).first_tx, Some(id));
    }

    #[test]
    fn is_lost_requires_non_spurious_rtx() {
        let mut arena = PacketArena::new();
        let a = arena.push(raw(0, 10, TcpFlags::ACK), 1, 1);
        let b = arena.push(raw(0, 10, TcpFlags::ACK), 1, 1);
        arena.get_mut(a).rtx = Some(b);
        assert!(arena.get(a).is_lost(&arena));
        arena.get_mut(b).classification.is_spurious_rtx = true;
        assert!(!arena.get(a).is_lost(&arena));
    }
}
