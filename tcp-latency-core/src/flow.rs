//! Bidirectional flow pairing and the 5-tuple demultiplexer (C6).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::endpoint::Endpoint;
use crate::packet::{PacketArena, PacketId, RawPacket};

/// Which side of a [`Flow`] an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AtoB,
    BtoA,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::AtoB => "a2b",
            Direction::BtoA => "b2a",
        }
    }
}

/// Canonical, order-independent identity for a TCP flow: the unordered pair
/// of `(addr, port)` endpoints. Used both as the [`FlowMap`] key and, via its
/// `Ord` impl, to assign output row ordering (flows are enumerated in
/// 4-tuple lexicographic order, matching a `BTreeMap` keyed the same way the
/// reference implementation's `std::map<TcpFlowId, …>` was).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlowKey {
    pub low_addr: Ipv4Addr,
    pub low_port: u16,
    pub high_addr: Ipv4Addr,
    pub high_port: u16,
}

impl FlowKey {
    fn from_packet(raw: &RawPacket) -> (FlowKey, bool) {
        let forward = (raw.src_addr, raw.src_port, raw.dst_addr, raw.dst_port);
        let reverse = (raw.dst_addr, raw.dst_port, raw.src_addr, raw.src_port);
        if forward <= reverse {
            (
                FlowKey { low_addr: forward.0, low_port: forward.1, high_addr: forward.2, high_port: forward.3 },
                true,
            )
        } else {
            (
                FlowKey { low_addr: reverse.0, low_port: reverse.1, high_addr: reverse.2, high_port: reverse.3 },
                false,
            )
        }
    }
}

/// A pair of endpoints plus the packet arena they share. The first packet
/// observed on the flow creates endpoint `a` (that packet's sender); the
/// first opposing packet creates endpoint `b`.
#[derive(Debug, Clone)]
pub struct Flow {
    pub arena: PacketArena,
    pub a: Endpoint,
    pub b: Endpoint,
    pending_mss_for_a: Option<u16>,
    pending_mss_for_b: Option<u16>,
}

impl Flow {
    fn new(first: &RawPacket) -> Self {
        Flow {
            arena: PacketArena::new(),
            a: Endpoint::new(first.src_addr, first.src_port),
            b: Endpoint::new(first.dst_addr, first.dst_port),
            pending_mss_for_a: None,
            pending_mss_for_b: None,
        }
    }

    fn is_from_a(&self, raw: &RawPacket) -> bool {
        raw.src_addr == self.a.addr && raw.src_port == self.a.port
    }

    /// Ingests one already-parsed, already-demultiplexed packet. Installs
    /// any buffered SYN MSS on the receiving endpoint, runs the sender's
    /// `AddPacket` pipeline, then the receiver's ACK processing.
    pub fn ingest(&mut self, raw: RawPacket) {
        let from_a = self.is_from_a(&raw);

        if raw.is_syn() {
            if let Some(mss) = raw.mss_opt {
                if from_a {
                    self.pending_mss_for_b = Some(mss);
                } else {
                    self.pending_mss_for_a = Some(mss);
                }
            }
        }

        if from_a {
            if let Some(mss) = self.pending_mss_for_b.take() {
                self.b.set_advertised_mss(mss);
            }
        } else if let Some(mss) = self.pending_mss_for_a.take() {
            self.a.set_advertised_mss(mss);
        }

        let (sender, receiver): (&mut Endpoint, &mut Endpoint) =
            if from_a { (&mut self.a, &mut self.b) } else { (&mut self.b, &mut self.a) };

        let ids = sender.add_packet(&mut self.arena, raw.clone());
        let Some(&representative) = ids.first() else { return };
        if let Some(&last) = ids.last() {
            receiver.note_received_from_peer(last);
        }
        if raw.is_ack() {
            receiver.process_ack(&mut self.arena, representative, &raw);
        }
    }

    pub fn endpoint(&self, dir: Direction) -> &Endpoint {
        match dir {
            Direction::AtoB => &self.a,
            Direction::BtoA => &self.b,
        }
    }

    /// Walks `a`'s owned packets and splits them into one new [`Flow`] per
    /// request/response alternation (an A→B transmission following B→A data
    /// counts as a new segment). Used for regression testing, not the main
    /// pipeline — `SPEC_FULL.md` §4.4.
    pub fn split_into_segments(&self) -> Vec<Flow> {
        let mut segments = Vec::new();
        let mut last_sender_was_a: Option<bool> = None;
        let mut current: Option<Flow> = None;

        for &id in self.a.packets() {
            self.replay_packet_into_segments(id, true, &mut last_sender_was_a, &mut current, &mut segments);
        }
        for &id in self.b.packets() {
            self.replay_packet_into_segments(id, false, &mut last_sender_was_a, &mut current, &mut segments);
        }

        if let Some(seg) = current.take() {
            segments.push(seg);
        }
        segments
    }

    fn replay_packet_into_segments(
        &self,
        id: PacketId,
        is_a: bool,
        last_sender_was_a: &mut Option<bool>,
        current: &mut Option<Flow>,
        segments: &mut Vec<Flow>,
    ) {
        let raw = self.arena.get(id).raw.clone();
        if raw.data_len == 0 {
            return;
        }
        let starts_new_segment = match (*last_sender_was_a, is_a) {
            (Some(prev_a), now_a) => prev_a != now_a,
            (None, _) => true,
        };
        if starts_new_segment {
            if let Some(seg) = current.take() {
                segments.push(seg);
            }
            *current = Some(Flow::new(&raw));
        }
        *last_sender_was_a = Some(is_a);
        if let Some(seg) = current.as_mut() {
            seg.ingest(raw);
        }
    }
}

/// Demultiplexes raw packets into flows keyed by the unordered 4-tuple.
#[derive(Debug, Clone, Default)]
pub struct FlowMap {
    flows: BTreeMap<FlowKey, Flow>,
}

impl FlowMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the flow the packet belongs to (creating one on first
    /// observation) and ingests it.
    pub fn ingest(&mut self, raw: RawPacket) {
        let (key, _) = FlowKey::from_packet(&raw);
        let flow = self.flows.entry(key).or_insert_with(|| Flow::new(&raw));
        flow.ingest(raw);
    }

    /// Flows in 4-tuple lexicographic order — the order output rows are
    /// assigned their flow index in.
    pub fn flows(&self) -> impl Iterator<Item = (usize, &FlowKey, &Flow)> {
        self.flows.iter().enumerate().map(|(i, (k, f))| (i, k, f))
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TcpFlags;
    use crate::sack::TcpSacks;

    fn raw(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), seq: u32, ack: u32, data_len: u32, flags: TcpFlags) -> RawPacket {
        RawPacket {
            ts_us: 0,
            arrival_index: 0,
            src_addr: src.0,
            dst_addr: dst.0,
            src_port: src.1,
            dst_port: dst.1,
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
    fn reverse_direction_packet_reuses_existing_flow() {
        let a = (Ipv4Addr::new(10, 0, 0, 1), 1000u16);
        let b = (Ipv4Addr::new(10, 0, 0, 2), 80u16);
        let mut map = FlowMap::new();
        map.ingest(raw(a, b, 1, 1, 10, TcpFlags::ACK));
        map.ingest(raw(b, a, 1, 11, 10, TcpFlags::ACK));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn distinct_4_tuples_create_separate_flows() {
        let a = (Ipv4Addr::new(10, 0, 0, 1), 1000u16);
        let b = (Ipv4Addr::new(10, 0, 0, 2), 80u16);
        let c = (Ipv4Addr::new(10, 0, 0, 3), 443u16);
        let mut map = FlowMap::new();
        map.ingest(raw(a, b, 1, 1, 10, TcpFlags::ACK));
        map.ingest(raw(a, c, 1, 1, 10, TcpFlags::ACK));
        assert_eq!(map.len(), 2);
    }
}
