//! Datalink/IP/TCP header decoding (C9).
//!
//! Turns one captured frame into [`tcp_latency_core::RawPacket`], the sole
//! type the core crate ingests. Only Ethernet II and Linux "cooked" capture
//! (SLL) link layers are understood, and only IPv4 + TCP frames are
//! produced; everything else decodes to `None` and is dropped silently by
//! the caller, per `SPEC_FULL.md` §6.

use std::net::Ipv4Addr;

use tcp_latency_core::{RawPacket, TcpFlags, TcpSacks};

/// The datalink type established once per capture at `pcap_open` and
/// threaded explicitly into every frame decode — never stored as module or
/// thread-local state (`SPEC_FULL.md` §4.12, resolving the REDESIGN FLAG
/// against the reference implementation's process-wide global).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datalink {
    Ethernet,
    LinuxSll,
    Unsupported,
}

impl Datalink {
    /// Maps a `pcap` crate `Linktype` value (`DLT_*` constant) to the subset
    /// this decoder understands.
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            1 => Datalink::Ethernet,   // DLT_EN10MB
            113 => Datalink::LinuxSll, // DLT_LINUX_SLL
            _ => Datalink::Unsupported,
        }
    }
}

const ETHERTYPE_IP: u16 = 0x0800;
const ETHER_HEADER_LEN: usize = 14;
const SLL_HEADER_LEN: usize = 16;
const IP_PROTO_TCP: u8 = 6;

const TCPOPT_EOL: u8 = 0;
const TCPOPT_NOP: u8 = 1;
const TCPOPT_MAXSEG: u8 = 2;
const TCPOPT_SACK: u8 = 5;
const TCPOPT_TIMESTAMP: u8 = 8;

bitflags::bitflags! {
    struct RawTcpFlags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const PSH = 0b0000_1000;
        const ACK = 0b0001_0000;
        const URG = 0b0010_0000;
        const ECE = 0b0100_0000;
        const CWR = 0b1000_0000;
    }
}

/// Decodes one captured frame. Returns `None` for anything not IPv4/TCP, for
/// a frame too short to hold the headers its own length fields claim, or for
/// a packet whose TCP header is bogus per `SPEC_FULL.md` §4.7 (illegal
/// ports, a zero ACK number with ACK set, a SYN carrying payload, or an
/// illegal flag combination / data offset) — such packets are dropped
/// before they would ever reach a flow.
pub fn decode_frame(datalink: Datalink, data: &[u8], ts_us: u64, arrival_index: u64) -> Option<RawPacket> {
    let ip_payload = match datalink {
        Datalink::Ethernet => decode_ethernet(data)?,
        Datalink::LinuxSll => decode_sll(data)?,
        Datalink::Unsupported => return None,
    };
    let (src_addr, dst_addr, tcp_payload) = decode_ipv4(ip_payload)?;
    decode_tcp(src_addr, dst_addr, tcp_payload, ts_us, arrival_index)
}

fn decode_ethernet(data: &[u8]) -> Option<&[u8]> {
    if data.len() < ETHER_HEADER_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([data[12], data[13]]);
    if ethertype != ETHERTYPE_IP {
        return None;
    }
    Some(&data[ETHER_HEADER_LEN..])
}

fn decode_sll(data: &[u8]) -> Option<&[u8]> {
    if data.len() < SLL_HEADER_LEN {
        return None;
    }
    let protocol = u16::from_be_bytes([data[14], data[15]]);
    if protocol != ETHERTYPE_IP {
        return None;
    }
    Some(&data[SLL_HEADER_LEN..])
}

/// Returns `(src, dst, tcp_segment_bytes)` where `tcp_segment_bytes` is
/// capped to the IP header's own `total_length` field (not just whatever the
/// capture snap length happened to grab), matching the original's `len_`
/// versus `caplen_` distinction used by the TCP bogus-offset check below.
fn decode_ipv4(data: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, &[u8])> {
    if data.len() < 20 {
        return None;
    }
    let version = data[0] >> 4;
    if version != 4 {
        return None;
    }
    let ihl = (data[0] & 0x0F) as usize * 4;
    if ihl < 20 || data.len() < ihl {
        return None;
    }
    let protocol = data[9];
    if protocol != IP_PROTO_TCP {
        return None;
    }
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let src_addr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst_addr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

    let captured_after_ip = &data[ihl..];
    let _declared_after_ip = total_len.saturating_sub(ihl);
    Some((src_addr, dst_addr, captured_after_ip))
}

struct TcpOptions {
    sacks: TcpSacks,
    mss_opt: Option<u16>,
    timestamp_ok: bool,
    unknown_option_size: u32,
    bogus: bool,
}

fn parse_tcp_options(opt_bytes: &[u8], opt_len: usize) -> TcpOptions {
    let mut out = TcpOptions {
        sacks: TcpSacks::empty(),
        mss_opt: None,
        timestamp_ok: false,
        unknown_option_size: 0,
        bogus: false,
    };
    let cap_opt_len = opt_bytes.len().min(opt_len);
    let mut i = 0usize;
    while i < cap_opt_len {
        let kind = opt_bytes[i];
        if kind == TCPOPT_EOL {
            break;
        }
        if kind == TCPOPT_NOP {
            i += 1;
            continue;
        }
        if i + 1 >= cap_opt_len {
            out.unknown_option_size = (opt_len - i) as u32;
            break;
        }
        let opt_size = opt_bytes[i + 1] as usize;
        if opt_size == 0 || opt_size > opt_len {
            out.bogus = true;
            break;
        }
        match kind {
            TCPOPT_MAXSEG if i + 4 <= cap_opt_len => {
                out.mss_opt = Some(u16::from_be_bytes([opt_bytes[i + 2], opt_bytes[i + 3]]));
            }
            TCPOPT_TIMESTAMP => {
                out.timestamp_ok = true;
            }
            TCPOPT_SACK => {
                let body_avail = cap_opt_len.saturating_sub(i + 2).min(opt_size.saturating_sub(2));
                match TcpSacks::parse(opt_size, &opt_bytes[i + 2..i + 2 + body_avail]) {
                    Ok(sacks) => out.sacks = sacks,
                    Err(()) => {
                        out.bogus = true;
                        break;
                    }
                }
            }
            _ => {}
        }
        i += opt_size;
    }
    if !out.bogus && i < opt_len {
        out.unknown_option_size = (opt_len - i) as u32;
    }
    out
}

fn decode_tcp(
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    data: &[u8],
    ts_us: u64,
    arrival_index: u64,
) -> Option<RawPacket> {
    if data.len() < 20 {
        return None;
    }
    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let seq = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ack = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let data_offset = ((data[12] >> 4) as usize) * 4;
    let raw_flags = RawTcpFlags::from_bits_truncate(data[13]);

    if data_offset < 20 || data_offset > data.len() {
        log::trace!("dropping tcp packet: illegal data offset {data_offset}");
        return None;
    }
    if src_port == 0 || dst_port == 0 {
        log::trace!("dropping tcp packet: zero port");
        return None;
    }
    if raw_flags.contains(RawTcpFlags::ACK) && ack == 0 {
        log::trace!("dropping tcp packet: zero ack with ACK flag set");
        return None;
    }
    let data_len = (data.len() - data_offset) as u32;
    if raw_flags == RawTcpFlags::SYN && data_len > 0 {
        log::trace!("dropping tcp packet: SYN with payload");
        return None;
    }
    let main_flags = raw_flags - (RawTcpFlags::PSH | RawTcpFlags::URG | RawTcpFlags::ECE | RawTcpFlags::CWR);
    let legal = [
        RawTcpFlags::ACK,
        RawTcpFlags::SYN,
        RawTcpFlags::SYN | RawTcpFlags::ACK,
        RawTcpFlags::FIN | RawTcpFlags::ACK,
        RawTcpFlags::FIN,
        RawTcpFlags::RST,
        RawTcpFlags::RST | RawTcpFlags::ACK,
    ];
    if !legal.contains(&main_flags) {
        log::trace!("dropping tcp packet: illegal flag combination {main_flags:?}");
        return None;
    }

    let opt_len = data_offset - 20;
    let opts = if opt_len > 0 {
        parse_tcp_options(&data[20..data_offset.min(data.len())], opt_len)
    } else {
        TcpOptions { sacks: TcpSacks::empty(), mss_opt: None, timestamp_ok: false, unknown_option_size: 0, bogus: false }
    };
    if opts.bogus {
        log::trace!("dropping tcp packet: malformed options");
        return None;
    }

    let mut flags = TcpFlags::empty();
    flags.set(TcpFlags::FIN, raw_flags.contains(RawTcpFlags::FIN));
    flags.set(TcpFlags::SYN, raw_flags.contains(RawTcpFlags::SYN));
    flags.set(TcpFlags::RST, raw_flags.contains(RawTcpFlags::RST));
    flags.set(TcpFlags::PSH, raw_flags.contains(RawTcpFlags::PSH));
    flags.set(TcpFlags::ACK, raw_flags.contains(RawTcpFlags::ACK));
    flags.set(TcpFlags::URG, raw_flags.contains(RawTcpFlags::URG));

    Some(RawPacket {
        ts_us,
        arrival_index,
        src_addr,
        dst_addr,
        src_port,
        dst_port,
        seq,
        ack,
        flags,
        data_len,
        sacks: opts.sacks,
        mss_opt: opts.mss_opt,
        timestamp_ok: opts.timestamp_ok,
        unknown_option_size: opts.unknown_option_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_tcp_frame(flags: u8, seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45; // version 4, IHL 5
        let tcp_len = 20 + payload.len();
        let total_len = (20 + tcp_len) as u16;
        ip[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip[9] = IP_PROTO_TCP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&1234u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[8..12].copy_from_slice(&ack.to_be_bytes());
        tcp[12] = 5 << 4; // data offset 20 bytes
        tcp[13] = flags;
        tcp.extend_from_slice(payload);

        let mut eth = vec![0u8; ETHER_HEADER_LEN];
        eth[12..14].copy_from_slice(&ETHERTYPE_IP.to_be_bytes());
        eth.extend_from_slice(&ip);
        eth.extend_from_slice(&tcp);
        eth
    }

    #[test]
    fn decodes_plain_ack_over_ethernet() {
        let frame = ipv4_tcp_frame(0b0001_0000 | 1, 100, 50, b"hello");
        let pkt = decode_frame(Datalink::Ethernet, &frame, 1_000, 0).unwrap();
        assert_eq!(pkt.seq, 100);
        assert_eq!(pkt.ack, 50);
        assert_eq!(pkt.data_len, 5);
        assert!(pkt.flags.contains(TcpFlags::ACK));
    }

    #[test]
    fn drops_non_ip_ethertype() {
        let mut frame = vec![0u8; ETHER_HEADER_LEN + 20];
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes()); // ARP
        assert!(decode_frame(Datalink::Ethernet, &frame, 0, 0).is_none());
    }

    #[test]
    fn drops_syn_with_payload() {
        let frame = ipv4_tcp_frame(0b0000_0010, 0, 0, b"data");
        assert!(decode_frame(Datalink::Ethernet, &frame, 0, 0).is_none());
    }

    #[test]
    fn drops_zero_ack_with_ack_flag() {
        let frame = ipv4_tcp_frame(0b0001_0000, 0, 0, &[]);
        assert!(decode_frame(Datalink::Ethernet, &frame, 0, 0).is_none());
    }

    #[test]
    fn drops_illegal_flag_combination() {
        // SYN + RST is not a legal combination.
        let frame = ipv4_tcp_frame(0b0000_0110, 0, 0, &[]);
        assert!(decode_frame(Datalink::Ethernet, &frame, 0, 0).is_none());
    }

    #[test]
    fn unsupported_datalink_drops_everything() {
        let frame = ipv4_tcp_frame(0b0001_0000 | 1, 1, 1, &[]);
        assert!(decode_frame(Datalink::Unsupported, &frame, 0, 0).is_none());
    }
}
