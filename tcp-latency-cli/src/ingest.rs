//! Offline PCAP ingestion (C10).
//!
//! Opens a capture file, reads its datalink type exactly once, and feeds
//! every decodable frame into a [`tcp_latency_core::FlowMap`]. The datalink
//! type is threaded explicitly through [`crate::header::decode_frame`]
//! rather than stashed in a global, per `SPEC_FULL.md` §4.12.

use std::path::Path;

use anyhow::{Context, Result};
use pcap::Capture;
use tcp_latency_core::FlowMap;

use crate::header::{decode_frame, Datalink};

/// Reads every frame in `path` and returns the resulting flow table.
/// Frames this module cannot decode (non-IPv4/TCP, bogus TCP headers,
/// unsupported link types) are silently dropped, not errors.
pub fn ingest_pcap(path: &Path) -> Result<FlowMap> {
    let mut capture = Capture::from_file(path)
        .with_context(|| format!("opening pcap file {}", path.display()))?;

    let datalink = Datalink::from_dlt(capture.get_datalink().0);
    if datalink == Datalink::Unsupported {
        log::warn!("unsupported datalink type {:?}; no packets will decode", capture.get_datalink());
    }

    let mut flow_map = FlowMap::new();
    let mut arrival_index: u64 = 0;
    loop {
        let packet = match capture.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::NoMorePackets) => break,
            Err(err) => return Err(err).context("reading packet from pcap capture"),
        };
        let ts_us = packet.header.ts.tv_sec as u64 * 1_000_000 + packet.header.ts.tv_usec as u64;
        if let Some(raw) = decode_frame(datalink, packet.data, ts_us, arrival_index) {
            flow_map.ingest(raw);
        }
        arrival_index += 1;
    }

    Ok(flow_map)
}
