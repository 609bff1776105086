//! CSV schema and row emission (C11).
//!
//! One row per flow per direction, skipping directions with no sender, no
//! receiver, or a sender latched [`tcp_latency_core::Endpoint::is_bogus`].
//! Column order and the relative-sequence targets mirror the reference
//! implementation's `analyze_latency` tool; see `DESIGN.md` for the two
//! cosmetic deviations (no trailing comma, options loop bound to the
//! declared option length).

use std::io::Write;

use tcp_latency_core::{DelayAnalysis, Direction, FlowMap};

/// Relative sequence numbers the timer-estimate block is sampled at.
pub const TIMER_RELATIVE_SEQS: [u32; 7] = [1, 20 * 1024, 50 * 1024, 100 * 1024, 200 * 1024, 500 * 1024, 1000 * 1024];

const DIRECTIONS: [Direction; 2] = [Direction::AtoB, Direction::BtoA];

/// One entry per emitted CSV column, in order.
pub fn schema() -> Vec<String> {
    let mut fields: Vec<String> = [
        "filename",
        "flow_index",
        "direction",
        "num_data_packets",
        "num_losses",
        "num_missing_trigger_packets",
        "overall_delay_us",
        "propagation_delay_us",
        "loss_delay_us",
        "loss_trigger_delay_us",
        "queueing_delay_us",
        "other_delay_us",
        "no_queue_timeout_us",
        "timeout_us",
        "late_ack_arms_us",
        "late_ack_triggers_us",
        "late_trigger_for_trigger_us",
        "unacked_bytes_rtt_correlation",
        "unacked_bytes_rtt_fit_c0",
        "unacked_bytes_rtt_fit_c1",
        "unacked_bytes_rtt_fit_sum_sq",
        "goodput_before_worst_packet_bps",
        "bytes_acked_before_worst_packet",
        "bytes_needed_buffered",
        "bytes_unacked",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for seq in TIMER_RELATIVE_SEQS {
        fields.push(format!("seq_{seq}"));
        fields.push(format!("rto_us_at_seq_{seq}"));
        fields.push(format!("tlp_us_at_seq_{seq}"));
        fields.push(format!("tlp_delayed_ack_us_at_seq_{seq}"));
        fields.push(format!("queue_free_rto_us_at_seq_{seq}"));
        fields.push(format!("queue_free_tlp_us_at_seq_{seq}"));
        fields.push(format!("queue_free_tlp_delayed_ack_us_at_seq_{seq}"));
    }
    fields
}

/// Prints the 1-indexed `"NN field_name"` schema dump for `-p`/`--print-schema`.
pub fn print_schema<W: Write>(mut out: W) -> std::io::Result<()> {
    for (i, name) in schema().iter().enumerate() {
        writeln!(out, "{} {}", i + 1, name)?;
    }
    Ok(())
}

fn is_missing_trigger(p: &tcp_latency_core::packet::PacketRecord) -> bool {
    let c = p.classification;
    c.is_rtx && !(c.is_fast_rtx || c.is_rto_rtx || c.is_tlp || c.is_spurious_rtx)
}

/// Writes one CSV row per (flow, direction) that has both a sender and a
/// receiver and whose sender endpoint is not bogus.
pub fn write_rows<W: Write>(mut out: W, filename: &str, flow_map: &FlowMap) -> std::io::Result<()> {
    for (flow_index, _key, flow) in flow_map.flows() {
        for &direction in &DIRECTIONS {
            let sender = flow.endpoint(direction);
            if sender.is_bogus() {
                continue;
            }
            if sender.packets().is_empty() {
                continue;
            }

            let num_losses = sender.count_by(&flow.arena, |p| p.is_lost(&flow.arena));
            let num_missing_trigger = sender.count_by(&flow.arena, is_missing_trigger);

            let mut analysis = DelayAnalysis::new(sender, &flow.arena);
            let delays = analysis.analyze_tail_latency_full();
            let timer_estimates = analysis.get_timer_estimates(&TIMER_RELATIVE_SEQS);

            let mut fields: Vec<String> = vec![
                filename.to_string(),
                flow_index.to_string(),
                direction.as_str().to_string(),
                sender.num_data_packets.to_string(),
                num_losses.to_string(),
                num_missing_trigger.to_string(),
                delays.overall_us.to_string(),
                delays.propagation_us.to_string(),
                delays.loss_us.to_string(),
                delays.loss_trigger_us.to_string(),
                delays.queueing_us.to_string(),
                delays.other_us.to_string(),
                delays.loss_trigger_breakdown.no_queue_timeout_us.to_string(),
                delays.loss_trigger_breakdown.timeout_us.to_string(),
                delays.loss_trigger_breakdown.late_ack_arms_us.to_string(),
                delays.loss_trigger_breakdown.late_ack_triggers_us.to_string(),
                delays.loss_trigger_breakdown.late_trigger_for_trigger_us.to_string(),
                analysis.correlation().map_or_else(|| "0".to_string(), |c| c.to_string()),
                analysis.fit().c0.to_string(),
                analysis.fit().c1.to_string(),
                analysis.fit().sum_sq.to_string(),
                delays.goodput_before_worst_packet_bps.to_string(),
                delays.bytes_acked_before_worst_packet.to_string(),
                delays.bytes_needed_buffered.to_string(),
                delays.bytes_unacked.to_string(),
            ];

            for (i, seq) in TIMER_RELATIVE_SEQS.iter().enumerate() {
                let est = timer_estimates.get(i).copied().unwrap_or_default();
                fields.push(seq.to_string());
                fields.push(est.rto_us.to_string());
                fields.push(est.tlp_us.to_string());
                fields.push(est.tlp_delayed_ack_us.to_string());
                fields.push(est.queue_free_rto_us.to_string());
                fields.push(est.queue_free_tlp_us.to_string());
                fields.push(est.queue_free_tlp_delayed_ack_us.to_string());
            }

            writeln!(out, "{}", fields.join(","))?;
        }
    }
    Ok(())
}
