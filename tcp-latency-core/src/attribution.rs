//! Worst-packet delay attribution (C7).
//!
//! Given one fully-reconstructed [`Endpoint`], finds the data packet with
//! the worst observed ACK delay and decomposes that delay into propagation,
//! loss, loss-trigger (the delay of whatever caused the loss to be
//! detected), queueing, and a residual "other" bucket. See `SPEC_FULL.md`
//! §4.6 for the decomposition rules this ports; the core idea — correlating
//! unacked-byte counts against observed RTTs, then replaying the RTO/TLP
//! timers with the fitted queueing component subtracted out — only makes
//! sense with the whole endpoint's packet history in view, which is why
//! this lives as its own analysis pass rather than inline in [`Endpoint`].

use crate::endpoint::Endpoint;
use crate::packet::{PacketArena, PacketId};
use crate::seq;
use crate::stats::{linear_fit, pearson_correlation, predict, LinearFit};
use crate::timer::{adjust_rto_for_backoff, RttSample, TcpTimer};

/// Minimum Pearson correlation between unacked-byte counts and observed ACK
/// delay required before any delay is attributed to queueing.
pub const MIN_UNACKED_BYTES_RTT_CORRELATION: f64 = 0.5;

/// Breakdown of [`Delays::loss_trigger_us`] into why the loss-detecting
/// event fired late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerDelays {
    /// Base timeout recomputed assuming none of the RTT samples feeding the
    /// timer suffered queueing delay.
    pub no_queue_timeout_us: u32,
    /// Delay caused by the live timeout being inflated by queueing relative
    /// to the queue-free recomputation above.
    pub timeout_us: u32,
    /// Delay accumulated because the timer that ultimately fired was
    /// (re)armed by a late-arriving ACK, itself delayed by queueing of the
    /// packet that triggered that ACK.
    pub late_ack_arms_us: u32,
    /// Delay of the packet whose arrival triggered this retransmission
    /// directly (e.g. the SACKed packet behind a fast retransmit).
    pub late_ack_triggers_us: u32,
    /// For a slow-start retransmission, the recursively-attributed delay of
    /// the trigger packet's own original transmission.
    pub late_trigger_for_trigger_us: u32,
}

impl TriggerDelays {
    /// Deliberately excludes `no_queue_timeout_us` — that term is the
    /// *baseline* timeout, not a delay on top of it.
    pub fn total(&self) -> u32 {
        self.timeout_us + self.late_ack_arms_us + self.late_ack_triggers_us + self.late_trigger_for_trigger_us
    }
}

/// The five-way decomposition of one packet's worst-case ACK delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delays {
    pub overall_us: u32,
    pub propagation_us: u32,
    pub loss_us: u32,
    /// Delay between the original transmission and the first retransmission,
    /// independent of the constraint clamping below. Zero if not lost.
    pub time_to_first_rtx_us: u32,
    pub loss_trigger_us: u32,
    pub loss_trigger_breakdown: TriggerDelays,
    pub queueing_us: u32,
    pub other_us: u32,

    pub goodput_before_worst_packet_bps: u64,
    pub bytes_acked_before_worst_packet: u64,
    pub bytes_needed_buffered: u64,

    pub bytes_unacked: u32,
}

impl Delays {
    /// `other = overall - (propagation + loss + loss_trigger + queueing)`,
    /// clamped to zero if the named categories already account for more
    /// than the observed overall delay (can happen at the margins of the
    /// constraint-clamping step that runs just before this).
    fn set_other_delay(&mut self) {
        let accounted = self.propagation_us as u64
            + self.loss_us as u64
            + self.loss_trigger_us as u64
            + self.queueing_us as u64;
        self.other_us = if accounted > self.overall_us as u64 {
            0
        } else {
            (self.overall_us as u64 - accounted) as u32
        };
    }
}

/// One row of [`DelayAnalysis::get_timer_estimates`]: the live and
/// queue-free timer values in effect at the first packet whose relative
/// sequence number reaches a requested target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerEstimates {
    pub seq: u32,
    pub rto_us: u32,
    pub tlp_us: u32,
    pub tlp_delayed_ack_us: u32,
    pub queue_free_rto_us: u32,
    pub queue_free_tlp_us: u32,
    pub queue_free_tlp_delayed_ack_us: u32,
}

/// One tuple of the queue-free timer replay: the arrival index of the ACK
/// after which these recomputed timeout estimates apply, plus the RTO/TLP
/// estimates themselves.
type IndexTimeouts = (u64, u32, u32, u32);

/// Runs the delay-attribution pass over one endpoint's reconstructed
/// packets. Borrows both the endpoint and the packet arena it points into;
/// neither is mutated.
pub struct DelayAnalysis<'a> {
    endpoint: &'a Endpoint,
    arena: &'a PacketArena,

    first_packet: Option<PacketId>,
    worst_packet: Option<PacketId>,

    delays: Delays,

    fit: LinearFit,
    /// `None` until a linear fit has been attempted at least once; mirrors
    /// the reference implementation's `correlation_ == -1` sentinel, which
    /// [`Self::get_timer_estimates`] relies on to skip recomputing a fit
    /// that `analyze_tail_latency` already attempted (even an unsuccessful
    /// one — that quirk is preserved deliberately, see `DESIGN.md`).
    correlation: Option<f64>,

    no_queue_timeouts: Vec<IndexTimeouts>,
}

impl<'a> DelayAnalysis<'a> {
    pub fn new(endpoint: &'a Endpoint, arena: &'a PacketArena) -> Self {
        DelayAnalysis {
            endpoint,
            arena,
            first_packet: None,
            worst_packet: None,
            delays: Delays::default(),
            fit: LinearFit::default(),
            correlation: None,
            no_queue_timeouts: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.first_packet = None;
        self.worst_packet = None;
        self.delays = Delays::default();
        self.fit = LinearFit::default();
        self.correlation = None;
        self.no_queue_timeouts.clear();
    }

    pub fn fit(&self) -> LinearFit {
        self.fit
    }

    pub fn correlation(&self) -> Option<f64> {
        self.correlation
    }

    /// Full decomposition for the whole endpoint. Shorthand for
    /// [`Self::analyze_tail_latency`] with no sequence cutoff.
    pub fn analyze_tail_latency_full(&mut self) -> Delays {
        self.analyze_tail_latency(None)
    }

    /// Finds the data packet with the worst ACK delay (restricted to
    /// packets whose relative sequence number is at most `max_relative_seq`,
    /// when given) and attributes its delay.
    pub fn analyze_tail_latency(&mut self, max_relative_seq: Option<u32>) -> Delays {
        self.reset();
        let packets = self.endpoint.packets();
        if packets.is_empty() {
            return self.delays;
        }

        for &id in packets {
            let p = self.arena.get(id);
            if let Some(max_seq) = max_relative_seq {
                if seq::after(p.relative_seq, max_seq) {
                    break;
                }
            }
            if p.raw.data_len == 0 {
                continue;
            }
            if self.first_packet.is_none() {
                self.first_packet = Some(id);
            }
            let is_worse = match self.worst_packet {
                None => true,
                Some(w) => p.ack_delay_us.unwrap_or(0) > self.arena.get(w).ack_delay_us.unwrap_or(0),
            };
            if is_worse {
                self.worst_packet = Some(id);
            }
        }

        let Some(worst) = self.worst_packet else {
            return self.delays;
        };
        self.delays.bytes_unacked = self.arena.get(worst).unacked_bytes;

        self.compute_goodput_metrics();

        self.delays.overall_us = self.arena.get(worst).ack_delay_us.unwrap_or(0).max(0) as u32;
        if self.delays.overall_us == 0 {
            return self.delays;
        }
        self.delays.propagation_us = self.endpoint.min_rtt_us.unwrap_or(0).max(0) as u32;

        if self.arena.get(worst).is_lost(self.arena) {
            self.delays.loss_us = self.arena.get(worst).final_rtx_delay_us.unwrap_or(0).max(0) as u32;
            if let Some(rtx) = self.arena.get(worst).rtx {
                self.delays.time_to_first_rtx_us =
                    (self.arena.get(rtx).raw.ts_us as i64 - self.arena.get(worst).raw.ts_us as i64).max(0) as u32;
            }
        }

        if self.calculate_rtt_linear_fit(worst) && self.correlation.unwrap_or(-1.0) >= MIN_UNACKED_BYTES_RTT_CORRELATION
        {
            let mut last_tx = worst;
            while self.arena.get(last_tx).is_lost(self.arena) {
                last_tx = self.arena.get(last_tx).rtx.expect("a lost packet always has an rtx");
            }
            self.delays.queueing_us = self.get_queueing_delay(last_tx);
            let breakdown = self.get_trigger_delay(worst);
            self.delays.loss_trigger_us = breakdown.total();
            self.delays.loss_trigger_breakdown = breakdown;
        }

        self.enforce_constraints();
        self.delays.set_other_delay();
        self.delays
    }

    /// The 5-way decomposition's components cannot exceed `overall_us`
    /// between them, and delay attributed to a loss trigger must be carved
    /// out of the raw loss delay rather than double-counted. See
    /// `SPEC_FULL.md` §4.6 step 6.
    fn enforce_constraints(&mut self) {
        let d = &mut self.delays;
        let non_prop_loss_us =
            (d.overall_us as i64 - d.loss_us as i64 - d.propagation_us as i64).max(0) as u32;
        if d.queueing_us > non_prop_loss_us {
            d.queueing_us = non_prop_loss_us;
        }

        let mut base_loss_us = d.loss_trigger_breakdown.no_queue_timeout_us;
        if d.loss_trigger_breakdown.late_ack_arms_us > 0 || d.loss_trigger_breakdown.late_ack_triggers_us > 0 {
            base_loss_us = base_loss_us.saturating_add(d.propagation_us);
        }

        if d.loss_us < d.loss_trigger_us {
            d.loss_us = 0;
        } else {
            d.loss_us -= d.loss_trigger_us;
        }

        if d.loss_us < base_loss_us {
            let diff = base_loss_us - d.loss_us;
            d.loss_us += diff;
            d.loss_trigger_us = d.loss_trigger_us.saturating_sub(diff);
        }
    }

    /// Goodput achieved up to the worst packet, and the receive-buffer
    /// depth that would have been needed to sustain that goodput rate
    /// across the ACKs leading up to it (used to gauge whether the delay
    /// looks consistent with a receive-window- or buffer-limited sender).
    fn compute_goodput_metrics(&mut self) {
        let worst = self.worst_packet.expect("set by caller");
        let first = self.first_packet.expect("set by caller");

        let acked_bytes = self.arena.get(worst).acked_bytes as u64;
        let elapsed_time_us = self.arena.get(worst).raw.ts_us as i64 - self.arena.get(first).raw.ts_us as i64;
        if elapsed_time_us <= 0 {
            return;
        }
        self.delays.bytes_acked_before_worst_packet = acked_bytes;
        self.delays.goodput_before_worst_packet_bps = acked_bytes * 8_000_000 / elapsed_time_us as u64;

        let (Some(start_ack), Some(end_ack)) =
            (self.arena.get(worst).last_ack, self.arena.get(worst).ack_packet)
        else {
            return;
        };

        let mut buffer_needed: i64 = 0;
        let mut max_buffer_needed: i64 = 0;
        let mut current_ack_no = self.arena.get(start_ack).raw.ack;
        let mut current_timestamp = self.arena.get(worst).raw.ts_us as i64;
        let mut current_ack = self.arena.get(start_ack).next;

        while let Some(cur_id) = current_ack {
            if cur_id == end_ack {
                break;
            }
            let cur = self.arena.get(cur_id);
            let elapsed = cur.raw.ts_us as i64 - current_timestamp;
            current_timestamp = cur.raw.ts_us as i64;

            buffer_needed += elapsed * self.delays.goodput_before_worst_packet_bps as i64 / 8_000_000;
            if buffer_needed > max_buffer_needed {
                max_buffer_needed = buffer_needed;
            }
            if seq::after(cur.raw.ack, current_ack_no) {
                buffer_needed -= cur.raw.ack.wrapping_sub(current_ack_no) as i64;
                current_ack_no = cur.raw.ack;
            }
            current_ack = cur.next;
        }

        self.delays.bytes_needed_buffered = max_buffer_needed.max(0) as u64;
    }

    /// Recomputed timer estimates (live and queue-free) at the first packet
    /// reaching each requested relative sequence number. `relative_seqs`
    /// must be sorted ascending. Returns one [`TimerEstimates`] per input,
    /// zeroed for any target never reached.
    pub fn get_timer_estimates(&mut self, relative_seqs: &[u32]) -> Vec<TimerEstimates> {
        let mut out = Vec::new();
        if relative_seqs.is_empty() {
            return out;
        }
        let Some(worst) = self.worst_packet else {
            return out;
        };

        if self.correlation.is_none()
            && (!self.calculate_rtt_linear_fit(worst)
                || self.correlation.unwrap_or(-1.0) < MIN_UNACKED_BYTES_RTT_CORRELATION)
        {
            return out;
        }

        let mut queue_free_timer = TcpTimer::new();
        let samples: Vec<RttSample> = self.endpoint.timer().samples().to_vec();
        if samples.is_empty() {
            return out;
        }

        let mut sample_idx = 0usize;
        let mut current_ack_index = self.ack_arrival_index(samples[0].packet);

        let mut index = 0usize;
        for &id in self.endpoint.packets() {
            let p = self.arena.get(id);

            while sample_idx < samples.len() && current_ack_index < p.raw.arrival_index {
                let sample = samples[sample_idx];
                let queueing_delay_us = self.get_queueing_delay(sample.packet) as i32;
                if sample.rtt_us > queueing_delay_us {
                    let adjusted = sample.rtt_us - queueing_delay_us;
                    queue_free_timer.add_sample(sample.packet, sample.seq_acked, sample.seq_next, adjusted);
                }
                sample_idx += 1;
                if sample_idx < samples.len() {
                    current_ack_index = self.ack_arrival_index(samples[sample_idx].packet);
                }
            }

            if !seq::before(p.relative_seq, relative_seqs[index]) {
                out.push(TimerEstimates {
                    seq: relative_seqs[index],
                    rto_us: p.timer_at_tx.rto_us.max(0) as u32,
                    tlp_us: p.timer_at_tx.tlp_us.max(0) as u32,
                    tlp_delayed_ack_us: p.timer_at_tx.tlp_delayed_us.max(0) as u32,
                    queue_free_rto_us: queue_free_timer.get_rto0().max(0) as u32,
                    queue_free_tlp_us: queue_free_timer.get_tlp(false).max(0) as u32,
                    queue_free_tlp_delayed_ack_us: queue_free_timer.get_tlp(true).max(0) as u32,
                });
                index += 1;
                if index >= relative_seqs.len() {
                    break;
                }
            }
        }

        while index < relative_seqs.len() {
            out.push(TimerEstimates::default());
            index += 1;
        }
        out
    }

    fn ack_arrival_index(&self, data_packet: PacketId) -> u64 {
        self.arena
            .get(data_packet)
            .ack_packet
            .map(|ack| self.arena.get(ack).raw.arrival_index)
            .unwrap_or(u64::MAX)
    }

    /// Tries three sample sets (all history, the 60 samples around `packet`,
    /// the 60 before it) and keeps whichever yields the highest correlation
    /// with a positive slope. Returns `true` if any of them did.
    fn calculate_rtt_linear_fit(&mut self, packet: PacketId) -> bool {
        let mut found = false;
        for &(use_around, use_older_only) in &[(false, false), (true, false), (true, true)] {
            if let Some((fit, correlation)) = self.get_rtt_linear_fit(packet, use_around, use_older_only) {
                if correlation > self.correlation.unwrap_or(-1.0) {
                    self.fit = fit;
                    self.correlation = Some(correlation);
                    found = true;
                }
            }
        }
        found
    }

    fn get_rtt_linear_fit(
        &self,
        packet: PacketId,
        use_packets_around_only: bool,
        use_older_packets_only: bool,
    ) -> Option<(LinearFit, f64)> {
        let pairs = if use_packets_around_only {
            self.endpoint
                .unacked_bytes_rtt_pairs_around_packet(self.arena, packet, 60, use_older_packets_only)
        } else {
            self.endpoint.unacked_bytes_rtt_pairs(self.arena)
        };
        if pairs.is_empty() {
            return None;
        }

        let unacked_bytes: Vec<f64> = pairs.iter().map(|&(b, _)| b).collect();
        let rtts: Vec<f64> = pairs.iter().map(|&(_, r)| r).collect();

        let correlation = pearson_correlation(&unacked_bytes, &rtts);
        let fit = linear_fit(&unacked_bytes, &rtts);

        // Only useful if RTT grows with the number of unacked bytes.
        if fit.c1 > 0.0 {
            Some((fit, correlation))
        } else {
            None
        }
    }

    /// Extrapolates the queueing delay this packet's transmission likely
    /// experienced, from the unacked-bytes-vs-RTT fit. `0` if the packet's
    /// own payload accounts for all its unacked bytes (nothing was queued
    /// ahead of it) or if the fit predicts less delay than either the
    /// y-intercept or the propagation floor.
    fn get_queueing_delay(&self, packet: PacketId) -> u32 {
        let p = self.arena.get(packet);
        if p.unacked_bytes <= p.raw.data_len {
            return 0;
        }
        let bytes_before_tx = (p.unacked_bytes - p.raw.data_len) as f64;
        let estimated_rtt_us = predict(&self.fit, bytes_before_tx);

        let prop_delay_us = self.delays.propagation_us as f64;
        let min_delay_us = self.fit.c0.max(prop_delay_us);

        if min_delay_us < estimated_rtt_us {
            (estimated_rtt_us - min_delay_us).round().max(0.0) as u32
        } else {
            0
        }
    }

    /// Walks backward from the transmission that finally reached the
    /// receiver through the retransmission chain, attributing delay to
    /// whatever is responsible for each round's timer firing late: an
    /// inflated timeout (vs. its queue-free recomputation), a late-arming
    /// ACK, or — once a trigger packet is found — the queueing delay of
    /// that trigger (and, for a slow-start retransmission, the trigger's own
    /// recursively-attributed trigger delay).
    fn get_trigger_delay(&mut self, packet: PacketId) -> TriggerDelays {
        let mut delays = TriggerDelays::default();
        if !self.arena.get(packet).is_lost(self.arena) {
            return delays;
        }

        let mut last_tx = self.arena.get(packet).rtx.expect("a lost packet always has an rtx");
        while self.arena.get(last_tx).is_lost(self.arena) {
            last_tx = self.arena.get(last_tx).rtx.expect("a lost packet always has an rtx");
        }

        if self.no_queue_timeouts.is_empty() {
            self.compute_queue_free_timeouts();
        }

        let mut current_tx = last_tx;
        loop {
            let Some(prev_tx) = self.arena.get(current_tx).prev_tx else {
                break;
            };

            if let Some(trigger) = self.arena.get(current_tx).trigger_packet {
                delays.late_ack_triggers_us = self.get_queueing_delay(trigger);
                if self.arena.get(current_tx).classification.is_slow_start_rtx {
                    if let Some(trigger_first_tx) = self.arena.get(trigger).first_tx {
                        delays.late_trigger_for_trigger_us = self.get_trigger_delay(trigger_first_tx).total();
                    }
                }
                return delays;
            }

            let cls = self.arena.get(current_tx).classification;
            let armed_by = self.arena.get(current_tx).armed_by;
            let (no_queue_timeout, actual_timeout) = if cls.is_rto_rtx {
                let nq = self.get_queue_free_rto(current_tx);
                let actual = armed_by
                    .map(|armer| {
                        (self.arena.get(current_tx).raw.ts_us as i64 - self.arena.get(armer).raw.ts_us as i64)
                            .max(0) as u32
                    })
                    .unwrap_or(0);
                (nq, actual)
            } else if cls.is_tlp {
                let nq = if self.arena.get(current_tx).tlp_delayed_ack {
                    self.get_queue_free_delayed_tlp(current_tx)
                } else {
                    self.get_queue_free_tlp(current_tx)
                };
                let actual = armed_by
                    .map(|armer| {
                        (self.arena.get(current_tx).raw.ts_us as i64 - self.arena.get(armer).raw.ts_us as i64)
                            .max(0) as u32
                    })
                    .unwrap_or(0);
                (nq, actual)
            } else {
                (0, 0)
            };

            if no_queue_timeout > 0 {
                delays.no_queue_timeout_us += no_queue_timeout;
                if actual_timeout > no_queue_timeout {
                    delays.timeout_us += actual_timeout - no_queue_timeout;
                }
            }

            delays.late_ack_arms_us += self.get_arming_timer_delay(current_tx);

            current_tx = prev_tx;
        }

        delays
    }

    /// If `packet` is an RTO or TLP retransmission whose timer was armed by
    /// a peer packet (rather than one of this endpoint's own), the firing
    /// was delayed by however long that peer packet took to be sent in
    /// reply to whatever triggered it — returns that queueing delay, or `0`
    /// if the timer was armed locally or has no known trigger.
    fn get_arming_timer_delay(&self, packet: PacketId) -> u32 {
        let p = self.arena.get(packet);
        let armer = if p.classification.is_rto_rtx || p.classification.is_tlp {
            p.armed_by
        } else {
            None
        };
        let Some(armer) = armer else {
            return 0;
        };
        let armer_rec = self.arena.get(armer);
        let same_endpoint = armer_rec.raw.src_addr == p.raw.src_addr && armer_rec.raw.src_port == p.raw.src_port;
        if same_endpoint {
            return 0;
        }
        let Some(trigger) = armer_rec.trigger_packet else {
            return 0;
        };
        self.get_queueing_delay(trigger)
    }

    /// Replays every RTT sample with its estimated queueing component
    /// subtracted, recording the RTO/TLP timeouts a queue-free connection
    /// would have had after each one. Indexed by the acking packet's arrival
    /// order so later lookups can find "the queue-free estimate in effect
    /// just before packet X was sent".
    fn compute_queue_free_timeouts(&mut self) {
        let mut timer = TcpTimer::new();
        self.no_queue_timeouts.clear();

        for sample in self.endpoint.timer().samples().to_vec() {
            let queueing_delay_us = self.get_queueing_delay(sample.packet) as i32;
            if sample.rtt_us > queueing_delay_us {
                let adjusted_rtt = sample.rtt_us - queueing_delay_us;
                timer.add_sample(sample.packet, sample.seq_acked, sample.seq_next, adjusted_rtt);

                if let Some(ack_id) = self.arena.get(sample.packet).ack_packet {
                    let ack_index = self.arena.get(ack_id).raw.arrival_index;
                    self.no_queue_timeouts
                        .push((ack_index, timer.get_rto0().max(0) as u32, timer.get_tlp(false).max(0) as u32, timer.get_tlp(true).max(0) as u32));
                }
            }
        }
    }

    /// Finds the queue-free timeout estimates that applied just before
    /// `packet`'s timer was armed: the entry with the highest recorded
    /// index below the armer's own arrival index.
    fn get_queue_free_timeouts(&self, packet: PacketId) -> Option<(u32, u32, u32)> {
        let p = self.arena.get(packet);
        let armer = if p.classification.is_tlp || p.classification.is_rto_rtx {
            p.armed_by
        } else {
            None
        }?;
        let armer_index = self.arena.get(armer).raw.arrival_index;

        self.no_queue_timeouts
            .iter()
            .rev()
            .find(|&&(idx, ..)| idx < armer_index)
            .map(|&(_, rto, tlp, dtlp)| (rto, tlp, dtlp))
    }

    fn get_queue_free_rto(&self, packet: PacketId) -> u32 {
        let num_rtos = self.arena.get(packet).backoffs;
        let rto = self.get_queue_free_timeouts(packet).map_or(0, |(rto, _, _)| rto);
        adjust_rto_for_backoff(rto as i32, num_rtos).max(0) as u32
    }

    fn get_queue_free_tlp(&self, packet: PacketId) -> u32 {
        self.get_queue_free_timeouts(packet).map_or(0, |(_, tlp, _)| tlp)
    }

    fn get_queue_free_delayed_tlp(&self, packet: PacketId) -> u32 {
        self.get_queue_free_timeouts(packet).map_or(0, |(_, _, dtlp)| dtlp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::packet::{PacketArena, TcpFlags};
    use crate::sack::TcpSacks;
    use std::net::Ipv4Addr;

    fn raw(seq: u32, ack: u32, data_len: u32, flags: TcpFlags, ts_us: u64, arrival_index: u64) -> crate::packet::RawPacket {
        crate::packet::RawPacket {
            ts_us,
            arrival_index,
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
    fn no_packets_yields_zeroed_delays() {
        let endpoint = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
        let arena = PacketArena::new();
        let mut analysis = DelayAnalysis::new(&endpoint, &arena);
        assert_eq!(analysis.analyze_tail_latency_full(), Delays::default());
    }

    #[test]
    fn clean_in_order_flow_has_zero_loss_and_trigger_delay() {
        let mut endpoint = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 1234);
        let mut arena = PacketArena::new();

        let data_ids = endpoint.add_packet(&mut arena, raw(1, 1, 100, TcpFlags::ACK, 0, 0));
        let data_id = data_ids[0];

        let ack = raw(1, 101, 0, TcpFlags::ACK, 40_000, 1);
        let ack_id = arena.push(ack.clone(), 1, 1);
        endpoint.process_ack(&mut arena, ack_id, &ack);
        endpoint.note_received_from_peer(ack_id);
        let _ = data_id;

        let mut analysis = DelayAnalysis::new(&endpoint, &arena);
        let delays = analysis.analyze_tail_latency_full();
        assert_eq!(delays.overall_us, 40_000);
        assert_eq!(delays.loss_us, 0);
        assert_eq!(delays.loss_trigger_us, 0);
    }

    #[test]
    fn trigger_delays_total_excludes_no_queue_timeout() {
        let d = TriggerDelays {
            no_queue_timeout_us: 900_000,
            timeout_us: 100,
            late_ack_arms_us: 20,
            late_ack_triggers_us: 5,
            late_trigger_for_trigger_us: 0,
        };
        assert_eq!(d.total(), 125);
    }

    #[test]
    fn set_other_delay_clamps_to_zero_when_categories_exceed_overall() {
        let mut d = Delays {
            overall_us: 100,
            propagation_us: 80,
            loss_us: 50,
            ..Default::default()
        };
        d.set_other_delay();
        assert_eq!(d.other_us, 0);
    }
}
