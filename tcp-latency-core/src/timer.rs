//! RFC 6298-style smoothed-RTT estimator with RTO backoff and TLP timing.
//!
//! Scaling follows the Linux kernel convention: smoothed RTT is tracked
//! scaled by 8, RTT variance and mean deviation scaled by 4. This keeps the
//! alpha/beta EWMA coefficients (0.125 and 0.25 respectively) implicit in
//! bit shifts instead of floating point.

use crate::packet::PacketId;
use crate::seq;

pub const CLOCK_GRANULARITY_US: i32 = 1_000;
pub const MIN_RTO_US: i32 = 200_000;
pub const MAX_RTO_US: i32 = 120_000_000;
pub const MAX_DELAYED_ACK_US: i32 = 200_000;

/// One RTT observation, retained so the queue-free timer replay (§ delay
/// attribution) can recompute what the timer *would* have estimated absent
/// queueing delay.
#[derive(Debug, Clone, Copy)]
pub struct RttSample {
    pub packet: PacketId,
    pub rtt_us: i32,
    pub seq_acked: u32,
    pub seq_next: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TcpTimer {
    smoothed_rtt_x8: i32,
    rtt_var_x4: i32,
    mean_dev_x4: i32,
    max_mean_dev_x4: i32,
    next_seq: u32,
    has_sample: bool,
    samples: Vec<RttSample>,
}

impl TcpTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[RttSample] {
        &self.samples
    }

    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    /// Current smoothed RTT in microseconds (0 if no sample yet).
    pub fn smoothed_rtt_us(&self) -> i32 {
        self.smoothed_rtt_x8 / 8
    }

    pub fn add_sample(&mut self, packet: PacketId, seq_acked: u32, seq_next: u32, rtt_us: i32) {
        self.samples.push(RttSample { packet, rtt_us, seq_acked, seq_next });

        if !self.has_sample {
            self.smoothed_rtt_x8 = rtt_us * 8;
            self.mean_dev_x4 = rtt_us * 2;
            self.rtt_var_x4 = (rtt_us * 2).max(MIN_RTO_US);
            self.max_mean_dev_x4 = self.rtt_var_x4;
            self.next_seq = seq_next;
            self.has_sample = true;
            return;
        }

        let err = rtt_us - self.smoothed_rtt_x8 / 8;
        self.smoothed_rtt_x8 += err;

        let mean_dev_update = if err < 0 {
            let m = err.abs() - self.mean_dev_x4 / 4;
            if m > 0 {
                m >> 3
            } else {
                m
            }
        } else {
            err - self.mean_dev_x4 / 4
        };
        self.mean_dev_x4 += mean_dev_update;

        if self.mean_dev_x4 > self.max_mean_dev_x4 {
            self.max_mean_dev_x4 = self.mean_dev_x4;
            if self.max_mean_dev_x4 > self.rtt_var_x4 {
                self.rtt_var_x4 = self.max_mean_dev_x4;
            }
        }

        if seq::after(seq_acked, self.next_seq) {
            self.rtt_var_x4 -= (self.rtt_var_x4 - self.max_mean_dev_x4) / 4;
            self.next_seq = seq_next;
            self.max_mean_dev_x4 = MIN_RTO_US;
        }
    }

    /// Retransmission timeout with `num_rtos` consecutive backoffs applied.
    pub fn get_rto(&self, num_rtos: u8) -> i32 {
        if !self.has_sample {
            return MIN_RTO_US;
        }
        let base = self.smoothed_rtt_x8 / 8 + self.rtt_var_x4.max(CLOCK_GRANULARITY_US);
        adjust_rto_for_backoff(base, num_rtos)
    }

    pub fn get_rto0(&self) -> i32 {
        self.get_rto(0)
    }

    /// Tail-loss-probe timeout, adjusted for whether the peer is known to
    /// use delayed ACKs.
    pub fn get_tlp(&self, delayed_ack: bool) -> i32 {
        let rtt = self.smoothed_rtt_x8 / 8;
        let candidate = if delayed_ack {
            (2 * rtt).max((rtt * 3) / 2 + MAX_DELAYED_ACK_US)
        } else {
            2 * rtt
        };
        candidate.min(self.get_rto0())
    }
}

/// Applies exponential backoff to a base RTO, clamped to `[MIN_RTO_US,
/// MAX_RTO_US]`. Used both when arming the live RTO timer and when
/// recomputing a queue-free RTO from a replayed, queueing-subtracted
/// estimate.
pub fn adjust_rto_for_backoff(rto: i32, num_rtos: u8) -> i32 {
    let shifted = (rto as i64) << num_rtos.min(30);
    shifted.clamp(MIN_RTO_US as i64, MAX_RTO_US as i64) as i32
}
