//! Per-endpoint TCP state reconstruction and tail-latency delay attribution.
//!
//! This crate reconstructs each TCP endpoint's sender-side state from a
//! stream of already-parsed [`packet::RawPacket`]s — retransmission
//! classification, SACK bookkeeping, RFC 6298-style RTT/RTO/TLP estimation —
//! and attributes the worst observed per-packet ACK delay to propagation,
//! queueing, loss, the events that triggered the loss's detection, and an
//! unexplained residual.
//!
//! Datalink/IP/TCP header parsing and PCAP ingestion live outside this
//! crate (see the `tcp-latency-cli` crate and `RawPacket`'s doc comment);
//! this crate's boundary starts at the first already-decoded frame.
//!
//! # Panicing
//!
//! This crate aims to be panic-free in non-test code. Where an invariant
//! this crate itself is responsible for upholding turns out to be violated,
//! it is reported through [`error::CoreError::Internal`] rather than a panic
//! or an `unwrap()`. Malformed *input* (a truncated SACK option, a header
//! that makes no sense) is never a panic — it is either a dropped packet or
//! a latched `bogus` endpoint.
//!
//! # Cargo features
//!
//! * `backtrace` -- Optional. Captures a stack trace alongside every
//!   [`error::CoreError::Internal`].
//! * `serde1` -- Optional. Derives `Serialize`/`Deserialize` for the public
//!   flag types.

pub mod attribution;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod packet;
pub mod sack;
pub mod seq;
pub mod stats;
pub mod timer;

pub use attribution::{DelayAnalysis, Delays, TimerEstimates, TriggerDelays};
pub use endpoint::Endpoint;
pub use error::{CoreError, CoreResult};
pub use flow::{Direction, Flow, FlowKey, FlowMap};
pub use packet::{PacketArena, PacketId, RawPacket, TcpFlags};
pub use sack::{SackRange, TcpSacks};
pub use stats::LinearFit;
pub use timer::TcpTimer;
