//! Command-line surface (C11).

use std::path::PathBuf;

use clap::Parser;

/// Attributes TCP tail latency to propagation, loss, loss-trigger, and
/// queueing delay from an offline packet capture.
#[derive(Debug, Parser)]
#[command(name = "tcp-latency-analyze", version, about)]
pub struct Args {
    /// Packet capture to analyze.
    #[arg(required_unless_present = "print_schema")]
    pub pcap_file: Option<PathBuf>,

    /// Print the CSV column schema and exit, without reading any capture.
    #[arg(short = 'p', long = "print-schema")]
    pub print_schema: bool,
}
