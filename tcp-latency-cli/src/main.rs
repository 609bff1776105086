//! `tcp-latency-analyze`: offline TCP tail-latency attribution from a PCAP
//! capture (C12 — logging and error-boundary wiring).

mod args;
mod csv_output;
mod header;
mod ingest;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use args::Args;

fn run(args: Args) -> Result<()> {
    if args.print_schema {
        csv_output::print_schema(io::stdout().lock())?;
        return Ok(());
    }

    let pcap_file = args.pcap_file.expect("clap enforces pcap_file unless --print-schema");
    let flow_map = ingest::ingest_pcap(&pcap_file)?;
    log::info!("reconstructed {} flow(s) from {}", flow_map.len(), pcap_file.display());

    let filename = pcap_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| pcap_file.display().to_string());
    csv_output::write_rows(io::stdout().lock(), &filename, &flow_map)?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
