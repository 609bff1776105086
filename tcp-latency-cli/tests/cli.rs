//! End-to-end CLI tests driving the `tcp-latency-analyze` binary itself,
//! exercising the `assert_cmd` dev-dependency the crate declares (C11/C12).
//! Unit-level header decoding is covered in `src/header.rs`; these tests only
//! care about process exit codes and stdout shape.

use std::io::Write;
use std::path::Path;

use assert_cmd::Command;

/// Builds a minimal classic-format pcap file (`DLT_EN10MB`) containing one
/// data segment and its ack, mirroring `header.rs`'s own `ipv4_tcp_frame`
/// test helper but assembled into a full capture rather than a bare frame.
fn write_basic_pcap(path: &std::path::Path) {
    fn eth_ip_tcp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, seq: u32, ack: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&sport.to_be_bytes());
        tcp[2..4].copy_from_slice(&dport.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[8..12].copy_from_slice(&ack.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = flags;
        tcp.extend_from_slice(payload);

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        let total_len = (20 + tcp.len()) as u16;
        ip[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip[9] = 6; // TCP
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);

        let mut eth = vec![0u8; 14];
        eth[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        eth.extend_from_slice(&ip);
        eth.extend_from_slice(&tcp);
        eth
    }

    fn push_record(out: &mut Vec<u8>, ts_us: u32, frame: &[u8]) {
        out.extend_from_slice(&0u32.to_le_bytes()); // ts_sec
        out.extend_from_slice(&ts_us.to_le_bytes()); // ts_usec
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes()); // incl_len
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes()); // orig_len
        out.extend_from_slice(frame);
    }

    let client = [10, 0, 0, 1];
    let server = [10, 0, 0, 2];

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes()); // magic, native endian
    bytes.extend_from_slice(&2u16.to_le_bytes()); // version major
    bytes.extend_from_slice(&4u16.to_le_bytes()); // version minor
    bytes.extend_from_slice(&0i32.to_le_bytes()); // thiszone
    bytes.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
    bytes.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
    bytes.extend_from_slice(&1u32.to_le_bytes()); // network = DLT_EN10MB

    let data_frame = eth_ip_tcp_frame(client, server, 40000, 443, 1, 1, 0b0001_1000, b"hello");
    push_record(&mut bytes, 0, &data_frame);
    let ack_frame = eth_ip_tcp_frame(server, client, 443, 40000, 1, 6, 0b0001_0000, &[]);
    push_record(&mut bytes, 40_000, &ack_frame);

    let mut file = std::fs::File::create(path).expect("create pcap fixture");
    file.write_all(&bytes).expect("write pcap fixture");
}

fn bin() -> Command {
    Command::cargo_bin("tcp-latency-analyze").expect("binary built")
}

#[test]
fn print_schema_exits_success_without_reading_any_file() {
    let output = bin().arg("--print-schema").assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).expect("utf8 stdout");
    assert!(stdout.contains("1 filename"), "missing first schema line: {stdout}");
    assert!(stdout.contains("flow_index"), "missing flow_index column: {stdout}");
}

#[test]
fn missing_pcap_argument_without_print_schema_fails() {
    bin().assert().failure();
}

#[test]
fn nonexistent_capture_file_fails_with_context() {
    bin()
        .arg("/nonexistent/path/does-not-exist.pcap")
        .assert()
        .failure();
}

#[test]
fn basic_capture_emits_one_row_per_direction_with_the_right_data_packet_counts() {
    let path = std::env::temp_dir().join(format!("tcp-latency-cli-test-{}.pcap", std::process::id()));
    write_basic_pcap(&path);

    let output = bin().arg(&path).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).expect("utf8 stdout");
    let lines: Vec<&str> = stdout.lines().collect();
    // Both directions have at least one packet (the data segment, and the ack
    // that acknowledges it), so each gets a row — only a bogus or packetless
    // sender is skipped.
    assert_eq!(lines.len(), 2, "expected one row per direction: {stdout}");

    let filename = path_filename(&path);
    let num_data_packets_counts: Vec<&str> = lines
        .iter()
        .map(|line| {
            assert!(line.starts_with(&filename));
            line.split(',').nth(3).expect("num_data_packets column")
        })
        .collect();
    assert!(num_data_packets_counts.contains(&"1"), "client direction should have 1 data packet: {stdout}");
    assert!(num_data_packets_counts.contains(&"0"), "server direction should have 0 data packets: {stdout}");

    let _ = std::fs::remove_file(&path);
}

fn path_filename(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}
