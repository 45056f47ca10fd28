#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::Command;

use bytes::BytesMut;
use skybridge::frame::{encode_frame, FrameHeader, Heartbeat, MSG_ID_HEARTBEAT};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/skybridge-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn heartbeat_frame(sequence: u8) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(
        &FrameHeader::v2(sequence, 1, 1, MSG_ID_HEARTBEAT),
        &Heartbeat::gcs().encode(),
        &mut buf,
    )
    .expect("heartbeat should encode");
    buf.to_vec()
}

fn attitude_frame_v1(sequence: u8) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(&FrameHeader::v1(sequence, 1, 1, 30), &[0x11; 28], &mut buf)
        .expect("attitude should encode");
    buf.to_vec()
}

fn decode(path: &PathBuf, extra: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_skybridge"))
        .arg("--log-level")
        .arg("error")
        .arg("decode")
        .arg(path)
        .args(extra)
        .output()
        .expect("decode should run")
}

#[test]
fn decode_prints_one_json_line_per_message() {
    let dir = unique_temp_dir("decode-json");
    let capture = dir.join("capture.bin");

    let mut bytes = vec![0x00, 0x42, 0x13];
    bytes.extend(heartbeat_frame(7));
    bytes.extend([0x55, 0x66]);
    bytes.extend(attitude_frame_v1(8));
    std::fs::write(&capture, &bytes).expect("capture should be writable");

    let output = decode(&capture, &["--format", "json"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect();
    assert_eq!(lines.len(), 2);

    assert_eq!(lines[0]["generation"], "v2");
    assert_eq!(lines[0]["sequence"], 7);
    assert_eq!(lines[0]["message_name"], "HEARTBEAT");
    assert_eq!(lines[0]["heartbeat"]["vehicle_type"], 6);
    assert_eq!(lines[1]["generation"], "v1");
    assert_eq!(lines[1]["message_id"], 30);
    assert_eq!(lines[1]["payload_size"], 28);
    assert!(lines[1].get("heartbeat").is_none());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_summary_counts_corrupted_frames() {
    let dir = unique_temp_dir("decode-summary");
    let capture = dir.join("capture.bin");

    let mut corrupted = heartbeat_frame(2);
    corrupted[10] ^= 0x10;

    let mut bytes = heartbeat_frame(1);
    bytes.extend(corrupted);
    bytes.extend(heartbeat_frame(3));
    std::fs::write(&capture, &bytes).expect("capture should be writable");

    let output = decode(&capture, &["--format", "json", "--summary"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let summary: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("summary should be json");
    assert_eq!(summary["messages"], 2);
    assert!(summary["bad_checksums"].as_u64().unwrap_or(0) >= 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_count_stops_early() {
    let dir = unique_temp_dir("decode-count");
    let capture = dir.join("capture.bin");

    let bytes: Vec<u8> = (0..3).flat_map(heartbeat_frame).collect();
    std::fs::write(&capture, &bytes).expect("capture should be writable");

    let output = decode(&capture, &["--format", "json", "--count", "1"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_raw_strips_line_noise() {
    let dir = unique_temp_dir("decode-raw");
    let capture = dir.join("capture.bin");

    let first = heartbeat_frame(1);
    let second = attitude_frame_v1(2);
    let mut bytes = vec![0x01, 0x02, 0x03];
    bytes.extend(&first);
    bytes.extend([0x04; 5]);
    bytes.extend(&second);
    bytes.push(0x05);
    std::fs::write(&capture, &bytes).expect("capture should be writable");

    let output = decode(&capture, &["--format", "raw"]);
    assert!(output.status.success());

    let mut expected = first;
    expected.extend(second);
    assert_eq!(output.stdout, expected);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_noise_only_returns_60() {
    let dir = unique_temp_dir("decode-noise");
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, [0x00, 0x11, 0x22, 0x33]).expect("capture should be writable");

    let output = decode(&capture, &["--format", "json"]);
    assert_eq!(output.status.code(), Some(60));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_missing_file_fails() {
    let missing = PathBuf::from(format!(
        "/tmp/skybridge-missing-{}.bin",
        std::process::id()
    ));
    let output = decode(&missing, &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to open"));
}
