use std::fs;
use std::rc::Rc;

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use turnloop_compute::{ManualClock, Scheduler};
use turnloop_pipeline::{compress_file, decompress_file, Codec, PipelineConfig, PipelineError};

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[test]
fn file_round_trip_with_digests() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.txt");
    let data: Vec<u8> = (0..100_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
    fs::write(&input, &data).unwrap();

    let sched = Scheduler::with_clock(Rc::new(ManualClock::new()));
    let config = PipelineConfig::new(4096, 1000);

    for codec in [Codec::Gzip, Codec::Zstd] {
        let packed = dir.path().join(format!("input.{}", codec.extension()));
        let restored = dir.path().join(format!("restored-{codec}.txt"));

        let report = compress_file(&sched, &config, &input, &packed, codec, 6).unwrap();
        assert_eq!(report.input_sha256, sha256_hex(&data));
        assert_eq!(report.stats.bytes_in, data.len() as u64);
        let packed_bytes = fs::read(&packed).unwrap();
        assert_eq!(report.output_sha256, sha256_hex(&packed_bytes));
        assert_eq!(report.stats.bytes_out, packed_bytes.len() as u64);

        let back = decompress_file(&sched, &config, &packed, &restored, codec).unwrap();
        assert_eq!(back.output_sha256, report.input_sha256);
        assert_eq!(fs::read(&restored).unwrap(), data);
    }
}

#[test]
fn missing_input_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    let sched = Scheduler::with_clock(Rc::new(ManualClock::new()));
    let err = compress_file(
        &sched,
        &PipelineConfig::default(),
        &dir.path().join("nope"),
        &dir.path().join("out.gz"),
        Codec::Gzip,
        6,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Setup(_)));
}

#[test]
fn decompressing_plain_text_fails_at_the_decoder() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("plain.txt");
    fs::write(&input, b"this was never compressed").unwrap();
    let sched = Scheduler::with_clock(Rc::new(ManualClock::new()));
    let err = decompress_file(
        &sched,
        &PipelineConfig::default(),
        &input,
        &dir.path().join("out.txt"),
        Codec::Gzip,
    )
    .unwrap_err();
    // reader, sha256-in, decoder, sha256-out, writer
    assert_eq!(err.stage_index(), Some(2));
}
