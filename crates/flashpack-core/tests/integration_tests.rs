//! Integration tests for flashpack-core
//!
//! These tests build real container files from in-memory disk images and
//! read them back through the public API.

use flashpack_core::{
    parse_exclusion_list, ContainerReader, Error, FlashUpdateVersion, GenerateConfig, Generator,
    ManifestBuilder, PortRequest, Porter, RawImage, SourcePartition,
};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BLOCK: u64 = 4096;

/// Deterministic non-blank block content
fn block_pattern(seed: u64) -> Vec<u8> {
    (0..BLOCK).map(|i| ((i * 7 + seed * 13) % 251 + 1) as u8).collect()
}

/// Image with a boot partition, an empty one and a mostly blank data one
fn scenario_image() -> (Vec<u8>, Vec<SourcePartition>) {
    let data_start = 2 * BLOCK;
    let data_len = 1024 * 1024;
    let mut image = vec![0u8; (data_start + data_len) as usize];

    image[..BLOCK as usize].copy_from_slice(&block_pattern(0));
    // Data partition: blocks 0, 3, 10 and 255 have content
    for (i, block) in [0u64, 3, 10, 255].into_iter().enumerate() {
        let start = (data_start + block * BLOCK) as usize;
        image[start..start + BLOCK as usize].copy_from_slice(&block_pattern(i as u64 + 1));
    }

    let partitions = vec![
        SourcePartition::new("boot", "basic", 0, BLOCK),
        SourcePartition::new("empty", "basic", BLOCK, 0),
        SourcePartition::new("data", "basic", data_start, data_len),
    ];
    (image, partitions)
}

fn config(max_blank: u64) -> GenerateConfig {
    GenerateConfig::new()
        .block_size(BLOCK as u32)
        .sector_size(512)
        .max_blank_blocks(max_blank)
        .platform_ids(["Contoso.Board.A"])
}

fn generate(dir: &Path, name: &str, config: GenerateConfig, excluded: &[&str]) -> PathBuf {
    let (image, partitions) = scenario_image();
    let mut source = RawImage::new(Cursor::new(image), partitions).unwrap();
    let manifest = ManifestBuilder::new("1.1", "10.0.1")
        .excluded_partitions(excluded.iter().copied())
        .device_targets("Contoso.Board.A:>=2.0")
        .build()
        .unwrap();
    let path = dir.join(name);
    Generator::new(config).generate(&mut source, &manifest, &path).unwrap();
    path
}

// ============================================================================
// Generation round trip
// ============================================================================

#[test]
fn test_round_trip_reproduces_partitions() {
    let temp_dir = TempDir::new().unwrap();
    let path = generate(temp_dir.path(), "out.fpk", config(4), &["empty"]);
    let (image, _) = scenario_image();

    let mut reader = ContainerReader::open_path(&path).unwrap();
    let metadata = reader.metadata().clone();
    assert_eq!(metadata.manifest.anti_theft_version, "1.1");
    assert_eq!(metadata.manifest.os_version, "10.0.1");
    assert_eq!(metadata.manifest.device_targets.len(), 1);
    assert!(metadata.manifest.is_excluded("empty"));
    assert_eq!(metadata.stores.len(), 1);
    assert_eq!(metadata.stores[0].platform_ids, vec!["Contoso.Board.A"]);
    assert_eq!(metadata.stores[0].block_size, BLOCK as u32);

    let mut boot = Vec::new();
    reader.extract_partition(0, "boot", &mut boot, None).unwrap();
    assert_eq!(boot, image[..BLOCK as usize].to_vec());

    let mut data = Vec::new();
    reader.extract_partition(0, "data", &mut data, None).unwrap();
    assert_eq!(data, image[2 * BLOCK as usize..].to_vec());

    reader.verify_quiet().unwrap();
}

#[test]
fn test_scenario_excludes_empty_partition() {
    let temp_dir = TempDir::new().unwrap();
    let exclusions = parse_exclusion_list("empty\n");
    let excluded: Vec<&str> = exclusions.iter().map(String::as_str).collect();
    let path = generate(temp_dir.path(), "out.fpk", config(4), &excluded);

    let reader = ContainerReader::open_path(&path).unwrap();
    let store = &reader.metadata().stores[0];
    let names: Vec<&str> = store.partitions.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["boot", "data"]);

    // Data: 256 blocks. Runs 1-2 (2) and 4-9 (6) and 11-254 (244).
    // The run of 2 is elided, the longer runs are stored as zeros.
    let data = &store.partitions[1];
    let expected_data_blocks = 256 - 2;
    assert_eq!(data.block_count(), expected_data_blocks);
    assert_eq!(data.descriptors.len(), 2);

    assert_eq!(
        reader.catalog().len() as u64,
        1 + expected_data_blocks,
        "catalog has one entry per emitted block"
    );
}

#[test]
fn test_blank_runs_never_exceed_threshold() {
    let temp_dir = TempDir::new().unwrap();
    for max_blank in [0u64, 1, 2, 6, 300] {
        let name = format!("out-{}.fpk", max_blank);
        let path = generate(temp_dir.path(), &name, config(max_blank), &["empty"]);
        let reader = ContainerReader::open_path(&path).unwrap();
        let store = &reader.metadata().stores[0];
        let spb = store.sectors_per_block();

        for partition in &store.partitions {
            let mut cursor = partition.first_sector;
            for d in &partition.descriptors {
                let gap_blocks = (d.first_sector - cursor) / spb;
                assert!(gap_blocks <= max_blank, "gap {} > {}", gap_blocks, max_blank);
                cursor = d.end_sector(spb).unwrap();
            }
            let tail = (partition.first_sector + partition.sector_count - cursor) / spb;
            assert!(tail <= max_blank);
        }
    }
}

#[test]
fn test_flipped_payload_byte_fails_one_block() {
    let temp_dir = TempDir::new().unwrap();
    let path = generate(temp_dir.path(), "out.fpk", config(4), &["empty"]);

    let reader = ContainerReader::open_path(&path).unwrap();
    let payload_offset = reader.metadata().header.payload_offset();
    drop(reader);

    let mut bytes = std::fs::read(&path).unwrap();
    let target = payload_offset as usize + 3 * BLOCK as usize + 17;
    bytes[target] ^= 0x01;

    let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
    match reader.verify_quiet() {
        Err(Error::DigestMismatch { index, .. }) => assert_eq!(index, 3),
        other => panic!("expected digest mismatch, got {:?}", other),
    }

    // Every other block still checks out
    let catalog = reader.catalog().clone();
    let failing: Vec<u64> = (0..reader.block_count())
        .filter(|&i| {
            let block = reader.read_block(i).unwrap();
            catalog.verify_block(i, &block.data).is_err()
        })
        .collect();
    assert_eq!(failing, vec![3]);
}

#[test]
fn test_alignment_failure_leaves_no_output() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.fpk");
    let mut source = RawImage::new(
        Cursor::new(vec![0xAAu8; 64 * 1024]),
        vec![SourcePartition::new("odd", "basic", 512, 4096)],
    )
    .unwrap();
    let manifest = ManifestBuilder::new("1.0", "1.0").build().unwrap();

    let result = Generator::new(config(4).sector_size(1024)).generate(&mut source, &manifest, &path);
    assert!(matches!(result, Err(Error::Alignment { .. })));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_cancelled_generation_leaves_no_output() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out.fpk");
    let (image, partitions) = scenario_image();
    let mut source = RawImage::new(Cursor::new(image), partitions).unwrap();
    let manifest = ManifestBuilder::new("1.0", "1.0").build().unwrap();

    let generator = Generator::new(config(4));
    let cancel = generator.cancel_handle();
    let planned = generator.plan(&mut source, &manifest).unwrap();
    cancel.store(true, std::sync::atomic::Ordering::SeqCst);

    let result = generator.write(&mut source, &planned, &mut Vec::new());
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!path.exists());
}

// ============================================================================
// Flash update versions
// ============================================================================

#[test]
fn test_v2_per_store_payload() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(4)
        .flash_update_version(FlashUpdateVersion::V2)
        .platform_ids(["A", "B", "C"]);
    let path = generate(temp_dir.path(), "v2.fpk", config, &["empty"]);

    let mut reader = ContainerReader::open_path(&path).unwrap();
    let stores = reader.metadata().stores.clone();
    assert_eq!(stores.len(), 3);
    let per_store = stores[0].payload.block_count;
    for (i, store) in stores.iter().enumerate() {
        assert_eq!(store.store_index as usize, i);
        assert_eq!(store.store_count, 3);
        assert_eq!(store.payload.first_block, i as u64 * per_store);
    }
    assert_eq!(reader.block_count(), 3 * per_store);
    reader.verify_quiet().unwrap();

    let mut first = Vec::new();
    let mut last = Vec::new();
    reader.extract_partition(0, "data", &mut first, None).unwrap();
    reader.extract_partition(2, "data", &mut last, None).unwrap();
    assert_eq!(first, last);
}

#[test]
fn test_v1_shares_payload_between_stores() {
    let temp_dir = TempDir::new().unwrap();
    let path = generate(
        temp_dir.path(),
        "v1.fpk",
        config(4).platform_ids(["A", "B"]),
        &["empty"],
    );

    let reader = ContainerReader::open_path(&path).unwrap();
    let stores = &reader.metadata().stores;
    assert_eq!(stores[0].payload, stores[1].payload);
    assert_eq!(reader.block_count(), stores[0].payload.block_count);
}

// ============================================================================
// Reader failures
// ============================================================================

#[test]
fn test_truncated_container() {
    let temp_dir = TempDir::new().unwrap();
    let path = generate(temp_dir.path(), "out.fpk", config(4), &["empty"]);
    let bytes = std::fs::read(&path).unwrap();

    let truncated = bytes[..bytes.len() - 1].to_vec();
    assert!(matches!(
        ContainerReader::open(Cursor::new(truncated)),
        Err(Error::TruncatedContainer { section: "payload", .. })
    ));

    let header_only = bytes[..100].to_vec();
    assert!(matches!(
        ContainerReader::open(Cursor::new(header_only)),
        Err(Error::TruncatedContainer { .. })
    ));
}

#[test]
fn test_bad_signature_is_malformed() {
    let temp_dir = TempDir::new().unwrap();
    let path = generate(temp_dir.path(), "out.fpk", config(4), &["empty"]);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[4] = b'X';

    assert!(matches!(
        ContainerReader::open(Cursor::new(bytes)),
        Err(Error::MalformedContainer(_))
    ));
}

// ============================================================================
// Porting
// ============================================================================

#[test]
fn test_port_preconditions_create_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("ported.fpk");

    let missing = Porter::new().port(&PortRequest::new(temp_dir.path().join("nope.fpk"), &dest));
    assert!(matches!(missing, Err(Error::Precondition(_))));
    assert!(!dest.exists());

    let source = generate(temp_dir.path(), "src.fpk", config(4), &["empty"]);
    std::fs::write(&dest, b"occupied").unwrap();
    let occupied = Porter::new().port(&PortRequest::new(&source, &dest));
    assert!(matches!(occupied, Err(Error::Precondition(_))));
    assert_eq!(std::fs::read(&dest).unwrap(), b"occupied");
}

#[test]
fn test_port_merges_metadata() {
    let temp_dir = TempDir::new().unwrap();
    let payload = generate(temp_dir.path(), "payload.fpk", config(4), &["empty"]);
    let metadata = generate(
        temp_dir.path(),
        "meta.fpk",
        config(4)
            .flash_update_version(FlashUpdateVersion::V2)
            .platform_ids(["X", "Y"]),
        &["empty"],
    );
    let dest = temp_dir.path().join("ported.fpk");

    Porter::new()
        .port(&PortRequest::new(&payload, &dest).metadata_from(&metadata))
        .unwrap();

    let mut ported = ContainerReader::open_path(&dest).unwrap();
    ported.verify_quiet().unwrap();
    assert_eq!(ported.metadata().stores.len(), 2);
    assert_eq!(ported.metadata().flash_update_version(), FlashUpdateVersion::V2);

    let mut original = ContainerReader::open_path(&payload).unwrap();
    let mut expected = Vec::new();
    let mut actual = Vec::new();
    original.extract_partition(0, "data", &mut expected, None).unwrap();
    ported.extract_partition(1, "data", &mut actual, None).unwrap();
    assert_eq!(expected, actual);
}
