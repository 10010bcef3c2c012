use rezip::{
    AccessMode, AddOptions, Archive, ArchiveOptions, CompressionMethod, Limits, MemoryStorage,
    RemoveOptions,
};

fn small_limits() -> ArchiveOptions {
    ArchiveOptions::new().limits(Limits {
        max_entry_count: 3,
        max_size: 100,
        max_offset: 400,
    })
}

fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add((i % 13) as u8)).collect()
}

fn build(limits: ArchiveOptions, sizes: &[usize]) -> Archive<MemoryStorage> {
    let mut archive = Archive::from_bytes(Vec::new(), AccessMode::Create, limits).unwrap();
    for (i, &len) in sizes.iter().enumerate() {
        archive
            .add_bytes(&format!("f{i}.bin"), &payload(i as u8, len), &AddOptions::new())
            .unwrap();
    }
    archive
}

#[test]
fn test_small_archive_stays_narrow() {
    let archive = build(ArchiveOptions::new(), &[10, 20]);
    assert!(!archive.is_zip64());
    let bytes = archive.into_bytes();
    assert_eq!(&bytes[bytes.len() - 22..bytes.len() - 18], b"PK\x05\x06");
}

#[test]
fn test_large_entry_sizes_are_promoted() {
    let archive = build(small_limits(), &[150]);
    let bytes = archive.into_bytes();

    // Default limits on read: everything comes from the ZIP64 extra field.
    let mut archive = Archive::from_bytes(bytes, AccessMode::Read, ArchiveOptions::new()).unwrap();
    let entry = archive.get("f0.bin").unwrap().unwrap();
    assert!(entry.is_zip64());
    assert_eq!(entry.uncompressed_size(), 150);
    assert_eq!(entry.compressed_size(), 150);
    assert_eq!(archive.extract_to_vec(&entry).unwrap(), payload(0, 150));
}

#[test]
fn test_directory_end_promotion() {
    // Each record is 116 bytes, so the fifth one starts past the offset limit.
    let archive = build(small_limits(), &[80; 6]);
    assert!(archive.is_zip64());
    let bytes = archive.into_bytes();

    let tail = &bytes[bytes.len() - 22..];
    assert_eq!(&tail[..4], b"PK\x05\x06");
    assert_eq!(&tail[8..10], &[0xFF, 0xFF]);
    assert_eq!(&tail[12..20], &[0xFF; 8]);
    let locator = &bytes[bytes.len() - 42..bytes.len() - 22];
    assert_eq!(&locator[..4], b"PK\x06\x07");

    let mut archive = Archive::from_bytes(bytes, AccessMode::Read, ArchiveOptions::new()).unwrap();
    assert!(archive.is_zip64());
    assert_eq!(archive.len(), 6);
    let entries = archive.entries().collect::<rezip::Result<Vec<_>>>().unwrap();
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(archive.extract_to_vec(entry).unwrap(), payload(i as u8, 80));
    }
    assert!(!entries[3].is_zip64());
    assert!(entries[4].is_zip64());
    assert_eq!(entries[4].local_header_offset(), 464);
}

#[test]
fn test_deflated_entry_reserves_zip64_header() {
    let mut archive = Archive::from_bytes(Vec::new(), AccessMode::Create, small_limits()).unwrap();
    // Highly compressible: the compressed size stays below the limit, but the
    // header reserved room for 64-bit sizes before compression started.
    let data = vec![b'z'; 5000];
    archive
        .add_bytes(
            "z.txt",
            &data,
            &AddOptions::new().compression(CompressionMethod::Deflate),
        )
        .unwrap();

    let bytes = archive.into_bytes();
    // Local header extra field length is 20: the ZIP64 sizes block.
    assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 20);

    let mut archive = Archive::from_bytes(bytes, AccessMode::Read, ArchiveOptions::new()).unwrap();
    let entry = archive.get("z.txt").unwrap().unwrap();
    assert_eq!(archive.extract_to_vec(&entry).unwrap(), data);
}

#[test]
fn test_remove_demotes_below_limits() {
    let mut archive = build(small_limits(), &[40, 40, 40, 40]);
    assert!(archive.is_zip64());

    for name in ["f0.bin", "f1.bin"] {
        let entry = archive.get(name).unwrap().unwrap();
        archive
            .remove(&entry, &RemoveOptions::default(), None)
            .unwrap();
    }
    assert!(!archive.is_zip64());
    assert_eq!(archive.len(), 2);

    let entries = archive.entries().collect::<rezip::Result<Vec<_>>>().unwrap();
    assert_eq!(entries[0].path(), "f2.bin");
    assert_eq!(entries[0].local_header_offset(), 0);
    assert!(!entries[0].is_zip64());
    assert_eq!(archive.extract_to_vec(&entries[1]).unwrap(), payload(3, 40));
}
