use rezip::{
    AccessMode, AddOptions, Archive, ArchiveOptions, CompressionMethod, DosDateTime, EntryType,
    Error, ExtractOptions, MemoryStorage, Progress, RemoveOptions,
};

fn new_archive() -> Archive<MemoryStorage> {
    Archive::from_bytes(Vec::new(), AccessMode::Create, ArchiveOptions::new()).unwrap()
}

fn reopen(bytes: Vec<u8>, mode: AccessMode) -> Archive<MemoryStorage> {
    Archive::from_bytes(bytes, mode, ArchiveOptions::new()).unwrap()
}

fn fixed_time() -> DosDateTime {
    DosDateTime {
        date: (44 << 9) | (3 << 5) | 15,
        time: (10 << 11) | (30 << 5),
    }
}

fn collect_chunks(
    archive: &mut Archive<MemoryStorage>,
    path: &str,
    chunk_size: usize,
) -> rezip::Result<Vec<Vec<u8>>> {
    let entry = archive.get(path)?.expect("entry present");
    let mut chunks = Vec::new();
    archive.extract(
        &entry,
        &ExtractOptions::new().chunk_size(chunk_size),
        None,
        |chunk| {
            chunks.push(chunk.to_vec());
            Ok(())
        },
    )?;
    Ok(chunks)
}

/// Offset of the central directory, read from the 22-byte end record of an
/// archive without a comment.
fn cd_offset(bytes: &[u8]) -> usize {
    let eocd = bytes.len() - 22;
    u32::from_le_bytes(bytes[eocd + 16..eocd + 20].try_into().unwrap()) as usize
}

/// One stored member written with flag bit 3: zeroed sizes in the local
/// header, the real values in a trailing data descriptor.
struct DescriptorMember {
    name: &'static str,
    data: &'static [u8],
    signed: bool,
}

/// Build an archive by hand whose members all carry data descriptors.
fn descriptor_archive(members: &[DescriptorMember]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut directory = Vec::new();
    for member in members {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(member.data);
        let size = member.data.len() as u32;

        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0x0008u16.to_le_bytes());
        out.extend_from_slice(&[0u8; 6]); // method, time, date
        out.extend_from_slice(&[0u8; 12]); // crc, sizes
        out.extend_from_slice(&(member.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(member.name.as_bytes());
        out.extend_from_slice(member.data);
        if member.signed {
            out.extend_from_slice(b"PK\x07\x08");
        }
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());

        directory.extend_from_slice(b"PK\x01\x02");
        directory.extend_from_slice(&20u16.to_le_bytes());
        directory.extend_from_slice(&20u16.to_le_bytes());
        directory.extend_from_slice(&0x0008u16.to_le_bytes());
        directory.extend_from_slice(&[0u8; 6]);
        directory.extend_from_slice(&crc.to_le_bytes());
        directory.extend_from_slice(&size.to_le_bytes());
        directory.extend_from_slice(&size.to_le_bytes());
        directory.extend_from_slice(&(member.name.len() as u16).to_le_bytes());
        directory.extend_from_slice(&[0u8; 12]); // extra, comment, disk, attrs
        directory.extend_from_slice(&offset.to_le_bytes());
        directory.extend_from_slice(member.name.as_bytes());
    }

    let cd_offset = out.len() as u32;
    out.extend_from_slice(&directory);
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(members.len() as u16).to_le_bytes());
    out.extend_from_slice(&(members.len() as u16).to_le_bytes());
    out.extend_from_slice(&(directory.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

const DESCRIPTOR_MEMBERS: [DescriptorMember; 3] = [
    DescriptorMember {
        name: "a.txt",
        data: b"alpha",
        signed: true,
    },
    DescriptorMember {
        name: "b.txt",
        data: b"bravo!",
        signed: false,
    },
    DescriptorMember {
        name: "c.txt",
        data: b"charlie",
        signed: true,
    },
];

#[test]
fn test_round_trip_stored_and_deflate() {
    let mut archive = new_archive();
    let text = b"the quick brown fox jumps over the lazy dog\n".repeat(50);
    archive
        .add_bytes("plain.txt", &text, &AddOptions::new())
        .unwrap();
    archive
        .add_bytes(
            "packed.txt",
            &text,
            &AddOptions::new().compression(CompressionMethod::Deflate),
        )
        .unwrap();

    let mut archive = reopen(archive.into_bytes(), AccessMode::Read);
    assert_eq!(archive.len(), 2);

    let plain = archive.get("plain.txt").unwrap().unwrap();
    assert_eq!(plain.compression_method(), CompressionMethod::Stored);
    assert_eq!(plain.compressed_size(), text.len() as u64);
    assert_eq!(archive.extract_to_vec(&plain).unwrap(), text);

    let packed = archive.get("packed.txt").unwrap().unwrap();
    assert_eq!(packed.compression_method(), CompressionMethod::Deflate);
    assert!(packed.compressed_size() < text.len() as u64);
    assert_eq!(archive.extract_to_vec(&packed).unwrap(), text);

    archive.check_integrity().unwrap();
}

#[test]
fn test_traversal_is_repeatable() {
    let mut archive = new_archive();
    for name in ["a.txt", "b.txt", "c.txt"] {
        archive
            .add_bytes(name, name.as_bytes(), &AddOptions::new())
            .unwrap();
    }

    let first = archive.entries().collect::<rezip::Result<Vec<_>>>().unwrap();
    let second = archive.entries().collect::<rezip::Result<Vec<_>>>().unwrap();
    assert_eq!(first, second);
    let names: Vec<_> = first.iter().map(|e| e.path()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
}

#[test]
fn test_directory_file_and_symlink() {
    let mut archive = new_archive();
    let options = AddOptions::new().modified(fixed_time());
    archive
        .add_entry("docs/", EntryType::Directory, 0, &options, None, |_, _| {
            Ok(Vec::new())
        })
        .unwrap();

    let readme: Vec<u8> = (0..500u32).map(|i| b"abcdefgh"[(i % 8) as usize]).collect();
    archive
        .add_bytes(
            "docs/readme.txt",
            &readme,
            &options.compression(CompressionMethod::Deflate),
        )
        .unwrap();

    let target = b"readme.txt";
    archive
        .add_entry(
            "docs/link",
            EntryType::Symlink,
            target.len() as u64,
            &options,
            None,
            |position, len| {
                let start = position as usize;
                Ok(target[start..(start + len).min(target.len())].to_vec())
            },
        )
        .unwrap();

    let mut archive = reopen(archive.into_bytes(), AccessMode::Read);
    let entries = archive.entries().collect::<rezip::Result<Vec<_>>>().unwrap();
    assert_eq!(entries.len(), 3);

    let kinds: Vec<_> = entries.iter().map(|e| (e.path(), e.entry_type())).collect();
    assert_eq!(
        kinds,
        [
            ("docs/", EntryType::Directory),
            ("docs/readme.txt", EntryType::File),
            ("docs/link", EntryType::Symlink),
        ]
    );

    assert_eq!(entries[0].permissions(), 0o755);
    assert_eq!(entries[1].permissions(), 0o644);
    assert_eq!(entries[1].modified(), fixed_time());
    assert_eq!(entries[1].modified().date(), (2024, 3, 15));
    assert_eq!(entries[1].modified().time(), (10, 30, 0));
    assert_eq!(entries[1].compression_method(), CompressionMethod::Deflate);
    assert_eq!(entries[2].compression_method(), CompressionMethod::Stored);

    assert_eq!(archive.extract_to_vec(&entries[1]).unwrap(), readme);
    assert_eq!(archive.extract_to_vec(&entries[2]).unwrap(), target);
}

#[test]
fn test_cancelled_add_leaves_archive_unchanged() {
    let mut archive = new_archive();
    archive
        .add_bytes("keep.txt", b"keep me", &AddOptions::new())
        .unwrap();
    let before = archive.storage().as_bytes().to_vec();

    let progress = Progress::new();
    let canceller = progress.clone();
    let data = vec![0x5Au8; 4096];
    let result = archive.add_entry(
        "big.bin",
        EntryType::File,
        data.len() as u64,
        &AddOptions::new()
            .chunk_size(1024)
            .compression(CompressionMethod::Deflate),
        Some(&progress),
        |position, len| {
            if position >= 2048 {
                canceller.cancel();
            }
            let start = position as usize;
            Ok(data[start..start + len].to_vec())
        },
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(archive.len(), 1);
    assert_eq!(archive.storage().as_bytes(), &before[..]);
    assert!(archive.get("big.bin").unwrap().is_none());
}

#[test]
fn test_failing_provider_rolls_back() {
    let mut archive = new_archive();
    archive
        .add_bytes("keep.txt", b"keep me", &AddOptions::new())
        .unwrap();
    let before = archive.storage().as_bytes().to_vec();

    let result = archive.add_entry(
        "short.bin",
        EntryType::File,
        100,
        &AddOptions::new(),
        None,
        |position, _| {
            if position == 0 {
                Ok(vec![1u8; 10])
            } else {
                Ok(Vec::new())
            }
        },
    );

    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(archive.storage().as_bytes(), &before[..]);
}

#[test]
fn test_remove_middle_entry() {
    let mut archive = new_archive();
    let options = AddOptions::new().compression(CompressionMethod::Deflate);
    archive.add_bytes("one.txt", &[1u8; 300], &options).unwrap();
    archive.add_bytes("two.txt", &[2u8; 300], &options).unwrap();
    archive.add_bytes("three.txt", &[3u8; 300], &options).unwrap();

    let mut archive = reopen(archive.into_bytes(), AccessMode::Update);
    let two = archive.get("two.txt").unwrap().unwrap();
    let progress = Progress::new();
    archive
        .remove(&two, &RemoveOptions::default(), Some(&progress))
        .unwrap();
    assert_eq!(progress.fraction_completed(), 1.0);

    let mut archive = reopen(archive.into_bytes(), AccessMode::Read);
    let names: Vec<_> = archive
        .entries()
        .map(|e| e.unwrap().path().to_string())
        .collect();
    assert_eq!(names, ["one.txt", "three.txt"]);

    let one = archive.get("one.txt").unwrap().unwrap();
    let three = archive.get("three.txt").unwrap().unwrap();
    assert_eq!(one.local_header_offset(), 0);
    assert_eq!(
        three.local_header_offset(),
        archive.local_size(&one).unwrap()
    );
    assert_eq!(archive.extract_to_vec(&one).unwrap(), vec![1u8; 300]);
    assert_eq!(archive.extract_to_vec(&three).unwrap(), vec![3u8; 300]);
}

#[test]
fn test_remove_unknown_entry() {
    let mut archive = new_archive();
    let entry = archive.add_bytes("a.txt", b"a", &AddOptions::new()).unwrap();

    let mut other = new_archive();
    other.add_bytes("b.txt", b"b", &AddOptions::new()).unwrap();
    assert!(matches!(
        other.remove(&entry, &RemoveOptions::default(), None),
        Err(Error::EntryNotFound(_))
    ));
}

#[test]
fn test_cancelled_remove_keeps_original() {
    let mut archive = new_archive();
    archive.add_bytes("a.txt", &[7u8; 64], &AddOptions::new()).unwrap();
    archive.add_bytes("b.txt", &[8u8; 64], &AddOptions::new()).unwrap();
    let before = archive.storage().as_bytes().to_vec();

    let a = archive.get("a.txt").unwrap().unwrap();
    let progress = Progress::new();
    progress.cancel();
    assert!(matches!(
        archive.remove(&a, &RemoveOptions::default(), Some(&progress)),
        Err(Error::Cancelled)
    ));
    assert_eq!(archive.storage().as_bytes(), &before[..]);
    assert_eq!(archive.len(), 2);
}

#[test]
fn test_extract_cancelled_midway() {
    let mut archive = new_archive();
    archive
        .add_bytes("eight.bin", b"01234567", &AddOptions::new())
        .unwrap();
    let entry = archive.get("eight.bin").unwrap().unwrap();

    let progress = Progress::new();
    let canceller = progress.clone();
    let mut received = Vec::new();
    let result = archive.extract(
        &entry,
        &ExtractOptions::new().chunk_size(1),
        Some(&progress),
        |chunk| {
            received.extend_from_slice(chunk);
            if received.len() == 4 {
                canceller.cancel();
            }
            Ok(())
        },
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(received, b"0123");
    assert_eq!(progress.fraction_completed(), 0.5);
}

#[test]
fn test_empty_entry_delivers_one_empty_chunk() {
    let mut archive = new_archive();
    archive.add_bytes("empty", b"", &AddOptions::new()).unwrap();
    archive
        .add_bytes(
            "empty.z",
            b"",
            &AddOptions::new().compression(CompressionMethod::Deflate),
        )
        .unwrap();

    for name in ["empty", "empty.z"] {
        let chunks = collect_chunks(&mut archive, name, 16).unwrap();
        assert_eq!(chunks, vec![Vec::<u8>::new()], "{name}");
    }
}

#[test]
fn test_chunks_respect_chunk_size() {
    let mut archive = new_archive();
    let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
    archive
        .add_bytes(
            "data.bin",
            &data,
            &AddOptions::new().compression(CompressionMethod::Deflate),
        )
        .unwrap();

    let chunks = collect_chunks(&mut archive, "data.bin", 33).unwrap();
    assert!(chunks.iter().all(|c| c.len() <= 33 && !c.is_empty()));
    assert_eq!(chunks.concat(), data);
}

#[test]
fn test_zero_chunk_size_is_rejected() {
    let mut archive = new_archive();
    archive.add_bytes("a", b"abc", &AddOptions::new()).unwrap();
    assert!(matches!(
        collect_chunks(&mut archive, "a", 0),
        Err(Error::InvalidChunkSize)
    ));
    assert!(matches!(
        archive.add_bytes("b", b"abc", &AddOptions::new().chunk_size(0)),
        Err(Error::InvalidChunkSize)
    ));
}

#[test]
fn test_corrupted_deflate_stream() {
    let mut archive = new_archive();
    archive
        .add_bytes(
            "x.txt",
            &[b'x'; 200],
            &AddOptions::new().compression(CompressionMethod::Deflate),
        )
        .unwrap();
    let mut bytes = archive.into_bytes();
    // Payload follows the 30-byte local header and the 5-byte name.
    bytes[35] = 0xFF;

    let mut archive = reopen(bytes, AccessMode::Read);
    let entry = archive.get("x.txt").unwrap().unwrap();
    assert!(matches!(
        archive.extract_to_vec(&entry),
        Err(Error::CorruptedData)
    ));
}

#[test]
fn test_checksum_mismatch() {
    let mut archive = new_archive();
    archive
        .add_bytes("x.txt", b"checksummed", &AddOptions::new())
        .unwrap();
    let mut bytes = archive.into_bytes();
    let crc_at = cd_offset(&bytes) + 16;
    bytes[crc_at] ^= 0x01;

    let mut archive = reopen(bytes, AccessMode::Read);
    let entry = archive.get("x.txt").unwrap().unwrap();
    assert!(matches!(
        archive.extract_to_vec(&entry),
        Err(Error::ChecksumMismatch { .. })
    ));

    let mut out = Vec::new();
    archive
        .extract(
            &entry,
            &ExtractOptions::new().skip_crc32(true),
            None,
            |chunk| {
                out.extend_from_slice(chunk);
                Ok(())
            },
        )
        .unwrap();
    assert_eq!(out, b"checksummed");
}

#[test]
fn test_encrypted_entries_are_skipped() {
    let mut archive = new_archive();
    archive.add_bytes("secret.txt", b"s", &AddOptions::new()).unwrap();
    archive.add_bytes("public.txt", b"p", &AddOptions::new()).unwrap();
    let mut bytes = archive.into_bytes();
    // General purpose flags sit at offset 8 of the first directory header.
    let flags_pos = cd_offset(&bytes) + 8;
    bytes[flags_pos] |= 0x01;

    let mut archive = reopen(bytes, AccessMode::Update);
    assert_eq!(archive.len(), 2);
    let names: Vec<_> = archive
        .entries()
        .map(|e| e.unwrap().path().to_string())
        .collect();
    assert_eq!(names, ["public.txt"]);

    // Removing the visible entry carries the encrypted record along.
    let public = archive.get("public.txt").unwrap().unwrap();
    archive
        .remove(&public, &RemoveOptions::default(), None)
        .unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive.entries().count(), 0);
}

#[test]
fn test_read_mode_rejects_mutation() {
    let mut archive = new_archive();
    archive.add_bytes("a.txt", b"a", &AddOptions::new()).unwrap();
    let mut archive = reopen(archive.into_bytes(), AccessMode::Read);
    assert!(matches!(
        archive.add_bytes("b.txt", b"b", &AddOptions::new()),
        Err(Error::NotWritable)
    ));
    let a = archive.get("a.txt").unwrap().unwrap();
    assert!(matches!(
        archive.remove(&a, &RemoveOptions::default(), None),
        Err(Error::NotWritable)
    ));
}

#[test]
fn test_invalid_member_paths() {
    let mut archive = new_archive();
    for bad in ["", "/etc/passwd", "../escape.txt"] {
        assert!(matches!(
            archive.add_bytes(bad, b"x", &AddOptions::new()),
            Err(Error::InvalidEntryPath(_))
        ));
    }
    assert!(archive.is_empty());
}

#[test]
fn test_comment_survives_mutation() {
    // Empty archive with a seven-byte comment.
    let mut bytes = vec![0x50, 0x4B, 0x05, 0x06];
    bytes.extend_from_slice(&[0u8; 16]);
    bytes.extend_from_slice(&7u16.to_le_bytes());
    bytes.extend_from_slice(b"comment");

    let mut archive = reopen(bytes, AccessMode::Update);
    assert_eq!(archive.comment(), b"comment");
    archive.add_bytes("a.txt", b"a", &AddOptions::new()).unwrap();
    archive.add_bytes("b.txt", b"b", &AddOptions::new()).unwrap();
    let a = archive.get("a.txt").unwrap().unwrap();
    archive.remove(&a, &RemoveOptions::default(), None).unwrap();

    let archive = reopen(archive.into_bytes(), AccessMode::Read);
    assert_eq!(archive.comment(), b"comment");
    assert_eq!(archive.len(), 1);
}

#[test]
fn test_unsupported_method() {
    let mut archive = new_archive();
    archive.add_bytes("a.txt", b"abc", &AddOptions::new()).unwrap();
    let mut bytes = archive.into_bytes();
    // Compression method sits at offset 10 of the directory header.
    let method_at = cd_offset(&bytes) + 10;
    bytes[method_at] = 12;

    let mut archive = reopen(bytes, AccessMode::Read);
    let entry = archive.get("a.txt").unwrap().unwrap();
    assert!(matches!(
        archive.extract_to_vec(&entry),
        Err(Error::InvalidCompressionMethod(12))
    ));
}

#[test]
fn test_local_size_includes_data_descriptor() {
    let mut archive = reopen(descriptor_archive(&DESCRIPTOR_MEMBERS), AccessMode::Read);
    let a = archive.get("a.txt").unwrap().unwrap();
    let b = archive.get("b.txt").unwrap().unwrap();
    // Header, name, payload, then a 16-byte or 12-byte descriptor.
    assert_eq!(archive.local_size(&a).unwrap(), 30 + 5 + 5 + 16);
    assert_eq!(archive.local_size(&b).unwrap(), 30 + 5 + 6 + 12);
    assert_eq!(archive.extract_to_vec(&b).unwrap(), b"bravo!");
}

#[test]
fn test_remove_entries_with_data_descriptors() {
    for removed in ["a.txt", "b.txt"] {
        let mut archive = reopen(descriptor_archive(&DESCRIPTOR_MEMBERS), AccessMode::Update);
        let entry = archive.get(removed).unwrap().unwrap();
        archive
            .remove(&entry, &RemoveOptions::default(), None)
            .unwrap();

        let mut archive = reopen(archive.into_bytes(), AccessMode::Read);
        let entries = archive.entries().collect::<rezip::Result<Vec<_>>>().unwrap();
        assert_eq!(entries.len(), 2, "after removing {removed}");
        assert_eq!(entries[0].local_header_offset(), 0);
        assert_eq!(
            entries[1].local_header_offset(),
            archive.local_size(&entries[0]).unwrap()
        );
        for entry in &entries {
            let expected = DESCRIPTOR_MEMBERS
                .iter()
                .find(|m| m.name == entry.path())
                .unwrap();
            assert_ne!(entry.path(), removed);
            assert_eq!(archive.extract_to_vec(entry).unwrap(), expected.data);
        }
    }
}

#[test]
fn test_duplicate_paths_resolve_to_first() {
    let mut archive = new_archive();
    archive.add_bytes("x", b"first", &AddOptions::new()).unwrap();
    archive.add_bytes("x", b"second", &AddOptions::new()).unwrap();
    assert_eq!(archive.len(), 2);

    let found = archive.get("x").unwrap().unwrap();
    assert_eq!(found.local_header_offset(), 0);
    assert_eq!(archive.extract_to_vec(&found).unwrap(), b"first");

    archive
        .remove(&found, &RemoveOptions::default(), None)
        .unwrap();
    let found = archive.get("x").unwrap().unwrap();
    assert_eq!(archive.extract_to_vec(&found).unwrap(), b"second");
}
