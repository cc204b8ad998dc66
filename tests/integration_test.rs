#![cfg(all(feature = "encode", feature = "decode"))]

use paperstore::chunk::Chunk;
use paperstore::qr::encode_record;
use paperstore::{
    decode_file, encode_data, encode_file, reassemble, scan_input, DecodeOptions, EcLevel,
    EncodeOptions, NoProgress, PaperError, Record, SymbolSpec,
};
use std::fs;
use tempfile::TempDir;

fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn small_symbols() -> EncodeOptions {
    EncodeOptions {
        symbol: SymbolSpec {
            version: 10,
            ec_level: EcLevel::L,
            pixel_scale: 4,
        },
        ..EncodeOptions::default()
    }
}

#[test]
fn test_encode_decode_roundtrip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source_file_path = temp_dir.path().join("source.bin");
    let pdf_path = temp_dir.path().join("backup.pdf");
    let decoded_output_path = temp_dir.path().join("decoded.bin");

    let original = pseudo_random(5000, 7);
    fs::write(&source_file_path, &original).expect("Failed to write source file");

    let options = EncodeOptions {
        symbol: SymbolSpec {
            version: 40,
            ec_level: EcLevel::L,
            pixel_scale: 4,
        },
        chunk_size: Some(2000),
        ..EncodeOptions::default()
    };

    println!("Encoding...");
    let encode_result =
        encode_file(&source_file_path, &pdf_path, &options, &NoProgress).expect("Encoding failed");
    assert_eq!(encode_result.num_chunks, 3);
    assert_eq!(encode_result.num_symbols, 4);
    assert_eq!(encode_result.num_pages, 1);
    assert!(pdf_path.exists());

    println!("Decoding...");
    let decode_result = decode_file(
        &pdf_path,
        &decoded_output_path,
        &DecodeOptions::default(),
        &NoProgress,
    )
    .expect("Decoding failed");

    assert_eq!(decode_result.num_chunks, 3);
    assert!(decode_result.verified);
    assert_eq!(decode_result.original_filename.as_deref(), Some("source.bin"));
    assert_eq!(decode_result.bytes_written, original.len());

    let decoded = fs::read(&decoded_output_path).expect("Failed to read decoded file");
    assert_eq!(decoded, original);
}

#[test]
fn test_compressed_roundtrip_into_directory() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pdf_path = temp_dir.path().join("notes.pdf");
    let restore_dir = temp_dir.path().join("restored");
    fs::create_dir(&restore_dir).expect("Failed to create restore dir");

    let original = "All work and no play makes a dull backup.\n".repeat(60).into_bytes();
    let options = EncodeOptions {
        compress: true,
        ..small_symbols()
    };

    let encode_result = encode_data(&original, "notes.txt", &pdf_path, &options, &NoProgress)
        .expect("Encoding failed");
    assert!(encode_result.payload_size < original.len());

    let decode_result = decode_file(&pdf_path, &restore_dir, &DecodeOptions::default(), &NoProgress)
        .expect("Decoding failed");

    assert_eq!(decode_result.output_path, restore_dir.join("notes.txt"));
    let decoded = fs::read(restore_dir.join("notes.txt")).expect("Failed to read decoded file");
    assert_eq!(decoded, original);
}

#[test]
fn test_missing_chunk_is_reported() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pdf_path = temp_dir.path().join("gappy.pdf");

    let original = pseudo_random(1200, 11);
    let options = EncodeOptions {
        chunk_size: Some(150),
        no_manifest: true,
        ..small_symbols()
    };
    let encode_result = encode_data(&original, "gappy.bin", &pdf_path, &options, &NoProgress)
        .expect("Encoding failed");
    assert_eq!(encode_result.num_chunks, 8);

    let summary = scan_input(&pdf_path, &DecodeOptions::default(), &NoProgress)
        .expect("Scanning failed");
    assert_eq!(summary.records.len(), 8);

    let remaining: Vec<Record> = summary
        .records
        .into_iter()
        .filter(|r| !matches!(r, Record::Chunk(c) if c.index == 5))
        .collect();

    match reassemble(remaining) {
        Err(PaperError::MissingChunk(missing)) => assert_eq!(missing, vec![5]),
        other => panic!("expected MissingChunk, got {:?}", other.map(|r| r.total)),
    }
}

#[test]
fn test_missing_chunk_writes_nothing() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let scans_dir = temp_dir.path().join("scans");
    let output = temp_dir.path().join("restored.bin");
    fs::create_dir(&scans_dir).expect("Failed to create scans dir");

    let spec = small_symbols().symbol;
    let data = pseudo_random(500, 13);
    let chunks: Vec<Chunk> = paperstore::split_into_chunks(&data, 100, 0)
        .expect("Failed to split data")
        .collect();
    assert_eq!(chunks.len(), 5);

    // The third page never made it into the scanner.
    for chunk in chunks.into_iter().filter(|c| c.index != 2) {
        let name = format!("page_{}.png", chunk.index);
        encode_record(&Record::Chunk(chunk), &spec)
            .expect("Failed to render symbol")
            .save(scans_dir.join(name))
            .expect("Failed to save scan");
    }

    let result = decode_file(&scans_dir, &output, &DecodeOptions::default(), &NoProgress);
    match result {
        Err(PaperError::MissingChunk(missing)) => assert_eq!(missing, vec![2]),
        other => panic!("expected MissingChunk, got {:?}", other.map(|r| r.num_chunks)),
    }
    assert!(!output.exists());
}

#[test]
fn test_small_symbols_keep_the_manifest() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pdf_path = temp_dir.path().join("small.pdf");
    let restore_dir = temp_dir.path().join("restored");
    fs::create_dir(&restore_dir).expect("Failed to create restore dir");

    let long_name = format!("{}.txt", "seed-phrase-backup-".repeat(6));
    let original = b"twelve words that must not be lost".to_vec();
    let options = EncodeOptions {
        symbol: SymbolSpec {
            version: 10,
            ec_level: EcLevel::Q,
            pixel_scale: 4,
        },
        ..EncodeOptions::default()
    };

    let encode_result = encode_data(&original, &long_name, &pdf_path, &options, &NoProgress)
        .expect("Encoding failed");
    assert!(encode_result.has_manifest);

    let decode_result = decode_file(&pdf_path, &restore_dir, &DecodeOptions::default(), &NoProgress)
        .expect("Decoding failed");
    assert!(decode_result.verified);

    let restored_name = decode_result
        .original_filename
        .expect("manifest filename missing");
    assert!(restored_name.len() < long_name.len());
    assert!(long_name.starts_with(&restored_name));
    assert_eq!(
        fs::read(restore_dir.join(&restored_name)).expect("Failed to read decoded file"),
        original
    );
}

#[test]
fn test_decode_from_image_directory() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let scans_dir = temp_dir.path().join("scans");
    let output = temp_dir.path().join("restored.txt");
    fs::create_dir(&scans_dir).expect("Failed to create scans dir");

    let spec = small_symbols().symbol;
    let parts: [&[u8]; 3] = [b"first part, ", b"second part, ", b"third part"];

    // Saved in reverse so name order differs from chunk order.
    for (i, part) in parts.iter().enumerate() {
        let record = Record::Chunk(Chunk {
            index: i as u32,
            total: parts.len() as u32,
            flags: 0,
            data: part.to_vec(),
        });
        let image = encode_record(&record, &spec).expect("Failed to render symbol");
        image
            .save(scans_dir.join(format!("scan_{}.png", parts.len() - i)))
            .expect("Failed to save scan");
    }

    let decode_result = decode_file(&scans_dir, &output, &DecodeOptions::default(), &NoProgress)
        .expect("Decoding failed");

    assert_eq!(decode_result.num_chunks, 3);
    assert!(!decode_result.verified);
    assert_eq!(
        fs::read_to_string(&output).expect("Failed to read decoded file"),
        "first part, second part, third part"
    );
}

#[test]
fn test_conflicting_duplicates_write_nothing() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let scans_dir = temp_dir.path().join("scans");
    let output = temp_dir.path().join("restored.bin");
    fs::create_dir(&scans_dir).expect("Failed to create scans dir");

    let spec = small_symbols().symbol;
    let symbols = [(0u32, b"aaaa"), (1, b"bbbb"), (1, b"cccc")];
    for (n, (index, data)) in symbols.iter().enumerate() {
        let record = Record::Chunk(Chunk {
            index: *index,
            total: 2,
            flags: 0,
            data: data.to_vec(),
        });
        encode_record(&record, &spec)
            .expect("Failed to render symbol")
            .save(scans_dir.join(format!("page_{}.png", n)))
            .expect("Failed to save scan");
    }

    let result = decode_file(&scans_dir, &output, &DecodeOptions::default(), &NoProgress);
    assert!(matches!(result, Err(PaperError::DuplicateChunk(1))));
    assert!(!output.exists());
}

#[test]
fn test_empty_file_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source_file_path = temp_dir.path().join("empty.txt");
    let pdf_path = temp_dir.path().join("empty.pdf");
    fs::write(&source_file_path, b"").expect("Failed to write source file");

    let result = encode_file(&source_file_path, &pdf_path, &small_symbols(), &NoProgress);
    assert!(matches!(result, Err(PaperError::InvalidInput(_))));
    assert!(!pdf_path.exists());
}
