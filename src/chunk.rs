use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use tracing::{debug, warn};

use crate::error::{PaperError, Result};

// Record layout, all integers big-endian:
//   [magic "PS" 2B] [format 1B] [kind 1B] [flags 1B] [total 4B] [index 4B] [body]
// Chunk body:    payload bytes
// Manifest body: [original size 8B] [sha256 32B] [filename, UTF-8]
pub const MAGIC: &[u8; 2] = b"PS";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 13;
pub const SHA256_SIZE: usize = 32;
const MANIFEST_FIXED_SIZE: usize = 8 + SHA256_SIZE;

pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Chunk = 0,
    Manifest = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: RecordKind,
    pub flags: u8,
    pub total: u32,
    pub index: u32,
}

impl RecordHeader {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(MAGIC);
        bytes[2] = FORMAT_VERSION;
        bytes[3] = self.kind as u8;
        bytes[4] = self.flags;
        bytes[5..9].copy_from_slice(&self.total.to_be_bytes());
        bytes[9..13].copy_from_slice(&self.index.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(PaperError::InvalidRecord("header too short".to_string()));
        }
        if &bytes[0..2] != MAGIC {
            return Err(PaperError::InvalidRecord("not a paperstore record".to_string()));
        }
        if bytes[2] != FORMAT_VERSION {
            return Err(PaperError::InvalidRecord(format!(
                "unsupported record format {}",
                bytes[2]
            )));
        }
        let kind = match bytes[3] {
            0 => RecordKind::Chunk,
            1 => RecordKind::Manifest,
            other => {
                return Err(PaperError::InvalidRecord(format!(
                    "unknown record kind {}",
                    other
                )))
            }
        };
        let flags = bytes[4];
        let total = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let index = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]);

        if total == 0 {
            return Err(PaperError::InvalidRecord("chunk count is zero".to_string()));
        }
        if kind == RecordKind::Chunk && index >= total {
            return Err(PaperError::InvalidRecord(format!(
                "chunk index {} out of range for {} chunk(s)",
                index, total
            )));
        }

        Ok(RecordHeader {
            kind,
            flags,
            total,
            index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub total: u32,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            kind: RecordKind::Chunk,
            flags: self.flags,
            total: self.total,
            index: self.index,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

/// Describes the original file so a restore can be named and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub filename: String,
    pub size: u64,
    pub sha256: [u8; SHA256_SIZE],
    pub total: u32,
    pub flags: u8,
}

impl Manifest {
    pub fn new(data: &[u8], filename: &str, total: u32, flags: u8) -> Self {
        Manifest {
            filename: sanitize_filename(filename),
            size: data.len() as u64,
            sha256: sha256(data),
            total,
            flags,
        }
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    fn header(&self) -> RecordHeader {
        RecordHeader {
            kind: RecordKind::Manifest,
            flags: self.flags,
            total: self.total,
            index: 0,
        }
    }
}

/// One decoded symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Chunk(Chunk),
    Manifest(Manifest),
}

impl Record {
    pub fn total(&self) -> u32 {
        match self {
            Record::Chunk(c) => c.total,
            Record::Manifest(m) => m.total,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Record::Chunk(chunk) => {
                let mut bytes = Vec::with_capacity(HEADER_SIZE + chunk.data.len());
                bytes.extend_from_slice(&chunk.header().to_bytes());
                bytes.extend_from_slice(&chunk.data);
                bytes
            }
            Record::Manifest(manifest) => {
                let name = manifest.filename.as_bytes();
                let mut bytes = Vec::with_capacity(HEADER_SIZE + MANIFEST_FIXED_SIZE + name.len());
                bytes.extend_from_slice(&manifest.header().to_bytes());
                bytes.extend_from_slice(&manifest.size.to_be_bytes());
                bytes.extend_from_slice(&manifest.sha256);
                bytes.extend_from_slice(name);
                bytes
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = RecordHeader::from_bytes(bytes)?;
        let body = &bytes[HEADER_SIZE..];

        match header.kind {
            RecordKind::Chunk => Ok(Record::Chunk(Chunk {
                index: header.index,
                total: header.total,
                flags: header.flags,
                data: body.to_vec(),
            })),
            RecordKind::Manifest => {
                if body.len() < MANIFEST_FIXED_SIZE {
                    return Err(PaperError::InvalidRecord("manifest too short".to_string()));
                }
                let mut size = [0u8; 8];
                size.copy_from_slice(&body[..8]);
                let mut digest = [0u8; SHA256_SIZE];
                digest.copy_from_slice(&body[8..MANIFEST_FIXED_SIZE]);
                let filename = std::str::from_utf8(&body[MANIFEST_FIXED_SIZE..])
                    .map_err(|_| PaperError::InvalidRecord("filename is not valid UTF-8".to_string()))?
                    .to_string();

                Ok(Record::Manifest(Manifest {
                    filename,
                    size: u64::from_be_bytes(size),
                    sha256: digest,
                    total: header.total,
                    flags: header.flags,
                }))
            }
        }
    }
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| PaperError::InvalidInput(format!("compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PaperError::InvalidInput(format!("compression failed: {}", e)))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut result = Vec::new();
    decoder
        .read_to_end(&mut result)
        .map_err(|e| PaperError::Decompress(e.to_string()))?;
    Ok(result)
}

pub fn sha256(data: &[u8]) -> [u8; SHA256_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keeps only the final path component so a manifest cannot point a restore
/// outside the output directory.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace('\0', "");
    if matches!(last.as_str(), "" | "." | "..") {
        String::new()
    } else {
        last
    }
}

/// Longest record whose base64 text fits in `capacity` bytes of symbol
/// content.
pub fn max_record_len(capacity: usize) -> usize {
    capacity / 4 * 3
}

/// Largest chunk payload whose base64-encoded record fits in `capacity`
/// bytes of symbol content.
pub fn max_chunk_payload(capacity: usize) -> Option<usize> {
    max_record_len(capacity)
        .checked_sub(HEADER_SIZE)
        .filter(|&n| n > 0)
}

/// Longest manifest filename, in bytes, that keeps the manifest record
/// within `capacity`. None when not even a nameless manifest fits.
pub fn max_manifest_name(capacity: usize) -> Option<usize> {
    max_record_len(capacity).checked_sub(HEADER_SIZE + MANIFEST_FIXED_SIZE)
}

pub struct ChunkIterator<'a> {
    payload: &'a [u8],
    chunk_size: usize,
    total_chunks: u32,
    flags: u8,
    current_index: usize,
}

impl<'a> ChunkIterator<'a> {
    pub fn total(&self) -> u32 {
        self.total_chunks
    }
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index as u32 >= self.total_chunks {
            return None;
        }

        let start = self.current_index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.payload.len());

        let chunk = Chunk {
            index: self.current_index as u32,
            total: self.total_chunks,
            flags: self.flags,
            data: self.payload[start..end].to_vec(),
        };

        self.current_index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total_chunks as usize - self.current_index;
        (left, Some(left))
    }
}

impl<'a> ExactSizeIterator for ChunkIterator<'a> {}

/// Splits `payload` into chunks of at most `chunk_size` bytes, each tagged
/// with its index and the total count.
pub fn split_into_chunks(payload: &[u8], chunk_size: usize, flags: u8) -> Result<ChunkIterator<'_>> {
    if payload.is_empty() {
        return Err(PaperError::InvalidInput("payload is empty".to_string()));
    }
    if chunk_size == 0 {
        return Err(PaperError::InvalidInput("chunk size must be at least 1".to_string()));
    }

    let total_chunks = payload.len().div_ceil(chunk_size);
    let total_chunks = u32::try_from(total_chunks).map_err(|_| {
        PaperError::InvalidInput(format!("payload needs {} chunks, too many", total_chunks))
    })?;

    Ok(ChunkIterator {
        payload,
        chunk_size,
        total_chunks,
        flags,
        current_index: 0,
    })
}

/// Chunks put back in order, before decompression and verification.
#[derive(Debug, Clone)]
pub struct Reassembled {
    pub payload: Vec<u8>,
    pub total: u32,
    pub compressed: bool,
    pub manifest: Option<Manifest>,
}

/// Validates a set of records gathered from any number of pages and joins
/// the chunk payloads in index order. The result does not depend on the
/// order the records were scanned in.
pub fn reassemble<I>(records: I) -> Result<Reassembled>
where
    I: IntoIterator<Item = Record>,
{
    let records: Vec<Record> = records.into_iter().collect();
    if records.is_empty() {
        return Err(PaperError::NoSymbols);
    }

    let mut totals: HashMap<u32, usize> = HashMap::new();
    for record in &records {
        *totals.entry(record.total()).or_default() += 1;
    }
    // The count most symbols agree on is the reference; ties go to the smaller.
    let (&expected, _) = totals
        .iter()
        .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then(tb.cmp(ta)))
        .ok_or(PaperError::NoSymbols)?;
    if let Some(&found) = totals.keys().filter(|&&t| t != expected).min() {
        return Err(PaperError::InconsistentTotal { expected, found });
    }

    let mut chunks: BTreeMap<u32, Chunk> = BTreeMap::new();
    let mut manifests: Vec<Manifest> = Vec::new();
    for record in records {
        match record {
            Record::Manifest(m) => manifests.push(m),
            Record::Chunk(chunk) => match chunks.get(&chunk.index) {
                Some(existing) if existing.data != chunk.data || existing.flags != chunk.flags => {
                    return Err(PaperError::DuplicateChunk(chunk.index));
                }
                Some(_) => debug!("Ignoring repeated copy of chunk {}", chunk.index),
                None => {
                    chunks.insert(chunk.index, chunk);
                }
            },
        }
    }

    let mut flags = chunks.values().map(|c| c.is_compressed());
    let compressed = match flags.next() {
        Some(first) => {
            if flags.any(|f| f != first) {
                return Err(PaperError::InconsistentFlags);
            }
            first
        }
        None => manifests
            .first()
            .map(|m| m.flags & FLAG_COMPRESSED != 0)
            .unwrap_or(false),
    };

    let missing: Vec<u32> = (0..expected).filter(|i| !chunks.contains_key(i)).collect();
    if !missing.is_empty() {
        return Err(PaperError::MissingChunk(missing));
    }

    let manifest = match manifests.as_slice() {
        [] => None,
        [first, rest @ ..] => {
            if rest.iter().any(|m| m != first) {
                return Err(PaperError::ConflictingManifest);
            }
            if (first.flags & FLAG_COMPRESSED != 0) != compressed {
                return Err(PaperError::InconsistentFlags);
            }
            Some(first.clone())
        }
    };

    let mut payload = Vec::with_capacity(chunks.values().map(|c| c.data.len()).sum());
    for chunk in chunks.into_values() {
        payload.extend_from_slice(&chunk.data);
    }

    Ok(Reassembled {
        payload,
        total: expected,
        compressed,
        manifest,
    })
}

/// Decompresses a reassembled payload if needed and checks it against the
/// manifest, when one was found.
pub fn restore(reassembled: Reassembled) -> Result<Vec<u8>> {
    let data = if reassembled.compressed {
        decompress(&reassembled.payload)?
    } else {
        reassembled.payload
    };

    match &reassembled.manifest {
        Some(manifest) => {
            let actual = sha256(&data);
            if data.len() as u64 != manifest.size || actual != manifest.sha256 {
                return Err(PaperError::ChecksumMismatch {
                    expected: format!("{} bytes, sha256 {}", manifest.size, manifest.sha256_hex()),
                    actual: format!("{} bytes, sha256 {}", data.len(), hex::encode(actual)),
                });
            }
        }
        None => warn!("No manifest symbol found; restored data is not verified"),
    }

    Ok(data)
}
