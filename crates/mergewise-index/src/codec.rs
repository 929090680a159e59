//! On-disk snapshot format.
//!
//! ```text
//! {"format":"mergewise-index","version":1,...,"payload_len":N,"checksum":"<blake3>"}\n
//! <N bytes of JSON payload>
//! ```
//!
//! The header can be read on its own to inspect a snapshot without decoding vectors.
//! Vectors are stored as little-endian `f32` hex strings so they reload bit-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::snapshot::{FileRecord, IndexSnapshot};
use crate::types::{Chunk, RepositoryKey};
use crate::vector::VectorIndex;

pub const FORMAT: &str = "mergewise-index";
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub format: String,
    pub version: u32,
    pub repository: RepositoryKey,
    pub commit_ref: Option<String>,
    pub last_used_ms: u64,
    pub chunk_count: usize,
    pub payload_len: u64,
    pub checksum: String,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    dimension: Option<usize>,
    files: &'a BTreeMap<String, FileRecord>,
    chunks: Vec<&'a Chunk>,
    vectors: BTreeMap<&'a str, String>,
    pending: &'a BTreeSet<String>,
    skipped: &'a BTreeSet<String>,
}

#[derive(Deserialize)]
struct Payload {
    dimension: Option<usize>,
    files: BTreeMap<String, FileRecord>,
    chunks: Vec<Chunk>,
    vectors: BTreeMap<String, String>,
    #[serde(default)]
    pending: BTreeSet<String>,
    #[serde(default)]
    skipped: BTreeSet<String>,
}

fn corrupt(msg: impl Into<String>) -> IndexError {
    IndexError::CorruptSnapshot(msg.into())
}

fn encode_vector(v: &[f32]) -> String {
    let mut out = String::with_capacity(v.len() * 8);
    for x in v {
        for b in x.to_le_bytes() {
            let _ = write!(out, "{b:02x}");
        }
    }
    out
}

fn decode_vector(s: &str) -> Option<Vec<f32>> {
    if s.len() % 8 != 0 || !s.is_ascii() {
        return None;
    }
    s.as_bytes()
        .chunks(8)
        .map(|word| {
            let mut bytes = [0u8; 4];
            for (i, pair) in word.chunks(2).enumerate() {
                let hex = std::str::from_utf8(pair).ok()?;
                bytes[i] = u8::from_str_radix(hex, 16).ok()?;
            }
            Some(f32::from_le_bytes(bytes))
        })
        .collect()
}

/// Serialize a snapshot into header line plus payload.
///
/// # Errors
///
/// Returns a JSON error if serialization fails.
pub fn encode(snapshot: &IndexSnapshot) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&PayloadRef {
        dimension: snapshot.index.dimension(),
        files: &snapshot.files,
        chunks: snapshot.chunks.values().collect(),
        vectors: snapshot
            .index
            .iter()
            .map(|(id, v)| (id, encode_vector(v)))
            .collect(),
        pending: &snapshot.pending,
        skipped: &snapshot.skipped,
    })?;
    let header = SnapshotHeader {
        format: FORMAT.to_owned(),
        version: VERSION,
        repository: snapshot.repository_key.clone(),
        commit_ref: snapshot.commit_ref.clone(),
        last_used_ms: snapshot.last_used_ms,
        chunk_count: snapshot.chunks.len(),
        payload_len: u64::try_from(payload.len())?,
        checksum: blake3::hash(&payload).to_hex().to_string(),
    };
    let mut out = serde_json::to_vec(&header)?;
    out.push(b'\n');
    out.extend_from_slice(&payload);
    Ok(out)
}

fn split_header(bytes: &[u8]) -> Result<(SnapshotHeader, &[u8])> {
    let newline = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| corrupt("missing header line"))?;
    let header: SnapshotHeader = serde_json::from_slice(&bytes[..newline])
        .map_err(|e| corrupt(format!("unreadable header: {e}")))?;
    if header.format != FORMAT {
        return Err(corrupt(format!("unknown format {:?}", header.format)));
    }
    if header.version != VERSION {
        return Err(corrupt(format!("unsupported version {}", header.version)));
    }
    Ok((header, &bytes[newline + 1..]))
}

/// Parse and check only the header line. Accepts either the bare line or a full file.
///
/// # Errors
///
/// Returns `CorruptSnapshot` for a missing or unrecognized header.
pub fn decode_header(bytes: &[u8]) -> Result<SnapshotHeader> {
    if bytes.contains(&b'\n') {
        return split_header(bytes).map(|(h, _)| h);
    }
    let mut line = bytes.to_vec();
    line.push(b'\n');
    split_header(&line).map(|(h, _)| h)
}

/// Fully decode and validate a snapshot.
///
/// # Errors
///
/// Returns `CorruptSnapshot` when the header, length, checksum, JSON shape or
/// chunk/vector bijection does not check out.
pub fn decode(bytes: &[u8]) -> Result<IndexSnapshot> {
    let (header, payload) = split_header(bytes)?;
    let actual_len = u64::try_from(payload.len())?;
    if actual_len != header.payload_len {
        return Err(corrupt(format!(
            "payload is {actual_len} bytes, header says {}",
            header.payload_len
        )));
    }
    if blake3::hash(payload).to_hex().as_str() != header.checksum {
        return Err(corrupt("checksum mismatch"));
    }
    let payload: Payload =
        serde_json::from_slice(payload).map_err(|e| corrupt(format!("bad payload: {e}")))?;
    if payload.chunks.len() != header.chunk_count {
        return Err(corrupt(format!(
            "{} chunks, header says {}",
            payload.chunks.len(),
            header.chunk_count
        )));
    }

    let mut index = payload
        .dimension
        .map_or_else(VectorIndex::new, VectorIndex::with_dimension);
    let mut vectors = payload.vectors;
    let mut chunks = BTreeMap::new();
    for chunk in payload.chunks {
        let encoded = vectors
            .remove(&chunk.document_id)
            .ok_or_else(|| corrupt(format!("chunk {} has no vector", chunk.document_id)))?;
        let vector = decode_vector(&encoded)
            .ok_or_else(|| corrupt(format!("bad vector for {}", chunk.document_id)))?;
        index
            .upsert(&chunk.document_id, vector)
            .map_err(|e| corrupt(e.to_string()))?;
        if chunks.insert(chunk.document_id.clone(), chunk).is_some() {
            return Err(corrupt("duplicate chunk id"));
        }
    }
    if let Some(orphan) = vectors.keys().next() {
        return Err(corrupt(format!("vector {orphan} has no chunk")));
    }

    let snapshot = IndexSnapshot {
        repository_key: header.repository,
        commit_ref: header.commit_ref,
        files: payload.files,
        chunks,
        index,
        pending: payload.pending,
        skipped: payload.skipped,
        last_used_ms: header.last_used_ms,
    };
    if !snapshot.is_consistent() {
        return Err(corrupt("file records disagree with chunk table"));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Lang;
    use crate::types::ChunkType;

    fn sample() -> IndexSnapshot {
        let mut s = IndexSnapshot::new("acme/widgets".parse().unwrap());
        s.set_commit_ref("abc123");
        s.touch(42);
        let chunk = |id: &str, start| Chunk {
            document_id: id.into(),
            file_path: "src/lib.rs".into(),
            start_line: start,
            end_line: start + 2,
            chunk_type: ChunkType::CodeUnit,
            kind: "function_item".into(),
            label: Some("run".into()),
            language: Some(Lang::Rust),
            content: "fn run() {}".into(),
        };
        s.replace_file(
            "src/lib.rs",
            FileRecord::new("blob", "hash"),
            vec![
                (chunk("d1", 1), Some(vec![0.1, -0.7, 1.0e-7])),
                (chunk("d2", 4), Some(vec![f32::MIN_POSITIVE, 0.333_333_34, 9.5])),
            ],
        )
        .unwrap();
        s.pending.insert("docs/missing.md".into());
        s.skipped.insert("vendor/blob.bin".into());
        s
    }

    #[test]
    fn decode_restores_identical_snapshot() {
        let s = sample();
        let bytes = encode(&s).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.embedding("d2").unwrap(), s.embedding("d2").unwrap());
    }

    #[test]
    fn header_is_readable_alone() {
        let bytes = encode(&sample()).unwrap();
        let line = &bytes[..bytes.iter().position(|b| *b == b'\n').unwrap()];
        let header = decode_header(line).unwrap();
        assert_eq!(header.repository.to_string(), "acme/widgets");
        assert_eq!(header.commit_ref.as_deref(), Some("abc123"));
        assert_eq!(header.chunk_count, 2);
        assert_eq!(decode_header(&bytes).unwrap(), header);
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 5]).unwrap_err();
        assert!(matches!(err, IndexError::CorruptSnapshot(_)), "{err}");
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut bytes = encode(&sample()).unwrap();
        let last = bytes.len() - 3;
        bytes[last] ^= 0x01;
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn garbage_is_corrupt() {
        for input in [&b""[..], b"not a snapshot", b"{}\n{}", b"\xff\xfe\n"] {
            assert!(matches!(
                decode(input),
                Err(IndexError::CorruptSnapshot(_))
            ));
        }
    }

    #[test]
    fn wrong_version_is_rejected() {
        let bytes = encode(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let bumped = text.replacen("\"version\":1", "\"version\":99", 1);
        let err = decode(bumped.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("version"), "{err}");
    }

    #[test]
    fn vector_hex_round_trips_special_values() {
        let v = vec![0.0, -0.0, 1.5, f32::MAX, f32::MIN_POSITIVE];
        let back = decode_vector(&encode_vector(&v)).unwrap();
        assert_eq!(
            back.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
            v.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        );
        assert!(decode_vector("abc").is_none());
        assert!(decode_vector("zzzzzzzz").is_none());
    }
}
