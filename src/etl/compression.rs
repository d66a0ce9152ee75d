//! # Compression Module
//!
//! Byte and JSON compression into a self-describing [`CompressedData`]
//! container. Gzip and deflate are backed by `flate2`; the remaining formats
//! are recognised so containers can name them, but encoding or decoding them
//! fails with [`EtlError::Compression`].
//!
//! Large datasets can be split into independently compressed chunks with
//! [`compress_dataset`] and put back together with [`decompress_dataset`].

use crate::etl::error::{EtlError, Result};
use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    Gzip,
    Deflate,
    Brotli,
    Lz4,
    Zstd,
}

impl CompressionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Deflate => "deflate",
            CompressionFormat::Brotli => "brotli",
            CompressionFormat::Lz4 => "lz4",
            CompressionFormat::Zstd => "zstd",
        }
    }

    /// Whether this build can encode and decode the format
    pub fn is_supported(&self) -> bool {
        matches!(self, CompressionFormat::Gzip | CompressionFormat::Deflate)
    }

    fn unsupported(&self) -> EtlError {
        EtlError::Compression(format!("unsupported compression format: {}", self))
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionFormat {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionFormat::Gzip),
            "deflate" => Ok(CompressionFormat::Deflate),
            "brotli" | "br" => Ok(CompressionFormat::Brotli),
            "lz4" => Ok(CompressionFormat::Lz4),
            "zstd" | "zst" => Ok(CompressionFormat::Zstd),
            other => Err(EtlError::Configuration(format!(
                "unknown compression format: {other}"
            ))),
        }
    }
}

/// Position of one chunk within a compressed dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub item_count: usize,
    /// First item index, inclusive
    pub start_index: usize,
    /// Last item index, exclusive
    pub end_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedData {
    pub format: CompressionFormat,
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

impl CompressedData {
    /// Compressed size as a fraction of the original size
    pub fn ratio(&self) -> f64 {
        compression_ratio(self.original_size, self.compressed_size)
    }
}

/// `compressed / original`; an empty original yields `0.0`.
pub fn compression_ratio(original_size: usize, compressed_size: usize) -> f64 {
    if original_size == 0 {
        0.0
    } else {
        compressed_size as f64 / original_size as f64
    }
}

const MAX_CAPACITY_HINT_FACTOR: usize = 4;

fn codec_error(format: CompressionFormat, err: std::io::Error) -> EtlError {
    EtlError::Compression(format!("{format} codec failed: {err}"))
}

pub fn compress(data: &[u8], format: CompressionFormat) -> Result<CompressedData> {
    let encoded = match format {
        CompressionFormat::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(|e| codec_error(format, e))?;
            encoder.finish().map_err(|e| codec_error(format, e))?
        }
        CompressionFormat::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).map_err(|e| codec_error(format, e))?;
            encoder.finish().map_err(|e| codec_error(format, e))?
        }
        other => return Err(other.unsupported()),
    };

    Ok(CompressedData {
        format,
        original_size: data.len(),
        compressed_size: encoded.len(),
        data: encoded,
        metadata: None,
    })
}

pub fn decompress(compressed: &CompressedData) -> Result<Vec<u8>> {
    // original_size comes from the container, so it is only a capped hint
    let hint = compressed
        .original_size
        .min(compressed.data.len().saturating_mul(MAX_CAPACITY_HINT_FACTOR));
    let mut decoded = Vec::with_capacity(hint);
    match compressed.format {
        CompressionFormat::Gzip => GzDecoder::new(compressed.data.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| codec_error(compressed.format, e))?,
        CompressionFormat::Deflate => DeflateDecoder::new(compressed.data.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| codec_error(compressed.format, e))?,
        other => return Err(other.unsupported()),
    };
    Ok(decoded)
}

pub fn compress_json<T: Serialize + ?Sized>(value: &T, format: CompressionFormat) -> Result<CompressedData> {
    let bytes = serde_json::to_vec(value).map_err(|e| EtlError::Serialization(e.to_string()))?;
    compress(&bytes, format)
}

pub fn decompress_json<T: DeserializeOwned>(compressed: &CompressedData) -> Result<T> {
    let bytes = decompress(compressed)?;
    serde_json::from_slice(&bytes).map_err(EtlError::from_serde)
}

/// Compress `items` as JSON arrays of at most `chunk_size` items each.
pub fn compress_dataset<T: Serialize>(
    items: &[T],
    chunk_size: usize,
    format: CompressionFormat,
) -> Result<Vec<CompressedData>> {
    if chunk_size == 0 {
        return Err(EtlError::Configuration(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let total_chunks = items.len().div_ceil(chunk_size);
    items
        .chunks(chunk_size)
        .enumerate()
        .map(|(chunk_index, chunk)| {
            let start_index = chunk_index * chunk_size;
            let mut compressed = compress_json(chunk, format)?;
            compressed.metadata = Some(ChunkMetadata {
                chunk_index,
                total_chunks,
                item_count: chunk.len(),
                start_index,
                end_index: start_index + chunk.len(),
            });
            Ok(compressed)
        })
        .collect()
}

/// Reassemble chunks from [`compress_dataset`], in any order.
pub fn decompress_dataset<T: DeserializeOwned>(chunks: &[CompressedData]) -> Result<Vec<T>> {
    let mut ordered = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let metadata = chunk.metadata.ok_or_else(|| {
            EtlError::Compression("dataset chunk is missing chunk metadata".to_string())
        })?;
        ordered.push((metadata, chunk));
    }
    ordered.sort_by_key(|(metadata, _)| metadata.chunk_index);

    if let Some((metadata, _)) = ordered.first() {
        if metadata.total_chunks != ordered.len() {
            return Err(EtlError::Compression(format!(
                "expected {} chunks, got {}",
                metadata.total_chunks,
                ordered.len()
            )));
        }
    }
    for (position, (metadata, _)) in ordered.iter().enumerate() {
        if metadata.chunk_index != position {
            return Err(EtlError::Compression(format!(
                "expected chunk {position}, got chunk {}",
                metadata.chunk_index
            )));
        }
    }

    let mut items = Vec::new();
    for (_, chunk) in ordered {
        let part: Vec<T> = decompress_json(chunk)?;
        items.extend(part);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn sample_payload() -> Vec<u8> {
        "timestamp,level,message\n".repeat(200).into_bytes()
    }

    #[test]
    fn test_gzip_and_deflate() {
        let payload = sample_payload();
        for format in [CompressionFormat::Gzip, CompressionFormat::Deflate] {
            let compressed = compress(&payload, format).unwrap();
            assert_eq!(compressed.original_size, payload.len());
            assert_eq!(compressed.compressed_size, compressed.data.len());
            assert!(compressed.ratio() < 0.1, "{format}: {}", compressed.ratio());
            assert_eq!(decompress(&compressed).unwrap(), payload);
        }

        let gzip = compress(&payload, CompressionFormat::Gzip).unwrap();
        assert_eq!(&gzip.data[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_unsupported_formats() {
        for format in [CompressionFormat::Brotli, CompressionFormat::Lz4, CompressionFormat::Zstd] {
            assert!(!format.is_supported());
            let err = compress(b"data", format).unwrap_err();
            assert_eq!(
                err,
                EtlError::Compression(format!("unsupported compression format: {format}"))
            );
        }
        assert_eq!("GZ".parse::<CompressionFormat>().unwrap(), CompressionFormat::Gzip);
        assert!("rar".parse::<CompressionFormat>().is_err());
    }

    #[test]
    fn test_corrupt_input() {
        let mut compressed = compress(b"hello world", CompressionFormat::Gzip).unwrap();
        compressed.data = b"definitely not gzip".to_vec();
        assert_eq!(decompress(&compressed).unwrap_err().code(), "COMPRESSION_ERROR");
    }

    #[test]
    fn test_oversized_original_size_is_not_trusted() {
        let payload = sample_payload();
        let mut compressed = compress(&payload, CompressionFormat::Gzip).unwrap();
        compressed.original_size = usize::MAX;
        assert_eq!(decompress(&compressed).unwrap(), payload);

        compressed.data = b"definitely not gzip".to_vec();
        assert!(decompress(&compressed).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let record = json!({"id": 17, "tags": ["a", "b"], "nested": {"ok": true}});
        let compressed = compress_json(&record, CompressionFormat::Deflate).unwrap();
        let restored: Value = decompress_json(&compressed).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_dataset_chunks() {
        let rows: Vec<Value> = (0..10).map(|i| json!({"row": i})).collect();
        let mut chunks = compress_dataset(&rows, 4, CompressionFormat::Gzip).unwrap();

        let metadata: Vec<ChunkMetadata> = chunks.iter().map(|c| c.metadata.unwrap()).collect();
        assert_eq!(metadata.len(), 3);
        assert_eq!(
            metadata[2],
            ChunkMetadata {
                chunk_index: 2,
                total_chunks: 3,
                item_count: 2,
                start_index: 8,
                end_index: 10
            }
        );

        chunks.reverse();
        let restored: Vec<Value> = decompress_dataset(&chunks).unwrap();
        assert_eq!(restored, rows);

        let mut duplicated = compress_dataset(&rows[..8], 4, CompressionFormat::Gzip).unwrap();
        duplicated[1] = duplicated[0].clone();
        let err = decompress_dataset::<Value>(&duplicated).unwrap_err();
        assert_eq!(
            err,
            EtlError::Compression("expected chunk 1, got chunk 0".to_string())
        );

        chunks.pop();
        assert!(decompress_dataset::<Value>(&chunks).is_err());
        assert!(compress_dataset(&rows, 0, CompressionFormat::Gzip).is_err());
        assert!(compress_dataset::<Value>(&[], 4, CompressionFormat::Gzip).unwrap().is_empty());
    }
}
