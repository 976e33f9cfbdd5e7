//! Binary cache files for simulation frames, agent variations and cloth.
//!
//! Every file is a fixed header followed by one Zstd-compressed bincode
//! payload:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ FIXED HEADER (16 bytes)                                      │
//! │  [0..4]   Magic: b"ACRD" | b"AVAR" | b"ACLT"                 │
//! │  [4..6]   Version: u16 (major << 8 | minor)                  │
//! │  [6..8]   Flags: u16 (reserved)                              │
//! │  [8..16]  Uncompressed payload size: u64                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ PAYLOAD (Zstd compressed bincode)                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `File*Source` types serve a file through the source traits. A file
//! that cannot be read reports [`SourceError::Unavailable`], so readers fall
//! back to empty results.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::agent::AgentRecord;
use crate::cloth::{ClothCache, ClothFrameSource, ClothFrames};
use crate::library::{VariationParts, VariationSet, VariationSource};
use crate::source::{FrameCache, SimulationSource, SourceError};

// ============================================================================
// Constants
// ============================================================================

/// Simulation frame cache.
pub const CROWD_MAGIC: [u8; 4] = *b"ACRD";
/// Agent variation set.
pub const VARIATION_MAGIC: [u8; 4] = *b"AVAR";
/// Cloth frame cache.
pub const CLOTH_MAGIC: [u8; 4] = *b"ACLT";

/// Current format version (major.minor encoded as single u16)
pub const VERSION: u16 = 0x0001; // 0.1

pub const HEADER_SIZE: usize = 16;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Invalid magic number: expected {expected:?}, found {found:?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("Unsupported version: {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("Payload size mismatch: header says {expected} bytes, got {actual}")]
    PayloadSizeMismatch { expected: u64, actual: u64 },

    #[error("Compression error: {0}")]
    CompressionError(String),

    #[error("Decompression error: {0}")]
    DecompressionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// ============================================================================
// File Header
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// Reserved
    pub flags: u16,
    pub payload_size: u64,
}

impl FileHeader {
    pub fn new(magic: [u8; 4], payload_size: u64) -> Self {
        Self {
            magic,
            version: VERSION,
            flags: 0,
            payload_size,
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), FormatError> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.payload_size.to_le_bytes())?;
        Ok(())
    }

    /// Reads a header and checks it against `expected` magic.
    pub fn read<R: Read>(reader: &mut R, expected: [u8; 4]) -> Result<Self, FormatError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != expected {
            return Err(FormatError::InvalidMagic { expected, found: magic });
        }

        let mut version_bytes = [0u8; 2];
        reader.read_exact(&mut version_bytes)?;
        let version = u16::from_le_bytes(version_bytes);

        // Only 0.1 so far
        let major = (version >> 8) as u8;
        let minor = (version & 0xFF) as u8;
        if major > 0 || minor > 1 {
            return Err(FormatError::UnsupportedVersion(major, minor));
        }

        let mut flags_bytes = [0u8; 2];
        reader.read_exact(&mut flags_bytes)?;
        let flags = u16::from_le_bytes(flags_bytes);

        let mut size_bytes = [0u8; 8];
        reader.read_exact(&mut size_bytes)?;
        let payload_size = u64::from_le_bytes(size_bytes);

        Ok(Self {
            magic,
            version,
            flags,
            payload_size,
        })
    }
}

// ============================================================================
// Compression
// ============================================================================

/// Compress data using Zstd with the specified compression level.
pub fn compress_with_level(data: &[u8], level: i32) -> Result<Vec<u8>, FormatError> {
    zstd::encode_all(Cursor::new(data), level)
        .map_err(|e| FormatError::CompressionError(e.to_string()))
}

/// Compress data using Zstd with default compression level (3).
pub fn compress(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    compress_with_level(data, 3)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    zstd::decode_all(Cursor::new(data))
        .map_err(|e| FormatError::DecompressionError(e.to_string()))
}

// ============================================================================
// Encoding
// ============================================================================

pub fn to_bytes<T: Serialize>(magic: [u8; 4], data: &T) -> Result<Vec<u8>, FormatError> {
    let uncompressed = bincode::serialize(data)
        .map_err(|e| FormatError::SerializationError(e.to_string()))?;
    let compressed = compress(&uncompressed)?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + compressed.len());
    FileHeader::new(magic, uncompressed.len() as u64).write(&mut bytes)?;
    bytes.extend_from_slice(&compressed);
    Ok(bytes)
}

pub fn from_bytes<T: DeserializeOwned>(magic: [u8; 4], bytes: &[u8]) -> Result<T, FormatError> {
    let mut cursor = Cursor::new(bytes);
    let header = FileHeader::read(&mut cursor, magic)?;

    let uncompressed = decompress(&bytes[HEADER_SIZE..])?;
    if uncompressed.len() as u64 != header.payload_size {
        return Err(FormatError::PayloadSizeMismatch {
            expected: header.payload_size,
            actual: uncompressed.len() as u64,
        });
    }
    bincode::deserialize(&uncompressed).map_err(|e| FormatError::DeserializationError(e.to_string()))
}

pub fn save<T: Serialize>(magic: [u8; 4], data: &T, path: impl AsRef<Path>) -> Result<(), FormatError> {
    let bytes = to_bytes(magic, data)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load<T: DeserializeOwned>(magic: [u8; 4], path: impl AsRef<Path>) -> Result<T, FormatError> {
    let bytes = std::fs::read(path)?;
    from_bytes(magic, &bytes)
}

impl FrameCache {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        save(CROWD_MAGIC, self, path)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        load(CROWD_MAGIC, path)
    }
}

impl VariationSet {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        save(VARIATION_MAGIC, self, path)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        load(VARIATION_MAGIC, path)
    }
}

impl ClothFrames {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), FormatError> {
        save(CLOTH_MAGIC, self, path)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        load(CLOTH_MAGIC, path)
    }
}

// ============================================================================
// File Sources
// ============================================================================

/// A cache file decoded on demand. The file is re-read on every access and
/// decoded again only when its bytes change.
struct CachedFile<T> {
    path: PathBuf,
    magic: [u8; 4],
    decoded: Mutex<Option<(u64, Arc<T>)>>,
}

impl<T: DeserializeOwned> CachedFile<T> {
    fn new(path: PathBuf, magic: [u8; 4]) -> Self {
        Self {
            path,
            magic,
            decoded: Mutex::new(None),
        }
    }

    fn read_bytes(&self) -> Result<Vec<u8>, SourceError> {
        std::fs::read(&self.path)
            .map_err(|err| SourceError::Unavailable(format!("{}: {}", self.path.display(), err)))
    }

    fn hash_bytes(bytes: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        hasher.finish()
    }

    fn content_hash(&self) -> u64 {
        self.read_bytes().map(|bytes| Self::hash_bytes(&bytes)).unwrap_or(0)
    }

    fn get(&self) -> Result<Arc<T>, SourceError> {
        let bytes = self.read_bytes()?;
        let hash = Self::hash_bytes(&bytes);

        let mut decoded = self.decoded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached_hash, data)) = decoded.as_ref() {
            if *cached_hash == hash {
                return Ok(Arc::clone(data));
            }
        }
        log::debug!("Decoding {}", self.path.display());
        let data = Arc::new(from_bytes::<T>(self.magic, &bytes)?);
        *decoded = Some((hash, Arc::clone(&data)));
        Ok(data)
    }
}

/// Serves a `.acrd` simulation cache.
pub struct FileSimulationSource {
    file: CachedFile<FrameCache>,
}

impl FileSimulationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: CachedFile::new(path.into(), CROWD_MAGIC),
        }
    }
}

impl SimulationSource for FileSimulationSource {
    fn frame_range(&self) -> Result<Option<(i64, i64)>, SourceError> {
        self.file.get()?.frame_range()
    }

    fn records_at(&self, frame: i64) -> Result<Vec<AgentRecord>, SourceError> {
        self.file.get()?.records_at(frame)
    }
}

/// Serves a `.avar` variation set. The content hash covers the file bytes,
/// so rewriting the file invalidates library caches on the next refresh.
pub struct FileVariationSource {
    file: CachedFile<VariationSet>,
}

impl FileVariationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: CachedFile::new(path.into(), VARIATION_MAGIC),
        }
    }
}

impl VariationSource for FileVariationSource {
    fn agent_types(&self) -> Result<Vec<String>, SourceError> {
        self.file.get()?.agent_types()
    }

    fn variations(&self, agent_type: &str) -> Result<Vec<String>, SourceError> {
        self.file.get()?.variations(agent_type)
    }

    fn load(&self, agent_type: &str, variation: &str) -> Result<Option<VariationParts>, SourceError> {
        self.file.get()?.load(agent_type, variation)
    }

    fn content_hash(&self) -> u64 {
        self.file.content_hash()
    }
}

/// Serves a `.aclt` cloth cache.
pub struct FileClothSource {
    file: CachedFile<ClothFrames>,
}

impl FileClothSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: CachedFile::new(path.into(), CLOTH_MAGIC),
        }
    }
}

impl ClothFrameSource for FileClothSource {
    fn frame_range(&self) -> Result<Option<(i64, i64)>, SourceError> {
        self.file.get()?.frame_range()
    }

    fn frame(&self, frame: i64) -> Result<ClothCache, SourceError> {
        self.file.get()?.frame(frame)
    }
}

// ============================================================================
// Tests
// ============================================================================
