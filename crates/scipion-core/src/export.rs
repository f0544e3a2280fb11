//! # Canonical Export Module
//!
//! SQLite files are not bit-identical across runs (page layout, WAL state,
//! free lists). The canonical export is: every `Objects` and `Relations` row,
//! sorted by id, serialized to a `postcard` stream behind a small header.
//! Two stores with the same rows always export the same bytes.
//!
//! Format:
//! ```text
//! [header_len: u32 LE] [CanonicalHeader (postcard)] [CanonicalStore (postcard)]
//! ```

use crate::mapper::{ObjectRow, RelationRow};
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use crate::{ScipionError, SqliteMapper};
use serde::{Deserialize, Serialize};

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Maximum object rows accepted by an import.
pub const MAX_IMPORT_OBJECT_COUNT: u64 = 10_000_000;

/// Maximum relation rows accepted by an import.
pub const MAX_IMPORT_RELATION_COUNT: u64 = 10_000_000;

/// Header of a canonical export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub object_count: u64,
    pub relation_count: u64,
    /// Checksum of the data section.
    pub checksum: u64,
}

impl CanonicalHeader {
    #[must_use]
    pub fn new(object_count: u64, relation_count: u64, checksum: u64) -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
            object_count,
            relation_count,
            checksum,
        }
    }

    /// Check magic and version.
    ///
    /// Messages stay generic and do not echo the offending bytes.
    pub fn validate(&self) -> Result<(), ScipionError> {
        if &self.magic != MAGIC_BYTES {
            return Err(ScipionError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(ScipionError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

/// Every row of a store, sorted by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalStore {
    pub objects: Vec<ObjectRow>,
    pub relations: Vec<RelationRow>,
}

impl CanonicalStore {
    /// Snapshot the rows of `mapper`.
    pub fn from_mapper(mapper: &SqliteMapper) -> Result<Self, ScipionError> {
        let (mut objects, mut relations) = mapper.dump_rows()?;
        objects.sort_by_key(|row| row.id);
        relations.sort_by_key(|row| row.id);
        Ok(Self { objects, relations })
    }

    /// Deterministic checksum of the rows.
    ///
    /// Not a cryptographic hash: it detects corruption, not tampering. Use
    /// the `crypto-hash` feature for a BLAKE3 digest of the export.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0;
        for row in &self.objects {
            hash = mix_i64(hash, row.id);
            hash = mix_opt_i64(hash, row.parent_id);
            hash = mix_str(hash, Some(&row.name));
            hash = mix_str(hash, Some(&row.classname));
            hash = mix_str(hash, row.value.as_deref());
            hash = mix_str(hash, row.label.as_deref());
            hash = mix_str(hash, row.comment.as_deref());
            hash = mix_str(hash, row.creation.as_deref());
        }
        for rel in &self.relations {
            hash = mix_i64(hash, rel.id);
            hash = mix_opt_i64(hash, rel.creator);
            hash = mix_str(hash, Some(&rel.name));
            hash = mix_str(hash, rel.classname.as_deref());
            hash = mix_opt_i64(hash, rel.parent);
            hash = mix_opt_i64(hash, rel.child);
            hash = mix_str(hash, rel.creation.as_deref());
            hash = mix_str(hash, rel.parent_extended.as_deref());
            hash = mix_str(hash, rel.child_extended.as_deref());
        }
        hash
    }
}

fn mix_i64(hash: u64, value: i64) -> u64 {
    hash.rotate_left(13) ^ (value as u64)
}

fn mix_opt_i64(hash: u64, value: Option<i64>) -> u64 {
    match value {
        Some(v) => mix_i64(hash.rotate_left(3) ^ 1, v),
        None => hash.rotate_left(3),
    }
}

fn mix_str(hash: u64, value: Option<&str>) -> u64 {
    let Some(text) = value else {
        return hash.rotate_left(7);
    };
    let mut hash = hash.rotate_left(7) ^ 1;
    for byte in text.as_bytes() {
        hash = hash.rotate_left(5) ^ u64::from(*byte);
    }
    hash.rotate_left(11) ^ (text.len() as u64)
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export the rows of `mapper` in canonical form.
pub fn export_canonical(mapper: &SqliteMapper) -> Result<Vec<u8>, ScipionError> {
    encode(&CanonicalStore::from_mapper(mapper)?)
}

fn encode(store: &CanonicalStore) -> Result<Vec<u8>, ScipionError> {
    let header = CanonicalHeader::new(
        store.objects.len() as u64,
        store.relations.len() as u64,
        store.checksum(),
    );
    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| ScipionError::SerializationError(format!("Header: {}", e)))?;
    let data_bytes = postcard::to_allocvec(store)
        .map_err(|e| ScipionError::SerializationError(format!("Data: {}", e)))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Decode and validate a canonical export.
pub fn import_canonical(data: &[u8]) -> Result<CanonicalStore, ScipionError> {
    let (len_bytes, rest) = data
        .split_first_chunk::<4>()
        .ok_or_else(|| ScipionError::SerializationError("Data too short".to_string()))?;
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(ScipionError::SerializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, body) = rest.split_at(header_len);

    let header: CanonicalHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| ScipionError::SerializationError(format!("Header: {}", e)))?;
    header.validate()?;

    if header.object_count > MAX_IMPORT_OBJECT_COUNT {
        return Err(ScipionError::SerializationError(format!(
            "Object count {} exceeds maximum allowed {}",
            header.object_count, MAX_IMPORT_OBJECT_COUNT
        )));
    }
    if header.relation_count > MAX_IMPORT_RELATION_COUNT {
        return Err(ScipionError::SerializationError(format!(
            "Relation count {} exceeds maximum allowed {}",
            header.relation_count, MAX_IMPORT_RELATION_COUNT
        )));
    }

    let store: CanonicalStore = postcard::from_bytes(body)
        .map_err(|e| ScipionError::SerializationError(format!("Data: {}", e)))?;

    let computed = store.checksum();
    if computed != header.checksum {
        return Err(ScipionError::SerializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }
    if store.objects.len() as u64 != header.object_count {
        return Err(ScipionError::SerializationError(
            "Object count mismatch".to_string(),
        ));
    }
    if store.relations.len() as u64 != header.relation_count {
        return Err(ScipionError::SerializationError(
            "Relation count mismatch".to_string(),
        ));
    }
    Ok(store)
}

/// Import an export into an empty store, keeping every id.
///
/// Returns the number of object rows restored.
pub fn restore_canonical(mapper: &mut SqliteMapper, data: &[u8]) -> Result<usize, ScipionError> {
    let store = import_canonical(data)?;
    mapper.restore_rows(&store.objects, &store.relations)?;
    Ok(store.objects.len())
}

/// Whether `mapper` currently exports exactly `data`'s rows.
pub fn verify_canonical(mapper: &SqliteMapper, data: &[u8]) -> Result<bool, ScipionError> {
    let imported = import_canonical(data)?;
    Ok(CanonicalStore::from_mapper(mapper)? == imported)
}

/// Checksum of the canonical rows of `mapper`.
pub fn canonical_checksum(mapper: &SqliteMapper) -> Result<u64, ScipionError> {
    Ok(CanonicalStore::from_mapper(mapper)?.checksum())
}

/// BLAKE3 digest (hex) of the canonical export of `mapper`.
#[cfg(feature = "crypto-hash")]
pub fn canonical_crypto_hash(mapper: &SqliteMapper) -> Result<String, ScipionError> {
    let data = export_canonical(mapper)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
