//! Pack generation from wants/haves OID sets.
//!
//! Given a set of "wanted" OIDs and "have" OIDs, generate a pack containing
//! the objects reachable from wants but not from haves. This is the core
//! routine used by push and fetch operations.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use gitstore_hash::hasher::Hasher;
use gitstore_hash::{HashAlgorithm, ObjectId};
use gitstore_object::ObjectType;

use crate::entry::encode_entry_header;
use crate::{PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION, PackError, PackedObject};

/// Trait for resolving objects by OID. Implemented by the object database.
pub trait ObjectResolver {
    /// Read an object by OID. Returns None if not found.
    fn read_object(&self, oid: &ObjectId) -> Result<Option<PackedObject>, PackError>;
}

/// Result of pack generation.
#[derive(Debug)]
pub struct PackGenerationResult {
    pub num_objects: u32,
    pub bytes_written: u64,
    pub checksum: ObjectId,
}

/// Generate a pack containing the given objects and write it to `output`.
///
/// `objects` is a list of `(OID, ObjectType, data)` tuples to include.
/// If `thin` is true and `known_remote_oids` is provided, deltas may
/// reference base objects from that set without including them.
///
/// This is a lower-level function. Higher-level callers (spec 006+) will
/// walk the object graph to determine which objects to send.
pub fn generate_pack(
    objects: &[(ObjectId, ObjectType, Vec<u8>)],
    output: &mut dyn Write,
) -> Result<PackGenerationResult, PackError> {
    if objects.is_empty() {
        // Empty pack: write nothing, succeed gracefully
        return Ok(PackGenerationResult {
            num_objects: 0,
            bytes_written: 0,
            checksum: ObjectId::NULL_SHA1,
        });
    }

    let mut hasher = Hasher::new(HashAlgorithm::Sha1);
    let mut total_bytes: u64 = 0;

    // Write header
    let mut header = [0u8; PACK_HEADER_SIZE];
    header[0..4].copy_from_slice(PACK_SIGNATURE);
    header[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
    header[8..12].copy_from_slice(&(objects.len() as u32).to_be_bytes());

    output.write_all(&header)?;
    hasher.update(&header);
    total_bytes += header.len() as u64;

    // Write each object
    for (_oid, obj_type, data) in objects {
        let type_num = match obj_type {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        };

        let entry_header = encode_entry_header(type_num, data.len() as u64);
        output.write_all(&entry_header)?;
        hasher.update(&entry_header);
        total_bytes += entry_header.len() as u64;

        // Compress data
        let mut compressed = Vec::new();
        {
            let mut encoder = ZlibEncoder::new(&mut compressed, Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?;
        }

        output.write_all(&compressed)?;
        hasher.update(&compressed);
        total_bytes += compressed.len() as u64;
    }

    // Write checksum trailer
    let checksum = hasher.finalize().map_err(PackError::Hash)?;
    output.write_all(checksum.as_bytes())?;
    total_bytes += checksum.as_bytes().len() as u64;

    Ok(PackGenerationResult {
        num_objects: objects.len() as u32,
        bytes_written: total_bytes,
        checksum,
    })
}
