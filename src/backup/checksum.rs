//! Content digests for backup artifacts

use sha2::{Digest, Sha256};

use crate::models::{ObjectReference, ObjectType};

/// Hex characters kept from the SHA-256 digest for a backup id
const BACKUP_ID_LEN: usize = 16;

/// Deterministic id for a reference: same `type:database:schema:name`, same id.
/// The caller's `identifier` does not take part.
pub fn backup_id(reference: &ObjectReference) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}:{}:{}:{}",
            reference.object_type, reference.database_name, reference.schema_name, reference.name
        )
        .as_bytes(),
    );
    let digest = format!("{:x}", hasher.finalize());
    digest[..BACKUP_ID_LEN].to_string()
}

/// SHA-256 over `definition + object_type + object_name`.
///
/// Must stay a pure function of these three values; data checksums and
/// timestamps never feed into it.
pub fn compute_metadata_checksum(definition: &str, object_type: ObjectType, object_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(definition.as_bytes());
    hasher.update(object_type.as_str().as_bytes());
    hasher.update(object_name.as_bytes());
    format!("{:x}", hasher.finalize())
}
