use serde::{Deserialize, Serialize};

/// The name of the entry inside every snapshot that holds its [`SnapshotMetadata`].
pub const METADATA_ENTRY: &str = "backupdata.json";

/// Provenance record embedded inside a snapshot.
///
/// The timestamp is authoritative for ordering snapshots. It is written once when the archive is
/// created and is independent of the snapshot file's name or filesystem times, so a copied or
/// restored snapshot keeps its place.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMetadata {
    /// Milliseconds since the Unix epoch at the moment the archive was started.
    pub timestamp: i64,
}

impl SnapshotMetadata {
    /// Creates a record for the given millisecond timestamp.
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    /// Serializes the record into the bytes stored in the snapshot.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a record read from a snapshot.
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
