use crate::domain::value_objects::OfflineFileId;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Ids of the entities a staged file belongs to (e.g. `expense_id`).
pub type FileAssociation = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineFileRecord {
    pub id: OfflineFileId,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub association: FileAssociation,
    pub timestamp: i64,
}

/// A file in the shape the transport uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// How a staged file is sent: the multipart field carrying the file and
/// the extra text fields sent alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub field_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Default for UploadMetadata {
    fn default() -> Self {
        Self {
            field_name: "file".to_string(),
            fields: BTreeMap::new(),
        }
    }
}

impl UploadMetadata {
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Body of a queue item whose payload lives in the offline file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub file_id: OfflineFileId,
    pub field_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl FileReference {
    pub const KIND: &'static str = "offline_file";

    pub fn new(file_id: OfflineFileId, metadata: UploadMetadata) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            file_id,
            field_name: metadata.field_name,
            fields: metadata.fields,
        }
    }

    /// Parse a queue body; anything that is not a tagged file reference is `None`.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<FileReference>(body)
            .ok()
            .filter(|reference| reference.kind == Self::KIND)
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
