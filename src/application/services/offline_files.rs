use crate::application::ports::PersistentStore;
use crate::domain::entities::{FileAssociation, OfflineFileRecord, UploadFile};
use crate::domain::value_objects::OfflineFileId;
use crate::shared::error::AppError;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stages binary payloads in the generic data namespace until their upload
/// has been confirmed.
#[derive(Clone)]
pub struct OfflineFileStore {
    store: Arc<dyn PersistentStore>,
}

impl OfflineFileStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    pub async fn store_file_offline(
        &self,
        file: UploadFile,
        association: FileAssociation,
    ) -> Result<OfflineFileId, AppError> {
        if !self.store.is_available().await {
            // A staged file that silently vanished would strand its queue item.
            return Err(AppError::StorageUnavailable(format!(
                "cannot stage {}",
                file.file_name
            )));
        }

        let id = OfflineFileId::generate();
        let record = OfflineFileRecord {
            id: id.clone(),
            size: file.size(),
            bytes: file.bytes,
            file_name: file.file_name,
            mime_type: file.mime_type,
            association,
            timestamp: Utc::now().timestamp_millis(),
        };

        self.store
            .set_data(&id.storage_key(), serde_json::to_value(&record)?)
            .await?;
        debug!(file_id = %id, size = record.size, "staged file offline");
        Ok(id)
    }

    pub async fn get_offline_file(&self, id: &OfflineFileId) -> Option<OfflineFileRecord> {
        let value = self.store.get_data(&id.storage_key()).await?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(file_id = %id, error = %err, "unreadable offline file record");
                None
            }
        }
    }

    /// Rebuild an uploadable file from a staged record.
    pub fn to_upload_file(record: &OfflineFileRecord) -> UploadFile {
        UploadFile::new(
            record.file_name.clone(),
            record.mime_type.clone(),
            record.bytes.clone(),
        )
    }

    /// Only called once the upload referencing this file got a 2xx.
    pub async fn delete_offline_file(&self, id: &OfflineFileId) -> Result<(), AppError> {
        self.store.delete_data(&id.storage_key()).await?;
        debug!(file_id = %id, "deleted offline file");
        Ok(())
    }

    pub async fn list_offline_files(&self) -> Vec<OfflineFileRecord> {
        let mut records = Vec::new();
        for key in self.store.keys_with_prefix(OfflineFileId::KEY_PREFIX).await {
            let Some(id) = key
                .strip_prefix(OfflineFileId::KEY_PREFIX)
                .and_then(|raw| OfflineFileId::new(raw.to_string()).ok())
            else {
                continue;
            };
            if let Some(record) = self.get_offline_file(&id).await {
                records.push(record);
            }
        }
        records.sort_by_key(|record| record.timestamp);
        records
    }
}
