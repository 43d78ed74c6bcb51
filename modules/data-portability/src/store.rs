use async_trait::async_trait;
use mutation_kernel::StoreError;
use tokio::sync::Mutex;

use crate::models::ExportRequest;

#[async_trait]
pub trait ExportStore: Send + Sync {
    async fn insert(&self, export: ExportRequest) -> Result<(), StoreError>;

    async fn get(&self, request_id: &str) -> Result<Option<ExportRequest>, StoreError>;

    /// Exports for a user, oldest first
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ExportRequest>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryExportStore {
    exports: Mutex<Vec<ExportRequest>>,
}

impl InMemoryExportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExportStore for InMemoryExportStore {
    async fn insert(&self, export: ExportRequest) -> Result<(), StoreError> {
        let mut exports = self.exports.lock().await;
        if exports.iter().any(|e| e.request_id == export.request_id) {
            return Err(StoreError::Conflict(format!(
                "export '{}' already exists",
                export.request_id
            )));
        }
        exports.push(export);
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<ExportRequest>, StoreError> {
        let exports = self.exports.lock().await;
        Ok(exports.iter().find(|e| e.request_id == request_id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ExportRequest>, StoreError> {
        let exports = self.exports.lock().await;
        Ok(exports
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.exports.lock().await.len())
    }
}
