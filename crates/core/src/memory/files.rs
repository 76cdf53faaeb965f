use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreResult;
use crate::store::{FileStore, FileType, PieceRegistry};
use crate::types::DbId;

#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<(DbId, DbId, FileType), Vec<u8>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project_id: DbId, file_id: DbId, file_type: FileType, data: Vec<u8>) {
        self.files
            .write()
            .await
            .insert((project_id, file_id, file_type), data);
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn get_data(
        &self,
        project_id: DbId,
        file_id: DbId,
        file_type: FileType,
    ) -> CoreResult<Option<Vec<u8>>> {
        Ok(self
            .files
            .read()
            .await
            .get(&(project_id, file_id, file_type))
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPieceRegistry {
    versions: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryPieceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, piece_name: &str, version: &str) {
        self.versions
            .write()
            .await
            .entry(piece_name.to_string())
            .or_default()
            .push(version.to_string());
    }
}

#[async_trait]
impl PieceRegistry for InMemoryPieceRegistry {
    async fn versions(&self, piece_name: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .versions
            .read()
            .await
            .get(piece_name)
            .cloned()
            .unwrap_or_default())
    }
}
