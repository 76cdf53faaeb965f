//! Repository for the `files` table.

use flowline_core::store::FileType;
use flowline_core::types::DbId;
use sqlx::PgPool;

pub struct FileRepo;

impl FileRepo {
    /// Files are only visible to the project that owns them.
    pub async fn get_data(
        pool: &PgPool,
        project_id: DbId,
        file_id: DbId,
        file_type: FileType,
    ) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT data FROM files WHERE id = $1 AND file_type = $2 AND project_id = $3",
        )
        .bind(file_id)
        .bind(file_type.as_str())
        .bind(project_id)
        .fetch_optional(pool)
        .await
    }
}
