//! Repository for the `piece_versions` catalogue.

use sqlx::PgPool;

pub struct PieceRepo;

impl PieceRepo {
    pub async fn versions(pool: &PgPool, name: &str) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT version FROM piece_versions WHERE name = $1 ORDER BY created_at ASC",
        )
        .bind(name)
        .fetch_all(pool)
        .await
    }
}
