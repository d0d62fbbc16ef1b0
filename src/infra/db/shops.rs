use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, ShopsRepo};
use crate::domain::entities::ShopRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ShopRow {
    id: i64,
    name: String,
    address: String,
    score: i32,
    updated_at: OffsetDateTime,
}

impl From<ShopRow> for ShopRecord {
    fn from(row: ShopRow) -> Self {
        Self {
            id: row.id as u64,
            name: row.name,
            address: row.address,
            score: row.score,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl ShopsRepo for PostgresRepositories {
    async fn find_by_id(&self, id: u64) -> Result<Option<ShopRecord>, RepoError> {
        let row = sqlx::query_as::<_, ShopRow>(
            "SELECT id, name, address, score, updated_at FROM shop WHERE id = $1",
        )
        .bind(id as i64)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ShopRecord::from))
    }

    async fn update(&self, shop: &ShopRecord) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE shop SET name = $2, address = $3, score = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(shop.id as i64)
        .bind(&shop.name)
        .bind(&shop.address)
        .bind(shop.score)
        .bind(shop.updated_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
