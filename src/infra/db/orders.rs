use async_trait::async_trait;

use crate::application::repos::{OrdersRepo, RepoError};
use crate::domain::entities::VoucherOrderRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl OrdersRepo for PostgresRepositories {
    async fn count_for_user_and_voucher(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<u64, RepoError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM voucher_order WHERE user_id = $1 AND voucher_id = $2",
        )
        .bind(user_id as i64)
        .bind(voucher_id as i64)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(count as u64)
    }

    async fn insert_if_absent(&self, order: &VoucherOrderRecord) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "INSERT INTO voucher_order (id, user_id, voucher_id, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, voucher_id) DO NOTHING",
        )
        .bind(order.id as i64)
        .bind(order.user_id as i64)
        .bind(order.voucher_id as i64)
        .bind(order.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}
