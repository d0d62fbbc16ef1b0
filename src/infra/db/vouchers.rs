use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, VouchersRepo};
use crate::domain::entities::FlashSaleVoucherRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct VoucherRow {
    id: i64,
    shop_id: i64,
    title: String,
    stock: i32,
    begin_time: OffsetDateTime,
    end_time: OffsetDateTime,
}

impl From<VoucherRow> for FlashSaleVoucherRecord {
    fn from(row: VoucherRow) -> Self {
        Self {
            id: row.id as u64,
            shop_id: row.shop_id as u64,
            title: row.title,
            stock: row.stock,
            begin_time: row.begin_time,
            end_time: row.end_time,
        }
    }
}

#[async_trait]
impl VouchersRepo for PostgresRepositories {
    async fn find_by_id(&self, id: u64) -> Result<Option<FlashSaleVoucherRecord>, RepoError> {
        let row = sqlx::query_as::<_, VoucherRow>(
            "SELECT id, shop_id, title, stock, begin_time, end_time \
             FROM flash_sale_voucher WHERE id = $1",
        )
        .bind(id as i64)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(FlashSaleVoucherRecord::from))
    }

    async fn insert(&self, voucher: &FlashSaleVoucherRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO flash_sale_voucher (id, shop_id, title, stock, begin_time, end_time) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(voucher.id as i64)
        .bind(voucher.shop_id as i64)
        .bind(&voucher.title)
        .bind(voucher.stock)
        .bind(voucher.begin_time)
        .bind(voucher.end_time)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn decrement_stock(&self, voucher_id: u64) -> Result<bool, RepoError> {
        // The predicate keeps the column non-negative under any concurrency.
        let result = sqlx::query(
            "UPDATE flash_sale_voucher SET stock = stock - 1 WHERE id = $1 AND stock > 0",
        )
        .bind(voucher_id as i64)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}
