use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use sokoni_core::domain::cart::CartLine;
use sokoni_core::domain::customer::CustomerId;
use sokoni_core::domain::product::ProductId;
use sokoni_core::stores::{CartStore, StoreError};

use super::{parse_decimal, parse_uuid, unavailable};
use crate::DbPool;

pub struct SqlCartRepository {
    pool: DbPool,
}

impl SqlCartRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for SqlCartRepository {
    async fn lines(&self, customer_id: &CustomerId) -> Result<Vec<CartLine>, StoreError> {
        let rows = sqlx::query(
            "SELECT product_id, product_name, size, quantity, unit_price \
             FROM cart_items WHERE customer_id = ?1 ORDER BY created_at",
        )
        .bind(customer_id.0.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in &rows {
            lines.push(CartLine {
                product_id: ProductId(parse_uuid(row, "product_id")?),
                product_name: row.get("product_name"),
                size: row.get("size"),
                quantity: row.get::<i64, _>("quantity") as u32,
                unit_price: parse_decimal(row, "unit_price")?,
            });
        }
        Ok(lines)
    }

    async fn add_line(&self, customer_id: &CustomerId, line: CartLine) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cart_items \
                 (id, customer_id, product_id, product_name, size, quantity, unit_price) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(customer_id, product_id, size) \
             DO UPDATE SET quantity = quantity + excluded.quantity",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(customer_id.0.to_string())
        .bind(line.product_id.0.to_string())
        .bind(&line.product_name)
        .bind(&line.size)
        .bind(line.quantity as i64)
        .bind(line.unit_price.to_string())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn remove_line(
        &self,
        customer_id: &CustomerId,
        product_id: &ProductId,
        size: &str,
    ) -> Result<(), StoreError> {
        let removed = sqlx::query(
            "DELETE FROM cart_items WHERE customer_id = ?1 AND product_id = ?2 AND size = ?3",
        )
        .bind(customer_id.0.to_string())
        .bind(product_id.0.to_string())
        .bind(size)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if removed.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "cart line for product {product_id:?} size {size}"
            )));
        }
        Ok(())
    }

    async fn clear(&self, customer_id: &CustomerId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_items WHERE customer_id = ?1")
            .bind(customer_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
