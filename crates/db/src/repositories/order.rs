use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use sokoni_core::domain::customer::CustomerId;
use sokoni_core::domain::order::{Order, OrderId, OrderStatus, PaymentState};
use sokoni_core::domain::tenant::TenantId;
use sokoni_core::stores::{OrderStore, StoreError};

use super::{decode_error, parse_decimal, parse_uuid, unavailable};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: &OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Confirmed => "confirmed",
        OrderStatus::Processing => "processing",
        OrderStatus::Shipped => "shipped",
        OrderStatus::Delivered => "delivered",
        OrderStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(value: &str) -> Result<OrderStatus, StoreError> {
    match value {
        "pending" => Ok(OrderStatus::Pending),
        "confirmed" => Ok(OrderStatus::Confirmed),
        "processing" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" => Ok(OrderStatus::Cancelled),
        other => Err(decode_error(format!("unknown order status `{other}`"))),
    }
}

fn payment_state_str(state: &PaymentState) -> &'static str {
    match state {
        PaymentState::Pending => "pending",
        PaymentState::Paid => "paid",
        PaymentState::Failed => "failed",
        PaymentState::Refunded => "refunded",
    }
}

fn payment_state_from_str(value: &str) -> Result<PaymentState, StoreError> {
    match value {
        "pending" => Ok(PaymentState::Pending),
        "paid" => Ok(PaymentState::Paid),
        "failed" => Ok(PaymentState::Failed),
        "refunded" => Ok(PaymentState::Refunded),
        other => Err(decode_error(format!("unknown payment state `{other}`"))),
    }
}

fn order_from_row(row: &SqliteRow) -> Result<Order, StoreError> {
    let lines_raw: String = row.get("lines");
    let created_raw: String = row.get("created_at");
    let created_at = created_raw
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(&created_raw, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
        .map_err(|error| decode_error(format!("column `created_at`: {error}")))?;

    Ok(Order {
        id: OrderId(parse_uuid(row, "id")?),
        tenant_id: TenantId(parse_uuid(row, "tenant_id")?),
        customer_id: CustomerId(parse_uuid(row, "customer_id")?),
        order_number: row.get("order_number"),
        lines: serde_json::from_str(&lines_raw)
            .map_err(|error| decode_error(format!("column `lines`: {error}")))?,
        subtotal: parse_decimal(row, "subtotal")?,
        delivery_fee: parse_decimal(row, "delivery_fee")?,
        total_amount: parse_decimal(row, "total_amount")?,
        delivery_address: row.get("delivery_address"),
        payment_state: payment_state_from_str(&row.get::<String, _>("payment_state"))?,
        status: status_from_str(&row.get::<String, _>("status"))?,
        payment_reference: row.get("payment_reference"),
        created_at,
    })
}

#[async_trait]
impl OrderStore for SqlOrderRepository {
    async fn create(&self, order: Order) -> Result<Order, StoreError> {
        let lines = serde_json::to_string(&order.lines)
            .map_err(|error| decode_error(format!("order lines: {error}")))?;

        sqlx::query(
            "INSERT INTO orders \
                 (id, tenant_id, customer_id, order_number, lines, subtotal, delivery_fee, \
                  total_amount, delivery_address, payment_state, status, payment_reference, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(order.id.0.to_string())
        .bind(order.tenant_id.0.to_string())
        .bind(order.customer_id.0.to_string())
        .bind(&order.order_number)
        .bind(lines)
        .bind(order.subtotal.to_string())
        .bind(order.delivery_fee.to_string())
        .bind(order.total_amount.to_string())
        .bind(&order.delivery_address)
        .bind(payment_state_str(&order.payment_state))
        .bind(status_str(&order.status))
        .bind(&order.payment_reference)
        .bind(order.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(order)
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?1")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_number(
        &self,
        customer_id: &CustomerId,
        order_number: &str,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT * FROM orders WHERE customer_id = ?1 AND order_number = ?2")
            .bind(customer_id.0.to_string())
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM orders WHERE customer_id = ?1 AND status = ?2 \
                     ORDER BY created_at DESC LIMIT ?3",
                )
                .bind(customer_id.0.to_string())
                .bind(status_str(&status))
                .bind(limit.max(1) as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM orders WHERE customer_id = ?1 \
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .bind(customer_id.0.to_string())
                .bind(limit.max(1) as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(unavailable)?;

        rows.iter().map(order_from_row).collect()
    }

    async fn update_payment_reference(
        &self,
        id: &OrderId,
        reference: &str,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE orders SET payment_reference = ?1 WHERE id = ?2")
            .bind(reference)
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {id:?}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use sokoni_core::domain::cart::CartLine;
    use sokoni_core::domain::customer::CustomerId;
    use sokoni_core::domain::order::{Order, OrderId, OrderStatus, PaymentState};
    use sokoni_core::domain::product::ProductId;
    use sokoni_core::domain::tenant::TenantId;
    use sokoni_core::stores::OrderStore;

    use super::SqlOrderRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn seeded_pool() -> (DbPool, TenantId, CustomerId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let tenant_id = TenantId(Uuid::new_v4());
        let customer_id = CustomerId(Uuid::new_v4());
        sqlx::query("INSERT INTO tenants (id, name, whatsapp_number) VALUES (?1, ?2, ?3)")
            .bind(tenant_id.0.to_string())
            .bind("Demo Boutique")
            .bind("whatsapp:+14155238886")
            .execute(&pool)
            .await
            .expect("tenant");
        sqlx::query("INSERT INTO customers (id, tenant_id, phone) VALUES (?1, ?2, ?3)")
            .bind(customer_id.0.to_string())
            .bind(tenant_id.0.to_string())
            .bind("+254712345678")
            .execute(&pool)
            .await
            .expect("customer");

        (pool, tenant_id, customer_id)
    }

    fn order_fixture(tenant_id: &TenantId, customer_id: &CustomerId, number: &str) -> Order {
        Order {
            id: OrderId(Uuid::new_v4()),
            tenant_id: tenant_id.clone(),
            customer_id: customer_id.clone(),
            order_number: number.to_string(),
            lines: vec![CartLine {
                product_id: ProductId(Uuid::new_v4()),
                product_name: "Red Maxi Dress".to_string(),
                size: "M".to_string(),
                quantity: 1,
                unit_price: Decimal::new(350_000, 2),
            }],
            subtotal: Decimal::new(350_000, 2),
            delivery_fee: Decimal::new(20_000, 2),
            total_amount: Decimal::new(370_000, 2),
            delivery_address: None,
            payment_state: PaymentState::Pending,
            status: OrderStatus::Pending,
            payment_reference: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn created_orders_round_trip_with_lines_and_totals() {
        let (pool, tenant_id, customer_id) = seeded_pool().await;
        let repo = SqlOrderRepository::new(pool);

        let order = order_fixture(&tenant_id, &customer_id, "ORD-1001");
        repo.create(order.clone()).await.expect("create");

        let found = repo.find_by_id(&order.id).await.expect("find").expect("present");
        assert_eq!(found.order_number, "ORD-1001");
        assert_eq!(found.lines.len(), 1);
        assert_eq!(found.total_amount, Decimal::new(370_000, 2));
        assert_eq!(found.payment_state, PaymentState::Pending);
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let (pool, tenant_id, customer_id) = seeded_pool().await;
        let repo = SqlOrderRepository::new(pool);

        let mut shipped = order_fixture(&tenant_id, &customer_id, "ORD-2001");
        shipped.status = OrderStatus::Shipped;
        repo.create(shipped).await.expect("create shipped");
        repo.create(order_fixture(&tenant_id, &customer_id, "ORD-2002")).await.expect("create");

        let pending = repo
            .list_for_customer(&customer_id, Some(OrderStatus::Pending), 10)
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order_number, "ORD-2002");

        let all = repo.list_for_customer(&customer_id, None, 10).await.expect("list all");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn payment_reference_update_requires_existing_order() {
        let (pool, tenant_id, customer_id) = seeded_pool().await;
        let repo = SqlOrderRepository::new(pool);

        let order = order_fixture(&tenant_id, &customer_id, "ORD-3001");
        repo.create(order.clone()).await.expect("create");

        repo.update_payment_reference(&order.id, "SAF-112233").await.expect("update");
        let found = repo.find_by_id(&order.id).await.expect("find").expect("present");
        assert_eq!(found.payment_reference.as_deref(), Some("SAF-112233"));

        let missing = OrderId(Uuid::new_v4());
        assert!(repo.update_payment_reference(&missing, "SAF-0").await.is_err());
    }
}
