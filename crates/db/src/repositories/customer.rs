use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use sokoni_core::domain::customer::{Customer, CustomerId};
use sokoni_core::domain::tenant::{Tenant, TenantId};
use sokoni_core::stores::{CustomerStore, StoreError, TenantStore};

use super::{parse_uuid, unavailable};
use crate::DbPool;

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStore for SqlTenantRepository {
    async fn find_by_whatsapp_number(&self, number: &str) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query("SELECT * FROM tenants WHERE whatsapp_number = ?1 AND active = 1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Tenant {
            id: TenantId(parse_uuid(&row, "id")?),
            name: row.get("name"),
            whatsapp_number: row.get("whatsapp_number"),
            currency: row.get("currency"),
            active: row.get::<i64, _>("active") != 0,
        }))
    }
}

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer, StoreError> {
    Ok(Customer {
        id: CustomerId(parse_uuid(row, "id")?),
        tenant_id: TenantId(parse_uuid(row, "tenant_id")?),
        phone: row.get("phone"),
        name: row.get("name"),
        preferred_size: row.get("preferred_size"),
        delivery_address: row.get("delivery_address"),
    })
}

#[async_trait]
impl CustomerStore for SqlCustomerRepository {
    async fn find_by_phone(
        &self,
        tenant_id: &TenantId,
        phone: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query("SELECT * FROM customers WHERE tenant_id = ?1 AND phone = ?2")
            .bind(tenant_id.0.to_string())
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(customer_from_row).transpose()
    }

    async fn get_or_create(
        &self,
        tenant_id: &TenantId,
        phone: &str,
    ) -> Result<Customer, StoreError> {
        if let Some(existing) = self.find_by_phone(tenant_id, phone).await? {
            return Ok(existing);
        }

        // Insert may race with another turn for the same new customer;
        // the unique index makes the second insert a no-op.
        sqlx::query(
            "INSERT INTO customers (id, tenant_id, phone) VALUES (?1, ?2, ?3) \
             ON CONFLICT(tenant_id, phone) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id.0.to_string())
        .bind(phone)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        self.find_by_phone(tenant_id, phone)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("customer {phone}")))
    }
}
