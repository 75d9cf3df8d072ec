use sqlx::Executor;
use sqlx::Row;

use crate::repositories::RepositoryError;
use crate::DbPool;

pub const SEED_TENANT_ID: &str = "11111111-1111-4111-8111-111111111111";
pub const SEED_TENANT_NUMBER: &str = "whatsapp:+14155238886";
pub const SEED_CUSTOMER_PHONE: &str = "+254712345678";

const SEED_PRODUCT_NAMES: &[&str] =
    &["Red Maxi Dress", "Cotton Sundress", "Blue Denim Jacket", "Ankara Clutch"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub tenants: u32,
    pub customers: u32,
    pub products: u32,
}

/// Deterministic demo dataset loaded by `sokoni seed` and the
/// integration tests.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Self::verify(pool).await
    }

    /// Confirms the dataset landed with the shape the tests rely on.
    pub async fn verify(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let tenants = count(pool, "SELECT COUNT(*) AS count FROM tenants WHERE id = ?1", Some(SEED_TENANT_ID)).await?;
        if tenants != 1 {
            return Err(RepositoryError::Decode("seed tenant missing".to_string()));
        }

        let customers =
            count(pool, "SELECT COUNT(*) AS count FROM customers WHERE tenant_id = ?1", Some(SEED_TENANT_ID)).await?;
        if customers < 2 {
            return Err(RepositoryError::Decode("seed customers missing".to_string()));
        }

        let products =
            count(pool, "SELECT COUNT(*) AS count FROM products WHERE tenant_id = ?1", Some(SEED_TENANT_ID)).await?;
        if products as usize != SEED_PRODUCT_NAMES.len() {
            return Err(RepositoryError::Decode(format!(
                "expected {} seed products, found {products}",
                SEED_PRODUCT_NAMES.len()
            )));
        }

        Ok(SeedResult { tenants, customers, products })
    }
}

async fn count(pool: &DbPool, sql: &str, bind: Option<&str>) -> Result<u32, RepositoryError> {
    let query = match bind {
        Some(value) => sqlx::query(sql).bind(value),
        None => sqlx::query(sql),
    };
    let row = query.fetch_one(pool).await?;
    Ok(row.get::<i64, _>("count") as u32)
}
