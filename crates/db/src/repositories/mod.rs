use sqlx::Row;
use thiserror::Error;
use uuid::Uuid;

use sokoni_core::stores::StoreError;

pub mod cart;
pub mod catalog;
pub mod conversation;
pub mod customer;
pub mod memory;
pub mod order;

pub use cart::SqlCartRepository;
pub use catalog::SqlCatalogRepository;
pub use conversation::SqlCheckpointRepository;
pub use customer::{SqlCustomerRepository, SqlTenantRepository};
pub use memory::{
    InMemoryCartRepository, InMemoryCatalogRepository, InMemoryCheckpointRepository,
    InMemoryCustomerRepository, InMemoryOrderRepository, InMemoryTenantRepository,
};
pub use order::SqlOrderRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

pub(crate) fn unavailable(error: sqlx::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

pub(crate) fn decode_error(message: impl Into<String>) -> StoreError {
    StoreError::Decode(message.into())
}

pub(crate) fn parse_uuid(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Uuid, StoreError> {
    let raw: String = row.get(column);
    Uuid::parse_str(&raw).map_err(|error| decode_error(format!("column `{column}`: {error}")))
}

pub(crate) fn parse_decimal(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<rust_decimal::Decimal, StoreError> {
    let raw: String = row.get(column);
    raw.parse().map_err(|error| decode_error(format!("column `{column}`: {error}")))
}

pub(crate) fn parse_json_list(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Vec<String>, StoreError> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).map_err(|error| decode_error(format!("column `{column}`: {error}")))
}
