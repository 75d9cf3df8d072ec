//! Collaborator contracts for the relational store. The orchestration
//! engine only ever sees these traits; SQL and in-memory implementations
//! live in `sokoni-db`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::cart::CartLine;
use crate::domain::conversation::{ConversationState, MessageRole, ThreadKey};
use crate::domain::customer::{Customer, CustomerId};
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::product::{Product, ProductId};
use crate::domain::tenant::{Tenant, TenantId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("checkpoint conflict: expected turn {expected}, found {found}")]
    CheckpointConflict { expected: u32, found: u32 },
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CatalogQuery {
    pub text: String,
    pub category: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub limit: u32,
}

impl CatalogQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), category: None, min_price: None, max_price: None, limit: 5 }
    }
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_whatsapp_number(&self, number: &str) -> Result<Option<Tenant>, StoreError>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_by_phone(
        &self,
        tenant_id: &TenantId,
        phone: &str,
    ) -> Result<Option<Customer>, StoreError>;

    async fn get_or_create(
        &self,
        tenant_id: &TenantId,
        phone: &str,
    ) -> Result<Customer, StoreError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn search(
        &self,
        tenant_id: &TenantId,
        query: &CatalogQuery,
    ) -> Result<Vec<Product>, StoreError>;

    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, StoreError>;

    async fn available_stock(&self, id: &ProductId, size: &str) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn lines(&self, customer_id: &CustomerId) -> Result<Vec<CartLine>, StoreError>;

    async fn add_line(&self, customer_id: &CustomerId, line: CartLine) -> Result<(), StoreError>;

    async fn remove_line(
        &self,
        customer_id: &CustomerId,
        product_id: &ProductId,
        size: &str,
    ) -> Result<(), StoreError>;

    async fn clear(&self, customer_id: &CustomerId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order, StoreError>;

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    async fn find_by_number(
        &self,
        customer_id: &CustomerId,
        order_number: &str,
    ) -> Result<Option<Order>, StoreError>;

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, StoreError>;

    async fn update_payment_reference(
        &self,
        id: &OrderId,
        reference: &str,
    ) -> Result<(), StoreError>;
}

/// Persistence contract that makes conversations resumable across turns.
///
/// `save` is optimistic: the caller passes the turn index it loaded, and
/// the store must refuse the write when another turn got there first.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread: &ThreadKey) -> Result<Option<ConversationState>, StoreError>;

    async fn save(
        &self,
        thread: &ThreadKey,
        state: &ConversationState,
        expected_turn: u32,
    ) -> Result<(), StoreError>;

    async fn append_message(
        &self,
        thread: &ThreadKey,
        role: MessageRole,
        text: &str,
        media_url: Option<&str>,
    ) -> Result<(), StoreError>;
}
