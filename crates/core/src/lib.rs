pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod payments;
pub mod stores;

pub use domain::cart::CartLine;
pub use domain::conversation::{
    ConversationMode, ConversationState, ConversationStep, GatheredContext, HistoryEntry,
    MessageRole, Slot, ThreadKey,
};
pub use domain::customer::{Customer, CustomerId};
pub use domain::order::{Order, OrderId, OrderStatus, PaymentState};
pub use domain::product::{Product, ProductId};
pub use domain::tenant::{Tenant, TenantId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use payments::{PaymentAck, PaymentError, PaymentGateway, PaymentStatus};
pub use stores::{
    CartStore, CatalogQuery, CatalogStore, CheckpointStore, CustomerStore, OrderStore, StoreError,
    TenantStore,
};
