use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub tenant_id: super::tenant::TenantId,
    pub phone: String,
    pub name: Option<String>,
    pub preferred_size: Option<String>,
    pub delivery_address: Option<String>,
}
