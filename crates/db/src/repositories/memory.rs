use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use sokoni_core::domain::cart::CartLine;
use sokoni_core::domain::conversation::{ConversationState, MessageRole, ThreadKey};
use sokoni_core::domain::customer::{Customer, CustomerId};
use sokoni_core::domain::order::{Order, OrderId, OrderStatus};
use sokoni_core::domain::product::{Product, ProductId};
use sokoni_core::domain::tenant::{Tenant, TenantId};
use sokoni_core::stores::{
    CartStore, CatalogQuery, CatalogStore, CheckpointStore, CustomerStore, OrderStore, StoreError,
    TenantStore,
};

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: RwLock<Vec<Tenant>>,
}

impl InMemoryTenantRepository {
    pub async fn insert(&self, tenant: Tenant) {
        self.tenants.write().await.push(tenant);
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantRepository {
    async fn find_by_whatsapp_number(&self, number: &str) -> Result<Option<Tenant>, StoreError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.iter().find(|tenant| tenant.whatsapp_number == number && tenant.active).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: RwLock<Vec<Customer>>,
}

#[async_trait]
impl CustomerStore for InMemoryCustomerRepository {
    async fn find_by_phone(
        &self,
        tenant_id: &TenantId,
        phone: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let customers = self.customers.read().await;
        Ok(customers
            .iter()
            .find(|customer| &customer.tenant_id == tenant_id && customer.phone == phone)
            .cloned())
    }

    async fn get_or_create(
        &self,
        tenant_id: &TenantId,
        phone: &str,
    ) -> Result<Customer, StoreError> {
        let mut customers = self.customers.write().await;
        if let Some(existing) = customers
            .iter()
            .find(|customer| &customer.tenant_id == tenant_id && customer.phone == phone)
        {
            return Ok(existing.clone());
        }

        let customer = Customer {
            id: CustomerId(Uuid::new_v4()),
            tenant_id: tenant_id.clone(),
            phone: phone.to_string(),
            name: None,
            preferred_size: None,
            delivery_address: None,
        };
        customers.push(customer.clone());
        Ok(customer)
    }
}

#[derive(Default)]
pub struct InMemoryCatalogRepository {
    products: RwLock<Vec<Product>>,
}

impl InMemoryCatalogRepository {
    pub async fn insert(&self, product: Product) {
        self.products.write().await.push(product);
    }
}

fn memory_match_score(product: &Product, tokens: &[String]) -> usize {
    let haystack = format!(
        "{} {} {} {} {}",
        product.name,
        product.description.as_deref().unwrap_or_default(),
        product.category.as_deref().unwrap_or_default(),
        product.tags.join(" "),
        product.colors.join(" "),
    )
    .to_ascii_lowercase();

    tokens.iter().filter(|token| haystack.contains(token.as_str())).count()
}

#[async_trait]
impl CatalogStore for InMemoryCatalogRepository {
    async fn search(
        &self,
        tenant_id: &TenantId,
        query: &CatalogQuery,
    ) -> Result<Vec<Product>, StoreError> {
        let products = self.products.read().await;
        let tokens: Vec<String> = query
            .text
            .split(|ch: char| !ch.is_ascii_alphanumeric())
            .filter(|token| token.len() > 2)
            .map(str::to_ascii_lowercase)
            .collect();

        let mut hits: Vec<(usize, Product)> = products
            .iter()
            .filter(|product| &product.tenant_id == tenant_id)
            .filter(|product| product.active && product.stock_quantity > 0)
            .filter(|product| {
                query.category.as_deref().map_or(true, |category| {
                    product
                        .category
                        .as_deref()
                        .map(|value| value.eq_ignore_ascii_case(category))
                        .unwrap_or(false)
                })
            })
            .filter(|product| query.min_price.map_or(true, |min| product.price >= min))
            .filter(|product| query.max_price.map_or(true, |max| product.price <= max))
            .map(|product| (memory_match_score(product, &tokens), product.clone()))
            .filter(|(score, _)| tokens.is_empty() || *score > 0)
            .collect();

        hits.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.name.cmp(&right.1.name)));
        Ok(hits.into_iter().map(|(_, product)| product).take(query.limit.max(1) as usize).collect())
    }

    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        let products = self.products.read().await;
        Ok(products.iter().find(|product| &product.id == id).cloned())
    }

    async fn available_stock(&self, id: &ProductId, size: &str) -> Result<u32, StoreError> {
        let products = self.products.read().await;
        Ok(products
            .iter()
            .find(|product| &product.id == id && product.active)
            .filter(|product| {
                product.sizes.iter().any(|candidate| candidate.eq_ignore_ascii_case(size))
            })
            .map(|product| product.stock_quantity)
            .unwrap_or(0))
    }
}

#[derive(Default)]
pub struct InMemoryCartRepository {
    lines: RwLock<HashMap<Uuid, Vec<CartLine>>>,
}

#[async_trait]
impl CartStore for InMemoryCartRepository {
    async fn lines(&self, customer_id: &CustomerId) -> Result<Vec<CartLine>, StoreError> {
        let lines = self.lines.read().await;
        Ok(lines.get(&customer_id.0).cloned().unwrap_or_default())
    }

    async fn add_line(&self, customer_id: &CustomerId, line: CartLine) -> Result<(), StoreError> {
        let mut carts = self.lines.write().await;
        let cart = carts.entry(customer_id.0).or_default();
        if let Some(existing) = cart
            .iter_mut()
            .find(|candidate| candidate.product_id == line.product_id && candidate.size == line.size)
        {
            existing.quantity += line.quantity;
        } else {
            cart.push(line);
        }
        Ok(())
    }

    async fn remove_line(
        &self,
        customer_id: &CustomerId,
        product_id: &ProductId,
        size: &str,
    ) -> Result<(), StoreError> {
        let mut carts = self.lines.write().await;
        let cart = carts.entry(customer_id.0).or_default();
        let before = cart.len();
        cart.retain(|line| !(line.product_id == *product_id && line.size == size));
        if cart.len() == before {
            return Err(StoreError::NotFound(format!(
                "cart line for product {product_id:?} size {size}"
            )));
        }
        Ok(())
    }

    async fn clear(&self, customer_id: &CustomerId) -> Result<(), StoreError> {
        self.lines.write().await.remove(&customer_id.0);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<Vec<Order>>,
}

#[async_trait]
impl OrderStore for InMemoryOrderRepository {
    async fn create(&self, order: Order) -> Result<Order, StoreError> {
        self.orders.write().await.push(order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders.iter().find(|order| &order.id == id).cloned())
    }

    async fn find_by_number(
        &self,
        customer_id: &CustomerId,
        order_number: &str,
    ) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .find(|order| &order.customer_id == customer_id && order.order_number == order_number)
            .cloned())
    }

    async fn list_for_customer(
        &self,
        customer_id: &CustomerId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .iter()
            .filter(|order| &order.customer_id == customer_id)
            .filter(|order| status.as_ref().map_or(true, |wanted| &order.status == wanted))
            .cloned()
            .collect();
        matching.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        matching.truncate(limit.max(1) as usize);
        Ok(matching)
    }

    async fn update_payment_reference(
        &self,
        id: &OrderId,
        reference: &str,
    ) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.iter_mut().find(|order| &order.id == id) else {
            return Err(StoreError::NotFound(format!("order {id:?}")));
        };
        order.payment_reference = Some(reference.to_string());
        Ok(())
    }
}

struct CheckpointRecord {
    state: ConversationState,
    messages: Vec<(MessageRole, String, Option<String>)>,
}

/// In-memory checkpoint store with the same optimistic-save semantics as
/// the SQL repository.
#[derive(Default)]
pub struct InMemoryCheckpointRepository {
    records: RwLock<HashMap<ThreadKey, CheckpointRecord>>,
}

impl InMemoryCheckpointRepository {
    pub async fn message_count(&self, thread: &ThreadKey) -> usize {
        let records = self.records.read().await;
        records.get(thread).map(|record| record.messages.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointRepository {
    async fn load(&self, thread: &ThreadKey) -> Result<Option<ConversationState>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(thread).map(|record| record.state.clone()))
    }

    async fn save(
        &self,
        thread: &ThreadKey,
        state: &ConversationState,
        expected_turn: u32,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(thread) {
            Some(record) => {
                if record.state.turn_index != expected_turn {
                    return Err(StoreError::CheckpointConflict {
                        expected: expected_turn,
                        found: record.state.turn_index,
                    });
                }
                record.state = state.clone();
            }
            None => {
                if expected_turn != 0 {
                    return Err(StoreError::CheckpointConflict { expected: expected_turn, found: 0 });
                }
                records.insert(
                    thread.clone(),
                    CheckpointRecord { state: state.clone(), messages: Vec::new() },
                );
            }
        }
        Ok(())
    }

    async fn append_message(
        &self,
        thread: &ThreadKey,
        role: MessageRole,
        text: &str,
        media_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(thread) else {
            return Err(StoreError::NotFound(format!(
                "conversation for thread {}",
                thread.channel_address
            )));
        };
        record.messages.push((role, text.to_string(), media_url.map(str::to_owned)));
        Ok(())
    }
}

/// Checkpoint store that always fails, for exercising stateless
/// degradation paths in tests.
#[derive(Default)]
pub struct UnavailableCheckpointRepository;

#[async_trait]
impl CheckpointStore for UnavailableCheckpointRepository {
    async fn load(&self, _thread: &ThreadKey) -> Result<Option<ConversationState>, StoreError> {
        Err(StoreError::Unavailable("checkpoint store offline".to_string()))
    }

    async fn save(
        &self,
        _thread: &ThreadKey,
        _state: &ConversationState,
        _expected_turn: u32,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("checkpoint store offline".to_string()))
    }

    async fn append_message(
        &self,
        _thread: &ThreadKey,
        _role: MessageRole,
        _text: &str,
        _media_url: Option<&str>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("checkpoint store offline".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use sokoni_core::domain::cart::CartLine;
    use sokoni_core::domain::conversation::ConversationState;
    use sokoni_core::domain::customer::CustomerId;
    use sokoni_core::domain::product::{Product, ProductId};
    use sokoni_core::domain::tenant::TenantId;
    use sokoni_core::stores::{
        CartStore, CatalogQuery, CatalogStore, CheckpointStore, StoreError,
    };

    use super::{InMemoryCartRepository, InMemoryCatalogRepository, InMemoryCheckpointRepository};

    fn product_fixture(tenant_id: &TenantId, name: &str, color: &str) -> Product {
        Product {
            id: ProductId(Uuid::new_v4()),
            tenant_id: tenant_id.clone(),
            name: name.to_string(),
            description: None,
            category: Some("dresses".to_string()),
            price: Decimal::new(350_000, 2),
            sizes: vec!["S".to_string(), "M".to_string(), "L".to_string()],
            colors: vec![color.to_string()],
            stock_quantity: 3,
            tags: Vec::new(),
            image_urls: Vec::new(),
            active: true,
        }
    }

    #[tokio::test]
    async fn in_memory_catalog_matches_and_ranks_like_sql() {
        let tenant_id = TenantId(Uuid::new_v4());
        let repo = InMemoryCatalogRepository::default();
        repo.insert(product_fixture(&tenant_id, "Red Maxi Dress", "red")).await;
        repo.insert(product_fixture(&tenant_id, "Blue Denim Jacket", "blue")).await;

        let hits = repo.search(&tenant_id, &CatalogQuery::text("red dress")).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Red Maxi Dress");
    }

    #[tokio::test]
    async fn in_memory_cart_merges_duplicate_lines() {
        let repo = InMemoryCartRepository::default();
        let customer_id = CustomerId(Uuid::new_v4());
        let product_id = ProductId(Uuid::new_v4());
        let line = CartLine {
            product_id: product_id.clone(),
            product_name: "Red Maxi Dress".to_string(),
            size: "M".to_string(),
            quantity: 1,
            unit_price: Decimal::new(350_000, 2),
        };

        repo.add_line(&customer_id, line.clone()).await.expect("first");
        repo.add_line(&customer_id, line).await.expect("second");

        let lines = repo.lines(&customer_id).await.expect("lines");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 2);
    }

    #[tokio::test]
    async fn in_memory_checkpoint_enforces_the_fencing_token() {
        let repo = InMemoryCheckpointRepository::default();
        let mut state = ConversationState::new(
            TenantId(Uuid::new_v4()),
            CustomerId(Uuid::new_v4()),
            "+254712345678",
        );
        let thread = state.thread_key();

        state.turn_index = 1;
        repo.save(&thread, &state, 0).await.expect("first save");

        let error = repo.save(&thread, &state, 0).await.expect_err("stale save");
        assert!(matches!(error, StoreError::CheckpointConflict { expected: 0, found: 1 }));

        state.turn_index = 2;
        repo.save(&thread, &state, 1).await.expect("second save");
    }
}
