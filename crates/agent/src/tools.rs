use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use sokoni_core::domain::cart::{cart_total, CartLine};
use sokoni_core::domain::conversation::ConversationState;
use sokoni_core::domain::customer::CustomerId;
use sokoni_core::domain::product::ProductId;
use sokoni_core::domain::tenant::TenantId;
use sokoni_core::payments::PaymentGateway;
use sokoni_core::stores::{CartStore, CatalogQuery, CatalogStore, OrderStore};

use crate::llm::ToolInvocation;

/// Identity context injected into every tool call; the model never
/// supplies these.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub tenant_id: TenantId,
    pub boutique_name: String,
    pub customer_id: CustomerId,
    pub channel_address: String,
    pub currency: String,
}

/// Structured outcome of one tool call. Failures are values, not
/// exceptions, so one bad call never aborts the turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool: impl Into<String>, payload: Value) -> Self {
        Self { tool: tool.into(), success: true, payload, error: None }
    }

    pub fn err(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self { tool: tool.into(), success: false, payload: Value::Null, error: Some(error.into()) }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<Value, String>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn execute(&self, name: &str, args: &Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::err(name, format!("unknown tool: {name}"));
        };

        let missing: Vec<&str> = tool
            .required_args()
            .iter()
            .filter(|arg| args.get(**arg).map_or(true, Value::is_null))
            .copied()
            .collect();
        if !missing.is_empty() {
            return ToolResult::err(name, format!("missing required arguments: {}", missing.join(", ")));
        }

        match tool.execute(args, ctx).await {
            Ok(payload) => ToolResult::ok(name, payload),
            Err(error) => {
                warn!(event_name = "tool.execution_failed", tool = name, error = %error, "tool call failed");
                ToolResult::err(name, error)
            }
        }
    }

    /// Calls execute strictly in order: a cart mutation must observe the
    /// mutation before it within the same turn.
    pub async fn execute_all(&self, calls: &[ToolInvocation], ctx: &ToolContext) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(&call.tool, &call.params, ctx).await);
        }
        results
    }
}

/// Fold successful tool results back into conversation state before the
/// reply is composed.
pub fn fold_results(state: &mut ConversationState, results: &[ToolResult]) {
    for result in results {
        if !result.success {
            continue;
        }
        match result.tool.as_str() {
            "search_products" => {
                if let Some(products) = result.payload.get("products") {
                    if let Ok(products) = serde_json::from_value(products.clone()) {
                        state.found_items = products;
                    }
                }
            }
            "add_to_cart" | "remove_from_cart" | "get_cart_summary" => {
                if let Some(items) = result.payload.get("items") {
                    if let Ok(lines) = serde_json::from_value(items.clone()) {
                        state.cart_snapshot = lines;
                    }
                }
            }
            _ => {}
        }
    }
}

pub struct SearchProductsTool {
    pub catalog: Arc<dyn CatalogStore>,
}

#[async_trait]
impl Tool for SearchProductsTool {
    fn name(&self) -> &'static str {
        "search_products"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["query"]
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
        let query = CatalogQuery {
            text: args.get("query").and_then(Value::as_str).unwrap_or_default().to_string(),
            category: args.get("category").and_then(Value::as_str).map(str::to_owned),
            min_price: decimal_arg(args, "min_price"),
            max_price: decimal_arg(args, "max_price"),
            limit: args.get("limit").and_then(Value::as_u64).unwrap_or(5) as u32,
        };

        let products =
            self.catalog.search(&ctx.tenant_id, &query).await.map_err(|error| error.to_string())?;
        let count = products.len();

        Ok(json!({
            "products": products,
            "count": count,
            "message": format!("Found {count} products matching your search"),
        }))
    }
}

pub struct AddToCartTool {
    pub catalog: Arc<dyn CatalogStore>,
    pub cart: Arc<dyn CartStore>,
}

#[async_trait]
impl Tool for AddToCartTool {
    fn name(&self) -> &'static str {
        "add_to_cart"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["product_id", "size"]
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
        let product_id = product_id_arg(args, "product_id")?;
        let size = args.get("size").and_then(Value::as_str).unwrap_or_default().to_string();
        let quantity = args.get("quantity").and_then(Value::as_u64).unwrap_or(1).max(1) as u32;

        let product = self
            .catalog
            .find_by_id(&product_id)
            .await
            .map_err(|error| error.to_string())?
            .ok_or_else(|| format!("product {} not found", product_id.0))?;

        let stock = self
            .catalog
            .available_stock(&product_id, &size)
            .await
            .map_err(|error| error.to_string())?;
        if stock < quantity {
            return Err(format!("size {size} of {} is out of stock", product.name));
        }

        let line = CartLine {
            product_id,
            product_name: product.name.clone(),
            size,
            quantity,
            unit_price: product.price,
        };
        self.cart.add_line(&ctx.customer_id, line).await.map_err(|error| error.to_string())?;

        let items = self.cart.lines(&ctx.customer_id).await.map_err(|error| error.to_string())?;
        Ok(json!({
            "message": format!("Added {quantity} item(s) to your cart"),
            "items": items,
            "subtotal": cart_total(&items),
            "currency": ctx.currency,
        }))
    }
}

pub struct RemoveFromCartTool {
    pub cart: Arc<dyn CartStore>,
}

#[async_trait]
impl Tool for RemoveFromCartTool {
    fn name(&self) -> &'static str {
        "remove_from_cart"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["product_id", "size"]
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
        let product_id = product_id_arg(args, "product_id")?;
        let size = args.get("size").and_then(Value::as_str).unwrap_or_default();

        self.cart
            .remove_line(&ctx.customer_id, &product_id, size)
            .await
            .map_err(|error| error.to_string())?;

        let items = self.cart.lines(&ctx.customer_id).await.map_err(|error| error.to_string())?;
        Ok(json!({
            "message": "Item removed from cart",
            "items": items,
            "subtotal": cart_total(&items),
        }))
    }
}

pub struct GetCartSummaryTool {
    pub cart: Arc<dyn CartStore>,
}

#[async_trait]
impl Tool for GetCartSummaryTool {
    fn name(&self) -> &'static str {
        "get_cart_summary"
    }

    async fn execute(&self, _args: &Value, ctx: &ToolContext) -> Result<Value, String> {
        let items = self.cart.lines(&ctx.customer_id).await.map_err(|error| error.to_string())?;
        Ok(json!({
            "total_items": items.len(),
            "subtotal": cart_total(&items),
            "currency": ctx.currency,
            "items": items,
            "message": format!("You have {} item(s) in your cart", items.len()),
        }))
    }
}

pub struct CheckInventoryTool {
    pub catalog: Arc<dyn CatalogStore>,
}

#[async_trait]
impl Tool for CheckInventoryTool {
    fn name(&self) -> &'static str {
        "check_inventory"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["product_id", "size"]
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<Value, String> {
        let product_id = product_id_arg(args, "product_id")?;
        let size = args.get("size").and_then(Value::as_str).unwrap_or_default();

        let quantity = self
            .catalog
            .available_stock(&product_id, size)
            .await
            .map_err(|error| error.to_string())?;

        Ok(json!({
            "in_stock": quantity > 0,
            "quantity_available": quantity,
            "size": size,
            "product_id": product_id.0,
        }))
    }
}

pub struct InitiatePaymentTool {
    pub gateway: Arc<dyn PaymentGateway>,
}

#[async_trait]
impl Tool for InitiatePaymentTool {
    fn name(&self) -> &'static str {
        "initiate_payment"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["amount", "reference"]
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
        let amount =
            decimal_arg(args, "amount").ok_or_else(|| "amount must be a number".to_string())?;
        let reference = args.get("reference").and_then(Value::as_str).unwrap_or_default();
        let phone = args
            .get("phone")
            .and_then(Value::as_str)
            .unwrap_or(ctx.channel_address.as_str());

        let ack = self
            .gateway
            .initiate(phone, amount, reference)
            .await
            .map_err(|error| error.to_string())?;

        Ok(json!({
            "accepted": ack.accepted,
            "transaction_id": ack.transaction_id,
            "mock": ack.mock,
            "amount": amount,
            "currency": ctx.currency,
        }))
    }
}

pub struct CheckPaymentStatusTool {
    pub gateway: Arc<dyn PaymentGateway>,
}

#[async_trait]
impl Tool for CheckPaymentStatusTool {
    fn name(&self) -> &'static str {
        "check_payment_status"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["transaction_id"]
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<Value, String> {
        let transaction_id =
            args.get("transaction_id").and_then(Value::as_str).unwrap_or_default();
        let status = self
            .gateway
            .check_status(transaction_id)
            .await
            .map_err(|error| error.to_string())?;

        Ok(json!({ "transaction_id": transaction_id, "status": status }))
    }
}

pub struct GetOrderStatusTool {
    pub orders: Arc<dyn OrderStore>,
}

#[async_trait]
impl Tool for GetOrderStatusTool {
    fn name(&self) -> &'static str {
        "get_order_status"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["order_number"]
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
        let order_number = args.get("order_number").and_then(Value::as_str).unwrap_or_default();

        let order = self
            .orders
            .find_by_number(&ctx.customer_id, order_number)
            .await
            .map_err(|error| error.to_string())?
            .ok_or_else(|| format!("order {order_number} not found"))?;

        Ok(json!({
            "order_number": order.order_number,
            "status": order.status,
            "payment_state": order.payment_state,
            "total_amount": order.total_amount,
        }))
    }
}

pub struct GetCustomerOrdersTool {
    pub orders: Arc<dyn OrderStore>,
}

#[async_trait]
impl Tool for GetCustomerOrdersTool {
    fn name(&self) -> &'static str {
        "get_customer_orders"
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<Value, String> {
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as u32;
        let orders = self
            .orders
            .list_for_customer(&ctx.customer_id, None, limit)
            .await
            .map_err(|error| error.to_string())?;

        Ok(json!({
            "count": orders.len(),
            "orders": orders
                .iter()
                .map(|order| json!({
                    "order_number": order.order_number,
                    "status": order.status,
                    "payment_state": order.payment_state,
                    "total_amount": order.total_amount,
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

/// Wire the closed tool set against the store contracts.
pub fn default_registry(
    catalog: Arc<dyn CatalogStore>,
    cart: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(SearchProductsTool { catalog: catalog.clone() });
    registry.register(AddToCartTool { catalog: catalog.clone(), cart: cart.clone() });
    registry.register(RemoveFromCartTool { cart: cart.clone() });
    registry.register(GetCartSummaryTool { cart });
    registry.register(CheckInventoryTool { catalog });
    registry.register(InitiatePaymentTool { gateway: gateway.clone() });
    registry.register(CheckPaymentStatusTool { gateway });
    registry.register(GetOrderStatusTool { orders: orders.clone() });
    registry.register(GetCustomerOrdersTool { orders });
    registry
}

fn decimal_arg(args: &Value, key: &str) -> Option<Decimal> {
    match args.get(key) {
        Some(Value::Number(number)) => number.to_string().parse().ok(),
        Some(Value::String(text)) => text.parse().ok(),
        _ => None,
    }
}

fn product_id_arg(args: &Value, key: &str) -> Result<ProductId, String> {
    let raw = args.get(key).and_then(Value::as_str).ok_or_else(|| format!("{key} is required"))?;
    Uuid::parse_str(raw).map(ProductId).map_err(|_| format!("{key} is not a valid product id"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use sokoni_core::domain::conversation::ConversationState;
    use sokoni_core::domain::customer::CustomerId;
    use sokoni_core::domain::product::{Product, ProductId};
    use sokoni_core::domain::tenant::TenantId;
    use sokoni_core::payments::{PaymentAck, PaymentError, PaymentGateway, PaymentStatus};
    use sokoni_db::repositories::{
        InMemoryCartRepository, InMemoryCatalogRepository, InMemoryOrderRepository,
    };

    use crate::llm::ToolInvocation;

    use super::{default_registry, fold_results, ToolContext, ToolRegistry};

    struct StubGateway;

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn initiate(
            &self,
            _phone: &str,
            _amount: Decimal,
            reference: &str,
        ) -> Result<PaymentAck, PaymentError> {
            Ok(PaymentAck {
                accepted: true,
                transaction_id: format!("TXN-{reference}"),
                mock: true,
            })
        }

        async fn check_status(&self, _transaction_id: &str) -> Result<PaymentStatus, PaymentError> {
            Ok(PaymentStatus::Pending)
        }
    }

    fn product_fixture(tenant_id: &TenantId) -> Product {
        Product {
            id: ProductId(Uuid::new_v4()),
            tenant_id: tenant_id.clone(),
            name: "Red Maxi Dress".to_string(),
            description: Some("Flowing red maxi dress".to_string()),
            category: Some("dresses".to_string()),
            price: Decimal::new(350_000, 2),
            sizes: vec!["S".to_string(), "M".to_string(), "L".to_string()],
            colors: vec!["red".to_string()],
            stock_quantity: 5,
            tags: vec!["wedding".to_string()],
            image_urls: vec!["https://cdn.example.com/red-maxi.jpg".to_string()],
            active: true,
        }
    }

    async fn registry_fixture() -> (ToolRegistry, ToolContext, Product) {
        let tenant_id = TenantId(Uuid::new_v4());
        let catalog = Arc::new(InMemoryCatalogRepository::default());
        let product = product_fixture(&tenant_id);
        catalog.insert(product.clone()).await;

        let registry = default_registry(
            catalog,
            Arc::new(InMemoryCartRepository::default()),
            Arc::new(InMemoryOrderRepository::default()),
            Arc::new(StubGateway),
        );
        let ctx = ToolContext {
            tenant_id,
            boutique_name: "Zawadi Boutique".to_string(),
            customer_id: CustomerId(Uuid::new_v4()),
            channel_address: "+254712345678".to_string(),
            currency: "KES".to_string(),
        };
        (registry, ctx, product)
    }

    #[tokio::test]
    async fn unknown_tool_returns_a_structured_error_result() {
        let (registry, ctx, _) = registry_fixture().await;
        let result = registry.execute("summon_unicorn", &json!({}), &ctx).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("unknown tool"));
    }

    #[tokio::test]
    async fn missing_required_arguments_are_rejected_without_executing() {
        let (registry, ctx, _) = registry_fixture().await;
        let result = registry.execute("add_to_cart", &json!({ "size": "M" }), &ctx).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("product_id"));
    }

    #[tokio::test]
    async fn search_then_add_then_summary_runs_sequentially() {
        let (registry, ctx, product) = registry_fixture().await;

        let calls = vec![
            ToolInvocation { tool: "search_products".into(), params: json!({ "query": "red dress" }) },
            ToolInvocation {
                tool: "add_to_cart".into(),
                params: json!({ "product_id": product.id.0.to_string(), "size": "M" }),
            },
            ToolInvocation { tool: "get_cart_summary".into(), params: Value::Null },
        ];

        let results = registry.execute_all(&calls, &ctx).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|result| result.success), "all calls should succeed: {results:?}");

        // The summary call observes the mutation made earlier in the turn.
        assert_eq!(results[2].payload["total_items"], json!(1));
    }

    #[tokio::test]
    async fn one_failing_call_does_not_abort_the_rest() {
        let (registry, ctx, product) = registry_fixture().await;

        let calls = vec![
            ToolInvocation { tool: "no_such_tool".into(), params: Value::Null },
            ToolInvocation {
                tool: "check_inventory".into(),
                params: json!({ "product_id": product.id.0.to_string(), "size": "M" }),
            },
        ];

        let results = registry.execute_all(&calls, &ctx).await;
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(results[1].payload["in_stock"], json!(true));
    }

    #[tokio::test]
    async fn out_of_stock_sizes_cannot_be_added() {
        let (registry, ctx, product) = registry_fixture().await;
        let result = registry
            .execute(
                "add_to_cart",
                &json!({ "product_id": product.id.0.to_string(), "size": "XXL" }),
                &ctx,
            )
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("out of stock"));
    }

    #[tokio::test]
    async fn folding_updates_found_items_and_cart_snapshot() {
        let (registry, ctx, product) = registry_fixture().await;
        let mut state = ConversationState::new(
            ctx.tenant_id.clone(),
            ctx.customer_id.clone(),
            ctx.channel_address.clone(),
        );

        let calls = vec![
            ToolInvocation { tool: "search_products".into(), params: json!({ "query": "red dress" }) },
            ToolInvocation {
                tool: "add_to_cart".into(),
                params: json!({ "product_id": product.id.0.to_string(), "size": "M" }),
            },
        ];
        let results = registry.execute_all(&calls, &ctx).await;
        fold_results(&mut state, &results);

        assert_eq!(state.found_items.len(), 1);
        assert_eq!(state.found_items[0].name, "Red Maxi Dress");
        assert_eq!(state.cart_snapshot.len(), 1);
        assert_eq!(state.cart_snapshot[0].size, "M");
    }

    #[tokio::test]
    async fn payment_tools_round_trip_through_the_gateway() {
        let (registry, ctx, _) = registry_fixture().await;

        let initiate = registry
            .execute(
                "initiate_payment",
                &json!({ "amount": 3700, "reference": "ORD-1001" }),
                &ctx,
            )
            .await;
        assert!(initiate.success);
        assert_eq!(initiate.payload["transaction_id"], json!("TXN-ORD-1001"));

        let status = registry
            .execute("check_payment_status", &json!({ "transaction_id": "TXN-ORD-1001" }), &ctx)
            .await;
        assert!(status.success);
        assert_eq!(status.payload["status"], json!("pending"));
    }
}
