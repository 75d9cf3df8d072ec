use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use sokoni_core::domain::cart::cart_total;
use sokoni_core::domain::conversation::{ConversationState, ConversationStep};
use sokoni_core::domain::order::{Order, OrderId, OrderStatus, PaymentState};
use sokoni_core::domain::product::Product;
use sokoni_core::stores::{CatalogStore, OrderStore, StoreError};

use crate::compose::ResponseComposer;
use crate::llm::{parse_model_reply, LlmClient, LlmError};
use crate::router::SpecialistTarget;
use crate::tools::{fold_results, ToolContext, ToolRegistry};

/// One inbound message, as the specialists see it.
#[derive(Clone, Debug)]
pub struct TurnInput {
    pub text: String,
    pub media_url: Option<String>,
    pub customer_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub media: Vec<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), media: Vec::new() }
    }
}

/// Outcome of one graph node.
///
/// `reply: None` + `next: Some(step)` continues the in-turn chain.
/// `reply: Some` ends the turn; `next` then names the step the
/// conversation parks in (defaults to the node that replied).
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub reply: Option<Reply>,
    pub next: Option<ConversationStep>,
}

impl StepOutcome {
    pub fn reply(reply: Reply) -> Self {
        Self { reply: Some(reply), next: None }
    }

    pub fn reply_parked(reply: Reply, step: ConversationStep) -> Self {
        Self { reply: Some(reply), next: Some(step) }
    }

    pub fn continue_to(step: ConversationStep) -> Self {
        Self { reply: None, next: Some(step) }
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// The specialist handlers. Thin transforms over conversation state:
/// data mutations go through the tool registry, reads go through the
/// store contracts, copy comes from the composer.
pub struct Specialists {
    catalog: Arc<dyn CatalogStore>,
    orders: Arc<dyn OrderStore>,
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    composer: ResponseComposer,
    delivery_fee: Decimal,
}

impl Specialists {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        orders: Arc<dyn OrderStore>,
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            catalog,
            orders,
            llm,
            registry,
            composer: ResponseComposer::new(),
            delivery_fee: Decimal::new(20_000, 2),
        }
    }

    pub fn with_delivery_fee(mut self, delivery_fee: Decimal) -> Self {
        self.delivery_fee = delivery_fee;
        self
    }

    pub async fn run(
        &self,
        step: ConversationStep,
        target: Option<SpecialistTarget>,
        state: &mut ConversationState,
        input: &TurnInput,
        ctx: &ToolContext,
    ) -> Result<StepOutcome, HandlerError> {
        debug!(event_name = "specialist.step", step = ?step, target = ?target, "running graph node");
        match step {
            ConversationStep::Greeting => Ok(self.greeting(input)),
            ConversationStep::ImageAnalysis => self.analyze_image(state, input).await,
            ConversationStep::ProductSearch => self.search_products(state, input, ctx).await,
            ConversationStep::Recommendation => self.recommend(state, input).await,
            ConversationStep::SizeSelection | ConversationStep::CartManagement => {
                if target == Some(SpecialistTarget::CartView) {
                    self.view_cart(state, ctx).await
                } else {
                    self.manage_cart(state, input, ctx).await
                }
            }
            ConversationStep::Checkout => self.checkout(state, ctx).await,
            ConversationStep::Payment => Ok(self.payment_wait()),
            ConversationStep::GeneralInquiry => {
                if target == Some(SpecialistTarget::OrderStatus) {
                    self.order_status(ctx).await
                } else {
                    self.general_inquiry(state, input, ctx).await
                }
            }
        }
    }

    fn greeting(&self, input: &TurnInput) -> StepOutcome {
        StepOutcome::reply(Reply::text(self.composer.welcome(input.customer_name.as_deref())))
    }

    async fn analyze_image(
        &self,
        state: &mut ConversationState,
        input: &TurnInput,
    ) -> Result<StepOutcome, HandlerError> {
        let Some(image_url) = input.media_url.as_deref() else {
            return Ok(StepOutcome::reply_parked(
                Reply::text(self.composer.image_trouble()),
                ConversationStep::Greeting,
            ));
        };

        let prompt = "Describe the clothing item in this photo in a short search phrase: \
                      category, color and style, nothing else.";
        match self.llm.generate(prompt, Some(image_url)).await {
            Ok(description) => {
                let query = description.trim().to_string();
                debug!(event_name = "image.analyzed", query = %query, "image mapped to search query");
                state.pending_search_query = Some(query);
                Ok(StepOutcome::continue_to(ConversationStep::ProductSearch))
            }
            Err(error) => {
                warn!(event_name = "image.analysis_failed", error = %error, "vision call failed");
                Ok(StepOutcome::reply_parked(
                    Reply::text(self.composer.image_trouble()),
                    ConversationStep::Greeting,
                ))
            }
        }
    }

    async fn search_products(
        &self,
        state: &mut ConversationState,
        input: &TurnInput,
        ctx: &ToolContext,
    ) -> Result<StepOutcome, HandlerError> {
        let query = state
            .pending_search_query
            .take()
            .filter(|query| !query.is_empty())
            .unwrap_or_else(|| {
                let terms = state.gathered_context.search_terms();
                if terms.is_empty() {
                    input.text.clone()
                } else {
                    terms
                }
            });

        let result =
            self.registry.execute("search_products", &json!({ "query": query }), ctx).await;
        fold_results(state, std::slice::from_ref(&result));

        if !result.success || state.found_items.is_empty() {
            return Ok(StepOutcome::reply_parked(
                Reply::text(self.composer.no_results()),
                ConversationStep::Greeting,
            ));
        }

        Ok(StepOutcome::continue_to(ConversationStep::Recommendation))
    }

    async fn recommend(
        &self,
        state: &mut ConversationState,
        input: &TurnInput,
    ) -> Result<StepOutcome, HandlerError> {
        let top: Vec<&Product> = state.found_items.iter().take(3).collect();
        let media: Vec<String> = top
            .iter()
            .filter_map(|product| product.image_urls.first().cloned())
            .collect();

        let listing = top
            .iter()
            .map(|product| format!("{} ({})", product.name, product.price))
            .collect::<Vec<_>>()
            .join("; ");
        let prompt = format!(
            "You are a warm boutique sales assistant. The customer said: \"{text}\". \
             Recommend these products in 2-3 friendly sentences, no markdown: {listing}",
            text = input.text,
        );

        let text = match self.llm.generate(&prompt, None).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) | Err(_) => self.composer.recommendation_fallback(&state.found_items),
        };

        Ok(StepOutcome::reply(Reply { text, media }))
    }

    async fn manage_cart(
        &self,
        state: &mut ConversationState,
        input: &TurnInput,
        ctx: &ToolContext,
    ) -> Result<StepOutcome, HandlerError> {
        let product = self.resolve_product(state, input).await?;
        let Some(product) = product else {
            return Ok(StepOutcome::reply_parked(
                Reply::text(
                    "Which product would you like to add to your cart? Just tell me the name!",
                ),
                ConversationStep::Recommendation,
            ));
        };

        let size = state
            .selected_size
            .take()
            .or_else(|| product.size_mentioned_in(&input.text))
            .or_else(|| state.gathered_context.size.clone())
            .or_else(|| {
                (product.sizes.len() == 1).then(|| product.sizes[0].clone())
            });

        let Some(size) = size else {
            state.selected_product_id = Some(product.id.clone());
            return Ok(StepOutcome::reply_parked(
                Reply::text(self.composer.ask_size(&product)),
                ConversationStep::SizeSelection,
            ));
        };

        let result = self
            .registry
            .execute(
                "add_to_cart",
                &json!({ "product_id": product.id.0.to_string(), "size": size }),
                ctx,
            )
            .await;
        fold_results(state, std::slice::from_ref(&result));

        state.selected_product_id = None;
        state.selected_size = None;

        if !result.success {
            let detail = result.error.unwrap_or_else(|| "something went wrong".to_string());
            return Ok(StepOutcome::reply_parked(
                Reply::text(format!("Sorry, {detail}. Would you like a different size?")),
                ConversationStep::Recommendation,
            ));
        }

        let added = state
            .cart_snapshot
            .iter()
            .find(|line| line.product_id == product.id && line.size == size)
            .cloned();
        let text = match added {
            Some(line) => self.composer.cart_added(&line, &state.cart_snapshot, &ctx.currency),
            None => self.composer.cart_summary(&state.cart_snapshot, &ctx.currency),
        };

        Ok(StepOutcome::reply_parked(Reply::text(text), ConversationStep::Recommendation))
    }

    async fn resolve_product(
        &self,
        state: &ConversationState,
        input: &TurnInput,
    ) -> Result<Option<Product>, HandlerError> {
        if let Some(id) = &state.selected_product_id {
            if let Some(product) =
                state.found_items.iter().find(|product| &product.id == id).cloned()
            {
                return Ok(Some(product));
            }
            return Ok(self.catalog.find_by_id(id).await?);
        }

        if let Some(product) =
            state.found_items.iter().find(|product| product.mentioned_in(&input.text)).cloned()
        {
            return Ok(Some(product));
        }

        // Fall back to the most recent recommendation, the way a customer
        // replying "I'll take it" expects.
        Ok(state.found_items.first().cloned())
    }

    async fn view_cart(
        &self,
        state: &mut ConversationState,
        ctx: &ToolContext,
    ) -> Result<StepOutcome, HandlerError> {
        let result = self.registry.execute("get_cart_summary", &Value::Null, ctx).await;
        fold_results(state, std::slice::from_ref(&result));

        Ok(StepOutcome::reply_parked(
            Reply::text(self.composer.cart_summary(&state.cart_snapshot, &ctx.currency)),
            ConversationStep::Recommendation,
        ))
    }

    async fn checkout(
        &self,
        state: &mut ConversationState,
        ctx: &ToolContext,
    ) -> Result<StepOutcome, HandlerError> {
        let summary = self.registry.execute("get_cart_summary", &Value::Null, ctx).await;
        fold_results(state, std::slice::from_ref(&summary));

        if state.cart_snapshot.is_empty() {
            return Ok(StepOutcome::reply_parked(
                Reply::text(self.composer.empty_cart_checkout()),
                ConversationStep::Recommendation,
            ));
        }

        let subtotal = cart_total(&state.cart_snapshot);
        let total = subtotal + self.delivery_fee;
        let order_number = format!("ORD-{}", Utc::now().timestamp());

        let payment = self
            .registry
            .execute(
                "initiate_payment",
                &json!({ "amount": total, "reference": order_number }),
                ctx,
            )
            .await;

        let accepted =
            payment.success && payment.payload.get("accepted").and_then(Value::as_bool) == Some(true);
        if !accepted {
            return Ok(StepOutcome::reply_parked(
                Reply::text(self.composer.payment_failed()),
                ConversationStep::Recommendation,
            ));
        }

        let transaction_id = payment
            .payload
            .get("transaction_id")
            .and_then(Value::as_str)
            .unwrap_or(&order_number)
            .to_string();
        let mock = payment.payload.get("mock").and_then(Value::as_bool).unwrap_or(false);

        let order = Order {
            id: OrderId(Uuid::new_v4()),
            tenant_id: ctx.tenant_id.clone(),
            customer_id: ctx.customer_id.clone(),
            order_number: order_number.clone(),
            lines: state.cart_snapshot.clone(),
            subtotal,
            delivery_fee: self.delivery_fee,
            total_amount: total,
            delivery_address: None,
            payment_state: PaymentState::Pending,
            status: OrderStatus::Pending,
            payment_reference: Some(transaction_id),
            created_at: Utc::now(),
        };
        self.orders.create(order).await?;

        // The shopping mission is complete; the next conversation starts
        // from a clean slate.
        state.reset_gathered_context();

        Ok(StepOutcome::reply_parked(
            Reply::text(self.composer.payment_requested(&order_number, total, &ctx.currency, mock)),
            ConversationStep::Payment,
        ))
    }

    fn payment_wait(&self) -> StepOutcome {
        StepOutcome::reply_parked(
            Reply::text(
                "We're still waiting for your M-Pesa confirmation 📱. I'll let you know the \
                 moment it lands — or say 'checkout' to try again.",
            ),
            ConversationStep::Payment,
        )
    }

    async fn order_status(&self, ctx: &ToolContext) -> Result<StepOutcome, HandlerError> {
        let result = self.registry.execute("get_customer_orders", &json!({ "limit": 5 }), ctx).await;

        let orders = result
            .payload
            .get("orders")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if !result.success || orders.is_empty() {
            return Ok(StepOutcome::reply_parked(
                Reply::text(
                    "I couldn't find any orders for you yet. Once you place one, I'll track it \
                     here!",
                ),
                ConversationStep::GeneralInquiry,
            ));
        }

        let mut text = String::from("📦 Your recent orders:\n\n");
        for order in &orders {
            text.push_str(&format!(
                "{number}: {status}, payment {payment}\n",
                number = order.get("order_number").and_then(Value::as_str).unwrap_or("?"),
                status = order.get("status").and_then(Value::as_str).unwrap_or("?"),
                payment = order.get("payment_state").and_then(Value::as_str).unwrap_or("?"),
            ));
        }

        Ok(StepOutcome::reply_parked(Reply::text(text), ConversationStep::GeneralInquiry))
    }

    /// Tool-enabled conversation: the model may answer directly or
    /// signal tool calls, which run sequentially and fold back into the
    /// state before the reply goes out.
    async fn general_inquiry(
        &self,
        state: &mut ConversationState,
        input: &TurnInput,
        ctx: &ToolContext,
    ) -> Result<StepOutcome, HandlerError> {
        let tool_names = self.registry.names().join(", ");
        let prompt = format!(
            "You are the assistant for {name}, a Kenyan fashion boutique (opening hours \
             Mon-Sat 9am-7pm, delivery countrywide in 2-3 days, payment via M-Pesa, returns \
             within 7 days with receipt). The customer asked: \"{question}\"\n\n\
             You may call these tools: {tool_names}.\n\
             Return ONLY JSON (no markdown):\n\
             {{\"reply_text\": \"...\", \"intent\": \"general_inquiry\", \
             \"actions\": [{{\"tool\": \"...\", \"params\": {{}}}}], \"entities\": {{}}}}",
            name = ctx.boutique_name,
            question = input.text,
        );

        let text = match self.llm.generate(&prompt, None).await {
            Ok(raw) => {
                let reply = parse_model_reply(&raw);
                if !reply.actions.is_empty() {
                    let results = self.registry.execute_all(&reply.actions, ctx).await;
                    let failed = results.iter().filter(|result| !result.success).count();
                    if failed > 0 {
                        warn!(
                            event_name = "inquiry.tool_failures",
                            failed,
                            total = results.len(),
                            "some model-signaled tool calls failed"
                        );
                    }
                    fold_results(state, &results);
                }
                if reply.reply_text.trim().is_empty() {
                    self.composer.inquiry_fallback(&ctx.boutique_name)
                } else {
                    reply.reply_text.trim().to_string()
                }
            }
            Err(_) => self.composer.inquiry_fallback(&ctx.boutique_name),
        };

        Ok(StepOutcome::reply_parked(Reply::text(text), ConversationStep::GeneralInquiry))
    }
}
