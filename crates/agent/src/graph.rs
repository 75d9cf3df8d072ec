use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use sokoni_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use sokoni_core::domain::conversation::{ConversationMode, ConversationState, ConversationStep};
use sokoni_core::domain::tenant::Tenant;

use crate::compose::ResponseComposer;
use crate::context::ContextExtractor;
use crate::handlers::{HandlerError, Reply, Specialists, StepOutcome, TurnInput};
use crate::router::{ChatPrompt, MessageView, RoutingAction, RoutingEngine, SpecialistTarget};
use crate::tools::ToolContext;

#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub reply_text: String,
    pub reply_media: Vec<String>,
    pub dispatched: Option<ConversationStep>,
}

/// Executes exactly one pass of the conversation graph per inbound
/// message. This is the only place allowed to produce the user-visible
/// fallback reply; nothing below it lets an error escape.
pub struct TurnRunner {
    extractor: ContextExtractor,
    router: RoutingEngine,
    specialists: Specialists,
    composer: ResponseComposer,
    audit: Arc<dyn AuditSink>,
}

impl TurnRunner {
    pub fn new(router: RoutingEngine, specialists: Specialists, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            extractor: ContextExtractor::new(),
            router,
            specialists,
            composer: ResponseComposer::new(),
            audit,
        }
    }

    pub async fn run_turn(
        &self,
        tenant: &Tenant,
        state: &mut ConversationState,
        input: &TurnInput,
        correlation_id: &str,
    ) -> TurnOutcome {
        state.turn_index += 1;
        state.last_reply_media.clear();

        let audit_ctx = AuditContext::new(
            None,
            Some(state.channel_address.clone()),
            correlation_id,
            "turn-runner",
        );

        let (reply, dispatched) = match self.run_inner(tenant, state, input, &audit_ctx).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    event_name = "turn.failed",
                    correlation_id,
                    thread_id = %state.channel_address,
                    error = %error,
                    "turn failed; ending in safe state with fallback reply"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        &audit_ctx,
                        "turn.failed",
                        AuditCategory::System,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                state.current_step = ConversationStep::Greeting;
                state.mode = ConversationMode::Chatting;
                (Reply::text(self.composer.fallback_reply()), None)
            }
        };

        state.record_exchange(&input.text, &reply.text);
        state.last_reply_text = reply.text.clone();
        state.last_reply_media = reply.media.clone();
        state.updated_at = Utc::now();

        TurnOutcome { reply_text: reply.text, reply_media: reply.media, dispatched }
    }

    async fn run_inner(
        &self,
        tenant: &Tenant,
        state: &mut ConversationState,
        input: &TurnInput,
        audit_ctx: &AuditContext,
    ) -> Result<(Reply, Option<ConversationStep>), HandlerError> {
        state.gathered_context =
            self.extractor.extract(&input.text, None, &state.gathered_context);

        let view = MessageView { text: &input.text, has_image: input.media_url.is_some() };
        let decision = self.router.decide(state, &view).await;
        let decision = self.router.commit(state, decision);
        state.routing_confidence = decision.confidence;

        debug!(
            event_name = "routing.decision_committed",
            action = ?decision.action,
            target = ?decision.target,
            confidence = decision.confidence,
            reason = decision.reason,
            thread_id = %state.channel_address,
            "routing decision committed"
        );
        self.audit.emit(
            AuditEvent::from_context(
                audit_ctx,
                "routing.decision_committed",
                AuditCategory::Routing,
                AuditOutcome::Success,
            )
            .with_metadata("action", format!("{:?}", decision.action))
            .with_metadata("confidence", format!("{:.2}", decision.confidence))
            .with_metadata("reason", decision.reason),
        );

        match decision.action {
            RoutingAction::Chat => {
                state.mode = ConversationMode::Chatting;
                state.current_step = ConversationStep::Greeting;
                let prompt = decision.prompt.unwrap_or(ChatPrompt::Generic);
                let text = self.composer.chat_reply(&prompt, input.customer_name.as_deref());
                Ok((Reply::text(text), None))
            }
            RoutingAction::Route => {
                let target = decision.target.unwrap_or(SpecialistTarget::ProductSearch);
                let entry = entry_step(target, view.has_image);
                state.mode = ConversationMode::Routing;

                self.audit.emit(
                    AuditEvent::from_context(
                        audit_ctx,
                        "routing.specialist_dispatched",
                        AuditCategory::Routing,
                        AuditOutcome::Success,
                    )
                    .with_metadata("entry_step", format!("{entry:?}")),
                );

                let ctx = ToolContext {
                    tenant_id: state.tenant_id.clone(),
                    boutique_name: tenant.name.clone(),
                    customer_id: state.customer_id.clone(),
                    channel_address: state.channel_address.clone(),
                    currency: tenant.currency.clone(),
                };

                let reply = self.run_chain(entry, target, state, input, &ctx).await?;
                state.mode = mode_for(state.current_step);
                Ok((reply, Some(entry)))
            }
        }
    }

    /// Bounded in-turn chain: the only designed multi-node traversal is
    /// image analysis -> product search -> recommendation.
    async fn run_chain(
        &self,
        entry: ConversationStep,
        target: SpecialistTarget,
        state: &mut ConversationState,
        input: &TurnInput,
        ctx: &ToolContext,
    ) -> Result<Reply, HandlerError> {
        let max_hops = self.router.policy().max_chain_hops;
        let mut step = entry;
        let mut hops = 0u8;

        loop {
            state.current_step = step;
            let StepOutcome { reply, next } =
                self.specialists.run(step, Some(target), state, input, ctx).await?;
            hops += 1;

            if let Some(reply) = reply {
                if let Some(parked) = next {
                    state.current_step = parked;
                }
                return Ok(reply);
            }

            match next {
                Some(next_step) if hops < max_hops => step = next_step,
                _ => {
                    warn!(
                        event_name = "turn.chain_exhausted",
                        hops,
                        step = ?step,
                        "specialist chain ended without a reply"
                    );
                    state.current_step = ConversationStep::Greeting;
                    return Ok(Reply::text(self.composer.fallback_reply()));
                }
            }
        }
    }
}

fn entry_step(target: SpecialistTarget, has_image: bool) -> ConversationStep {
    match target {
        SpecialistTarget::ProductSearch => {
            if has_image {
                ConversationStep::ImageAnalysis
            } else {
                ConversationStep::ProductSearch
            }
        }
        SpecialistTarget::CartAdd | SpecialistTarget::CartView => ConversationStep::CartManagement,
        SpecialistTarget::Checkout => ConversationStep::Checkout,
        SpecialistTarget::OrderStatus | SpecialistTarget::GeneralInquiry => {
            ConversationStep::GeneralInquiry
        }
    }
}

fn mode_for(step: ConversationStep) -> ConversationMode {
    match step {
        ConversationStep::SizeSelection | ConversationStep::Payment => {
            ConversationMode::SpecialistActive
        }
        _ => ConversationMode::Chatting,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use sokoni_core::audit::InMemoryAuditSink;
    use sokoni_core::domain::conversation::{
        ConversationMode, ConversationState, ConversationStep,
    };
    use sokoni_core::domain::customer::CustomerId;
    use sokoni_core::domain::product::{Product, ProductId};
    use sokoni_core::domain::tenant::{Tenant, TenantId};
    use sokoni_core::payments::{PaymentAck, PaymentError, PaymentGateway, PaymentStatus};
    use sokoni_core::stores::{CatalogQuery, CatalogStore, StoreError};
    use sokoni_db::repositories::{
        InMemoryCartRepository, InMemoryCatalogRepository, InMemoryOrderRepository,
    };

    use crate::handlers::{Specialists, TurnInput};
    use crate::llm::test_support::ScriptedLlmClient;
    use crate::router::{RoutingEngine, RoutingPolicy};
    use crate::tools::default_registry;

    use super::TurnRunner;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn initiate(
            &self,
            _phone: &str,
            _amount: Decimal,
            reference: &str,
        ) -> Result<PaymentAck, PaymentError> {
            Ok(PaymentAck { accepted: true, transaction_id: format!("TXN-{reference}"), mock: true })
        }

        async fn check_status(&self, _transaction_id: &str) -> Result<PaymentStatus, PaymentError> {
            Ok(PaymentStatus::Pending)
        }
    }

    struct BrokenCatalog;

    #[async_trait]
    impl CatalogStore for BrokenCatalog {
        async fn search(
            &self,
            _tenant_id: &TenantId,
            _query: &CatalogQuery,
        ) -> Result<Vec<Product>, StoreError> {
            Err(StoreError::Unavailable("catalog offline".to_string()))
        }

        async fn find_by_id(&self, _id: &ProductId) -> Result<Option<Product>, StoreError> {
            Err(StoreError::Unavailable("catalog offline".to_string()))
        }

        async fn available_stock(&self, _id: &ProductId, _size: &str) -> Result<u32, StoreError> {
            Err(StoreError::Unavailable("catalog offline".to_string()))
        }
    }

    struct Harness {
        runner: TurnRunner,
        audit: InMemoryAuditSink,
        tenant: Tenant,
        state: ConversationState,
    }

    impl Harness {
        async fn reply(&mut self, text: &str) -> super::TurnOutcome {
            self.turn(TurnInput {
                text: text.to_string(),
                media_url: None,
                customer_name: Some("Amina".to_string()),
            })
            .await
        }

        async fn turn(&mut self, input: TurnInput) -> super::TurnOutcome {
            self.runner.run_turn(&self.tenant, &mut self.state, &input, "req-test").await
        }

        fn dispatch_count(&self) -> usize {
            self.audit
                .events()
                .iter()
                .filter(|event| event.event_type == "routing.specialist_dispatched")
                .count()
        }
    }

    fn tenant_fixture() -> Tenant {
        Tenant {
            id: TenantId(Uuid::new_v4()),
            name: "Zawadi Boutique".to_string(),
            whatsapp_number: "whatsapp:+14155238886".to_string(),
            currency: "KES".to_string(),
            active: true,
        }
    }

    fn red_dress(tenant_id: &TenantId) -> Product {
        Product {
            id: ProductId(Uuid::new_v4()),
            tenant_id: tenant_id.clone(),
            name: "Red Maxi Dress".to_string(),
            description: Some("Flowing red maxi dress for weddings".to_string()),
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

    async fn harness_with_products(products: Vec<Product>) -> Harness {
        let tenant = tenant_fixture();
        let catalog = Arc::new(InMemoryCatalogRepository::default());
        for mut product in products {
            product.tenant_id = tenant.id.clone();
            catalog.insert(product).await;
        }
        harness_with_catalog(tenant, catalog).await
    }

    async fn harness_with_catalog(
        tenant: Tenant,
        catalog: Arc<dyn CatalogStore>,
    ) -> Harness {
        let cart = Arc::new(InMemoryCartRepository::default());
        let orders = Arc::new(InMemoryOrderRepository::default());
        let registry = Arc::new(default_registry(
            catalog.clone(),
            cart,
            orders.clone(),
            Arc::new(MockGateway),
        ));
        // Scripted model with nothing scripted: every model consult
        // fails, exercising the deterministic tiers and fallbacks.
        let llm = Arc::new(ScriptedLlmClient::failing());

        let specialists = Specialists::new(catalog, orders, llm.clone(), registry);
        let router = RoutingEngine::new(llm, RoutingPolicy::default());
        let audit = InMemoryAuditSink::default();
        let runner = TurnRunner::new(router, specialists, Arc::new(audit.clone()));

        let state = ConversationState::new(
            tenant.id.clone(),
            CustomerId(Uuid::new_v4()),
            "+254712345678",
        );

        Harness { runner, audit, tenant, state }
    }

    #[tokio::test]
    async fn greeting_scenario_welcomes_and_stays_in_greeting() {
        let mut harness = harness_with_products(Vec::new()).await;
        let outcome = harness.reply("hi").await;

        assert!(outcome.reply_text.contains("Welcome"));
        assert_eq!(harness.state.current_step, ConversationStep::Greeting);
        assert_eq!(harness.state.mode, ConversationMode::Chatting);
        assert_eq!(harness.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn vague_request_asks_for_one_missing_slot() {
        let mut harness = harness_with_products(Vec::new()).await;
        let outcome = harness.reply("I need something").await;

        assert!(outcome.reply_text.to_ascii_lowercase().contains("what kind of piece"));
        assert_eq!(harness.state.mode, ConversationMode::Chatting);
        assert!(harness.state.routing_confidence <= 0.75);
        assert_eq!(harness.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn specific_request_routes_to_search_and_recommends() {
        let tenant = tenant_fixture();
        let mut harness = harness_with_products(vec![red_dress(&tenant.id)]).await;

        let outcome = harness.reply("red dress for a wedding").await;

        let context = &harness.state.gathered_context;
        assert_eq!(context.product_type.as_deref(), Some("dress"));
        assert_eq!(context.color.as_deref(), Some("red"));
        assert_eq!(context.occasion.as_deref(), Some("wedding"));
        assert!(harness.state.routing_confidence > 0.75);

        assert!(outcome.reply_text.contains("Red Maxi Dress"));
        assert_eq!(outcome.reply_media, vec!["https://cdn.example.com/red-maxi.jpg".to_string()]);
        assert_eq!(harness.state.found_items.len(), 1);
        assert_eq!(harness.state.current_step, ConversationStep::Recommendation);
        assert_eq!(harness.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn cart_add_without_size_parks_in_size_selection() {
        let tenant = tenant_fixture();
        let mut harness = harness_with_products(vec![red_dress(&tenant.id)]).await;

        harness.reply("red dress for a wedding").await;
        let outcome = harness.reply("I'll take the Red Maxi Dress").await;

        assert!(outcome.reply_text.contains("What size"));
        assert!(outcome.reply_text.contains("S, M, L"));
        assert_eq!(harness.state.current_step, ConversationStep::SizeSelection);
        assert_eq!(harness.state.mode, ConversationMode::SpecialistActive);
        assert!(harness.state.selected_product_id.is_some());
    }

    #[tokio::test]
    async fn size_reply_completes_the_cart_add() {
        let tenant = tenant_fixture();
        let mut harness = harness_with_products(vec![red_dress(&tenant.id)]).await;

        harness.reply("red dress for a wedding").await;
        harness.reply("I'll take the Red Maxi Dress").await;
        let outcome = harness.reply("M please").await;

        assert!(outcome.reply_text.contains("Added to cart"));
        assert_eq!(harness.state.cart_snapshot.len(), 1);
        assert_eq!(harness.state.cart_snapshot[0].size, "M");
        assert_eq!(harness.state.current_step, ConversationStep::Recommendation);
    }

    #[tokio::test]
    async fn checkout_with_empty_cart_never_touches_payment() {
        let mut harness = harness_with_products(Vec::new()).await;
        let outcome = harness.reply("checkout").await;

        assert!(outcome.reply_text.contains("cart is empty"));
        assert!(harness.state.cart_snapshot.is_empty());
        // No order was created, so there is nothing awaiting payment.
        assert_ne!(harness.state.current_step, ConversationStep::Payment);
    }

    #[tokio::test]
    async fn full_checkout_initiates_payment_and_resets_context() {
        let tenant = tenant_fixture();
        let mut harness = harness_with_products(vec![red_dress(&tenant.id)]).await;

        harness.reply("red dress for a wedding").await;
        harness.reply("I'll take the Red Maxi Dress in size M").await;
        let outcome = harness.reply("checkout please").await;

        assert!(outcome.reply_text.contains("Payment simulated"));
        assert_eq!(harness.state.current_step, ConversationStep::Payment);
        assert!(harness.state.gathered_context.is_empty(), "context resets when the mission ends");
    }

    #[tokio::test]
    async fn turn_index_increments_exactly_once_per_message() {
        let mut harness = harness_with_products(Vec::new()).await;
        assert_eq!(harness.state.turn_index, 0);

        harness.reply("hi").await;
        assert_eq!(harness.state.turn_index, 1);
        harness.reply("I need something").await;
        assert_eq!(harness.state.turn_index, 2);
        harness.reply("checkout").await;
        assert_eq!(harness.state.turn_index, 3);
    }

    #[tokio::test]
    async fn at_most_one_specialist_dispatch_per_turn() {
        let tenant = tenant_fixture();
        let mut harness = harness_with_products(vec![red_dress(&tenant.id)]).await;

        harness.reply("hi").await;
        harness.reply("red dress for a wedding").await;
        harness.reply("view cart").await;
        harness.reply("checkout").await;

        // Four turns, three of them routed; never two dispatches in one.
        assert_eq!(harness.dispatch_count(), 3);
    }

    #[tokio::test]
    async fn history_alternates_roles_across_turns() {
        let mut harness = harness_with_products(Vec::new()).await;
        harness.reply("hi").await;
        harness.reply("I need something").await;

        let history = &harness.state.conversation_history;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text, "hi");
        assert!(history[1].text.contains("Welcome"));
    }

    #[tokio::test]
    async fn store_outage_still_produces_a_reply_in_a_safe_state() {
        let tenant = tenant_fixture();
        let mut harness = harness_with_catalog(tenant, Arc::new(BrokenCatalog)).await;

        let outcome = harness.reply("red dress for a wedding").await;

        assert!(!outcome.reply_text.is_empty());
        // The search tool failure surfaces as "no results", a recovered
        // reply rather than a crash.
        assert_eq!(harness.state.current_step, ConversationStep::Greeting);
        assert_eq!(harness.state.turn_index, 1);
    }

    #[tokio::test]
    async fn image_message_runs_the_designed_one_shot_pipeline() {
        let tenant = tenant_fixture();
        let catalog = Arc::new(InMemoryCatalogRepository::default());
        catalog.insert(red_dress(&tenant.id)).await;

        // Build a harness whose model answers the vision call.
        let cart = Arc::new(InMemoryCartRepository::default());
        let orders = Arc::new(InMemoryOrderRepository::default());
        let registry = Arc::new(default_registry(
            catalog.clone(),
            cart,
            orders.clone(),
            Arc::new(MockGateway),
        ));
        let llm = Arc::new(ScriptedLlmClient::with_script(vec![
            Ok("red maxi dress".to_string()),       // vision description
            Err("model down".to_string()),          // recommendation phrasing fails -> fallback
        ]));
        let specialists = Specialists::new(catalog.clone(), orders, llm.clone(), registry);
        let router = RoutingEngine::new(llm, RoutingPolicy::default());
        let audit = InMemoryAuditSink::default();
        let runner = TurnRunner::new(router, specialists, Arc::new(audit.clone()));
        let mut state = ConversationState::new(
            tenant.id.clone(),
            CustomerId(Uuid::new_v4()),
            "+254712345678",
        );

        let input = TurnInput {
            text: "what about this one?".to_string(),
            media_url: Some("https://media.example.com/photo.jpg".to_string()),
            customer_name: None,
        };
        let outcome = runner.run_turn(&tenant, &mut state, &input, "req-img").await;

        assert!(outcome.reply_text.contains("Red Maxi Dress"));
        assert_eq!(state.current_step, ConversationStep::Recommendation);
        let dispatches = audit
            .events()
            .iter()
            .filter(|event| event.event_type == "routing.specialist_dispatched")
            .count();
        assert_eq!(dispatches, 1, "the three-node pipeline is one dispatch");
    }

    #[tokio::test]
    async fn inquiry_runs_model_signaled_tool_calls_and_folds_results() {
        let tenant = tenant_fixture();
        let catalog = Arc::new(InMemoryCatalogRepository::default());
        catalog.insert(red_dress(&tenant.id)).await;

        let cart = Arc::new(InMemoryCartRepository::default());
        let orders = Arc::new(InMemoryOrderRepository::default());
        let registry = Arc::new(default_registry(
            catalog.clone(),
            cart,
            orders.clone(),
            Arc::new(MockGateway),
        ));
        // The model answers the inquiry and signals one good call plus
        // one unknown tool; the bad call must not break the turn.
        let completion = serde_json::json!({
            "reply_text": "We're open Mon-Sat 9am-7pm! Here's what you've picked so far.",
            "intent": "general_inquiry",
            "actions": [
                { "tool": "get_cart_summary", "params": {} },
                { "tool": "summon_unicorn", "params": {} },
            ],
            "entities": {}
        })
        .to_string();
        let llm = Arc::new(ScriptedLlmClient::with_script(vec![Ok(completion)]));
        let specialists = Specialists::new(catalog, orders, llm.clone(), registry);
        let router = RoutingEngine::new(llm, RoutingPolicy::default());
        let audit = InMemoryAuditSink::default();
        let runner = TurnRunner::new(router, specialists, Arc::new(audit.clone()));
        let mut state = ConversationState::new(
            tenant.id.clone(),
            CustomerId(Uuid::new_v4()),
            "+254712345678",
        );

        let input = TurnInput {
            text: "what's your return policy?".to_string(),
            media_url: None,
            customer_name: None,
        };
        let outcome = runner.run_turn(&tenant, &mut state, &input, "req-inq").await;

        assert!(outcome.reply_text.contains("Mon-Sat"));
        assert_eq!(state.current_step, ConversationStep::GeneralInquiry);
        // The successful cart summary folded into the snapshot (empty cart).
        assert!(state.cart_snapshot.is_empty());
    }

    #[tokio::test]
    async fn greeting_with_actionable_context_still_chats() {
        let tenant = tenant_fixture();
        let mut harness = harness_with_products(vec![red_dress(&tenant.id)]).await;

        harness.reply("red dress for a wedding").await;
        let outcome = harness.reply("hi").await;

        assert!(outcome.reply_text.contains("Welcome"));
        assert_eq!(harness.state.current_step, ConversationStep::Greeting);
    }
}
