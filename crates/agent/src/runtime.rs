use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use sokoni_core::domain::conversation::{ConversationState, MessageRole, ThreadKey};
use sokoni_core::domain::customer::{Customer, CustomerId};
use sokoni_core::domain::tenant::Tenant;
use sokoni_core::stores::{CheckpointStore, CustomerStore, StoreError};

use crate::graph::{TurnOutcome, TurnRunner};
use crate::handlers::TurnInput;

/// One inbound channel message, already resolved to a tenant.
#[derive(Clone, Debug)]
pub struct InboundTurn {
    pub tenant: Tenant,
    pub from_address: String,
    pub text: String,
    pub media_url: Option<String>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub media: Vec<String>,
    /// True when the turn ran without cross-turn memory (store outage).
    pub degraded: bool,
}

/// Process-scoped orchestrator: owns the per-thread turn serialization,
/// checkpoint loading/saving and the stateless degradation path.
/// Construct once at bootstrap and share.
pub struct AgentRuntime {
    runner: TurnRunner,
    checkpoint: Arc<dyn CheckpointStore>,
    customers: Arc<dyn CustomerStore>,
    locks: Mutex<HashMap<ThreadKey, Arc<Mutex<()>>>>,
    store_timeout: Duration,
}

impl AgentRuntime {
    pub fn new(
        runner: TurnRunner,
        checkpoint: Arc<dyn CheckpointStore>,
        customers: Arc<dyn CustomerStore>,
    ) -> Self {
        Self {
            runner,
            checkpoint,
            customers,
            locks: Mutex::new(HashMap::new()),
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Messages for the same thread queue behind the in-flight turn;
    /// distinct threads run fully in parallel.
    async fn thread_lock(&self, thread: &ThreadKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(thread.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn handle_message(&self, inbound: InboundTurn) -> TurnReply {
        let thread = ThreadKey::new(inbound.tenant.id.clone(), inbound.from_address.clone());
        let lock = self.thread_lock(&thread).await;
        let _turn_guard = lock.lock().await;

        let mut degraded = false;

        let customer = match timeout(
            self.store_timeout,
            self.customers.get_or_create(&inbound.tenant.id, &inbound.from_address),
        )
        .await
        {
            Ok(Ok(customer)) => Some(customer),
            Ok(Err(error)) => {
                warn!(
                    event_name = "runtime.customer_unavailable",
                    correlation_id = %inbound.correlation_id,
                    thread_id = %inbound.from_address,
                    error = %error,
                    "customer store failed; continuing stateless"
                );
                None
            }
            Err(_) => {
                warn!(
                    event_name = "runtime.customer_timeout",
                    correlation_id = %inbound.correlation_id,
                    thread_id = %inbound.from_address,
                    "customer store timed out; continuing stateless"
                );
                None
            }
        };
        if customer.is_none() {
            degraded = true;
        }

        let loaded = if degraded {
            None
        } else {
            match timeout(self.store_timeout, self.checkpoint.load(&thread)).await {
                Ok(Ok(state)) => state,
                Ok(Err(error)) => {
                    warn!(
                        event_name = "runtime.checkpoint_load_failed",
                        correlation_id = %inbound.correlation_id,
                        thread_id = %inbound.from_address,
                        error = %error,
                        "checkpoint load failed; running without memory"
                    );
                    degraded = true;
                    None
                }
                Err(_) => {
                    warn!(
                        event_name = "runtime.checkpoint_load_timeout",
                        correlation_id = %inbound.correlation_id,
                        thread_id = %inbound.from_address,
                        "checkpoint load timed out; running without memory"
                    );
                    degraded = true;
                    None
                }
            }
        };

        let mut state = loaded.unwrap_or_else(|| {
            fresh_state(&inbound.tenant, customer.as_ref(), &inbound.from_address)
        });
        let expected_turn = state.turn_index;

        let input = TurnInput {
            text: inbound.text.clone(),
            media_url: inbound.media_url.clone(),
            customer_name: customer.as_ref().and_then(|customer| customer.name.clone()),
        };

        let outcome =
            self.runner.run_turn(&inbound.tenant, &mut state, &input, &inbound.correlation_id).await;

        if !degraded {
            degraded = !self
                .persist_turn(&thread, &state, expected_turn, &inbound, &outcome)
                .await;
        }

        info!(
            event_name = "runtime.turn_completed",
            correlation_id = %inbound.correlation_id,
            thread_id = %inbound.from_address,
            turn_index = state.turn_index,
            current_step = ?state.current_step,
            degraded,
            "turn completed"
        );

        TurnReply { text: outcome.reply_text, media: outcome.reply_media, degraded }
    }

    /// Returns false when the checkpoint could not be stored and the
    /// turn effectively ran stateless.
    async fn persist_turn(
        &self,
        thread: &ThreadKey,
        state: &ConversationState,
        expected_turn: u32,
        inbound: &InboundTurn,
        outcome: &TurnOutcome,
    ) -> bool {
        match timeout(self.store_timeout, self.checkpoint.save(thread, state, expected_turn)).await
        {
            Ok(Ok(())) => {
                self.append_transcript(thread, inbound, outcome).await;
                true
            }
            Ok(Err(StoreError::CheckpointConflict { expected, found })) => {
                warn!(
                    event_name = "runtime.checkpoint_conflict",
                    correlation_id = %inbound.correlation_id,
                    thread_id = %inbound.from_address,
                    expected,
                    found,
                    "overlapping turn detected; this turn's state was not stored"
                );
                false
            }
            Ok(Err(error)) => {
                warn!(
                    event_name = "runtime.checkpoint_save_failed",
                    correlation_id = %inbound.correlation_id,
                    thread_id = %inbound.from_address,
                    error = %error,
                    "checkpoint save failed; reply still delivered"
                );
                false
            }
            Err(_) => {
                warn!(
                    event_name = "runtime.checkpoint_save_timeout",
                    correlation_id = %inbound.correlation_id,
                    thread_id = %inbound.from_address,
                    "checkpoint save timed out; reply still delivered"
                );
                false
            }
        }
    }

    /// Transcript rows are operational niceties; losing one never fails
    /// the turn.
    async fn append_transcript(
        &self,
        thread: &ThreadKey,
        inbound: &InboundTurn,
        outcome: &TurnOutcome,
    ) {
        let user = self.checkpoint.append_message(
            thread,
            MessageRole::User,
            &inbound.text,
            inbound.media_url.as_deref(),
        );
        match timeout(self.store_timeout, user).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                event_name = "runtime.transcript_append_failed",
                thread_id = %inbound.from_address,
                error = %error,
                "user transcript row not stored"
            ),
            Err(_) => warn!(
                event_name = "runtime.transcript_append_timeout",
                thread_id = %inbound.from_address,
                "user transcript append timed out"
            ),
        }

        let assistant = self.checkpoint.append_message(
            thread,
            MessageRole::Assistant,
            &outcome.reply_text,
            outcome.reply_media.first().map(String::as_str),
        );
        match timeout(self.store_timeout, assistant).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                event_name = "runtime.transcript_append_failed",
                thread_id = %inbound.from_address,
                error = %error,
                "assistant transcript row not stored"
            ),
            Err(_) => warn!(
                event_name = "runtime.transcript_append_timeout",
                thread_id = %inbound.from_address,
                "assistant transcript append timed out"
            ),
        }
    }
}

fn fresh_state(
    tenant: &Tenant,
    customer: Option<&Customer>,
    from_address: &str,
) -> ConversationState {
    let customer_id = customer
        .map(|customer| customer.id.clone())
        .unwrap_or_else(|| CustomerId(uuid::Uuid::new_v4()));
    ConversationState::new(tenant.id.clone(), customer_id, from_address)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use sokoni_core::audit::InMemoryAuditSink;
    use sokoni_core::domain::tenant::{Tenant, TenantId};
    use sokoni_core::stores::CheckpointStore;
    use sokoni_db::repositories::{
        InMemoryCartRepository, InMemoryCatalogRepository, InMemoryCheckpointRepository,
        InMemoryCustomerRepository, InMemoryOrderRepository,
    };

    use crate::graph::TurnRunner;
    use crate::handlers::Specialists;
    use crate::llm::test_support::ScriptedLlmClient;
    use crate::router::{RoutingEngine, RoutingPolicy};
    use crate::tools::default_registry;

    use super::{AgentRuntime, InboundTurn};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use sokoni_core::payments::{PaymentAck, PaymentError, PaymentGateway, PaymentStatus};

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

    fn tenant_fixture() -> Tenant {
        Tenant {
            id: TenantId(Uuid::new_v4()),
            name: "Zawadi Boutique".to_string(),
            whatsapp_number: "whatsapp:+14155238886".to_string(),
            currency: "KES".to_string(),
            active: true,
        }
    }

    fn runner_fixture() -> TurnRunner {
        let catalog = Arc::new(InMemoryCatalogRepository::default());
        let orders = Arc::new(InMemoryOrderRepository::default());
        let registry = Arc::new(default_registry(
            catalog.clone(),
            Arc::new(InMemoryCartRepository::default()),
            orders.clone(),
            Arc::new(MockGateway),
        ));
        let llm = Arc::new(ScriptedLlmClient::failing());
        let specialists = Specialists::new(catalog, orders, llm.clone(), registry);
        let router = RoutingEngine::new(llm, RoutingPolicy::default());
        TurnRunner::new(router, specialists, Arc::new(InMemoryAuditSink::default()))
    }

    fn runtime_with_checkpoint(checkpoint: Arc<dyn CheckpointStore>) -> AgentRuntime {
        AgentRuntime::new(
            runner_fixture(),
            checkpoint,
            Arc::new(InMemoryCustomerRepository::default()),
        )
    }

    fn inbound(tenant: &Tenant, text: &str) -> InboundTurn {
        InboundTurn {
            tenant: tenant.clone(),
            from_address: "+254712345678".to_string(),
            text: text.to_string(),
            media_url: None,
            correlation_id: format!("req-{}", text.len()),
        }
    }

    #[tokio::test]
    async fn context_survives_across_runtime_instances() {
        let tenant = tenant_fixture();
        let checkpoint = Arc::new(InMemoryCheckpointRepository::default());

        let first = runtime_with_checkpoint(checkpoint.clone());
        let reply = first.handle_message(inbound(&tenant, "I want a dress")).await;
        assert!(!reply.degraded);

        // A new runtime (fresh process) resumes from the checkpoint.
        let second = runtime_with_checkpoint(checkpoint.clone());
        second.handle_message(inbound(&tenant, "something elegant, in red")).await;

        let thread = sokoni_core::domain::conversation::ThreadKey::new(
            tenant.id.clone(),
            "+254712345678",
        );
        let state = checkpoint.load(&thread).await.expect("load").expect("state present");
        assert_eq!(state.turn_index, 2);
        assert_eq!(state.gathered_context.product_type.as_deref(), Some("dress"));
        assert_eq!(state.gathered_context.color.as_deref(), Some("red"));
        assert_eq!(state.gathered_context.style.as_deref(), Some("elegant"));
        assert_eq!(state.conversation_history.len(), 4);
    }

    #[tokio::test]
    async fn store_outage_degrades_to_stateless_but_still_replies() {
        let tenant = tenant_fixture();
        let checkpoint =
            Arc::new(sokoni_db::repositories::memory::UnavailableCheckpointRepository);

        let runtime = runtime_with_checkpoint(checkpoint);
        let reply = runtime.handle_message(inbound(&tenant, "hi")).await;

        assert!(reply.degraded);
        assert!(!reply.text.is_empty());
        assert!(reply.text.contains("Welcome"));
    }

    #[tokio::test]
    async fn concurrent_messages_for_one_thread_do_not_lose_turns() {
        let tenant = tenant_fixture();
        let checkpoint = Arc::new(InMemoryCheckpointRepository::default());
        let runtime = Arc::new(runtime_with_checkpoint(checkpoint.clone()));

        let left = {
            let runtime = runtime.clone();
            let message = inbound(&tenant, "I want a dress");
            tokio::spawn(async move { runtime.handle_message(message).await })
        };
        let right = {
            let runtime = runtime.clone();
            let message = inbound(&tenant, "make it red");
            tokio::spawn(async move { runtime.handle_message(message).await })
        };

        let (left, right) = (left.await.expect("join"), right.await.expect("join"));
        assert!(!left.degraded);
        assert!(!right.degraded);

        let thread = sokoni_core::domain::conversation::ThreadKey::new(
            tenant.id.clone(),
            "+254712345678",
        );
        let state = checkpoint.load(&thread).await.expect("load").expect("state present");
        assert_eq!(state.turn_index, 2, "both turns must be serialized, not lost");
        assert_eq!(state.gathered_context.product_type.as_deref(), Some("dress"));
        assert_eq!(state.gathered_context.color.as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn transcript_rows_are_appended_per_turn() {
        let tenant = tenant_fixture();
        let checkpoint = Arc::new(InMemoryCheckpointRepository::default());
        let runtime = runtime_with_checkpoint(checkpoint.clone());

        runtime.handle_message(inbound(&tenant, "hi")).await;

        let thread = sokoni_core::domain::conversation::ThreadKey::new(
            tenant.id.clone(),
            "+254712345678",
        );
        assert_eq!(checkpoint.message_count(&thread).await, 2);
    }

    #[tokio::test]
    async fn distinct_threads_are_independent() {
        let tenant = tenant_fixture();
        let checkpoint = Arc::new(InMemoryCheckpointRepository::default());
        let runtime = runtime_with_checkpoint(checkpoint.clone());

        runtime.handle_message(inbound(&tenant, "I want a dress")).await;

        let mut other = inbound(&tenant, "hello");
        other.from_address = "+254733000111".to_string();
        runtime.handle_message(other).await;

        let first = sokoni_core::domain::conversation::ThreadKey::new(
            tenant.id.clone(),
            "+254712345678",
        );
        let second = sokoni_core::domain::conversation::ThreadKey::new(
            tenant.id.clone(),
            "+254733000111",
        );

        let first_state = checkpoint.load(&first).await.expect("load").expect("present");
        let second_state = checkpoint.load(&second).await.expect("load").expect("present");
        assert_eq!(first_state.turn_index, 1);
        assert_eq!(second_state.turn_index, 1);
        assert_eq!(second_state.gathered_context.product_type, None);
    }
}
