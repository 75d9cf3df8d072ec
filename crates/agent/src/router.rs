use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use sokoni_core::config::RoutingConfig;
use sokoni_core::domain::conversation::{
    ConversationState, ConversationStep, GatheredContext, HistoryEntry, Slot,
};

use crate::llm::{parse_json_object, LlmClient};

/// The single home of intent classification. Greeting detection and the
/// cart/checkout verb lists live here and nowhere else; every other
/// component consumes the decision as data.
pub struct RoutingEngine {
    llm: Arc<dyn LlmClient>,
    policy: RoutingPolicy,
}

#[derive(Clone, Debug)]
pub struct RoutingPolicy {
    pub route_confidence_threshold: f32,
    pub history_window: usize,
    pub direct_prompt_after_turns: u32,
    pub max_chain_hops: u8,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            route_confidence_threshold: 0.75,
            history_window: 5,
            direct_prompt_after_turns: 3,
            max_chain_hops: 3,
        }
    }
}

impl From<&RoutingConfig> for RoutingPolicy {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            route_confidence_threshold: config.route_confidence_threshold,
            history_window: config.history_window,
            direct_prompt_after_turns: config.direct_prompt_after_turns,
            max_chain_hops: config.max_chain_hops,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingAction {
    Chat,
    Route,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecialistTarget {
    ProductSearch,
    CartAdd,
    CartView,
    Checkout,
    OrderStatus,
    GeneralInquiry,
}

/// What the composer should say when the committed action is `Chat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatPrompt {
    Welcome,
    AskSlot(Slot),
    DirectOffer,
    Generic,
    Custom(String),
}

#[derive(Clone, Debug)]
pub struct RoutingDecision {
    pub action: RoutingAction,
    pub confidence: f32,
    pub target: Option<SpecialistTarget>,
    pub prompt: Option<ChatPrompt>,
    pub reason: &'static str,
}

impl RoutingDecision {
    fn chat(confidence: f32, prompt: ChatPrompt, reason: &'static str) -> Self {
        Self { action: RoutingAction::Chat, confidence, target: None, prompt: Some(prompt), reason }
    }

    fn route(confidence: f32, target: SpecialistTarget, reason: &'static str) -> Self {
        Self { action: RoutingAction::Route, confidence, target: Some(target), prompt: None, reason }
    }
}

/// Everything the router needs to know about the inbound message.
#[derive(Clone, Debug)]
pub struct MessageView<'a> {
    pub text: &'a str,
    pub has_image: bool,
}

impl RoutingEngine {
    pub fn new(llm: Arc<dyn LlmClient>, policy: RoutingPolicy) -> Self {
        Self { llm, policy }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Produce the raw decision for this turn. Never errors: a failed or
    /// malformed model consult degrades to a conservative chat decision.
    pub async fn decide(
        &self,
        state: &ConversationState,
        message: &MessageView<'_>,
    ) -> RoutingDecision {
        let text = message.text.trim();
        let normalized = text.to_ascii_lowercase();
        let tokens: Vec<&str> = normalized
            .split(|ch: char| !ch.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .collect();

        // A bare greeting wins over everything, including slot inference,
        // so "hi" never false-dispatches a specialist.
        if is_bare_greeting(&tokens) {
            return RoutingDecision::chat(0.95, ChatPrompt::Welcome, "bare greeting");
        }

        if contains_phrase(&normalized, CHECKOUT_PHRASES) {
            return RoutingDecision::route(0.9, SpecialistTarget::Checkout, "explicit checkout verb");
        }
        if contains_phrase(&normalized, VIEW_CART_PHRASES) {
            return RoutingDecision::route(0.9, SpecialistTarget::CartView, "explicit view-cart verb");
        }
        if contains_phrase(&normalized, ADD_TO_CART_PHRASES) {
            return RoutingDecision::route(0.85, SpecialistTarget::CartAdd, "explicit add verb");
        }
        if contains_phrase(&normalized, ORDER_STATUS_PHRASES) {
            return RoutingDecision::route(0.85, SpecialistTarget::OrderStatus, "order status query");
        }
        if contains_phrase(&normalized, INQUIRY_PHRASES) {
            return RoutingDecision::route(0.8, SpecialistTarget::GeneralInquiry, "store inquiry");
        }

        // A pending size selection continues the cart exchange; explicit
        // verbs above can still bail the customer out of it.
        if state.current_step == ConversationStep::SizeSelection
            && state.selected_product_id.is_some()
        {
            return RoutingDecision::route(0.9, SpecialistTarget::CartAdd, "size selection reply");
        }

        // A product photo is as unambiguous as text ever gets.
        if message.has_image {
            return RoutingDecision::route(0.9, SpecialistTarget::ProductSearch, "inbound image");
        }

        if state.gathered_context.is_actionable() {
            return RoutingDecision::route(
                0.85,
                SpecialistTarget::ProductSearch,
                "category plus qualifying attribute",
            );
        }

        self.consult_model(state, text).await
    }

    /// The ambiguous middle ground goes to the reasoning model; its
    /// output is data, parsed defensively.
    async fn consult_model(&self, state: &ConversationState, text: &str) -> RoutingDecision {
        let prompt = decision_prompt(state, text, self.policy.history_window);

        let fallback = || {
            RoutingDecision::chat(
                0.3,
                self.clarifying_prompt(state, &state.gathered_context),
                "decision source unavailable",
            )
        };

        let raw = match self.llm.generate(&prompt, None).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(event_name = "routing.model_unavailable", error = %error, "decision model failed; continuing chat");
                return fallback();
            }
        };

        let decision = match parse_json_object(&raw) {
            Ok(decision) => decision,
            Err(error) => {
                warn!(event_name = "routing.model_malformed", error = %error, "decision payload malformed; continuing chat");
                return fallback();
            }
        };

        let confidence = decision
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|value| value.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.3);

        match decision.get("action").and_then(Value::as_str) {
            Some("route") => {
                let target = decision
                    .get("route_to")
                    .and_then(Value::as_str)
                    .and_then(target_from_name);
                match target {
                    Some(target) => RoutingDecision {
                        action: RoutingAction::Route,
                        confidence,
                        target: Some(target),
                        prompt: None,
                        reason: "model routed",
                    },
                    None => fallback(),
                }
            }
            Some("chat") => {
                let prompt = decision
                    .get("next_question")
                    .and_then(Value::as_str)
                    .map(|question| ChatPrompt::Custom(question.to_string()))
                    .unwrap_or_else(|| self.clarifying_prompt(state, &state.gathered_context));
                RoutingDecision {
                    action: RoutingAction::Chat,
                    confidence,
                    target: None,
                    prompt: Some(prompt),
                    reason: "model chose chat",
                }
            }
            _ => fallback(),
        }
    }

    /// One missing slot per turn; longer conversations get a direct
    /// offer instead of yet another question.
    pub fn clarifying_prompt(&self, state: &ConversationState, context: &GatheredContext) -> ChatPrompt {
        if state.turn_index >= self.policy.direct_prompt_after_turns {
            return ChatPrompt::DirectOffer;
        }
        match next_missing_slot(context) {
            Some(slot) => ChatPrompt::AskSlot(slot),
            None => ChatPrompt::Generic,
        }
    }

    /// The confidence gate: a routed decision at or below the threshold
    /// is demoted to chat, whatever the inner decision said.
    pub fn commit(&self, state: &ConversationState, decision: RoutingDecision) -> RoutingDecision {
        if decision.action == RoutingAction::Route
            && decision.confidence <= self.policy.route_confidence_threshold
        {
            return RoutingDecision {
                action: RoutingAction::Chat,
                confidence: decision.confidence,
                target: None,
                prompt: Some(self.clarifying_prompt(state, &state.gathered_context)),
                reason: "confidence below dispatch threshold",
            };
        }
        decision
    }
}

pub fn next_missing_slot(context: &GatheredContext) -> Option<Slot> {
    [Slot::ProductType, Slot::Color, Slot::Occasion, Slot::Style, Slot::Size, Slot::PriceRange]
        .into_iter()
        .find(|slot| context.get(*slot).is_none())
}

fn target_from_name(name: &str) -> Option<SpecialistTarget> {
    match name {
        "product_search" => Some(SpecialistTarget::ProductSearch),
        "cart" => Some(SpecialistTarget::CartAdd),
        "checkout" => Some(SpecialistTarget::Checkout),
        "general_inquiry" => Some(SpecialistTarget::GeneralInquiry),
        _ => None,
    }
}

const GREETINGS: &[&str] =
    &["hi", "hello", "hey", "hallo", "jambo", "habari", "sasa", "mambo", "niaje"];

const CHECKOUT_PHRASES: &[&str] =
    &["checkout", "check out", "pay now", "proceed to payment", "buy now", "complete my order"];

const VIEW_CART_PHRASES: &[&str] =
    &["view cart", "show cart", "my cart", "whats in my cart", "what's in my cart", "cart summary"];

const ADD_TO_CART_PHRASES: &[&str] =
    &["add to cart", "i'll take", "ill take", "i want the", "i'll buy", "add the"];

const ORDER_STATUS_PHRASES: &[&str] = &[
    "order status",
    "where is my order",
    "track my order",
    "my orders",
    "order history",
    "has my order shipped",
];

const INQUIRY_PHRASES: &[&str] = &[
    "opening hours",
    "what time do you open",
    "where are you located",
    "your location",
    "return policy",
    "refund",
    "delivery fee",
    "do you deliver",
    "contact",
];

fn is_bare_greeting(tokens: &[&str]) -> bool {
    !tokens.is_empty() && tokens.len() <= 3 && tokens.iter().any(|token| GREETINGS.contains(token))
}

fn contains_phrase(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| normalized.contains(phrase))
}

fn decision_prompt(state: &ConversationState, text: &str, window: usize) -> String {
    let history = state
        .recent_history(window)
        .iter()
        .map(|HistoryEntry { role, text }| format!("{role:?}: {text}"))
        .collect::<Vec<_>>()
        .join("\n");
    let context = serde_json::to_string(&state.gathered_context).unwrap_or_else(|_| "{}".into());

    format!(
        "You are the routing assistant for a fashion boutique. Decide whether to keep \
         chatting to gather context, or hand off to a specialist.\n\n\
         Current message: \"{text}\"\n\n\
         Conversation so far:\n{history}\n\n\
         Context gathered: {context}\n\
         Cart items: {cart}\n\
         Products shown: {found}\n\
         Turn: {turn}\n\n\
         Route only when the goal is unambiguous. Valid targets: product_search, cart, \
         checkout, general_inquiry.\n\n\
         Return ONLY JSON (no markdown):\n\
         {{\"action\": \"chat\" or \"route\", \"confidence\": 0.0 to 1.0, \
         \"route_to\": \"product_search\" or null, \"next_question\": \"...\" or null}}",
        cart = state.cart_snapshot.len(),
        found = state.found_items.len(),
        turn = state.turn_index,
    )
}
