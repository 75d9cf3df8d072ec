use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cart::CartLine;
use crate::domain::customer::CustomerId;
use crate::domain::product::{Product, ProductId};
use crate::domain::tenant::TenantId;

/// Persistent identity of one ongoing conversation: tenant plus the
/// customer's channel address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub tenant_id: TenantId,
    pub channel_address: String,
}

impl ThreadKey {
    pub fn new(tenant_id: TenantId, channel_address: impl Into<String>) -> Self {
        Self { tenant_id, channel_address: channel_address.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    Greeting,
    ImageAnalysis,
    ProductSearch,
    Recommendation,
    SizeSelection,
    CartManagement,
    Checkout,
    Payment,
    GeneralInquiry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Chatting,
    Routing,
    SpecialistActive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub text: String,
}

/// The slot set the extractor fills from free text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    ProductType,
    Color,
    Occasion,
    Style,
    Size,
    PriceRange,
}

impl Slot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProductType => "product_type",
            Self::Color => "color",
            Self::Occasion => "occasion",
            Self::Style => "style",
            Self::Size => "size",
            Self::PriceRange => "price_range",
        }
    }
}

/// Structured context accumulated across chat turns. Values only move
/// from unset to set, or from one explicit value to another; an absent
/// extraction never clears a slot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatheredContext {
    pub product_type: Option<String>,
    pub color: Option<String>,
    pub occasion: Option<String>,
    pub style: Option<String>,
    pub size: Option<String>,
    pub price_range: Option<String>,
}

impl GatheredContext {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::ProductType => self.product_type.as_deref(),
            Slot::Color => self.color.as_deref(),
            Slot::Occasion => self.occasion.as_deref(),
            Slot::Style => self.style.as_deref(),
            Slot::Size => self.size.as_deref(),
            Slot::PriceRange => self.price_range.as_deref(),
        }
    }

    /// Merge `newer` into `self`: non-null slots from `newer` win, null
    /// slots pass the existing value through unchanged.
    pub fn merged_with(&self, newer: &GatheredContext) -> GatheredContext {
        GatheredContext {
            product_type: newer.product_type.clone().or_else(|| self.product_type.clone()),
            color: newer.color.clone().or_else(|| self.color.clone()),
            occasion: newer.occasion.clone().or_else(|| self.occasion.clone()),
            style: newer.style.clone().or_else(|| self.style.clone()),
            size: newer.size.clone().or_else(|| self.size.clone()),
            price_range: newer.price_range.clone().or_else(|| self.price_range.clone()),
        }
    }

    /// A product intent is actionable once the category is known together
    /// with at least one qualifying attribute.
    pub fn is_actionable(&self) -> bool {
        self.product_type.is_some()
            && (self.color.is_some() || self.occasion.is_some() || self.style.is_some())
    }

    pub fn search_terms(&self) -> String {
        [
            self.color.as_deref(),
            self.style.as_deref(),
            self.product_type.as_deref(),
            self.occasion.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// The unit of persistence, threaded through every graph step of a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub channel_address: String,
    pub turn_index: u32,
    pub current_step: ConversationStep,
    pub mode: ConversationMode,
    pub gathered_context: GatheredContext,
    pub conversation_history: Vec<HistoryEntry>,
    pub found_items: Vec<Product>,
    pub cart_snapshot: Vec<CartLine>,
    pub selected_product_id: Option<ProductId>,
    pub selected_size: Option<String>,
    pub pending_search_query: Option<String>,
    pub routing_confidence: f32,
    pub last_reply_text: String,
    pub last_reply_media: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        tenant_id: TenantId,
        customer_id: CustomerId,
        channel_address: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            customer_id,
            channel_address: channel_address.into(),
            turn_index: 0,
            current_step: ConversationStep::Greeting,
            mode: ConversationMode::Chatting,
            gathered_context: GatheredContext::default(),
            conversation_history: Vec::new(),
            found_items: Vec::new(),
            cart_snapshot: Vec::new(),
            selected_product_id: None,
            selected_size: None,
            pending_search_query: None,
            routing_confidence: 0.0,
            last_reply_text: String::new(),
            last_reply_media: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey::new(self.tenant_id.clone(), self.channel_address.clone())
    }

    /// Bounded recent window used for prompting.
    pub fn recent_history(&self, window: usize) -> &[HistoryEntry] {
        let len = self.conversation_history.len();
        &self.conversation_history[len.saturating_sub(window)..]
    }

    /// Append the turn's request/response pair, preserving strict role
    /// alternation.
    pub fn record_exchange(&mut self, user_text: impl Into<String>, reply_text: impl Into<String>) {
        self.conversation_history
            .push(HistoryEntry { role: MessageRole::User, text: user_text.into() });
        self.conversation_history
            .push(HistoryEntry { role: MessageRole::Assistant, text: reply_text.into() });
    }

    /// Explicit context reset, used when a checkout completes and the
    /// shopping mission is over.
    pub fn reset_gathered_context(&mut self) {
        self.gathered_context = GatheredContext::default();
        self.selected_product_id = None;
        self.selected_size = None;
        self.pending_search_query = None;
    }
}
