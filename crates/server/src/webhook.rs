use std::sync::Arc;

use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use sokoni_agent::runtime::{AgentRuntime, InboundTurn};
use sokoni_core::stores::TenantStore;
use sokoni_whatsapp::channel::MessagingChannel;
use sokoni_whatsapp::inbound::{parse_form_body, InboundMessage};
use sokoni_whatsapp::signature::verify_signature;

pub const WEBHOOK_PATH: &str = "/webhooks/whatsapp";
pub const SIGNATURE_HEADER: &str = "x-sokoni-signature";

#[derive(Clone)]
pub struct WebhookState {
    pub runtime: Arc<AgentRuntime>,
    pub tenants: Arc<dyn TenantStore>,
    pub channel: Arc<dyn MessagingChannel>,
    pub webhook_secret: Option<SecretString>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive_message).get(verification_probe))
        .with_state(state)
}

async fn verification_probe() -> Json<Value> {
    Json(json!({ "status": "whatsapp webhook is active" }))
}

/// The provider is always answered with 200; anything that goes wrong
/// internally is logged, never surfaced as an error status.
async fn receive_message(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let correlation_id = Uuid::new_v4().to_string();

    if let Err(reason) = process_message(&state, &headers, &body, &correlation_id).await {
        warn!(
            event_name = "ingress.webhook.dropped",
            correlation_id = %correlation_id,
            thread_id = "unknown",
            reason = %reason,
            "inbound webhook not processed"
        );
    }

    StatusCode::OK
}

async fn process_message(
    state: &WebhookState,
    headers: &HeaderMap,
    body: &str,
    correlation_id: &str,
) -> Result<(), String> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|content_type| content_type.starts_with("application/json"))
        .unwrap_or(false);

    let (message, form_pairs) = if is_json {
        let value: Value =
            serde_json::from_str(body).map_err(|error| format!("invalid json payload: {error}"))?;
        let message =
            InboundMessage::from_json(&value).map_err(|error| format!("bad payload: {error}"))?;
        (message, Vec::new())
    } else {
        let pairs = parse_form_body(body);
        let message = InboundMessage::from_urlencoded(body)
            .map_err(|error| format!("bad payload: {error}"))?;
        (message, pairs)
    };

    if let Some(secret) = &state.webhook_secret {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret.expose_secret(), WEBHOOK_PATH, &form_pairs, provided) {
            return Err("webhook signature verification failed".to_string());
        }
    }

    info!(
        event_name = "ingress.webhook.message_received",
        correlation_id = %correlation_id,
        thread_id = %message.clean_from_number(),
        has_image = message.has_image(),
        "inbound whatsapp message received"
    );

    let tenant = state
        .tenants
        .find_by_whatsapp_number(&message.to)
        .await
        .map_err(|error| format!("tenant lookup failed: {error}"))?
        .ok_or_else(|| format!("no active tenant for receiving number {}", message.to))?;

    let from_address = message.clean_from_number().to_string();
    let reply = state
        .runtime
        .handle_message(InboundTurn {
            tenant,
            from_address: from_address.clone(),
            text: message.body.clone(),
            media_url: message.image_url().map(str::to_owned),
            correlation_id: correlation_id.to_string(),
        })
        .await;

    match state.channel.send(&from_address, &reply.text, &reply.media).await {
        Ok(ack) => {
            info!(
                event_name = "ingress.webhook.reply_sent",
                correlation_id = %correlation_id,
                thread_id = %from_address,
                mock = ack.mock,
                degraded = reply.degraded,
                "reply delivered to channel"
            );
            Ok(())
        }
        Err(error) => Err(format!("reply delivery failed: {error}")),
    }
}
