use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use sokoni_core::config::WhatsAppConfig;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel request failed: {0}")]
    Request(String),
    #[error("channel rejected the message: {0}")]
    Rejected(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryAck {
    pub message_sid: Option<String>,
    /// Set when no live credentials were configured and the send was
    /// only logged.
    pub mock: bool,
}

/// Outbound messaging contract: text plus optional media to one
/// WhatsApp address.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send(
        &self,
        to_address: &str,
        text: &str,
        media_urls: &[String],
    ) -> Result<DeliveryAck, ChannelError>;
}

#[derive(Default)]
pub struct NoopChannel;

#[async_trait]
impl MessagingChannel for NoopChannel {
    async fn send(
        &self,
        _to_address: &str,
        _text: &str,
        _media_urls: &[String],
    ) -> Result<DeliveryAck, ChannelError> {
        Ok(DeliveryAck { message_sid: None, mock: true })
    }
}

struct TwilioCredentials {
    account_sid: String,
    auth_token: String,
}

/// Twilio WhatsApp sender. Without credentials it degrades to mock
/// sends so local development never needs live keys.
pub struct TwilioChannel {
    http: reqwest::Client,
    credentials: Option<TwilioCredentials>,
    sender_number: String,
}

impl TwilioChannel {
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        let credentials = match (&config.account_sid, &config.auth_token) {
            (Some(account_sid), Some(auth_token)) if !account_sid.trim().is_empty() => {
                Some(TwilioCredentials {
                    account_sid: account_sid.clone(),
                    auth_token: auth_token.expose_secret().to_string(),
                })
            }
            _ => {
                warn!(
                    event_name = "channel.mock_mode",
                    "whatsapp credentials not configured; outbound sends will be mocked"
                );
                None
            }
        };

        Self {
            http: reqwest::Client::new(),
            credentials,
            sender_number: normalize_whatsapp_address(&config.sender_number),
        }
    }
}

fn normalize_whatsapp_address(address: &str) -> String {
    if address.starts_with("whatsapp:") {
        address.to_string()
    } else {
        format!("whatsapp:{address}")
    }
}

#[async_trait]
impl MessagingChannel for TwilioChannel {
    async fn send(
        &self,
        to_address: &str,
        text: &str,
        media_urls: &[String],
    ) -> Result<DeliveryAck, ChannelError> {
        let to_address = normalize_whatsapp_address(to_address);

        let Some(credentials) = &self.credentials else {
            info!(
                event_name = "channel.mock_send",
                to = %to_address,
                media_count = media_urls.len(),
                "mock whatsapp send"
            );
            return Ok(DeliveryAck { message_sid: None, mock: true });
        };

        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{sid}/Messages.json",
            sid = credentials.account_sid
        );

        let mut form: Vec<(&str, String)> = vec![
            ("From", self.sender_number.clone()),
            ("To", to_address.clone()),
            ("Body", text.to_string()),
        ];
        if let Some(media_url) = media_urls.first() {
            form.push(("MediaUrl", media_url.clone()));
        }

        let response = self
            .http
            .post(&url)
            .basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|error| ChannelError::Request(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|payload| {
                    payload.get("message").and_then(Value::as_str).map(str::to_owned)
                })
                .unwrap_or_else(|| status.to_string());
            return Err(ChannelError::Rejected(detail));
        }

        let payload: Value =
            response.json().await.map_err(|error| ChannelError::Request(error.to_string()))?;
        let message_sid = payload.get("sid").and_then(Value::as_str).map(str::to_owned);

        info!(
            event_name = "channel.message_sent",
            to = %to_address,
            message_sid = message_sid.as_deref().unwrap_or("unknown"),
            "whatsapp message sent"
        );
        Ok(DeliveryAck { message_sid, mock: false })
    }
}
