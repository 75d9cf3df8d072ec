//! STK push payment gateway (PayLink-style HTTP API) implementing the
//! core `PaymentGateway` contract. Without credentials it simulates
//! acceptance so development flows keep working end to end.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{info, warn};

use sokoni_core::config::PaymentConfig;
use sokoni_core::payments::{PaymentAck, PaymentError, PaymentGateway, PaymentStatus};

struct PaylinkCredentials {
    api_key: SecretString,
}

pub struct PaylinkGateway {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<PaylinkCredentials>,
    callback_url: Option<String>,
}

impl PaylinkGateway {
    pub fn from_config(config: &PaymentConfig) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| PaymentError::Unreachable(error.to_string()))?;

        let credentials = config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .map(|key| PaylinkCredentials { api_key: key.clone() });
        if credentials.is_none() {
            warn!(
                event_name = "payment.mock_mode",
                "payment credentials not configured; STK pushes will be simulated"
            );
        }

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            callback_url: config.callback_url.clone(),
        })
    }
}

/// Normalize a Kenyan MSISDN to `254XXXXXXXXX` form. `+2547...`,
/// `07...` and `2547...` all map to the same wire format.
pub fn normalize_msisdn(phone: &str) -> Result<String, PaymentError> {
    let digits: String = phone.chars().filter(|ch| ch.is_ascii_digit()).collect();

    let normalized = if let Some(rest) = digits.strip_prefix("254") {
        format!("254{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else if digits.len() == 9 {
        format!("254{digits}")
    } else {
        digits.clone()
    };

    if normalized.len() != 12 || !normalized.starts_with("254") {
        return Err(PaymentError::InvalidMsisdn(phone.to_string()));
    }
    Ok(normalized)
}

#[async_trait]
impl PaymentGateway for PaylinkGateway {
    async fn initiate(
        &self,
        phone: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<PaymentAck, PaymentError> {
        let msisdn = normalize_msisdn(phone)?;

        let Some(credentials) = &self.credentials else {
            info!(
                event_name = "payment.mock_initiated",
                reference,
                amount = %amount,
                "simulated STK push"
            );
            return Ok(PaymentAck {
                accepted: true,
                transaction_id: format!("MOCK-{reference}"),
                mock: true,
            });
        };

        let body = json!({
            "phone_number": msisdn,
            "amount": amount.round(),
            "reference": reference,
            "description": format!("Payment for order {reference}"),
            "callback_url": self.callback_url,
        });

        let response = self
            .http
            .post(format!("{}/v1/stk-push", self.base_url))
            .bearer_auth(credentials.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| PaymentError::Unreachable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|payload| payload.get("error").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| status.to_string());
            return Err(PaymentError::Rejected(detail));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| PaymentError::Unreachable(error.to_string()))?;
        let transaction_id = payload
            .get("checkout_request_id")
            .or_else(|| payload.get("transaction_id"))
            .and_then(Value::as_str)
            .unwrap_or(reference)
            .to_string();

        info!(
            event_name = "payment.initiated",
            reference,
            transaction_id = %transaction_id,
            "STK push accepted"
        );
        Ok(PaymentAck { accepted: true, transaction_id, mock: false })
    }

    async fn check_status(&self, transaction_id: &str) -> Result<PaymentStatus, PaymentError> {
        let Some(credentials) = &self.credentials else {
            // Simulated payments complete immediately.
            return Ok(if transaction_id.starts_with("MOCK-") {
                PaymentStatus::Completed
            } else {
                PaymentStatus::Pending
            });
        };

        let response = self
            .http
            .get(format!("{}/v1/stk-push/{transaction_id}", self.base_url))
            .bearer_auth(credentials.api_key.expose_secret())
            .send()
            .await
            .map_err(|error| PaymentError::Unreachable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(PaymentError::Rejected(response.status().to_string()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| PaymentError::Unreachable(error.to_string()))?;

        match payload.get("status").and_then(Value::as_str) {
            Some("completed") | Some("success") => Ok(PaymentStatus::Completed),
            Some("failed") | Some("cancelled") => Ok(PaymentStatus::Failed),
            _ => Ok(PaymentStatus::Pending),
        }
    }
}
