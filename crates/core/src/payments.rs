//! Payment-initiation contract (STK-style push payment). The HTTP
//! gateway implementation lives in `sokoni-payments`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment gateway unreachable: {0}")]
    Unreachable(String),
    #[error("payment rejected: {0}")]
    Rejected(String),
    #[error("invalid msisdn: {0}")]
    InvalidMsisdn(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAck {
    pub accepted: bool,
    pub transaction_id: String,
    /// Set when the gateway ran without live credentials.
    pub mock: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(
        &self,
        phone: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<PaymentAck, PaymentError>;

    async fn check_status(&self, transaction_id: &str) -> Result<PaymentStatus, PaymentError>;
}
