use crate::endpoints::{trade_action_endpoint, trade_state_endpoint, trade_status_endpoint};
use crate::error::AppError;
use crate::session::types::{TradeStateSnapshot, TradeStateWire, TradeStatus, TradeStatusWire};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Read side of the trading backend used by reconciliation.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn trade_status(&self, user_id: &str) -> Result<TradeStatus, AppError>;

    async fn trade_state(&self, user_id: &str) -> Result<TradeStateSnapshot, AppError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn succeeded(&self) -> bool {
        self.success == Some(true)
    }
}

#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: Client,
    api_base: String,
}

impl HttpSessionBackend {
    pub fn new(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// POSTs a trade-control action. Non-success statuses become
    /// [`AppError::Backend`] carrying the server's `message` when it sent one.
    pub async fn post_action<B>(&self, action: &str, body: &B) -> Result<ActionResponse, AppError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let endpoint = trade_action_endpoint(&self.api_base, action)?;
        let response = self.client.post(endpoint).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ActionResponse>(&text)
                .ok()
                .and_then(|parsed| parsed.message)
                .unwrap_or(text);
            return Err(AppError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(ActionResponse::default());
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn trade_status(&self, user_id: &str) -> Result<TradeStatus, AppError> {
        let endpoint = trade_status_endpoint(&self.api_base, user_id)?;
        let wire = self
            .client
            .get(endpoint)
            .send()
            .await?
            .error_for_status()?
            .json::<TradeStatusWire>()
            .await?;
        Ok(TradeStatus::from_wire(wire.status.as_deref()))
    }

    async fn trade_state(&self, user_id: &str) -> Result<TradeStateSnapshot, AppError> {
        let endpoint = trade_state_endpoint(&self.api_base, user_id)?;
        let wire = self
            .client
            .get(endpoint)
            .send()
            .await?
            .error_for_status()?
            .json::<TradeStateWire>()
            .await?;
        Ok(wire.into_snapshot())
    }
}
