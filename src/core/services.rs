/// USDA token operations: balances, deposits, withdrawals and staking
///
/// The wallet balance comes from the token ledger process; the protocol
/// balance is what the orchestrator holds on the user's behalf.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::NetworkConfig;
use super::response::{is_present, parse_json};
use super::rpc::{MessageRequest, RpcClient, RpcError};
use crate::utils::{actions, parse_amount, tags};

pub const INVALID_AMOUNT: &str = "Please enter a valid amount";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balances {
    pub wallet: String,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceOutcome {
    pub success: bool,
    pub message: String,
}

impl ServiceOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }

    /// Any reply counts as success and becomes the message
    fn from_reply(reply: Result<String, RpcError>, failure: &str) -> Self {
        match reply {
            Ok(text) if is_present(&text) => Self::ok(text),
            Ok(_) => Self::failed(failure),
            Err(e) => {
                debug!(error = %e, "token operation failed");
                Self::failed(failure)
            }
        }
    }
}

/// `{"balance": ...}` from the orchestrator; "0" when missing or unreadable
pub fn parse_protocol_balance(reply: &Result<String, RpcError>) -> String {
    let Ok(text) = reply else {
        return "0".to_string();
    };
    if !is_present(text) {
        return "0".to_string();
    }
    let Some(data) = parse_json(text) else {
        warn!(reply = %text, "protocol balance is not JSON");
        return "0".to_string();
    };
    match data.get("balance") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => "0".to_string(),
    }
}

/// Plain-text balance from the token ledger; "0" when missing
pub fn parse_wallet_balance(reply: &Result<String, RpcError>) -> String {
    match reply {
        Ok(text) if is_present(text) => text.trim().to_string(),
        _ => "0".to_string(),
    }
}

fn validated_amount(amount: &str) -> Option<String> {
    parse_amount(amount).map(|_| amount.trim().to_string())
}

pub struct TokenManager {
    rpc: Arc<RpcClient>,
    network: NetworkConfig,
}

impl TokenManager {
    pub fn new(rpc: Arc<RpcClient>, network: NetworkConfig) -> Self {
        Self { rpc, network }
    }

    pub async fn balances(&self) -> Result<Balances> {
        let protocol_request =
            MessageRequest::new(self.network.orchestrator()?).action(actions::GET_USDA_BALANCE);
        let wallet_request = MessageRequest::new(self.network.usda()?).action(actions::BALANCE);

        let (protocol, wallet) = futures::future::join(
            self.rpc.dispatch(protocol_request),
            self.rpc.dispatch(wallet_request),
        )
        .await;

        Ok(Balances {
            wallet: parse_wallet_balance(&wallet),
            protocol: parse_protocol_balance(&protocol),
        })
    }

    /// Transfer tokens from the wallet to the orchestrator
    pub async fn send_to_protocol(&self, amount: &str) -> Result<ServiceOutcome> {
        let Some(quantity) = validated_amount(amount) else {
            return Ok(ServiceOutcome::failed(INVALID_AMOUNT));
        };
        let orchestrator = self.network.orchestrator()?;

        let request = MessageRequest::new(self.network.usda()?)
            .action(actions::TRANSFER)
            .tag(tags::RECIPIENT, orchestrator)
            .tag(tags::QUANTITY, quantity);

        Ok(match self.rpc.dispatch(request).await {
            Ok(text) if is_present(&text) => ServiceOutcome::ok("Successfully sent USDA to protocol"),
            _ => ServiceOutcome::failed("Failed to send USDA to protocol"),
        })
    }

    pub async fn withdraw(&self) -> Result<ServiceOutcome> {
        let request = MessageRequest::new(self.network.orchestrator()?).action(actions::WITHDRAW_USDA);
        Ok(ServiceOutcome::from_reply(
            self.rpc.dispatch(request).await,
            "Failed to withdraw USDA from protocol",
        ))
    }

    pub async fn stake(&self, amount: &str) -> Result<ServiceOutcome> {
        self.quantity_action(actions::STAKE_USDA, amount, "Failed to stake USDA").await
    }

    pub async fn unstake(&self, amount: &str) -> Result<ServiceOutcome> {
        self.quantity_action(actions::UNSTAKE_USDA, amount, "Failed to unstake USDA").await
    }

    async fn quantity_action(&self, action: &str, amount: &str, failure: &str) -> Result<ServiceOutcome> {
        let Some(quantity) = validated_amount(amount) else {
            return Ok(ServiceOutcome::failed(INVALID_AMOUNT));
        };
        let request = MessageRequest::new(self.network.orchestrator()?)
            .action(action)
            .tag(tags::QUANTITY, quantity);

        Ok(ServiceOutcome::from_reply(self.rpc.dispatch(request).await, failure))
    }
}
