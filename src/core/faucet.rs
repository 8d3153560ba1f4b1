/// Test token faucet

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use super::config::NetworkConfig;
use super::rpc::{MessageRequest, RpcClient, RpcError};
use crate::utils::{actions, FAUCET_GRANT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaucetOutcome {
    Granted,
    AlreadyClaimed,
    Unexpected,
    Failed,
}

impl FaucetOutcome {
    pub fn classify(reply: &Result<String, RpcError>) -> Self {
        match reply {
            Err(e) => {
                debug!(error = %e, "faucet request failed");
                FaucetOutcome::Failed
            }
            Ok(text) if text.contains("already gotten tokens") => FaucetOutcome::AlreadyClaimed,
            Ok(text) if text.contains("Successfully completed") => FaucetOutcome::Granted,
            Ok(_) => FaucetOutcome::Unexpected,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == FaucetOutcome::Granted
    }

    pub fn message(&self) -> String {
        match self {
            FaucetOutcome::Granted => format!("Successfully received {} USDA tokens!", FAUCET_GRANT),
            FaucetOutcome::AlreadyClaimed => "You have already received tokens from this faucet.".to_string(),
            FaucetOutcome::Unexpected => "Unexpected response. Please try again.".to_string(),
            FaucetOutcome::Failed => "Failed to request tokens. Please try again.".to_string(),
        }
    }
}

pub struct Faucet {
    rpc: Arc<RpcClient>,
    network: NetworkConfig,
}

impl Faucet {
    pub fn new(rpc: Arc<RpcClient>, network: NetworkConfig) -> Self {
        Self { rpc, network }
    }

    pub async fn request(&self) -> Result<FaucetOutcome> {
        let request = MessageRequest::new(self.network.orchestrator()?).action(actions::REQUEST_TOKENS);
        let reply = self.rpc.dispatch(request).await;
        Ok(FaucetOutcome::classify(&reply))
    }
}
