pub mod attestation;
pub mod chat;
pub mod config;
pub mod consultations;
pub mod data_item;
pub mod faucet;
pub mod identity;
pub mod notifications;
pub mod prescriptions;
pub mod response;
pub mod rpc;
pub mod services;
pub mod session;
pub mod signer;
pub mod transport;

pub use attestation::AttestationVerifier;
pub use chat::{ChatSession, ChatThread};
pub use config::{ConfigManager, NetworkConfig};
pub use consultations::ConsultationManager;
pub use faucet::{Faucet, FaucetOutcome};
pub use identity::{IdentityManager, UserKind};
pub use notifications::NotificationManager;
pub use prescriptions::PrescriptionManager;
pub use rpc::{MessageRequest, RpcClient, RpcError};
pub use services::TokenManager;
pub use session::{LocalStore, Role, UserMetadata};
pub use signer::{Signer, WalletSigner};
pub use transport::{HttpTransport, Transport};
