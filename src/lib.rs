//! Consultify client library
//!
//! Signed request/poll messaging to the consultation processes, plus the
//! flows built on it: identity, consultations, chat, prescriptions,
//! notifications, the token faucet and USDA balances.

pub mod core;
pub mod utils;
