/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use consultify::core::prescriptions::Medication;
use consultify::core::Role;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "consultify")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// How long to wait for each network reply (e.g. 30s, 2m)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// .env file with network settings
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wallet key management
    Wallet {
        #[command(subcommand)]
        command: WalletCommands,
    },

    /// Check whether this wallet is a registered doctor or patient
    Login,

    /// Register this wallet
    Onboard {
        /// doctor or patient
        #[arg(long)]
        role: Role,

        /// Display name
        #[arg(long)]
        name: String,

        /// Preferred language code (en, fr, es, ...)
        #[arg(long)]
        language: String,

        /// Medical specialty (doctors only)
        #[arg(long)]
        specialization: Option<String>,
    },

    /// Load the dashboard profile for a role
    Dashboard {
        role: Role,

        /// Name to use when the profile was restored without one
        #[arg(long)]
        name: Option<String>,
    },

    /// Show the stored session
    Whoami,

    /// Clear the stored session
    SignOut,

    /// Consultation management
    Consultations {
        #[command(subcommand)]
        command: ConsultationCommands,
    },

    /// Chat in a consultation
    Chat {
        /// Consultation process id
        consultation_id: String,

        #[command(subcommand)]
        command: Option<ChatCommands>,
    },

    /// Send prescriptions for a consultation (doctors)
    Prescribe {
        /// Consultation process id
        consultation_id: String,

        /// name:frequency:YYYY-MM-DD:YYYY-MM-DD, repeatable
        #[arg(short, long = "medication", required = true)]
        medications: Vec<Medication>,
    },

    /// List your prescriptions
    Prescriptions,

    /// List your notifications
    Notifications,

    /// Request test USDA tokens
    Faucet,

    /// USDA token operations
    Tokens {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Verify a message attestation
    Attest {
        /// Attestation document; read from the message when --message is given
        attestation: Option<String>,

        /// Consultation process id holding the message
        #[arg(long, requires = "message")]
        consultation: Option<String>,

        /// Message id whose attestation to verify
        #[arg(long, requires = "consultation")]
        message: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Generate a new wallet key file
    New {
        /// Where to write the key file (defaults to the config directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Show the wallet address
    Address,

    /// Use an existing key file as the default wallet
    Use { path: PathBuf },
}

#[derive(Subcommand)]
pub enum ConsultationCommands {
    /// Fetch and list your consultations
    List,

    /// Start a new consultation (patients)
    Create,

    /// Show consultation details
    Show { consultation_id: String },
}

#[derive(Subcommand)]
pub enum ChatCommands {
    /// Print the conversation
    Show,

    /// Send a message
    Send { message: String },

    /// Follow the conversation until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Wallet and protocol balances
    Balance,

    /// Move tokens from the wallet to the protocol
    Send { amount: String },

    /// Withdraw the protocol balance to the wallet
    Withdraw,

    /// Stake protocol tokens
    Stake { amount: String },

    /// Unstake protocol tokens
    Unstake { amount: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// View configuration
    View,

    /// Validate configuration
    Validate,

    /// Set a value in the .env file
    Set { key: String, value: String },
}
