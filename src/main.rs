mod cli;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{ChatCommands, Cli, Commands, ConfigCommands, ConsultationCommands, TokenCommands, WalletCommands};
use consultify::core::attestation::{self, AttestationVerifier};
use consultify::core::chat::{sender_label, ChatMessage, ChatSession};
use consultify::core::consultations::ConsultationDetails;
use consultify::core::identity::{ProfileState, Registration};
use consultify::core::notifications::format_message;
use consultify::core::prescriptions::Medication;
use consultify::core::services::ServiceOutcome;
use consultify::core::{
    ConfigManager, ConsultationManager, Faucet, HttpTransport, IdentityManager, LocalStore,
    NetworkConfig, NotificationManager, PrescriptionManager, Role, RpcClient, Signer, TokenManager,
    UserKind, UserMetadata, WalletSigner,
};
use consultify::utils::{format_date_ms, format_timestamp_ms, mask_sensitive, now_ms, short_id, AppConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "✗".red(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    // Values already in the environment win over the file
    if cli.env_file.exists() {
        dotenv::from_path(&cli.env_file)
            .with_context(|| format!("Failed to read {}", cli.env_file.display()))?;
    }

    let ctx = AppContext::new(cli.timeout)?;

    match cli.command {
        Commands::Wallet { command } => handle_wallet(ctx, command)?,
        Commands::Login => handle_login(&ctx).await?,
        Commands::Onboard {
            role,
            name,
            language,
            specialization,
        } => {
            let registration = Registration {
                role,
                name,
                language,
                specialization,
            };
            handle_onboard(&ctx, registration).await?
        }
        Commands::Dashboard { role, name } => handle_dashboard(&ctx, role, name).await?,
        Commands::Whoami => handle_whoami(&ctx)?,
        Commands::SignOut => {
            if ctx.store.sign_out()? {
                println!("{} Signed out", "✓".green());
            } else {
                println!("Not signed in");
            }
        }
        Commands::Consultations { command } => handle_consultations(&ctx, command).await?,
        Commands::Chat {
            consultation_id,
            command,
        } => handle_chat(&ctx, &consultation_id, command.unwrap_or(ChatCommands::Show)).await?,
        Commands::Prescribe {
            consultation_id,
            medications,
        } => handle_prescribe(&ctx, &consultation_id, &medications).await?,
        Commands::Prescriptions => handle_prescriptions(&ctx).await?,
        Commands::Notifications => handle_notifications(&ctx).await?,
        Commands::Faucet => handle_faucet(&ctx).await?,
        Commands::Tokens { command } => handle_tokens(&ctx, command).await?,
        Commands::Attest {
            attestation,
            consultation,
            message,
        } => handle_attest(&ctx, attestation, consultation, message).await?,
        Commands::Config { command } => handle_config(&cli.env_file, command)?,
    }

    Ok(())
}

/// Everything a command needs; the wallet is only loaded when a command signs
struct AppContext {
    app_config: AppConfig,
    network: NetworkConfig,
    store: LocalStore,
}

impl AppContext {
    fn new(timeout: Option<Duration>) -> Result<Self> {
        let app_config = AppConfig::load()?;
        let mut network = NetworkConfig::from_env();
        if let Some(timeout) = timeout {
            network.rpc_timeout = timeout;
        }
        let store = LocalStore::open(app_config.store_path()?);

        Ok(Self {
            app_config,
            network,
            store,
        })
    }

    fn signer(&self) -> Result<WalletSigner> {
        let path = self.app_config.wallet_path()?;
        WalletSigner::load(&path).with_context(|| {
            format!(
                "Failed to load wallet {} (create one with `consultify wallet new`)",
                path.display()
            )
        })
    }

    fn rpc(&self) -> Result<Arc<RpcClient>> {
        let transport = HttpTransport::new(&self.network.mu_url, &self.network.cu_url)
            .context("Failed to create network transport")?;
        let client = RpcClient::new(Arc::new(transport), Arc::new(self.signer()?))
            .with_default_timeout(self.network.rpc_timeout);
        Ok(Arc::new(client))
    }

    fn identity(&self) -> Result<IdentityManager> {
        Ok(IdentityManager::new(self.rpc()?, self.network.clone(), self.store.clone()))
    }

    fn consultations(&self) -> Result<ConsultationManager> {
        Ok(ConsultationManager::new(self.rpc()?, self.network.clone(), self.store.clone()))
    }

    /// The signed-in user, or an error telling how to sign in
    fn current_user(&self) -> Result<UserMetadata> {
        self.store
            .current_user()?
            .ok_or_else(|| anyhow!("Not signed in. Run `consultify login` or `consultify onboard` first"))
    }
}

/// Show a spinner while waiting on the network
async fn with_spinner<F, T>(message: &str, future: F) -> T
where
    F: Future<Output = T>,
{
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));

    let output = future.await;
    spinner.finish_and_clear();
    output
}

fn print_outcome(outcome: &ServiceOutcome) {
    if outcome.success {
        println!("{} {}", "✓".green(), outcome.message);
    } else {
        println!("{} {}", "✗".red(), outcome.message);
    }
}

fn handle_wallet(mut ctx: AppContext, command: WalletCommands) -> Result<()> {
    match command {
        WalletCommands::New { path } => {
            let target = match &path {
                Some(path) => path.clone(),
                None => ctx.app_config.wallet_path()?,
            };
            let signer = WalletSigner::generate();
            signer
                .save(&target)
                .with_context(|| format!("Failed to write wallet {}", target.display()))?;
            if path.is_some() {
                ctx.app_config.set_wallet_path(target.clone())?;
            }

            println!("{} Created wallet", "✓".green());
            println!("  Address:  {}", signer.address());
            println!("  Key file: {}", target.display());
            println!("\n{} Back up the key file; it cannot be recovered.", "⚠".yellow());
        }
        WalletCommands::Address => {
            println!("{}", ctx.signer()?.address());
        }
        WalletCommands::Use { path } => {
            let signer = WalletSigner::load(&path)
                .with_context(|| format!("Failed to load wallet {}", path.display()))?;
            let path = path.canonicalize().unwrap_or(path);
            ctx.app_config.set_wallet_path(path.clone())?;
            println!("{} Using wallet {} ({})", "✓".green(), signer.address(), path.display());
        }
    }

    Ok(())
}

async fn handle_login(ctx: &AppContext) -> Result<()> {
    let identity = ctx.identity()?;
    let kind = with_spinner("Looking up your account...", identity.check_user()).await?;

    match kind {
        UserKind::Doctor => println!("{} Registered doctor. Open `consultify dashboard doctor`", "✓".green()),
        UserKind::Patient => println!("{} Registered patient. Open `consultify dashboard patient`", "✓".green()),
        UserKind::New => {
            println!("No account found for this wallet.");
            println!("Register with: consultify onboard --role <doctor|patient> --name <name> --language <code>");
        }
    }

    Ok(())
}

async fn handle_onboard(ctx: &AppContext, registration: Registration) -> Result<()> {
    if registration.name.trim().is_empty() {
        bail!("Name cannot be empty");
    }
    if registration.language.trim().is_empty() {
        bail!("Language cannot be empty");
    }

    let identity = ctx.identity()?;
    let role = registration.role;
    let user = with_spinner("Registering...", identity.register(registration)).await?;

    println!("{} Registered {} as a {}", "✓".green(), user.name, role);
    Ok(())
}

async fn handle_dashboard(ctx: &AppContext, role: Role, name: Option<String>) -> Result<()> {
    let identity = ctx.identity()?;
    let state = with_spinner("Loading profile...", identity.load_profile(role)).await?;

    let (user, details) = match state {
        ProfileState::Ready { user, details } => (user, details),
        ProfileState::NeedsName(metadata) => match name {
            Some(name) => (identity.complete_profile(metadata, &name)?, None),
            None => bail!("Your profile was restored without a name; pass --name <name>"),
        },
    };

    let title = match role {
        Role::Doctor => "Doctor Dashboard",
        Role::Patient => "Patient Dashboard",
    };
    println!("{}\n", title.bold());
    print_user(&user);

    if let Some(details) = details {
        println!("\nNetwork record:");
        println!("{}", serde_json::to_string_pretty(&details)?);
    }

    Ok(())
}

fn print_user(user: &UserMetadata) {
    println!("  Name:      {}", user.name);
    if let Some(role) = user.role {
        println!("  Role:      {}", role);
    }
    println!("  Language:  {}", user.language);
    if let Some(specialization) = &user.specialization {
        println!("  Specialty: {}", specialization);
    }
    println!("  User ID:   {}", user.id);
}

fn handle_whoami(ctx: &AppContext) -> Result<()> {
    let user = ctx.current_user()?;
    print_user(&user);
    if let Ok(signer) = ctx.signer() {
        println!("  Wallet:    {}", signer.address());
    }
    Ok(())
}

async fn handle_consultations(ctx: &AppContext, command: ConsultationCommands) -> Result<()> {
    let consultations = ctx.consultations()?;

    match command {
        ConsultationCommands::List => {
            let user = ctx.current_user()?;
            let role = user.role.unwrap_or(Role::Patient);
            with_spinner("Fetching consultations...", consultations.fetch(role)).await?;
            let rows = consultations.list(&user)?;

            if rows.is_empty() {
                println!("No consultations yet");
                return Ok(());
            }

            println!("{:<45} {:<25} {:<10} {:<10}", "Consultation", "Title", "Status", "With");
            println!("{}", "-".repeat(92));
            for row in rows {
                println!(
                    "{:<45} {:<25} {:<10} {:<10}",
                    row.consultation_id,
                    row.title,
                    row.status,
                    row.other_participant(role)
                );
            }
        }
        ConsultationCommands::Create => {
            let user = ctx.current_user()?;
            if user.role != Some(Role::Patient) {
                bail!("Only patients can start a consultation");
            }
            let id = with_spinner("Creating consultation...", consultations.create()).await?;
            println!("{} Consultation created", "✓".green());
            println!("  ID: {}", id);
            println!("\nChat with: consultify chat {} send \"<message>\"", id);
        }
        ConsultationCommands::Show { consultation_id } => {
            let details = with_spinner(
                "Loading consultation...",
                consultations.details(&consultation_id),
            )
            .await?;
            let viewer_id = ctx.signer().map(|s| s.address()).unwrap_or_default();
            print_details(&consultation_id, &details, &viewer_id, ctx.network.triage());
        }
    }

    Ok(())
}

fn print_details(consultation_id: &str, details: &ConsultationDetails, viewer_id: &str, triage: &str) {
    let none = || "-".to_string();
    println!("Consultation {}\n", short_id(consultation_id).bold());
    println!("  State:    {}", details.state);
    println!("  Patient:  {}", details.patient_id.clone().unwrap_or_else(none));
    println!("  Doctor:   {}", details.doctor_id.clone().unwrap_or_else(none));
    println!(
        "  Languages: patient {} / doctor {}",
        details.patient_language.clone().unwrap_or_else(none),
        details.doctor_language.clone().unwrap_or_else(none)
    );
    if let Some(created) = &details.created_at {
        let ms = created.parse::<i64>().unwrap_or_default();
        println!("  Created:  {}", format_timestamp_ms(ms));
    }
    if let Some(other) = details.other_participant(viewer_id, triage) {
        println!("  With:     {} ({})", other.name, other.role);
    }
}

struct MessagePrinter {
    viewer: UserMetadata,
    address: String,
    details: ConsultationDetails,
    triage: String,
    seen: HashSet<String>,
}

impl MessagePrinter {
    fn new(session: &ChatSession, triage: &str) -> Self {
        Self {
            viewer: session.viewer().clone(),
            address: session.address(),
            details: session.details().clone(),
            triage: triage.to_string(),
            seen: HashSet::new(),
        }
    }

    fn print(&mut self, message: &ChatMessage, pending: bool) {
        self.seen.insert(message.message_id.clone());

        let label = sender_label(message, &self.viewer, &self.address, Some(&self.details), &self.triage);
        let time = format_timestamp_ms(message.timestamp_ms());
        let mut line = format!("[{}] {}: {}", time.dimmed(), label.bold(), message.display_content(&self.address));
        if pending {
            line.push_str(&format!(" {}", "(sending)".yellow()));
        }
        println!("{}", line);

        if let Some(attestation) = &message.attestation {
            println!("    {} {}", "attested".cyan(), attestation::preview(attestation).dimmed());
        }
    }

    fn print_unseen(&mut self, messages: &[ChatMessage]) {
        for message in messages {
            if !self.seen.contains(&message.message_id) {
                self.print(message, false);
            }
        }
    }
}

async fn handle_chat(ctx: &AppContext, consultation_id: &str, command: ChatCommands) -> Result<()> {
    let user = ctx.current_user()?;
    let consultations = ctx.consultations()?;
    let rpc = ctx.rpc()?;

    let mut session = with_spinner(
        "Opening consultation...",
        ChatSession::open(rpc, &consultations, consultation_id, user),
    )
    .await?;
    let mut printer = MessagePrinter::new(&session, ctx.network.triage());

    match command {
        ChatCommands::Show => {
            if session.thread().messages().is_empty() {
                println!("No messages yet");
            }
            printer.print_unseen(session.thread().messages());
        }
        ChatCommands::Send { message } => {
            let sent = with_spinner("Sending...", session.send(&message)).await?;
            printer.print(&sent, true);
            with_spinner("Waiting for delivery...", session.refresh()).await;
            if session.thread().is_pending(&sent.message_id) {
                println!("{} Message submitted; it will appear once the consultation confirms it", "✓".green());
            } else {
                println!("{} Message delivered", "✓".green());
            }
        }
        ChatCommands::Watch => {
            printer.print_unseen(session.thread().messages());
            println!("{}", "Watching for new messages (Ctrl-C to stop)".dimmed());

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            session
                .watch(ctx.network.message_polling_rate, cancel, |thread| {
                    printer.print_unseen(thread.messages())
                })
                .await;
        }
    }

    Ok(())
}

async fn handle_prescribe(ctx: &AppContext, consultation_id: &str, medications: &[Medication]) -> Result<()> {
    let user = ctx.current_user()?;
    if user.role != Some(Role::Doctor) {
        bail!("Only doctors can prescribe");
    }

    let consultations = ctx.consultations()?;
    let details = with_spinner("Loading consultation...", consultations.details(consultation_id)).await?;

    let prescriptions = PrescriptionManager::new(ctx.rpc()?, ctx.network.clone());
    let summary = with_spinner(
        "Sending prescriptions...",
        prescriptions.add(consultation_id, &details, Role::Doctor, medications),
    )
    .await?;

    if summary.all_sent() {
        println!("{} {}", "✓".green(), summary.message());
    } else {
        println!("{} {}", "✗".red(), summary.message());
    }

    Ok(())
}

async fn handle_prescriptions(ctx: &AppContext) -> Result<()> {
    let prescriptions = PrescriptionManager::new(ctx.rpc()?, ctx.network.clone());
    let list = with_spinner("Fetching prescriptions...", prescriptions.list()).await?;

    if list.is_empty() {
        println!("No prescriptions");
        return Ok(());
    }

    let now = now_ms();
    println!("{:<25} {:<12} {:<12} {:<12} {:<8}", "Medication", "Per day", "Start", "End", "Status");
    println!("{}", "-".repeat(72));
    for prescription in list {
        let status = if prescription.is_active_at(now) {
            "active".green()
        } else {
            "ended".dimmed()
        };
        println!(
            "{:<25} {:<12} {:<12} {:<12} {:<8}",
            prescription.drug_name,
            prescription.frequency,
            format_date_ms(prescription.start_timestamp),
            format_date_ms(prescription.end_timestamp),
            status
        );
    }

    Ok(())
}

async fn handle_notifications(ctx: &AppContext) -> Result<()> {
    let notifications = NotificationManager::new(ctx.rpc()?, ctx.network.clone());
    let list = with_spinner("Fetching notifications...", notifications.list()).await?;

    if list.is_empty() {
        println!("No notifications");
        return Ok(());
    }

    for notification in list {
        println!("{}", format_timestamp_ms(notification.timestamp_ms()).dimmed());
        println!("{}\n", format_message(&notification.message));
    }

    Ok(())
}

async fn handle_faucet(ctx: &AppContext) -> Result<()> {
    let faucet = Faucet::new(ctx.rpc()?, ctx.network.clone());
    let outcome = with_spinner("Requesting tokens...", faucet.request()).await?;

    if outcome.is_success() {
        println!("{} {}", "✓".green(), outcome.message());
    } else {
        println!("{} {}", "✗".red(), outcome.message());
    }

    Ok(())
}

async fn handle_tokens(ctx: &AppContext, command: TokenCommands) -> Result<()> {
    let tokens = TokenManager::new(ctx.rpc()?, ctx.network.clone());

    match command {
        TokenCommands::Balance => {
            let balances = with_spinner("Fetching balances...", tokens.balances()).await?;
            println!("USDA Balances\n");
            println!("  Wallet:   {}", balances.wallet);
            println!("  Protocol: {}", balances.protocol);
        }
        TokenCommands::Send { amount } => {
            print_outcome(&with_spinner("Sending...", tokens.send_to_protocol(&amount)).await?);
        }
        TokenCommands::Withdraw => {
            print_outcome(&with_spinner("Withdrawing...", tokens.withdraw()).await?);
        }
        TokenCommands::Stake { amount } => {
            print_outcome(&with_spinner("Staking...", tokens.stake(&amount)).await?);
        }
        TokenCommands::Unstake { amount } => {
            print_outcome(&with_spinner("Unstaking...", tokens.unstake(&amount)).await?);
        }
    }

    Ok(())
}

async fn handle_attest(
    ctx: &AppContext,
    attestation: Option<String>,
    consultation: Option<String>,
    message: Option<String>,
) -> Result<()> {
    let attestation = match (attestation, consultation, message) {
        (_, Some(consultation_id), Some(message_id)) => {
            let user = ctx.store.current_user()?.unwrap_or_default();
            let consultations = ctx.consultations()?;
            let session = with_spinner(
                "Loading messages...",
                ChatSession::open(ctx.rpc()?, &consultations, &consultation_id, user),
            )
            .await?;
            session
                .thread()
                .messages()
                .iter()
                .find(|m| m.message_id == message_id)
                .ok_or_else(|| anyhow!("Message {} not found", message_id))?
                .attestation
                .clone()
                .ok_or_else(|| anyhow!("Message has no attestation"))?
        }
        (Some(attestation), _, _) => attestation,
        _ => bail!("Pass an attestation, or --consultation and --message"),
    };

    println!("Attestation: {}", attestation::preview(&attestation).dimmed());

    let verifier = AttestationVerifier::new(&ctx.network.hyperbeam_url)?;
    let verified = with_spinner("Verifying...", verifier.verify(&attestation)).await?;

    if verified {
        println!("{} Attestation verified", "✓".green());
    } else {
        println!("{} Attestation could not be verified", "✗".red());
    }

    Ok(())
}

fn is_sensitive(key: &str) -> bool {
    ["PASSWORD", "SECRET", "KEY", "TOKEN"]
        .iter()
        .any(|marker| key.contains(marker))
}

fn handle_config(env_file: &Path, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::View => {
            let config = ConfigManager::load_or_default(env_file)?;
            println!("Configuration ({}):\n", config.path().display());
            for key in config.keys() {
                if let Some(value) = config.get(&key) {
                    let display_value = if is_sensitive(&key) {
                        mask_sensitive(value, 4)
                    } else {
                        value.to_string()
                    };
                    println!("{}: {}", key, display_value);
                }
            }

            let app_config = AppConfig::load()?;
            println!();
            println!("Wallet: {}", app_config.wallet_path()?.display());
            println!("Store:  {}", app_config.store_path()?.display());
        }
        ConfigCommands::Validate => {
            let config = ConfigManager::load_or_default(env_file)?;
            let errors = config.validate();

            if errors.is_empty() {
                println!("{} Configuration is valid", "✓".green());
            } else {
                println!("{} Configuration errors:", "✗".red());
                for error in errors {
                    println!("  - {}", error);
                }
            }
        }
        ConfigCommands::Set { key, value } => {
            let mut config = ConfigManager::load_or_default(env_file)?;
            config.set(key.clone(), value);
            config.save()?;
            println!("{} Set {} in {}", "✓".green(), key, config.path().display());
        }
    }

    Ok(())
}
