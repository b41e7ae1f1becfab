// ============================================================================
// teagate — command-line front end for the Tea Gate engine
// ============================================================================
// Usage:
//   teagate token [--regenerate]                 Issue an anonymous token
//   teagate tier --balance 420                   Evaluate an access tier
//   teagate validate "text" [--action comment]   Run the content checks
//   teagate authorize --action submission ...    Run the full security gate
//   teagate admin enable|disable|toggle|status   Manage the admin override
//   teagate beta-code SPILL2024                  Redeem a beta access code
// ============================================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use teagate_core::{
    AccessService, ActionKind, AdminOverride, BalanceSource, BetaAccess, BetaCodeVerifier,
    ContentValidator, GateConfig, GateMode, IdentityProvider, MemoryStore, RedbStore, ScopedStore,
    SecurityGate, SupabaseClient, TierEvaluator, TierSignal, UnconfiguredBalanceSource,
};
use tracing::info;

/// Tea Gate anonymous access and security gating
#[derive(Parser)]
#[command(name = "teagate", version, about = "Anonymous access tiers and security gating")]
struct Cli {
    /// Path to the local state database (default: ~/.teagate/state.redb)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue (or reissue) an anonymous identity token
    Token {
        /// Discard the current token first
        #[arg(long)]
        regenerate: bool,
    },

    /// Evaluate an access tier from one signal
    Tier {
        /// Token balance
        #[arg(long, conflicts_with_all = ["tip", "submitted", "wallet"])]
        balance: Option<f64>,

        /// Tip amount
        #[arg(long, conflicts_with_all = ["submitted", "wallet"])]
        tip: Option<f64>,

        /// Has submitted tea
        #[arg(long, conflicts_with = "wallet")]
        submitted: bool,

        /// Look up a wallet balance (mock balance or remote RPC)
        #[arg(long)]
        wallet: Option<String>,

        /// Persist a mock balance used for wallet lookups
        #[arg(long, conflicts_with = "clear_mock")]
        set_mock: Option<f64>,

        /// Remove the persisted mock balance
        #[arg(long)]
        clear_mock: bool,
    },

    /// Run the content checks on a piece of text
    Validate {
        text: String,

        /// Action kind, which sets the maximum length
        #[arg(long, default_value = "submission")]
        action: String,
    },

    /// Run the full security gate for an action
    Authorize {
        #[arg(long, default_value = "submission")]
        action: String,

        /// Identity token (default: a freshly issued one)
        #[arg(long)]
        identity: Option<String>,

        /// Text carried by the action
        #[arg(long)]
        payload: Option<String>,

        /// Run every check instead of stopping at the first failure
        #[arg(long)]
        audit: bool,

        /// Number of times to submit the same request
        #[arg(long, default_value = "1")]
        repeat: u32,
    },

    /// Manage the admin override
    Admin {
        #[command(subcommand)]
        action: AdminCommand,
    },

    /// Redeem a beta access code
    BetaCode { code: String },
}

#[derive(Subcommand)]
enum AdminCommand {
    Enable,
    Disable,
    Toggle,
    Status,
    /// Enable when the URL carries ?admin=true
    FromUrl { url: String },
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("teagate=info".parse()?)
                .add_directive("teagate_core=info".parse()?),
        )
        .init();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    dotenvy::dotenv().ok();
    init_logging()?;

    let cli = Cli::parse();
    let mut config = GateConfig::from_env().context("Invalid TEAGATE_* configuration")?;
    if let Some(path) = cli.db_path {
        config.db_path = Some(path);
    }

    let local = RedbStore::open(config.db_path.as_deref())?;
    info!("Local state: {}", local.path().display());
    let store = ScopedStore::new(Arc::new(local), Arc::new(MemoryStore::new()));

    match cli.command {
        Commands::Token { regenerate } => cmd_token(&store, regenerate),
        Commands::Tier {
            balance,
            tip,
            submitted,
            wallet,
            set_mock,
            clear_mock,
        } => {
            cmd_tier(&config, &store, balance, tip, submitted, wallet, set_mock, clear_mock).await
        }
        Commands::Validate { text, action } => cmd_validate(&text, &action),
        Commands::Authorize {
            action,
            identity,
            payload,
            audit,
            repeat,
        } => cmd_authorize(&config, &store, &action, identity, payload, audit, repeat).await,
        Commands::Admin { action } => cmd_admin(&store, action),
        Commands::BetaCode { code } => cmd_beta_code(&config, &store, &code).await,
    }
}

fn cmd_token(store: &ScopedStore, regenerate: bool) -> Result<()> {
    let provider = IdentityProvider::new(store.clone());
    let token = if regenerate {
        provider.regenerate()?
    } else {
        provider.get_or_create_token()?
    };

    println!("{}", token);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_tier(
    config: &GateConfig,
    store: &ScopedStore,
    balance: Option<f64>,
    tip: Option<f64>,
    submitted: bool,
    wallet: Option<String>,
    set_mock: Option<f64>,
    clear_mock: bool,
) -> Result<()> {
    let admin = Arc::new(AdminOverride::load(store)?);
    let evaluator = TierEvaluator::new(admin);

    if let Some(wallet) = wallet {
        let source: Arc<dyn BalanceSource> = match SupabaseClient::from_config(config)? {
            Some(client) => Arc::new(client),
            None => Arc::new(UnconfiguredBalanceSource),
        };
        let service = AccessService::new(source, evaluator, store.clone());
        if clear_mock {
            service.set_mock_balance(None)?;
        } else if set_mock.is_some() {
            service.set_mock_balance(set_mock)?;
        }
        return print_json(&service.tier_info(&wallet).await?);
    }

    if set_mock.is_some() || clear_mock {
        bail!("--set-mock and --clear-mock apply to wallet lookups (--wallet)");
    }

    if let Some(balance) = balance {
        return print_json(&evaluator.tier_info(balance));
    }

    let signal = match tip {
        Some(amount) => TierSignal::Tip(amount),
        None => TierSignal::Submission(submitted),
    };
    let tier = evaluator.evaluate(signal);
    print_json(&serde_json::json!({
        "signal": signal,
        "tier": tier,
        "display_name": tier.display_name(),
        "privileges": tier.privileges(),
    }))
}

fn cmd_validate(text: &str, action: &str) -> Result<()> {
    let action = ActionKind::parse(action);
    let verdict = ContentValidator::new().validate(text, action.max_content_length());
    print_json(&verdict)
}

async fn cmd_authorize(
    config: &GateConfig,
    store: &ScopedStore,
    action: &str,
    identity: Option<String>,
    payload: Option<String>,
    audit: bool,
    repeat: u32,
) -> Result<()> {
    let mode = if audit { GateMode::Audit } else { GateMode::Live };
    let gate = SecurityGate::from_config(config, mode)?;

    let identity = match identity {
        Some(id) => id,
        None => IdentityProvider::new(store.clone()).get_or_create_token()?,
    };
    let action = ActionKind::parse(action);

    for _ in 0..repeat.max(1) {
        let result = gate
            .authorize(action.clone(), &identity, payload.as_deref())
            .await;
        print_json(&result)?;
        for reason in &result.reasons {
            eprintln!("denied: {}", reason);
        }
    }
    Ok(())
}

fn cmd_admin(store: &ScopedStore, action: AdminCommand) -> Result<()> {
    let admin = AdminOverride::load(store)?;
    match action {
        AdminCommand::Enable => admin.enable(),
        AdminCommand::Disable => admin.disable(),
        AdminCommand::Toggle => {
            admin.toggle();
        }
        AdminCommand::Status => {}
        AdminCommand::FromUrl { url } => {
            if AdminOverride::from_url(&url).is_active() {
                admin.enable();
            }
        }
    }
    admin.persist(store)?;

    println!("admin override: {}", if admin.is_active() { "on" } else { "off" });
    Ok(())
}

async fn cmd_beta_code(config: &GateConfig, store: &ScopedStore, code: &str) -> Result<()> {
    let verifier = SupabaseClient::from_config(config)?
        .map(|c| Arc::new(c) as Arc<dyn BetaCodeVerifier>);
    let beta = BetaAccess::new(store.clone(), verifier, config.mode, config.rpc_timeout());

    let outcome = beta.redeem_code(code).await?;
    print_json(&outcome)?;
    if let Some(path) = beta.current()? {
        print_json(&path)?;
    }
    Ok(())
}
