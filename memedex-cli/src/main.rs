//! Memedex CLI
//!
//! Connect a wallet, switch its network and watch the session from a
//! terminal. Wallets are reached through the JSON-RPC endpoints configured
//! under `providers` in the config file.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use memedex::config::{IssueLevel, config_path};
use memedex::prelude::*;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Memedex - wallet session manager for the memecoin dApp
#[derive(Parser)]
#[command(name = "memedex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "MEMEDEX_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a wallet and print the session
    Connect(WalletArgs),

    /// Connect a wallet and move it to another chain
    Switch(SwitchArgs),

    /// Show wallet availability and any already authorized session
    Status,

    /// List the networks known to the add-chain fallback
    Networks,

    /// Restore or open a session and print every change until Ctrl-C
    Watch(WatchArgs),

    /// Show the portfolio of an address
    Portfolio(AddressArgs),

    /// List the trades of an address
    Trades(AddressArgs),

    /// Show USD prices for token symbols
    Prices(PricesArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Wallet selection shared by several commands
#[derive(Args)]
struct WalletArgs {
    /// Wallet to use (metamask, binance)
    #[arg(short, long, default_value = "metamask")]
    wallet: WalletKind,
}

/// Arguments for the switch command
#[derive(Args)]
struct SwitchArgs {
    /// Target chain id (decimal)
    chain_id: u64,

    #[command(flatten)]
    wallet: WalletArgs,
}

/// Arguments for the watch command
#[derive(Args)]
struct WatchArgs {
    /// Prompt this wallet instead of relying on the silent reconnect
    #[arg(short, long)]
    wallet: Option<WalletKind>,
}

/// Arguments for backend queries by address
#[derive(Args)]
struct AddressArgs {
    /// Wallet address
    address: String,
}

/// Arguments for the prices command
#[derive(Args)]
struct PricesArgs {
    /// Token symbols, e.g. DOGE PEPE
    #[arg(required = true)]
    symbols: Vec<String>,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Show configuration file path
    Path,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "memedex={level},memedex_cli={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let path = cli.config.unwrap_or_else(config_path);
    if let Commands::Config(args) = cli.command {
        return cmd_config(&path, args).await;
    }
    let config = load(&path).await?;

    match cli.command {
        Commands::Connect(args) => cmd_connect(&config, args).await,
        Commands::Switch(args) => cmd_switch(&config, args).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Networks => {
            cmd_networks(&config);
            Ok(())
        }
        Commands::Watch(args) => cmd_watch(&config, args).await,
        Commands::Portfolio(args) => cmd_portfolio(&config, args).await,
        Commands::Trades(args) => cmd_trades(&config, args).await,
        Commands::Prices(args) => cmd_prices(&config, args).await,
        Commands::Config(_) => unreachable!("handled before loading"),
    }
}

async fn load(path: &Path) -> Result<MemedexConfig> {
    load_config(Some(path))
        .await
        .with_context(|| format!("failed to load {}", path.display()))
}

fn manager(config: &MemedexConfig) -> Result<WalletSessionManager> {
    WalletSessionManager::from_config(config).context("invalid configuration")
}

fn backend(config: &MemedexConfig) -> Result<HttpBackend> {
    HttpBackend::builder(&config.backend.url)
        .timeout(config.backend.timeout())
        .build()
        .context("invalid backend url")
}

fn print_session(session: &Session) {
    if !session.connected {
        println!("Not connected");
        return;
    }
    println!("Wallet:   {}", session.wallet_kind);
    println!("Account:  {}", session.account.as_deref().unwrap_or_default());
    if let Some(chain_id) = session.chain_id {
        println!("Chain:    {chain_id}");
    }
    println!("Balance:  {}", session.balance);
}

/// Connect and print the session.
async fn cmd_connect(config: &MemedexConfig, args: WalletArgs) -> Result<()> {
    let manager = manager(config)?;
    let session = manager.connect(args.wallet).await?;
    print_session(&session);
    Ok(())
}

/// Connect, switch, print the session.
async fn cmd_switch(config: &MemedexConfig, args: SwitchArgs) -> Result<()> {
    let manager = manager(config)?;
    manager.connect(args.wallet.wallet).await?;
    manager.switch_network(args.chain_id).await?;

    let session = manager.session();
    let name = manager
        .registry()
        .get(args.chain_id)
        .map_or("unknown network", |n| n.name.as_str());
    println!("Switched to {name} ({})", args.chain_id);
    print_session(&session);
    Ok(())
}

/// Show capabilities and the silently restorable session.
async fn cmd_status(config: &MemedexConfig) -> Result<()> {
    let manager = manager(config)?;

    println!("Memedex Status");
    println!("==============");
    println!();
    for kind in [WalletKind::MetaMask, WalletKind::Binance] {
        let mark = if manager.check_capability(kind) { "✓" } else { "✗" };
        println!("  {mark} {kind}");
    }
    println!();

    match manager.silent_reconnect().await {
        Ok(Some(session)) => print_session(&session),
        Ok(None) => println!("No authorized MetaMask account"),
        Err(e) => println!("Silent reconnect failed: {e}"),
    }
    println!();
    println!("Backend: {}", config.backend.url);
    Ok(())
}

fn cmd_networks(config: &MemedexConfig) {
    for (chain_id, network) in config.network_registry().iter() {
        println!(
            "{chain_id:>8}  {:<24} {:<6} {}",
            network.name, network.native_currency_symbol, network.rpc_url
        );
    }
}

/// Run the event bridge and print session changes until interrupted.
async fn cmd_watch(config: &MemedexConfig, args: WatchArgs) -> Result<()> {
    let manager = Arc::new(manager(config)?);
    let mut watcher = manager.store().subscribe();
    let bridge = ProviderEventBridge::start(Arc::clone(&manager))
        .context("event bridge already running")?;

    if let Some(kind) = args.wallet {
        manager.connect(kind).await?;
    }
    print_session(&watcher.current());

    loop {
        tokio::select! {
            changed = watcher.changed() => {
                let Some(session) = changed else { break };
                println!();
                print_session(&session);
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    bridge.shutdown().await;
    Ok(())
}

async fn cmd_portfolio(config: &MemedexConfig, args: AddressArgs) -> Result<()> {
    let portfolio = backend(config)?.portfolio(&args.address).await?;
    println!("Portfolio of {}", portfolio.wallet_address);
    println!("  Tokens:      {}", portfolio.tokens.len());
    println!("  Total value: ${:.2}", portfolio.total_value_usd);
    Ok(())
}

async fn cmd_trades(config: &MemedexConfig, args: AddressArgs) -> Result<()> {
    let trades = backend(config)?.trades(&args.address).await?;
    if trades.is_empty() {
        println!("No trades");
    }
    for trade in trades {
        println!(
            "{}  {:<4} {:>14} {:<8} {:?}",
            trade.id, trade.trade_type, trade.amount, trade.token_symbol, trade.status
        );
    }
    Ok(())
}

async fn cmd_prices(config: &MemedexConfig, args: PricesArgs) -> Result<()> {
    let symbols: Vec<&str> = args.symbols.iter().map(String::as_str).collect();
    let mut prices: Vec<_> = backend(config)?.prices(&symbols).await?.into_iter().collect();
    prices.sort_by(|a, b| a.0.cmp(&b.0));
    for (symbol, price) in prices {
        let change = price
            .usd_24h_change
            .map_or_else(String::new, |c| format!("  {c:+.2}%"));
        println!("{symbol:<8} ${}{change}", price.usd);
    }
    Ok(())
}

/// Manage configuration.
async fn cmd_config(path: &Path, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let config = load(path).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                println!("Configuration already exists at: {}", path.display());
                println!("Use --force to overwrite.");
                return Ok(());
            }
            save_config(&MemedexConfig::default(), path).await?;
            println!("Configuration created: {}", path.display());
        }
        ConfigCommands::Validate => {
            let issues = load(path).await?.validate();
            if issues.is_empty() {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            for issue in &issues {
                let label = match issue.level {
                    IssueLevel::Warning => "warning",
                    IssueLevel::Error => "error",
                };
                println!("{label}: {}: {}", issue.field, issue.message);
            }
            if issues.iter().any(|i| i.level == IssueLevel::Error) {
                bail!("configuration has errors");
            }
        }
    }
    Ok(())
}
