//! Grid Harvester - Main Entry Point

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grid_harvester::allocator::FundAllocator;
use grid_harvester::config::Config;
use grid_harvester::exchange::{BinanceClient, ExchangeApi, MockExchange, PaperExchange};
use grid_harvester::notify::Notifier;
use grid_harvester::persistence::StateStore;
use grid_harvester::trader::{SharedServices, StatusBoard, SymbolTrader};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Grid Harvester CLI
#[derive(Parser)]
#[command(name = "grid-harvester")]
#[command(version, about = "Volatility-adaptive grid trading with layered risk controls")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show persisted per-symbol state and recent trades
    Status {
        /// Path to SQLite database (default: data/harvester.db)
        #[arg(short, long, default_value = "data/harvester.db")]
        db: String,

        /// Show recent trade history per symbol
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db, verbose }) => show_status(&db, verbose),
        None => run().await,
    }
}

async fn run() -> Result<()> {
    info!(
        "grid-harvester v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load()?;
    log_config(&config);

    // Exchange wiring: live orders, or live data over simulated fills
    let client: Arc<dyn ExchangeApi> = if config.exchange.paper {
        info!("Paper trading mode: live market data, simulated fills");
        let data = build_binance_client(&config).await?;
        let sim = MockExchange::new();
        let mut quote_assets: Vec<&str> = Vec::new();
        for symbol in &config.symbols {
            sim.register_symbol(&symbol.symbol, &symbol.base_asset, &symbol.quote_asset)
                .await;
            if !quote_assets.contains(&symbol.quote_asset.as_str()) {
                quote_assets.push(&symbol.quote_asset);
            }
        }
        // Fund the simulated account with the configured capital per
        // quote currency
        for asset in quote_assets {
            sim.set_balance(asset, config.capital.total_capital).await;
        }
        Arc::new(PaperExchange::new(data, sim))
    } else {
        warn!("LIVE TRADING MODE - real orders will be placed");
        anyhow::ensure!(
            !config.exchange.api_key.is_empty() && !config.exchange.secret_key.is_empty(),
            "live trading requires API credentials"
        );
        Arc::new(build_binance_client(&config).await?)
    };

    // Shared services
    let allocator = Arc::new(FundAllocator::new(
        config.capital.total_capital,
        config.capital.max_global_usage,
        config.capital.allocation_strategy()?,
        Duration::from_secs(config.capital.rebalance_interval_secs),
        &config.symbol_names(),
    )?);

    if let Some(parent) = std::path::Path::new(&config.engine.db_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {parent:?}"))?;
    }
    let store = Arc::new(Mutex::new(StateStore::open(&config.engine.db_path)?));

    let notifier = Notifier::spawn(config.notify.webhook_url.clone());
    let status_board = StatusBoard::new();

    // Cooperative shutdown: loops observe the flag at each cycle top
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_signal.store(true, Ordering::SeqCst);
    });

    // Periodic status digest
    let digest_board = status_board.clone();
    let digest_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            if digest_shutdown.load(Ordering::SeqCst) {
                break;
            }
            for snapshot in digest_board.all().await {
                info!(
                    symbol = %snapshot.symbol,
                    status = %snapshot.status,
                    price = %snapshot.current_price,
                    base = %snapshot.base_price,
                    grid = %snapshot.grid_size_pct,
                    risk = %snapshot.risk_state,
                    ratio = %snapshot.position_ratio,
                    profit = %snapshot.realized_profit,
                    cycles = snapshot.cycles,
                    uptime_secs = snapshot.uptime_secs(),
                    "Status digest"
                );
            }
        }
    });

    // One loop per symbol
    let mut handles = Vec::new();
    for symbol in config.symbols.clone() {
        let services = SharedServices {
            client: Arc::clone(&client),
            allocator: Arc::clone(&allocator),
            store: Arc::clone(&store),
            notifier: notifier.clone(),
            status_board: status_board.clone(),
            shutdown: Arc::clone(&shutdown),
        };

        let trader = match SymbolTrader::initialize(config.clone(), symbol.clone(), services).await
        {
            Ok(trader) => trader,
            Err(e) => {
                error!(symbol = %symbol.symbol, error = %e, "Failed to initialize trader");
                continue;
            }
        };

        handles.push(tokio::spawn(trader.run()));
    }

    anyhow::ensure!(!handles.is_empty(), "no symbol trader could be started");
    info!(traders = handles.len(), "All trading loops started");

    for handle in handles {
        match handle.await {
            Ok(state) => info!(
                symbol = %state.symbol,
                status = %state.status,
                "Trader finished"
            ),
            Err(e) => error!(error = %e, "Trader task panicked"),
        }
    }

    info!("grid-harvester stopped");
    Ok(())
}

/// Build the REST client and warm the precision cache.
async fn build_binance_client(config: &Config) -> Result<BinanceClient> {
    let mut client = BinanceClient::new(&config.exchange)?;
    match client.load_precisions(&config.symbol_names()).await {
        Ok(()) => info!("Exchange precision info loaded"),
        Err(e) => warn!(error = %e, "Failed to load exchange info, using default precisions"),
    }
    Ok(client)
}

/// Print persisted state without starting the engine.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    let store = StateStore::open(db_path)?;
    let states = store.load_all_states()?;

    if states.is_empty() {
        println!("No persisted trader state found in {db_path}");
        return Ok(());
    }

    for state in states {
        let profit = store.total_profit(&state.symbol).unwrap_or(Decimal::ZERO);
        println!(
            "{:<12} status={:<10} base_price={:<12} grid={:<8} last_trade={} profit={:.2}",
            state.symbol,
            state.status.to_string(),
            state.base_price,
            state.grid_size_pct,
            state
                .last_trade_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            profit,
        );

        if verbose {
            for trade in store.recent_trades(&state.symbol, 10)? {
                println!(
                    "    {} {:<4} price={:<12} amount={:<12} profit={:.4} ({})",
                    trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    trade.side.to_string(),
                    trade.price,
                    trade.amount,
                    trade.profit,
                    trade.order_id,
                );
            }
        }
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "grid-harvester.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("grid_harvester=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log the resolved trading parameters on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!(
        "   Symbols: {}",
        config
            .symbols
            .iter()
            .map(|s| s.symbol.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!(
        "   Grid: base {:.2}% in [{:.2}%, {:.2}%], step {:.2}pp",
        config.grid.base_grid_pct * dec!(100),
        config.grid.min_grid_pct * dec!(100),
        config.grid.max_grid_pct * dec!(100),
        config.grid.min_adjust_step * dec!(100),
    );
    info!(
        "   Capital: {} total, {:.0}% max usage, strategy {}",
        config.capital.total_capital,
        config.capital.max_global_usage * dec!(100),
        config.capital.strategy,
    );
    info!(
        "   Risk: position ratio [{:.0}%, {:.0}%], stop loss {:.0}%, drawdown {:.0}%",
        config.risk.min_position_ratio * dec!(100),
        config.risk.max_position_ratio * dec!(100),
        config.risk.stop_loss_pct * dec!(100),
        config.risk.drawdown_pct * dec!(100),
    );
    info!(
        "   Position limit overrides: {}",
        if config.risk.position_limits.is_empty() {
            "none".to_string()
        } else {
            config
                .risk
                .position_limits
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    info!(
        "   Execution: {} per trade, {} attempts, {}ms backoff",
        config.execution.order_size_quote,
        config.execution.max_attempts,
        config.execution.initial_backoff_ms,
    );
    info!(
        "   Cycle: every {}s, volatility refresh every {}s, trend TTL {}s",
        config.engine.cycle_interval_secs,
        config.engine.volatility_refresh_secs,
        config.trend.cache_ttl_secs,
    );
}
