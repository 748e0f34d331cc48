//! Triple-Timeframe Trader - Main Entry Point
//!
//! Runs one trading session of the scan pipeline against Alpaca, or against
//! the in-memory paper broker with `--paper`.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use triple_timeframe_trader::config::Config;
use triple_timeframe_trader::exchange::{AlpacaClient, OrderGateway, PaperBroker, WatchlistSource};
use triple_timeframe_trader::feed::ScreenerFeed;
use triple_timeframe_trader::persistence::{SqliteTradeStore, TradeStore};
use triple_timeframe_trader::pipeline::{
    stop_switch, Scheduler, SessionReport, SessionSettings, Termination,
};
use triple_timeframe_trader::strategy::TripleScreenEvaluator;

/// Triple-Timeframe Trader CLI
#[derive(Parser)]
#[command(name = "triple-timeframe-trader")]
#[command(version, about = "Concurrent triple-timeframe stock scanner and trader on Alpaca")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trading session (default)
    Run {
        /// Route orders to the in-memory paper broker
        #[arg(long)]
        paper: bool,

        /// Stop every stage after N passes instead of at market close
        #[arg(long)]
        passes: Option<u32>,
    },

    /// Show persisted open positions and a day's trades
    Status {
        /// Path to SQLite database (default: from configuration)
        #[arg(short, long)]
        db: Option<String>,

        /// Session date (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Show the paper session store
        #[arg(long)]
        paper: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db, date, paper }) => show_status(db, date, paper),
        Some(Commands::Run { paper, passes }) => run_session(paper, passes).await,
        None => run_session(false, None).await,
    }
}

/// Run one session until the configured termination.
async fn run_session(paper: bool, passes: Option<u32>) -> Result<()> {
    info!(
        "Triple-Timeframe Trader v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = Config::load()?;
    if let Some(passes) = passes {
        config.session.termination = Termination::Bounded { passes };
    }
    config.validate()?;
    log_config(&config, paper);

    let alpaca = Arc::new(AlpacaClient::new(&config.alpaca)?);
    let evaluator = Arc::new(TripleScreenEvaluator::new(
        alpaca.clone(),
        config.indicators.clone(),
    ));

    let store = Arc::new(SqliteTradeStore::new(
        config.persistence.db_path_for(paper),
    )?);

    let gateway: Arc<dyn OrderGateway> = if paper {
        info!("📝 PAPER MODE - orders go to the in-memory broker");
        let broker = PaperBroker::new();
        let carried = store
            .load_open_positions()
            .context("Failed to load paper positions")?;
        broker
            .restore(&carried, config.session.order_quantity)
            .await;
        Arc::new(broker)
    } else {
        warn!("⚠️  Orders are routed to Alpaca");
        log_broker_positions(&alpaca).await;
        alpaca.clone()
    };

    let mut watchlists: Vec<Arc<dyn WatchlistSource>> = vec![alpaca.clone()];
    if config.feed.enabled {
        watchlists.push(Arc::new(ScreenerFeed::new(&config.feed)?));
    }

    let settings = SessionSettings::from_config(&config);

    let (stop, stop_listener) = stop_switch();
    let scheduler =
        Scheduler::new(evaluator, gateway, watchlists, store, settings).with_stop(stop_listener);

    let session = scheduler.run();
    tokio::pin!(session);

    let report = tokio::select! {
        result = &mut session => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 Interrupted; stopping workers after their current pass");
            stop.trigger();
            session.await?
        }
    };
    log_report(&report);
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("triple_timeframe_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config, paper: bool) {
    info!("📋 Configuration:");
    let broker = if paper {
        "in-memory paper"
    } else if config.alpaca.paper {
        "alpaca paper"
    } else {
        "alpaca live"
    };
    info!("   Broker: {}", broker);
    info!("   Termination: {:?}", config.session.termination);
    info!("   Promotion: {:?}", config.session.promotion);
    info!("   Order Quantity: {}", config.session.order_quantity);
    info!(
        "   Trailing Stop: {:.1}%",
        config.session.trailing_percent * dec!(100)
    );
    info!("   Call Timeout: {}s", config.session.call_timeout_secs);
    info!(
        "   Screener: {}",
        if config.feed.enabled { "enabled" } else { "disabled" }
    );
    info!("   Database: {}", config.persistence.db_path_for(paper));
}

/// Open positions as the broker sees them, for reconciliation with the store.
async fn log_broker_positions(client: &AlpacaClient) {
    match client.get_positions().await {
        Ok(positions) => {
            let symbols: Vec<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
            info!(count = positions.len(), ?symbols, "Broker open positions");
        }
        Err(e) => error!(error = %e, "Failed to fetch broker positions"),
    }
}

fn log_report(report: &SessionReport) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for worker in &report.workers {
        info!(
            worker = %worker.kind,
            passes = worker.passes,
            evaluated = worker.evaluated,
            promoted = worker.promoted,
            orders = worker.orders_placed,
            closed = worker.positions_closed,
            failures = worker.failures,
            "Worker summary"
        );
    }
    info!(
        trades = report.trades_flushed,
        open_positions = report.open_positions,
        "✅ Session complete"
    );
}

fn show_status(db: Option<String>, date: Option<NaiveDate>, paper: bool) -> Result<()> {
    let db_path = match db {
        Some(path) => path,
        None => Config::load()?
            .persistence
            .db_path_for(paper)
            .to_string(),
    };
    let date = date.unwrap_or_else(|| Local::now().date_naive());

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              TRADER STATUS                                 ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(&db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   No session has run yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = SqliteTradeStore::new(&db_path).context("Failed to open trade store")?;

    let open = store.load_open_positions()?;
    println!("\n🔓 Open Positions ({})", open.len());
    for record in &open {
        println!("   ┌─ {}", record.symbol);
        match record.cost_basis {
            Some(cost_basis) => println!("   ├─ Cost Basis:   ${:.2}", cost_basis),
            None => println!("   ├─ Cost Basis:   (not observed yet)"),
        }
        println!(
            "   ├─ P/L:          {:+.2}% (max {:+.2}%)",
            record.unrealized_plpc * dec!(100),
            record.max_unrealized_plpc * dec!(100)
        );
        println!(
            "   └─ Opened:       {}",
            record.opened_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    let trades = store.trades_on(date)?;
    println!("\n📈 Trades on {} ({})", date, trades.len());
    for record in &trades {
        let closed = record
            .closed_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   ├─ {:<6} {:+.2}% (max {:+.2}%) closed {}",
            record.symbol,
            record.unrealized_plpc * dec!(100),
            record.max_unrealized_plpc * dec!(100),
            closed
        );
    }

    println!();
    Ok(())
}
