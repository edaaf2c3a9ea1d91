use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use tradepipe::session::coordinator::{run_sessions, AggregateSummary};
use tradepipe::session::{run_session, SessionConfig, SessionResult, SessionSpec};
use tradepipe::telemetry;

#[derive(Debug, Parser)]
#[command(name = "tradepipe", about = "Streaming trading-session simulator")]
struct Cli {
    /// Run the three built-in demo sessions concurrently.
    #[arg(long)]
    concurrent: bool,

    /// Run one named demo session (btc, eth, ada).
    #[arg(long, conflicts_with = "concurrent")]
    session: Option<String>,

    /// Path to the order book snapshot JSON file.
    #[arg(long, default_value = "data/sample1.json")]
    orderbook: PathBuf,

    /// Symbol stamped on intents and the trade log.
    #[arg(long, default_value = "BTCUSD")]
    symbol: String,

    /// Entry price (0 = auto, market entry).
    #[arg(long, default_value_t = 0.0)]
    entry: f64,

    /// Order size.
    #[arg(long, default_value_t = 100.0)]
    size: f64,

    /// Stop loss fraction (0.02 = 2%).
    #[arg(long, default_value_t = 0.02)]
    stop: f64,

    /// Take profit fraction (0.05 = 5%).
    #[arg(long, default_value_t = 0.05)]
    profit: f64,

    /// Minimum liquidity threshold.
    #[arg(long, default_value_t = 1000.0)]
    liquidity: f64,

    /// Maximum hold time in seconds.
    #[arg(long, default_value_t = 30)]
    hold: u64,

    /// Output CSV file for the trade log.
    #[arg(long, default_value = "trades.csv")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info");
    let cli = Cli::parse();

    if cli.concurrent {
        let summary = run_sessions(demo_sessions()).await;
        print_aggregate(&summary);
        return Ok(());
    }

    if let Some(id) = cli.session.as_deref() {
        let Some(spec) = demo_sessions().into_iter().find(|spec| {
            spec.id.to_lowercase().starts_with(&id.to_lowercase())
        }) else {
            anyhow::bail!("unknown session id {id:?}; available: btc, eth, ada");
        };
        let result = run_session(spec, None).await;
        print_session(&result);
        return Ok(());
    }

    let spec = SessionSpec {
        id: "single".to_string(),
        symbol: cli.symbol,
        feed_path: cli.orderbook,
        config: SessionConfig {
            entry_price: cli.entry,
            order_size: cli.size,
            stop_loss_pct: cli.stop,
            take_profit_pct: cli.profit,
            min_liquidity: cli.liquidity,
            max_hold: Duration::from_secs(cli.hold),
            output_path: cli.output,
        },
    };
    let result = run_session(spec, None).await;
    print_session(&result);
    Ok(())
}

/// The three built-in demo sessions, one per sample file.
fn demo_sessions() -> Vec<SessionSpec> {
    vec![
        SessionSpec {
            id: "btc-aggressive".to_string(),
            symbol: "BTCUSD".to_string(),
            feed_path: PathBuf::from("data/sample1.json"),
            config: SessionConfig {
                entry_price: 0.0,
                order_size: 2.5,
                stop_loss_pct: 0.015,
                take_profit_pct: 0.04,
                min_liquidity: 800.0,
                max_hold: Duration::from_secs(8),
                output_path: PathBuf::from("concurrent_btc_trades.csv"),
            },
        },
        SessionSpec {
            id: "eth-conservative".to_string(),
            symbol: "ETHUSD".to_string(),
            feed_path: PathBuf::from("data/sample2.json"),
            config: SessionConfig {
                entry_price: 3000.0,
                order_size: 5.0,
                stop_loss_pct: 0.01,
                take_profit_pct: 0.025,
                min_liquidity: 1200.0,
                max_hold: Duration::from_secs(12),
                output_path: PathBuf::from("concurrent_eth_trades.csv"),
            },
        },
        SessionSpec {
            id: "ada-highfreq".to_string(),
            symbol: "ADAUSD".to_string(),
            feed_path: PathBuf::from("data/sample3.json"),
            config: SessionConfig {
                entry_price: 0.0,
                order_size: 8000.0,
                stop_loss_pct: 0.005,
                take_profit_pct: 0.015,
                min_liquidity: 2000.0,
                max_hold: Duration::from_secs(6),
                output_path: PathBuf::from("concurrent_ada_trades.csv"),
            },
        },
    ]
}

fn print_session(result: &SessionResult) {
    println!("\n=== TRADING SUMMARY ===");
    println!("Session:      {}", result.session_id);
    println!("Total trades: {}", result.trade_count);
    println!("Total P&L:    {:.2}", result.total_pnl);
    println!("Duration:     {:.2?}", result.wall_duration);
    match &result.error {
        None => println!("Status:       ok"),
        Some(err) => println!("Status:       failed ({err})"),
    }
}

fn print_aggregate(summary: &AggregateSummary) {
    println!("\n=== CONCURRENT EXECUTION RESULTS ===");
    for result in &summary.results {
        match &result.error {
            None => println!(
                "  {:<20} {:>3} trades  P&L {:>10.2}  in {:.2?}",
                result.session_id, result.trade_count, result.total_pnl, result.wall_duration
            ),
            Some(err) => println!("  {:<20} failed: {err}", result.session_id),
        }
    }
    println!(
        "\nSessions: {}/{} succeeded, {} trades, combined P&L {:.2}, wall time {:.2?}",
        summary.successes,
        summary.results.len(),
        summary.total_trades,
        summary.total_pnl,
        summary.wall_duration
    );
}
