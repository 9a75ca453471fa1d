//! Prints the current position, active market, recent trades, and risk
//! metrics from the state store. Read-only, safe to run alongside a
//! live instance.

use anyhow::Result;
use clap::Parser;
use gabagool_accumulator::config::AppConfig;
use gabagool_accumulator::store::StateStore;

#[derive(Parser)]
struct Args {
    /// Number of recent trades to show.
    #[arg(long, default_value_t = 10)]
    trades: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::from_env()?;
    let store = StateStore::new(&config.database_path)?;

    let position = store.get_position().await?;
    println!("Position:");
    println!(
        "  YES: qty={} avg={} cost={}",
        position.qty_yes, position.avg_yes, position.cost_yes
    );
    println!(
        "  NO:  qty={} avg={} cost={}",
        position.qty_no, position.avg_no, position.cost_no
    );
    println!("  pair_cost={} delta={}", position.pair_cost, position.delta);
    println!("  locked_profit={}", position.locked_profit);

    match store.get_market().await? {
        Some(market) => {
            println!("\nMarket: {} ({})", market.question, market.market_id);
            println!("  expires: {}", market.expiration);
        }
        None => println!("\nMarket: none selected"),
    }

    println!("\nHalted: {}", store.is_halted().await?);

    let trades = store.get_recent_trades(args.trades).await?;
    println!("\nRecent trades ({}):", trades.len());
    for t in trades {
        println!(
            "  {} {} {} @ {} (pair_cost={}, delta={})",
            t.timestamp, t.side, t.qty, t.price, t.resulting_pair_cost, t.resulting_delta
        );
    }

    let metrics = store.get_metrics().await?;
    if !metrics.is_empty() {
        println!("\nMetrics:");
        for (k, v) in metrics {
            println!("  {k} = {v}");
        }
    }

    Ok(())
}
