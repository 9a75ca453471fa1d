//! Smoke-tests venue connectivity: lists 15-minute BTC markets and, if
//! one exists, fetches its order book. Exits non-zero on failure so it
//! can gate deploys.

use anyhow::Result;
use gabagool_accumulator::config::AppConfig;
use gabagool_accumulator::venue::{PolymarketVenueClient, VenueClient};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    let venue = PolymarketVenueClient::new(
        config.polymarket_api_url.clone(),
        config.polymarket_api_key.clone(),
    )?;

    println!("Checking venue at {}...", config.polymarket_api_url);

    let markets = venue.list_15min_markets("BTC").await?;
    println!("Found {} BTC 15-minute markets.", markets.len());

    if let Some(market) = markets.first() {
        println!("Fetching order book for {}...", market.question);
        let book = venue.get_market_order_book(market).await?;
        println!(
            "  YES best bid/ask: {:?} / {:?}",
            book.best_bid(gabagool_accumulator::domain::Side::Yes),
            book.best_ask(gabagool_accumulator::domain::Side::Yes)
        );
        println!(
            "  NO  best bid/ask: {:?} / {:?}",
            book.best_bid(gabagool_accumulator::domain::Side::No),
            book.best_ask(gabagool_accumulator::domain::Side::No)
        );
    }

    println!("Venue connection OK.");
    Ok(())
}
