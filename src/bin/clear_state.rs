//! Wipes position, trade log, market, metrics, and halt flag from the
//! state store. Prompts for confirmation unless `--yes` is passed.

use std::io::{self, Write};

use anyhow::Result;
use clap::Parser;
use gabagool_accumulator::config::AppConfig;
use gabagool_accumulator::store::StateStore;

#[derive(Parser)]
struct Args {
    /// Skip the confirmation prompt.
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::from_env()?;

    if !args.yes {
        print!(
            "This will permanently clear all state in {}. Continue? [y/N] ",
            config.database_path
        );
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let store = StateStore::new(&config.database_path)?;
    store.clear_all().await?;
    println!("State cleared.");
    Ok(())
}
