use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tabula::config::Config;
use tabula::store::Db;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let config = Config::parse();

    let store = match Db::open(&config.db) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("failed to open store at {}: {e}", config.db);
            process::exit(1);
        }
    };
    tracing::info!("store opened at {}", config.db);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(tabula::server::start(&config, Box::new(store))) {
        tracing::error!("{e}");
        process::exit(1);
    }
}
