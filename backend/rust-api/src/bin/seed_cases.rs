use anyhow::{bail, Context};
use tracing_subscriber::fmt::init;

use mediscope_api::{
    config::Config,
    services::{case_seed, mongo_store::MongoStore},
};

/// Usage: `seed-cases <file.json>`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: seed-cases <file.json>");
    };

    let json = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
    let cases = case_seed::parse_cases(&json)?;

    let config = Config::load().context("Failed to load configuration")?;
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let store = MongoStore::new(mongo_client, &config.mongo_database);
    store.ensure_indexes().await?;

    let written = case_seed::seed_cases(&store, &cases).await?;
    tracing::info!("Seeded {} cases from {}", written, path);

    Ok(())
}
