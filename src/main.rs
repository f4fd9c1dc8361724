mod admin;
mod api;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod loans;
mod middleware;
mod payments;
mod reconciliation;
mod server;
mod users;
mod wallet;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting lending backend");

    let config = config::Config::from_env().context("loading configuration")?;

    let state = bootstrap::initialize_app_state(&config)
        .await
        .context("initializing application state")?;

    let app = server::create_app(state, &config.cors_origin_list());

    server::run_server(app, &config.bind_address)
        .await
        .context("running HTTP server")?;

    info!("Server stopped");
    Ok(())
}
