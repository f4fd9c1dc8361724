use chrono::Duration as ChronoDuration;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    admin::ListingCache,
    api::handler::AppState,
    config::{Config, LedgerBackend},
    error::AppResult,
    ledger::{
        models::{Role, User, Wallet},
        LedgerStore, MemoryLedgerStore, PgLedgerStore,
    },
    payments::{PaymentGateway, PaystackClient},
    reconciliation::Reconciler,
};

/// Pending transactions re-verified per sweep
const SWEEP_BATCH: i64 = 100;

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let ledger: Arc<dyn LedgerStore> = match config.ledger_backend()? {
        LedgerBackend::Postgres => {
            let pool = initialize_database(&config.database_url).await?;
            Arc::new(PgLedgerStore::new(pool))
        }
        LedgerBackend::Memory => {
            warn!("Using the in-memory ledger; nothing survives a restart");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    if config.paystack_secret_key.is_empty() {
        warn!("PAYSTACK_SECRET_KEY not set; every webhook will fail signature verification");
    }
    if config.jwt_secret.is_empty() {
        warn!("JWT_SECRET not set; every authenticated request will be rejected");
    }

    let gateway: Arc<dyn PaymentGateway> = Arc::new(PaystackClient::new(&config.paystack())?);
    info!(base_url = %config.paystack_base_url, "Paystack client initialized");

    let reconciler = Reconciler::new(ledger.clone(), gateway.clone());

    seed_admin(ledger.as_ref(), &config.admin_email).await?;

    spawn_stale_sweep(
        reconciler.clone(),
        Duration::from_secs(config.sweep_interval_secs.max(1)),
        ChronoDuration::minutes(config.stale_transaction_minutes),
    );

    Ok(AppState {
        ledger,
        gateway,
        reconciler,
        listing_cache: Arc::new(ListingCache::default()),
        webhook_secret: Arc::from(config.paystack_secret_key.as_str()),
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    })
}

/// Ensures the configured admin account and its wallet exist
pub async fn seed_admin(ledger: &dyn LedgerStore, admin_email: &str) -> AppResult<()> {
    let mut tx = ledger.begin().await?;

    if let Some(existing) = tx.find_user_by_email(admin_email).await? {
        if existing.role != Role::Admin {
            warn!(email = %admin_email, "Seed admin email belongs to a non-admin user");
        }
        return Ok(());
    }

    let admin = User::new(admin_email, Some("System Administrator".to_string()), None, Role::Admin);
    tx.insert_user(&admin).await?;
    tx.insert_wallet(&Wallet::new(admin.id)).await?;
    tx.commit().await?;

    info!(email = %admin_email, "Admin user seeded");
    Ok(())
}

/// Background safety net for lost webhooks
fn spawn_stale_sweep(reconciler: Reconciler, every: Duration, stale_after: ChronoDuration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // first tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match reconciler.sweep_stale(stale_after, SWEEP_BATCH).await {
                Ok(report) if report.examined > 0 => info!(
                    examined = report.examined,
                    applied = report.applied,
                    still_pending = report.still_pending,
                    errors = report.errors,
                    "Stale transaction sweep finished"
                ),
                Ok(_) => {}
                Err(e) => error!("Stale transaction sweep failed: {}", e),
            }
        }
    });
    info!(every_secs = every.as_secs(), "Stale transaction sweep started");
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}
