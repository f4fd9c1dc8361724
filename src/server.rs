use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use crate::{
    admin::handlers::{
        approve_loan, list_exceptions, list_loans, loan_detail, provider_transaction,
        provider_transactions, reject_loan,
    },
    api::handler::{health_check, paystack_webhook, verify_payment, AppState},
    loans::{
        application::{
            review_application, save_bank_details, save_guarantor, save_identity,
            save_personal_info, submit_application,
        },
        handlers::{apply_for_loan, initiate_repayment, my_loans},
    },
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
    users::handlers::{register, update_step},
    wallet::handlers::{create_virtual_account, get_wallet},
};

/// Requests per minute across the authenticated API
const USER_API_RATE_LIMIT: u32 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn create_app(state: AppState, cors_origins: &[String]) -> Router {
    info!("Setting up HTTP routes...");

    // The webhook stays outside the limiter; the provider must always get through
    let user_api = Router::new()
        .route("/auth/register", post(register))
        .route("/users/step", post(update_step))
        .route("/loans", post(apply_for_loan))
        .route("/loans/mine", get(my_loans))
        .route("/loans/repay", post(initiate_repayment))
        .route("/loans/application/personal-info", post(save_personal_info))
        .route("/loans/application/identity", post(save_identity))
        .route("/loans/application/guarantor", post(save_guarantor))
        .route("/loans/application/bank-details", post(save_bank_details))
        .route("/loans/application/review", get(review_application))
        .route("/loans/application/submit", post(submit_application))
        .route("/payments/verify/:reference", post(verify_payment))
        .route("/wallet", get(get_wallet))
        .route("/wallet/virtual-account", post(create_virtual_account))
        .route("/admin/loans", get(list_loans))
        .route("/admin/loans/:id", get(loan_detail))
        .route("/admin/loans/:id/approve", post(approve_loan))
        .route("/admin/loans/:id/reject", post(reject_loan))
        .route("/admin/reconciliation/exceptions", get(list_exceptions))
        .route("/admin/provider/transactions", get(provider_transactions))
        .route("/admin/provider/transactions/:id", get(provider_transaction))
        .route_layer(from_fn_with_state(
            RateLimitLayer::per_minute(USER_API_RATE_LIMIT),
            rate_limit_middleware,
        ));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                .route("/webhook/paystack", post(paystack_webhook))
                .merge(user_api),
        )
        .layer(CompressionLayer::new())
        .layer(create_cors_layer(cors_origins))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
}
