use axum::{
    http::Method,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod error;
pub mod middleware;
pub mod orders;
pub mod partners;
pub mod payments;
pub mod state;
pub mod worker;

pub use error::AppError;
pub use state::{AppState, AuthConfig, Backends, RateLimiter};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let order_routes = Router::new()
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/bulk", post(orders::create_bulk_order))
        .route("/orders/guest", post(orders::create_guest_order))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/accept", post(orders::accept_order))
        .route("/orders/{id}/status", patch(orders::update_status))
        .route("/orders/{id}/payment", post(orders::create_payment))
        .route("/orders/{id}/confirm", post(orders::confirm_payment));

    let payment_routes = Router::new()
        .route("/payments/create-checkout-session", post(payments::create_checkout_session))
        .route("/payments/checkout-status/{session_id}", get(payments::checkout_status))
        .route("/payments/webhook", post(payments::webhook));

    let admin_routes = Router::new()
        .route("/cobbler/address", put(partners::update_address))
        .route("/cobbler/payout-account", post(partners::connect_payout_account))
        .route("/admin/partners/{id}/approve", post(partners::approve_partner))
        .route("/admin/partners/{id}/reject", post(partners::reject_partner))
        .route("/admin/assignments/sweep", post(admin::run_sweep))
        .route("/settings", get(admin::get_settings).put(admin::update_settings));

    Router::new()
        .route("/health", get(admin::health))
        .merge(order_routes)
        .merge(payment_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
