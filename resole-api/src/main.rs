use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use resole_api::{app, worker, AppState, AuthConfig, Backends, RateLimiter};
use resole_core::{GeocodingGateway, PaymentProcessor};
use resole_order::{CheckoutUrls, PollSchedule, RetryPolicy};
use resole_store::app_config::{Config, GeocoderProvider, ProcessorProvider};
use resole_store::gateways::{
    MockPaymentProcessor, NominatimGeocoder, StaticGeocoder, StripeProcessor, TracingNotifier,
};
use resole_store::{
    DbClient, InMemoryAccountRepository, InMemoryOrderRepository, InMemoryServiceCatalog,
    InMemorySettingsRepository, PgAccountRepository, PgOrderRepository, PgSettingsRepository,
    RedisClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "resole_api=debug,resole_order=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Resole API on port {}", config.server.port);

    let backends = build_backends(&config).await?;

    let retry = RetryPolicy::new(
        config.geocoding.max_attempts,
        Duration::from_millis(config.geocoding.backoff_ms),
    );
    let urls = CheckoutUrls {
        success_url: config.payments.success_url.clone(),
        cancel_url: config.payments.cancel_url.clone(),
    };
    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
        expiration: config.auth.jwt_expiration_seconds,
    };

    let mut app_state = AppState::new(backends, retry, urls, auth).with_poll_schedule(PollSchedule::new(
        config.polling.max_attempts,
        Duration::from_millis(config.polling.interval_ms),
    ));

    if let Some(url) = &config.redis.url {
        match RedisClient::new(url).await {
            Ok(redis) => {
                app_state = app_state.with_rate_limiter(RateLimiter {
                    redis: Arc::new(redis),
                    limit: config.redis.rate_limit,
                    window_seconds: config.redis.window_seconds,
                });
            }
            Err(e) => tracing::warn!("Redis unavailable, rate limiting disabled: {}", e),
        }
    }

    worker::start_assignment_sweep(
        app_state.assignment.clone(),
        Duration::from_secs(config.assignment.sweep_interval_seconds),
    );

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

async fn build_backends(config: &Config) -> anyhow::Result<Backends> {
    let geocoder: Arc<dyn GeocodingGateway> = match config.geocoding.provider {
        GeocoderProvider::Nominatim => Arc::new(NominatimGeocoder::new(
            &config.geocoding.base_url,
            &config.geocoding.user_agent,
            Duration::from_millis(config.geocoding.timeout_ms),
        )?),
        GeocoderProvider::Static => Arc::new(
            config
                .geocoding
                .places
                .iter()
                .fold(StaticGeocoder::new(), |g, place| g.with(&place.address, place.point())),
        ),
    };

    let processor: Arc<dyn PaymentProcessor> = match config.payments.provider {
        ProcessorProvider::Stripe => {
            let secret_key = config
                .payments
                .secret_key
                .as_deref()
                .context("payments.secret_key is required for the stripe provider")?;
            Arc::new(
                StripeProcessor::new(
                    &config.payments.api_base,
                    secret_key,
                    Duration::from_millis(config.payments.timeout_ms),
                )?
                .with_connect_country(&config.payments.connect_country),
            )
        }
        ProcessorProvider::Mock => {
            tracing::warn!("Using the mock payment processor; no real charges are made");
            Arc::new(MockPaymentProcessor::new())
        }
    };

    let catalog = Arc::new(InMemoryServiceCatalog::new(config.catalog.offerings.clone()));
    let notifier = Arc::new(TracingNotifier);

    let backends = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await?;

            let accounts = Arc::new(PgAccountRepository::new(db.pool.clone()));
            Backends {
                orders: Arc::new(PgOrderRepository::new(db.pool.clone())),
                accounts: accounts.clone(),
                partners: accounts,
                settings: Arc::new(PgSettingsRepository::new(db.pool.clone(), config.business_rules.clone())),
                catalog,
                geocoder,
                processor,
                notifier,
            }
        }
        None => {
            tracing::warn!("No database configured; using the in-memory store");
            let accounts = Arc::new(InMemoryAccountRepository::new());
            Backends {
                orders: Arc::new(InMemoryOrderRepository::new()),
                accounts: accounts.clone(),
                partners: accounts,
                settings: Arc::new(InMemorySettingsRepository::new(config.business_rules.clone())),
                catalog,
                geocoder,
                processor,
                notifier,
            }
        }
    };

    Ok(backends)
}
