use std::sync::Arc;

use resole_core::{
    AccountRepository, GeocodingGateway, NotificationDispatcher, OrderRepository,
    PartnerDirectory, PaymentProcessor, ServiceCatalog, SettingsRepository,
};
use resole_order::{
    AssignmentEngine, CheckoutOrchestrator, CheckoutUrls, OrderStateMachine, PaymentSettlement,
    PollSchedule, RetryPolicy,
};
use resole_store::RedisClient;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    pub redis: Arc<RedisClient>,
    pub limit: i64,
    pub window_seconds: i64,
}

/// Storage and gateway implementations chosen at startup.
pub struct Backends {
    pub orders: Arc<dyn OrderRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub partners: Arc<dyn PartnerDirectory>,
    pub settings: Arc<dyn SettingsRepository>,
    pub catalog: Arc<dyn ServiceCatalog>,
    pub geocoder: Arc<dyn GeocodingGateway>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderRepository>,
    pub partners: Arc<dyn PartnerDirectory>,
    pub settings: Arc<dyn SettingsRepository>,
    pub assignment: Arc<AssignmentEngine>,
    pub state_machine: Arc<OrderStateMachine>,
    pub checkout: Arc<CheckoutOrchestrator>,
    pub settlement: Arc<PaymentSettlement>,
    pub poll_schedule: PollSchedule,
    pub rate_limiter: Option<RateLimiter>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(backends: Backends, retry: RetryPolicy, urls: CheckoutUrls, auth: AuthConfig) -> Self {
        let assignment = Arc::new(
            AssignmentEngine::new(
                backends.orders.clone(),
                backends.partners.clone(),
                backends.geocoder,
                backends.notifier.clone(),
            )
            .with_retry(retry),
        );

        let state_machine = Arc::new(OrderStateMachine::new(backends.orders.clone(), assignment.clone()));

        let checkout = Arc::new(CheckoutOrchestrator::new(
            backends.catalog,
            backends.orders.clone(),
            backends.accounts,
            backends.settings.clone(),
            assignment.clone(),
            backends.notifier.clone(),
        ));

        let settlement = Arc::new(PaymentSettlement::new(
            backends.orders.clone(),
            backends.partners.clone(),
            backends.processor,
            backends.notifier,
            urls,
        ));

        Self {
            orders: backends.orders,
            partners: backends.partners,
            settings: backends.settings,
            assignment,
            state_machine,
            checkout,
            settlement,
            poll_schedule: PollSchedule::default(),
            rate_limiter: None,
            auth,
        }
    }

    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.poll_schedule = schedule;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}
