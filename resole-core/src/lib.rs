pub mod catalog;
pub mod credentials;
pub mod geocoding;
pub mod notification;
pub mod payment;
pub mod repository;

pub use catalog::ServiceCatalog;
pub use geocoding::GeocodingGateway;
pub use notification::{Notification, NotificationDispatcher};
pub use payment::{
    CheckoutSession, PaymentProcessor, PayoutAccountRequest, SessionRequest, SessionState,
};
pub use repository::{
    AccountRepository, OrderFilter, OrderRepository, PartnerDirectory, SettingsRepository,
    StoreError, WriteOutcome,
};

/// Failure talking to an external collaborator (geocoder, processor, mailer).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Upstream rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Malformed upstream response: {0}")]
    Decode(String),
    #[error("Unknown upstream resource: {0}")]
    NotFound(String),
}

impl GatewayError {
    /// Whether a retry with the same input may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Timeout => true,
            GatewayError::Rejected { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Decode(_) | GatewayError::NotFound(_) => false,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
