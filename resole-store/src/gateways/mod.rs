pub mod mock;
pub mod nominatim;
pub mod notifier;
pub mod stripe;

pub use mock::{MockPaymentProcessor, StaticGeocoder};
pub use nominatim::NominatimGeocoder;
pub use notifier::{RecordingNotifier, TracingNotifier};
pub use stripe::StripeProcessor;

use resole_core::GatewayError;

pub(crate) fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else if e.is_decode() {
        GatewayError::Decode(e.to_string())
    } else {
        GatewayError::Transport(e.to_string())
    }
}

/// Turn a non-success response into `Rejected`, keeping a bounded body excerpt.
pub(crate) async fn reject(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(300).collect();
    GatewayError::Rejected { status, message }
}
