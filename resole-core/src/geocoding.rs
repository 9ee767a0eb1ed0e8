use async_trait::async_trait;

use crate::GatewayError;
use resole_shared::GeoPoint;

#[async_trait]
pub trait GeocodingGateway: Send + Sync {
    /// Resolve a free-text address. `Ok(None)` means the address is
    /// unresolvable and should not be retried; `Err` is a transport failure.
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, GatewayError>;
}
