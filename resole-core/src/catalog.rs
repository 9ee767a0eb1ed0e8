use async_trait::async_trait;
use uuid::Uuid;

use crate::repository::StoreError;
use resole_catalog::ServiceOffering;

/// Read-only view of the service catalog used at checkout.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn offering(&self, id: Uuid) -> Result<Option<ServiceOffering>, StoreError>;

    async fn offerings(&self) -> Result<Vec<ServiceOffering>, StoreError>;
}
