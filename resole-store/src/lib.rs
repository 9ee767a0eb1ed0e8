pub mod account_repo;
pub mod app_config;
pub mod database;
pub mod gateways;
pub mod memory;
pub mod order_repo;
pub mod redis_repo;
pub mod settings_repo;

pub use account_repo::PgAccountRepository;
pub use database::DbClient;
pub use memory::{
    InMemoryAccountRepository, InMemoryOrderRepository, InMemoryServiceCatalog,
    InMemorySettingsRepository,
};
pub use order_repo::PgOrderRepository;
pub use redis_repo::RedisClient;
pub use settings_repo::PgSettingsRepository;
