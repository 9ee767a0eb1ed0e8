pub mod auth;
pub mod rate_limit;

pub use auth::{mint_token, require_admin, AuthActor, Claims, MaybeActor};
pub use rate_limit::rate_limit_middleware;
