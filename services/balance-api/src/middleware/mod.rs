pub mod auth;

pub use auth::ApiKeyGuard;
