pub mod admin;
pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod users;

#[cfg(test)]
mod test_support;

pub use bootstrap::UsersApi;
pub use config::Settings;
pub use error::{AuthError, ConfigError};
