pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod progress;
pub mod routes;
pub mod store;

use config::AuthConfig;
use store::Store;

/// Shared handler state: the injected repositories plus the process-wide
/// token configuration.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub auth: AuthConfig,
}
