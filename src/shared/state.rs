use std::sync::Arc;

use crate::config::AppConfig;
use crate::directory::lookup::PersonLookup;
use crate::security::jwt::JwtManager;
use crate::shared::utils::DbPool;

/// Shared application state handed to every handler. Requests hold no other
/// mutable state; cross-request coordination is delegated to the database.
#[derive(Clone)]
pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub jwt: Arc<JwtManager>,
    pub persons: Arc<dyn PersonLookup>,
}

impl AppState {
    pub fn new(
        conn: DbPool,
        config: AppConfig,
        jwt: Arc<JwtManager>,
        persons: Arc<dyn PersonLookup>,
    ) -> Self {
        Self {
            conn,
            config,
            jwt,
            persons,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish()
    }
}
