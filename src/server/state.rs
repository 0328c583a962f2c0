//! Application state shared across handlers.

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::library::Catalog;
use crate::storage::ArtifactStore;
use axum::http::HeaderMap;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Book and page operations.
    pub catalog: Arc<Catalog>,
}

impl AppState {
    /// Create application state over an opened database.
    pub fn new_with_db(config: Config, db: Database) -> Self {
        let store = ArtifactStore::new(config.storage.media_dir.clone());
        Self {
            config: Arc::new(config),
            catalog: Arc::new(Catalog::new(db, store)),
        }
    }

    /// User ID forwarded by the upstream proxy, if any.
    pub fn user_id(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.config.identity.user_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// User ID, or `Unauthorized` when the request carries none.
    pub fn require_user(&self, headers: &HeaderMap) -> Result<String> {
        self.user_id(headers).ok_or_else(|| {
            AppError::Unauthorized(format!(
                "missing {} header",
                self.config.identity.user_header
            ))
        })
    }
}
