// Shared application state handed to every handler and the WebSocket
// gateway as an `Arc<AppState>`.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::config::Config;
use crate::db::Database;
use crate::error::ApiError;
use crate::presence::PresenceRegistry;
use crate::tmdb::Tmdb;

pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub tmdb: Tmdb,
    pub presence: PresenceRegistry,
}

impl AppState {
    /// Open the database and build the shared state from config.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let db = Database::open(&config.db_path)
            .with_context(|| format!("failed to open database at {}", config.db_path))?;
        let tmdb = Tmdb::from_config(&config);
        Ok(Arc::new(Self {
            config,
            db,
            tmdb,
            presence: PresenceRegistry::new(),
        }))
    }

    /// The signing secret for auth tokens. Startup refuses to run without
    /// one, so handlers reaching this in production always succeed; a bare
    /// test state without credentials gets a 500 instead of a panic.
    pub fn jwt_secret(&self) -> Result<&str, ApiError> {
        self.config
            .credentials
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::Internal(anyhow!("jwt secret not configured")))
    }
}
