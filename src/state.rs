use crate::config::DashboardConfig;
use crate::context::LogStreamContext;
use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub context: Arc<LogStreamContext>,
}

impl AppState {
    pub fn new(config: &DashboardConfig, db_pool: SqlitePool) -> Self {
        let context = LogStreamContext::new(config, db_pool.clone(), Client::new());

        Self {
            started_at: Instant::now(),
            db_pool,
            context: Arc::new(context),
        }
    }
}
