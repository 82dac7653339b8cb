use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    calendar::CalendarProvider,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub calendar: Arc<dyn CalendarProvider>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, calendar: Arc<dyn CalendarProvider>) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            calendar,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
