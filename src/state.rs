use crate::config::AppConfig;
use crate::db::{self, DbPool, OrmConn};

/// Shared handles for both database layers: raw sqlx for auth and audit
/// writes, SeaORM for everything that goes through the entity layer.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
}

impl AppState {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let pool = db::create_pool(&config.database_url, config.max_connections).await?;
        let orm = db::create_orm_conn(&config.database_url).await?;
        Ok(Self { pool, orm })
    }
}
