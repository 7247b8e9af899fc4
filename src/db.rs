use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub type DbPool = DatabaseConnection;

/// Pool tuning, derived from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections.min(cfg.db_max_connections),
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Opens the pool. SQLite URLs need `mode=rwc` to create the file.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("stockledger.db.max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "could not open database pool");
        ServiceError::db_error(e)
    })?;

    info!(
        backend = ?pool.get_database_backend(),
        max_connections = config.max_connections,
        "database pool ready"
    );
    Ok(pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Applies every pending migration of the embedded [`Migrator`](crate::migrator::Migrator)
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    let pending = crate::migrator::Migrator::get_pending_migrations(pool)
        .await
        .map_err(ServiceError::db_error)?
        .len();

    crate::migrator::Migrator::up(pool, None).await.map_err(|e| {
        error!(error = %e, "schema migration failed");
        ServiceError::db_error(e)
    })?;

    info!(applied = pending, elapsed = ?started.elapsed(), "schema up to date");
    Ok(())
}

/// Round-trips a ping; used by the health endpoint
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    match pool.ping().await {
        Ok(()) => {
            histogram!("stockledger.db.ping", started.elapsed());
            debug!(elapsed = ?started.elapsed(), "database ping ok");
            Ok(())
        }
        Err(e) => {
            counter!("stockledger.db.connection_failures", 1);
            Err(ServiceError::db_error(e))
        }
    }
}

/// SQL expression clamping `location_stock.quantity + ?` at zero for the active backend
pub(crate) fn clamped_sum_sql(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Sqlite => "MAX(0, \"location_stock\".\"quantity\" + ?)",
        DbBackend::Postgres => "GREATEST(0, \"location_stock\".\"quantity\" + ?)",
        DbBackend::MySql => "GREATEST(0, `location_stock`.`quantity` + ?)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_expression_matches_backend() {
        assert!(clamped_sum_sql(DbBackend::Sqlite).starts_with("MAX(0,"));
        assert!(clamped_sum_sql(DbBackend::Postgres).starts_with("GREATEST(0,"));
    }

    #[test]
    fn db_config_follows_app_config() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        cfg.db_max_connections = 3;
        cfg.db_min_connections = 1;
        let db_cfg = DbConfig::from(&cfg);
        assert_eq!(db_cfg.max_connections, 3);
        assert_eq!(db_cfg.url, "sqlite::memory:");
    }
}
