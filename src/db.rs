use crate::config::DatabaseConfig;
use crate::record::Record;
use crate::sink::{Sink, SinkError, StoreStats, StoreStatsSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use std::time::Duration;

/// MySQL caps a statement at 65535 placeholders; six binds per row.
const MAX_ROWS_PER_INSERT: usize = 10_000;

const CREATE_TIME_SERIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS time_series_data (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    timestamp DATETIME(3) NOT NULL,
    device_id VARCHAR(100) NOT NULL,
    metric_name VARCHAR(50) NOT NULL,
    value DOUBLE NOT NULL,
    priority TINYINT NOT NULL DEFAULT 2,
    data TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    INDEX idx_timestamp (timestamp),
    INDEX idx_device_metric (device_id, metric_name),
    INDEX idx_priority (priority)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
"#;

const CREATE_DEVICE_STATUS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS device_status (
    device_id VARCHAR(100) PRIMARY KEY,
    current_value DOUBLE NOT NULL,
    last_update DATETIME(3) NOT NULL,
    alert_count INT DEFAULT 0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    INDEX idx_last_update (last_update),
    INDEX idx_alert_count (alert_count)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
"#;

pub fn connect_options(config: &DatabaseConfig) -> Result<MySqlConnectOptions> {
    if let Some(url) = config.url.as_deref() {
        return url
            .parse::<MySqlConnectOptions>()
            .context("invalid DATABASE_URL");
    }
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.name);
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    Ok(options)
}

/// Opens the pool and proves it with a round trip. A failure here aborts
/// startup.
pub async fn connect(config: &DatabaseConfig) -> Result<MySqlPool> {
    let options = connect_options(config)?;
    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.max_idle_conns.min(config.max_open_conns))
        .max_lifetime(Duration::from_secs(3600))
        .acquire_timeout(Duration::from_secs(8))
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "failed to connect to MySQL at {}:{}/{}",
                config.host, config.port, config.name
            )
        })?;
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to ping database")?;
    Ok(pool)
}

pub async fn init_schema(pool: &MySqlPool) -> Result<()> {
    sqlx::query(CREATE_TIME_SERIES_TABLE)
        .execute(pool)
        .await
        .context("failed to create time_series_data table")?;
    sqlx::query(CREATE_DEVICE_STATUS_TABLE)
        .execute(pool)
        .await
        .context("failed to create device_status table")?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Sink for MySqlStore {
    async fn write_batch(&self, records: &[Record]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(
                "INSERT INTO time_series_data (timestamp, device_id, metric_name, value, priority, data) ",
            );
            builder.push_values(chunk.iter(), |mut b, record| {
                b.push_bind(record.timestamp())
                    .push_bind(record.device_id())
                    .push_bind(record.metric_name())
                    .push_bind(record.value())
                    .push_bind(record.priority().as_u8())
                    .push_bind(record.payload());
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StoreStatsSource for MySqlStore {
    async fn store_stats(&self) -> Result<StoreStats, SinkError> {
        let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM time_series_data")
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT CAST(priority AS SIGNED), COUNT(*) FROM time_series_data GROUP BY priority",
        )
        .fetch_all(&self.pool)
        .await?;

        let recent_24h_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM time_series_data WHERE created_at >= DATE_SUB(NOW(), INTERVAL 24 HOUR)",
        )
        .fetch_one(&self.pool)
        .await?;

        let device_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device_status")
            .fetch_one(&self.pool)
            .await?;

        let total_alerts: i64 = sqlx::query_scalar(
            "SELECT CAST(COALESCE(SUM(alert_count), 0) AS SIGNED) FROM device_status",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total_records,
            priority_stats: rows.into_iter().collect(),
            recent_24h_count,
            device_count,
            total_alerts,
        })
    }
}
