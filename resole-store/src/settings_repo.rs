use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::database::map_db_error;
use resole_core::{SettingsRepository, StoreError};
use resole_shared::PlatformSettings;

/// Single-row settings table. Until the first admin write, the configured
/// defaults are served.
pub struct PgSettingsRepository {
    pool: PgPool,
    defaults: PlatformSettings,
}

impl PgSettingsRepository {
    pub fn new(pool: PgPool, defaults: PlatformSettings) -> Self {
        Self { pool, defaults }
    }
}

#[async_trait]
impl SettingsRepository for PgSettingsRepository {
    async fn current(&self) -> Result<PlatformSettings, StoreError> {
        let row: Option<(i64, Json<PlatformSettings>)> =
            sqlx::query_as("SELECT version, body FROM platform_settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_error)?;

        Ok(match row {
            Some((version, Json(mut settings))) => {
                settings.version = version as u64;
                settings
            }
            None => self.defaults.clone(),
        })
    }

    async fn replace(&self, mut next: PlatformSettings) -> Result<PlatformSettings, StoreError> {
        next.validate().map_err(StoreError::Invalid)?;

        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM platform_settings WHERE id = 1 FOR UPDATE")
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_error)?;

        let previous = current.map(|(v,)| v as u64).unwrap_or(self.defaults.version);
        next.version = previous + 1;
        next.updated_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO platform_settings (id, version, body, updated_at)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET version = EXCLUDED.version, body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(next.version as i64)
        .bind(Json(&next))
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;
        Ok(next)
    }
}
