use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, DatabaseConnection, DbErr, Schema};
use time::OffsetDateTime;

use crate::db::connect_shared;
use crate::entities;
use crate::entities::global_config;

const SINGLETON_ROW_ID: i64 = 1;

/// Persists the merged `GlobalConfig` as a single JSON-blob row, so a restart
/// without CLI flags picks up the previous run's settings (CLI/ENV still win
/// on top of whatever is read back here).
#[derive(Clone)]
pub struct GlobalConfigStore {
    db: DatabaseConnection,
}

impl GlobalConfigStore {
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let db = connect_shared(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .sync(&self.db)
            .await
    }

    pub async fn load(&self) -> Result<Option<serde_json::Value>, DbErr> {
        let row = entities::GlobalConfig::find_by_id(SINGLETON_ROW_ID)
            .one(&self.db)
            .await?;
        Ok(row.map(|m| m.config_json))
    }

    pub async fn upsert(&self, config_json: serde_json::Value) -> Result<(), DbErr> {
        let now = OffsetDateTime::now_utc();
        let existing = entities::GlobalConfig::find_by_id(SINGLETON_ROW_ID)
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let mut active: global_config::ActiveModel = model.into();
                active.config_json = ActiveValue::Set(config_json);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = global_config::ActiveModel {
                    id: ActiveValue::Set(SINGLETON_ROW_ID),
                    config_json: ActiveValue::Set(config_json),
                    updated_at: ActiveValue::Set(now),
                };
                active.insert(&self.db).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_config_blob() {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        let store = GlobalConfigStore::from_connection(db);
        store.sync().await.unwrap();

        assert!(store.load().await.unwrap().is_none());

        store.upsert(serde_json::json!({"host": "0.0.0.0", "port": 8787})).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded["port"], 8787);

        store.upsert(serde_json::json!({"host": "0.0.0.0", "port": 9000})).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded["port"], 9000);
    }
}
