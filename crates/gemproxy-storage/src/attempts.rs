use std::collections::HashMap;
use std::sync::RwLock;

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, DatabaseConnection, DbErr, PaginatorTrait, QueryOrder, Schema};
use time::OffsetDateTime;

use crate::db::connect_shared;
use crate::entities;
use crate::entities::{api_keys, models, requests};

/// One upstream attempt ready to be persisted. Assembled by the gateway after
/// the response (or the final retry failure) is known.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    pub model: String,
    pub key_id: String,
    pub action: Option<String>,
    pub http_method: String,
    pub url_path: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: i32,
    pub latency_ms: i32,
    pub attempt_count: i32,
    pub prompt_tokens: Option<i32>,
    pub candidates_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    pub request_json: Option<serde_json::Value>,
    pub response_json: Option<serde_json::Value>,
    pub is_error: bool,
    pub error_detail: Option<String>,
    pub request_size: Option<i32>,
    pub response_size: Option<i32>,
}

/// Process-local foreign-key caches plus the connection they resolve against.
///
/// `key_id`/model name are looked up once; after that, every subsequent
/// attempt carrying the same identifier resolves without touching the DB.
#[derive(Clone)]
pub struct AttemptStorage {
    db: DatabaseConnection,
    api_key_cache: std::sync::Arc<RwLock<HashMap<String, i64>>>,
    model_cache: std::sync::Arc<RwLock<HashMap<String, i64>>>,
}

impl AttemptStorage {
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let db = connect_shared(database_url).await?;
        Ok(Self::from_connection(db))
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            api_key_cache: std::sync::Arc::new(RwLock::new(HashMap::new())),
            model_cache: std::sync::Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::ApiKeys)
            .register(entities::Models)
            .register(entities::Requests)
            .sync(&self.db)
            .await
    }

    pub async fn health(&self) -> Result<(), DbErr> {
        entities::ApiKeys::find()
            .order_by_asc(api_keys::Column::Id)
            .one(&self.db)
            .await?;
        Ok(())
    }

    async fn ensure_api_key_id(&self, provider: &str, key_id: &str) -> Result<i64, DbErr> {
        if let Some(id) = read_cache(&self.api_key_cache, key_id) {
            return Ok(id);
        }
        let now = OffsetDateTime::now_utc();
        let _ = entities::ApiKeys::insert(api_keys::ActiveModel {
            id: ActiveValue::NotSet,
            provider: ActiveValue::Set(provider.to_string()),
            key_id: ActiveValue::Set(key_id.to_string()),
            label: ActiveValue::Set(None),
            is_active: ActiveValue::Set(true),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        })
        .on_conflict(OnConflict::column(api_keys::Column::KeyId).do_nothing().to_owned())
        .exec(&self.db)
        .await;

        let row = entities::ApiKeys::find()
            .filter(api_keys::Column::KeyId.eq(key_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("api_keys.key_id={key_id}")))?;
        write_cache(&self.api_key_cache, key_id, row.id);
        Ok(row.id)
    }

    async fn ensure_model_id(&self, provider: &str, model: &str) -> Result<i64, DbErr> {
        if let Some(id) = read_cache(&self.model_cache, model) {
            return Ok(id);
        }
        let now = OffsetDateTime::now_utc();
        let _ = entities::Models::insert(models::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(model.to_string()),
            provider: ActiveValue::Set(Some(provider.to_string())),
            created_at: ActiveValue::Set(now),
        })
        .on_conflict(OnConflict::column(models::Column::Name).do_nothing().to_owned())
        .exec(&self.db)
        .await;

        let row = entities::Models::find()
            .filter(models::Column::Name.eq(model))
            .one(&self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("models.name={model}")))?;
        write_cache(&self.model_cache, model, row.id);
        Ok(row.id)
    }

    /// Persists one attempt record. Called from a background task; the
    /// caller must not let a `DbErr` here reach the client response.
    pub async fn record_attempt(&self, record: AttemptRecord) -> Result<(), DbErr> {
        let api_key_id = if record.key_id == "unknown" || record.key_id == "system" {
            None
        } else {
            Some(self.ensure_api_key_id(&record.provider, &record.key_id).await?)
        };
        let model_id = if record.model == "unknown" {
            None
        } else {
            Some(self.ensure_model_id(&record.provider, &record.model).await?)
        };

        let active = requests::ActiveModel {
            id: ActiveValue::NotSet,
            api_key_id: ActiveValue::Set(api_key_id),
            model_id: ActiveValue::Set(model_id),
            provider: ActiveValue::Set(record.provider),
            action: ActiveValue::Set(record.action),
            http_method: ActiveValue::Set(record.http_method),
            url_path: ActiveValue::Set(record.url_path),
            client_ip: ActiveValue::Set(record.client_ip),
            user_agent: ActiveValue::Set(record.user_agent),
            status_code: ActiveValue::Set(record.status_code),
            latency_ms: ActiveValue::Set(record.latency_ms),
            attempt_count: ActiveValue::Set(record.attempt_count),
            prompt_tokens: ActiveValue::Set(record.prompt_tokens),
            candidates_tokens: ActiveValue::Set(record.candidates_tokens),
            total_tokens: ActiveValue::Set(record.total_tokens),
            request_body: ActiveValue::Set(record.request_json),
            response_body: ActiveValue::Set(record.response_json),
            is_error: ActiveValue::Set(record.is_error),
            error_detail: ActiveValue::Set(record.error_detail),
            request_size: ActiveValue::Set(record.request_size),
            response_size: ActiveValue::Set(record.response_size),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };

        entities::Requests::insert(active).exec(&self.db).await?;
        Ok(())
    }
}

fn read_cache(cache: &RwLock<HashMap<String, i64>>, key: &str) -> Option<i64> {
    cache.read().expect("fk cache lock poisoned").get(key).copied()
}

fn write_cache(cache: &RwLock<HashMap<String, i64>>, key: &str, id: i64) {
    cache
        .write()
        .expect("fk cache lock poisoned")
        .insert(key.to_string(), id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_key_id_resolves_to_one_row() {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        let storage = AttemptStorage::from_connection(db);
        storage.sync().await.unwrap();

        let a = storage.ensure_api_key_id("gemini", "...1234").await.unwrap();
        let b = storage.ensure_api_key_id("gemini", "...1234").await.unwrap();
        assert_eq!(a, b);

        let count = entities::ApiKeys::find()
            .count(storage.connection())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn record_attempt_round_trips() {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        let storage = AttemptStorage::from_connection(db);
        storage.sync().await.unwrap();

        storage
            .record_attempt(AttemptRecord {
                provider: "gemini".to_string(),
                model: "gemini-pro".to_string(),
                key_id: "...1234".to_string(),
                action: Some("generateContent".to_string()),
                http_method: "POST".to_string(),
                url_path: "v1beta/models/gemini-pro:generateContent".to_string(),
                client_ip: Some("127.0.0.1".to_string()),
                user_agent: None,
                status_code: 200,
                latency_ms: 42,
                attempt_count: 1,
                prompt_tokens: Some(2),
                candidates_tokens: Some(5),
                total_tokens: Some(7),
                request_json: None,
                response_json: None,
                is_error: false,
                error_detail: None,
                request_size: Some(64),
                response_size: Some(256),
            })
            .await
            .unwrap();

        let rows = entities::Requests::find()
            .all(storage.connection())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_tokens, Some(7));
    }
}
