use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub api_key_id: Option<i64>,
    pub model_id: Option<i64>,
    pub provider: String,
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
    pub request_body: Option<Json>,
    pub response_body: Option<Json>,
    pub is_error: bool,
    pub error_detail: Option<String>,
    pub request_size: Option<i32>,
    pub response_size: Option<i32>,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "api_key_id", to = "id", on_delete = "SetNull")]
    pub api_key: HasOne<super::api_keys::Entity>,
    #[sea_orm(belongs_to, from = "model_id", to = "id", on_delete = "SetNull")]
    pub model: HasOne<super::models::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
