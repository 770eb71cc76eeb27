use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Draft,
    Published,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(ContentStatus::Draft),
            "published" => Some(ContentStatus::Published),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContentBlock {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub status: ContentStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Loggable for ContentBlock {
    fn entity_type() -> &'static str {
        "content_block"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn severity(&self) -> Severity {
        Severity::Important
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbContentBlock {
    pub id: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbContentBlock> for ContentBlock {
    type Error = AppError;

    fn try_from(value: DbContentBlock) -> Result<Self, Self::Error> {
        Ok(ContentBlock {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid content id: {err}")))?,
            title: value.title,
            body: value.body,
            status: ContentStatus::parse(&value.status).ok_or_else(|| {
                AppError::internal(format!("unknown content status '{}'", value.status))
            })?,
            created_by: Uuid::parse_str(&value.created_by)
                .map_err(|err| AppError::internal(format!("invalid creator id: {err}")))?,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContentCreateRequest {
    #[schema(example = "Summer program announcement")]
    pub title: String,
    #[schema(example = "Applications open June 1st.")]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContentUpdateRequest {
    pub title: Option<String>,
    pub body: Option<String>,
}
