use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VolunteerStatus {
    Pending,
    Approved,
    Inactive,
}

impl VolunteerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolunteerStatus::Pending => "pending",
            VolunteerStatus::Approved => "approved",
            VolunteerStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(VolunteerStatus::Pending),
            "approved" => Some(VolunteerStatus::Approved),
            "inactive" => Some(VolunteerStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Volunteer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    pub status: VolunteerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Volunteer {
    fn entity_type() -> &'static str {
        "volunteer"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn severity(&self) -> Severity {
        Severity::Important
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbVolunteer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub skills: Option<String>,
    pub status: String,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbVolunteer> for Volunteer {
    type Error = AppError;

    fn try_from(value: DbVolunteer) -> Result<Self, Self::Error> {
        Ok(Volunteer {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid volunteer id: {err}")))?,
            name: value.name,
            email: value.email,
            skills: value.skills,
            status: VolunteerStatus::parse(&value.status).ok_or_else(|| {
                AppError::internal(format!("unknown volunteer status '{}'", value.status))
            })?,
            approved_by: value
                .approved_by
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|err| AppError::internal(format!("invalid approver id: {err}")))?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VolunteerCreateRequest {
    #[schema(example = "Grace Hopper")]
    pub name: String,
    #[schema(example = "grace@example.org")]
    pub email: String,
    #[schema(example = "tutoring, event setup")]
    pub skills: Option<String>,
}
