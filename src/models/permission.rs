use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};
use crate::models::user::Role;
use crate::permissions::{CapabilitySet, PermissionType, ResourceScope};

// =============================================================================
// ROLE PERMISSION RULES
// =============================================================================

/// A single role-level authorization rule. Several rows may exist for the
/// same (role, permission_key); a request is granted if any granted row's
/// scope covers it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermissionRule {
    pub id: Uuid,
    pub role: Role,
    #[schema(example = "content.edit")]
    pub permission_key: String,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_scope: Option<ResourceScope>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for RolePermissionRule {
    fn entity_type() -> &'static str {
        "role_permission"
    }
    fn subject_id(&self) -> Uuid {
        self.id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbRolePermission {
    pub id: String,
    pub role: String,
    pub permission_key: String,
    pub granted: bool,
    pub resource_scope: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRolePermission> for RolePermissionRule {
    type Error = AppError;

    fn try_from(value: DbRolePermission) -> Result<Self, Self::Error> {
        let resource_scope = value
            .resource_scope
            .as_deref()
            .map(serde_json::from_str::<ResourceScope>)
            .transpose()
            .map_err(|err| AppError::internal(format!("invalid resource scope: {err}")))?;

        Ok(RolePermissionRule {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid rule id: {err}")))?,
            role: Role::parse(&value.role)
                .ok_or_else(|| AppError::internal(format!("unknown role '{}'", value.role)))?,
            permission_key: value.permission_key,
            granted: value.granted,
            resource_scope,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// Payload for replacing a role's rule set.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewRolePermission {
    #[schema(example = "content.edit")]
    pub permission_key: String,
    pub granted: bool,
    #[serde(default)]
    pub resource_scope: Option<ResourceScope>,
}

// =============================================================================
// CUSTOM PERMISSION GRANTS
// =============================================================================

/// A per-user permission override. Beats role rules unconditionally for the
/// capabilities it names, including explicit denials. Rows past their
/// `expires_at` are inert.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomPermission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub permission_type: PermissionType,
    /// `None` applies the grant to every resource of its type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub permissions: CapabilitySet,
    pub granted_by: Uuid,
    pub granted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Loggable for CustomPermission {
    fn entity_type() -> &'static str {
        "custom_permission"
    }
    fn subject_id(&self) -> Uuid {
        self.user_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DbCustomPermission {
    pub id: String,
    pub user_id: String,
    pub permission_type: String,
    pub resource_id: Option<String>,
    pub permissions: String,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl TryFrom<DbCustomPermission> for CustomPermission {
    type Error = AppError;

    fn try_from(value: DbCustomPermission) -> Result<Self, Self::Error> {
        Ok(CustomPermission {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("invalid grant id: {err}")))?,
            user_id: Uuid::parse_str(&value.user_id)
                .map_err(|err| AppError::internal(format!("invalid user id: {err}")))?,
            permission_type: PermissionType::parse(&value.permission_type).ok_or_else(|| {
                AppError::internal(format!(
                    "unknown permission type '{}'",
                    value.permission_type
                ))
            })?,
            resource_id: value.resource_id,
            permissions: serde_json::from_str(&value.permissions)
                .map_err(|err| AppError::internal(format!("invalid capability set: {err}")))?,
            granted_by: Uuid::parse_str(&value.granted_by)
                .map_err(|err| AppError::internal(format!("invalid granter id: {err}")))?,
            granted_at: value.granted_at,
            expires_at: value.expires_at,
            notes: value.notes,
        })
    }
}

/// Payload for granting a custom permission. Attribution and timestamps are
/// filled in by the evaluator.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewCustomPermission {
    pub permission_type: PermissionType,
    #[serde(default)]
    pub resource_id: Option<String>,
    pub permissions: CapabilitySet,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

// =============================================================================
// AGGREGATES
// =============================================================================

/// Everything the evaluator knows about one user: role assignment plus the
/// non-expired custom grants.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserPermissions {
    pub user_id: Uuid,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subrole: Option<String>,
    pub custom_permissions: Vec<CustomPermission>,
}

/// Audit wrapper for a bulk role-rule replacement.
#[derive(Debug, Serialize)]
pub struct RolePermissionReplacement {
    pub batch_id: Uuid,
    pub role: Role,
    pub rules: Vec<RolePermissionRule>,
}

impl Loggable for RolePermissionReplacement {
    fn entity_type() -> &'static str {
        "role_permissions"
    }
    fn subject_id(&self) -> Uuid {
        self.batch_id
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

/// One entry of the permission audit trail.
#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionAuditEntry {
    pub id: Uuid,
    #[schema(example = "custom_permission.granted")]
    pub event_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub hash: String,
}
