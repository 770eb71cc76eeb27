use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::permission::{
    CustomPermission, DbCustomPermission, DbRolePermission, PermissionAuditEntry,
    RolePermissionRule,
};
use crate::models::user::{Role, UserStatus};
use crate::utils::utc_now;

/// Role assignment of a user, as the evaluator needs it.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub role: Role,
    pub subrole: Option<String>,
    pub status: UserStatus,
}

/// Persistence seam for the evaluator. Injected so tests can swap the
/// backing store without a database.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn user_identity(&self, user_id: Uuid) -> AppResult<Option<UserIdentity>>;

    /// Non-expired custom grants for a user. Expired rows must never be
    /// returned; expiry is enforced at read time, there is no reaper.
    async fn active_custom_permissions(&self, user_id: Uuid) -> AppResult<Vec<CustomPermission>>;

    async fn role_permissions(&self, role: Role, permission_key: &str)
        -> AppResult<Vec<RolePermissionRule>>;

    /// Every role rule, ordered by (role, permission_key) for determinism.
    async fn all_role_permissions(&self) -> AppResult<Vec<RolePermissionRule>>;

    async fn insert_custom_permission(&self, grant: &CustomPermission) -> AppResult<()>;

    /// Removes a grant, returning it; `None` when no row with that id
    /// existed.
    async fn delete_custom_permission(&self, permission_id: Uuid)
        -> AppResult<Option<CustomPermission>>;

    /// Atomically replaces every rule for a role (delete-then-insert, not a
    /// merge).
    async fn replace_role_permissions(
        &self,
        role: Role,
        rules: &[RolePermissionRule],
    ) -> AppResult<()>;

    async fn audit_entries(&self, limit: i64) -> AppResult<Vec<PermissionAuditEntry>>;
}

#[derive(Debug, Clone)]
pub struct SqlitePermissionStore {
    pool: SqlitePool,
}

impl SqlitePermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for SqlitePermissionStore {
    async fn user_identity(&self, user_id: Uuid) -> AppResult<Option<UserIdentity>> {
        let row: Option<(String, Option<String>, String)> = sqlx::query_as(
            "SELECT role, subrole, status FROM users WHERE id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(role, subrole, status)| {
            Ok(UserIdentity {
                user_id,
                role: Role::parse(&role)
                    .ok_or_else(|| AppError::internal(format!("unknown role '{role}'")))?,
                subrole,
                status: UserStatus::parse(&status)
                    .ok_or_else(|| AppError::internal(format!("unknown status '{status}'")))?,
            })
        })
        .transpose()
    }

    async fn active_custom_permissions(&self, user_id: Uuid) -> AppResult<Vec<CustomPermission>> {
        let rows = sqlx::query_as::<_, DbCustomPermission>(
            r#"
            SELECT id, user_id, permission_type, resource_id, permissions,
                   granted_by, granted_at, expires_at, notes
            FROM custom_permissions
            WHERE user_id = ?
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY granted_at
            "#,
        )
        .bind(user_id.to_string())
        .bind(utc_now())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CustomPermission::try_from).collect()
    }

    async fn role_permissions(
        &self,
        role: Role,
        permission_key: &str,
    ) -> AppResult<Vec<RolePermissionRule>> {
        let rows = sqlx::query_as::<_, DbRolePermission>(
            r#"
            SELECT id, role, permission_key, granted, resource_scope, created_at, updated_at
            FROM role_permissions
            WHERE role = ? AND permission_key = ?
            "#,
        )
        .bind(role.as_str())
        .bind(permission_key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RolePermissionRule::try_from).collect()
    }

    async fn all_role_permissions(&self) -> AppResult<Vec<RolePermissionRule>> {
        let rows = sqlx::query_as::<_, DbRolePermission>(
            r#"
            SELECT id, role, permission_key, granted, resource_scope, created_at, updated_at
            FROM role_permissions
            ORDER BY role, permission_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RolePermissionRule::try_from).collect()
    }

    async fn insert_custom_permission(&self, grant: &CustomPermission) -> AppResult<()> {
        let permissions = serde_json::to_string(&grant.permissions)
            .map_err(|err| AppError::internal(format!("failed to encode capability set: {err}")))?;

        sqlx::query(
            r#"
            INSERT INTO custom_permissions
                (id, user_id, permission_type, resource_id, permissions,
                 granted_by, granted_at, expires_at, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(grant.id.to_string())
        .bind(grant.user_id.to_string())
        .bind(grant.permission_type.as_str())
        .bind(&grant.resource_id)
        .bind(permissions)
        .bind(grant.granted_by.to_string())
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .bind(&grant.notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_custom_permission(
        &self,
        permission_id: Uuid,
    ) -> AppResult<Option<CustomPermission>> {
        let row = sqlx::query_as::<_, DbCustomPermission>(
            r#"
            SELECT id, user_id, permission_type, resource_id, permissions,
                   granted_by, granted_at, expires_at, notes
            FROM custom_permissions
            WHERE id = ?
            "#,
        )
        .bind(permission_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM custom_permissions WHERE id = ?")
            .bind(permission_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(Some(row.try_into()?))
    }

    async fn replace_role_permissions(
        &self,
        role: Role,
        rules: &[RolePermissionRule],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_permissions WHERE role = ?")
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;

        for rule in rules {
            let scope = rule
                .resource_scope
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|err| AppError::internal(format!("failed to encode scope: {err}")))?;

            sqlx::query(
                r#"
                INSERT INTO role_permissions
                    (id, role, permission_key, granted, resource_scope, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(rule.id.to_string())
            .bind(rule.role.as_str())
            .bind(&rule.permission_key)
            .bind(rule.granted)
            .bind(scope)
            .bind(rule.created_at)
            .bind(rule.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn audit_entries(&self, limit: i64) -> AppResult<Vec<PermissionAuditEntry>> {
        let rows: Vec<(
            String,
            String,
            Option<String>,
            Option<String>,
            chrono::DateTime<chrono::Utc>,
            String,
            Option<String>,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT id, event_name, actor_id, subject_id, occurred_at, payload, prev_hash, hash
            FROM permission_audit_log
            ORDER BY occurred_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, event_name, actor_id, subject_id, occurred_at, payload, prev_hash, hash)| {
                    Ok(PermissionAuditEntry {
                        id: Uuid::parse_str(&id)
                            .map_err(|err| AppError::internal(format!("invalid audit id: {err}")))?,
                        event_name,
                        actor_id: actor_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
                        subject_id: subject_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
                        occurred_at,
                        payload: serde_json::from_str(&payload).unwrap_or_default(),
                        prev_hash,
                        hash,
                    })
                },
            )
            .collect()
    }
}
