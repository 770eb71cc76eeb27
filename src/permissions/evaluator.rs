use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::permission::{
    CustomPermission, NewCustomPermission, NewRolePermission, PermissionAuditEntry,
    RolePermissionRule, UserPermissions,
};
use crate::models::user::{Role, UserStatus};
use crate::utils::utc_now;

use super::keys;
use super::store::PermissionStore;
use super::taxonomy::map_permission_key_to_custom;

/// Decide a permission request against a user's custom grants.
///
/// Returns `Some(decision)` when a grant matched the key and resource —
/// including `Some(false)` for an explicit denial, which must win over role
/// rules. Returns `None` when no grant applies, which falls through to role
/// evaluation. Keys outside the fixed capability mapping always return
/// `None`.
pub fn check_custom_permissions(
    grants: &[CustomPermission],
    permission_key: &str,
    resource_id: Option<&str>,
) -> Option<bool> {
    let capability = map_permission_key_to_custom(permission_key)?;

    for grant in grants {
        if !grant
            .permission_type
            .allowed_keys()
            .contains(&permission_key)
        {
            continue;
        }
        // A grant without a resource id applies to every resource of its
        // type; otherwise the ids must match exactly.
        match (grant.resource_id.as_deref(), resource_id) {
            (None, _) => {}
            (Some(granted), Some(requested)) if granted == requested => {}
            _ => continue,
        }
        if let Some(decision) = grant.permissions.get(capability) {
            return Some(decision);
        }
    }

    None
}

fn role_rule_allows(rule: &RolePermissionRule, resource_id: Option<&str>) -> bool {
    if !rule.granted {
        return false;
    }
    match &rule.resource_scope {
        None => true,
        Some(scope) => scope.matches(resource_id),
    }
}

/// Answers "can user U do action A on resource R" by merging custom grants
/// (checked first, absolute precedence) with role rules (logical OR over
/// granted rows whose scope matches). Holds no cache: every check re-reads
/// the store so revocations take effect immediately.
#[derive(Clone)]
pub struct PermissionEvaluator {
    store: Arc<dyn PermissionStore>,
}

impl PermissionEvaluator {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    /// Never errors: "no permission" is `false`, and a store failure on this
    /// read path is logged and resolved to `false` (fail-closed).
    pub async fn has_permission(
        &self,
        user_id: Uuid,
        permission_key: &str,
        resource_id: Option<&str>,
    ) -> bool {
        match self.evaluate(user_id, permission_key, resource_id).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    permission = permission_key,
                    error = %err,
                    "permission evaluation failed, denying"
                );
                false
            }
        }
    }

    pub async fn can_view(&self, user_id: Uuid, resource: &str, resource_id: Option<&str>) -> bool {
        self.has_permission(user_id, &format!("{resource}.view"), resource_id)
            .await
    }

    pub async fn can_edit(&self, user_id: Uuid, resource: &str, resource_id: Option<&str>) -> bool {
        self.has_permission(user_id, &format!("{resource}.edit"), resource_id)
            .await
    }

    pub async fn can_delete(
        &self,
        user_id: Uuid,
        resource: &str,
        resource_id: Option<&str>,
    ) -> bool {
        self.has_permission(user_id, &format!("{resource}.delete"), resource_id)
            .await
    }

    pub async fn can_publish(
        &self,
        user_id: Uuid,
        resource: &str,
        resource_id: Option<&str>,
    ) -> bool {
        self.has_permission(user_id, &format!("{resource}.publish"), resource_id)
            .await
    }

    async fn evaluate(
        &self,
        user_id: Uuid,
        permission_key: &str,
        resource_id: Option<&str>,
    ) -> AppResult<bool> {
        let Some(identity) = self.store.user_identity(user_id).await? else {
            return Ok(false);
        };
        if identity.status == UserStatus::Inactive {
            return Ok(false);
        }

        let grants = self.store.active_custom_permissions(user_id).await?;
        if let Some(decision) = check_custom_permissions(&grants, permission_key, resource_id) {
            tracing::debug!(
                user_id = %user_id,
                permission = permission_key,
                decision,
                "custom grant decided"
            );
            return Ok(decision);
        }

        let rules = self
            .store
            .role_permissions(identity.role, permission_key)
            .await?;
        let allowed = rules.iter().any(|rule| role_rule_allows(rule, resource_id));

        tracing::debug!(
            user_id = %user_id,
            role = %identity.role,
            permission = permission_key,
            allowed,
            "role rules decided"
        );
        Ok(allowed)
    }

    /// Role, subrole, and non-expired custom grants for a user. Errors with
    /// `NotFound` when the user record itself is absent: policy cannot be
    /// computed for a nonexistent identity.
    pub async fn user_permissions(&self, user_id: Uuid) -> AppResult<UserPermissions> {
        let identity = self
            .store
            .user_identity(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;
        let custom_permissions = self.store.active_custom_permissions(user_id).await?;

        Ok(UserPermissions {
            user_id,
            role: identity.role,
            subrole: identity.subrole,
            custom_permissions,
        })
    }

    /// Persist a custom grant. The granter must itself hold
    /// `permissions.edit`; write-path failures propagate so the caller can
    /// react.
    pub async fn grant_custom_permission(
        &self,
        granter_id: Uuid,
        target_user_id: Uuid,
        grant: NewCustomPermission,
    ) -> AppResult<CustomPermission> {
        self.ensure_can_manage_permissions(granter_id).await?;

        if self
            .store
            .user_identity(target_user_id)
            .await?
            .is_none()
        {
            return Err(AppError::not_found("target user not found"));
        }

        let record = CustomPermission {
            id: Uuid::new_v4(),
            user_id: target_user_id,
            permission_type: grant.permission_type,
            resource_id: grant.resource_id,
            permissions: grant.permissions,
            granted_by: granter_id,
            granted_at: utc_now(),
            expires_at: grant.expires_at,
            notes: grant.notes,
        };

        self.store.insert_custom_permission(&record).await?;
        Ok(record)
    }

    /// Removes a grant and returns it for auditing.
    pub async fn revoke_custom_permission(
        &self,
        revoker_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<CustomPermission> {
        self.ensure_can_manage_permissions(revoker_id).await?;

        self.store
            .delete_custom_permission(permission_id)
            .await?
            .ok_or_else(|| AppError::not_found("permission grant not found"))
    }

    /// Replace every rule for a role in one transaction.
    pub async fn update_role_permissions(
        &self,
        updater_id: Uuid,
        role: Role,
        rules: Vec<NewRolePermission>,
    ) -> AppResult<Vec<RolePermissionRule>> {
        self.ensure_can_manage_permissions(updater_id).await?;

        let now = utc_now();
        let records: Vec<RolePermissionRule> = rules
            .into_iter()
            .map(|rule| RolePermissionRule {
                id: Uuid::new_v4(),
                role,
                permission_key: rule.permission_key,
                granted: rule.granted,
                resource_scope: rule.resource_scope,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.store.replace_role_permissions(role, &records).await?;
        Ok(records)
    }

    /// Read-only dump of every role rule, keyed by role and ordered by
    /// permission key within each role.
    pub async fn all_role_permissions(&self) -> AppResult<BTreeMap<Role, Vec<RolePermissionRule>>> {
        let rules = self.store.all_role_permissions().await?;

        let mut by_role: BTreeMap<Role, Vec<RolePermissionRule>> = BTreeMap::new();
        for role in Role::ALL {
            by_role.insert(role, Vec::new());
        }
        for rule in rules {
            by_role.entry(rule.role).or_default().push(rule);
        }
        Ok(by_role)
    }

    pub async fn audit_log(&self, limit: i64) -> AppResult<Vec<PermissionAuditEntry>> {
        self.store.audit_entries(limit).await
    }

    async fn ensure_can_manage_permissions(&self, actor_id: Uuid) -> AppResult<()> {
        match self
            .evaluate(actor_id, keys::PERMISSIONS_EDIT, None)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::forbidden("insufficient permissions")),
            Err(err) => {
                tracing::error!(
                    actor_id = %actor_id,
                    error = %err,
                    "authority check failed, denying"
                );
                Err(AppError::forbidden("insufficient permissions"))
            }
        }
    }
}
