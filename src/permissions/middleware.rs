use axum::extract::{FromRequestParts, RawPathParams, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::events::{publish_audit, Loggable, RequestContext, Severity};
use crate::jwt::AuthUser;

use super::evaluator::PermissionEvaluator;
use super::keys;

/// One permission requirement for a route. `resource_param` names the path
/// parameter carrying the resource id the check is scoped to.
#[derive(Debug, Clone)]
pub struct PermissionRequirement {
    pub key: String,
    pub resource_param: Option<&'static str>,
}

impl PermissionRequirement {
    pub fn key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            resource_param: None,
        }
    }

    pub fn resource(key: &str, resource_param: &'static str) -> Self {
        Self {
            key: key.to_string(),
            resource_param: Some(resource_param),
        }
    }
}

/// How a batch of requirements combines. Explicit on the batch rather than a
/// per-requirement flag, so there is no ambiguity about which element
/// controls the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementMode {
    /// Every requirement must pass.
    All,
    /// Any single passing requirement suffices.
    Any,
}

/// A route guard: one or more requirements plus the combining mode.
#[derive(Debug, Clone)]
pub struct PermissionCheck {
    pub requirements: Vec<PermissionRequirement>,
    pub mode: RequirementMode,
}

impl PermissionCheck {
    pub fn single(key: &str) -> Self {
        Self {
            requirements: vec![PermissionRequirement::key(key)],
            mode: RequirementMode::All,
        }
    }

    pub fn resource(key: &str, resource_param: &'static str) -> Self {
        Self {
            requirements: vec![PermissionRequirement::resource(key, resource_param)],
            mode: RequirementMode::All,
        }
    }

    pub fn all(requirements: Vec<PermissionRequirement>) -> Self {
        Self {
            requirements,
            mode: RequirementMode::All,
        }
    }

    pub fn any(requirements: Vec<PermissionRequirement>) -> Self {
        Self {
            requirements,
            mode: RequirementMode::Any,
        }
    }
}

pub fn require_founder() -> PermissionCheck {
    PermissionCheck::single(keys::ADMIN_ACCESS)
}

pub fn require_content_edit() -> PermissionCheck {
    PermissionCheck::single(keys::CONTENT_EDIT)
}

pub fn require_permissions_edit() -> PermissionCheck {
    PermissionCheck::single(keys::PERMISSIONS_EDIT)
}

/// Caller identity plus the keys that passed, attached to the request for
/// the wrapped handler.
#[derive(Debug, Clone)]
pub struct PermissionContext {
    pub user_id: Uuid,
    pub granted: Vec<String>,
}

/// Audit record for a denied check. Carries key names only, never resource
/// contents.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionDenial {
    pub user_id: Uuid,
    pub denied_keys: Vec<String>,
}

impl Loggable for PermissionDenial {
    fn entity_type() -> &'static str {
        "permission_check"
    }
    fn subject_id(&self) -> Uuid {
        self.user_id
    }
    fn severity(&self) -> Severity {
        Severity::Noise
    }
}

// Denial bodies are deliberately generic: the 403 never reveals which check
// failed so callers cannot probe for resource existence.
fn deny(status: StatusCode, message: &'static str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Route middleware: resolves the caller, evaluates the check's requirements
/// concurrently, and short-circuits with the documented wire contract
/// (401 / 403 / 400 / 500) before the handler runs.
pub async fn enforce_permissions(
    State((state, check)): State<(AppState, PermissionCheck)>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let auth = match AuthUser::from_request_parts(&mut parts, &state).await {
        Ok(auth) => auth,
        Err(_) => return deny(StatusCode::UNAUTHORIZED, "Authentication required"),
    };

    // Resolve resource ids from path parameters up front so a missing id is
    // a 400 rather than a silent global check.
    let mut resolved: Vec<(String, Option<String>)> = Vec::with_capacity(check.requirements.len());
    let needs_params = check
        .requirements
        .iter()
        .any(|requirement| requirement.resource_param.is_some());
    let params = if needs_params {
        match RawPathParams::from_request_parts(&mut parts, &state).await {
            Ok(params) => Some(params),
            Err(err) => {
                tracing::error!(error = %err, "failed to read path parameters");
                return deny(StatusCode::INTERNAL_SERVER_ERROR, "Permission check failed");
            }
        }
    } else {
        None
    };

    for requirement in &check.requirements {
        let resource_id = match requirement.resource_param {
            None => None,
            Some(param) => {
                let value = params
                    .as_ref()
                    .and_then(|p| p.iter().find(|(name, _)| *name == param))
                    .map(|(_, value)| value.to_string());
                match value {
                    Some(value) => Some(value),
                    None => return deny(StatusCode::BAD_REQUEST, "Resource ID required"),
                }
            }
        };
        resolved.push((requirement.key.clone(), resource_id));
    }

    let decisions = evaluate_batch(&state.evaluator, auth.user_id, &resolved).await;
    let allowed = match check.mode {
        RequirementMode::All => decisions.iter().all(|(_, ok)| *ok),
        RequirementMode::Any => decisions.iter().any(|(_, ok)| *ok),
    };

    if !allowed {
        let denied: Vec<String> = decisions
            .iter()
            .filter(|(_, ok)| !*ok)
            .map(|(key, _)| key.clone())
            .collect();
        tracing::warn!(
            user_id = %auth.user_id,
            denied_permissions = ?denied,
            "request denied"
        );
        publish_audit(
            &state.event_bus,
            "denied",
            Some(auth.user_id),
            &PermissionDenial {
                user_id: auth.user_id,
                denied_keys: denied,
            },
            Some(RequestContext::from_headers(&parts.headers)),
        );
        return deny(StatusCode::FORBIDDEN, "Insufficient permissions");
    }

    let granted = decisions
        .iter()
        .filter(|(_, ok)| *ok)
        .map(|(key, _)| key.clone())
        .collect();

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(PermissionContext {
        user_id: auth.user_id,
        granted,
    });
    next.run(req).await
}

async fn evaluate_batch(
    evaluator: &PermissionEvaluator,
    user_id: Uuid,
    checks: &[(String, Option<String>)],
) -> Vec<(String, bool)> {
    let futures = checks.iter().map(|(key, resource_id)| async move {
        let ok = evaluator
            .has_permission(user_id, key, resource_id.as_deref())
            .await;
        (key.clone(), ok)
    });
    join_all(futures).await
}

/// Post-query redaction: evaluates the permission per item concurrently and
/// drops the items that fail. Used on collection endpoints instead of a
/// route-level guard.
pub async fn filter_by_permission<T, F>(
    evaluator: &PermissionEvaluator,
    user_id: Uuid,
    items: Vec<T>,
    permission_key: &str,
    resource_id: F,
) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    let checks = items.iter().map(|item| {
        let id = resource_id(item);
        async move {
            evaluator
                .has_permission(user_id, permission_key, Some(&id))
                .await
        }
    });
    let decisions = join_all(checks).await;

    items
        .into_iter()
        .zip(decisions)
        .filter_map(|(item, ok)| ok.then_some(item))
        .collect()
}
