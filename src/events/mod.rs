use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub severity: Severity,
    pub payload: Value,
}

pub type EventBus = broadcast::Sender<AuditEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Request metadata captured alongside audit events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

/// Publish an audit event for an entity. Fire and forget: a full channel
/// must not fail the request that triggered the event.
pub fn publish_audit<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    context: Option<RequestContext>,
) {
    let payload = serde_json::json!({
        "entity": serde_json::to_value(entity).unwrap_or_default(),
        "context": context,
    });

    let event = AuditEvent {
        id: Uuid::new_v4(),
        name: format!("{}.{}", T::entity_type(), action),
        occurred_at: Utc::now(),
        actor_id,
        subject_id: Some(entity.subject_id()),
        severity: entity.severity(),
        payload,
    };

    let _ = event_bus.send(event);
}

/// Drains the event bus into `permission_audit_log`. Each row's hash covers
/// the previous row's hash plus the payload, so rewriting history breaks
/// the chain.
pub async fn start_audit_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    use sha2::{Digest, Sha256};

    tracing::info!("audit listener started");
    while let Ok(event) = rx.recv().await {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode audit event");
                continue;
            }
        };

        let prev_hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM permission_audit_log ORDER BY occurred_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&pool)
        .await
        .ok()
        .flatten();

        let mut hasher = Sha256::new();
        if let Some(ref prev) = prev_hash {
            hasher.update(prev.as_bytes());
        }
        hasher.update(payload.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let result = sqlx::query(
            r#"
            INSERT INTO permission_audit_log
                (id, event_name, actor_id, subject_id, occurred_at, payload, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.name)
        .bind(event.actor_id.map(|id| id.to_string()))
        .bind(event.subject_id.map(|id| id.to_string()))
        .bind(event.occurred_at)
        .bind(&payload)
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&pool)
        .await;

        if let Err(err) = result {
            tracing::error!(error = %err, event = %event.name, "failed to persist audit event");
        }
    }
}
