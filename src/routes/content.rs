use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{publish_audit, RequestContext};
use crate::jwt::AuthUser;
use crate::models::content::{
    ContentBlock, ContentCreateRequest, ContentStatus, ContentUpdateRequest, DbContentBlock,
};
use crate::permissions::{filter_by_permission, keys};
use crate::utils::utc_now;

const SELECT_CONTENT: &str = r#"
    SELECT id, title, body, status, created_by, created_at, updated_at, deleted_at
    FROM content_blocks
"#;

/// List content blocks the caller may view. The collection is redacted per
/// item instead of being gated as a whole.
#[utoipa::path(
    get,
    path = "/content",
    tag = "Content",
    responses((status = 200, description = "Visible content blocks", body = Vec<ContentBlock>)),
    security(("bearerAuth" = []))
)]
pub async fn list_content(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<ContentBlock>>> {
    let rows = sqlx::query_as::<_, DbContentBlock>(&format!(
        "{SELECT_CONTENT} WHERE deleted_at IS NULL ORDER BY created_at DESC"
    ))
    .fetch_all(&state.pool)
    .await?;

    let blocks: Vec<ContentBlock> = rows
        .into_iter()
        .map(ContentBlock::try_from)
        .collect::<Result<_, _>>()?;

    let visible = filter_by_permission(
        &state.evaluator,
        auth.user_id,
        blocks,
        keys::CONTENT_VIEW,
        |block| block.id.to_string(),
    )
    .await;

    Ok(Json(visible))
}

#[utoipa::path(
    post,
    path = "/content",
    tag = "Content",
    request_body = ContentCreateRequest,
    responses((status = 201, description = "Content block created", body = ContentBlock)),
    security(("bearerAuth" = []))
)]
pub async fn create_content(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ContentCreateRequest>,
) -> AppResult<(StatusCode, Json<ContentBlock>)> {
    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        r#"
        INSERT INTO content_blocks (id, title, body, status, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&payload.title)
    .bind(payload.body.as_deref().unwrap_or(""))
    .bind(ContentStatus::Draft.as_str())
    .bind(auth.user_id.to_string())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let block = fetch_content(&state.pool, id).await?;

    publish_audit(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &block,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(block)))
}

#[utoipa::path(
    get,
    path = "/content/{id}",
    tag = "Content",
    params(("id" = Uuid, Path, description = "Content block ID")),
    responses(
        (status = 200, description = "Content block", body = ContentBlock),
        (status = 404, description = "Not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ContentBlock>> {
    let block = fetch_content(&state.pool, id).await?;
    Ok(Json(block))
}

#[utoipa::path(
    put,
    path = "/content/{id}",
    tag = "Content",
    params(("id" = Uuid, Path, description = "Content block ID")),
    request_body = ContentUpdateRequest,
    responses(
        (status = 200, description = "Updated content block", body = ContentBlock),
        (status = 404, description = "Not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_content(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ContentUpdateRequest>,
) -> AppResult<Json<ContentBlock>> {
    let existing = fetch_content(&state.pool, id).await?;

    let title = payload.title.unwrap_or(existing.title);
    let body = payload.body.unwrap_or(existing.body);
    let now = utc_now();

    sqlx::query("UPDATE content_blocks SET title = ?, body = ?, updated_at = ? WHERE id = ?")
        .bind(&title)
        .bind(&body)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let block = fetch_content(&state.pool, id).await?;

    publish_audit(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &block,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(block))
}

#[utoipa::path(
    delete,
    path = "/content/{id}",
    tag = "Content",
    params(("id" = Uuid, Path, description = "Content block ID")),
    responses(
        (status = 204, description = "Content block deleted"),
        (status = 404, description = "Not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_content(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let block = fetch_content(&state.pool, id).await?;

    sqlx::query("UPDATE content_blocks SET deleted_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    publish_audit(
        &state.event_bus,
        "deleted",
        Some(auth.user_id),
        &block,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/content/{id}/publish",
    tag = "Content",
    params(("id" = Uuid, Path, description = "Content block ID")),
    responses(
        (status = 200, description = "Published content block", body = ContentBlock),
        (status = 404, description = "Not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn publish_content(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ContentBlock>> {
    fetch_content(&state.pool, id).await?;

    sqlx::query("UPDATE content_blocks SET status = ?, updated_at = ? WHERE id = ?")
        .bind(ContentStatus::Published.as_str())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let block = fetch_content(&state.pool, id).await?;

    publish_audit(
        &state.event_bus,
        "published",
        Some(auth.user_id),
        &block,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(block))
}

async fn fetch_content(pool: &SqlitePool, id: Uuid) -> AppResult<ContentBlock> {
    let row = sqlx::query_as::<_, DbContentBlock>(&format!(
        "{SELECT_CONTENT} WHERE id = ? AND deleted_at IS NULL"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("content block not found"))?;

    row.try_into()
}
