use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{publish_audit, RequestContext};
use crate::jwt::AuthUser;
use crate::models::volunteer::{DbVolunteer, Volunteer, VolunteerCreateRequest, VolunteerStatus};
use crate::permissions::{filter_by_permission, keys};
use crate::utils::{normalize_email, utc_now};

const SELECT_VOLUNTEER: &str = r#"
    SELECT id, name, email, skills, status, approved_by, created_at, updated_at
    FROM volunteers
"#;

/// List volunteer records the caller may view, redacted per item.
#[utoipa::path(
    get,
    path = "/volunteers",
    tag = "Volunteers",
    responses((status = 200, description = "Visible volunteers", body = Vec<Volunteer>)),
    security(("bearerAuth" = []))
)]
pub async fn list_volunteers(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Volunteer>>> {
    let rows = sqlx::query_as::<_, DbVolunteer>(&format!(
        "{SELECT_VOLUNTEER} ORDER BY created_at DESC"
    ))
    .fetch_all(&state.pool)
    .await?;

    let volunteers: Vec<Volunteer> = rows
        .into_iter()
        .map(Volunteer::try_from)
        .collect::<Result<_, _>>()?;

    let visible = filter_by_permission(
        &state.evaluator,
        auth.user_id,
        volunteers,
        keys::VOLUNTEERS_VIEW,
        |volunteer| volunteer.id.to_string(),
    )
    .await;

    Ok(Json(visible))
}

#[utoipa::path(
    post,
    path = "/volunteers",
    tag = "Volunteers",
    request_body = VolunteerCreateRequest,
    responses((status = 201, description = "Volunteer record created", body = Volunteer)),
    security(("bearerAuth" = []))
)]
pub async fn create_volunteer(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<VolunteerCreateRequest>,
) -> AppResult<(StatusCode, Json<Volunteer>)> {
    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        r#"
        INSERT INTO volunteers (id, name, email, skills, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&payload.name)
    .bind(normalize_email(&payload.email))
    .bind(&payload.skills)
    .bind(VolunteerStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let volunteer = fetch_volunteer(&state.pool, id).await?;

    publish_audit(
        &state.event_bus,
        "created",
        Some(auth.user_id),
        &volunteer,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(volunteer)))
}

#[utoipa::path(
    post,
    path = "/volunteers/{id}/approve",
    tag = "Volunteers",
    params(("id" = Uuid, Path, description = "Volunteer ID")),
    responses(
        (status = 200, description = "Approved volunteer", body = Volunteer),
        (status = 404, description = "Not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn approve_volunteer(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Volunteer>> {
    fetch_volunteer(&state.pool, id).await?;

    sqlx::query("UPDATE volunteers SET status = ?, approved_by = ?, updated_at = ? WHERE id = ?")
        .bind(VolunteerStatus::Approved.as_str())
        .bind(auth.user_id.to_string())
        .bind(utc_now())
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let volunteer = fetch_volunteer(&state.pool, id).await?;

    publish_audit(
        &state.event_bus,
        "approved",
        Some(auth.user_id),
        &volunteer,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(volunteer))
}

async fn fetch_volunteer(pool: &SqlitePool, id: Uuid) -> AppResult<Volunteer> {
    let row = sqlx::query_as::<_, DbVolunteer>(&format!("{SELECT_VOLUNTEER} WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("volunteer not found"))?;

    row.try_into()
}
