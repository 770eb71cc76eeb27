use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt; // for `oneshot`

use harborlight::create_app;

async fn setup() -> Result<(SqlitePool, Router, tempfile::TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;
    Ok((pool, app, dir))
}

/// Registers a user and returns (token, user_id). The first registered user
/// becomes the founder; later ones start as volunteers.
async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"name": name, "email": email, "password": "password123"}).to_string(),
        ))?;
    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    if status != StatusCode::CREATED {
        panic!("register failed: {} - {}", status, String::from_utf8_lossy(&bytes));
    }
    let v: Value = serde_json::from_slice(&bytes)?;
    let token = v["token"].as_str().context("missing token")?.to_string();
    let user_id = v["user"]["id"].as_str().context("missing user id")?.to_string();
    Ok((token, user_id))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: &str,
    body_json: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token));
    let req = match body_json {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))?,
        None => builder.body(Body::empty())?,
    };
    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

#[tokio::test]
async fn custom_grant_lifecycle() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let (founder_token, _founder_id) = register(&app, "Founder", "founder@example.com").await?;
    let (intern_token, intern_id) = register(&app, "Intern", "intern@example.com").await?;
    sqlx::query("UPDATE users SET role = 'intern' WHERE id = ?")
        .bind(&intern_id)
        .execute(&pool)
        .await?;

    // Founder creates two content blocks
    let (status, r1) = send(
        &app,
        "POST",
        "/content",
        &founder_token,
        Some(json!({"title": "Welcome page", "body": "hello"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let r1_id = r1["id"].as_str().context("missing content id")?.to_string();

    let (status, r2) = send(
        &app,
        "POST",
        "/content",
        &founder_token,
        Some(json!({"title": "Donor update", "body": "draft"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let r2_id = r2["id"].as_str().context("missing content id")?.to_string();

    // Interns can view by role but have no edit rights
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", r1_id),
        &intern_token,
        Some(json!({"title": "edited"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Founder grants edit on R1 only
    let (status, grant) = send(
        &app,
        "POST",
        &format!("/permissions/users/{}/grants", intern_id),
        &founder_token,
        Some(json!({
            "permission_type": "content_block",
            "resource_id": r1_id,
            "permissions": {"can_edit": true},
            "notes": "trial period"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "grant failed: {}", grant);
    let grant_id = grant["id"].as_str().context("missing grant id")?.to_string();

    // R1 now editable, R2 still not
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", r1_id),
        &intern_token,
        Some(json!({"title": "edited by intern"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "grant should allow editing R1");

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", r2_id),
        &intern_token,
        Some(json!({"title": "should not work"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "grant must not leak to R2");

    // The grant shows up in the intern's own permission view
    let (status, perms) = send(&app, "GET", "/permissions/me", &intern_token, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(perms["role"], "intern");
    let grants = perms["custom_permissions"].as_array().context("grants not array")?;
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0]["resource_id"], r1_id.as_str());

    // Interns cannot hand out permissions themselves
    let (status, _) = send(
        &app,
        "POST",
        &format!("/permissions/users/{}/grants", intern_id),
        &intern_token,
        Some(json!({
            "permission_type": "content_block",
            "permissions": {"can_edit": true}
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Granting to a user that does not exist is a 404
    let (status, _) = send(
        &app,
        "POST",
        "/permissions/users/00000000-0000-4000-8000-000000000000/grants",
        &founder_token,
        Some(json!({
            "permission_type": "content_block",
            "permissions": {"can_view": true}
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Revoke restores the deny
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/permissions/grants/{}", grant_id),
        &founder_token,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", r1_id),
        &intern_token,
        Some(json!({"title": "after revoke"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "revocation should remove access");

    // Revoking twice is a 404
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/permissions/grants/{}", grant_id),
        &founder_token,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn explicit_denial_beats_role_grant() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let (founder_token, _) = register(&app, "Founder", "founder@example.com").await?;
    let (teacher_token, teacher_id) = register(&app, "Teacher", "teacher@example.com").await?;
    sqlx::query("UPDATE users SET role = 'teacher' WHERE id = ?")
        .bind(&teacher_id)
        .execute(&pool)
        .await?;

    let (status, r1) = send(
        &app,
        "POST",
        "/content",
        &founder_token,
        Some(json!({"title": "Restricted"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let r1_id = r1["id"].as_str().context("missing id")?.to_string();

    let (status, r2) = send(
        &app,
        "POST",
        "/content",
        &founder_token,
        Some(json!({"title": "Open"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let r2_id = r2["id"].as_str().context("missing id")?.to_string();

    // Teachers get content.edit from their role
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", r2_id),
        &teacher_token,
        Some(json!({"title": "teacher edit"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // An explicit false on R1 overrides the role grant there
    let (status, _) = send(
        &app,
        "POST",
        &format!("/permissions/users/{}/grants", teacher_id),
        &founder_token,
        Some(json!({
            "permission_type": "content_block",
            "resource_id": r1_id,
            "permissions": {"can_edit": false}
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", r1_id),
        &teacher_token,
        Some(json!({"title": "blocked"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "explicit denial must win over role");

    // Other resources are untouched by the scoped denial
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", r2_id),
        &teacher_token,
        Some(json!({"title": "still fine"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn expired_grants_are_inert() -> Result<()> {
    let (pool, app, _dir) = setup().await?;

    let (founder_token, _) = register(&app, "Founder", "founder@example.com").await?;
    let (intern_token, intern_id) = register(&app, "Intern", "intern@example.com").await?;
    sqlx::query("UPDATE users SET role = 'intern' WHERE id = ?")
        .bind(&intern_id)
        .execute(&pool)
        .await?;

    let (status, block) = send(
        &app,
        "POST",
        "/content",
        &founder_token,
        Some(json!({"title": "Timed access"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let block_id = block["id"].as_str().context("missing id")?.to_string();

    // Grant already past its expiry
    let (status, _) = send(
        &app,
        "POST",
        &format!("/permissions/users/{}/grants", intern_id),
        &founder_token,
        Some(json!({
            "permission_type": "content_block",
            "resource_id": block_id,
            "permissions": {"can_edit": true},
            "expires_at": "2020-01-01T00:00:00Z"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/content/{}", block_id),
        &intern_token,
        Some(json!({"title": "too late"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "expired grant must not grant access");

    // Expired grants are also filtered from the permission view
    let (status, perms) = send(&app, "GET", "/permissions/me", &intern_token, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(perms["custom_permissions"]
        .as_array()
        .context("grants not array")?
        .is_empty());

    Ok(())
}

#[tokio::test]
async fn reading_other_users_permissions_requires_permissions_view() -> Result<()> {
    let (_pool, app, _dir) = setup().await?;

    let (founder_token, founder_id) = register(&app, "Founder", "founder@example.com").await?;
    let (vol_token, vol_id) = register(&app, "Volunteer", "vol@example.com").await?;

    // Self read is always allowed
    let (status, perms) = send(
        &app,
        "GET",
        &format!("/permissions/users/{}", vol_id),
        &vol_token,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(perms["role"], "volunteer");

    // Volunteers lack permissions.view, so peeking at others is forbidden
    let (status, _) = send(
        &app,
        "GET",
        &format!("/permissions/users/{}", founder_id),
        &vol_token,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Founders may read anyone
    let (status, _) = send(
        &app,
        "GET",
        &format!("/permissions/users/{}", vol_id),
        &founder_token,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // Unknown user is a 404, not an empty default
    let (status, _) = send(
        &app,
        "GET",
        "/permissions/users/00000000-0000-4000-8000-000000000000",
        &founder_token,
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
