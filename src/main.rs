mod app;
mod db;
mod errors;
mod events;
mod jwt;
mod models;
mod permissions;
mod routes;
mod utils;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    // Per-handler `#[utoipa::path]` annotations register the paths; listing
    // them here as well would duplicate registrations.
    components(
        schemas(
            models::user::User,
            models::user::Role,
            models::user::UserStatus,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::permission::RolePermissionRule,
            models::permission::NewRolePermission,
            models::permission::CustomPermission,
            models::permission::NewCustomPermission,
            models::permission::UserPermissions,
            models::permission::PermissionAuditEntry,
            models::content::ContentBlock,
            models::content::ContentCreateRequest,
            models::content::ContentUpdateRequest,
            models::volunteer::Volunteer,
            models::volunteer::VolunteerCreateRequest
        )
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Permissions", description = "Permission administration"),
        (name = "Content", description = "Content blocks"),
        (name = "Volunteers", description = "Volunteer onboarding"),
        (name = "Health", description = "Service health")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    let app = app::create_app(pool).await?;

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    // Inject the bearer scheme and a default server entry so the Swagger UI
    // Authorize dialog works against the running backend.
    let mut openapi_json = serde_json::to_value(ApiDoc::openapi())?;
    openapi_json["components"]["securitySchemes"]["bearerAuth"] = serde_json::json!({
        "type": "http",
        "scheme": "bearer",
        "bearerFormat": "JWT",
    });
    if openapi_json.get("servers").is_none() {
        openapi_json["servers"] = serde_json::json!([
            { "url": format!("http://localhost:{}", port) }
        ]);
    }

    let openapi_value = openapi_json.clone();
    let docs_route = axum::Router::new().route(
        "/api-docs/openapi.json",
        axum::routing::get(move || {
            let doc = openapi_value.clone();
            async move { axum::Json(doc) }
        }),
    );

    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .persist_authorization(true);

    let app = app
        .merge(docs_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
