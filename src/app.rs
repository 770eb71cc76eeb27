use std::sync::Arc;

use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::permissions::{
    enforce_permissions, keys, require_content_edit, require_founder, PermissionCheck,
    PermissionEvaluator, SqlitePermissionStore,
};
use crate::routes::{auth, content, health, permissions, volunteers};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub evaluator: PermissionEvaluator,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        let evaluator = PermissionEvaluator::new(Arc::new(SqlitePermissionStore::new(pool.clone())));
        Self {
            pool,
            jwt: Arc::new(jwt),
            evaluator,
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, rx) = init_event_bus();
    let state = AppState::new(pool.clone(), jwt_config, event_bus);

    tokio::spawn(start_audit_listener(rx, pool));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    // Helper to keep guard wiring readable; middleware state carries the
    // check alongside the app state.
    let guard = |check: PermissionCheck| {
        from_fn_with_state((state.clone(), check), enforce_permissions)
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    // Collection listing is redacted per item inside the handler; every
    // other content route is gated up front.
    let content_routes = Router::new()
        .route("/", get(content::list_content))
        .merge(
            Router::new()
                .route("/", post(content::create_content))
                .route_layer(guard(require_content_edit())),
        )
        .merge(
            Router::new()
                .route("/:id", get(content::get_content))
                .route_layer(guard(PermissionCheck::resource(keys::CONTENT_VIEW, "id"))),
        )
        .merge(
            Router::new()
                .route("/:id", put(content::update_content))
                .route_layer(guard(PermissionCheck::resource(keys::CONTENT_EDIT, "id"))),
        )
        .merge(
            Router::new()
                .route("/:id", delete(content::delete_content))
                .route_layer(guard(PermissionCheck::resource(keys::CONTENT_DELETE, "id"))),
        )
        .merge(
            Router::new()
                .route("/:id/publish", post(content::publish_content))
                .route_layer(guard(PermissionCheck::resource(keys::CONTENT_PUBLISH, "id"))),
        );

    let volunteer_routes = Router::new()
        .route("/", get(volunteers::list_volunteers))
        .merge(
            Router::new()
                .route("/", post(volunteers::create_volunteer))
                .route_layer(guard(PermissionCheck::single(keys::VOLUNTEERS_EDIT))),
        )
        .merge(
            Router::new()
                .route("/:id/approve", post(volunteers::approve_volunteer))
                .route_layer(guard(PermissionCheck::resource(
                    keys::VOLUNTEERS_APPROVE,
                    "id",
                ))),
        );

    let permission_routes = Router::new()
        .route("/me", get(permissions::my_permissions))
        .route("/users/:user_id", get(permissions::get_user_permissions))
        .route("/users/:user_id/grants", post(permissions::grant_permission))
        .route("/grants/:permission_id", delete(permissions::revoke_permission))
        .route("/roles", get(permissions::list_role_permissions))
        .route("/roles/:role", put(permissions::update_role_permissions))
        .merge(
            Router::new()
                .route("/audit", get(permissions::get_audit_log))
                .route_layer(guard(require_founder())),
        );

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/content", content_routes)
        .nest("/volunteers", volunteer_routes)
        .nest("/permissions", permission_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
