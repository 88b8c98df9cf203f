//! Pagetree REST API Server
//!
//! Run with: cargo run --features server --bin pagetree-server
//!
//! The acting user is taken from the `x-user-id` and `x-space-id` headers,
//! as set by the session layer in front of this service.
//!
//! Endpoints:
//!   POST   /spaces                      - Create space
//!   POST   /users                       - Create user
//!   POST   /spaces/:id/members          - Add member
//!   POST   /spaces/:id/roles            - Create role
//!   GET    /pages                       - List root pages
//!   POST   /pages                       - Create page
//!   GET    /pages/:id                   - Page with permissions
//!   DELETE /pages/:id                   - Delete page and subtree
//!   GET    /pages/:id/children          - List children
//!   POST   /pages/:id/reposition        - Move page
//!   POST   /pages/:id/duplicate         - Duplicate subtree
//!   POST   /pages/:id/trash             - Trash page
//!   POST   /pages/:id/restore           - Restore page
//!   GET    /pages/:id/permissions       - List entries
//!   PUT    /pages/:id/permissions       - Upsert entry
//!   DELETE /permissions/:id             - Remove entry
//!   POST   /roles/:id/assign            - Assign role
//!   POST   /roles/:id/unassign          - Unassign role
//!   POST   /export                      - Export subtrees
//!   POST   /import                      - Import bundle
//!   GET    /verify                      - Check tree consistency

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pagetree::{
    Actor, ConfigLoader, Error, ExportBundle, ImportOptions, Membership, NewPage, PageTree,
    PermissionAssignee, PermissionLevel, SpaceDefaults, TracingBroadcaster,
};

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    tree: Arc<PageTree>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
struct CreateSpaceReq {
    name: String,
    #[serde(flatten)]
    defaults: SpaceDefaults,
}

#[derive(Deserialize)]
struct CreateUserReq {
    username: String,
}

#[derive(Deserialize)]
struct AddMemberReq {
    user_id: Uuid,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    is_guest: bool,
}

#[derive(Deserialize)]
struct CreateRoleReq {
    name: String,
    source: Option<String>,
}

#[derive(Deserialize)]
struct RepositionReq {
    parent_id: Option<Uuid>,
    index: Option<u32>,
}

#[derive(Deserialize)]
struct DuplicateReq {
    target_parent_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct UpsertPermissionReq {
    assignee: PermissionAssignee,
    level: PermissionLevel,
}

#[derive(Deserialize)]
struct RoleMemberReq {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct ExportReq {
    page_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct ImportReq {
    bundle: ExportBundle,
    target_parent_id: Option<Uuid>,
    #[serde(default)]
    options: ImportOptions,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<ErrorBody>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Errors
// ============================================================================

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::DataNotFound(_) => StatusCode::NOT_FOUND,
            Error::InsecureOperation(_) => StatusCode::FORBIDDEN,
            Error::UndesirableOperation(_) => StatusCode::CONFLICT,
            Error::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.kind(), "request failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.kind(), "request rejected");
        }
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody { code: self.0.kind(), message: self.0.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn header_id(headers: &HeaderMap, name: &str) -> Result<Uuid, Error> {
    let value = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::InvalidInput(format!("missing {name} header")))?;
    value
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{name} is not a valid id")))
}

/// Actor from the session headers, with flags from the stored membership
fn actor(tree: &PageTree, headers: &HeaderMap) -> Result<Actor, Error> {
    let user_id = header_id(headers, "x-user-id")?;
    let space_id = header_id(headers, "x-space-id")?;
    Ok(match tree.get_membership(space_id, user_id)? {
        Some(m) => Actor { user_id, space_id, is_admin: m.is_admin, is_guest: m.is_guest },
        None => Actor::member(user_id, space_id),
    })
}

/// Run an engine call on the blocking pool
async fn blocking<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&PageTree) -> pagetree::Result<T> + Send + 'static,
{
    let tree = state.tree.clone();
    let value = tokio::task::spawn_blocking(move || f(&tree))
        .await
        .map_err(|e| Error::Internal(format!("worker failed: {e}")))??;
    Ok(Json(ApiResponse::ok(value)))
}

/// Same as `blocking`, with the actor resolved from the headers first
async fn as_actor<T, F>(state: &AppState, headers: HeaderMap, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&PageTree, &Actor) -> pagetree::Result<T> + Send + 'static,
{
    blocking(state, move |tree| {
        let actor = actor(tree, &headers)?;
        f(tree, &actor)
    })
    .await
}

// ============================================================================
// Handlers
// ============================================================================

async fn post_space(State(s): State<AppState>, Json(req): Json<CreateSpaceReq>) -> impl IntoResponse {
    blocking(&s, move |t| t.create_space(&t.context(), &req.name, req.defaults)).await
}

async fn post_user(State(s): State<AppState>, Json(req): Json<CreateUserReq>) -> impl IntoResponse {
    blocking(&s, move |t| t.create_user(&t.context(), &req.username)).await
}

async fn post_member(
    State(s): State<AppState>,
    Path(space_id): Path<Uuid>,
    Json(req): Json<AddMemberReq>,
) -> impl IntoResponse {
    blocking(&s, move |t| {
        let membership = Membership { space_id, user_id: req.user_id, is_admin: req.is_admin, is_guest: req.is_guest };
        t.add_member(&t.context(), membership)
    })
    .await
}

async fn post_role(
    State(s): State<AppState>,
    Path(space_id): Path<Uuid>,
    Json(req): Json<CreateRoleReq>,
) -> impl IntoResponse {
    blocking(&s, move |t| t.create_role(&t.context(), space_id, &req.name, req.source.as_deref())).await
}

async fn get_roots(State(s): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    as_actor(&s, headers, |t, a| t.list_root_pages(a)).await
}

async fn post_page(State(s): State<AppState>, headers: HeaderMap, Json(req): Json<NewPage>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.create_page(&t.context(), a, req)).await
}

async fn get_page(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.page_with_permissions(a, id)).await
}

async fn delete_page(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.delete_page(&t.context(), a, id)).await
}

async fn get_children(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.list_children(a, id)).await
}

async fn post_reposition(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<RepositionReq>,
) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.reposition_page(&t.context(), a, id, req.parent_id, req.index)).await
}

async fn post_duplicate(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<DuplicateReq>,
) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.duplicate_subtree(&t.context(), a, id, req.target_parent_id)).await
}

async fn post_trash(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.trash_page(&t.context(), a, id)).await
}

async fn post_restore(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.restore_page(&t.context(), a, id)).await
}

async fn get_permissions(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.list_permissions(a, id)).await
}

async fn put_permission(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<UpsertPermissionReq>,
) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.upsert_permission(&t.context(), a, id, req.assignee, req.level)).await
}

async fn delete_permission(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.remove_permission(&t.context(), a, id)).await
}

async fn post_assign(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<RoleMemberReq>,
) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.assign_role(&t.context(), a, role_id, req.user_id)).await
}

async fn post_unassign(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(req): Json<RoleMemberReq>,
) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.unassign_role(&t.context(), a, role_id, req.user_id)).await
}

async fn post_export(State(s): State<AppState>, headers: HeaderMap, Json(req): Json<ExportReq>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.export(a, &req.page_ids)).await
}

async fn post_import(State(s): State<AppState>, headers: HeaderMap, Json(req): Json<ImportReq>) -> impl IntoResponse {
    as_actor(&s, headers, move |t, a| t.import(&t.context(), a, &req.bundle, req.target_parent_id, req.options)).await
}

async fn get_verify(State(s): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    as_actor(&s, headers, |t, a| t.verify_tree(a)).await
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagetree=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("PAGETREE_CONFIG").ok().map(PathBuf::from);
    let config = ConfigLoader::default().load(config_path.as_deref())?;
    tracing::info!(path = %config.storage.path.display(), "opening page store");
    let tree = PageTree::open(&config)?.with_broadcaster(Arc::new(TracingBroadcaster));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/spaces", post(post_space))
        .route("/users", post(post_user))
        .route("/spaces/:id/members", post(post_member))
        .route("/spaces/:id/roles", post(post_role))
        .route("/pages", get(get_roots).post(post_page))
        .route("/pages/:id", get(get_page).delete(delete_page))
        .route("/pages/:id/children", get(get_children))
        .route("/pages/:id/reposition", post(post_reposition))
        .route("/pages/:id/duplicate", post(post_duplicate))
        .route("/pages/:id/trash", post(post_trash))
        .route("/pages/:id/restore", post(post_restore))
        .route("/pages/:id/permissions", get(get_permissions).put(put_permission))
        .route("/permissions/:id", delete(delete_permission))
        .route("/roles/:id/assign", post(post_assign))
        .route("/roles/:id/unassign", post(post_unassign))
        .route("/export", post(post_export))
        .route("/import", post(post_import))
        .route("/verify", get(get_verify))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { tree: Arc::new(tree) });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "pagetree server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
