use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Local;
use serde_json::json;

use presenca_auth::authorize_self;
use presenca_core::UserId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn public_router() -> Router {
    Router::new().route("/users/:id", get(get_user))
}

pub fn protected_router() -> Router {
    Router::new()
        .route("/users/:id/history", get(get_history))
        .route("/users/:id/stats", get(get_stats))
}

/// Parse the path id and require it to be the caller.
fn own_user_id(user: &UserContext, raw: &str) -> Result<UserId, axum::response::Response> {
    let owner = dto::parse_user_id(raw)?;
    authorize_self(user.user_id(), owner)
        .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))?;
    Ok(owner)
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let user_id = match dto::parse_user_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.queries().profile(user_id).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(json!({ "user": profile }))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "Usuário não encontrado"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::HistoryQuery>,
) -> axum::response::Response {
    let owner = match own_user_id(&user, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (page, status) = match (query.page_request(), query.status()) {
        (Ok(page), Ok(status)) => (page, status),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    match services.queries().user_history(owner, status, page).await {
        Ok(page) => (StatusCode::OK, Json(dto::paginated("history", page))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let owner = match own_user_id(&user, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let today = Local::now().date_naive();
    match services.queries().user_stats(owner, today).await {
        Ok(stats) => (StatusCode::OK, Json(json!({ "stats": stats }))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
