use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde_json::json;

use presenca_attendance::{rank_next_sessions, SchedulePreferences};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn public_router() -> Router {
    Router::new()
        .route("/classes", get(list_classes))
        .route("/classes/next", get(next_classes))
        .route("/classes/:id", get(get_class))
        .route("/classes/:id/participants", get(list_participants))
}

pub fn protected_router() -> Router {
    Router::new()
        .route("/classes/:id/confirm", post(set_attendance))
        .route("/classes/user/confirmed", get(my_confirmed_classes))
}

pub async fn list_classes(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListClassesQuery>,
) -> axum::response::Response {
    let page = match query.page_request() {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let filter = match query.filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match services.queries().list_sessions(&filter, page).await {
        Ok(page) => (StatusCode::OK, Json(dto::paginated("classes", page))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_class(
    Extension(services): Extension<Arc<AppServices>>,
    user: Option<Extension<UserContext>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let session_id = match dto::parse_session_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let viewer = user.map(|Extension(u)| u.user_id());

    match services.queries().session_detail(session_id, viewer).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_participants(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let session_id = match dto::parse_session_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.queries().participants(session_id).await {
        Ok(participants) => {
            (StatusCode::OK, Json(json!({ "participants": participants }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn set_attendance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ConfirmRequest>, JsonRejection>,
) -> axum::response::Response {
    let session_id = match dto::parse_session_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return errors::json_error_with_details(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "Dados inválidos",
                json!({ "field": "confirmed", "reason": rejection.body_text() }),
            );
        }
    };

    match services
        .confirmations()
        .set_attendance(user.user_id(), session_id, body.confirmed)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(dto::ConfirmResponse::new(
                outcome.confirmed,
                outcome.confirmed_count,
            )),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn my_confirmed_classes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Query(query): Query<dto::PageQuery>,
) -> axum::response::Response {
    let page = match query.page_request() {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services
        .queries()
        .confirmed_sessions(user.user_id(), page)
        .await
    {
        Ok(page) => (StatusCode::OK, Json(dto::paginated("classes", page))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Upcoming classes ranked by the caller's preferences.
///
/// Explicit `days`/`times` query values win; otherwise an authenticated caller's profile
/// preferences are used.
pub async fn next_classes(
    Extension(services): Extension<Arc<AppServices>>,
    user: Option<Extension<UserContext>>,
    Query(query): Query<dto::NextClassesQuery>,
) -> axum::response::Response {
    let limit = match query.limit() {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    let (mut days, mut times) = (query.days(), query.times());
    if let (None, None, Some(Extension(user))) = (&days, &times, user) {
        match services.queries().profile(user.user_id()).await {
            Ok(Some(profile)) => {
                days = Some(profile.preferred_days);
                times = Some(profile.preferred_times);
            }
            Ok(None) => {}
            Err(e) => return errors::store_error_to_response(e),
        }
    }
    let preferences =
        SchedulePreferences::from_labels(days.unwrap_or_default(), times.unwrap_or_default());

    let sessions = match services.queries().all_sessions().await {
        Ok(s) => s,
        Err(e) => return errors::store_error_to_response(e),
    };

    let mut ranked = rank_next_sessions(sessions, &preferences, Local::now().naive_local());
    ranked.truncate(limit);
    (StatusCode::OK, Json(json!({ "classes": ranked }))).into_response()
}
