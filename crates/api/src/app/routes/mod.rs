use axum::{routing::get, Router};

pub mod classes;
pub mod system;
pub mod users;

/// Endpoints open to anonymous callers (a valid token personalizes some responses).
pub fn public_router() -> Router {
    Router::new()
        .merge(classes::public_router())
        .merge(users::public_router())
}

/// Endpoints that require an authenticated user.
pub fn protected_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .merge(classes::protected_router())
        .merge(users::protected_router())
}
