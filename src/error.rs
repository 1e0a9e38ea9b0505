use axum::{http::StatusCode, response::IntoResponse};
use std::fmt::Display;

pub type CueResult<T> = Result<T, CueErr>;

#[derive(thiserror::Error, Debug)]
pub enum CueErr {
    #[error("store unavailable: {0}")]
    Store(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session inactive: {0}")]
    SessionInactive(String),

    #[error("session create failed: {0}")]
    SessionCreateFailed(String),

    #[error("bad store path: {0}")]
    BadPath(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("DB: {0}")]
    Db(#[from] sqlx::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for CueErr {
    fn into_response(self) -> axum::response::Response {
        let (code, body) = match self {
            CueErr::BadPath(msg)         => (StatusCode::BAD_REQUEST, msg),
            CueErr::Unauthorized         => (StatusCode::UNAUTHORIZED, "unauthorized".into()),
            CueErr::SessionNotFound(msg) => (StatusCode::NOT_FOUND, msg),
            CueErr::SessionInactive(msg) => (StatusCode::GONE, msg),
            other                        => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (code, body).into_response()
    }
}

/* ── helper: fold any error into Store ── */
pub fn store_err<E: Display>(e: E) -> CueErr {
    CueErr::Store(e.to_string())
}
