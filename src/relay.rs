//! Bundled store relay: exposes the [`MemoryStore`] contract over HTTP so a
//! band's devices can share one session tree without a third-party cloud
//! store. `PUT`/`GET`/`POST /store/{path}` map to write/read/append and
//! `GET /watch/{path}` streams value changes as server-sent events.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path, Query},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::error::{CueErr, CueResult};
use crate::store::{MemoryStore, RemoteStore};

/// Shared static secret every request must present as `?auth=...`. There is
/// no per-user auth; one secret covers the whole band.
#[derive(Clone)]
pub struct RelaySecret(pub String);

#[derive(Deserialize)]
struct AuthQuery {
    auth: Option<String>,
}

fn check(secret: &RelaySecret, q: &AuthQuery) -> CueResult<()> {
    if q.auth.as_deref() == Some(secret.0.as_str()) {
        Ok(())
    } else {
        Err(CueErr::Unauthorized)
    }
}

pub fn router(store: MemoryStore, secret: String) -> Router {
    Router::new()
        .route(
            "/store/*path",
            get(read_value).put(write_value).post(append_value),
        )
        .route("/watch/*path", get(watch_value))
        .layer(Extension(store))
        .layer(Extension(RelaySecret(secret)))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(addr: &str, store: MemoryStore, secret: String) -> CueResult<()> {
    let app = router(store, secret);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("relay listening on {addr}");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn read_value(
    Path(path): Path<String>,
    Query(q): Query<AuthQuery>,
    Extension(secret): Extension<RelaySecret>,
    Extension(store): Extension<MemoryStore>,
) -> CueResult<Json<Value>> {
    check(&secret, &q)?;
    Ok(Json(store.read(&path).await?))
}

async fn write_value(
    Path(path): Path<String>,
    Query(q): Query<AuthQuery>,
    Extension(secret): Extension<RelaySecret>,
    Extension(store): Extension<MemoryStore>,
    Json(body): Json<Value>,
) -> CueResult<Json<Value>> {
    check(&secret, &q)?;
    store.write(&path, body.clone()).await?;
    Ok(Json(body))
}

async fn append_value(
    Path(path): Path<String>,
    Query(q): Query<AuthQuery>,
    Extension(secret): Extension<RelaySecret>,
    Extension(store): Extension<MemoryStore>,
    Json(body): Json<Value>,
) -> CueResult<Json<Value>> {
    check(&secret, &q)?;
    let key = store.append(&path, body).await?;
    Ok(Json(json!({ "name": key })))
}

async fn watch_value(
    Path(path): Path<String>,
    Query(q): Query<AuthQuery>,
    Extension(secret): Extension<RelaySecret>,
    Extension(store): Extension<MemoryStore>,
) -> CueResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    check(&secret, &q)?;
    let rx = store.subscribe(&path).await?;

    // first iteration emits the current value, later ones wait for changes
    let stream = futures_util::stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        let event = Event::default().json_data(&value).ok()?;
        Some((Ok(event), (rx, false)))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
