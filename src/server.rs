//! HTTP routes.
//!
//! `GET /`, `/table`, `/editor` and `/map` serve the pages; everything under
//! `/api` exchanges JSON. Page views always answer `200`, carrying any failure
//! inline. Only request bodies that cannot be read answer `400`.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::html;
use crate::pages::{GridSubmission, Portal, SelectionRequest};
use crate::session::SESSION_COOKIE;

#[derive(Clone)]
pub struct AppState {
    pub portal: Arc<Portal>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    status: &'static str,
    message: String,
}

struct ApiErrorResponse {
    status: StatusCode,
    error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<JsonRejection> for ApiErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        debug!(%rejection, "rejected request body");
        ApiErrorResponse {
            status: StatusCode::BAD_REQUEST,
            error: ApiError {
                status: "error",
                message: rejection.body_text(),
            },
        }
    }
}

/// The caller's session, issued on first contact.
pub struct Session {
    id: String,
    issued: bool,
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = cookie_value(&parts.headers, SESSION_COOKIE);
        let (id, issued) = state.portal.sessions().resolve(presented);
        if issued {
            debug!(session = %id, "issued session");
        }
        Ok(Session { id, issued })
    }
}

impl Session {
    /// JSON response that sets the session cookie when it was just issued.
    fn respond<T: Serialize>(&self, body: T) -> Response {
        let mut response = Json(body).into_response();
        if self.issued {
            let cookie = format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.id);
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(SET_COOKIE, value);
            }
        }
        response
    }
}

async fn welcome_page() -> Html<&'static str> {
    Html(html::WELCOME_PAGE)
}

async fn table_page() -> Html<&'static str> {
    Html(html::TABLE_PAGE)
}

async fn editor_page() -> Html<&'static str> {
    Html(html::EDITOR_PAGE)
}

async fn map_page() -> Html<&'static str> {
    Html(html::MAP_PAGE)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn table_handler(State(state): State<AppState>) -> Response {
    Json(state.portal.table_view().await).into_response()
}

async fn table_refresh_handler(State(state): State<AppState>) -> Response {
    Json(state.portal.refresh_table().await).into_response()
}

async fn editor_handler(State(state): State<AppState>) -> Response {
    Json(state.portal.editor_view().await).into_response()
}

async fn editor_save_handler(
    State(state): State<AppState>,
    body: Result<Json<GridSubmission>, JsonRejection>,
) -> Result<Response, ApiErrorResponse> {
    let Json(submission) = body?;
    Ok(Json(state.portal.save_editor(submission).await).into_response())
}

async fn map_handler(State(state): State<AppState>, session: Session) -> Response {
    session.respond(state.portal.map_view(&session.id).await)
}

async fn map_selection_handler(
    State(state): State<AppState>,
    session: Session,
    body: Result<Json<SelectionRequest>, JsonRejection>,
) -> Result<Response, ApiErrorResponse> {
    let Json(request) = body?;
    Ok(session.respond(state.portal.select_rows(&session.id, request).await))
}

async fn map_refresh_handler(State(state): State<AppState>, session: Session) -> Response {
    session.respond(state.portal.refresh_map(&session.id).await)
}

pub fn router(portal: Arc<Portal>) -> Router {
    Router::new()
        .route("/", get(welcome_page))
        .route("/table", get(table_page))
        .route("/editor", get(editor_page))
        .route("/map", get(map_page))
        .route("/api/health", get(health_handler))
        .route("/api/table", get(table_handler))
        .route("/api/table/refresh", post(table_refresh_handler))
        .route("/api/editor", get(editor_handler))
        .route("/api/editor/save", post(editor_save_handler))
        .route("/api/map", get(map_handler))
        .route("/api/map/selection", post(map_selection_handler))
        .route("/api/map/refresh", post(map_refresh_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(AppState { portal })
}
