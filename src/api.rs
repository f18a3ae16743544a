//! HTTP API handlers for FaunaSphere.
//!
//! A local, single-user JSON bridge between a presentation layer and the
//! session. Every intent endpoint returns the full [`SessionSnapshot`] after
//! the intent has been handled; intents that do not apply to the current
//! view leave it unchanged.
//!
//! Logging never includes the API key. `PUT /credential` skips its body in
//! its span.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::controller::SessionController;
use crate::credentials::KeyRing;
use crate::session::{Event, SessionSnapshot, daily_challenge};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub keys: KeyRing,
}

/// Body of `POST /search`.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

/// Body of `POST /quiz/answer`.
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub option: usize,
}

/// Body of `PUT /credential`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    pub api_key: String,
}

/// Response of `GET /challenge`.
#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub animal: &'static str,
}

/// Build the router with every endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/session", get(get_session))
        .route("/challenge", get(get_challenge))
        .route("/search", post(post_search))
        .route("/reset", post(post_reset))
        .route("/favorites/toggle", post(post_toggle_favorite))
        .route("/favorites/:name", delete(delete_favorite))
        .route("/slides/next", post(post_next_slide))
        .route("/slides/previous", post(post_previous_slide))
        .route("/slides/:index", post(post_show_slide))
        .route("/quiz/start", post(post_start_quiz))
        .route("/quiz/answer", post(post_answer_quiz))
        .route("/quiz/next", post(post_next_question))
        .route("/credential", put(put_credential))
        .with_state(state)
}

async fn dispatch(state: &AppState, event: Event) -> Json<SessionSnapshot> {
    Json(state.controller.dispatch(event).await)
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// GET /session - Current profile, view and daily challenge.
#[instrument(skip(state))]
pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.controller.snapshot().await)
}

/// GET /challenge - Today's challenge animal.
///
/// ```json
/// { "animal": "Narwhal" }
/// ```
pub async fn get_challenge(State(state): State<AppState>) -> Json<ChallengeResponse> {
    Json(ChallengeResponse {
        animal: daily_challenge(state.controller.today()),
    })
}

/// POST /search - Look up a species.
///
/// Returns after the lookup has finished. While it runs, `GET /session`
/// reports a `loading` view and further searches are ignored. A client that
/// disconnects early does not cancel the lookup.
///
/// # Request Body
///
/// ```json
/// { "query": "axolotl" }
/// ```
#[instrument(skip(state, request), fields(query))]
pub async fn post_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Json<SessionSnapshot> {
    tracing::Span::current().record("query", request.query.as_str());

    let snapshot = state
        .controller
        .dispatch(Event::SearchRequested {
            query: request.query,
        })
        .await;
    info!(streak = snapshot.profile.streak, "Search handled");
    Json(snapshot)
}

/// POST /reset - Back to the idle view; the profile is kept.
#[instrument(skip(state))]
pub async fn post_reset(State(state): State<AppState>) -> Json<SessionSnapshot> {
    dispatch(&state, Event::Reset).await
}

/// POST /favorites/toggle - Add or remove the species on display.
#[instrument(skip(state))]
pub async fn post_toggle_favorite(State(state): State<AppState>) -> Json<SessionSnapshot> {
    dispatch(&state, Event::ToggleFavorite).await
}

/// DELETE /favorites/:name - Remove a favorite by name (case-insensitive).
#[instrument(skip(state))]
pub async fn delete_favorite(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<SessionSnapshot> {
    dispatch(&state, Event::RemoveFavorite { name }).await
}

#[instrument(skip(state))]
pub async fn post_next_slide(State(state): State<AppState>) -> Json<SessionSnapshot> {
    dispatch(&state, Event::NextSlide).await
}

#[instrument(skip(state))]
pub async fn post_previous_slide(State(state): State<AppState>) -> Json<SessionSnapshot> {
    dispatch(&state, Event::PreviousSlide).await
}

/// POST /slides/:index - Jump to an image; out-of-range indexes are ignored.
#[instrument(skip(state))]
pub async fn post_show_slide(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Json<SessionSnapshot> {
    dispatch(&state, Event::ShowSlide(index)).await
}

#[instrument(skip(state))]
pub async fn post_start_quiz(State(state): State<AppState>) -> Json<SessionSnapshot> {
    dispatch(&state, Event::StartQuiz).await
}

/// POST /quiz/answer - Answer the current question.
///
/// ```json
/// { "option": 2 }
/// ```
#[instrument(skip(state))]
pub async fn post_answer_quiz(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Json<SessionSnapshot> {
    dispatch(
        &state,
        Event::AnswerQuiz {
            option: request.option,
        },
    )
    .await
}

/// POST /quiz/next - Next question, or finish after the last one.
#[instrument(skip(state))]
pub async fn post_next_question(State(state): State<AppState>) -> Json<SessionSnapshot> {
    dispatch(&state, Event::AdvanceQuiz).await
}

/// PUT /credential - Select the API key used for lookups.
///
/// Returns `204 No Content` once a key is selected, `400 Bad Request` for a
/// blank key (which also clears the current selection).
#[instrument(skip(state, request))]
pub async fn put_credential(
    State(state): State<AppState>,
    Json(request): Json<CredentialRequest>,
) -> StatusCode {
    if state.keys.select(request.api_key).await {
        info!("API key selected");
        StatusCode::NO_CONTENT
    } else {
        warn!("Blank API key rejected; selection cleared");
        StatusCode::BAD_REQUEST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::content::testing::ScriptedBackend;
    use crate::content::{ContentClient, ModelConfig};
    use crate::controller::local_clock;
    use crate::storage::Storage;

    async fn test_state() -> AppState {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let keys = KeyRing::new();
        let content =
            ContentClient::new(Arc::new(ScriptedBackend::new()), ModelConfig::default());
        let controller =
            SessionController::start(content, storage, Arc::new(keys.clone()), local_clock())
                .await
                .unwrap();
        AppState { controller, keys }
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(test_state().await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_credential_selection_updates_key_ring() {
        let state = test_state().await;
        let keys = state.keys.clone();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::put("/credential")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"apiKey":"abc123"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(keys.current().await.as_deref(), Some("abc123"));

        let response = app
            .oneshot(
                Request::put("/credential")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"apiKey":"  "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(keys.current().await.is_none());
    }
}
