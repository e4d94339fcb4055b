//! Axum router construction and the conversation REST handlers.

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;
use chrono::Utc;
use whisperer_core::history::{filter_conversations, relative_date_label, validate_title};
use whisperer_core::{AuthUser, Conversation, ConversationWithMessages, Message, Role};

/// Builds the complete application router.
pub fn build(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/auth/me", get(auth_me))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation)
                .patch(rename_conversation)
                .delete(delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(list_messages).post(add_message),
        );

    // Permissive, so a separately served frontend can connect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn auth_me(MaybeUser(user): MaybeUser) -> Json<Option<AuthUser>> {
    Json(user)
}

#[derive(Deserialize)]
struct ListQuery {
    q: Option<String>,
}

/// A history entry with its sidebar date label.
#[derive(Serialize)]
struct ConversationListItem {
    #[serde(flatten)]
    conversation: Conversation,
    updated_label: String,
}

#[derive(Deserialize)]
struct TitleBody {
    title: String,
}

#[derive(Deserialize)]
struct MessageBody {
    role: Role,
    content: String,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid conversation id: {raw}")))
}

/// Loads a conversation the caller owns. Someone else's looks like a missing one.
async fn owned_conversation(
    state: &AppState,
    user: &AuthUser,
    raw_id: &str,
) -> Result<ConversationWithMessages, ApiError> {
    let id = parse_id(raw_id)?;
    match state.store.get_conversation_with_messages(id).await? {
        Some(found) if found.conversation.owner_id == user.id => Ok(found),
        _ => Err(ApiError::NotFound("conversation not found".into())),
    }
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConversationListItem>>, ApiError> {
    let conversations = state.store.list_conversations(&user.id).await?;
    let query = query.q.unwrap_or_default();
    let now = Utc::now();
    let items = filter_conversations(conversations, &query)
        .into_iter()
        .map(|conversation| ConversationListItem {
            updated_label: relative_date_label(conversation.updated_at, now),
            conversation,
        })
        .collect();
    Ok(Json(items))
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<TitleBody>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let title = validate_title(&body.title)?;
    let conversation = state.store.create_conversation(&user.id, &title).await?;
    tracing::info!(conversation_id = %conversation.id, "conversation created via api");
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ConversationWithMessages>, ApiError> {
    Ok(Json(owned_conversation(&state, &user, &id).await?))
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<TitleBody>,
) -> Result<Json<Conversation>, ApiError> {
    let title = validate_title(&body.title)?;
    let existing = owned_conversation(&state, &user, &id).await?;
    state
        .store
        .update_title(existing.conversation.id, &title)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("conversation not found".into()))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let existing = owned_conversation(&state, &user, &id).await?;
    let deleted = state
        .store
        .delete_conversation(existing.conversation.id)
        .await?;
    Ok(Json(json!({ "success": deleted })))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(owned_conversation(&state, &user, &id).await?.messages))
}

async fn add_message(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::BadRequest("message content cannot be empty".into()));
    }
    let existing = owned_conversation(&state, &user, &id).await?;
    let message = state
        .store
        .add_message(existing.conversation.id, body.role, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
