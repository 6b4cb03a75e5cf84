use crate::middleware::auth::{auth_middleware, current_user};
use crate::models::auth::{Claims, ErrorResponse};
use crate::models::chat::*;
use crate::services::turn::{TurnError, TurnOutcome};
use crate::services::usage;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post, Router},
};
use chrono::Utc;
use std::sync::Arc;

pub fn chat_routes() -> Router {
    Router::new()
        .route("/api/chat", post(direct_message))
        .route("/api/chats", post(create_chat).get(list_chats))
        .route(
            "/api/chats/:chat_id/messages",
            get(get_chat_messages).post(create_chat_message),
        )
        .route("/api/chats/:chat_id", patch(update_chat).delete(delete_chat))
        .route("/api/messages", get(list_messages))
        .route("/api/message-count", get(message_count))
        .layer(axum::middleware::from_fn(auth_middleware))
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            message: "Internal server error".to_string(),
        }),
    )
}

fn chat_not_found() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            success: false,
            message: "Chat not found".to_string(),
        }),
    )
}

/// Shared turn driver for both message endpoints. Quota exhaustion maps
/// to 402 with the structured upgrade payload; it is an expected outcome,
/// not an error.
async fn run_turn(
    state: &AppState,
    claims: &Claims,
    chat_id: Option<i32>,
    payload: MessageCreate,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    if payload.content.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Message content is required".to_string(),
            }),
        ));
    }

    let user = current_user(&state.db_pool, claims).await?;

    let outcome = state
        .turn_service
        .run_turn(&user, chat_id, &payload.content)
        .await
        .map_err(|e| match e {
            TurnError::ChatNotFound => chat_not_found(),
            TurnError::Database(e) => internal_error(e),
        })?;

    match outcome {
        TurnOutcome::Completed {
            bot_message,
            current_count,
            remaining,
            time_frame,
        } => Ok(Json(TurnResponse {
            bot_message,
            current_count,
            remaining_messages: remaining,
            time_frame,
        })
        .into_response()),
        TurnOutcome::LimitReached {
            current_count,
            time_frame,
        } => Ok((
            StatusCode::PAYMENT_REQUIRED,
            Json(QuotaExceededResponse {
                detail: "Message limit reached",
                upgrade_required: true,
                current_count,
                time_frame,
            }),
        )
            .into_response()),
    }
}

async fn direct_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<MessageCreate>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    run_turn(&state, &claims, None, payload).await
}

async fn create_chat_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i32>,
    Json(payload): Json<MessageCreate>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    run_turn(&state, &claims, Some(chat_id), payload).await
}

async fn create_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Chat>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    let chat = usage::create_chat(&state.db_pool, user.id, "New Chat")
        .await
        .map_err(internal_error)?;

    Ok(Json(chat))
}

async fn list_chats(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Chat>>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    let chats = usage::list_user_chats(&state.db_pool, user.id)
        .await
        .map_err(internal_error)?;

    Ok(Json(chats))
}

async fn get_chat_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i32>,
) -> Result<Json<Vec<MessageView>>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    // Verify chat belongs to user
    usage::find_owned_chat(&state.db_pool, chat_id, user.id)
        .await
        .map_err(internal_error)?
        .ok_or_else(chat_not_found)?;

    let messages = usage::list_chat_messages(&state.db_pool, chat_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

async fn update_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i32>,
    Json(payload): Json<ChatUpdate>,
) -> Result<Json<Chat>, (StatusCode, Json<ErrorResponse>)> {
    if payload.title.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Title is required".to_string(),
            }),
        ));
    }

    let user = current_user(&state.db_pool, &claims).await?;

    usage::find_owned_chat(&state.db_pool, chat_id, user.id)
        .await
        .map_err(internal_error)?
        .ok_or_else(chat_not_found)?;

    let chat = usage::rename_chat(&state.db_pool, chat_id, &payload.title)
        .await
        .map_err(internal_error)?;

    Ok(Json(chat))
}

async fn delete_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i32>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    usage::find_owned_chat(&state.db_pool, chat_id, user.id)
        .await
        .map_err(internal_error)?
        .ok_or_else(chat_not_found)?;

    usage::delete_chat(&state.db_pool, chat_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({ "success": true })))
}

async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageView>>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;

    let messages = usage::list_user_messages(&state.db_pool, user.id)
        .await
        .map_err(internal_error)?;

    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

async fn message_count(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessageCountResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = current_user(&state.db_pool, &claims).await?;
    let policy = state.turn_service.policy();

    // Premium users always report a zero count
    if user.is_premium {
        return Ok(Json(MessageCountResponse {
            current_count: 0,
            time_frame: policy.time_frame().label(),
        }));
    }

    let since = policy.window_start(Utc::now());
    let count = usage::count_in_current_window(&state.db_pool, user.id, since)
        .await
        .map_err(internal_error)?;

    Ok(Json(MessageCountResponse {
        current_count: count,
        time_frame: policy.time_frame().label(),
    }))
}
