use crate::middleware::auth::{auth_middleware, current_user};
use crate::models::auth::{Claims, ErrorResponse};
use crate::stripe_client::{verify_webhook_signature, WebhookEvent};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{post, Router},
};
use serde_json::json;
use std::sync::Arc;

pub fn billing_routes() -> Router {
    let protected = Router::new()
        .route("/api/billing/checkout", post(create_checkout_session))
        .layer(axum::middleware::from_fn(auth_middleware));

    // The webhook authenticates itself via its signature header
    Router::new()
        .route("/api/billing/webhook", post(stripe_webhook))
        .merge(protected)
}

async fn create_checkout_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let stripe = state.stripe_client.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            success: false,
            message: "Billing is not configured".to_string(),
        }),
    ))?;

    let user = current_user(&state.db_pool, &claims).await?;

    if user.is_premium {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Account is already premium".to_string(),
            }),
        ));
    }

    let success_url = format!("{}/success", state.config.frontend_url);
    let cancel_url = format!("{}/cancel", state.config.frontend_url);

    let session = stripe
        .create_checkout_session(user.id, &user.email, &success_url, &cancel_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create checkout session: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    message: "Failed to create checkout session".to_string(),
                }),
            )
        })?;

    tracing::info!(user_id = user.id, session_id = %session.id, "created checkout session");

    Ok(Json(json!({ "url": session.url })))
}

async fn stripe_webhook(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let webhook_secret = state.stripe_webhook_secret.as_deref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            success: false,
            message: "Billing is not configured".to_string(),
        }),
    ))?;

    let sig_header = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Missing signature header".to_string(),
            }),
        ))?;

    verify_webhook_signature(&body, sig_header, webhook_secret).map_err(|e| {
        tracing::warn!("Webhook signature verification failed: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Invalid signature".to_string(),
            }),
        )
    })?;

    let event = WebhookEvent::parse(&body).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                message: "Invalid payload".to_string(),
            }),
        )
    })?;

    if event.event_type == "checkout.session.completed" {
        let Some(user_id) = event.metadata_user_id() else {
            tracing::warn!("checkout.session.completed without user_id metadata");
            return Ok(Json(json!({ "status": "success" })));
        };

        // The tier flip is the webhook's only obligation; subsequent quota
        // checks see the new tier immediately.
        sqlx::query(
            "UPDATE users
             SET is_premium = true, stripe_customer_id = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(event.customer_id())
        .execute(&state.db_pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upgrade user {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    message: "Internal server error".to_string(),
                }),
            )
        })?;

        tracing::info!(user_id, "user upgraded to premium");
    }

    Ok(Json(json!({ "status": "success" })))
}
