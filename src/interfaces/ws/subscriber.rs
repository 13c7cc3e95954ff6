//! WebSocket endpoint for notification subscribers
//!
//! A subscriber presents a token, either as `?token=` or as a Bearer
//! header. The token is checked before the upgrade: without a tenant the
//! connection is refused with 401, otherwise the socket joins the room of
//! its tenant and receives every frame the hub emits there.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::select;
use tracing::{debug, error, info, warn};

use super::hub::SharedHub;
use crate::auth::{extract_bearer, TokenVerifier, VerifiedSubscriber};
use crate::support::errors::AuthError;
use crate::support::shutdown::ShutdownSignal;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// State for the subscriber WebSocket handler
#[derive(Clone)]
pub struct SubscriberState {
    pub hub: SharedHub,
    pub verifier: Arc<dyn TokenVerifier>,
    pub shutdown: ShutdownSignal,
}

fn token_from<'a>(params: &'a ConnectParams, headers: &'a HeaderMap) -> Option<&'a str> {
    params
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(extract_bearer)
        })
}

fn reject(error: AuthError) -> Response {
    let body = Json(json!({
        "success": false,
        "error": error.to_string()
    }));
    (StatusCode::UNAUTHORIZED, body).into_response()
}

/// `GET /notifications/ws`
#[utoipa::path(
    get,
    path = "/notifications/ws",
    tag = "WebSocket Notifications",
    params(("token" = Option<String>, Query, description = "JWT carrying a tenantID claim; a Bearer header works too")),
    responses(
        (status = 101, description = "Upgraded; frames are {\"event\": <entity>, \"data\": <notification>}"),
        (status = 401, description = "Missing or invalid token, or no tenant claim")
    )
)]
pub async fn ws_subscriber_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<SubscriberState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = token_from(&params, &headers) else {
        warn!("Subscriber connection without token refused");
        return reject(AuthError::MissingToken);
    };

    let verified = match state.verifier.verify(token).await {
        Ok(verified) => verified,
        Err(e) => {
            warn!(error = %e, "Subscriber connection refused");
            return reject(e);
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_subscriber_socket(socket, state, verified)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_subscriber_socket(socket: WebSocket, state: SubscriberState, verified: VerifiedSubscriber) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriber = state.hub.join(&verified.tenant_id);
    let connection_id = subscriber.connection_id();
    let tenant_id = verified.tenant_id.as_str();

    info!(
        tenant_id,
        %connection_id,
        user_id = verified.user_id.as_deref().unwrap_or("-"),
        "📡 Subscriber connected"
    );

    let stopped = state.shutdown.wait();
    tokio::pin!(stopped);

    let reason = loop {
        select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            error!(tenant_id, %connection_id, "Failed to send pong: {}", e);
                            break "pong failed";
                        }
                    }
                    Some(Ok(Message::Close(_))) => break "client closed",
                    Some(Ok(Message::Text(text))) => {
                        debug!(tenant_id, %connection_id, "Ignoring inbound text: {}", text.as_str());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(tenant_id, %connection_id, "WebSocket error: {}", e);
                        break "transport error";
                    }
                    None => break "stream ended",
                }
            }

            frame = subscriber.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sender.send(Message::Text(frame.to_string().into())).await {
                            error!(tenant_id, %connection_id, "Failed to send notification: {}", e);
                            break "send failed";
                        }
                    }
                    None => {
                        let _ = sender.send(going_away()).await;
                        break "hub stopped";
                    }
                }
            }

            _ = &mut stopped => {
                let _ = sender.send(going_away()).await;
                break "server shutdown";
            }
        }
    };

    info!(tenant_id, %connection_id, reason, "Subscriber disconnected");
}

/// 1001 tells clients the server left and the subscription should be retried
fn going_away() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: "server shutdown".into(),
    }))
}
