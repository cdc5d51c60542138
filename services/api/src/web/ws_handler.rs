//! services/api/src/web/ws_handler.rs
//!
//! The `/ws` real-time channel.
//!
//! Authentication happens twice. The HTTP upgrade request must carry an access
//! token (`?token=` or `Authorization: Bearer`), checked by `authenticate_handshake`
//! before the upgrade is accepted. After the upgrade the client's first frame
//! must be `connect` with its own credential in `headers`; the principal taken
//! from that frame owns the session.

use crate::web::{
    broker::{Delivery, USER_DESTINATION_PREFIX},
    middleware::bearer_token,
    protocol::{ClientFrame, ServerFrame},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, Request, State, WebSocketUpgrade,
    },
    http::StatusCode,
    middleware::Next,
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, Stream, StreamExt},
    Sink, SinkExt,
};
use learnhub_core::domain::CredentialKind;
use learnhub_core::ports::{PortError, PortResult, TokenService};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSender<S> = Arc<Mutex<SplitSink<S, Message>>>;

/// Destinations a session may subscribe to.
pub const USER_QUEUE_PREFIX: &str = "/user/queue/";

//=========================================================================================
// Handshake Authentication
//=========================================================================================

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    token: Option<String>,
}

/// Attributes recorded on a successful handshake and handed to the session.
#[derive(Debug, Clone)]
pub struct HandshakeAttributes {
    pub subject: String,
}

/// Middleware guarding the upgrade request. Rejects with 401 before any
/// upgrade when no valid access token is presented.
pub async fn authenticate_handshake(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let query_token = Query::<HandshakeQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty());
    let token = query_token
        .or_else(|| bearer_token(req.headers()).map(str::to_owned))
        .ok_or_else(|| {
            warn!("WebSocket handshake without a credential");
            StatusCode::UNAUTHORIZED
        })?;

    let identity = state
        .tokens
        .validate(&token, CredentialKind::Access)
        .map_err(|e| {
            warn!("WebSocket handshake rejected: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

    req.extensions_mut().insert(HandshakeAttributes {
        subject: identity.subject,
    });
    Ok(next.run(req).await)
}

//=========================================================================================
// Connect Frame Authentication
//=========================================================================================

/// Picks the credential out of a connect frame's headers: `Authorization`,
/// then `authorization`, then `token`. A `Bearer ` prefix is optional.
pub fn connect_token(headers: &HashMap<String, String>) -> Option<String> {
    ["Authorization", "authorization", "token"]
        .iter()
        .find_map(|key| headers.get(*key))
        .map(|raw| raw.trim())
        .map(|raw| raw.strip_prefix("Bearer ").unwrap_or(raw).trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Authenticates a connect frame and returns the principal name.
pub fn authenticate_connect(
    headers: &HashMap<String, String>,
    tokens: &dyn TokenService,
) -> PortResult<String> {
    let token = connect_token(headers).ok_or(PortError::Unauthorized)?;
    let identity = tokens.validate(&token, CredentialKind::Access)?;
    Ok(identity.subject)
}

/// Whether a client may subscribe to `destination`.
pub fn is_subscribable(destination: &str) -> bool {
    destination.len() > USER_QUEUE_PREFIX.len() && destination.starts_with(USER_QUEUE_PREFIX)
}

//=========================================================================================
// WebSocket Session
//=========================================================================================

/// How long a freshly upgraded socket may stay silent before its connect frame.
pub const CONNECT_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(attrs): Extension<HandshakeAttributes>,
) -> Response {
    ws.on_upgrade(move |socket: WebSocket| {
        run_session(socket, app_state, attrs, CONNECT_FRAME_TIMEOUT)
    })
}

async fn send_frame<S>(ws_sender: &WsSender<S>, frame: &ServerFrame) -> bool
where
    S: Sink<Message>,
{
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server frame: {}", e);
            return false;
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

async fn reject<S>(ws_sender: &WsSender<S>, message: &str)
where
    S: Sink<Message>,
{
    let _ = send_frame(
        ws_sender,
        &ServerFrame::Error {
            message: message.to_string(),
        },
    )
    .await;
    let _ = ws_sender.lock().await.send(Message::Close(None)).await;
}

/// Drives one channel session over any socket-shaped transport.
///
/// The first frame must arrive within `connect_timeout` and be a valid
/// `connect`; otherwise the client gets an `error` frame and a close.
pub async fn run_session<S, E>(
    socket: S,
    app_state: Arc<AppState>,
    attrs: HandshakeAttributes,
    connect_timeout: Duration,
) where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
    E: Send,
{
    info!("New WebSocket connection established for {}", attrs.subject);

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender<S> = Arc::new(Mutex::new(sender));

    // --- 1. Connect Phase ---
    let first = match tokio::time::timeout(connect_timeout, receiver.next()).await {
        Ok(first) => first,
        Err(_) => {
            warn!("No connect frame from {} within {:?}", attrs.subject, connect_timeout);
            reject(&ws_sender, "Timed out waiting for a connect frame").await;
            return;
        }
    };
    let principal = match first {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Connect { headers }) => {
                match authenticate_connect(&headers, app_state.tokens.as_ref()) {
                    Ok(principal) => principal,
                    Err(e) => {
                        warn!("Connect frame rejected for {}: {}", attrs.subject, e);
                        reject(&ws_sender, "Unauthorized").await;
                        return;
                    }
                }
            }
            _ => {
                warn!("First frame from {} was not a connect frame", attrs.subject);
                reject(&ws_sender, "Expected a connect frame").await;
                return;
            }
        },
        Some(Ok(_)) => {
            warn!("First frame from {} was not text", attrs.subject);
            reject(&ws_sender, "Expected a connect frame").await;
            return;
        }
        _ => {
            info!("Client {} disconnected before connecting", attrs.subject);
            return;
        }
    };

    if principal != attrs.subject {
        warn!(
            "Connect principal {} differs from handshake subject {}; using {}",
            principal, attrs.subject, principal
        );
    }

    let (session_id, inbox) = app_state.broker.register(&principal).await;
    if !send_frame(
        &ws_sender,
        &ServerFrame::Connected {
            principal: principal.clone(),
        },
    )
    .await
    {
        app_state.broker.unregister(session_id).await;
        return;
    }

    // --- 2. Delivery Task ---
    let subscriptions: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let cancellation_token = CancellationToken::new();
    let delivery_task = tokio::spawn(deliver(
        inbox,
        ws_sender.clone(),
        subscriptions.clone(),
        cancellation_token.clone(),
    ));

    // --- 3. Main Frame Loop ---
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Subscribe { id, destination }) => {
                    if is_subscribable(&destination) {
                        debug!("{} subscribed to {} as {}", principal, destination, id);
                        subscriptions.lock().await.insert(id, destination);
                    } else {
                        warn!("{} tried to subscribe to {}", principal, destination);
                        let message = format!("Cannot subscribe to {}", destination);
                        if !send_frame(&ws_sender, &ServerFrame::Error { message }).await {
                            break;
                        }
                    }
                }
                Ok(ClientFrame::Unsubscribe { id }) => {
                    subscriptions.lock().await.remove(&id);
                }
                Ok(ClientFrame::Disconnect) => {
                    info!("{} sent disconnect", principal);
                    break;
                }
                Ok(ClientFrame::Connect { .. }) => {
                    warn!("Ignoring repeated connect frame from {}", principal);
                }
                Err(e) => {
                    warn!("Unparseable frame from {}: {}", principal, e);
                    let message = "Malformed frame".to_string();
                    if !send_frame(&ws_sender, &ServerFrame::Error { message }).await {
                        break;
                    }
                }
            },
            Message::Close(_) => {
                info!("Client {} sent close frame.", principal);
                break;
            }
            _ => {}
        }
    }

    // --- 4. Cleanup ---
    cancellation_token.cancel();
    app_state.broker.unregister(session_id).await;
    if let Err(e) = delivery_task.await {
        error!("Delivery task for {} panicked: {:?}", principal, e);
    }
    info!("WebSocket connection for {} closed.", principal);
}

/// Subscription ids in `subscriptions` whose destination is `destination`.
fn matching_subscriptions(subscriptions: &HashMap<String, String>, destination: &str) -> Vec<String> {
    subscriptions
        .iter()
        .filter(|(_, d)| d.as_str() == destination)
        .map(|(id, _)| id.clone())
        .collect()
}

async fn deliver<S>(
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
    ws_sender: WsSender<S>,
    subscriptions: Arc<Mutex<HashMap<String, String>>>,
    cancellation_token: CancellationToken,
) where
    S: Sink<Message>,
{
    loop {
        let delivery = tokio::select! {
            _ = cancellation_token.cancelled() => break,
            delivery = inbox.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };
        debug_assert!(delivery.destination.starts_with(USER_DESTINATION_PREFIX));

        let ids = matching_subscriptions(&*subscriptions.lock().await, &delivery.destination);
        for subscription in ids {
            let frame = ServerFrame::Message {
                subscription,
                destination: delivery.destination.clone(),
                body: delivery.body.clone(),
            };
            if !send_frame(&ws_sender, &frame).await {
                return;
            }
        }
    }
}
