//! Live event push over WebSocket.
//!
//! A subscriber registers on its category before the upgrade completes, so
//! every event fired after the handshake reaches it. Nothing is replayed; a
//! slow socket loses pushes once its bounded queue fills.
use crate::api::types::StreamEvent;
use crate::app::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use kairo_broker::StreamSubscription;

#[utoipa::path(
    get,
    path = "/ws/events/{category}",
    tag = "stream",
    params(("category" = String, Path, description = "Event category, or a queue id for uncategorised events")),
    responses(
        (status = 101, description = "Upgraded; each text frame is a JSON StreamEvent", body = StreamEvent)
    )
)]
pub(crate) async fn stream_events(
    ws: WebSocketUpgrade,
    Path(category): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let subscription = state.broker.subscribe(&category);
    ws.on_upgrade(move |socket| forward_events(socket, subscription, category))
}

async fn forward_events(mut socket: WebSocket, mut subscription: StreamSubscription, category: String) {
    tracing::debug!(%category, "stream subscriber connected");
    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let frame = match serde_json::to_string(&StreamEvent::from(&event)) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to encode stream event");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Inbound frames carry nothing; pings are answered by the socket.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::debug!(%category, "stream subscriber disconnected");
}
