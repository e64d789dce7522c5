//! System API handlers: liveness text and connection count.
use crate::api::types::ConnectionsInfo;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Broker is up", body = String)
    )
)]
pub(crate) async fn health() -> &'static str {
    "200 OK"
}

#[utoipa::path(
    get,
    path = "/connections",
    tag = "system",
    responses(
        (status = 200, description = "Live streaming subscribers", body = ConnectionsInfo)
    )
)]
pub(crate) async fn connections(State(state): State<AppState>) -> Json<ConnectionsInfo> {
    Json(ConnectionsInfo {
        clients_connected: state.broker.subscriber_count(),
    })
}
