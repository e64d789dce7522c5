#![allow(dead_code)]

use broker::app::{AppState, build_router};
use kairo_broker::Broker;
use std::sync::Arc;

pub type TestApp = axum::routing::RouterIntoService<axum::body::Body, ()>;

/// Router over a broker whose timer driver is not running; tests fire rules
/// by hand with `Broker::fire_due`.
pub fn manual_app() -> (TestApp, Arc<Broker>) {
    let broker = Arc::new(Broker::new());
    let app = build_router(AppState::new(Arc::clone(&broker))).into_service();
    (app, broker)
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub async fn read_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}
