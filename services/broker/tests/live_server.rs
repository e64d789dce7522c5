use broker::app::{AppState, build_router};
use futures::StreamExt;
use kairo_broker::Broker;
use kairo_client::{ClientError, KairoClient, NewEvent, RecurringOptions, ScheduleRule};
use kairo_common::{BufferOptions, clock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server() -> SocketAddr {
    let broker = Arc::new(Broker::new().with_max_tick(Duration::from_millis(20)));
    let _driver = broker.start();
    let app = build_router(AppState::new(broker));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}

async fn wait_for_connections(client: &KairoClient, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if client.connections().await.expect("connections") == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "connections never reached {expected}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn client_drives_full_lifecycle() {
    let addr = spawn_server().await;
    let client = KairoClient::new(&format!("http://{addr}")).expect("client");
    assert!(client.health().await.expect("health").contains("200 OK"));

    client.create_queue("Q").await.expect("queue");
    client.create_queue("Q").await.expect("repeat create");
    assert!(matches!(
        client.get_queue("missing").await,
        Err(ClientError::NotFound(_))
    ));

    let channel_id = client
        .create_channel(&["Q".to_string()], BufferOptions::new(1000, 10))
        .await
        .expect("channel");
    assert_eq!(client.list_channels().await.expect("list"), vec![channel_id.clone()]);
    let channel = client.get_channel(&channel_id).await.expect("get");
    assert_eq!(channel.queues, vec!["Q"]);
    assert_eq!(channel.buffer_options, BufferOptions::new(1000, 10));

    let rule = ScheduleRule {
        recurring_options: Some(RecurringOptions { times: 2, delay: 50 }),
        ..ScheduleRule::at("Q", clock::now_ms() + 100)
    };
    let event_id = client
        .schedule_event(&NewEvent {
            data: "xyz==".into(),
            category: None,
            schedule_rules: vec![rule],
        })
        .await
        .expect("schedule");
    assert!(!event_id.is_empty());
    assert_eq!(client.get_queue("Q").await.expect("queue").pending_events, 2);

    assert!(client.dequeue(&channel_id).await.expect("early").is_empty());
    tokio::time::sleep(Duration::from_millis(400)).await;
    let events = client.dequeue(&channel_id).await.expect("dequeue");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|event| event.data == "xyz=="));
    assert!(client.dequeue(&channel_id).await.expect("drained").is_empty());

    client.delete_channel(&channel_id).await.expect("delete channel");
    match client.get_channel(&channel_id).await {
        Err(ClientError::NotFound(message)) => {
            assert_eq!(message, format!("{channel_id} channel does not exist"));
        }
        other => panic!("expected not found, got {other:?}"),
    }

    client.delete_queue("Q").await.expect("delete queue");
    assert!(client.list_queues().await.expect("queues").is_empty());
}

#[tokio::test]
async fn websocket_subscriber_receives_matching_events() {
    let addr = spawn_server().await;
    let client = KairoClient::new(&format!("http://{addr}")).expect("client");
    client.create_queue("Q").await.expect("queue");

    let (mut alerts, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/events/alerts"))
        .await
        .expect("connect alerts");
    let (mut by_queue, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/events/Q"))
        .await
        .expect("connect queue");
    wait_for_connections(&client, 2).await;

    let now = clock::now_ms();
    client
        .schedule_event(&NewEvent {
            data: "tagged".into(),
            category: Some("alerts".into()),
            schedule_rules: vec![ScheduleRule::at("Q", now)],
        })
        .await
        .expect("tagged");
    client
        .schedule_event(&NewEvent {
            data: "plain".into(),
            category: None,
            schedule_rules: vec![ScheduleRule::at("Q", now + 50)],
        })
        .await
        .expect("plain");

    let frame = tokio::time::timeout(Duration::from_secs(2), alerts.next())
        .await
        .expect("timely")
        .expect("frame")
        .expect("message");
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    let pushed: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(pushed["data"], "tagged");
    assert_eq!(pushed["category"], "alerts");
    assert_eq!(pushed["queue"], "Q");

    let frame = tokio::time::timeout(Duration::from_secs(2), by_queue.next())
        .await
        .expect("timely")
        .expect("frame")
        .expect("message");
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    let pushed: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(pushed["data"], "plain");
    assert_eq!(pushed["category"], "Q");

    alerts.close(None).await.expect("close");
    drop(alerts);
    wait_for_connections(&client, 1).await;
}

#[tokio::test]
async fn late_subscriber_gets_no_replay() {
    let addr = spawn_server().await;
    let client = KairoClient::new(&format!("http://{addr}")).expect("client");
    client.create_queue("Q").await.expect("queue");
    client
        .schedule_event(&NewEvent {
            data: "early".into(),
            category: None,
            schedule_rules: vec![ScheduleRule::at("Q", clock::now_ms())],
        })
        .await
        .expect("early");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/events/Q"))
        .await
        .expect("connect");
    wait_for_connections(&client, 1).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(200), ws.next())
            .await
            .is_err()
    );
}
