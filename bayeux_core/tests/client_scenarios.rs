//! End-to-end protocol scenarios against a scripted transport.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bayeux_core::{
    client::CONNECTION_TIMEOUT,
    message::{Advice, Reconnect, CONNECT_CHANNEL, HANDSHAKE_CHANNEL, SUBSCRIBE_CHANNEL},
    test_utils::{handshake_ok, push_frame, response_ok, MockTransport},
    ClientState, FayeClient, FayeError, TransportRegistry,
};
use serde_json::{json, Map};
use testresult::TestResult;
use tokio::sync::mpsc;

static TRACING: OnceLock<()> = OnceLock::new();

fn init_tracing() {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt().with_env_filter("warn").init();
    });
}

/// Poll `condition` until it holds, or fail the test after ~10 s of
/// (possibly auto-advanced) time.
async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..1000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn long_poll_client() -> (FayeClient, Arc<MockTransport>) {
    let lp = Arc::new(MockTransport::long_polling());
    let client = FayeClient::new(
        "push.example.com/faye",
        TransportRegistry::new(vec![lp.clone()]),
    );
    (client, lp)
}

#[tokio::test]
async fn long_poll_session_assigns_monotonic_ids() -> TestResult {
    init_tracing();
    let (client, lp) = long_poll_client();
    lp.script(HANDSHAKE_CHANNEL, &[handshake_ok("C1", &["long-polling"])]);
    lp.script(CONNECT_CHANNEL, &[response_ok(CONNECT_CHANNEL)]);
    lp.script(SUBSCRIBE_CHANNEL, &[response_ok(SUBSCRIBE_CHANNEL)]);

    client.handshake_and_connect().await?;
    assert!(client.connected().await);
    assert_eq!(client.client_id().await, "C1");

    let (tx, _rx) = mpsc::channel(1);
    client.wait_subscribe("/user/U", tx).await;

    let sent = lp.sent();
    let ids: Vec<&str> = sent.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3"]);

    // The handshake goes out before a client id exists; everything after
    // carries the server-assigned one.
    assert!(sent[0].client_id.is_empty());
    assert!(sent.iter().skip(1).all(|m| m.client_id == "C1"));

    assert_eq!(lp.url(), "push.example.com/faye");
    assert_eq!(lp.timeout(), CONNECTION_TIMEOUT);
    Ok(())
}

#[tokio::test]
async fn queued_push_messages_reach_matching_subscriptions() -> TestResult {
    init_tracing();
    let (client, lp) = long_poll_client();
    lp.script(HANDSHAKE_CHANNEL, &[handshake_ok("C1", &["long-polling"])]);
    lp.script(CONNECT_CHANNEL, &[response_ok(CONNECT_CHANNEL)]);
    lp.script(SUBSCRIBE_CHANNEL, &[response_ok(SUBSCRIBE_CHANNEL)]);
    client.handshake_and_connect().await?;

    let (tx, mut rx) = mpsc::channel(4);
    client.wait_subscribe("/user/*", tx).await;

    // The same client id comes back, so subscriptions are kept as-is and
    // the connect response's queued messages flow to them.
    lp.script(HANDSHAKE_CHANNEL, &[handshake_ok("C1", &["long-polling"])]);
    lp.script(
        CONNECT_CHANNEL,
        &[
            response_ok(CONNECT_CHANNEL),
            push_frame("/user/42", "line.create", json!({"id": "M1"})),
            push_frame("/user/42", "like.create", json!({"id": "M2"})),
        ],
    );
    client.handshake_and_connect().await?;

    let first = rx.recv().await.expect("first push delivered");
    let second = rx.recv().await.expect("second push delivered");
    assert_eq!(first.data_type(), Some("line.create"));
    assert_eq!(second.data_type(), Some("like.create"));
    assert_eq!(client.subscribed_channels().await, vec!["/user/*"]);
    Ok(())
}

#[tokio::test]
async fn inbound_frames_go_to_the_first_matching_subscription_only() -> TestResult {
    init_tracing();
    let ws = Arc::new(MockTransport::websocket());
    let lp = Arc::new(MockTransport::long_polling());
    let client = FayeClient::new(
        "push.example.com/faye",
        TransportRegistry::new(vec![ws.clone(), lp.clone()]),
    );
    lp.script(
        HANDSHAKE_CHANNEL,
        &[handshake_ok("C1", &["long-polling", "websocket"])],
    );
    client.handshake_and_connect().await?;

    let (tx_exact, mut rx_exact) = mpsc::channel(4);
    client.wait_subscribe("/user/U", tx_exact).await;
    let (tx_glob, mut rx_glob) = mpsc::channel(4);
    client.wait_subscribe("/user/*", tx_glob).await;

    // Both subscriptions match this channel; delivery stops at the first.
    ws.push_read(&[push_frame("/user/U", "line.create", json!({"id": "M1"}))]);
    let delivered = rx_exact.recv().await.expect("first subscription receives");
    assert_eq!(delivered.data_type(), Some("line.create"));
    assert!(rx_glob.try_recv().is_err());

    // A channel only the glob matches still reaches it.
    ws.push_read(&[push_frame("/user/V", "line.create", json!({"id": "M2"}))]);
    let delivered = rx_glob.recv().await.expect("glob subscription receives");
    assert_eq!(delivered.channel, "/user/V");
    Ok(())
}

// Scenario: a second handshake rotates the client id; the existing
// subscription must reappear on the wire under the new id.
#[tokio::test(start_paused = true)]
async fn client_id_rotation_resubscribes() -> TestResult {
    init_tracing();
    let (client, lp) = long_poll_client();
    lp.script(HANDSHAKE_CHANNEL, &[handshake_ok("C1", &["long-polling"])]);
    lp.script(CONNECT_CHANNEL, &[response_ok(CONNECT_CHANNEL)]);
    lp.script(SUBSCRIBE_CHANNEL, &[response_ok(SUBSCRIBE_CHANNEL)]);
    client.handshake_and_connect().await?;

    let (tx, _rx) = mpsc::channel(1);
    client.wait_subscribe("/user/U", tx).await;
    let channels_before = client.subscribed_channels().await;

    lp.script(HANDSHAKE_CHANNEL, &[handshake_ok("C2", &["long-polling"])]);
    lp.script(CONNECT_CHANNEL, &[response_ok(CONNECT_CHANNEL)]);
    lp.script(SUBSCRIBE_CHANNEL, &[response_ok(SUBSCRIBE_CHANNEL)]);
    client.handshake_and_connect().await?;

    wait_for("resubscribe under the new client id", || async {
        lp.sent_on(SUBSCRIBE_CHANNEL)
            .iter()
            .any(|m| m.client_id == "C2" && m.subscription == "/user/U")
    })
    .await;

    wait_for("subscription list to settle", || async {
        !client.subscribed_channels().await.is_empty()
    })
    .await;
    assert_eq!(client.subscribed_channels().await, channels_before);
    Ok(())
}

// Scenario: advice `reconnect: none` is terminal.
#[tokio::test(start_paused = true)]
async fn terminal_advice_refuses_all_further_traffic() -> TestResult {
    init_tracing();
    let (client, lp) = long_poll_client();
    lp.script(HANDSHAKE_CHANNEL, &[handshake_ok("C1", &["long-polling"])]);
    let mut connect_response = response_ok(CONNECT_CHANNEL);
    connect_response.advice = Some(Advice {
        reconnect: Some(Reconnect::None),
        interval: None,
        timeout: None,
    });
    lp.script(CONNECT_CHANNEL, &[connect_response]);

    client.handshake_and_connect().await?;
    wait_for("terminal state", || async {
        client.state().await == ClientState::Disconnected
    })
    .await;

    let frames_before = lp.sent().len();

    let err = client.publish("/chat", Map::new()).await.unwrap_err();
    assert!(matches!(err, FayeError::Disconnected));
    assert!(err.is_terminal());

    let err = client.handshake_and_connect().await.unwrap_err();
    assert!(matches!(err, FayeError::Disconnected));

    // Nothing further went out on the wire.
    assert_eq!(lp.sent().len(), frames_before);
    Ok(())
}

// Scenario: a WebSocket read failure tears the session down; a fresh
// handshake brings the same subscriptions back.
#[tokio::test(start_paused = true)]
async fn read_failure_tears_down_and_resubscribes_on_reconnect() -> TestResult {
    init_tracing();
    let ws = Arc::new(MockTransport::websocket());
    let lp = Arc::new(MockTransport::long_polling());
    let client = FayeClient::new(
        "push.example.com/faye",
        TransportRegistry::new(vec![ws.clone(), lp.clone()]),
    );

    lp.script(
        HANDSHAKE_CHANNEL,
        &[handshake_ok("C1", &["long-polling", "websocket"])],
    );
    client.handshake_and_connect().await?;
    assert_eq!(
        client.connection_type().await,
        Some(bayeux_core::ConnectionType::Websocket)
    );

    let (tx, mut rx) = mpsc::channel(4);
    let subscription = client.wait_subscribe("/user/U", tx).await;

    // A malformed payload is dropped; the frame behind it still arrives.
    ws.push_read_raw(b"{not json".to_vec());
    ws.push_read(&[push_frame("/user/U", "line.create", json!({"id": "M1"}))]);
    let delivered = rx.recv().await.expect("push delivered");
    assert_eq!(delivered.data_type(), Some("line.create"));

    ws.fail_reads();
    wait_for("teardown after read failure", || async {
        client.state().await == ClientState::Unconnected && subscription.is_stopped()
    })
    .await;

    lp.script(
        HANDSHAKE_CHANNEL,
        &[handshake_ok("C2", &["long-polling", "websocket"])],
    );
    client.handshake_and_connect().await?;

    wait_for("resubscribe under the new client id", || async {
        ws.sent_on(SUBSCRIBE_CHANNEL)
            .iter()
            .any(|m| m.client_id == "C2" && m.subscription == "/user/U")
    })
    .await;
    Ok(())
}

// Property: concurrent publishers and subscribers never corrupt the client
// id, the state, or the subscription list, and every wire frame gets a
// unique id.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publish_and_subscribe_keep_state_consistent() -> TestResult {
    init_tracing();
    let (client, lp) = long_poll_client();
    lp.script(HANDSHAKE_CHANNEL, &[handshake_ok("C1", &["long-polling"])]);
    lp.script(CONNECT_CHANNEL, &[response_ok(CONNECT_CHANNEL)]);
    lp.script_many(SUBSCRIBE_CHANNEL, &[response_ok(SUBSCRIBE_CHANNEL)], 64);
    lp.script_many("/chat", &[response_ok("/chat")], 64);
    client.handshake_and_connect().await?;

    let mut workers = Vec::new();
    for worker in 0..4 {
        let client = client.clone();
        workers.push(tokio::spawn(async move {
            for round in 0..8 {
                let (tx, _rx) = mpsc::channel(1);
                client
                    .wait_subscribe(&format!("/user/{worker}-{round}"), tx)
                    .await;
                client.publish("/chat", Map::new()).await.expect("publish");
            }
        }));
    }
    for worker in workers {
        worker.await?;
    }

    assert!(client.connected().await);
    assert_eq!(client.client_id().await, "C1");

    let mut channels = client.subscribed_channels().await;
    channels.sort();
    let mut expected: Vec<String> = (0..4)
        .flat_map(|w| (0..8).map(move |r| format!("/user/{w}-{r}")))
        .collect();
    expected.sort();
    assert_eq!(channels, expected);

    let sent = lp.sent();
    let mut ids: Vec<u64> = sent.iter().map(|m| m.id.parse().unwrap()).collect();
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total, "wire ids must be unique");
    assert_eq!(*ids.first().unwrap(), 1, "ids start at 1");
    Ok(())
}
