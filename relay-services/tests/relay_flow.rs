//! End-to-end flow: downstream subscribe request -> upstream command ->
//! inbound frame -> broadcast to every joined subscriber.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use relay_core::{RelayError, RelayResult, ServerMessage};
use relay_kalshi::{
    AuthHeaders, EventRouter, FeedCredentials, FeedTransport, FrameSink, FrameStream, Signer,
    UpstreamClient,
};
use relay_services::{register_feed_handlers, BroadcastHub};

/// Test-side handles for one accepted in-memory connection
struct TestConn {
    commands: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<RelayResult<String>>,
}

#[derive(Default)]
struct MemoryTransport {
    conns: Mutex<Vec<Option<TestConn>>>,
}

impl MemoryTransport {
    fn take_conn(&self, index: usize) -> TestConn {
        self.conns.lock().unwrap()[index].take().unwrap()
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> RelayResult<()> {
        self.tx
            .send(frame)
            .map_err(|_| RelayError::transport("send failed"))
    }

    async fn close(&mut self) -> RelayResult<()> {
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<RelayResult<String>>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<RelayResult<String>> {
        self.rx.recv().await
    }
}

/// Local handle so the transport can implement the upstream trait while
/// the test keeps a second reference for inspection
struct SharedTransport(Arc<MemoryTransport>);

#[async_trait]
impl FeedTransport for SharedTransport {
    async fn connect(
        &self,
        _auth: &AuthHeaders,
    ) -> RelayResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.0.conns.lock().unwrap().push(Some(TestConn {
            commands: cmd_rx,
            inbound: in_tx,
        }));
        Ok((
            Box::new(MemorySink { tx: cmd_tx }),
            Box::new(MemoryStream { rx: in_rx }),
        ))
    }
}

struct Fixture {
    transport: Arc<MemoryTransport>,
    upstream: Arc<UpstreamClient>,
    hub: Arc<BroadcastHub>,
}

async fn fixture() -> Fixture {
    let signer = Signer::new(FeedCredentials {
        key_id: "key-1".to_string(),
        secret: "test-secret".to_string(),
    })
    .unwrap();
    let transport = Arc::new(MemoryTransport::default());
    let router = Arc::new(EventRouter::new());
    let upstream = Arc::new(UpstreamClient::new(
        signer,
        SharedTransport(Arc::clone(&transport)),
        Arc::clone(&router),
    ));
    let hub = Arc::new(BroadcastHub::with_delivery_timeout(
        Arc::clone(&upstream),
        Duration::from_secs(1),
    ));
    register_feed_handlers(&hub, &router).await;
    Fixture {
        transport,
        upstream,
        hub,
    }
}

#[tokio::test]
async fn subscribe_request_connects_and_fans_events_out() {
    let f = fixture().await;

    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    f.hub.join(tx_a);
    f.hub.join(tx_b);

    // Subscriber asks for the ticker channel while the feed is down
    f.hub
        .handle_subscribe_request(vec!["ticker".to_string()], Some(vec!["ABC".to_string()]))
        .await
        .unwrap();

    // The upstream connected on demand and sent exactly this command
    let mut conn = f.transport.take_conn(0);
    let frame = conn.commands.recv().await.unwrap();
    let command: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(
        command,
        json!({
            "id": 1,
            "cmd": "subscribe",
            "params": {"channels": ["ticker"], "market_tickers": ["ABC"]}
        })
    );
    assert_eq!(
        f.upstream.subscription_intent().await,
        ["ticker".to_string()].into_iter().collect()
    );

    // An inbound ticker frame reaches every joined subscriber, re-wrapped
    conn.inbound
        .send(Ok(
            r#"{"type":"ticker","market_ticker":"ABC","price":55}"#.to_string()
        ))
        .unwrap();

    let expected = json!({"type": "ticker", "data": {"market_ticker": "ABC", "price": 55}});
    for rx in [&mut rx_a, &mut rx_b] {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("subscriber timed out")
            .expect("subscriber channel closed");
        assert_eq!(serde_json::to_value(&message).unwrap(), expected);
    }
}

#[tokio::test]
async fn unsubscribe_request_narrows_intent_without_reconnecting() {
    let f = fixture().await;

    f.hub
        .handle_subscribe_request(vec!["ticker".to_string(), "trade".to_string()], None)
        .await
        .unwrap();
    f.hub
        .handle_unsubscribe_request(vec!["trade".to_string()], None)
        .await
        .unwrap();

    assert_eq!(
        f.upstream.subscription_intent().await,
        ["ticker".to_string()].into_iter().collect()
    );
    // Still the single original connection
    assert_eq!(f.transport.conns.lock().unwrap().len(), 1);

    let mut conn = f.transport.take_conn(0);
    let subscribe: Value = serde_json::from_str(&conn.commands.recv().await.unwrap()).unwrap();
    let unsubscribe: Value = serde_json::from_str(&conn.commands.recv().await.unwrap()).unwrap();
    assert_eq!(subscribe["cmd"], "subscribe");
    assert_eq!(unsubscribe["cmd"], "unsubscribe");
    assert_eq!(unsubscribe["params"]["channels"], json!(["trade"]));
}

#[tokio::test]
async fn forwarded_fill_events_use_the_fill_envelope() {
    let f = fixture().await;
    let (tx, mut rx) = mpsc::channel(8);
    f.hub.join(tx);

    f.hub
        .handle_subscribe_request(vec!["fill".to_string()], None)
        .await
        .unwrap();
    let conn = f.transport.take_conn(0);
    conn.inbound
        .send(Ok(
            r#"{"type":"fill","order_id":"o-1","count":2}"#.to_string()
        ))
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("subscriber timed out")
        .expect("subscriber channel closed");
    match message {
        ServerMessage::Fill { data } => {
            assert_eq!(data, json!({"order_id": "o-1", "count": 2}))
        }
        other => panic!("unexpected message: {:?}", other),
    }
}
