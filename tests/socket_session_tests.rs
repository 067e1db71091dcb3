mod common;

use common::{init_tracing, test_credentials};
use futures_util::{SinkExt, StreamExt};
use okx_session::core::config::ExchangeConfig;
use okx_session::core::kernel::{
    BackoffPolicy, ConnectionState, SubscriptionDescriptor, SubscriptionRegistry, WsConfig,
};
use okx_session::exchanges::okx::{
    BookEvent, MessageRouter, OkxBuilder, OrderBookHandler, StreamGroup, TradesHandler,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerWs = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, String) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// Next text frame sent by the client; `None` once it disconnects
async fn next_text(ws: &mut ServerWs) -> Option<String> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn next_json(ws: &mut ServerWs) -> Value {
    let text = next_text(ws).await.unwrap();
    serde_json::from_str(&text).unwrap()
}

fn fast_config() -> WsConfig {
    WsConfig::default()
        .with_connect_timeout(Duration::from_secs(1))
        .with_backoff(BackoffPolicy::fixed(Duration::from_millis(50)))
}

fn builder(config: ExchangeConfig, group: StreamGroup, url: &str) -> OkxBuilder {
    OkxBuilder::new(config)
        .with_ws_config(fast_config())
        .with_ws_url(group, url.to_string())
}

fn identity(frame: &Value) -> String {
    let arg = &frame["args"][0];
    format!(
        "{}:{}",
        arg["channel"].as_str().unwrap_or_default(),
        arg["instId"].as_str().unwrap_or_default()
    )
}

#[tokio::test]
async fn test_reconnect_replays_each_subscription_once() {
    let (listener, url) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(usize, Value)>();

    let server = tokio::spawn(async move {
        for conn in 0..2 {
            let mut ws = accept(&listener).await;
            for _ in 0..2 {
                seen_tx.send((conn, next_json(&mut ws).await)).unwrap();
            }
            if conn == 1 {
                // Hold the second connection until the client leaves
                while next_text(&mut ws).await.is_some() {}
            }
        }
    });

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.add(SubscriptionDescriptor::new("trades").instrument("instId", "BTC-USDT"));
    registry.add(SubscriptionDescriptor::new("tickers").instrument("instId", "ETH-USDT"));

    let builder = builder(ExchangeConfig::read_only(), StreamGroup::Public, &url);
    let (session, _frames) = builder
        .build_socket(StreamGroup::Public, Some(Arc::clone(&registry)))
        .unwrap();

    let mut per_conn: [Vec<String>; 2] = [Vec::new(), Vec::new()];
    for _ in 0..4 {
        let (conn, frame) = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(frame["args"].as_array().unwrap().len(), 1);
        per_conn[conn].push(identity(&frame));
    }

    let expected: HashSet<_> = ["trades:BTC-USDT", "tickers:ETH-USDT"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for sent in &per_conn {
        assert_eq!(sent.len(), 2);
        assert_eq!(sent.iter().cloned().collect::<HashSet<_>>(), expected);
    }

    session.wait_until_connected(WAIT).await.unwrap();

    // Re-subscribing a live subscription keeps one registry entry
    session
        .subscribe(SubscriptionDescriptor::new("trades").instrument("instId", "BTC-USDT"))
        .unwrap();
    assert_eq!(registry.len(), 2);

    session.close().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Closed);
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_text_heartbeat() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        assert_eq!(next_text(&mut ws).await.as_deref(), Some("ping"));
        ws.send(Message::Text("pong".to_string())).await.unwrap();
        ws.send(Message::Text(
            r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"last":"42000"}]}"#
                .to_string(),
        ))
        .await
        .unwrap();
        while next_text(&mut ws).await.is_some() {}
    });

    let builder = OkxBuilder::new(ExchangeConfig::read_only())
        .with_ws_config(fast_config().with_keepalive_timeout(Duration::from_millis(200)))
        .with_ws_url(StreamGroup::Public, url);
    let (session, mut frames) = builder.build_socket(StreamGroup::Public, None).unwrap();

    // The pong is swallowed; the first forwarded frame is the push
    match timeout(WAIT, frames.recv()).await.unwrap().unwrap() {
        Message::Text(text) => assert!(text.contains("tickers"), "unexpected frame {}", text),
        other => panic!("Expected text frame, got {:?}", other),
    }

    session.close().await.unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_login_precedes_replay() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let login = next_json(&mut ws).await;
        assert_eq!(login["op"], "login");
        assert_eq!(login["args"][0]["apiKey"], "test-key");
        assert_eq!(login["args"][0]["passphrase"], "test-passphrase");
        assert!(login["args"][0]["sign"].as_str().is_some());
        ws.send(Message::Text(
            r#"{"event":"login","code":"0","msg":"","connId":"a4d3ae55"}"#.to_string(),
        ))
        .await
        .unwrap();

        let subscribe = next_json(&mut ws).await;
        assert_eq!(subscribe["op"], "subscribe");
        assert_eq!(subscribe["args"][0]["channel"], "orders");
        assert_eq!(subscribe["args"][0]["instType"], "ANY");
        while next_text(&mut ws).await.is_some() {}
    });

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.add(SubscriptionDescriptor::new("orders").with_arg("instType", "ANY"));

    let builder = builder(test_credentials("secret"), StreamGroup::Private, &url);
    let (session, _frames) = builder
        .build_socket(StreamGroup::Private, Some(registry))
        .unwrap();

    session.wait_until_connected(WAIT).await.unwrap();
    session.close().await.unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_router_end_to_end() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let subscribe = next_json(&mut ws).await;
        assert_eq!(subscribe["op"], "subscribe");

        for frame in [
            r#"{"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"},"connId":"a4d3ae55"}"#,
            r#"{"event":"error","code":"60018","msg":"Wrong URL or channel:books50","connId":"a4d3ae55"}"#,
            r#"{"arg":{"channel":"mark-price","instId":"BTC-USDT"},"data":[{"markPx":"42000"}]}"#,
            r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"130639474","px":"42219.9","sz":"0.12060306","side":"buy","ts":"1630048897897","count":"3"}]}"#,
            r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot","data":[{"asks":[["42220","1.5","0","3"]],"bids":[["42219.9","0.2","0","1"]],"ts":"1630048897897","checksum":0,"seqId":100,"prevSeqId":-1}]}"#,
        ] {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }
        while next_text(&mut ws).await.is_some() {}
    });

    let builder = builder(ExchangeConfig::read_only(), StreamGroup::Public, &url);
    let (session, frames) = builder.build_socket(StreamGroup::Public, None).unwrap();

    let (trades, mut trade_rx) = TradesHandler::new(16);
    let (books, mut book_rx) = OrderBookHandler::new(16);
    let store = books.store();
    let router = MessageRouter::new()
        .register(&["trades"], trades)
        .register(&["books", "books5"], books);
    let router_task = tokio::spawn(router.run(frames));

    session.wait_until_connected(WAIT).await.unwrap();
    session
        .subscribe(SubscriptionDescriptor::new("trades").instrument("instId", "BTC-USDT"))
        .unwrap();

    let trade = timeout(WAIT, trade_rx.recv()).await.unwrap().unwrap();
    assert_eq!(trade.trade_id, "130639474");
    assert_eq!(trade.side, "buy");

    let event = timeout(WAIT, book_rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        BookEvent::Snapshot {
            inst_id: "BTC-USDT".to_string(),
            seq_id: Some(100),
        }
    );
    let book = store.get("BTC-USDT").unwrap();
    assert_eq!(book.best_bid().unwrap().price.to_string(), "42219.9");
    assert_eq!(book.spread().unwrap().to_string(), "0.1");

    session.close().await.unwrap();
    drop(session);
    timeout(WAIT, router_task).await.unwrap().unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_book_gap_requests_fresh_snapshot() {
    let (listener, url) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let subscribe = next_json(&mut ws).await;
        assert_eq!(subscribe["op"], "subscribe");
        assert_eq!(identity(&subscribe), "books:BTC-USDT");

        for frame in [
            r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot","data":[{"asks":[["42220","1.5","0","3"]],"bids":[["42219.9","0.2","0","1"]],"ts":"1630048897897","checksum":0,"seqId":100,"prevSeqId":-1}]}"#,
            r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"update","data":[{"asks":[],"bids":[["42219.8","1","0","1"]],"ts":"1630048897898","checksum":0,"seqId":102,"prevSeqId":99}]}"#,
        ] {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }

        for _ in 0..2 {
            seen_tx.send(next_json(&mut ws).await).unwrap();
        }
        ws.send(Message::Text(
            r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot","data":[{"asks":[["42221","1","0","1"]],"bids":[["42220.5","1","0","1"]],"ts":"1630048897999","checksum":0,"seqId":200,"prevSeqId":-1}]}"#
                .to_string(),
        ))
        .await
        .unwrap();
        while next_text(&mut ws).await.is_some() {}
    });

    let builder = builder(ExchangeConfig::read_only(), StreamGroup::Public, &url);
    let (session, frames) = builder.build_socket(StreamGroup::Public, None).unwrap();
    let session = Arc::new(session);

    let resync_session = Arc::clone(&session);
    let (books, mut book_rx) = OrderBookHandler::new(16);
    let books = books.with_resync(move |key| {
        assert!(resync_session.resubscribe(key).unwrap());
    });
    let store = books.store();
    let router_task = tokio::spawn(MessageRouter::new().register(&["books"], books).run(frames));

    session.wait_until_connected(WAIT).await.unwrap();
    session
        .subscribe(SubscriptionDescriptor::new("books").instrument("instId", "BTC-USDT"))
        .unwrap();

    let event = timeout(WAIT, book_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, BookEvent::Snapshot { seq_id: Some(100), .. }));
    let event = timeout(WAIT, book_rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        BookEvent::Gap {
            inst_id: "BTC-USDT".to_string(),
            expected: Some(100),
            received: Some(99),
        }
    );

    let unsubscribe = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(unsubscribe["op"], "unsubscribe");
    assert_eq!(identity(&unsubscribe), "books:BTC-USDT");
    let subscribe = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(subscribe["op"], "subscribe");
    assert_eq!(identity(&subscribe), "books:BTC-USDT");

    let event = timeout(WAIT, book_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, BookEvent::Snapshot { seq_id: Some(200), .. }));
    let book = store.get("BTC-USDT").unwrap();
    assert!(!book.stale);
    assert_eq!(book.best_bid().unwrap().price.to_string(), "42220.5");

    session.close().await.unwrap();
    timeout(WAIT, router_task).await.unwrap().unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();
}
