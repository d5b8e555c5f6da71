#![cfg(feature = "websocket")]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tandem::core::WebSocketConfig;
use tandem::prelude::*;
use tandem::protocol::Envelope;
use tokio::io::{DuplexStream, duplex};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{WebSocketStream, accept_async, client_async};

const ECHO: Declaration<Any, Any> = Declaration::json("echo");

async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (left, right) = duplex(64 * 1024);
    let (client, server) = tokio::join!(client_async("ws://localhost/", left), accept_async(right));
    (client.unwrap().0, server.unwrap())
}

#[tokio::test]
async fn unary_call_over_websocket() {
    let (client_ws, server_ws) = socket_pair().await;
    let config = WebSocketConfig::with_key("rpc");

    let server_side = WebSocketTransport::new(server_ws, &config);
    let server = RpcServer::new(server_side.clone());
    let _echo = server
        .register(&ECHO, |value: Value| async move { Ok(json!({ "echo": value })) })
        .unwrap();

    let client = RpcClient::new(WebSocketTransport::new(client_ws, &config));
    let reply = client
        .connect(&ECHO)
        .call(json!([1, "two"]))
        .await
        .unwrap();

    assert_eq!(reply, json!({ "echo": [1, "two"] }));
}

#[tokio::test]
async fn frames_for_another_key_are_ignored() {
    let (client_ws, server_ws) = socket_pair().await;

    let _server_side = RpcServer::new(WebSocketTransport::new(
        server_ws,
        &WebSocketConfig::with_key("alpha"),
    ));
    let client = RpcClient::new(WebSocketTransport::new(
        client_ws,
        &WebSocketConfig::with_key("beta"),
    ));

    let outcome =
        tokio::time::timeout(Duration::from_millis(100), client.connect(&ECHO).call(json!(1))).await;
    assert!(outcome.is_err(), "call across keys must never resolve");
}

#[tokio::test]
async fn ping_is_answered_and_messages_are_framed() {
    let (transport_ws, mut raw) = socket_pair().await;
    let transport = WebSocketTransport::new(transport_ws, &WebSocketConfig::with_key("k"));

    let ping = serde_json::to_string(&Envelope::ping("k")).unwrap();
    raw.send(Frame::Text(ping.into())).await.unwrap();
    let pong = next_envelope(&mut raw).await;
    assert!(pong.is_pong());
    assert_eq!(pong.key, "k");

    transport.send(Message::dispose(4));
    let framed = next_envelope(&mut raw).await;
    assert_eq!(framed.key, "k");
    assert_eq!(framed.into_message(), Some(Message::dispose(4)));
}

#[tokio::test]
async fn heartbeat_pings_on_the_configured_period() {
    let (transport_ws, mut raw) = socket_pair().await;
    let config = WebSocketConfig {
        key: "hb".into(),
        ping_interval_ms: 20,
    };
    let _transport = WebSocketTransport::new(transport_ws, &config);

    let ping = next_envelope(&mut raw).await;
    assert!(ping.is_ping());
    assert_eq!(ping.key, "hb");
}

#[tokio::test]
async fn zero_ping_interval_turns_heartbeat_off() {
    let (transport_ws, mut raw) = socket_pair().await;
    let config = WebSocketConfig {
        key: "quiet".into(),
        ping_interval_ms: 0,
    };
    let transport = WebSocketTransport::new(transport_ws, &config);

    let silence = tokio::time::timeout(Duration::from_millis(100), raw.next()).await;
    assert!(silence.is_err(), "no heartbeat expected");
    assert!(!transport.is_closed());

    transport.send(Message::dispose(2));
    let framed = next_envelope(&mut raw).await;
    assert_eq!(framed.into_message(), Some(Message::dispose(2)));
}

#[tokio::test]
async fn malformed_frames_do_not_break_the_channel() {
    let (transport_ws, mut raw) = socket_pair().await;
    let transport = WebSocketTransport::new(transport_ws, &WebSocketConfig::default());
    let server = RpcServer::new(transport.clone());
    let _echo = server
        .register(&ECHO, |value: Value| async move { Ok(value) })
        .unwrap();

    raw.send(Frame::Text("not json".to_string().into())).await.unwrap();
    raw.send(Frame::Text(r#"{"key":"","msg":{"nonsense":true}}"#.to_string().into()))
        .await
        .unwrap();
    let call = Envelope::message("", &Message::call(1, "echo", json!("hi"), false)).unwrap();
    raw.send(Frame::Text(serde_json::to_string(&call).unwrap().into()))
        .await
        .unwrap();

    let reply = next_envelope(&mut raw).await;
    assert_eq!(reply.into_message(), Some(Message::result(1, json!("hi"))));
}

#[tokio::test]
async fn closing_the_peer_resolves_closed() {
    let (transport_ws, mut raw) = socket_pair().await;
    let transport = WebSocketTransport::new(transport_ws, &WebSocketConfig::default());
    assert!(!transport.is_closed());

    raw.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), transport.closed())
        .await
        .unwrap();
    assert!(transport.is_closed());
}

#[tokio::test]
async fn connect_rejects_malformed_urls() {
    let err = WebSocketTransport::connect("not a url", &WebSocketConfig::default())
        .err()
        .unwrap();
    assert!(err.to_string().contains("not a url"));
}

async fn next_envelope(raw: &mut WebSocketStream<DuplexStream>) -> Envelope {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), raw.next())
            .await
            .expect("no frame in time")
            .expect("socket ended")
            .expect("socket error");
        if let Frame::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}
