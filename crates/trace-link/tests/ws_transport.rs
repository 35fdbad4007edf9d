//! WebSocket transport against a local tungstenite server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use trace_link::{InboundFrame, TraceConnection, TraceTransport, WsTransport};
use url::Url;

const WAIT: Duration = Duration::from_secs(2);

async fn connected_pair() -> (Box<dyn TraceConnection>, WebSocketStream<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let transport = WsTransport::new(Url::parse(&format!("ws://{addr}/ws/run")).unwrap());
    let server = async {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    };
    let (client, server) = tokio::join!(transport.connect(), server);
    (client.expect("client connects"), server)
}

async fn next(client: &mut Box<dyn TraceConnection>) -> InboundFrame {
    timeout(WAIT, client.next_frame())
        .await
        .expect("frame in time")
}

#[tokio::test]
async fn text_flows_both_ways_and_pings_are_skipped() {
    let (mut client, mut server) = connected_pair().await;

    client.send_text("{\"algorithm\":\"astar\"}".into()).await.unwrap();
    let received = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(received, Message::Text("{\"algorithm\":\"astar\"}".into()));

    server.send(Message::Ping(vec![1])).await.unwrap();
    server.send(Message::Text("{\"type\":\"done\"}".into())).await.unwrap();
    assert_eq!(next(&mut client).await, InboundFrame::Text("{\"type\":\"done\"}".into()));

    server.send(Message::Binary(b"{\"type\":\"progress\"}".to_vec())).await.unwrap();
    assert_eq!(
        next(&mut client).await,
        InboundFrame::Text("{\"type\":\"progress\"}".into())
    );
}

#[tokio::test]
async fn close_handshake_is_a_clean_close() {
    let (mut client, mut server) = connected_pair().await;

    server
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "run finished".into(),
        }))
        .await
        .unwrap();
    assert_eq!(
        next(&mut client).await,
        InboundFrame::Closed {
            clean: true,
            reason: Some("run finished".into()),
        }
    );
}

#[tokio::test]
async fn dropped_socket_is_an_unclean_close() {
    let (mut client, server) = connected_pair().await;

    drop(server);
    match next(&mut client).await {
        InboundFrame::Closed { clean, reason } => {
            assert!(!clean);
            assert!(reason.is_some());
        }
        other => panic!("expected a close, got {other:?}"),
    }
}

#[tokio::test]
async fn binary_frame_that_is_not_utf8_is_malformed() {
    let (mut client, mut server) = connected_pair().await;

    server.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
    assert!(matches!(next(&mut client).await, InboundFrame::Malformed(_)));

    server.send(Message::Text("{\"type\":\"done\"}".into())).await.unwrap();
    assert_eq!(next(&mut client).await, InboundFrame::Text("{\"type\":\"done\"}".into()));
}
