//! End-to-end tests: real sockets, real framing

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use herald_broker::callback;
use herald_protocol::{actions, Message, MessageCodec};
use herald_server::config::ListenConfig;
use herald_server::{serve, Hub, Listeners, ServerConfig};

type Peer = Framed<UnixStream, MessageCodec>;

const WAIT: Duration = Duration::from_secs(2);

struct Running {
    hub: Arc<Hub>,
    task: JoinHandle<()>,
    socket: std::path::PathBuf,
    _dir: TempDir,
}

async fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("herald.sock");

    let mut config = ServerConfig::default();
    config.listen = ListenConfig {
        socket_path: Some(socket.clone()),
        tcp_addr: None,
    };

    let listeners = Listeners::bind(&config.listen).await.unwrap();
    let hub = Arc::new(Hub::new(config));
    let mut state = hub.watch_state();
    let task = tokio::spawn(serve(Arc::clone(&hub), listeners));
    timeout(WAIT, state.wait_for(|s| s.is_open()))
        .await
        .unwrap()
        .unwrap();

    Running {
        hub,
        task,
        socket,
        _dir: dir,
    }
}

async fn connect(path: &Path) -> Peer {
    let stream = UnixStream::connect(path).await.unwrap();
    Framed::new(stream, MessageCodec::new())
}

async fn next_message(peer: &mut Peer) -> Message {
    let frame = timeout(WAIT, peer.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("codec error");
    frame.decode().unwrap()
}

async fn wait_for_peers(hub: &Hub, count: usize) {
    timeout(WAIT, async {
        while hub.registry().len() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peers never registered");
}

/// Connect two peers, registered as ids 1 and 2
async fn connect_pair(server: &Running) -> (Peer, Peer) {
    let mut c1 = connect(&server.socket).await;
    wait_for_peers(&server.hub, 1).await;
    let c2 = connect(&server.socket).await;

    let event = next_message(&mut c1).await;
    assert_eq!(event, Message::new(actions::CONNECT, json!({ "id": 2 })));
    (c1, c2)
}

#[tokio::test]
async fn test_disconnect_event_goes_to_remaining_peers() {
    let server = start().await;
    let (c1, mut c2) = connect_pair(&server).await;

    drop(c1);

    let event = next_message(&mut c2).await;
    assert_eq!(event, Message::new(actions::DISCONNECT, json!({ "id": 1 })));
    wait_for_peers(&server.hub, 1).await;
}

#[tokio::test]
async fn test_peer_publish_reaches_others_without_echo() {
    let server = start().await;
    let (mut c1, mut c2) = connect_pair(&server).await;

    c1.send(Message::new("chat", json!({ "text": "hi" })))
        .await
        .unwrap();
    assert_eq!(
        next_message(&mut c2).await,
        Message::new("chat", json!({ "text": "hi" }))
    );

    // Had "chat" been echoed to c1 it would be queued ahead of this
    c2.send(Message::new("ping", json!(null))).await.unwrap();
    assert_eq!(next_message(&mut c1).await, Message::new("ping", json!(null)));
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let server = start().await;
    let (mut c1, mut c2) = connect_pair(&server).await;

    let body = b"definitely not json";
    let mut raw = BytesMut::new();
    raw.put_u32(body.len() as u32);
    raw.put_slice(body);
    c1.get_mut().write_all(&raw).await.unwrap();

    c1.send(Message::new("after", json!(1))).await.unwrap();

    assert_eq!(next_message(&mut c2).await, Message::new("after", json!(1)));
}

#[tokio::test]
async fn test_double_encoded_frame_is_accepted() {
    let server = start().await;
    let (mut c1, mut c2) = connect_pair(&server).await;

    let inner = json!({ "action": "legacy", "data": { "v": 1 } }).to_string();
    let body = serde_json::to_vec(&inner).unwrap();
    let mut raw = BytesMut::new();
    raw.put_u32(body.len() as u32);
    raw.put_slice(&body);
    c1.get_mut().write_all(&raw).await.unwrap();

    assert_eq!(
        next_message(&mut c2).await,
        Message::new("legacy", json!({ "v": 1 }))
    );
}

#[tokio::test]
async fn test_hub_publish_and_local_handlers() {
    let server = start().await;

    let (tx, mut local) = mpsc::unbounded_channel();
    server.hub.subscribe_actions(
        ["chat"],
        callback(move |m| {
            let _ = tx.send(m.clone());
        }),
    );

    let mut peer = connect(&server.socket).await;
    wait_for_peers(&server.hub, 2).await;

    assert!(server.hub.publish("news", json!({ "headline": "up" })));
    assert_eq!(
        next_message(&mut peer).await,
        Message::new("news", json!({ "headline": "up" }))
    );

    peer.send(Message::new("chat", json!("from peer")))
        .await
        .unwrap();
    let received = timeout(WAIT, local.recv()).await.unwrap().unwrap();
    assert_eq!(received, Message::new("chat", json!("from peer")));
}

#[tokio::test]
async fn test_shutdown_closes_peers_and_socket() {
    let server = start().await;
    let mut peer = connect(&server.socket).await;
    wait_for_peers(&server.hub, 1).await;

    server.hub.shutdown();
    timeout(WAIT, server.task).await.unwrap().unwrap();

    assert!(!server.hub.is_connection_open());
    assert!(!server.hub.publish("late", json!(null)));
    assert!(timeout(WAIT, peer.next()).await.unwrap().is_none());
    assert!(!server.socket.exists());
}

#[tokio::test]
async fn test_tcp_peers() {
    let mut config = ServerConfig::default();
    config.listen = ListenConfig {
        socket_path: None,
        tcp_addr: Some("127.0.0.1:0".into()),
    };

    let listeners = Listeners::bind(&config.listen).await.unwrap();
    let addr = listeners.tcp_addr().unwrap();
    let hub = Arc::new(Hub::new(config));
    let mut state = hub.watch_state();
    tokio::spawn(serve(Arc::clone(&hub), listeners));
    timeout(WAIT, state.wait_for(|s| s.is_open()))
        .await
        .unwrap()
        .unwrap();

    let mut c1 = Framed::new(TcpStream::connect(addr).await.unwrap(), MessageCodec::new());
    wait_for_peers(&hub, 1).await;
    let mut c2 = Framed::new(TcpStream::connect(addr).await.unwrap(), MessageCodec::new());

    let frame = timeout(WAIT, c1.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(
        frame.decode().unwrap(),
        Message::new(actions::CONNECT, json!({ "id": 2 }))
    );

    c2.send(Message::new("hello", json!("tcp"))).await.unwrap();
    let frame = timeout(WAIT, c1.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(frame.decode().unwrap(), Message::new("hello", json!("tcp")));

    hub.shutdown();
}
