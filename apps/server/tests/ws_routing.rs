use futures_util::{SinkExt, StreamExt};
use server::AppState;
use shared_proto::signaling::SignalingMessage;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn spawn_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(server::run(listener, AppState::new()));
    format!("127.0.0.1:{}", addr.port())
}

async fn connect(addr: &str, user_id: &str, room_id: Option<&str>) -> WsClient {
    let url = match room_id {
        Some(room) => format!("ws://{addr}/ws?userId={user_id}&roomId={room}"),
        None => format!("ws://{addr}/ws?userId={user_id}"),
    };
    let (client, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("client connect");
    client
}

async fn next_signal(client: &mut WsClient) -> SignalingMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await.expect("stream open").expect("frame") {
                Message::Text(text) => {
                    return serde_json::from_str(&text).expect("well-formed frame")
                }
                Message::Close(_) => panic!("connection closed early"),
                _ => {}
            }
        }
    })
    .await
    .expect("no frame arrived in time")
}

#[tokio::test]
async fn routes_frames_by_recipient() {
    let addr = spawn_relay().await;
    let mut alice = connect(&addr, "alice", Some("room1")).await;
    let mut bob = connect(&addr, "bob", Some("room1")).await;

    // Alice was already in the room, so she hears about Bob.
    match next_signal(&mut alice).await {
        SignalingMessage::UserJoined { from, room_id, .. } => {
            assert_eq!(from, "bob");
            assert_eq!(room_id, "room1");
        }
        other => panic!("expected user-joined, got {other:?}"),
    }

    let frame = r#"{"type":"end-call","version":2,"to":"alice","roomId":"room1"}"#;
    bob.send(Message::Text(frame.to_string())).await.unwrap();

    match next_signal(&mut alice).await {
        SignalingMessage::EndCall { to, room_id, .. } => {
            assert_eq!(to, "alice");
            assert_eq!(room_id, "room1");
        }
        other => panic!("expected end-call, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_frames_do_not_poison_the_connection() {
    let addr = spawn_relay().await;
    let mut alice = connect(&addr, "alice", None).await;
    let mut bob = connect(&addr, "bob", None).await;

    bob.send(Message::Text("{not json".to_string())).await.unwrap();
    bob.send(Message::Text(r#"{"type":"group-call"}"#.to_string()))
        .await
        .unwrap();
    // Addressed to nobody; dropped without side effects.
    bob.send(Message::Text(
        r#"{"type":"end-call","version":2,"to":"ghost","roomId":"r"}"#.to_string(),
    ))
    .await
    .unwrap();

    // The connection still routes fine afterwards.
    bob.send(Message::Text(
        r#"{"type":"call-rejected","version":2,"to":"alice","roomId":"room1"}"#.to_string(),
    ))
    .await
    .unwrap();

    match next_signal(&mut alice).await {
        SignalingMessage::CallRejected { room_id, .. } => assert_eq!(room_id, "room1"),
        other => panic!("expected call-rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_protocol_versions_are_dropped() {
    let addr = spawn_relay().await;
    let mut alice = connect(&addr, "alice", None).await;
    let mut bob = connect(&addr, "bob", None).await;

    bob.send(Message::Text(
        r#"{"type":"end-call","version":99,"to":"alice","roomId":"room1"}"#.to_string(),
    ))
    .await
    .unwrap();
    bob.send(Message::Text(
        r#"{"type":"end-call","version":2,"to":"alice","roomId":"room2"}"#.to_string(),
    ))
    .await
    .unwrap();

    // Only the supported frame comes through.
    match next_signal(&mut alice).await {
        SignalingMessage::EndCall { room_id, .. } => assert_eq!(room_id, "room2"),
        other => panic!("expected end-call, got {other:?}"),
    }
}
