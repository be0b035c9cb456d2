//! End-to-end WebSocket tests.
//!
//! Each test boots the real axum app on an ephemeral port and drives it
//! with tokio-tungstenite clients speaking the JSON protocol.

use futures_util::{SinkExt, StreamExt};
use parley_core::{MemoryStore, Store, User};
use parley_protocol::{codec, ClientFrame, ServerFrame};
use parley_server::config::Config;
use parley_server::handlers::{app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{id}@example.com"),
        avatar: String::new(),
        is_online: false,
        last_seen: 0,
    }
}

/// Boot the app with alice, bob, carol and an alice-bob chat.
async fn start_server(config: Config) -> (SocketAddr, Arc<MemoryStore>, String) {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(test_user("alice", "Alice"));
    store.insert_user(test_user("bob", "Bob"));
    store.insert_user(test_user("carol", "Carol"));
    let chat = store.get_or_create_chat("alice", "bob").await.unwrap();

    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&store) as Arc<dyn Store>,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });

    (addr, store, chat.id)
}

async fn connect(addr: SocketAddr, token: &str) -> Client {
    let url = format!("ws://{addr}/ws?token={token}");
    let (client, _response) = connect_async(url).await.expect("websocket connect");
    client
}

async fn send(client: &mut Client, frame: &ClientFrame) {
    let text = codec::encode_client(frame).unwrap();
    client.send(Message::Text(text)).await.unwrap();
}

/// Read frames until one matches, failing after five seconds.
async fn wait_for<F>(client: &mut Client, mut matches: F) -> ServerFrame
where
    F: FnMut(&ServerFrame) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame = codec::decode_server(&text).expect("decode server frame");
                    if matches(&frame) {
                        return frame;
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("websocket error: {e}"),
                None => panic!("connection closed while waiting"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Assert that no matching frame arrives within the window.
async fn assert_silent<F>(client: &mut Client, window: Duration, mut matches: F)
where
    F: FnMut(&ServerFrame) -> bool,
{
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame = codec::decode_server(&text).unwrap();
                assert!(!matches(&frame), "unexpected frame: {frame:?}");
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => panic!("websocket error: {e}"),
            Ok(None) => panic!("connection closed"),
            Err(_) => return, // Window elapsed quietly
        }
    }
}

/// Join a chat and, when unread messages are pending for the joiner,
/// use the flush announcement on `observer` as the subscription
/// barrier.
async fn join_and_sync(joiner: &mut Client, observer: &mut Client, chat_id: &str, user_id: &str) {
    send(joiner, &ClientFrame::join_room(chat_id)).await;
    wait_for(observer, |f| {
        matches!(
            f,
            ServerFrame::MessageSeen { user_id: reader, message_id: None, .. } if reader == user_id
        )
    })
    .await;
}

#[tokio::test]
async fn test_live_message_delivery() {
    let (addr, store, chat_id) = start_server(Config::default()).await;

    let mut alice = connect(addr, "alice").await;
    send(&mut alice, &ClientFrame::join_room(&chat_id)).await;
    send(&mut alice, &ClientFrame::send_message(&chat_id, "hello")).await;

    // The sender's own connection receives the broadcast too.
    let echo = wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::ReceiveMessage(m) if m.content == "hello")
    })
    .await;
    match echo {
        ServerFrame::ReceiveMessage(m) => {
            assert_eq!(m.sender.name, "Alice");
            assert!(!m.is_read);
        }
        _ => unreachable!(),
    }

    // Bob joins; the pending-unread flush doubles as the barrier.
    let mut bob = connect(addr, "bob").await;
    join_and_sync(&mut bob, &mut alice, &chat_id, "bob").await;

    send(&mut alice, &ClientFrame::send_message(&chat_id, "hello again")).await;
    let received = wait_for(&mut bob, |f| {
        matches!(f, ServerFrame::ReceiveMessage(m) if m.content == "hello again")
    })
    .await;

    let created_at = match received {
        ServerFrame::ReceiveMessage(m) => {
            assert_eq!(m.sender.name, "Alice");
            assert_eq!(m.chat, chat_id);
            assert!(!m.is_read);
            m.created_at
        }
        _ => unreachable!(),
    };

    let chat = store.get_chat(&chat_id).await.unwrap();
    assert_eq!(chat.last_message_at, created_at);
}

#[tokio::test]
async fn test_unauthorized_join_gets_explicit_error() {
    let (addr, _store, chat_id) = start_server(Config::default()).await;

    let mut carol = connect(addr, "carol").await;
    send(&mut carol, &ClientFrame::join_room(&chat_id)).await;

    let error = wait_for(&mut carol, |f| matches!(f, ServerFrame::Error { .. })).await;
    match error {
        ServerFrame::Error { message } => {
            assert_eq!(message, "Not a participant of this chat");
        }
        _ => unreachable!(),
    }

    // Sending into the chat is also rejected, without revealing it.
    send(&mut carol, &ClientFrame::send_message(&chat_id, "hi")).await;
    let error = wait_for(&mut carol, |f| matches!(f, ServerFrame::Error { .. })).await;
    match error {
        ServerFrame::Error { message } => assert_eq!(message, "Chat not found"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_empty_message_rejected() {
    let (addr, store, chat_id) = start_server(Config::default()).await;

    let mut alice = connect(addr, "alice").await;
    send(&mut alice, &ClientFrame::join_room(&chat_id)).await;
    send(&mut alice, &ClientFrame::send_message(&chat_id, "   \t ")).await;

    let error = wait_for(&mut alice, |f| matches!(f, ServerFrame::Error { .. })).await;
    match error {
        ServerFrame::Error { message } => {
            assert_eq!(message, "Message content cannot be empty");
        }
        _ => unreachable!(),
    }

    assert!(store.messages_in_chat(&chat_id).is_empty());
}

#[tokio::test]
async fn test_join_flushes_pending_unread_as_one_batch() {
    let (addr, store, chat_id) = start_server(Config::default()).await;

    let mut alice = connect(addr, "alice").await;
    send(&mut alice, &ClientFrame::join_room(&chat_id)).await;
    send(&mut alice, &ClientFrame::send_message(&chat_id, "one")).await;
    send(&mut alice, &ClientFrame::send_message(&chat_id, "two")).await;
    wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::ReceiveMessage(m) if m.content == "two")
    })
    .await;

    let mut bob = connect(addr, "bob").await;
    send(&mut bob, &ClientFrame::join_room(&chat_id)).await;

    let seen = wait_for(&mut alice, |f| matches!(f, ServerFrame::MessageSeen { .. })).await;
    match seen {
        ServerFrame::MessageSeen {
            user_id,
            message_id,
            ..
        } => {
            assert_eq!(user_id, "bob");
            assert!(message_id.is_none());
        }
        _ => unreachable!(),
    }

    // One announcement for the batch, not one per message.
    assert_silent(&mut alice, Duration::from_millis(300), |f| {
        matches!(f, ServerFrame::MessageSeen { .. })
    })
    .await;

    for message in store.messages_in_chat(&chat_id) {
        assert!(message.is_read);
        assert!(message.read_at.is_some());
    }
}

#[tokio::test]
async fn test_typing_relay_excludes_sender_and_gates_storms() {
    let (addr, _store, chat_id) = start_server(Config::default()).await;

    let mut alice = connect(addr, "alice").await;
    send(&mut alice, &ClientFrame::join_room(&chat_id)).await;
    send(&mut alice, &ClientFrame::send_message(&chat_id, "ping")).await;

    let mut bob = connect(addr, "bob").await;
    join_and_sync(&mut bob, &mut alice, &chat_id, "bob").await;

    send(&mut alice, &ClientFrame::typing(&chat_id)).await;
    let typing = wait_for(&mut bob, |f| matches!(f, ServerFrame::Typing { .. })).await;
    match typing {
        ServerFrame::Typing {
            user_id, user_name, ..
        } => {
            assert_eq!(user_id, "alice");
            assert_eq!(user_name, "Alice");
        }
        _ => unreachable!(),
    }

    // The sender never hears their own relay.
    assert_silent(&mut alice, Duration::from_millis(200), |f| {
        matches!(f, ServerFrame::Typing { .. })
    })
    .await;

    // A second relay inside the gate window is dropped.
    send(&mut alice, &ClientFrame::typing(&chat_id)).await;
    assert_silent(&mut bob, Duration::from_millis(200), |f| {
        matches!(f, ServerFrame::Typing { .. })
    })
    .await;

    // stop_typing always goes through.
    send(&mut alice, &ClientFrame::stop_typing(&chat_id)).await;
    let stopped = wait_for(&mut bob, |f| matches!(f, ServerFrame::StopTyping { .. })).await;
    match stopped {
        ServerFrame::StopTyping { user_id, .. } => assert_eq!(user_id, "alice"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_presence_transitions_reach_chat_peers() {
    let (addr, store, _chat_id) = start_server(Config::default()).await;

    let mut alice = connect(addr, "alice").await;

    let mut bob = connect(addr, "bob").await;
    let online = wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::UserOnline(p) if p.user_id == "bob")
    })
    .await;
    let online_seen = match online {
        ServerFrame::UserOnline(p) => {
            assert!(p.is_online);
            p.last_seen
        }
        _ => unreachable!(),
    };

    bob.close(None).await.unwrap();

    let offline = wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::UserOffline(p) if p.user_id == "bob")
    })
    .await;
    match offline {
        ServerFrame::UserOffline(p) => {
            assert!(!p.is_online);
            assert!(p.last_seen >= online_seen);
        }
        _ => unreachable!(),
    }

    let bob_record = store.get_user("bob").await.unwrap();
    assert!(!bob_record.is_online);
}

#[tokio::test]
async fn test_mark_seen_announced_and_first_write_wins() {
    let (addr, store, chat_id) = start_server(Config::default()).await;

    let mut alice = connect(addr, "alice").await;
    send(&mut alice, &ClientFrame::join_room(&chat_id)).await;
    send(&mut alice, &ClientFrame::send_message(&chat_id, "read me")).await;
    let message_id = match wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::ReceiveMessage(_))
    })
    .await
    {
        ServerFrame::ReceiveMessage(m) => m.id,
        _ => unreachable!(),
    };

    // Bob marks it seen without even opening the room.
    let mut bob = connect(addr, "bob").await;
    send(&mut bob, &ClientFrame::message_seen(&chat_id, &message_id)).await;

    let seen = wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::MessageSeen { message_id: Some(_), .. })
    })
    .await;
    match seen {
        ServerFrame::MessageSeen {
            user_id,
            message_id: seen_id,
            ..
        } => {
            assert_eq!(user_id, "bob");
            assert_eq!(seen_id.as_deref(), Some(message_id.as_str()));
        }
        _ => unreachable!(),
    }

    let first_read_at = store.get_message(&message_id).await.unwrap().read_at;
    assert!(first_read_at.is_some());

    // A repeat call re-announces but does not move read_at.
    send(&mut bob, &ClientFrame::message_seen(&chat_id, &message_id)).await;
    wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::MessageSeen { message_id: Some(_), .. })
    })
    .await;

    let second_read_at = store.get_message(&message_id).await.unwrap().read_at;
    assert_eq!(second_read_at, first_read_at);
}

#[tokio::test]
async fn test_invalid_token_rejected_at_upgrade() {
    let (addr, _store, _chat_id) = start_server(Config::default()).await;

    let url = format!("ws://{addr}/ws?token=ghost");
    assert!(connect_async(url).await.is_err());

    let url = format!("ws://{addr}/ws");
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn test_malformed_frame_gets_error_not_disconnect() {
    let (addr, _store, chat_id) = start_server(Config::default()).await;

    let mut alice = connect(addr, "alice").await;
    alice
        .send(Message::Text("this is not json".to_string()))
        .await
        .unwrap();

    let error = wait_for(&mut alice, |f| matches!(f, ServerFrame::Error { .. })).await;
    match error {
        ServerFrame::Error { message } => assert_eq!(message, "Malformed event"),
        _ => unreachable!(),
    }

    // The connection survived the bad frame.
    send(&mut alice, &ClientFrame::join_room(&chat_id)).await;
    send(&mut alice, &ClientFrame::send_message(&chat_id, "still here")).await;
    wait_for(&mut alice, |f| {
        matches!(f, ServerFrame::ReceiveMessage(m) if m.content == "still here")
    })
    .await;
}
