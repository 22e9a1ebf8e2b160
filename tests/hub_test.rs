//! End-to-end tests over real TCP sockets

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use poll_hub::auth::JwtAuthenticator;
use poll_hub::config::{HubSettings, ServerSettings};
use poll_hub::server::UpdateType;
use poll_hub::{HubServer, Registry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const SECRET: &[u8] = b"integration-secret";
const ALICE: &str = "65f1c0ffee0000000000a001";
const BOB: &str = "65f1c0ffee0000000000b002";
const CAROL: &str = "65f1c0ffee0000000000c003";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    server: Arc<HubServer>,
    registry: Arc<Registry>,
    authenticator: JwtAuthenticator,
    addr: String,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestHub {
    async fn start() -> Self {
        Self::start_with(HubSettings {
            write_timeout_secs: 2,
            ..HubSettings::default()
        })
        .await
    }

    async fn start_with(hub: HubSettings) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let registry = Arc::new(Registry::new());
        let server = Arc::new(HubServer::new(
            ServerSettings::default(),
            hub,
            Arc::clone(&registry),
            Arc::new(JwtAuthenticator::new(SECRET)),
        ));

        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        Self {
            server,
            registry,
            authenticator: JwtAuthenticator::new(SECRET),
            addr,
            handle,
        }
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }

    async fn connect(&self, user_id: &str) -> Client {
        let token = self
            .authenticator
            .issue(user_id, Duration::from_secs(60))
            .unwrap();
        let (client, _) = connect_async(self.url(&format!("/api/ws?token={}", token)))
            .await
            .unwrap();
        client
    }

    async fn wait_for_room(&self, room: &str, size: usize) {
        for _ in 0..200 {
            if self.registry.room_size(room).await == size {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room {room} never reached {size} members");
    }

    async fn wait_for_connections(&self, count: usize) {
        for _ in 0..200 {
            if self.registry.connection_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never reached {count} connections");
    }
}

async fn send_control(client: &mut Client, kind: &str, group_id: &str) {
    let message = serde_json::json!({ "type": kind, "group_id": group_id });
    client
        .send(Message::Text(message.to_string()))
        .await
        .unwrap();
}

async fn next_json(client: &mut Client) -> serde_json::Value {
    loop {
        match timeout(Duration::from_secs(2), client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).unwrap(),
            Ok(Some(Ok(_))) => continue,
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let next = timeout(Duration::from_millis(200), client.next()).await;
    assert!(next.is_err(), "unexpected frame: {:?}", next);
}

type Handshake = Result<(Client, tungstenite::handshake::client::Response), tungstenite::Error>;

fn rejection_status(result: Handshake) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("expected HTTP rejection, got {}", e),
        Ok(_) => panic!("expected HTTP rejection, upgrade succeeded"),
    }
}

#[tokio::test]
async fn test_group_members_receive_notifications() {
    let hub = TestHub::start().await;
    let mut alice = hub.connect(ALICE).await;
    let mut bob = hub.connect(BOB).await;
    let mut carol = hub.connect(CAROL).await;

    send_control(&mut alice, "join_group", "g1").await;
    send_control(&mut bob, "join_group", "g1").await;
    send_control(&mut carol, "join_group", "g2").await;
    hub.wait_for_room("g1", 2).await;
    hub.wait_for_room("g2", 1).await;

    hub.server.notifier().vote_update("g1", "p7").await;

    let expected = serde_json::json!({
        "type": "vote_update",
        "data": { "group_id": "g1", "poll_id": "p7" }
    });
    assert_eq!(next_json(&mut alice).await, expected);
    assert_eq!(next_json(&mut bob).await, expected);
    assert_silent(&mut carol).await;
}

#[tokio::test]
async fn test_update_type_is_carried() {
    let hub = TestHub::start().await;
    let mut alice = hub.connect(ALICE).await;

    send_control(&mut alice, "join_group", "g1").await;
    hub.wait_for_room("g1", 1).await;

    let notifier = hub.server.notifier();
    notifier.poll_update("g1", "p1", UpdateType::Created).await;
    notifier.comment_update("g1", "p1", UpdateType::Deleted).await;

    let poll = next_json(&mut alice).await;
    assert_eq!(poll["type"], "poll_update");
    assert_eq!(poll["data"]["type"], "created");

    let comment = next_json(&mut alice).await;
    assert_eq!(comment["type"], "comment_update");
    assert_eq!(comment["data"]["type"], "deleted");
}

#[tokio::test]
async fn test_leave_group_stops_delivery() {
    let hub = TestHub::start().await;
    let mut alice = hub.connect(ALICE).await;

    send_control(&mut alice, "join_group", "g1").await;
    hub.wait_for_room("g1", 1).await;
    send_control(&mut alice, "leave_group", "g1").await;
    hub.wait_for_room("g1", 0).await;

    hub.server.notifier().vote_update("g1", "p1").await;
    assert_silent(&mut alice).await;
    assert_eq!(hub.registry.connection_count().await, 1);
}

#[tokio::test]
async fn test_admitted_without_rooms() {
    let hub = TestHub::start().await;
    let _alice = hub.connect(ALICE).await;

    hub.wait_for_connections(1).await;
    assert_eq!(hub.registry.room_count().await, 0);
}

#[tokio::test]
async fn test_disconnect_cleans_up() {
    let hub = TestHub::start().await;
    let mut alice = hub.connect(ALICE).await;

    send_control(&mut alice, "join_group", "g1").await;
    hub.wait_for_room("g1", 1).await;

    alice.close(None).await.unwrap();
    hub.wait_for_connections(0).await;
    assert_eq!(hub.registry.room_count().await, 0);
}

#[tokio::test]
async fn test_missing_or_invalid_token_rejected() {
    let hub = TestHub::start().await;

    assert_eq!(rejection_status(connect_async(hub.url("/api/ws")).await), 401);
    assert_eq!(
        rejection_status(connect_async(hub.url("/api/ws?token=not-a-jwt")).await),
        401
    );

    let forged = JwtAuthenticator::new(b"some-other-secret")
        .issue(ALICE, Duration::from_secs(60))
        .unwrap();
    assert_eq!(
        rejection_status(connect_async(hub.url(&format!("/api/ws?token={}", forged))).await),
        401
    );
    assert_eq!(hub.registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_percent_encoded_token_accepted() {
    let hub = TestHub::start().await;
    let token = hub
        .authenticator
        .issue(ALICE, Duration::from_secs(60))
        .unwrap()
        .replace('.', "%2E");

    let (_client, _) = connect_async(hub.url(&format!("/api/ws?token={}", token)))
        .await
        .unwrap();
    hub.wait_for_connections(1).await;
}

#[tokio::test]
async fn test_stalled_handshake_is_dropped() {
    let hub = TestHub::start_with(HubSettings {
        handshake_timeout_secs: 1,
        write_timeout_secs: 1,
        ..HubSettings::default()
    })
    .await;

    let mut socket = TcpStream::connect(&hub.addr).await.unwrap();
    socket.write_all(b"GET /api/ws HTTP/1.1\r\n").await.unwrap();

    // The server gives up on the request and closes the socket
    let mut buf = [0u8; 64];
    let read = timeout(Duration::from_secs(4), socket.read(&mut buf))
        .await
        .expect("socket still open after handshake timeout");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected read {:?}", read);
    assert_eq!(hub.registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_bad_user_id_rejected() {
    let hub = TestHub::start().await;
    let token = hub
        .authenticator
        .sign(&poll_hub::auth::Claims {
            user_id: "not-an-object-id".to_string(),
            exp: jsonwebtoken::get_current_timestamp() + 60,
        })
        .unwrap();

    assert_eq!(
        rejection_status(connect_async(hub.url(&format!("/api/ws?token={}", token))).await),
        400
    );
}

#[tokio::test]
async fn test_wrong_path_rejected() {
    let hub = TestHub::start().await;
    let token = hub
        .authenticator
        .issue(ALICE, Duration::from_secs(60))
        .unwrap();

    assert_eq!(
        rejection_status(connect_async(hub.url(&format!("/ws?token={}", token))).await),
        404
    );
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let hub = TestHub::start().await;
    let mut alice = hub.connect(ALICE).await;
    hub.wait_for_connections(1).await;

    hub.server.shutdown();

    loop {
        match timeout(Duration::from_secs(2), alice.next()).await.unwrap() {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("expected close frame, got {}", e),
        }
    }

    timeout(Duration::from_secs(5), hub.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(hub.registry.connection_count().await, 0);
}
