//! End-to-end tests against an in-process chat backend
//!
//! The backend speaks the same REST and WebSocket protocol as the real
//! server: bearer-token auth, `/api/chats/{user_id}`, and a socket at
//! `/ws/{user_id}` that broadcasts `new_message` envelopes to every
//! participant of the chat (sender included).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use chatline_core::sync::{ConnectRequest, Connector, ConnectionPolicy, WsConnector};
use chatline_core::{
    ApiClient, ApiError, ChatClient, ClientError, ClientEvent, ConnectionOptions,
    ConnectionStatus, DeliveryStatus, Session, Subscription, User,
};

const WAIT: Duration = Duration::from_secs(5);

// ==================== Fake backend ====================

#[derive(Clone)]
struct Backend(Arc<Inner>);

struct Inner {
    users: Mutex<Vec<(User, String)>>,
    messages: Mutex<Vec<Value>>,
    sockets: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
    revoked: AtomicBool,
    echo_client_id: bool,
}

fn user(id: &str, name: &str, email: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        avatar: String::new(),
        is_online: false,
    }
}

impl Backend {
    fn new(echo_client_id: bool) -> Self {
        let seeded = vec![
            json!({
                "id": "1",
                "chat_id": "chat1",
                "sender_id": "user2",
                "sender_name": "Bob Smith",
                "text": "Hey Alice!",
                "timestamp": "2024-05-01T10:00:00",
                "message_type": "text"
            }),
            json!({
                "id": "2",
                "chat_id": "chat1",
                "sender_id": "user1",
                "sender_name": "Alice Johnson",
                "text": "Hi Bob",
                "timestamp": "2024-05-01T10:01:00",
                "message_type": "text"
            }),
        ];

        Backend(Arc::new(Inner {
            users: Mutex::new(vec![
                (user("user1", "Alice Johnson", "alice@example.com"), "password".into()),
                (user("user2", "Bob Smith", "bob@example.com"), "password".into()),
            ]),
            messages: Mutex::new(seeded),
            sockets: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(100),
            revoked: AtomicBool::new(false),
            echo_client_id,
        }))
    }

    fn revoke_tokens(&self) {
        self.0.revoked.store(true, Ordering::SeqCst);
    }

    /// The user id a bearer token belongs to, if the token is valid
    fn authorize(&self, headers: &HeaderMap) -> Option<String> {
        if self.0.revoked.load(Ordering::SeqCst) {
            return None;
        }
        headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer token-")
            .map(str::to_string)
    }

    fn find_user(&self, id: &str) -> Option<User> {
        let users = self.0.users.lock().unwrap();
        users.iter().find(|(u, _)| u.id == id).map(|(u, _)| u.clone())
    }

    fn is_online(&self, user_id: &str) -> bool {
        self.0.sockets.lock().unwrap().contains_key(user_id)
    }

    async fn wait_online(&self, user_id: &str) {
        timeout(WAIT, async {
            while !self.is_online(user_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("socket never registered");
    }

    fn broadcast(&self, recipients: &[&str], envelope: &Value) {
        let sockets = self.0.sockets.lock().unwrap();
        for id in recipients {
            if let Some(tx) = sockets.get(*id) {
                let _ = tx.send(envelope.to_string());
            }
        }
    }

    fn handle_frame(&self, sender: &User, text: &str) {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let chat_id = frame["chat_id"].as_str().unwrap_or_default().to_string();

        match frame["type"].as_str() {
            Some("message") => {
                let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
                let mut message = json!({
                    "id": id.to_string(),
                    "chat_id": chat_id,
                    "sender_id": sender.id,
                    "sender_name": sender.name,
                    "text": frame["text"],
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "message_type": "text"
                });
                if self.0.echo_client_id && !frame["client_id"].is_null() {
                    message["client_id"] = frame["client_id"].clone();
                }
                self.0.messages.lock().unwrap().push(message.clone());
                self.broadcast(
                    &["user1", "user2"],
                    &json!({"type": "new_message", "message": message}),
                );
            }
            Some("typing") => {
                let other = if sender.id == "user1" { "user2" } else { "user1" };
                self.broadcast(
                    &[other],
                    &json!({
                        "type": "typing",
                        "chat_id": chat_id,
                        "user_id": sender.id,
                        "user_name": sender.name,
                        "is_typing": frame["is_typing"]
                    }),
                );
            }
            _ => {}
        }
    }
}

async fn login(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let users = backend.0.users.lock().unwrap();
    let found = users
        .iter()
        .find(|(u, pw)| u.email == body["email"] && *pw == body["password"]);
    match found {
        Some((user, _)) => Json(json!({
            "user": user,
            "token": format!("token-{}", user.id)
        }))
        .into_response(),
        None => (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Invalid credentials"})))
            .into_response(),
    }
}

async fn signup(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    let mut users = backend.0.users.lock().unwrap();
    let email = body["email"].as_str().unwrap_or_default();
    if users.iter().any(|(u, _)| u.email == email) {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "User exists"}))).into_response();
    }

    let created = user(
        &format!("user{}", users.len() + 1),
        body["name"].as_str().unwrap_or_default(),
        email,
    );
    let password = body["password"].as_str().unwrap_or_default().to_string();
    users.push((created.clone(), password));
    Json(json!({"user": created, "token": format!("token-{}", created.id)})).into_response()
}

async fn chats(
    State(backend): State<Backend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if backend.authorize(&headers).as_deref() != Some(user_id.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let last = backend.0.messages.lock().unwrap().last().cloned();
    let name = if user_id == "user1" { "Bob Smith" } else { "Alice Johnson" };
    Json(json!([{
        "id": "chat1",
        "name": name,
        "type": "private",
        "participants": ["user1", "user2"],
        "last_message": last,
        "created_at": "2024-05-01T09:00:00"
    }]))
    .into_response()
}

async fn messages(
    State(backend): State<Backend>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if backend.authorize(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let messages: Vec<Value> = backend
        .0
        .messages
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m["chat_id"] == chat_id.as_str())
        .cloned()
        .collect();
    Json(messages).into_response()
}

async fn users(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    if backend.authorize(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let users: Vec<User> = backend
        .0
        .users
        .lock()
        .unwrap()
        .iter()
        .map(|(u, _)| u.clone())
        .collect();
    Json(users).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(backend): State<Backend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if backend.authorize(&headers).as_deref() != Some(user_id.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(user) = backend.find_user(&user_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, backend, user))
}

async fn handle_socket(socket: WebSocket, backend: Backend, user: User) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    backend.0.sockets.lock().unwrap().insert(user.id.clone(), tx);

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            WsMessage::Text(text) => backend.handle_frame(&user, text.as_str()),
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    backend.0.sockets.lock().unwrap().remove(&user.id);
    writer.abort();
}

/// Serve the backend on an ephemeral port; returns (backend, http base, ws base)
async fn spawn_backend(echo_client_id: bool) -> (Backend, String, String) {
    let backend = Backend::new(echo_client_id);
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/signup", post(signup))
        .route("/api/chats/{id}", get(chats))
        .route("/api/chats/{id}/messages", get(messages))
        .route("/api/users", get(users))
        .route("/ws/{user_id}", get(ws_handler))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, format!("http://{}", addr), format!("ws://{}", addr))
}

// ==================== Helpers ====================

fn client(api_url: &str, ws_url: &str) -> ChatClient {
    ChatClient::with_parts(
        ApiClient::new(api_url),
        WsConnector,
        ConnectionOptions {
            ws_url: ws_url.to_string(),
            policy: ConnectionPolicy {
                base_delay: Duration::from_millis(50),
                max_attempts: 3,
                queue_capacity: 16,
            },
            ping_interval: None,
        },
    )
}

async fn wait_connected(client: &ChatClient) {
    let mut status = client.subscribe_status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .expect("timed out waiting for connection")
        .expect("status channel closed");
}

async fn wait_for_event<T>(
    events: &mut Subscription<ClientEvent>,
    mut pick: impl FnMut(ClientEvent) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if let Some(found) = pick(event) {
                return found;
            }
        }
        panic!("event bus closed");
    })
    .await
    .expect("timed out waiting for event")
}

// ==================== REST ====================

#[tokio::test]
async fn test_login_loads_chats_and_history() {
    let (_backend, api, ws) = spawn_backend(true).await;
    let client = client(&api, &ws);

    let user = client.login("alice@example.com", "password").await.unwrap();
    assert_eq!(user.id, "user1");
    assert_eq!(client.session().unwrap().token, "token-user1");

    let snapshot = client.snapshot();
    assert_eq!(snapshot.conversations.len(), 1);
    assert_eq!(snapshot.conversations[0].name, "Bob Smith");

    client.load_history("chat1").await.unwrap();
    let snapshot = client.snapshot();
    let chat = snapshot.conversation("chat1").unwrap();
    let bodies: Vec<_> = chat.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["Hey Alice!", "Hi Bob"]);
    assert!(chat
        .messages
        .iter()
        .all(|m| m.status == DeliveryStatus::Sent));

    let users = client.users().await.unwrap();
    assert_eq!(users.len(), 2);
}

#[tokio::test]
async fn test_invalid_credentials() {
    let (_backend, api, ws) = spawn_backend(true).await;
    let client = client(&api, &ws);

    let err = client.login("alice@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, ClientError::Api(ApiError::InvalidCredentials)));
    assert!(client.session().is_none());
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_signup() {
    let (_backend, api, ws) = spawn_backend(true).await;
    let client = client(&api, &ws);

    let err = client
        .signup("Alice Again", "alice@example.com", "password")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api(ApiError::UserExists)));

    let user = client
        .signup("Carol White", "carol@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(user.name, "Carol White");
    assert_eq!(client.session().unwrap().user.id, user.id);
}

#[tokio::test]
async fn test_rejected_token_ends_session() {
    let (backend, api, ws) = spawn_backend(true).await;
    let client = client(&api, &ws);
    let mut events = client.subscribe();

    client.login("alice@example.com", "password").await.unwrap();
    backend.revoke_tokens();

    let err = client.refresh().await.unwrap_err();
    assert!(matches!(err, ClientError::Api(ApiError::AuthExpired)));
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::AuthExpired).then_some(())).await;

    assert!(client.session().is_none());
    let mut snapshots = client.subscribe_snapshots();
    timeout(WAIT, snapshots.wait_for(|s| s.conversations.is_empty()))
        .await
        .expect("store was not cleared")
        .unwrap();
}

// ==================== WebSocket ====================

#[tokio::test]
async fn test_socket_requires_bearer_token() {
    let (_backend, _api, ws) = spawn_backend(true).await;

    let refused = WsConnector
        .connect(ConnectRequest {
            url: format!("{}/ws/user1", ws),
            token: "token-user2".to_string(),
        })
        .await;
    assert!(refused.is_err());

    let accepted = WsConnector
        .connect(ConnectRequest {
            url: format!("{}/ws/user1", ws),
            token: "token-user1".to_string(),
        })
        .await;
    assert!(accepted.is_ok());
}

#[tokio::test]
async fn test_socket_rejecting_token_ends_session() {
    let (backend, api, ws) = spawn_backend(true).await;
    let client = client(&api, &ws);
    let mut events = client.subscribe();
    backend.revoke_tokens();

    client.resume(Session {
        user: user("user1", "Alice Johnson", "alice@example.com"),
        token: "token-user1".to_string(),
    });

    let terminal = wait_for_event(&mut events, |e| match e {
        ClientEvent::AuthExpired => Some(Ok(())),
        ClientEvent::ConnectionLost { last_error, .. } => Some(Err(last_error)),
        _ => None,
    })
    .await;
    assert_eq!(terminal, Ok(()));
    assert!(client.session().is_none());
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert!(!backend.is_online("user1"));
}

#[tokio::test]
async fn test_send_is_confirmed_by_client_id_echo() {
    let (_backend, api, ws) = spawn_backend(true).await;
    let client = client(&api, &ws);
    let mut events = client.subscribe();

    client.login("alice@example.com", "password").await.unwrap();
    wait_connected(&client).await;

    let temp_id = client.send_message("chat1", "  over the wire  ").await.unwrap();
    let confirmed = wait_for_event(&mut events, |e| match e {
        ClientEvent::MessageConfirmed { temp_id: id, message } if id == temp_id => Some(message),
        _ => None,
    })
    .await;
    assert_eq!(confirmed.body, "over the wire");
    assert_eq!(confirmed.status, DeliveryStatus::Sent);
    let server_id = confirmed.id.clone().unwrap();

    let mut snapshots = client.subscribe_snapshots();
    let snapshot = timeout(
        WAIT,
        snapshots.wait_for(|s| {
            s.conversation("chat1").is_some_and(|c| {
                c.messages
                    .iter()
                    .any(|m| m.id.as_deref() == Some(server_id.as_str()))
            })
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let chat = snapshot.conversation("chat1").unwrap();
    let copies = chat
        .messages
        .iter()
        .filter(|m| m.body == "over the wire")
        .count();
    assert_eq!(copies, 1);
}

#[tokio::test]
async fn test_send_is_confirmed_without_client_id_echo() {
    let (_backend, api, ws) = spawn_backend(false).await;
    let client = client(&api, &ws);
    let mut events = client.subscribe();

    client.login("alice@example.com", "password").await.unwrap();
    wait_connected(&client).await;

    let temp_id = client.send_message("chat1", "matched by body").await.unwrap();
    let confirmed = wait_for_event(&mut events, |e| match e {
        ClientEvent::MessageConfirmed { temp_id: id, message } if id == temp_id => Some(message),
        ClientEvent::MessageReceived(m) if m.body == "matched by body" => {
            panic!("own echo treated as inbound: {:?}", m)
        }
        _ => None,
    })
    .await;
    assert!(confirmed.id.is_some());
    assert_eq!(confirmed.sender_id, "user1");
}

#[tokio::test]
async fn test_message_and_typing_reach_other_participant() {
    let (backend, api, ws) = spawn_backend(true).await;
    let alice = client(&api, &ws);
    let bob = client(&api, &ws);
    let mut bob_events = bob.subscribe();

    alice.login("alice@example.com", "password").await.unwrap();
    bob.login("bob@example.com", "password").await.unwrap();
    wait_connected(&alice).await;
    wait_connected(&bob).await;
    backend.wait_online("user1").await;
    backend.wait_online("user2").await;

    alice.send_typing("chat1", true).unwrap();
    let typing = wait_for_event(&mut bob_events, |e| match e {
        ClientEvent::Typing(t) => Some(t),
        _ => None,
    })
    .await;
    assert_eq!(typing.user_id, "user1");
    assert!(typing.is_typing);

    alice.send_message("chat1", "ping from alice").await.unwrap();
    let received = wait_for_event(&mut bob_events, |e| match e {
        ClientEvent::MessageReceived(m) => Some(m),
        _ => None,
    })
    .await;
    assert_eq!(received.body, "ping from alice");
    assert_eq!(received.sender_id, "user1");
    assert_eq!(received.chat_id, "chat1");
}

#[tokio::test]
async fn test_logout_closes_socket() {
    let (backend, api, ws) = spawn_backend(true).await;
    let client = client(&api, &ws);

    client.login("alice@example.com", "password").await.unwrap();
    wait_connected(&client).await;
    backend.wait_online("user1").await;

    client.logout();
    let mut status = client.subscribe_status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Disconnected))
        .await
        .unwrap()
        .unwrap();

    timeout(WAIT, async {
        while backend.is_online("user1") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server still sees the socket");
}
