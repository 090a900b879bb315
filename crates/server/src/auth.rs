use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;

use flotilla::{LobbyRequest, UserRequest, bearer_token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    Missing,
    WrongPassword,
}

#[derive(Debug)]
struct Lobby {
    password: Option<String>,
    members: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    users: HashMap<String, String>,
    tokens: HashMap<String, String>,
    lobbies: HashMap<String, Lobby>,
}

/// In-memory users, issued bearer tokens and lobbies.
#[derive(Debug, Default)]
pub struct AuthStore {
    state: Mutex<StoreState>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_user(&self, username: &str, password: &str) -> bool {
        let mut state = self.state.lock();
        if state.users.contains_key(username) {
            return false;
        }
        state.users.insert(username.to_string(), password.to_string());
        true
    }

    /// Issues a fresh token when the password matches.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        let mut state = self.state.lock();
        if state.users.get(username).map(String::as_str) != Some(password) {
            return None;
        }
        let token = format!("{:032x}", rand::random::<u128>());
        state.tokens.insert(token.clone(), username.to_string());
        Some(token)
    }

    pub fn user_for_token(&self, token: &str) -> Option<String> {
        self.state.lock().tokens.get(token).cloned()
    }

    pub fn create_lobby(&self, name: &str, password: Option<&str>, owner: &str) -> bool {
        let mut state = self.state.lock();
        if state.lobbies.contains_key(name) {
            return false;
        }
        state.lobbies.insert(
            name.to_string(),
            Lobby {
                password: password.map(str::to_string),
                members: vec![owner.to_string()],
            },
        );
        true
    }

    pub fn join_lobby(&self, name: &str, password: Option<&str>, user: &str) -> Result<(), JoinError> {
        let mut state = self.state.lock();
        let lobby = state.lobbies.get_mut(name).ok_or(JoinError::Missing)?;
        if lobby.password.is_some() && lobby.password.as_deref() != password {
            return Err(JoinError::WrongPassword);
        }
        if !lobby.members.iter().any(|m| m == user) {
            lobby.members.push(user.to_string());
        }
        Ok(())
    }

    pub fn lobby_members(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .lobbies
            .get(name)
            .map(|l| l.members.clone())
            .unwrap_or_default()
    }
}

pub fn router(store: Arc<AuthStore>) -> Router {
    Router::new()
        .route("/user", post(create_user))
        .route("/authenticate", get(authenticate))
        .route("/lobbys", post(create_lobby).put(join_lobby))
        .with_state(store)
}

fn message(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "message": message }))).into_response()
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Option<T> {
    serde_json::from_slice(body).ok()
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()
}

async fn create_user(State(store): State<Arc<AuthStore>>, body: Bytes) -> Response {
    let user = parse_json::<UserRequest>(&body)
        .filter(|u| !u.username.is_empty() && !u.password.is_empty());
    let Some(user) = user else {
        return message(StatusCode::BAD_REQUEST, "username and password is required!");
    };
    if store.create_user(&user.username, &user.password) {
        log::info!("Created user {}", user.username);
        message(StatusCode::OK, "Successfully created user!")
    } else {
        message(StatusCode::CONFLICT, "User already exists!")
    }
}

async fn authenticate(State(store): State<Arc<AuthStore>>, headers: HeaderMap) -> Response {
    let credentials = authorization(&headers)
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
        .and_then(|raw| String::from_utf8(raw).ok());
    let Some(credentials) = credentials else {
        return message(StatusCode::BAD_REQUEST, "Authorization header required!");
    };
    let Some((username, password)) = credentials.split_once(':') else {
        return message(StatusCode::BAD_REQUEST, "Malformed basic credentials");
    };

    match store.authenticate(username, password) {
        Some(token) => (
            [(header::AUTHORIZATION, format!("Bearer {}", token))],
            message(StatusCode::OK, "Authentication was successful!"),
        )
            .into_response(),
        None => message(StatusCode::BAD_REQUEST, "Wrong username or password"),
    }
}

/// Resolves the caller and the lobby body shared by create and join.
fn lobby_request(
    store: &AuthStore,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(String, LobbyRequest), Response> {
    let user = authorization(headers)
        .and_then(bearer_token)
        .and_then(|t| store.user_for_token(t))
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Invalid bearer token"))?;
    let lobby = parse_json::<LobbyRequest>(body)
        .filter(|l| !l.lobby_name.is_empty())
        .ok_or_else(|| message(StatusCode::BAD_REQUEST, "Lobby name is required!"))?;
    Ok((user, lobby))
}

async fn create_lobby(
    State(store): State<Arc<AuthStore>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (user, lobby) = match lobby_request(&store, &headers, &body) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    if store.create_lobby(&lobby.lobby_name, lobby.lobby_password.as_deref(), &user) {
        log::info!("{} created lobby {}", user, lobby.lobby_name);
        message(StatusCode::OK, "Successfully created Lobby!")
    } else {
        message(StatusCode::CONFLICT, "Lobby already exists!")
    }
}

async fn join_lobby(
    State(store): State<Arc<AuthStore>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (user, lobby) = match lobby_request(&store, &headers, &body) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    match store.join_lobby(&lobby.lobby_name, lobby.lobby_password.as_deref(), &user) {
        Ok(()) => {
            log::info!("{} joined lobby {}", user, lobby.lobby_name);
            message(StatusCode::OK, "Successfully Joined Lobby!")
        }
        Err(JoinError::Missing) => message(StatusCode::BAD_REQUEST, "Lobby doesn't exist!"),
        Err(JoinError::WrongPassword) => message(StatusCode::FORBIDDEN, "Wrong lobby password"),
    }
}

/// Stops a running [`AuthProxy`] from another thread.
#[derive(Debug, Clone)]
pub struct ProxyShutdown(Arc<Notify>);

impl ProxyShutdown {
    pub fn shutdown(&self) {
        self.0.notify_one();
    }
}

/// HTTP listener for the auth endpoints, served by axum on its own
/// single-threaded runtime.
pub struct AuthProxy {
    listener: TcpListener,
    store: Arc<AuthStore>,
    shutdown: Arc<Notify>,
}

impl AuthProxy {
    pub fn bind(addr: &str, store: Arc<AuthStore>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            store,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ProxyShutdown {
        ProxyShutdown(Arc::clone(&self.shutdown))
    }

    /// Serves until [`ProxyShutdown::shutdown`] is called.
    pub fn run(self) -> io::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let Self {
            listener,
            store,
            shutdown,
        } = self;

        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            axum::serve(listener, router(store))
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await
        })?;
        log::debug!("Auth proxy stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla::{AuthError, AuthService, HttpAuthClient, LobbyStatus};
    use std::thread;

    struct Proxy {
        port: u16,
        store: Arc<AuthStore>,
        shutdown: ProxyShutdown,
        thread: Option<thread::JoinHandle<io::Result<()>>>,
    }

    impl Proxy {
        fn start() -> Proxy {
            let store = Arc::new(AuthStore::new());
            let proxy = AuthProxy::bind("127.0.0.1:0", Arc::clone(&store)).unwrap();
            let port = proxy.local_addr().unwrap().port();
            let shutdown = proxy.shutdown_handle();
            Proxy {
                port,
                store,
                shutdown,
                thread: Some(thread::spawn(move || proxy.run())),
            }
        }

        fn client(&self) -> HttpAuthClient {
            HttpAuthClient::new("127.0.0.1", self.port).unwrap()
        }

        fn url(&self, path: &str) -> String {
            format!("http://127.0.0.1:{}{}", self.port, path)
        }
    }

    impl Drop for Proxy {
        fn drop(&mut self) {
            self.shutdown.shutdown();
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }
    }

    #[test]
    fn test_store_lobby_membership() {
        let store = AuthStore::new();
        assert!(store.create_lobby("main", Some("secret"), "alice"));
        assert!(!store.create_lobby("main", None, "bob"));
        assert_eq!(store.join_lobby("main", None, "bob"), Err(JoinError::WrongPassword));
        assert_eq!(store.join_lobby("other", None, "bob"), Err(JoinError::Missing));
        store.join_lobby("main", Some("secret"), "bob").unwrap();
        store.join_lobby("main", Some("secret"), "bob").unwrap();
        assert_eq!(store.lobby_members("main"), vec!["alice", "bob"]);
    }

    #[test]
    fn test_user_creation_conflicts_on_second_try() {
        let proxy = Proxy::start();
        let client = proxy.client();
        client.create_user("alice", "pw").unwrap();
        assert!(matches!(
            client.create_user("alice", "pw"),
            Err(AuthError::Status { status: 409, .. })
        ));
        assert!(matches!(
            client.create_user("", "pw"),
            Err(AuthError::Status { status: 400, .. })
        ));
    }

    #[test]
    fn test_authenticate_issues_bearer_header() {
        let proxy = Proxy::start();
        let client = proxy.client();
        client.create_user("alice", "pw").unwrap();

        let token = client.authenticate("alice", "pw").unwrap();
        assert_eq!(proxy.store.user_for_token(&token).as_deref(), Some("alice"));
        assert!(matches!(
            client.authenticate("alice", "nope"),
            Err(AuthError::Status { status: 400, .. })
        ));

        let missing = reqwest::blocking::get(proxy.url("/authenticate")).unwrap();
        assert_eq!(missing.status().as_u16(), 400);
    }

    #[test]
    fn test_lobby_create_and_join() {
        let proxy = Proxy::start();
        let client = proxy.client();
        client.create_user("alice", "pw").unwrap();
        let token = client.authenticate("alice", "pw").unwrap();

        let open = |name: &str, password: Option<&str>, create: bool| {
            client.open_lobby(name, password, &token, create).unwrap()
        };
        assert_eq!(open("main", Some("secret"), true), LobbyStatus::Connected);
        // 409 on a second create still counts as connected.
        assert_eq!(open("main", Some("secret"), true), LobbyStatus::Connected);
        assert_eq!(open("main", Some("secret"), false), LobbyStatus::Connected);
        assert_eq!(open("main", Some("nope"), false), LobbyStatus::Refused);
        assert_eq!(open("other", None, false), LobbyStatus::NotFound);
        assert_eq!(proxy.store.lobby_members("main"), vec!["alice"]);
    }

    #[test]
    fn test_lobby_requires_valid_token() {
        let proxy = Proxy::start();
        let http = reqwest::blocking::Client::new();

        let forged = http
            .post(proxy.url("/lobbys"))
            .bearer_auth("forged")
            .body(r#"{"lobbyName":"main"}"#)
            .send()
            .unwrap();
        assert_eq!(forged.status().as_u16(), 401);

        let unknown = http.get(proxy.url("/nowhere")).send().unwrap();
        assert_eq!(unknown.status().as_u16(), 404);
    }
}
