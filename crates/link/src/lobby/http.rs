use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, Response};
use reqwest::header::AUTHORIZATION;

use super::{AuthError, AuthService, LobbyRequest, LobbyStatus, UserRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Strips the `Bearer ` scheme from an `Authorization` value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Blocking client for the auth proxy.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    base_url: String,
    http: Client,
}

impl HttpAuthClient {
    pub fn new(host: &str, port: u16) -> Result<Self, AuthError> {
        Self::with_timeout(host, port, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn logged(method: &str, path: &str, response: Response) -> Response {
    log::debug!("{} {} -> {}", method, path, response.status().as_u16());
    response
}

impl AuthService for HttpAuthClient {
    fn create_user(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.url("/user"))
            .json(&UserRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()?;
        let response = logged("POST", "/user", response);
        match response.status().as_u16() {
            200 => Ok(()),
            status => Err(AuthError::Status {
                endpoint: "POST /user",
                status,
            }),
        }
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .get(self.url("/authenticate"))
            .basic_auth(username, Some(password))
            .send()?;
        let response = logged("GET", "/authenticate", response);
        let status = response.status().as_u16();
        if status != 200 {
            return Err(AuthError::Status {
                endpoint: "GET /authenticate",
                status,
            });
        }
        response
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
            .ok_or(AuthError::MissingToken)
    }

    fn open_lobby(
        &self,
        name: &str,
        password: Option<&str>,
        token: &str,
        create: bool,
    ) -> Result<LobbyStatus, AuthError> {
        let method = if create { Method::POST } else { Method::PUT };
        let response = self
            .http
            .request(method.clone(), self.url("/lobbys"))
            .bearer_auth(token)
            .json(&LobbyRequest {
                lobby_name: name.to_string(),
                lobby_password: password.map(str::to_string),
            })
            .send()?;
        let response = logged(method.as_str(), "/lobbys", response);
        Ok(LobbyStatus::from_http(response.status().as_u16(), create))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic Zm9v"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn test_base_url() {
        let client = HttpAuthClient::new("127.0.0.1", 8080).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_unreachable_proxy_is_http_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client =
            HttpAuthClient::with_timeout("127.0.0.1", port, Duration::from_millis(500)).unwrap();
        assert!(matches!(
            client.authenticate("alice", "pw"),
            Err(AuthError::Http(_))
        ));
    }
}
