use std::io::{self, Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WS_VERSION: &str = "13";

const MAX_HEAD_SIZE: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("could not connect to {addr}: {source}")]
    ConnectRefused {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected status {0}, expected 101")]
    BadStatus(u16),
    #[error("server did not agree to upgrade to websocket")]
    NotUpgraded,
    #[error("Sec-WebSocket-Accept does not match the request key")]
    AcceptMismatch,
    #[error("malformed handshake: {0}")]
    Malformed(String),
    #[error("i/o error during handshake: {0}")]
    Io(#[from] io::Error),
}

/// `base64(SHA1(key ++ GUID))` as required by RFC 6455 section 4.2.2.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    host: String,
    port: u16,
    path: String,
    bearer_token: Option<String>,
    key: String,
    verify_accept: bool,
}

impl UpgradeRequest {
    pub fn new(host: &str, port: u16, path: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
            bearer_token: None,
            key: generate_key(),
            verify_accept: true,
        }
    }

    pub fn bearer_token(mut self, token: Option<&str>) -> Self {
        self.bearer_token = token.map(str::to_string);
        self
    }

    pub fn verify_accept(mut self, verify: bool) -> Self {
        self.verify_accept = verify;
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }

    pub fn to_http(&self) -> String {
        let mut req = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {}\r\n",
            self.path, self.host, self.port, self.key, WS_VERSION
        );
        if let Some(token) = &self.bearer_token {
            req.push_str(&format!("Authorization: Bearer {}\r\n", token));
        }
        req.push_str("\r\n");
        req
    }

    pub fn perform<S: Read + Write>(&self, stream: &mut S) -> Result<(), HandshakeError> {
        stream.write_all(self.to_http().as_bytes())?;
        stream.flush()?;

        let head = read_head(stream)?;
        let response = HttpHead::parse(&head)?;

        let status = response.status_code()?;
        if status != 101 {
            return Err(HandshakeError::BadStatus(status));
        }

        let upgraded = response
            .header("upgrade")
            .is_some_and(|v| has_token(v, "websocket"));
        if !upgraded {
            return Err(HandshakeError::NotUpgraded);
        }

        if self.verify_accept {
            let expected = compute_accept_key(&self.key);
            match response.header("sec-websocket-accept") {
                Some(accept) if accept == expected => {}
                _ => return Err(HandshakeError::AcceptMismatch),
            }
        }

        log::debug!("websocket upgrade accepted for {}", self.path);
        Ok(())
    }
}

/// Client side of the handshake with accept-key verification enabled.
pub fn perform<S: Read + Write>(
    stream: &mut S,
    host: &str,
    port: u16,
    path: &str,
    bearer_token: Option<&str>,
) -> Result<(), HandshakeError> {
    UpgradeRequest::new(host, port, path)
        .bearer_token(bearer_token)
        .perform(stream)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeInfo {
    pub path: String,
    pub key: String,
    pub authorization: Option<String>,
}

impl UpgradeInfo {
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
    }
}

pub fn read_upgrade_request<S: Read>(stream: &mut S) -> Result<UpgradeInfo, HandshakeError> {
    let head = read_head(stream)?;
    let request = HttpHead::parse(&head)?;

    let mut parts = request.start_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(HandshakeError::Malformed(request.start_line.clone()));
    };
    if method != "GET" {
        return Err(HandshakeError::Malformed(format!("unexpected method {}", method)));
    }

    let upgraded = request
        .header("upgrade")
        .is_some_and(|v| has_token(v, "websocket"));
    if !upgraded {
        return Err(HandshakeError::NotUpgraded);
    }

    let key = request
        .header("sec-websocket-key")
        .ok_or_else(|| HandshakeError::Malformed("missing Sec-WebSocket-Key".into()))?;

    Ok(UpgradeInfo {
        path: path.to_string(),
        key: key.to_string(),
        authorization: request.header("authorization").map(str::to_string),
    })
}

pub fn respond_switching<S: Write>(stream: &mut S, info: &UpgradeInfo) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept_key(&info.key)
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

pub fn respond_error<S: Write>(stream: &mut S, status: u16, reason: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status, reason
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

pub fn accept<S: Read + Write>(stream: &mut S) -> Result<UpgradeInfo, HandshakeError> {
    match read_upgrade_request(stream) {
        Ok(info) => {
            respond_switching(stream, &info)?;
            Ok(info)
        }
        Err(e) => {
            let _ = respond_error(stream, 400, "Bad Request");
            Err(e)
        }
    }
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn read_head<S: Read>(stream: &mut S) -> Result<String, HandshakeError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_HEAD_SIZE {
            return Err(HandshakeError::Malformed("header section too large".into()));
        }
        match stream.read(&mut byte) {
            Ok(0) => {
                return Err(HandshakeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                )));
            }
            Ok(_) => head.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    String::from_utf8(head).map_err(|_| HandshakeError::Malformed("non-utf8 header".into()))
}

struct HttpHead {
    start_line: String,
    headers: Vec<(String, String)>,
}

impl HttpHead {
    fn parse(head: &str) -> Result<Self, HandshakeError> {
        let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
        let start_line = lines
            .next()
            .ok_or_else(|| HandshakeError::Malformed("empty head".into()))?
            .to_string();

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            start_line,
            headers,
        })
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn status_code(&self) -> Result<u16, HandshakeError> {
        self.start_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| HandshakeError::Malformed(self.start_line.clone()))
    }
}
