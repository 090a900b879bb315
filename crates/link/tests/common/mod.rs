#![allow(dead_code)]

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flotilla::net::{frame, handshake};
use flotilla::{
    ClientMessage, Coordinate, DummyObject, Frame, FrameReader, GameObjects, Opcode,
    PipelineConfig, ServerMessage, UpgradeInfo,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Server end of one upgraded connection.
pub struct ServerConn {
    pub info: UpgradeInfo,
    reader: FrameReader<TcpStream>,
    writer: TcpStream,
}

impl ServerConn {
    pub fn accept(listener: &TcpListener) -> ServerConn {
        Self::accept_delayed(listener, Duration::ZERO)
    }

    /// Holds the upgrade request for `delay` before answering it.
    pub fn accept_delayed(listener: &TcpListener, delay: Duration) -> ServerConn {
        let (mut stream, _) = listener.accept().unwrap();
        thread::sleep(delay);
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        let info = handshake::accept(&mut stream).unwrap();
        stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let writer = stream.try_clone().unwrap();
        ServerConn {
            info,
            reader: FrameReader::new(stream),
            writer,
        }
    }

    pub fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) {
        let bytes = frame::encode(payload, opcode, false);
        self.writer.write_all(&bytes).unwrap();
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
    }

    pub fn send_message(&mut self, message: &ServerMessage) {
        let bytes = message.to_msgpack().unwrap();
        self.send_frame(Opcode::Binary, &bytes);
    }

    /// Next frame of any kind, or `None` on timeout or a closed socket.
    pub fn next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.reader.read_frame() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    /// Next frame with the given opcode, skipping everything else.
    pub fn expect_frame(&mut self, opcode: Opcode) -> Frame {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if let Some(frame) = self.next_frame(deadline.saturating_duration_since(Instant::now())) {
                if frame.opcode == opcode {
                    return frame;
                }
            }
        }
        panic!("no {:?} frame within {:?}", opcode, TIMEOUT);
    }

    pub fn next_client_message(&mut self) -> ClientMessage {
        let frame = self.expect_frame(Opcode::Binary);
        assert!(frame.is_masked(), "client frames must be masked");
        ClientMessage::from_msgpack(&frame.payload).unwrap()
    }
}

pub fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Listener on an ephemeral loopback port running `handler` for each of
/// the first `connections` clients.
pub fn spawn_server<F>(connections: usize, handler: F) -> (u16, JoinHandle<()>)
where
    F: Fn(usize, ServerConn) + Send + 'static,
{
    let (listener, port) = listen();
    let handle = thread::spawn(move || {
        for index in 0..connections {
            let conn = ServerConn::accept(&listener);
            handler(index, conn);
        }
    });
    (port, handle)
}

pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        read_timeout: Duration::from_millis(100),
        upload_poll: Duration::from_millis(100),
        ..PipelineConfig::default()
    }
}

pub fn snapshot_with(user: &str, ids: &[&str]) -> ServerMessage {
    let mut objects = GameObjects::default();
    for id in ids {
        objects.dummies.insert(
            id.to_string(),
            DummyObject {
                id: id.to_string(),
                position: Coordinate::new(1.0, 2.0, 3.0),
                velocity: Coordinate::default(),
            },
        );
    }
    ServerMessage::new(user, objects)
}

/// Polls `check` until it returns `Some` or the timeout elapses.
pub fn wait_for<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(value) = check() {
            return Some(value);
        }
        thread::sleep(Duration::from_millis(10));
    }
    None
}
