use std::io::{self, Read};

pub const MAX_CONTROL_PAYLOAD: usize = 125;
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;
pub const CLOSE_NORMAL: u16 = 1000;

const FIN_BIT: u8 = 0x80;
const RESERVED_BITS: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_MASK: u8 = 0x7F;
const LEN_U16_MARKER: u8 = 126;
const LEN_U64_MARKER: u8 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),
    #[error("reserved bits set without a negotiated extension")]
    ReservedBits,
    #[error("control frame payload too large: {0} bytes")]
    ControlTooLarge(usize),
    #[error("control frame cannot be fragmented")]
    FragmentedControl,
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    pub fn close(code: Option<u16>) -> Self {
        let payload = code.map(|c| c.to_be_bytes().to_vec()).unwrap_or_default();
        Self::new(Opcode::Close, payload)
    }

    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }

    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    pub fn to_bytes(&self, is_client: bool) -> Result<Vec<u8>, FrameError> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(FrameError::FragmentedControl);
            }
            if self.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::ControlTooLarge(self.payload.len()));
            }
        }
        Ok(encode(&self.payload, self.opcode, is_client))
    }
}

pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Encodes a single FIN frame. Client frames get a random mask key.
pub fn encode(payload: &[u8], opcode: Opcode, is_client: bool) -> Vec<u8> {
    let mask_key = is_client.then(rand::random::<[u8; 4]>);
    encode_with_mask(payload, opcode, mask_key)
}

pub fn encode_with_mask(payload: &[u8], opcode: Opcode, mask_key: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 14);
    out.push(FIN_BIT | opcode as u8);

    let mask_bit = if mask_key.is_some() { MASK_BIT } else { 0 };
    if len <= MAX_CONTROL_PAYLOAD {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | LEN_U16_MARKER);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LEN_U64_MARKER);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask_key {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message { payload: Vec<u8>, is_binary: bool },
    Close(Option<u16>),
    Idle,
}

pub struct FrameReader<R> {
    inner: R,
    max_payload_size: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }

    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Reads the next frame. `Ok(None)` means the source timed out before
    /// the first header byte arrived; a timeout inside a frame is an error.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut head = [0u8; 2];
        match self.inner.read(&mut head[..1]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(_) => {}
            Err(e) if is_idle(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        self.fill(&mut head[1..])?;

        let fin = head[0] & FIN_BIT != 0;
        if head[0] & RESERVED_BITS != 0 {
            return Err(FrameError::ReservedBits);
        }
        let opcode = Opcode::from_u8(head[0] & OPCODE_MASK)?;
        let masked = head[1] & MASK_BIT != 0;

        let len = match head[1] & LEN_MASK {
            LEN_U16_MARKER => {
                let mut buf = [0u8; 2];
                self.fill(&mut buf)?;
                u16::from_be_bytes(buf) as u64
            }
            LEN_U64_MARKER => {
                let mut buf = [0u8; 8];
                self.fill(&mut buf)?;
                u64::from_be_bytes(buf)
            }
            short => short as u64,
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControl);
            }
            if len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlTooLarge(len as usize));
            }
        }
        if len > self.max_payload_size as u64 {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.max_payload_size,
            });
        }

        let mask_key = if masked {
            let mut key = [0u8; 4];
            self.fill(&mut key)?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; len as usize];
        self.fill(&mut payload)?;
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            mask_key,
            payload,
        }))
    }

    /// Reads until something the application cares about shows up.
    ///
    /// Pings are answered through `reply` with an identical Pong, Pongs are
    /// dropped, and a Close is echoed through `reply` before being returned.
    pub fn next_event<F>(&mut self, mut reply: F) -> Result<Incoming, FrameError>
    where
        F: FnMut(Frame),
    {
        loop {
            let Some(frame) = self.read_frame()? else {
                return Ok(Incoming::Idle);
            };

            match frame.opcode {
                Opcode::Ping => {
                    log::trace!("ping ({} bytes), replying with pong", frame.payload.len());
                    reply(Frame::pong(frame.payload));
                }
                Opcode::Pong => {
                    log::trace!("pong received");
                }
                Opcode::Close => {
                    let code = frame.close_code();
                    reply(Frame::close(code));
                    return Ok(Incoming::Close(code));
                }
                Opcode::Text => {
                    return Ok(Incoming::Message {
                        payload: frame.payload,
                        is_binary: false,
                    });
                }
                Opcode::Binary | Opcode::Continuation => {
                    return Ok(Incoming::Message {
                        payload: frame.payload,
                        is_binary: true,
                    });
                }
            }
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), FrameError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_one(bytes: Vec<u8>) -> Frame {
        FrameReader::new(Cursor::new(bytes))
            .read_frame()
            .unwrap()
            .expect("frame")
    }

    struct IdleReader;

    impl Read for IdleReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"))
        }
    }

    #[test]
    fn test_round_trip_boundary_sizes() {
        for size in [0usize, 1, 125, 126, 65535, 65536] {
            for opcode in [Opcode::Text, Opcode::Binary] {
                let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
                let frame = decode_one(encode(&payload, opcode, true));
                assert!(frame.fin);
                assert!(frame.is_masked());
                assert_eq!(frame.opcode, opcode);
                assert_eq!(frame.payload, payload, "size {size}");
            }
        }
    }

    #[test]
    fn test_minimal_length_encoding() {
        let bytes = encode(&[0u8; 125], Opcode::Binary, false);
        assert_eq!(bytes[1], 125);
        assert_eq!(bytes.len(), 2 + 125);

        let bytes = encode(&[0u8; 126], Opcode::Binary, false);
        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &126u16.to_be_bytes());

        let bytes = encode(&vec![0u8; 65535], Opcode::Binary, false);
        assert_eq!(bytes[1], 126);
        assert_eq!(bytes.len(), 4 + 65535);

        let bytes = encode(&vec![0u8; 65536], Opcode::Binary, true);
        assert_eq!(bytes[1], MASK_BIT | 127);
        assert_eq!(&bytes[2..10], &65536u64.to_be_bytes());
        assert_eq!(bytes.len(), 10 + 4 + 65536);
    }

    #[test]
    fn test_rfc_hello_vectors() {
        assert_eq!(
            encode_with_mask(b"Hello", Opcode::Text, None),
            vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
        assert_eq!(
            encode_with_mask(b"Hello", Opcode::Text, Some([0x37, 0xfa, 0x21, 0x3d])),
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_masking_is_an_involution() {
        let original = b"the quick brown fox".to_vec();
        let key = [0xde, 0xad, 0xbe, 0xef];
        let mut data = original.clone();
        apply_mask(&mut data, key);
        assert_ne!(data, original);
        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn test_ping_schedules_exactly_one_pong() {
        let mut stream = encode(b"abc", Opcode::Ping, false);
        stream.extend(encode(b"xyz", Opcode::Binary, false));

        let mut reader = FrameReader::new(Cursor::new(stream));
        let mut replies = Vec::new();
        let event = reader.next_event(|f| replies.push(f)).unwrap();

        assert_eq!(
            event,
            Incoming::Message {
                payload: b"xyz".to_vec(),
                is_binary: true
            }
        );
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].opcode, Opcode::Pong);
        assert_eq!(replies[0].payload, b"abc");
    }

    #[test]
    fn test_pong_is_discarded() {
        let mut stream = encode(b"", Opcode::Pong, false);
        stream.extend(encode(b"hi", Opcode::Text, false));

        let mut replies = Vec::new();
        let event = FrameReader::new(Cursor::new(stream))
            .next_event(|f| replies.push(f))
            .unwrap();

        assert!(replies.is_empty());
        assert_eq!(
            event,
            Incoming::Message {
                payload: b"hi".to_vec(),
                is_binary: false
            }
        );
    }

    #[test]
    fn test_close_is_echoed() {
        let stream = encode(&1001u16.to_be_bytes(), Opcode::Close, false);
        let mut replies = Vec::new();
        let event = FrameReader::new(Cursor::new(stream))
            .next_event(|f| replies.push(f))
            .unwrap();

        assert_eq!(event, Incoming::Close(Some(1001)));
        assert_eq!(replies, vec![Frame::close(Some(1001))]);
    }

    #[test]
    fn test_empty_application_frame_still_delivers() {
        let stream = encode(b"", Opcode::Binary, false);
        let event = FrameReader::new(Cursor::new(stream))
            .next_event(|_| {})
            .unwrap();
        assert_eq!(
            event,
            Incoming::Message {
                payload: Vec::new(),
                is_binary: true
            }
        );
    }

    #[test]
    fn test_rejects_bad_headers() {
        let err = FrameReader::new(Cursor::new(vec![0x83, 0x00]))
            .read_frame()
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidOpcode(0x3)));

        let err = FrameReader::new(Cursor::new(vec![0x09, 0x00]))
            .read_frame()
            .unwrap_err();
        assert!(matches!(err, FrameError::FragmentedControl));

        let err = FrameReader::new(Cursor::new(vec![0xC2, 0x00]))
            .read_frame()
            .unwrap_err();
        assert!(matches!(err, FrameError::ReservedBits));

        let err = FrameReader::new(Cursor::new(vec![0x89, 126, 0x00, 0x80]))
            .read_frame()
            .unwrap_err();
        assert!(matches!(err, FrameError::ControlTooLarge(128)));
    }

    #[test]
    fn test_enforces_payload_limit() {
        let bytes = encode(&[0u8; 300], Opcode::Binary, false);
        let err = FrameReader::new(Cursor::new(bytes))
            .with_max_payload_size(256)
            .read_frame()
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 300, max: 256 }));
    }

    #[test]
    fn test_truncated_frame_reports_closed() {
        let mut bytes = encode(b"truncated", Opcode::Binary, false);
        bytes.truncate(5);
        let err = FrameReader::new(Cursor::new(bytes)).read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));

        let err = FrameReader::new(Cursor::new(Vec::new()))
            .read_frame()
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn test_timeout_on_boundary_is_idle() {
        let mut reader = FrameReader::new(IdleReader);
        assert!(reader.read_frame().unwrap().is_none());
        assert_eq!(reader.next_event(|_| {}).unwrap(), Incoming::Idle);
    }

    #[test]
    fn test_control_frame_validation_on_encode() {
        let frame = Frame::ping(vec![0u8; 126]);
        assert!(matches!(
            frame.to_bytes(true),
            Err(FrameError::ControlTooLarge(126))
        ));

        let mut frame = Frame::pong(b"ok".to_vec());
        frame.fin = false;
        assert!(matches!(
            frame.to_bytes(true),
            Err(FrameError::FragmentedControl)
        ));
    }
}
