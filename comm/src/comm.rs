//! The uniform comm endpoint

use crate::config::{CommConfig, CommKind};
use crate::error::CommError;
use crate::sync::lock;
use crate::transport::Backend;
use core_types::CommAddress;
use ipc::{decode_frame, encode_frame, Direction, Header, Message};
use metaschema::{JsonValue, Typedef, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Longest time a receive holds the backend lock in one go
const POLL_SLICE: Duration = Duration::from_millis(10);

/// One endpoint of a directional message channel
///
/// A comm is open until it is closed explicitly, sends the EOF sentinel, or
/// (with `close_on_eof_recv`) receives it. Every operation takes `&self`:
/// the open flag and the backend are checked and used under one lock, so a
/// comm can be closed from another thread while a receive is blocked, and
/// that receive returns within one poll slice.
///
/// `send` and `recv` report transport failures as a `false` flag. After a
/// `false` return, [`Comm::is_closed`] tells end of stream apart from error.
pub struct Comm {
    config: CommConfig,
    address: CommAddress,
    datatype: Option<Typedef>,
    backend: Mutex<Backend>,
    open: Arc<AtomicBool>,
    n_sent: AtomicU64,
    n_recv: AtomicU64,
    last_header: Mutex<Option<Header>>,
}

impl Comm {
    /// Validates the configuration and opens the backend
    pub fn new(config: CommConfig) -> Result<Self, CommError> {
        validate(&config)?;
        let address = config
            .address
            .clone()
            .unwrap_or_else(CommAddress::generate);
        let datatype = match &config.datatype {
            Some(partial) => Some(complete_datatype(&config, partial)?),
            None => None,
        };
        let open = Arc::new(AtomicBool::new(true));
        let backend = Backend::open(&config, &address, &open)?;

        tracing::debug!(
            comm = %config.name,
            address = %address,
            kind = %config.kind,
            direction = %config.direction,
            "comm opened"
        );

        Ok(Self {
            config,
            address,
            datatype,
            backend: Mutex::new(backend),
            open,
            n_sent: AtomicU64::new(0),
            n_recv: AtomicU64::new(0),
            last_header: Mutex::new(None),
        })
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Endpoint address
    pub fn address(&self) -> &CommAddress {
        &self.address
    }

    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    pub fn kind(&self) -> CommKind {
        self.config.kind
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    /// Completed payload typedef, if one was configured
    pub fn datatype(&self) -> Option<&Typedef> {
        self.datatype.as_ref()
    }

    /// Frame size limit, `None` if unlimited
    pub fn max_msg_size(&self) -> Option<usize> {
        self.config.effective_max_msg_size()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Messages sent, not counting EOF
    pub fn n_sent(&self) -> u64 {
        self.n_sent.load(Ordering::SeqCst)
    }

    /// Messages received, not counting EOF
    pub fn n_recv(&self) -> u64 {
        self.n_recv.load(Ordering::SeqCst)
    }

    /// Frames waiting to be received (or, for async senders, to be published)
    pub fn n_msg(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        lock(&self.backend).pending()
    }

    /// Header of the most recently received message
    pub fn last_header(&self) -> Option<Header> {
        lock(&self.last_header).clone()
    }

    /// Successful broker connections so far, for broker comms
    pub fn times_connected(&self) -> Option<u64> {
        lock(&self.backend).times_connected()
    }

    /// Configuration of the peer endpoint
    pub fn opp_config(&self) -> CommConfig {
        CommConfig {
            address: Some(self.address.clone()),
            direction: self.config.direction.opposite(),
            ..self.config.clone()
        }
    }

    /// Sends one message that fits in a single frame
    ///
    /// Sending EOF closes the comm and returns `false`.
    pub fn send(&self, message: &Message) -> bool {
        self.report_send(self.try_send(message, true))
    }

    /// Sends the EOF sentinel
    pub fn send_eof(&self) -> bool {
        self.send(&Message::eof())
    }

    /// Sends a message of any size, chunking it over a work channel if needed
    pub fn send_nolimit(&self, message: &Message) -> bool {
        self.report_send(self.try_send_nolimit(message))
    }

    /// Receives one message
    ///
    /// Returns `(false, eof)` at end of stream, `(false, empty)` on timeout
    /// or failure.
    pub fn recv(&self, timeout: Option<Duration>) -> (bool, Message) {
        self.report_recv(self.try_recv(timeout))
    }

    /// Receives one message, reassembling chunked bodies
    pub fn recv_nolimit(&self, timeout: Option<Duration>) -> (bool, Message) {
        self.report_recv(self.try_recv_nolimit(timeout))
    }

    /// Receives one message, distinguishing timeout from failure
    ///
    /// `Ok(None)` means nothing arrived in time. EOF is returned as a message.
    pub fn try_recv(&self, timeout: Option<Duration>) -> Result<Option<Message>, CommError> {
        let frame = match self.recv_raw(timeout)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let message = decode_frame(&frame)?;
        *lock(&self.last_header) = Some(message.header.clone());

        if message.is_eof() {
            tracing::debug!(comm = %self.config.name, "received EOF");
            if self.config.close_on_eof_recv {
                self.close();
            }
        } else {
            self.n_recv.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Some(message))
    }

    /// [`Comm::try_recv`] with chunk reassembly
    pub fn try_recv_nolimit(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, CommError> {
        let mut message = match self.try_recv(timeout)? {
            Some(message) => message,
            None => return Ok(None),
        };
        if message.is_eof() || !message.header.announces_chunks(message.body.len()) {
            return Ok(Some(message));
        }

        let size = message.header.size.take().unwrap_or_default();
        let address = message.header.address.take().unwrap_or_default();
        let work = Comm::new(self.work_config(Direction::Recv, Some(address.into())))?;
        let chunk_timeout = Some(self.config.recv_timeout());
        while message.body.len() < size {
            match work.recv_raw(chunk_timeout)? {
                Some(chunk) => message.body.extend_from_slice(&chunk),
                None => {
                    work.close();
                    return Err(CommError::Timeout(self.config.recv_timeout_ms));
                }
            }
        }
        work.close();

        tracing::trace!(comm = %self.config.name, size, "reassembled chunked message");
        *lock(&self.last_header) = Some(message.header.clone());
        Ok(Some(message))
    }

    /// Encodes a value through the type registry and sends it
    ///
    /// The typedef is the comm's configured datatype, or inferred from the
    /// value, and travels in the header. Element typedefs the datatype
    /// leaves out are inferred from the value.
    pub fn send_object(&self, value: &Value) -> Result<bool, CommError> {
        let registry = metaschema::global();
        let (encoded, typedef) = registry.encode_with_typedef(value, self.datatype.as_ref())?;
        let body = serde_json::to_vec(&encoded)
            .map_err(|err| CommError::Transport(format!("serializing payload: {}", err)))?;
        let message = Message::new(body).with_header(Header::new().with_datatype(typedef.to_json()));
        Ok(self.send_nolimit(&message))
    }

    /// Receives a value sent with [`Comm::send_object`]
    ///
    /// Returns `(false, Value::Null)` at end of stream or on timeout.
    pub fn recv_object(&self, timeout: Option<Duration>) -> Result<(bool, Value), CommError> {
        let (ok, message) = self.recv_nolimit(timeout);
        if !ok {
            return Ok((false, Value::Null));
        }
        let registry = metaschema::global();
        let typedef = match &message.header.datatype {
            Some(datatype) => registry.extract_typedef(&Typedef::from_json(datatype)?)?,
            None => self.datatype.clone().unwrap_or_default(),
        };
        let encoded: JsonValue = serde_json::from_slice(&message.body)
            .map_err(|err| CommError::Transport(format!("payload is not JSON: {}", err)))?;
        Ok((true, registry.decode_data(&encoded, &typedef)?))
    }

    /// Closes the comm; later calls do nothing
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            lock(&self.backend).close();
            tracing::debug!(comm = %self.config.name, address = %self.address, "comm closed");
        }
    }

    fn try_send(&self, message: &Message, enforce_limit: bool) -> Result<bool, CommError> {
        if message.is_eof() {
            self.send_eof_frame(message)?;
            return Ok(false);
        }
        let frame = encode_frame(message)?;
        if enforce_limit {
            if let Some(max) = self.max_msg_size() {
                if frame.len() > max {
                    return Err(CommError::Transport(format!(
                        "message of {} bytes exceeds the {} byte limit, use send_nolimit",
                        frame.len(),
                        max
                    )));
                }
            }
        }
        self.push_frame(frame)?;
        Ok(true)
    }

    /// [`Comm::send_nolimit`] that reports why a send failed
    ///
    /// `Ok(false)` means EOF was sent. A [`CommError::Closed`] means this
    /// comm or its peer is gone; other errors come from the transport.
    pub fn try_send_nolimit(&self, message: &Message) -> Result<bool, CommError> {
        let max = match self.max_msg_size() {
            Some(max) if !message.is_eof() => max,
            _ => return self.try_send(message, false),
        };
        if encode_frame(message)?.len() <= max {
            return self.try_send(message, false);
        }

        let work = Comm::new(self.work_config(Direction::Send, None))?;
        let mut header = message.header.clone();
        header.size = Some(message.body.len());
        header.address = Some(work.address().to_string());
        self.push_frame(encode_frame(&Message::empty().with_header(header))?)?;

        for chunk in message.body.chunks(max) {
            work.push_frame(chunk.to_vec())?;
        }
        work.close();
        tracing::trace!(
            comm = %self.config.name,
            size = message.body.len(),
            work = %work.address(),
            "sent chunked message"
        );
        Ok(true)
    }

    fn push_frame(&self, frame: Vec<u8>) -> Result<(), CommError> {
        let mut backend = lock(&self.backend);
        if !self.is_open() {
            return Err(CommError::Closed(self.config.name.clone()));
        }
        backend.send_frame(frame)?;
        self.n_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_eof_frame(&self, message: &Message) -> Result<(), CommError> {
        let mut backend = lock(&self.backend);
        if !self.is_open() {
            return Err(CommError::Closed(self.config.name.clone()));
        }
        let result = if message.header.is_empty() {
            backend.send_eof()
        } else {
            encode_frame(message)
                .map_err(CommError::from)
                .and_then(|frame| backend.send_frame(frame))
        };
        self.open.store(false, Ordering::SeqCst);
        backend.close();
        tracing::debug!(comm = %self.config.name, "sent EOF");
        result
    }

    fn recv_raw(&self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, CommError> {
        let timeout = timeout.unwrap_or_else(|| self.config.recv_timeout());
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut backend = lock(&self.backend);
                if !self.is_open() {
                    return Err(CommError::Closed(self.config.name.clone()));
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if let Some(frame) = backend.recv_frame(remaining.min(POLL_SLICE))? {
                    return Ok(Some(frame));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn work_config(&self, direction: Direction, address: Option<CommAddress>) -> CommConfig {
        CommConfig {
            name: format!("{}_work", self.config.name),
            address,
            direction,
            datatype: None,
            options: Some(self.config.backend_options().for_new_address()),
            ..self.config.clone()
        }
    }

    fn report_send(&self, result: Result<bool, CommError>) -> bool {
        match result {
            Ok(sent) => sent,
            Err(CommError::Closed(_)) => {
                tracing::debug!(comm = %self.config.name, "send on closed comm dropped");
                false
            }
            Err(err) => {
                tracing::warn!(comm = %self.config.name, error = %err, "send failed");
                false
            }
        }
    }

    fn report_recv(&self, result: Result<Option<Message>, CommError>) -> (bool, Message) {
        match result {
            Ok(Some(message)) => (!message.is_eof(), message),
            Ok(None) => {
                tracing::trace!(comm = %self.config.name, "recv timed out");
                (false, Message::empty())
            }
            Err(CommError::Closed(_)) => (false, Message::empty()),
            Err(err) => {
                tracing::warn!(comm = %self.config.name, error = %err, "recv failed");
                (false, Message::empty())
            }
        }
    }
}

impl Drop for Comm {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm")
            .field("name", &self.config.name)
            .field("address", &self.address)
            .field("kind", &self.config.kind)
            .field("direction", &self.config.direction)
            .field("open", &self.is_open())
            .finish()
    }
}

fn validate(config: &CommConfig) -> Result<(), CommError> {
    if config.name.is_empty() {
        return Err(CommError::config("comm name must not be empty"));
    }
    if config.address.as_ref().is_some_and(|a| a.as_str().is_empty()) {
        return Err(CommError::config(format!("comm {} has an empty address", config.name)));
    }
    if let Some(options) = &config.options {
        if options.kind() != config.kind {
            return Err(CommError::config(format!(
                "comm {}: {} options given to a {} comm",
                config.name,
                options.kind(),
                config.kind
            )));
        }
    }
    if config.max_msg_size == Some(0) {
        return Err(CommError::config(format!(
            "comm {}: max_msg_size must be positive",
            config.name
        )));
    }
    Ok(())
}

fn complete_datatype(config: &CommConfig, partial: &JsonValue) -> Result<Typedef, CommError> {
    metaschema::complete_typedef(partial).map_err(|err| {
        CommError::config(format!(
            "comm {} ({}): incomplete datatype: {}",
            config.name, config.direction, err
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendOptions, FileOptions};
    use core_types::RequestId;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    const WAIT: Option<Duration> = Some(Duration::from_millis(500));

    fn pair(name: &str) -> (Comm, Comm) {
        let tx = Comm::new(CommConfig::buffer(name, Direction::Send)).unwrap();
        let rx = Comm::new(tx.opp_config()).unwrap();
        (tx, rx)
    }

    #[test]
    fn test_send_recv_fifo() {
        let (tx, rx) = pair("fifo");
        assert!(tx.send(&Message::new("a")));
        assert!(tx.send(&Message::new("b")));
        assert_eq!(rx.n_msg(), 2);

        let (ok, first) = rx.recv(WAIT);
        assert!(ok);
        assert_eq!(first.body, b"a");
        let (ok, second) = rx.recv(WAIT);
        assert!(ok);
        assert_eq!(second.body, b"b");
        assert_eq!(tx.n_sent(), 2);
        assert_eq!(rx.n_recv(), 2);
    }

    #[test]
    fn test_eof_closes_both_ends() {
        let (tx, rx) = pair("eof");
        assert!(!tx.send_eof());
        assert!(tx.is_closed());

        let (ok, message) = rx.recv(WAIT);
        assert!(!ok);
        assert!(message.is_eof());
        assert!(rx.is_closed());
    }

    #[test]
    fn test_eof_keeps_open_without_close_on_eof_recv() {
        let tx = Comm::new(CommConfig::buffer("shared", Direction::Send)).unwrap();
        let rx = Comm::new(tx.opp_config().with_close_on_eof_recv(false)).unwrap();
        let other = Comm::new(rx.opp_config()).unwrap();

        tx.send_eof();
        let (ok, message) = rx.recv(WAIT);
        assert!(!ok && message.is_eof());
        assert!(rx.is_open());

        assert!(other.send(&Message::new("still here")));
        assert_eq!(rx.recv(WAIT).1.body, b"still here");
    }

    #[test]
    fn test_timeout_is_not_eof() {
        let (_tx, rx) = pair("quiet");
        let (ok, message) = rx.recv(Some(Duration::from_millis(20)));
        assert!(!ok);
        assert!(!message.is_eof());
        assert!(rx.is_open());
        assert_eq!(rx.try_recv(Some(Duration::from_millis(5))), Ok(None));
    }

    #[test]
    fn test_send_after_close() {
        let (tx, _rx) = pair("closed");
        tx.close();
        tx.close();
        assert!(!tx.send(&Message::new("late")));
        assert_eq!(tx.n_sent(), 0);
    }

    #[test]
    fn test_close_wakes_blocked_recv() {
        let (_tx, rx) = pair("blocked");
        let rx = Arc::new(rx);
        let closer = Arc::clone(&rx);
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            closer.close();
        });

        let (ok, _) = rx.recv(Some(Duration::from_secs(10)));
        assert!(!ok);
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_header_round_trip_and_last_header() {
        let (tx, rx) = pair("header");
        let message = Message::new("body").with_header(
            Header::new()
                .with_id(RequestId::from_string("r1"))
                .with_response_address("reply-here")
                .with_extra("units", json!("cm")),
        );
        assert!(tx.send(&message));
        let (ok, received) = rx.recv(WAIT);
        assert!(ok);
        assert_eq!(received, message);
        assert_eq!(rx.last_header(), Some(message.header));
    }

    #[test]
    fn test_oversized_send_fails() {
        let tx = Comm::new(CommConfig::buffer("small", Direction::Send).with_max_msg_size(8)).unwrap();
        assert!(!tx.send(&Message::new(vec![b'x'; 9])));
        assert!(tx.is_open());
    }

    #[test]
    fn test_nolimit_chunks_large_body() {
        let tx = Comm::new(CommConfig::buffer("big", Direction::Send).with_max_msg_size(16)).unwrap();
        let rx = Comm::new(tx.opp_config()).unwrap();
        let body: Vec<u8> = (0..200u8).collect();
        let message = Message::new(body.clone()).with_id("big-1");

        assert!(tx.send_nolimit(&message));
        let (ok, received) = rx.recv_nolimit(WAIT);
        assert!(ok);
        assert_eq!(received.body, body);
        assert_eq!(received.header.id, Some(RequestId::from_string("big-1")));
        assert_eq!(received.header.size, None);
        assert_eq!(received.header.address, None);

        assert!(!tx.send_nolimit(&Message::eof()));
        let (ok, eof) = rx.recv_nolimit(WAIT);
        assert!(!ok && eof.is_eof());
        assert!(tx.is_closed() && rx.is_closed());
    }

    #[test]
    fn test_opp_config() {
        let tx = Comm::new(CommConfig::buffer("opp", Direction::Send)).unwrap();
        let opp = tx.opp_config();
        assert_eq!(opp.direction, Direction::Recv);
        assert_eq!(opp.address.as_ref(), Some(tx.address()));
        assert_eq!(opp.kind, CommKind::Buffer);
    }

    #[test]
    fn test_config_errors() {
        let mismatched = CommConfig {
            options: Some(BackendOptions::File(FileOptions::default())),
            ..CommConfig::buffer("bad", Direction::Send)
        };
        assert!(matches!(Comm::new(mismatched), Err(CommError::Config(_))));

        let nameless = CommConfig::buffer("", Direction::Send);
        assert!(matches!(Comm::new(nameless), Err(CommError::Config(_))));

        let incomplete = CommConfig::buffer("typed", Direction::Send)
            .with_datatype(json!({"items": [{"type": "int"}]}));
        assert!(matches!(Comm::new(incomplete), Err(CommError::Config(_))));
    }

    #[test]
    fn test_send_object_round_trip() {
        let tx = Comm::new(CommConfig::buffer("objects", Direction::Send).with_max_msg_size(32)).unwrap();
        let rx = Comm::new(tx.opp_config()).unwrap();
        let value = Value::object([
            ("name", Value::from("sensor")),
            ("raw", Value::from(b"\x01\x02".to_vec())),
            ("readings", Value::Array(vec![Value::Float(1.5), Value::Uint(7)])),
        ]);

        assert_eq!(tx.send_object(&value), Ok(true));
        let (ok, received) = rx.recv_object(WAIT).unwrap();
        assert!(ok);
        assert_eq!(received, value);
    }

    #[test]
    fn test_send_object_with_datatype() {
        let config = CommConfig::buffer("declared", Direction::Send)
            .with_datatype(json!({"type": "array", "items": ["bytes", "int"]}));
        let tx = Comm::new(config).unwrap();
        let rx = Comm::new(tx.opp_config()).unwrap();
        assert!(tx.datatype().is_some());

        let wrong = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(tx.send_object(&wrong), Err(CommError::Type(_))));

        let right = Value::Array(vec![Value::from(b"ab".to_vec()), Value::Int(2)]);
        assert_eq!(tx.send_object(&right), Ok(true));
        assert_eq!(rx.recv_object(WAIT).unwrap(), (true, right));
    }
}
