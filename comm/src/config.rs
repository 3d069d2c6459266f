//! Comm configuration
//!
//! A [`CommConfig`] names a backend kind plus the options that kind
//! recognizes. Nothing is checked here; [`crate::Comm::new`] validates the
//! whole record before opening anything.

use core_types::CommAddress;
use ipc::{Direction, DEFAULT_MAX_MSG_SIZE};
use metaschema::JsonValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default time a receive waits for a message
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 1000;

/// Broker name used when none is configured
pub const DEFAULT_BROKER: &str = "local";

/// Exchange used when none is configured
pub const DEFAULT_EXCHANGE: &str = "default";

/// Transport kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommKind {
    /// Named in-memory FIFO queue shared inside the process
    Buffer,
    /// File on disk
    File,
    /// Synchronous broker queue
    Broker,
    /// Broker queue driven by a background connection thread
    AsyncBroker,
}

impl CommKind {
    /// Largest frame the kind carries in one piece, `None` if unlimited
    pub fn default_max_msg_size(self) -> Option<usize> {
        match self {
            CommKind::File => None,
            CommKind::Buffer | CommKind::Broker | CommKind::AsyncBroker => {
                Some(DEFAULT_MAX_MSG_SIZE)
            }
        }
    }

    /// Default options for the kind
    pub fn default_options(self) -> BackendOptions {
        match self {
            CommKind::Buffer => BackendOptions::Buffer,
            CommKind::File => BackendOptions::File(FileOptions::default()),
            CommKind::Broker => BackendOptions::Broker(BrokerOptions::default()),
            CommKind::AsyncBroker => BackendOptions::AsyncBroker(BrokerOptions::default()),
        }
    }
}

impl fmt::Display for CommKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommKind::Buffer => "buffer",
            CommKind::File => "file",
            CommKind::Broker => "broker",
            CommKind::AsyncBroker => "async_broker",
        };
        f.write_str(name)
    }
}

/// How a receiving file comm splits the file into messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMethod {
    /// The whole file is one message
    Read,
    /// Each line is one message
    #[default]
    Readline,
}

/// Options for file comms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOptions {
    /// File path; the comm address is used when absent
    pub path: Option<PathBuf>,
    /// Append to an existing file instead of truncating it
    pub append: bool,
    /// Line terminator for `readline`
    pub newline: String,
    /// How received data is split into messages
    pub read_meth: ReadMethod,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            path: None,
            append: false,
            newline: "\n".to_string(),
            read_meth: ReadMethod::Readline,
        }
    }
}

/// Reconnect policy for broker connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay_ms: u64,
    /// Upper bound for the doubling delay between attempts
    pub max_delay_ms: u64,
    /// Time after a disconnect at which the connection is declared lost
    pub timeout_ms: u64,
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 500,
            timeout_ms: 5_000,
        }
    }
}

/// Options for broker comms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    /// Name the broker is registered under
    pub broker: String,
    /// Exchange the queue is bound to
    pub exchange: String,
    /// Queue name; the comm address is used when absent
    pub queue: Option<String>,
    /// Reconnect policy after an unexpected disconnect
    pub reconnect: ReconnectConfig,
}

impl BrokerOptions {
    /// Creates options for a named broker
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            ..Self::default()
        }
    }

    /// Sets the exchange
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Sets the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER.to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            queue: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Backend-specific options, one variant per [`CommKind`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendOptions {
    Buffer,
    File(FileOptions),
    Broker(BrokerOptions),
    AsyncBroker(BrokerOptions),
}

impl BackendOptions {
    /// The kind these options belong to
    pub fn kind(&self) -> CommKind {
        match self {
            BackendOptions::Buffer => CommKind::Buffer,
            BackendOptions::File(_) => CommKind::File,
            BackendOptions::Broker(_) => CommKind::Broker,
            BackendOptions::AsyncBroker(_) => CommKind::AsyncBroker,
        }
    }

    /// Drops the fixed path or queue so the options follow a new address
    pub fn for_new_address(&self) -> Self {
        match self {
            BackendOptions::Buffer => BackendOptions::Buffer,
            BackendOptions::File(file) => BackendOptions::File(FileOptions {
                path: None,
                ..file.clone()
            }),
            BackendOptions::Broker(broker) => BackendOptions::Broker(BrokerOptions {
                queue: None,
                ..broker.clone()
            }),
            BackendOptions::AsyncBroker(broker) => BackendOptions::AsyncBroker(BrokerOptions {
                queue: None,
                ..broker.clone()
            }),
        }
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions::Buffer
    }
}

fn default_true() -> bool {
    true
}

fn default_recv_timeout() -> u64 {
    DEFAULT_RECV_TIMEOUT_MS
}

/// Configuration of one comm endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommConfig {
    /// Channel name, as models refer to it
    pub name: String,
    /// Endpoint address; generated when absent
    #[serde(default)]
    pub address: Option<CommAddress>,
    /// Sending or receiving end
    pub direction: Direction,
    /// Transport kind
    pub kind: CommKind,
    /// Close the comm when EOF is received
    #[serde(default = "default_true")]
    pub close_on_eof_recv: bool,
    /// Frame size limit; the kind's default when absent
    #[serde(default)]
    pub max_msg_size: Option<usize>,
    /// Time a receive waits for a message
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_ms: u64,
    /// Typedef of the typed payloads sent through the comm
    #[serde(default)]
    pub datatype: Option<JsonValue>,
    /// Backend options; the kind's defaults when absent
    #[serde(default)]
    pub options: Option<BackendOptions>,
}

impl CommConfig {
    /// Creates a configuration with default options for the kind
    pub fn new(name: impl Into<String>, kind: CommKind, direction: Direction) -> Self {
        Self {
            name: name.into(),
            address: None,
            direction,
            kind,
            close_on_eof_recv: true,
            max_msg_size: None,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            datatype: None,
            options: None,
        }
    }

    /// Creates an in-memory buffer configuration
    pub fn buffer(name: impl Into<String>, direction: Direction) -> Self {
        Self::new(name, CommKind::Buffer, direction)
    }

    /// Sets the address
    pub fn with_address(mut self, address: impl Into<CommAddress>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets backend options, and the kind they belong to
    pub fn with_options(mut self, options: BackendOptions) -> Self {
        self.kind = options.kind();
        self.options = Some(options);
        self
    }

    /// Sets whether receiving EOF closes the comm
    pub fn with_close_on_eof_recv(mut self, close: bool) -> Self {
        self.close_on_eof_recv = close;
        self
    }

    /// Sets the frame size limit
    pub fn with_max_msg_size(mut self, size: usize) -> Self {
        self.max_msg_size = Some(size);
        self
    }

    /// Sets the receive timeout
    pub fn with_recv_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.recv_timeout_ms = timeout_ms;
        self
    }

    /// Sets the payload typedef
    pub fn with_datatype(mut self, datatype: JsonValue) -> Self {
        self.datatype = Some(datatype);
        self
    }

    /// Backend options, falling back to the kind's defaults
    pub fn backend_options(&self) -> BackendOptions {
        self.options
            .clone()
            .unwrap_or_else(|| self.kind.default_options())
    }

    /// Frame size limit, falling back to the kind's default
    pub fn effective_max_msg_size(&self) -> Option<usize> {
        self.max_msg_size.or_else(|| self.kind.default_max_msg_size())
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}
