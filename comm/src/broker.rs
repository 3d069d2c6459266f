//! Broker boundary and synchronous broker transport
//!
//! The comm layer treats a message broker as an opaque client exposing
//! publish, get, close and a disconnect callback. [`LocalBroker`] is the
//! in-process broker behind that boundary: brokers are started under a name
//! and comms connect to them by that name.

use crate::config::{BrokerOptions, ReconnectConfig};
use crate::error::CommError;
use crate::sync::{lock, wait_until};
use crate::transport::Transport;
use core_types::CommAddress;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Reply code used when a broker shuts down cleanly
pub const REPLY_SHUTDOWN: u16 = 320;

/// Callback run when a connection drops, with the reply code and text
pub type DisconnectCallback = Box<dyn Fn(u16, &str) + Send + Sync>;

/// A connection to a message broker
pub trait BrokerClient: Send + Sync {
    /// Publishes a frame to a queue
    fn publish(&self, exchange: &str, queue: &str, frame: Vec<u8>) -> Result<(), CommError>;

    /// Waits up to `timeout` for a frame from a queue
    fn get(&self, exchange: &str, queue: &str, timeout: Duration)
        -> Result<Option<Vec<u8>>, CommError>;

    /// Frames waiting in a queue
    fn pending(&self, exchange: &str, queue: &str) -> usize;

    /// Closes the connection
    fn close(&self);

    /// Checks if the connection is usable
    fn is_open(&self) -> bool;

    /// Registers a callback for unexpected disconnects
    fn on_disconnect(&self, callback: DisconnectCallback);
}

fn brokers() -> &'static Mutex<HashMap<String, Arc<LocalBroker>>> {
    static BROKERS: OnceLock<Mutex<HashMap<String, Arc<LocalBroker>>>> = OnceLock::new();
    BROKERS.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Default)]
struct BrokerQueues {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    // Bumped on every disconnect so blocked gets wake up.
    generation: u64,
}

/// An in-process message broker
pub struct LocalBroker {
    name: String,
    state: Mutex<BrokerQueues>,
    ready: Condvar,
    connections: Mutex<Vec<Weak<LocalConnection>>>,
    running: AtomicBool,
}

impl LocalBroker {
    /// Starts a broker under a name, or returns the one already running
    pub fn start(name: impl Into<String>) -> Arc<LocalBroker> {
        let name = name.into();
        let mut registry = lock(brokers());
        let broker = registry.entry(name.clone()).or_insert_with(|| {
            tracing::info!(broker = %name, "starting local broker");
            Arc::new(LocalBroker {
                name: name.clone(),
                state: Mutex::new(BrokerQueues::default()),
                ready: Condvar::new(),
                connections: Mutex::new(Vec::new()),
                running: AtomicBool::new(true),
            })
        });
        Arc::clone(broker)
    }

    /// Finds a running broker
    pub fn lookup(name: &str) -> Option<Arc<LocalBroker>> {
        lock(brokers()).get(name).cloned()
    }

    /// Opens a connection to a running broker
    pub fn connect(name: &str) -> Result<Arc<LocalConnection>, CommError> {
        let broker = Self::lookup(name)
            .ok_or_else(|| CommError::config(format!("broker {} not running", name)))?;
        let connection = Arc::new(LocalConnection {
            broker: Arc::clone(&broker),
            open: AtomicBool::new(true),
            callbacks: Mutex::new(Vec::new()),
        });
        let mut connections = lock(&broker.connections);
        connections.retain(|weak| weak.strong_count() > 0);
        connections.push(Arc::downgrade(&connection));
        tracing::debug!(broker = %name, "connection opened");
        Ok(connection)
    }

    /// Broker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames waiting in a queue
    pub fn queue_len(&self, exchange: &str, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(&queue_key(exchange, queue))
            .map_or(0, VecDeque::len)
    }

    /// Drops every live connection as if the network failed
    ///
    /// Disconnect callbacks see the given reply code and text. Queued frames
    /// are kept, so clients that reconnect find them.
    pub fn close_connection(&self, reply_code: u16, reply_text: &str) {
        let connections: Vec<_> = lock(&self.connections)
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        tracing::warn!(
            broker = %self.name,
            reply_code,
            reply_text,
            connections = connections.len(),
            "closing broker connections"
        );
        for connection in connections {
            connection.drop_connection(reply_code, reply_text);
        }
    }

    /// Stops the broker; later connection attempts fail
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut registry = lock(brokers());
            if registry
                .get(&self.name)
                .is_some_and(|registered| std::ptr::eq(registered.as_ref(), self))
            {
                registry.remove(&self.name);
            }
        }
        self.close_connection(REPLY_SHUTDOWN, "broker shutdown");
    }

    /// Checks if the broker accepts connections
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn notify(&self) {
        lock(&self.state).generation += 1;
        self.ready.notify_all();
    }
}

fn queue_key(exchange: &str, queue: &str) -> String {
    format!("{}/{}", exchange, queue)
}

/// A client connection to a [`LocalBroker`]
pub struct LocalConnection {
    broker: Arc<LocalBroker>,
    open: AtomicBool,
    callbacks: Mutex<Vec<DisconnectCallback>>,
}

impl LocalConnection {
    fn drop_connection(&self, reply_code: u16, reply_text: &str) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.broker.notify();
        for callback in lock(&self.callbacks).iter() {
            callback(reply_code, reply_text);
        }
    }

    fn check_open(&self) -> Result<(), CommError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CommError::Disconnected(format!(
                "connection to broker {} is closed",
                self.broker.name
            )))
        }
    }
}

impl BrokerClient for LocalConnection {
    fn publish(&self, exchange: &str, queue: &str, frame: Vec<u8>) -> Result<(), CommError> {
        self.check_open()?;
        lock(&self.broker.state)
            .queues
            .entry(queue_key(exchange, queue))
            .or_default()
            .push_back(frame);
        self.broker.ready.notify_all();
        Ok(())
    }

    fn get(
        &self,
        exchange: &str,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, CommError> {
        self.check_open()?;
        let key = queue_key(exchange, queue);
        let guard = lock(&self.broker.state);
        let generation = guard.generation;
        let (mut guard, _) = wait_until(&self.broker.ready, guard, timeout, |state| {
            state.generation != generation
                || state.queues.get(&key).is_some_and(|q| !q.is_empty())
        });
        let frame = guard.queues.get_mut(&key).and_then(VecDeque::pop_front);
        drop(guard);
        if frame.is_none() {
            self.check_open()?;
        }
        Ok(frame)
    }

    fn pending(&self, exchange: &str, queue: &str) -> usize {
        self.broker.queue_len(exchange, queue)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::debug!(broker = %self.broker.name, "connection closed");
            self.broker.notify();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.broker.is_running()
    }

    fn on_disconnect(&self, callback: DisconnectCallback) {
        lock(&self.callbacks).push(callback);
    }
}

/// Connects to a broker by name
///
/// An unknown broker name is a configuration error.
pub fn connect(broker: &str) -> Result<Arc<dyn BrokerClient>, CommError> {
    let connection: Arc<dyn BrokerClient> = LocalBroker::connect(broker)?;
    Ok(connection)
}

/// Longest sleep between abort checks while waiting to reconnect
const ABORT_SLICE: Duration = Duration::from_millis(10);

/// Reconnects with a doubling delay until the policy's timeout passes
///
/// `abort` is checked between attempts; returning true gives up early.
pub(crate) fn reconnect(
    broker: &str,
    policy: &ReconnectConfig,
    abort: &dyn Fn() -> bool,
) -> Result<Arc<dyn BrokerClient>, CommError> {
    let lost_since = Instant::now();
    match reconnect_until(broker, policy, lost_since, lost_since + policy.timeout(), abort)? {
        Some(connection) => Ok(connection),
        None => Err(CommError::Closed(format!("reconnect to broker {} aborted", broker))),
    }
}

/// Reconnects until `until`, the policy deadline, or `abort`
///
/// The policy deadline counts from `lost_since`, so a reconnect spread
/// over several bounded calls still gives up on schedule. Returns
/// `Ok(None)` if `until` passed or `abort` fired first, and a
/// [`CommError::Disconnected`] once the policy deadline has passed.
pub(crate) fn reconnect_until(
    broker: &str,
    policy: &ReconnectConfig,
    lost_since: Instant,
    until: Instant,
    abort: &dyn Fn() -> bool,
) -> Result<Option<Arc<dyn BrokerClient>>, CommError> {
    let deadline = lost_since + policy.timeout();
    let mut delay = policy.initial_delay();
    loop {
        if abort() {
            return Ok(None);
        }
        match connect(broker) {
            Ok(connection) => return Ok(Some(connection)),
            Err(err) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CommError::Disconnected(format!(
                        "could not reconnect to broker {} within {} ms: {}",
                        broker, policy.timeout_ms, err
                    )));
                }
                if now >= until {
                    return Ok(None);
                }
                tracing::debug!(broker, delay_ms = delay.as_millis() as u64, "reconnect attempt failed");
                let wake = now + delay.min(deadline - now).min(until - now);
                while !abort() {
                    let now = Instant::now();
                    if now >= wake {
                        break;
                    }
                    thread::sleep(ABORT_SLICE.min(wake - now));
                }
                delay = (delay * 2).min(policy.max_delay());
            }
        }
    }
}

/// Resolves the queue a broker comm uses
pub(crate) fn queue_name(address: &CommAddress, options: &BrokerOptions) -> String {
    options
        .queue
        .clone()
        .unwrap_or_else(|| address.as_str().to_string())
}

/// Synchronous broker transport
///
/// Publishes and gets on the caller's thread. A dropped connection is
/// re-established in place before the operation is retried once. Waiting to
/// reconnect stops as soon as the owning comm is closed, and a receive only
/// spends its own timeout on it.
pub(crate) struct BrokerTransport {
    options: BrokerOptions,
    queue: String,
    connection: Option<Arc<dyn BrokerClient>>,
    lost_since: Option<Instant>,
    times_connected: u64,
    open: Arc<AtomicBool>,
}

impl BrokerTransport {
    pub(crate) fn open(
        address: &CommAddress,
        options: BrokerOptions,
        open: Arc<AtomicBool>,
    ) -> Result<Self, CommError> {
        let connection = connect(&options.broker)?;
        Ok(Self {
            queue: queue_name(address, &options),
            options,
            connection: Some(connection),
            lost_since: None,
            times_connected: 1,
            open,
        })
    }

    pub(crate) fn times_connected(&self) -> u64 {
        self.times_connected
    }

    /// Live connection, reconnecting until `until` if it was lost
    fn connection(&mut self, until: Instant) -> Result<Option<Arc<dyn BrokerClient>>, CommError> {
        if let Some(connection) = &self.connection {
            if connection.is_open() {
                return Ok(Some(Arc::clone(connection)));
            }
        }
        if self.connection.take().is_some() {
            tracing::warn!(broker = %self.options.broker, queue = %self.queue, "broker connection lost, reconnecting");
        }
        let lost_since = *self.lost_since.get_or_insert_with(Instant::now);
        let open = Arc::clone(&self.open);
        let abort = move || !open.load(Ordering::SeqCst);
        // Stays failed past the policy deadline until a connect succeeds
        let reconnected = reconnect_until(
            &self.options.broker,
            &self.options.reconnect,
            lost_since,
            until,
            &abort,
        );
        let connection = match reconnected? {
            Some(connection) => connection,
            None => return Ok(None),
        };
        self.lost_since = None;
        self.times_connected += 1;
        tracing::info!(broker = %self.options.broker, times_connected = self.times_connected, "reconnected");
        self.connection = Some(Arc::clone(&connection));
        Ok(Some(connection))
    }

    fn with_retry<T>(
        &mut self,
        until: Instant,
        op: impl Fn(&dyn BrokerClient, &str, &str) -> Result<T, CommError>,
    ) -> Result<Option<T>, CommError> {
        let connection = match self.connection(until)? {
            Some(connection) => connection,
            None => return Ok(None),
        };
        match op(connection.as_ref(), &self.options.exchange, &self.queue) {
            Err(CommError::Disconnected(_)) => match self.connection(until)? {
                Some(connection) => op(connection.as_ref(), &self.options.exchange, &self.queue).map(Some),
                None => Ok(None),
            },
            other => other.map(Some),
        }
    }
}

impl Transport for BrokerTransport {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), CommError> {
        let until = Instant::now() + self.options.reconnect.timeout();
        let sent = self.with_retry(until, |client, exchange, queue| {
            client.publish(exchange, queue, frame.clone())
        })?;
        sent.ok_or_else(|| CommError::Closed(format!("broker queue {}", self.queue)))
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CommError> {
        let until = Instant::now() + timeout;
        let received = self.with_retry(until, |client, exchange, queue| {
            client.get(exchange, queue, timeout)
        })?;
        Ok(received.flatten())
    }

    fn pending(&self) -> usize {
        self.connection
            .as_ref()
            .map_or(0, |c| c.pending(&self.options.exchange, &self.queue))
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}
