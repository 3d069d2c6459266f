//! Asynchronous broker transport
//!
//! A background connection thread owns the broker connection. Sends go to
//! an outbox the thread publishes from; receives read an inbox the thread
//! fills. When the connection drops unexpectedly the thread reconnects with
//! backoff, counting every successful connection in `times_connected`.
//! Failing to reconnect within the policy timeout is fatal for the comm.

use crate::broker::{connect, queue_name, reconnect, BrokerClient};
use crate::config::{BrokerOptions, ReconnectConfig};
use crate::error::CommError;
use crate::sync::{lock, wait_until};
use crate::transport::Transport;
use core_types::CommAddress;
use ipc::Direction;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const IDLE_WAIT: Duration = Duration::from_millis(10);

struct ConnectionState {
    connection: Option<Arc<dyn BrokerClient>>,
    outbox: VecDeque<Vec<u8>>,
    inbox: VecDeque<Vec<u8>>,
    times_connected: u64,
    closing: bool,
    fatal: Option<CommError>,
}

struct Shared {
    name: String,
    broker: String,
    exchange: String,
    queue: String,
    direction: Direction,
    reconnect: ReconnectConfig,
    state: Mutex<ConnectionState>,
    changed: Condvar,
}

impl Shared {
    fn watch(self: &Arc<Self>, connection: &Arc<dyn BrokerClient>) {
        let weak = Arc::downgrade(self);
        connection.on_disconnect(Box::new(move |reply_code, reply_text| {
            if let Some(shared) = weak.upgrade() {
                tracing::warn!(
                    comm = %shared.name,
                    reply_code,
                    reply_text,
                    "broker connection closed unexpectedly"
                );
                shared.changed.notify_all();
            }
        }));
    }

    fn should_give_up(&self) -> bool {
        let state = lock(&self.state);
        state.closing && (state.outbox.is_empty() || self.direction.is_recv())
    }

    fn run(self: Arc<Self>) {
        loop {
            let mut state = lock(&self.state);
            if state.fatal.is_some() {
                break;
            }

            let connection = match state.connection.clone().filter(|c| c.is_open()) {
                Some(connection) => connection,
                None => {
                    state.connection = None;
                    drop(state);
                    if self.should_give_up() {
                        break;
                    }
                    if !self.restore_connection() {
                        break;
                    }
                    continue;
                }
            };

            if let Some(frame) = state.outbox.pop_front() {
                drop(state);
                if let Err(err) = connection.publish(&self.exchange, &self.queue, frame.clone()) {
                    tracing::debug!(comm = %self.name, error = %err, "publish failed, will retry");
                    lock(&self.state).outbox.push_front(frame);
                }
                self.changed.notify_all();
                continue;
            }

            if state.closing {
                drop(state);
                connection.close();
                break;
            }

            if self.direction.is_recv() {
                drop(state);
                match connection.get(&self.exchange, &self.queue, IDLE_WAIT) {
                    Ok(Some(frame)) => {
                        lock(&self.state).inbox.push_back(frame);
                        self.changed.notify_all();
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(comm = %self.name, error = %err, "get failed");
                    }
                }
            } else {
                let _ = wait_until(&self.changed, state, IDLE_WAIT, |s| {
                    !s.outbox.is_empty() || s.closing
                });
            }
        }
        tracing::debug!(comm = %self.name, "connection thread exiting");
    }

    /// Returns false once the comm has a fatal error
    fn restore_connection(self: &Arc<Self>) -> bool {
        tracing::warn!(comm = %self.name, broker = %self.broker, "reconnecting to broker");
        match reconnect(&self.broker, &self.reconnect, &|| self.should_give_up()) {
            Ok(connection) => {
                self.watch(&connection);
                let mut state = lock(&self.state);
                state.connection = Some(connection);
                state.times_connected += 1;
                tracing::info!(
                    comm = %self.name,
                    times_connected = state.times_connected,
                    "reconnected to broker"
                );
                drop(state);
                self.changed.notify_all();
                true
            }
            Err(err) => {
                if self.should_give_up() {
                    return false;
                }
                tracing::error!(comm = %self.name, error = %err, "broker connection lost");
                lock(&self.state).fatal = Some(err);
                self.changed.notify_all();
                false
            }
        }
    }
}

pub(crate) struct AsyncBrokerTransport {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncBrokerTransport {
    pub(crate) fn open(
        name: &str,
        address: &CommAddress,
        direction: Direction,
        options: BrokerOptions,
    ) -> Result<Self, CommError> {
        let connection = connect(&options.broker)?;
        let shared = Arc::new(Shared {
            name: name.to_string(),
            queue: queue_name(address, &options),
            broker: options.broker,
            exchange: options.exchange,
            direction,
            reconnect: options.reconnect,
            state: Mutex::new(ConnectionState {
                connection: Some(Arc::clone(&connection)),
                outbox: VecDeque::new(),
                inbox: VecDeque::new(),
                times_connected: 1,
                closing: false,
                fatal: None,
            }),
            changed: Condvar::new(),
        });
        shared.watch(&connection);

        let runner = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("broker-{}", name))
            .spawn(move || runner.run())
            .map_err(|err| CommError::io("spawning connection thread", err))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub(crate) fn times_connected(&self) -> u64 {
        lock(&self.shared.state).times_connected
    }
}

impl Transport for AsyncBrokerTransport {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), CommError> {
        let mut state = lock(&self.shared.state);
        if let Some(fatal) = &state.fatal {
            return Err(fatal.clone());
        }
        if state.closing {
            return Err(CommError::Closed(self.shared.name.clone()));
        }
        state.outbox.push_back(frame);
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CommError> {
        let state = lock(&self.shared.state);
        let (mut state, _) = wait_until(&self.shared.changed, state, timeout, |s| {
            !s.inbox.is_empty() || s.fatal.is_some()
        });
        if let Some(frame) = state.inbox.pop_front() {
            return Ok(Some(frame));
        }
        match &state.fatal {
            Some(fatal) => Err(fatal.clone()),
            None => Ok(None),
        }
    }

    fn pending(&self) -> usize {
        let state = lock(&self.shared.state);
        match self.shared.direction {
            Direction::Send => state.outbox.len(),
            Direction::Recv => state.inbox.len(),
        }
    }

    fn close(&mut self) {
        lock(&self.shared.state).closing = true;
        self.shared.changed.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(comm = %self.shared.name, "connection thread panicked");
            }
        }
    }
}
