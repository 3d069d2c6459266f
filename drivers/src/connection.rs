//! Connection driver
//!
//! A [`ConnectionDriver`] owns an input comm and an output comm and runs a
//! pump thread that moves messages from one to the other. What happens to
//! each message is decided by a [`MessageHandler`]; the server and client
//! drivers are handlers plugged into this same pump.

use crate::config::DriverConfig;
use crate::error::DriverError;
use comm::sync::{lock, wait_until};
use comm::{Comm, CommError};
use core_types::DriverId;
use ipc::Message;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the pump blocks on the input before rechecking for a stop
const RECV_WINDOW: Duration = Duration::from_millis(100);

/// Lifecycle of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Created,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl DriverState {
    /// Checks if the pump has exited for good
    pub fn is_finished(self) -> bool {
        matches!(self, DriverState::Stopped | DriverState::Failed)
    }
}

/// What the pump does with an EOF it received
#[derive(Debug, Clone, PartialEq)]
pub enum EofAction {
    /// Send this message downstream and stop
    Forward(Message),
    /// Drop the EOF and keep pumping
    Suppress,
}

/// Whether the pump keeps going after a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// View of the driver handed to every handler callback
pub struct DriverContext<'a> {
    inner: &'a DriverInner,
}

impl DriverContext<'_> {
    pub fn id(&self) -> DriverId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn input(&self) -> &Comm {
        &self.inner.input
    }

    pub fn output(&self) -> &Comm {
        &self.inner.output
    }

    /// Checks if a stop or terminate was requested
    pub fn is_stopping(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }
}

/// Per-message behavior of a driver
///
/// Every method has a default, so the empty implementation is a plain
/// forwarder. Callbacks run on the pump thread.
pub trait MessageHandler: Send + 'static {
    /// Runs once before the first receive
    fn on_start(&mut self, _ctx: &DriverContext<'_>) -> Result<(), DriverError> {
        Ok(())
    }

    /// Transforms a received message; `None` drops it
    fn on_message(
        &mut self,
        _ctx: &DriverContext<'_>,
        message: Message,
    ) -> Result<Option<Message>, DriverError> {
        Ok(Some(message))
    }

    /// Sends a message on the output
    ///
    /// `Ok(false)` drops the message. Comm errors are judged by the pump: a
    /// closed output ends the driver quietly, a lost broker fails it, and
    /// anything else fails it only once sends keep failing past the
    /// driver's timeout.
    fn send_message(
        &mut self,
        ctx: &DriverContext<'_>,
        message: Message,
    ) -> Result<bool, DriverError> {
        Ok(ctx.output().try_send_nolimit(&message)?)
    }

    /// Runs after every send attempt
    fn after_send(&mut self, _ctx: &DriverContext<'_>) -> Flow {
        Flow::Continue
    }

    /// Decides what to do with an EOF from the input
    fn on_eof(
        &mut self,
        _ctx: &DriverContext<'_>,
        _eof: &Message,
    ) -> Result<EofAction, DriverError> {
        Ok(EofAction::Forward(Message::eof()))
    }

    /// Runs once when the driver is done, whatever the reason
    fn on_terminate(&mut self) {}
}

/// Handler that forwards everything unchanged
#[derive(Debug, Default)]
pub struct Passthrough;

impl MessageHandler for Passthrough {}

struct DriverInner {
    id: DriverId,
    name: String,
    input: Comm,
    output: Comm,
    config: DriverConfig,
    env: BTreeMap<String, String>,
    state: Mutex<DriverState>,
    state_changed: Condvar,
    stop_requested: AtomicBool,
    handler: Mutex<Option<Box<dyn MessageHandler>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    pump_thread: OnceLock<ThreadId>,
    error: Mutex<Option<DriverError>>,
}

impl DriverInner {
    fn set_state(&self, state: DriverState) {
        *lock(&self.state) = state;
        self.state_changed.notify_all();
    }

    fn close_comms(&self) {
        self.input.close();
        self.output.close();
    }

    fn pump(&self, mut handler: Box<dyn MessageHandler>) {
        let _ = self.pump_thread.set(thread::current().id());
        let ctx = DriverContext { inner: self };
        let result = self.run(&ctx, handler.as_mut());
        handler.on_terminate();
        self.close_comms();

        match result {
            Ok(()) => {
                info!(driver = %self.name, "driver stopped");
                self.set_state(DriverState::Stopped);
            }
            Err(err) => {
                error!(driver = %self.name, error = %err, "driver failed");
                *lock(&self.error) = Some(err);
                self.set_state(DriverState::Failed);
            }
        }
    }

    fn run(
        &self,
        ctx: &DriverContext<'_>,
        handler: &mut dyn MessageHandler,
    ) -> Result<(), DriverError> {
        handler.on_start(ctx)?;
        let mut failing_since: Option<Instant> = None;
        let mut send_failing_since: Option<Instant> = None;

        loop {
            if ctx.is_stopping() {
                debug!(driver = %self.name, "stop requested");
                return Ok(());
            }

            let message = match self.input.try_recv_nolimit(Some(RECV_WINDOW)) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    failing_since = None;
                    continue;
                }
                Err(CommError::Closed(_)) => {
                    debug!(driver = %self.name, "input closed");
                    return Ok(());
                }
                Err(err @ CommError::Disconnected(_)) => return Err(err.into()),
                Err(err) => {
                    let since = *failing_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.config.timeout() {
                        return Err(DriverError::Timeout(self.config.timeout_ms));
                    }
                    debug!(driver = %self.name, error = %err, "receive failed, retrying");
                    thread::sleep(self.config.sleeptime());
                    continue;
                }
            };
            failing_since = None;

            if message.is_eof() {
                match handler.on_eof(ctx, &message)? {
                    EofAction::Forward(eof) => {
                        debug!(driver = %self.name, "forwarding EOF");
                        self.output.send_nolimit(&eof);
                        return Ok(());
                    }
                    EofAction::Suppress => {
                        debug!(driver = %self.name, "EOF absorbed");
                        continue;
                    }
                }
            }

            let message = match handler.on_message(ctx, message)? {
                Some(message) => message,
                None => continue,
            };
            let sent = handler.send_message(ctx, message);
            if self.judge_send(ctx, sent, &mut send_failing_since)? == Flow::Stop {
                return Ok(());
            }
            if handler.after_send(ctx) == Flow::Stop {
                return Ok(());
            }
        }
    }

    /// Decides whether the pump survives the outcome of one send
    fn judge_send(
        &self,
        ctx: &DriverContext<'_>,
        sent: Result<bool, DriverError>,
        failing_since: &mut Option<Instant>,
    ) -> Result<Flow, DriverError> {
        let err = match sent {
            Ok(true) => {
                *failing_since = None;
                return Ok(Flow::Continue);
            }
            Ok(false) => {
                if self.output.is_closed() || ctx.is_stopping() {
                    debug!(driver = %self.name, "output closed, message dropped");
                    return Ok(Flow::Stop);
                }
                warn!(driver = %self.name, "send refused, message dropped");
                return Ok(Flow::Continue);
            }
            Err(DriverError::Comm(err)) => err,
            Err(err) => return Err(err),
        };

        match err {
            CommError::Closed(_) => {
                debug!(driver = %self.name, error = %err, "output closed, message dropped");
                Ok(Flow::Stop)
            }
            _ if ctx.is_stopping() => Ok(Flow::Stop),
            CommError::Disconnected(_) | CommError::Config(_) => Err(err.into()),
            _ => {
                let since = *failing_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.config.timeout() {
                    return Err(DriverError::Timeout(self.config.timeout_ms));
                }
                warn!(driver = %self.name, error = %err, "send failed, message dropped");
                Ok(Flow::Continue)
            }
        }
    }
}

/// Builder for a [`ConnectionDriver`]
pub struct DriverBuilder {
    name: String,
    input: Comm,
    output: Comm,
    config: DriverConfig,
    env: BTreeMap<String, String>,
    handler: Box<dyn MessageHandler>,
}

impl DriverBuilder {
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds an entry to the environment handed to the model process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn build(self) -> ConnectionDriver {
        ConnectionDriver {
            inner: Arc::new(DriverInner {
                id: DriverId::new(),
                name: self.name,
                input: self.input,
                output: self.output,
                config: self.config,
                env: self.env,
                state: Mutex::new(DriverState::Created),
                state_changed: Condvar::new(),
                stop_requested: AtomicBool::new(false),
                handler: Mutex::new(Some(self.handler)),
                thread: Mutex::new(None),
                pump_thread: OnceLock::new(),
                error: Mutex::new(None),
            }),
        }
    }
}

/// Pump moving messages from an input comm to an output comm
///
/// Clones share the same driver, so a handler may hold one and terminate
/// the driver from inside a callback.
#[derive(Clone)]
pub struct ConnectionDriver {
    inner: Arc<DriverInner>,
}

impl ConnectionDriver {
    /// Starts building a driver around two opened comms
    pub fn builder(name: impl Into<String>, input: Comm, output: Comm) -> DriverBuilder {
        DriverBuilder {
            name: name.into(),
            input,
            output,
            config: DriverConfig::default(),
            env: BTreeMap::new(),
            handler: Box::new(Passthrough),
        }
    }

    /// Creates a plain forwarding driver
    pub fn new(name: impl Into<String>, input: Comm, output: Comm) -> Self {
        Self::builder(name, input, output).build()
    }

    pub fn id(&self) -> DriverId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn input(&self) -> &Comm {
        &self.inner.input
    }

    pub fn output(&self) -> &Comm {
        &self.inner.output
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Environment entries the model process needs to find its comms
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.inner.env
    }

    pub fn state(&self) -> DriverState {
        *lock(&self.inner.state)
    }

    /// Checks if the pump thread is alive
    pub fn is_running(&self) -> bool {
        matches!(self.state(), DriverState::Running | DriverState::Stopping)
    }

    /// The error that stopped the driver, if it failed
    pub fn error(&self) -> Option<DriverError> {
        lock(&self.inner.error).clone()
    }

    /// Spawns the pump thread
    ///
    /// Starting a driver that is not freshly created does nothing.
    pub fn start(&self) -> Result<(), DriverError> {
        let mut thread_slot = lock(&self.inner.thread);
        {
            let mut state = lock(&self.inner.state);
            if *state != DriverState::Created {
                return Ok(());
            }
            *state = DriverState::Running;
        }
        let handler = match lock(&self.inner.handler).take() {
            Some(handler) => handler,
            None => {
                self.inner.set_state(DriverState::Failed);
                return Err(DriverError::Config(format!(
                    "driver {} has no handler",
                    self.inner.name
                )));
            }
        };

        let runner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("driver-{}", self.inner.name))
            .spawn(move || runner.pump(handler));
        match spawned {
            Ok(handle) => {
                *thread_slot = Some(handle);
                info!(driver = %self.inner.name, id = %self.inner.id, "driver started");
                Ok(())
            }
            Err(err) => {
                self.inner.close_comms();
                self.inner.set_state(DriverState::Failed);
                Err(DriverError::Config(format!(
                    "cannot spawn pump for {}: {}",
                    self.inner.name, err
                )))
            }
        }
    }

    /// Asks the pump to exit after the message in flight
    ///
    /// Closes the input so a blocked receive wakes up. The output is left
    /// open for whatever the pump still has to send.
    pub fn stop(&self) {
        if self.inner.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let previous = {
            let mut state = lock(&self.inner.state);
            let previous = *state;
            match previous {
                DriverState::Created => *state = DriverState::Stopped,
                DriverState::Running => *state = DriverState::Stopping,
                _ => {}
            }
            previous
        };
        self.inner.state_changed.notify_all();

        if previous == DriverState::Created {
            if let Some(mut handler) = lock(&self.inner.handler).take() {
                handler.on_terminate();
            }
            self.inner.close_comms();
            debug!(driver = %self.inner.name, "driver stopped before start");
        } else {
            self.inner.input.close();
        }
    }

    /// Stops the driver, closes both comms and waits for the pump
    ///
    /// Safe to call more than once and from inside a handler callback, in
    /// which case the pump is not joined.
    pub fn terminate(&self) {
        self.stop();
        self.inner.close_comms();
        if self.inner.pump_thread.get() == Some(&thread::current().id()) {
            return;
        }
        let handle = lock(&self.inner.thread).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(driver = %self.inner.name, "pump thread panicked");
                self.inner.set_state(DriverState::Failed);
            }
        }
    }

    /// Waits for the pump to exit; returns whether it did in time
    pub fn wait(&self, timeout: Duration) -> bool {
        let state = lock(&self.inner.state);
        let (_state, finished) = wait_until(&self.inner.state_changed, state, timeout, |state| {
            state.is_finished()
        });
        finished
    }
}

impl fmt::Debug for ConnectionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("input", &self.inner.input.address())
            .field("output", &self.inner.output.address())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comm::CommConfig;
    use ipc::Direction;

    const WAIT: Duration = Duration::from_secs(2);

    fn pipe(name: &str) -> (Comm, Comm) {
        let tx = Comm::new(CommConfig::buffer(name, Direction::Send)).unwrap();
        let rx = Comm::new(tx.opp_config()).unwrap();
        (tx, rx)
    }

    /// Upstream sender, driver, downstream receiver
    fn forwarding(handler: impl MessageHandler) -> (Comm, ConnectionDriver, Comm) {
        let (upstream, input) = pipe("upstream");
        let (output, downstream) = pipe("downstream");
        let driver = ConnectionDriver::builder("relay", input, output)
            .with_handler(handler)
            .build();
        (upstream, driver, downstream)
    }

    #[test]
    fn test_forwards_in_order_then_eof() {
        let (upstream, driver, downstream) = forwarding(Passthrough);
        driver.start().unwrap();
        assert!(upstream.send(&Message::new("one")));
        assert!(upstream.send(&Message::new("two")));
        assert!(!upstream.send_eof());

        assert_eq!(downstream.recv(Some(WAIT)).1.body, b"one");
        assert_eq!(downstream.recv(Some(WAIT)).1.body, b"two");
        let (ok, eof) = downstream.recv(Some(WAIT));
        assert!(!ok && eof.is_eof());
        assert!(driver.wait(WAIT));
        assert_eq!(driver.state(), DriverState::Stopped);
    }

    struct Upper;

    impl MessageHandler for Upper {
        fn on_message(
            &mut self,
            _ctx: &DriverContext<'_>,
            mut message: Message,
        ) -> Result<Option<Message>, DriverError> {
            if message.body == b"skip" {
                return Ok(None);
            }
            message.body.make_ascii_uppercase();
            Ok(Some(message))
        }
    }

    #[test]
    fn test_handler_transforms_and_drops() {
        let (upstream, driver, downstream) = forwarding(Upper);
        driver.start().unwrap();
        upstream.send(&Message::new("skip"));
        upstream.send(&Message::new("loud"));
        assert_eq!(downstream.recv(Some(WAIT)).1.body, b"LOUD");
        driver.terminate();
    }

    #[test]
    fn test_stop_before_start() {
        let (_upstream, driver, _downstream) = forwarding(Passthrough);
        driver.stop();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(driver.input().is_closed());
        driver.start().unwrap();
        assert_eq!(driver.state(), DriverState::Stopped);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let (_upstream, driver, _downstream) = forwarding(Passthrough);
        driver.start().unwrap();
        driver.terminate();
        driver.terminate();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(driver.input().is_closed());
        assert!(driver.output().is_closed());
    }

    struct SelfTerminating {
        driver: Arc<Mutex<Option<ConnectionDriver>>>,
    }

    impl MessageHandler for SelfTerminating {
        fn on_message(
            &mut self,
            _ctx: &DriverContext<'_>,
            message: Message,
        ) -> Result<Option<Message>, DriverError> {
            if let Some(driver) = lock(&self.driver).as_ref() {
                driver.terminate();
            }
            Ok(Some(message))
        }
    }

    #[test]
    fn test_terminate_from_callback() {
        let slot = Arc::new(Mutex::new(None));
        let (upstream, driver, _downstream) = forwarding(SelfTerminating {
            driver: Arc::clone(&slot),
        });
        *lock(&slot) = Some(driver.clone());
        driver.start().unwrap();
        upstream.send(&Message::new("bye"));
        assert!(driver.wait(WAIT));
        assert_eq!(driver.state(), DriverState::Stopped);
        *lock(&slot) = None;
    }

    struct Failing;

    impl MessageHandler for Failing {
        fn on_message(
            &mut self,
            _ctx: &DriverContext<'_>,
            _message: Message,
        ) -> Result<Option<Message>, DriverError> {
            Err(DriverError::Protocol("unexpected message".into()))
        }
    }

    #[test]
    fn test_handler_error_fails_driver() {
        let (upstream, driver, _downstream) = forwarding(Failing);
        driver.start().unwrap();
        upstream.send(&Message::new("boom"));
        assert!(driver.wait(WAIT));
        assert_eq!(driver.state(), DriverState::Failed);
        assert!(matches!(driver.error(), Some(DriverError::Protocol(_))));
        assert!(driver.output().is_closed());
    }

    /// Output whose every send fails with the given error
    struct BrokenOutput(CommError);

    impl MessageHandler for BrokenOutput {
        fn send_message(
            &mut self,
            _ctx: &DriverContext<'_>,
            _message: Message,
        ) -> Result<bool, DriverError> {
            Err(self.0.clone().into())
        }
    }

    #[test]
    fn test_repeated_send_failure_times_out() {
        let (upstream, input) = pipe("flaky_in");
        let (output, _downstream) = pipe("flaky_out");
        let driver = ConnectionDriver::builder("flaky", input, output)
            .with_config(DriverConfig::default().with_timeout_ms(50))
            .with_handler(BrokenOutput(CommError::Transport("disk full".into())))
            .build();
        driver.start().unwrap();

        upstream.send(&Message::new("first"));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(driver.state(), DriverState::Running);

        let started = Instant::now();
        while !driver.state().is_finished() && started.elapsed() < WAIT {
            upstream.send(&Message::new("again"));
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(driver.state(), DriverState::Failed);
        assert_eq!(driver.error(), Some(DriverError::Timeout(50)));
    }

    #[test]
    fn test_lost_broker_on_send_fails_at_once() {
        let lost = CommError::Disconnected("broker gone".into());
        let (upstream, driver, _downstream) = forwarding(BrokenOutput(lost.clone()));
        driver.start().unwrap();
        upstream.send(&Message::new("orphan"));

        assert!(driver.wait(WAIT));
        assert_eq!(driver.state(), DriverState::Failed);
        assert_eq!(driver.error(), Some(DriverError::Comm(lost)));
    }

    #[test]
    fn test_closed_peer_stops_quietly() {
        let (upstream, driver, _downstream) =
            forwarding(BrokenOutput(CommError::Closed("downstream".into())));
        driver.start().unwrap();
        upstream.send(&Message::new("late"));

        assert!(driver.wait(WAIT));
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(driver.error(), None);
    }

    #[test]
    fn test_env_and_debug() {
        let (input, _) = pipe("a");
        let (output, _) = pipe("b");
        let driver = ConnectionDriver::builder("envy", input, output)
            .with_env("model", "abc")
            .build();
        assert_eq!(driver.env().get("model").map(String::as_str), Some("abc"));
        assert!(format!("{:?}", driver).contains("envy"));
    }
}
