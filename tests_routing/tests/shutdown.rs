//! Shutdown Tests
//!
//! Close and terminate must be idempotent, must wake anything blocked on a
//! comm, and must work from inside a driver's own callbacks.

use comm::sync::lock;
use comm::{BackendOptions, Comm, CommConfig};
use drivers::{
    ConnectionDriver, DriverContext, DriverError, DriverState, MessageHandler, ServerRequestDriver,
};
use ipc::{Direction, Message};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tests_routing::{quick_config, start_client, start_server, wait_for, WAIT};

#[test]
fn test_close_is_idempotent_and_wakes_receiver() {
    let receiver = Arc::new(Comm::new(CommConfig::buffer("sleepy", Direction::Recv)).unwrap());
    let blocked = Arc::clone(&receiver);
    let waiter = thread::spawn(move || {
        let started = Instant::now();
        let (ok, message) = blocked.recv(Some(Duration::from_secs(30)));
        (ok, message, started.elapsed())
    });

    thread::sleep(Duration::from_millis(50));
    receiver.close();
    receiver.close();

    let (ok, message, elapsed) = waiter.join().unwrap();
    assert!(!ok);
    assert!(!message.is_eof());
    assert!(elapsed < Duration::from_secs(5));
    assert!(receiver.is_closed());
}

#[test]
fn test_terminate_twice_on_every_driver() {
    let server = start_server("twice", BackendOptions::Buffer);
    let client = start_client("twice", server.driver.request_address(), BackendOptions::Buffer);
    assert!(wait_for(|| server.driver.nclients() == 1));

    client.driver.terminate();
    client.driver.terminate();
    server.driver.terminate();
    server.driver.terminate();

    assert!(client.driver.state().is_finished());
    assert!(server.driver.state().is_finished());
}

#[test]
fn test_terminate_before_start() {
    let server =
        ServerRequestDriver::new("never", BackendOptions::Buffer, None, quick_config()).unwrap();
    server.terminate();
    assert_eq!(server.state(), DriverState::Stopped);
    server.start().unwrap();
    assert_eq!(server.state(), DriverState::Stopped);
}

#[test]
fn test_terminate_with_outstanding_reply() {
    let server = start_server("pending", BackendOptions::Buffer);
    let client = start_client("pending", server.driver.request_address(), BackendOptions::Buffer);

    // Request reaches the server model, which never answers
    let caller = thread::spawn(move || {
        let result = client.rpc.call(Message::new("unanswered"), Some(Duration::from_millis(500)));
        (client, result)
    });
    let (ok, request) = server.requests.recv(Some(WAIT));
    assert!(ok);
    assert_eq!(request.body, b"unanswered");
    assert_eq!(server.driver.n_response_drivers(), 1);

    server.driver.terminate();
    assert_eq!(server.driver.n_response_drivers(), 0);

    let (client, result) = caller.join().unwrap();
    let (ok, _) = result.unwrap();
    assert!(!ok);
    client.driver.terminate();
    assert_eq!(client.driver.n_response_drivers(), 0);
}

struct StopOnCommand {
    driver: Arc<Mutex<Option<ConnectionDriver>>>,
}

impl MessageHandler for StopOnCommand {
    fn on_message(
        &mut self,
        _ctx: &DriverContext<'_>,
        message: Message,
    ) -> Result<Option<Message>, DriverError> {
        if message.body == b"stop" {
            if let Some(driver) = lock(&self.driver).take() {
                driver.terminate();
                driver.terminate();
            }
            return Ok(None);
        }
        Ok(Some(message))
    }
}

#[test]
fn test_terminate_from_inside_callback() {
    let upstream = Comm::new(CommConfig::buffer("cmd", Direction::Send)).unwrap();
    let downstream = Comm::new(CommConfig::buffer("cmd_out", Direction::Recv)).unwrap();
    let slot = Arc::new(Mutex::new(None));
    let driver = ConnectionDriver::builder(
        "commanded",
        Comm::new(upstream.opp_config()).unwrap(),
        Comm::new(downstream.opp_config()).unwrap(),
    )
    .with_config(quick_config())
    .with_handler(StopOnCommand {
        driver: Arc::clone(&slot),
    })
    .build();
    *lock(&slot) = Some(driver.clone());
    driver.start().unwrap();

    upstream.send(&Message::new("work"));
    upstream.send(&Message::new("stop"));
    assert_eq!(downstream.recv(Some(WAIT)).1.body, b"work");

    assert!(driver.wait(WAIT));
    assert_eq!(driver.state(), DriverState::Stopped);
    assert!(driver.input().is_closed());
    assert!(driver.output().is_closed());
    driver.terminate();
}
