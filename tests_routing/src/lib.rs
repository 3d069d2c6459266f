//! Routing Test Utilities
//!
//! Shared helpers for the end-to-end tests that wire models, drivers and
//! comms together.
//!
//! ## Test Philosophy
//!
//! - **Replies find their caller**: Every response reaches the client that
//!   sent the request, however many clients share a server
//! - **One EOF per stream**: Downstream sees exactly one EOF, after the last
//!   sender is done
//! - **Shutdown never hangs**: Close and terminate are idempotent and work
//!   from any thread

use comm::{BackendOptions, BrokerOptions, ClientComm, Comm, CommConfig, LocalBroker};
use core_types::{short_token, CommAddress};
use drivers::{ClientRequestDriver, DriverConfig, ServerRequestDriver};
use ipc::Direction;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default wait used by every blocking call in the tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Driver configuration with a short retry window
pub fn quick_config() -> DriverConfig {
    DriverConfig {
        timeout_ms: 1_000,
        sleeptime_ms: 5,
    }
}

/// Starts a broker with a name no other test uses
pub fn start_local_broker(prefix: &str) -> Arc<LocalBroker> {
    LocalBroker::start(format!("{}-{}", prefix, short_token()))
}

/// Broker options pointing at `broker`
pub fn broker_options(broker: &LocalBroker) -> BrokerOptions {
    BrokerOptions::new(broker.name())
}

/// Polls `check` until it holds or [`WAIT`] passes
pub fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// A server request driver and the comm its model reads requests from
pub struct ServerSide {
    pub driver: ServerRequestDriver,
    pub requests: Comm,
}

/// Starts a server request driver on `options` and attaches a model
pub fn start_server(name: &str, options: BackendOptions) -> ServerSide {
    let driver = ServerRequestDriver::new(name, options, None, quick_config())
        .expect("server driver");
    let requests = Comm::new(
        CommConfig::buffer(name, Direction::Recv).with_address(driver.model_address().clone()),
    )
    .expect("server model comm");
    driver.start().expect("server start");
    ServerSide { driver, requests }
}

/// A client request driver and the RPC handle its model calls through
pub struct ClientSide {
    pub driver: ClientRequestDriver,
    pub rpc: ClientComm,
}

/// Starts a client request driver aimed at `server` and attaches a model
pub fn start_client(name: &str, server: &CommAddress, options: BackendOptions) -> ClientSide {
    let driver = ClientRequestDriver::new(name, server.clone(), options, quick_config())
        .expect("client driver");
    let rpc = ClientComm::new(
        CommConfig::buffer(name, Direction::Send).with_address(driver.model_address().clone()),
    )
    .expect("client model comm");
    driver.start().expect("client start");
    ClientSide { driver, rpc }
}

/// Replies to one request on behalf of a server model
///
/// The reply body is the request body with `suffix` appended.
pub fn answer_one(server: &ServerSide, suffix: &str) -> bool {
    let (ok, request) = server.requests.recv_nolimit(Some(WAIT));
    if !ok {
        return false;
    }
    let address = match request.header.response_address.clone() {
        Some(address) => address,
        None => return false,
    };
    let reply_comm = match Comm::new(
        CommConfig::buffer("server_reply", Direction::Send).with_address(address),
    ) {
        Ok(comm) => comm,
        Err(_) => return false,
    };
    let mut body = request.body;
    body.extend_from_slice(suffix.as_bytes());
    let mut reply = ipc::Message::new(body);
    reply.header.id = request.header.id;
    reply_comm.send_nolimit(&reply)
}
