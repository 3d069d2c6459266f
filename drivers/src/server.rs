//! Server-side request/response drivers
//!
//! A [`ServerRequestDriver`] sits between remote clients and a server
//! model. It counts clients as they sign on and off, and for every request
//! it spawns a one-shot [`ServerResponseDriver`] that carries the model's
//! reply back to whichever client asked.

use crate::config::DriverConfig;
use crate::connection::{
    ConnectionDriver, DriverContext, DriverState, EofAction, Flow, MessageHandler,
};
use crate::error::DriverError;
use comm::sync::lock;
use comm::{BackendOptions, Comm, CommConfig};
use core_types::{CommAddress, RequestId};
use ipc::{Direction, Message, RESPONSE_EOF};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Bookkeeping shared between the driver handle and its pump
#[derive(Debug, Default)]
struct ServerBook {
    nclients: usize,
    response_drivers: Vec<ServerResponseDriver>,
    terminated: bool,
}

struct ServerRequestHandler {
    book: Arc<Mutex<ServerBook>>,
    response_options: BackendOptions,
    config: DriverConfig,
}

impl MessageHandler for ServerRequestHandler {
    fn on_message(
        &mut self,
        ctx: &DriverContext<'_>,
        message: Message,
    ) -> Result<Option<Message>, DriverError> {
        if message.is_sign_on() {
            let nclients = {
                let mut book = lock(&self.book);
                book.nclients += 1;
                book.nclients
            };
            info!(driver = %ctx.name(), nclients, "client signed on");
            return Ok(None);
        }
        Ok(Some(message))
    }

    fn send_message(
        &mut self,
        ctx: &DriverContext<'_>,
        mut message: Message,
    ) -> Result<bool, DriverError> {
        let client_address = match message.header.response_address.clone() {
            Some(address) if address != RESPONSE_EOF => address,
            _ => return Ok(ctx.output().try_send_nolimit(&message)?),
        };

        let response = ServerResponseDriver::new(
            CommAddress::new(client_address),
            &self.response_options,
            message.header.id.clone(),
            self.config,
        )?;
        {
            let mut book = lock(&self.book);
            if book.terminated || ctx.output().is_closed() {
                debug!(driver = %ctx.name(), "shutting down, request dropped");
                return Ok(false);
            }
            book.response_drivers
                .retain(|driver| !driver.state().is_finished());
            book.response_drivers.push(response.clone());
        }
        response.start()?;

        message.header.response_address = Some(response.model_response_address().to_string());
        Ok(ctx.output().try_send_nolimit(&message)?)
    }

    fn on_eof(
        &mut self,
        ctx: &DriverContext<'_>,
        _eof: &Message,
    ) -> Result<EofAction, DriverError> {
        let mut book = lock(&self.book);
        if book.nclients == 0 {
            return Err(DriverError::Protocol(format!(
                "{} got a sign-off with no client signed on",
                ctx.name()
            )));
        }
        book.nclients -= 1;
        info!(driver = %ctx.name(), nclients = book.nclients, "client signed off");
        if book.nclients == 0 {
            Ok(EofAction::Forward(Message::sign_off()))
        } else {
            Ok(EofAction::Suppress)
        }
    }
}

/// Forwards requests from remote clients to a server model
#[derive(Debug, Clone)]
pub struct ServerRequestDriver {
    driver: ConnectionDriver,
    book: Arc<Mutex<ServerBook>>,
}

impl ServerRequestDriver {
    /// Opens the client-facing request comm and the model-facing buffer
    ///
    /// Clients reach the server at `comm_address`, or at a generated
    /// address when none is given. `options` picks the transport clients
    /// use, for requests and for replies alike. The model finds its request
    /// comm under `model_request_name` in [`env`](Self::env).
    pub fn new(
        model_request_name: &str,
        options: BackendOptions,
        comm_address: Option<CommAddress>,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let mut request_config = CommConfig::new(
            format!("{}_SERVER", model_request_name),
            options.kind(),
            Direction::Recv,
        )
        .with_options(options.clone())
        .with_close_on_eof_recv(false);
        if let Some(address) = comm_address {
            request_config = request_config.with_address(address);
        }
        let input = Comm::new(request_config)?;
        let output = Comm::new(CommConfig::buffer(model_request_name, Direction::Send))?;
        let model_address = output.address().to_string();

        let book = Arc::new(Mutex::new(ServerBook::default()));
        let driver = ConnectionDriver::builder(model_request_name, input, output)
            .with_config(config)
            .with_env(model_request_name, model_address)
            .with_handler(ServerRequestHandler {
                book: Arc::clone(&book),
                response_options: options,
                config,
            })
            .build();
        Ok(Self { driver, book })
    }

    /// Address clients send requests to
    pub fn request_address(&self) -> &CommAddress {
        self.driver.input().address()
    }

    /// Address the model receives requests on
    pub fn model_address(&self) -> &CommAddress {
        self.driver.output().address()
    }

    /// Number of clients currently signed on
    pub fn nclients(&self) -> usize {
        lock(&self.book).nclients
    }

    /// Number of response drivers still tracked
    pub fn n_response_drivers(&self) -> usize {
        lock(&self.book).response_drivers.len()
    }

    pub fn driver(&self) -> &ConnectionDriver {
        &self.driver
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        self.driver.env()
    }

    pub fn state(&self) -> DriverState {
        self.driver.state()
    }

    pub fn error(&self) -> Option<DriverError> {
        self.driver.error()
    }

    pub fn start(&self) -> Result<(), DriverError> {
        self.driver.start()
    }

    pub fn stop(&self) {
        self.driver.stop()
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        self.driver.wait(timeout)
    }

    /// Terminates every response driver, then the request pump
    pub fn terminate(&self) {
        let responses = {
            let mut book = lock(&self.book);
            book.terminated = true;
            std::mem::take(&mut book.response_drivers)
        };
        for response in responses {
            response.terminate();
        }
        self.driver.terminate();
    }
}

/// Sends one reply and stops
pub(crate) struct ReplyForwarder {
    pub(crate) request_id: Option<RequestId>,
}

impl MessageHandler for ReplyForwarder {
    fn on_message(
        &mut self,
        _ctx: &DriverContext<'_>,
        mut message: Message,
    ) -> Result<Option<Message>, DriverError> {
        if let Some(id) = self.request_id.clone() {
            message.header.id = Some(id);
        }
        message.header.response_address = None;
        Ok(Some(message))
    }

    fn after_send(&mut self, _ctx: &DriverContext<'_>) -> Flow {
        Flow::Stop
    }
}

/// Carries one reply from the server model back to a client
#[derive(Debug, Clone)]
pub struct ServerResponseDriver {
    driver: ConnectionDriver,
    request_id: Option<RequestId>,
}

impl ServerResponseDriver {
    /// Opens a buffer for the model's reply and a comm to the client
    ///
    /// `options` is the client-facing transport; its fixed address fields
    /// are cleared so the reply goes to `client_address`.
    pub fn new(
        client_address: CommAddress,
        options: &BackendOptions,
        request_id: Option<RequestId>,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let input = Comm::new(CommConfig::buffer("server_response", Direction::Recv))?;
        let output = Comm::new(
            CommConfig::new("client_response", options.kind(), Direction::Send)
                .with_options(options.for_new_address())
                .with_address(client_address),
        )?;
        let driver = ConnectionDriver::builder("server_response", input, output)
            .with_config(config)
            .with_handler(ReplyForwarder {
                request_id: request_id.clone(),
            })
            .build();
        Ok(Self { driver, request_id })
    }

    /// Address the server model replies to
    pub fn model_response_address(&self) -> &CommAddress {
        self.driver.input().address()
    }

    /// Address of the waiting client
    pub fn client_response_address(&self) -> &CommAddress {
        self.driver.output().address()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn state(&self) -> DriverState {
        self.driver.state()
    }

    pub fn start(&self) -> Result<(), DriverError> {
        self.driver.start()
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        self.driver.wait(timeout)
    }

    pub fn terminate(&self) {
        self.driver.terminate()
    }
}
