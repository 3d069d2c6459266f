//! Client-side request/response drivers
//!
//! A [`ClientRequestDriver`] takes requests from a client model and sends
//! them to a remote server. It signs on when it starts and signs off when
//! the model is done. Each request gets a one-shot
//! [`ClientResponseDriver`] listening for the server's reply.

use crate::config::DriverConfig;
use crate::connection::{ConnectionDriver, DriverContext, DriverState, EofAction, MessageHandler};
use crate::error::DriverError;
use crate::server::ReplyForwarder;
use comm::sync::lock;
use comm::{BackendOptions, Comm, CommConfig, CommError};
use core_types::{CommAddress, RequestId};
use ipc::{Direction, Message, RESPONSE_EOF};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct ClientBook {
    response_drivers: Vec<ClientResponseDriver>,
    terminated: bool,
}

struct ClientRequestHandler {
    book: Arc<Mutex<ClientBook>>,
    server_options: BackendOptions,
    config: DriverConfig,
}

impl MessageHandler for ClientRequestHandler {
    fn on_start(&mut self, ctx: &DriverContext<'_>) -> Result<(), DriverError> {
        if !ctx.output().send(&Message::sign_on()) {
            return Err(CommError::Transport(format!(
                "{} could not sign on to {}",
                ctx.name(),
                ctx.output().address()
            ))
            .into());
        }
        info!(driver = %ctx.name(), server = %ctx.output().address(), "signed on");
        Ok(())
    }

    fn send_message(
        &mut self,
        ctx: &DriverContext<'_>,
        mut message: Message,
    ) -> Result<bool, DriverError> {
        let model_address = match message.header.response_address.clone() {
            Some(address) if address != RESPONSE_EOF => address,
            _ => return Ok(ctx.output().try_send_nolimit(&message)?),
        };

        let response = ClientResponseDriver::new(
            CommAddress::new(model_address),
            &self.server_options,
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

        message.header.response_address = Some(response.server_response_address().to_string());
        Ok(ctx.output().try_send_nolimit(&message)?)
    }

    fn on_eof(
        &mut self,
        ctx: &DriverContext<'_>,
        _eof: &Message,
    ) -> Result<EofAction, DriverError> {
        info!(driver = %ctx.name(), "signing off");
        Ok(EofAction::Forward(Message::sign_off()))
    }
}

/// Forwards requests from a client model to a remote server
#[derive(Debug, Clone)]
pub struct ClientRequestDriver {
    driver: ConnectionDriver,
    book: Arc<Mutex<ClientBook>>,
}

impl ClientRequestDriver {
    /// Opens the model-facing buffer and the comm to the server
    ///
    /// `options` is the transport the server listens on; replies come back
    /// over the same kind of comm.
    pub fn new(
        model_request_name: &str,
        server_address: CommAddress,
        options: BackendOptions,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let input = Comm::new(CommConfig::buffer(model_request_name, Direction::Recv))?;
        let output = Comm::new(
            CommConfig::new(
                format!("{}_CLIENT", model_request_name),
                options.kind(),
                Direction::Send,
            )
            .with_options(options.clone())
            .with_address(server_address),
        )?;
        let model_address = input.address().to_string();

        let book = Arc::new(Mutex::new(ClientBook::default()));
        let driver = ConnectionDriver::builder(model_request_name, input, output)
            .with_config(config)
            .with_env(model_request_name, model_address)
            .with_handler(ClientRequestHandler {
                book: Arc::clone(&book),
                server_options: options,
                config,
            })
            .build();
        Ok(Self { driver, book })
    }

    /// Address the client model sends requests to
    pub fn model_address(&self) -> &CommAddress {
        self.driver.input().address()
    }

    /// Address of the server's request comm
    pub fn server_address(&self) -> &CommAddress {
        self.driver.output().address()
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

/// Carries one reply from the server back to the client model
#[derive(Debug, Clone)]
pub struct ClientResponseDriver {
    driver: ConnectionDriver,
    request_id: Option<RequestId>,
}

impl ClientResponseDriver {
    /// Opens a comm for the server's reply and a buffer to the model
    pub fn new(
        model_response_address: CommAddress,
        server_options: &BackendOptions,
        request_id: Option<RequestId>,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let input = Comm::new(
            CommConfig::new("client_response", server_options.kind(), Direction::Recv)
                .with_options(server_options.for_new_address()),
        )?;
        let output = Comm::new(
            CommConfig::buffer("model_response", Direction::Send)
                .with_address(model_response_address),
        )?;
        let driver = ConnectionDriver::builder("client_response", input, output)
            .with_config(config)
            .with_handler(ReplyForwarder {
                request_id: request_id.clone(),
            })
            .build();
        Ok(Self { driver, request_id })
    }

    /// Address the server sends the reply to
    pub fn server_response_address(&self) -> &CommAddress {
        self.driver.input().address()
    }

    /// Address of the waiting client model
    pub fn model_response_address(&self) -> &CommAddress {
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
