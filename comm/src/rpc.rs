//! Model-side request/response comms
//!
//! [`ClientComm`] and [`ServerComm`] are what a model process holds on
//! either side of the request/response drivers. A client call creates a
//! fresh response channel for every request and names it in the request
//! header; the server replies to whatever address the request named.

use crate::comm::Comm;
use crate::config::CommConfig;
use crate::error::CommError;
use crate::sync::lock;
use core_types::RequestId;
use ipc::{Direction, Message};
use std::sync::Mutex;
use std::time::Duration;

/// Client side of a request/response channel
#[derive(Debug)]
pub struct ClientComm {
    requests: Comm,
}

impl ClientComm {
    /// Opens the request channel; the configuration must be a sender
    pub fn new(config: CommConfig) -> Result<Self, CommError> {
        if !config.direction.is_send() {
            return Err(CommError::config(format!(
                "client comm {} must send requests",
                config.name
            )));
        }
        Ok(Self {
            requests: Comm::new(config)?,
        })
    }

    /// The underlying request channel
    pub fn requests(&self) -> &Comm {
        &self.requests
    }

    /// Sends a request and waits for its reply
    ///
    /// The request keeps its ID if it has one and gets a fresh one otherwise.
    /// Returns `(false, _)` if the request could not be sent or no reply
    /// arrived in time.
    pub fn call(
        &self,
        mut request: Message,
        timeout: Option<Duration>,
    ) -> Result<(bool, Message), CommError> {
        let response = Comm::new(self.response_config())?;
        let id = request.header.id.clone().unwrap_or_default();
        request.header.id = Some(id.clone());
        request.header.response_address = Some(response.address().to_string());

        if !self.requests.send_nolimit(&request) {
            response.close();
            return Ok((false, Message::empty()));
        }
        tracing::debug!(comm = %self.requests.name(), request = %id, "request sent");

        let (ok, reply) = response.recv_nolimit(timeout);
        response.close();
        if ok && reply.header.id.as_ref() != Some(&id) {
            tracing::warn!(
                comm = %self.requests.name(),
                request = %id,
                reply = ?reply.header.id,
                "reply carries a different request id"
            );
        }
        Ok((ok, reply))
    }

    /// Closes the request channel, signing the client off
    pub fn sign_off(&self) {
        self.requests.send_eof();
    }

    fn response_config(&self) -> CommConfig {
        let config = self.requests.config();
        CommConfig {
            name: format!("{}_response", config.name),
            address: None,
            direction: Direction::Recv,
            datatype: None,
            options: Some(config.backend_options().for_new_address()),
            ..config.clone()
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRequest {
    id: Option<RequestId>,
    response_address: String,
}

/// Server side of a request/response channel
#[derive(Debug)]
pub struct ServerComm {
    requests: Comm,
    pending: Mutex<Option<PendingRequest>>,
}

impl ServerComm {
    /// Opens the request channel; the configuration must be a receiver
    pub fn new(config: CommConfig) -> Result<Self, CommError> {
        if !config.direction.is_recv() {
            return Err(CommError::config(format!(
                "server comm {} must receive requests",
                config.name
            )));
        }
        Ok(Self {
            requests: Comm::new(config)?,
            pending: Mutex::new(None),
        })
    }

    /// The underlying request channel
    pub fn requests(&self) -> &Comm {
        &self.requests
    }

    /// Receives the next request and remembers where to reply
    pub fn recv_request(&self, timeout: Option<Duration>) -> (bool, Message) {
        let (ok, request) = self.requests.recv_nolimit(timeout);
        if ok {
            *lock(&self.pending) = request
                .header
                .response_address
                .clone()
                .map(|response_address| PendingRequest {
                    id: request.header.id.clone(),
                    response_address,
                });
        }
        (ok, request)
    }

    /// Sends the reply to the most recent request
    ///
    /// Returns `Ok(false)` if there is no request awaiting a reply or the
    /// reply could not be sent.
    pub fn send_response(&self, mut reply: Message) -> Result<bool, CommError> {
        let pending = match lock(&self.pending).take() {
            Some(pending) => pending,
            None => {
                tracing::warn!(comm = %self.requests.name(), "no request awaiting a response");
                return Ok(false);
            }
        };

        let config = self.requests.config();
        let response = Comm::new(CommConfig {
            name: format!("{}_response", config.name),
            address: Some(pending.response_address.into()),
            direction: Direction::Send,
            datatype: None,
            options: Some(config.backend_options().for_new_address()),
            ..config.clone()
        })?;
        if pending.id.is_some() {
            reply.header.id = pending.id;
        }
        let sent = response.send_nolimit(&reply);
        response.close();
        Ok(sent)
    }

    /// Checks if the request channel reached end of stream
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}
