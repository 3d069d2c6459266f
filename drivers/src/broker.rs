//! Broker input and output drivers
//!
//! These bridge a model's buffer comm and a broker queue. The broker side
//! may be either broker kind; connection drops are handled inside the comm,
//! and [`times_connected`](BrokerInputDriver::times_connected) shows how
//! often it had to reconnect.

use crate::config::DriverConfig;
use crate::connection::ConnectionDriver;
use crate::error::DriverError;
use comm::{BackendOptions, Comm, CommConfig, CommKind};
use core_types::CommAddress;
use ipc::Direction;

fn broker_config(
    name: &str,
    options: BackendOptions,
    address: CommAddress,
    direction: Direction,
) -> Result<CommConfig, DriverError> {
    match options.kind() {
        CommKind::Broker | CommKind::AsyncBroker => Ok(CommConfig::new(
            format!("{}_broker", name),
            options.kind(),
            direction,
        )
        .with_options(options)
        .with_address(address)),
        other => Err(DriverError::Config(format!(
            "{} needs broker options, got {}",
            name, other
        ))),
    }
}

/// Moves messages from a broker queue into a buffer the model reads
#[derive(Debug, Clone)]
pub struct BrokerInputDriver {
    driver: ConnectionDriver,
}

impl BrokerInputDriver {
    pub fn new(
        name: &str,
        options: BackendOptions,
        address: CommAddress,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let input = Comm::new(broker_config(name, options, address, Direction::Recv)?)?;
        let output = Comm::new(CommConfig::buffer(name, Direction::Send))?;
        let model_address = output.address().to_string();
        let driver = ConnectionDriver::builder(name, input, output)
            .with_config(config)
            .with_env(name, model_address)
            .build();
        Ok(Self { driver })
    }

    /// Address the model receives on
    pub fn model_address(&self) -> &CommAddress {
        self.driver.output().address()
    }

    /// Number of times the broker connection was opened
    pub fn times_connected(&self) -> u64 {
        self.driver.input().times_connected().unwrap_or(0)
    }

    pub fn driver(&self) -> &ConnectionDriver {
        &self.driver
    }
}

/// Moves messages from the model's buffer onto a broker queue
#[derive(Debug, Clone)]
pub struct BrokerOutputDriver {
    driver: ConnectionDriver,
}

impl BrokerOutputDriver {
    pub fn new(
        name: &str,
        options: BackendOptions,
        address: CommAddress,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let input = Comm::new(CommConfig::buffer(name, Direction::Recv))?;
        let output = Comm::new(broker_config(name, options, address, Direction::Send)?)?;
        let model_address = input.address().to_string();
        let driver = ConnectionDriver::builder(name, input, output)
            .with_config(config)
            .with_env(name, model_address)
            .build();
        Ok(Self { driver })
    }

    /// Address the model sends to
    pub fn model_address(&self) -> &CommAddress {
        self.driver.input().address()
    }

    /// Number of times the broker connection was opened
    pub fn times_connected(&self) -> u64 {
        self.driver.output().times_connected().unwrap_or(0)
    }

    pub fn driver(&self) -> &ConnectionDriver {
        &self.driver
    }
}
