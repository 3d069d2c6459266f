//! File input and output drivers
//!
//! A model reads a file through a [`FileInputDriver`] and writes one
//! through a [`FileOutputDriver`]; either way the model only ever sees a
//! buffer comm.

use crate::config::DriverConfig;
use crate::connection::ConnectionDriver;
use crate::error::DriverError;
use comm::{BackendOptions, Comm, CommConfig, CommKind, FileOptions};
use core_types::CommAddress;
use ipc::Direction;
use std::path::{Path, PathBuf};

fn file_config(name: &str, path: &Path, options: FileOptions, direction: Direction) -> CommConfig {
    CommConfig::new(format!("{}_file", name), CommKind::File, direction)
        .with_address(path.to_string_lossy().into_owned())
        .with_options(BackendOptions::File(FileOptions {
            path: Some(path.to_path_buf()),
            ..options
        }))
}

/// Streams a file into a buffer the model reads
#[derive(Debug, Clone)]
pub struct FileInputDriver {
    driver: ConnectionDriver,
    path: PathBuf,
}

impl FileInputDriver {
    pub fn new(
        name: &str,
        path: impl Into<PathBuf>,
        options: FileOptions,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let path = path.into();
        let input = Comm::new(file_config(name, &path, options, Direction::Recv))?;
        let output = Comm::new(CommConfig::buffer(name, Direction::Send))?;
        let model_address = output.address().to_string();
        let driver = ConnectionDriver::builder(name, input, output)
            .with_config(config)
            .with_env(name, model_address)
            .build();
        Ok(Self { driver, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address the model receives file contents on
    pub fn model_address(&self) -> &CommAddress {
        self.driver.output().address()
    }

    pub fn driver(&self) -> &ConnectionDriver {
        &self.driver
    }
}

/// Writes everything the model sends into a file
#[derive(Debug, Clone)]
pub struct FileOutputDriver {
    driver: ConnectionDriver,
    path: PathBuf,
}

impl FileOutputDriver {
    /// Creates the file right away, truncating it unless `options.append`
    pub fn new(
        name: &str,
        path: impl Into<PathBuf>,
        options: FileOptions,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let path = path.into();
        let input = Comm::new(CommConfig::buffer(name, Direction::Recv))?;
        let output = Comm::new(file_config(name, &path, options, Direction::Send))?;
        let model_address = input.address().to_string();
        let driver = ConnectionDriver::builder(name, input, output)
            .with_config(config)
            .with_env(name, model_address)
            .build();
        Ok(Self { driver, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address the model sends file contents to
    pub fn model_address(&self) -> &CommAddress {
        self.driver.input().address()
    }

    pub fn driver(&self) -> &ConnectionDriver {
        &self.driver
    }
}
