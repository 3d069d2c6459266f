//! File transport
//!
//! A sending file comm writes frames to a file; a receiving one reads them
//! back, either the whole file as one message or one message per line. The
//! end of the file is the end of the stream.

use crate::config::{FileOptions, ReadMethod};
use crate::error::CommError;
use crate::transport::Transport;
use core_types::CommAddress;
use ipc::{Direction, EOF_MSG};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) struct FileTransport {
    path: PathBuf,
    options: FileOptions,
    writer: Option<BufWriter<File>>,
    reader: Option<BufReader<File>>,
    exhausted: bool,
}

impl FileTransport {
    pub(crate) fn open(
        address: &CommAddress,
        direction: Direction,
        options: FileOptions,
    ) -> Result<Self, CommError> {
        let path = options
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(address.as_str()));
        if options.newline.is_empty() {
            return Err(CommError::config("file newline must not be empty"));
        }

        let writer = match direction {
            Direction::Send => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(options.append)
                    .truncate(!options.append)
                    .open(&path)
                    .map_err(|err| {
                        CommError::config(format!("cannot open {}: {}", path.display(), err))
                    })?;
                Some(BufWriter::new(file))
            }
            Direction::Recv => None,
        };

        Ok(Self {
            path,
            options,
            writer,
            reader: None,
            exhausted: false,
        })
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, CommError> {
        self.writer
            .as_mut()
            .ok_or_else(|| CommError::Closed(self.path.display().to_string()))
    }

    fn reader(&mut self) -> Result<&mut BufReader<File>, CommError> {
        if self.reader.is_none() {
            let file = File::open(&self.path)
                .map_err(|err| CommError::io(&self.path.display().to_string(), err))?;
            self.reader = Some(BufReader::new(file));
        }
        self.reader
            .as_mut()
            .ok_or_else(|| CommError::Closed(self.path.display().to_string()))
    }

    fn read_next(&mut self) -> Result<Vec<u8>, CommError> {
        let newline = self.options.newline.as_bytes().to_vec();
        let read_meth = self.options.read_meth;
        let context = self.path.display().to_string();
        let reader = self.reader()?;

        let mut data = Vec::new();
        match read_meth {
            ReadMethod::Read => {
                reader
                    .read_to_end(&mut data)
                    .map_err(|err| CommError::io(&context, err))?;
                self.exhausted = true;
            }
            ReadMethod::Readline => {
                let terminator = newline[newline.len() - 1];
                let n = reader
                    .read_until(terminator, &mut data)
                    .map_err(|err| CommError::io(&context, err))?;
                if n == 0 {
                    self.exhausted = true;
                } else if data.ends_with(&newline) {
                    data.truncate(data.len() - newline.len());
                }
            }
        }
        Ok(data)
    }
}

impl Transport for FileTransport {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), CommError> {
        let newline = match self.options.read_meth {
            ReadMethod::Readline => Some(self.options.newline.clone()),
            ReadMethod::Read => None,
        };
        let context = self.path.display().to_string();
        let writer = self.writer()?;
        writer
            .write_all(&frame)
            .map_err(|err| CommError::io(&context, err))?;
        if let Some(newline) = newline {
            writer
                .write_all(newline.as_bytes())
                .map_err(|err| CommError::io(&context, err))?;
        }
        writer.flush().map_err(|err| CommError::io(&context, err))
    }

    fn recv_frame(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, CommError> {
        if self.exhausted {
            return Ok(Some(EOF_MSG.to_vec()));
        }
        let data = self.read_next()?;
        if self.exhausted && data.is_empty() {
            return Ok(Some(EOF_MSG.to_vec()));
        }
        Ok(Some(data))
    }

    fn send_eof(&mut self) -> Result<(), CommError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|err| CommError::io(&self.path.display().to_string(), err))?;
        }
        Ok(())
    }

    fn pending(&self) -> usize {
        if self.exhausted || self.writer.is_some() {
            0
        } else {
            usize::from(self.path.exists())
        }
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %err, "flush on close failed");
            }
        }
        self.reader = None;
    }
}
