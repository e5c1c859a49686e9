//! Control client used by `relevoctl`.

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::api::{Envelope, Request};

/// Error talking to the control socket.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("control socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("connection closed by the daemon")]
    Closed,
}

/// One connection to the daemon's control socket.
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlClient {
    /// Connects to the control socket at `path`.
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends one request and reads its response envelope.
    pub async fn call<T: DeserializeOwned>(
        &mut self,
        request: &Request,
    ) -> Result<Envelope<T>, ClientError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        let mut response = String::new();
        let n = self.reader.read_line(&mut response).await?;
        if n == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(&response)?)
    }
}
