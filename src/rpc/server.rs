//! JSON-lines control server on the local control socket.
//!
//! Each accepted connection is served by its own task: read one request
//! per line, translate it into a manager action, write one response
//! envelope per line. The server holds no state of its own — every
//! decision is the manager's.

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::manager::ManagerHandle;

use super::api::{Envelope, KillReply, Request, StartReply};

/// Accepts control connections until `token` fires.
pub async fn serve(listener: UnixListener, manager: ManagerHandle, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, manager.clone()));
                }
                Err(e) => warn!(error = %e, "control accept failed"),
            }
        }
    }
    debug!("control server finished");
}

async fn handle_connection(stream: UnixStream, manager: ManagerHandle) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(request, &manager).await,
            Err(e) => encode(&Envelope::<KillReply>::failure(format!("bad request: {e}"))),
        };

        if writer.write_all(response.as_bytes()).await.is_err() {
            break;
        }
        if writer.write_all(b"\n").await.is_err() {
            break;
        }
    }
}

async fn dispatch(request: Request, manager: &ManagerHandle) -> String {
    match request {
        Request::Run(query) => match manager.start(query).await {
            Ok(reply) => encode(&Envelope::success(reply)),
            // A waited start that died first still reports its exit
            // code alongside the error.
            Err(e @ ControlError::NeverReady { code }) => encode(&Envelope {
                ok: false,
                error: Some(e.to_string()),
                data: Some(StartReply { code: Some(code) }),
            }),
            Err(e) => encode(&Envelope::<StartReply>::failure(e.to_string())),
        },
        Request::Ps(query) => encode(&from_result(manager.ps(query).await)),
        Request::Kill(query) => encode(&from_result(manager.kill(query).await)),
        Request::Info => encode(&from_result(manager.info().await)),
    }
}

fn from_result<T>(result: Result<T, ControlError>) -> Envelope<T> {
    match result {
        Ok(data) => Envelope::success(data),
        Err(e) => Envelope::failure(e.to_string()),
    }
}

fn encode<T: Serialize>(envelope: &Envelope<T>) -> String {
    serde_json::to_string(envelope)
        .unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"encode failed: {e}"}}"#))
}
