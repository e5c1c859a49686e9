//! Forwarding worker output to the supervisor's log sink.
//!
//! Each line of child stdout/stderr is tagged with the instance
//! identity and re-emitted through `tracing`, whose subscriber adds the
//! timestamp. The forwarding tasks end on pipe EOF when the child
//! exits.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::info;

use crate::supervisor::InstanceId;

/// Spawns a task copying `reader` line by line into the log sink.
pub(crate) fn forward<R>(id: InstanceId, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "relevo::worker", %id, stream, "{line}");
        }
    });
}
