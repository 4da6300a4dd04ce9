use std::io;
use std::sync::Arc;

use bytes::Bytes;
use sandbox::{OutputChunk, OutputSink, StreamKind};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Read granularity for output forwarding. Output lands at the caller
/// at least this often, so progress is visible while a run is still
/// going.
pub const RELAY_CHUNK_SIZE: usize = 1024;

/// Copy one demultiplexed stream into the shared sink until EOF or
/// cancellation. Both relays deliver through the same lock, so the
/// sink never sees concurrent sends.
///
/// Cancellation is a quiet exit: the run outcome is reported by the
/// completion arbiter, not the relay.
pub async fn relay_stream<R, S>(
    mut source: R,
    kind: StreamKind,
    sink: Arc<Mutex<S>>,
    cancel: CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    S: OutputSink,
{
    let mut buf = [0u8; RELAY_CHUNK_SIZE];
    loop {
        let n = tokio::select! {
            read = source.read(&mut buf) => read?,
            () = cancel.cancelled() => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }
        let Some(payload) = buf.get(..n) else {
            return Ok(());
        };
        let chunk = OutputChunk {
            kind,
            payload: Bytes::copy_from_slice(payload),
        };
        sink.lock().await.send(chunk).await?;
    }
}
