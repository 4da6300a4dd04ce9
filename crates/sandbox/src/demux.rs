//! Demultiplexes the backend's combined attach stream.
//!
//! ## Wire Format
//!
//! ```text
//! [1-byte stream tag][3 zero bytes][4-byte length][payload]
//! ```
//!
//! - **tag**: 0 = stdin echo, 1 = stdout, 2 = stderr
//! - **length**: big-endian u32, payload size
//! - **payload**: that many raw output bytes
//!
//! Frames repeat until the stream closes. A clean EOF on a frame
//! boundary terminates both substreams without error; a partial header,
//! truncated payload, oversized length, or unknown tag is a malformed
//! frame and closes both substreams with an error.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SandboxError};

/// Frame header size (tag + padding + length).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum accepted payload size per frame (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// Stream tag constants. Stdin-echo frames only appear when the backend
// has stdin attached and are folded into stdout, matching the backend's
// own demultiplexer behavior.
pub const TAG_STDIN: u8 = 0;
pub const TAG_STDOUT: u8 = 1;
pub const TAG_STDERR: u8 = 2;

/// Fill `buf` completely, distinguishing a clean EOF before the first
/// byte (`Ok(false)`) from a truncation mid-buffer (error).
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        let n = reader.read(rest).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(SandboxError::MalformedFrame(format!(
                "truncated frame header: {filled} of {} bytes",
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(true)
}

/// Split `combined` into the stdout and stderr writers until EOF.
///
/// Both writers are shut down on return, success or not, so downstream
/// readers always observe end-of-stream.
pub async fn demux<R, O, E>(mut combined: R, mut stdout: O, mut stderr: E) -> Result<()>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut payload = Vec::new();

    let result = loop {
        match read_full(&mut combined, &mut header).await {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(e) => break Err(e),
        }

        let [tag, _, _, _, l0, l1, l2, l3] = header;
        let length = u32::from_be_bytes([l0, l1, l2, l3]) as usize;
        if length > MAX_FRAME_SIZE {
            break Err(SandboxError::MalformedFrame(format!(
                "frame payload too large: {length}"
            )));
        }

        payload.resize(length, 0);
        if let Err(e) = combined.read_exact(&mut payload).await {
            break Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SandboxError::MalformedFrame(format!(
                    "truncated frame payload: expected {length} bytes"
                ))
            } else {
                SandboxError::Io(e)
            });
        }

        let write_result = match tag {
            TAG_STDIN | TAG_STDOUT => stdout.write_all(&payload).await,
            TAG_STDERR => stderr.write_all(&payload).await,
            other => {
                break Err(SandboxError::MalformedFrame(format!(
                    "unknown stream tag: {other}"
                )));
            }
        };
        if let Err(e) = write_result {
            break Err(SandboxError::Io(e));
        }
    };

    // Terminate both substreams regardless of outcome.
    let _ = stdout.shutdown().await;
    let _ = stderr.shutdown().await;

    result
}
