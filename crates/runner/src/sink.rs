use std::io;

use async_trait::async_trait;
use sandbox::{OutputChunk, OutputSink, StreamKind};
use tokio::io::AsyncWriteExt;

/// Sink that forwards sandbox output to the runner's own stdio,
/// keeping the stream split intact.
pub struct StdioSink {
    stdout: tokio::io::Stdout,
    stderr: tokio::io::Stderr,
}

impl StdioSink {
    pub fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
            stderr: tokio::io::stderr(),
        }
    }
}

impl Default for StdioSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputSink for StdioSink {
    async fn send(&mut self, chunk: OutputChunk) -> io::Result<()> {
        match chunk.kind {
            StreamKind::Stdout => {
                self.stdout.write_all(&chunk.payload).await?;
                self.stdout.flush().await
            }
            StreamKind::Stderr => {
                self.stderr.write_all(&chunk.payload).await?;
                self.stderr.flush().await
            }
        }
    }
}
