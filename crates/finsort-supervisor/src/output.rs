//! Forwarding of backend stdout/stderr.

use std::fmt;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Which stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// One line of backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub line: String,
}

/// Receives backend output as it is produced.
pub trait OutputSink: Send + Sync {
    fn on_output(&self, stream: OutputStream, line: &str);
}

/// Logs backend output through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn on_output(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => info!(target: "finsort::backend", "{}", line),
            OutputStream::Stderr => warn!(target: "finsort::backend", stderr = %line, "Backend error output"),
        }
    }
}

/// Forwards output chunks over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn on_output(&self, stream: OutputStream, line: &str) {
        // Nobody listening is fine.
        let _ = self.tx.send(OutputChunk {
            stream,
            line: line.to_string(),
        });
    }
}

/// Read `reader` line by line until EOF, handing each non-empty line to `sink`.
///
/// Lines are split on raw bytes and decoded lossily, so output that is not
/// valid UTF-8 is still forwarded and the pipe keeps being drained.
pub(crate) async fn forward_lines<R>(reader: R, stream: OutputStream, sink: &dyn OutputSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim_end();
                if !trimmed.trim_start().is_empty() {
                    sink.on_output(stream, trimmed);
                }
            }
            Err(e) => {
                error!(error = %e, stream = %stream, "Error reading backend output");
                break;
            }
        }
    }
}
