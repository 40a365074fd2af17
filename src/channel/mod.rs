//! Line channel: whole-line message framing over a byte stream pair.
//!
//! A [`LineChannel`] turns any `AsyncRead`/`AsyncWrite` pair — an agent
//! subprocess's stdio in production, an in-memory duplex pipe in tests —
//! into a bidirectional stream of complete text lines, one per protocol
//! message. An optional diagnostic stream (the child's stderr) is always
//! drained to the log so the child can never stall on a full OS pipe.

pub mod codec;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::codec::LineCodec;

/// Dynamically typed inbound byte stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Dynamically typed outbound byte stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffered capacity of the inbound and outbound line queues.
const LINE_QUEUE_DEPTH: usize = 256;

/// Bidirectional channel of complete text lines over a byte stream pair.
///
/// Three background tasks service the channel:
///
/// - a reader framing the primary inbound stream into non-blank lines,
/// - a writer appending `\n` to each outbound line and flushing,
/// - an optional drain forwarding the diagnostic stream to the log.
///
/// Write failures (the peer process already exited) are logged and
/// swallowed; the cause is surfaced by the transport's exit monitoring, not
/// by corrupting the inbound stream. [`LineChannel::close`] cancels all
/// three tasks and closes the inbound side so a blocked consumer observes a
/// clean end of stream.
#[derive(Debug)]
pub struct LineChannel {
    line_rx: Option<mpsc::Receiver<String>>,
    out_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl LineChannel {
    /// Build a channel from an outbound sink, a primary inbound stream, and
    /// an optional diagnostic stream.
    pub fn new(writer: BoxedWriter, reader: BoxedReader, diagnostics: Option<BoxedReader>) -> Self {
        let cancel = CancellationToken::new();
        let (line_tx, line_rx) = mpsc::channel(LINE_QUEUE_DEPTH);
        let (out_tx, out_rx) = mpsc::channel(LINE_QUEUE_DEPTH);

        let mut tasks = vec![
            tokio::spawn(run_reader(reader, line_tx, cancel.clone())),
            tokio::spawn(run_writer(writer, out_rx, cancel.clone())),
        ];

        if let Some(diag) = diagnostics {
            tasks.push(tokio::spawn(run_diagnostics(diag, cancel.clone())));
        }

        Self {
            line_rx: Some(line_rx),
            out_tx,
            cancel,
            tasks,
        }
    }

    /// Convenience constructor boxing concrete stream types.
    pub fn from_io<W, R, D>(writer: W, reader: R, diagnostics: Option<D>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
        D: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(
            Box::new(writer),
            Box::new(reader),
            diagnostics.map(|d| Box::new(d) as BoxedReader),
        )
    }

    /// Sender for outbound lines. Cloneable; each line is written verbatim
    /// with a trailing `\n`.
    #[must_use]
    pub fn outbound(&self) -> mpsc::Sender<String> {
        self.out_tx.clone()
    }

    /// Take the inbound line receiver. Yields `None` after the first call.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<String>> {
        self.line_rx.take()
    }

    /// Cancel the reader/writer/diagnostic tasks and close the channel.
    ///
    /// Best-effort: tasks that already exited are skipped; a consumer still
    /// holding the inbound receiver observes end of stream.
    pub async fn close(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(%err, "line channel task ended abnormally during close");
                }
            }
        }
    }
}

/// Reader task: frame the inbound stream into non-blank lines.
async fn run_reader(reader: BoxedReader, line_tx: mpsc::Sender<String>, cancel: CancellationToken) {
    let mut framed = FramedRead::new(reader, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("line channel reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("line channel reader: EOF detected");
                        break;
                    }
                    Some(Err(err)) => {
                        // Oversized lines are dropped inside the codec; an
                        // error reaching here is a real IO failure.
                        warn!(%err, "line channel reader: IO error, stopping");
                        break;
                    }
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        trace!(len = line.len(), "line channel reader: inbound line");
                        if line_tx.send(line).await.is_err() {
                            debug!("line channel reader: consumer gone, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
    // Dropping line_tx here closes the inbound side for the consumer.
}

/// Writer task: append `\n` to each outbound line, write, flush.
async fn run_writer(
    mut writer: BoxedWriter,
    mut out_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("line channel writer: cancellation received, stopping");
                break;
            }

            line = out_rx.recv() => {
                let Some(line) = line else {
                    debug!("line channel writer: senders gone, stopping");
                    break;
                };

                let mut bytes = line.into_bytes();
                bytes.push(b'\n');

                if let Err(err) = writer.write_all(&bytes).await {
                    // The process likely exited; exit monitoring reports why.
                    warn!(%err, "line channel writer: write failed, stopping");
                    break;
                }
                if let Err(err) = writer.flush().await {
                    warn!(%err, "line channel writer: flush failed, stopping");
                    break;
                }
            }
        }
    }

    let _ = writer.flush().await;
}

/// Diagnostic drain: forward every stderr line to the log, never blocking
/// the child on an unread pipe.
async fn run_diagnostics(diag: BoxedReader, cancel: CancellationToken) {
    let mut lines = BufReader::new(diag).lines();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        if !text.trim().is_empty() {
                            debug!(target: "agent_stderr", "{text}");
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(%err, "diagnostic stream read failed, stopping drain");
                        break;
                    }
                }
            }
        }
    }
}
