use std::io;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::extract::{classify, LineKind, Measurement};
use super::framer::{FramingError, LineFramer};
use super::transport::ChunkSource;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Receives what the reader loop finds. Callbacks run on the loop's task and
/// should return quickly.
pub trait ReadingSink: Send {
    fn on_measurement(&mut self, measurement: Measurement);

    /// The source finished cleanly.
    fn on_end(&mut self);

    /// The source failed; the loop has stopped.
    fn on_error(&mut self, error: io::Error);

    fn on_framing_error(&mut self, error: FramingError) {
        log_warn!("{error}");
    }

    /// No chunk for `silent_for`; the loop has stopped.
    fn on_idle_timeout(&mut self, silent_for: Duration) {
        log_warn!("no data for {}s, treating as end of stream", silent_for.as_secs());
        self.on_end();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    ReadFailed,
    IdleTimeout,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    pub max_line_bytes: Option<usize>,
    pub idle_timeout: Option<Duration>,
    /// Log every raw chunk at debug level.
    pub trace_chunks: bool,
}

enum Pulled {
    Chunk(Option<io::Result<String>>),
    Idle(Duration),
}

/// Pulls chunks from `source` until it ends, fails, goes idle, or `cancel_token`
/// fires. Cancellation is only observed between chunks; once a chunk is taken
/// all of its lines are processed. A cancelled loop makes no further callbacks.
pub async fn reader_loop<S: ReadingSink>(
    mut source: ChunkSource,
    sink: &mut S,
    options: ReaderOptions,
    cancel_token: CancellationToken,
) -> LoopExit {
    let mut framer = LineFramer::new(options.max_line_bytes);

    loop {
        let pulled = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("reader loop cancelled");
                return LoopExit::Cancelled;
            }
            pulled = next_or_idle(&mut source, options.idle_timeout) => pulled,
        };

        let chunk = match pulled {
            Pulled::Chunk(Some(Ok(chunk))) => chunk,
            Pulled::Chunk(Some(Err(err))) => {
                log_error!("serial read failed: {err}");
                sink.on_error(err);
                return LoopExit::ReadFailed;
            }
            Pulled::Chunk(None) => {
                if !framer.pending().is_empty() {
                    log_debug!("dropping unterminated tail {:?}", framer.pending());
                }
                log_info!("serial stream ended");
                sink.on_end();
                return LoopExit::EndOfStream;
            }
            Pulled::Idle(silent_for) => {
                sink.on_idle_timeout(silent_for);
                return LoopExit::IdleTimeout;
            }
        };

        if options.trace_chunks {
            log_debug!("raw chunk {chunk:?}");
        }

        for line in framer.push(&chunk) {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    sink.on_framing_error(err);
                    continue;
                }
            };
            match classify(&line) {
                LineKind::Measurement(measurement) => sink.on_measurement(measurement),
                LineKind::Malformed => log_debug!("marker without a number: {line:?}"),
                LineKind::Ignored => {}
            }
        }
    }
}

async fn next_or_idle(source: &mut ChunkSource, idle_timeout: Option<Duration>) -> Pulled {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, source.next_chunk()).await {
            Ok(next) => Pulled::Chunk(next),
            Err(_) => Pulled::Idle(limit),
        },
        None => Pulled::Chunk(source.next_chunk().await),
    }
}
