use std::io;
use std::time::Duration;

use tokio::sync::mpsc;

use super::error::DeviceError;
use super::framer::DEFAULT_MAX_LINE_BYTES;

pub const DEFAULT_BAUD_RATE: u32 = 57_600;
pub const DEFAULT_READ_POLL: Duration = Duration::from_millis(100);
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Link parameters applied when a transport is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// How long a blocking read waits before re-checking for shutdown.
    pub read_poll: Duration,
    pub max_line_bytes: Option<usize>,
    /// Silence longer than this ends the session; `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_poll: DEFAULT_READ_POLL,
            max_line_bytes: Some(DEFAULT_MAX_LINE_BYTES),
            idle_timeout: None,
        }
    }
}

pub type ChunkSender = mpsc::Sender<io::Result<String>>;

/// Readable side of an opened transport.
///
/// Yields text chunks with no alignment to lines. `None` means the producer
/// finished (end of stream); dropping the source tells the producer to stop.
pub struct ChunkSource {
    rx: mpsc::Receiver<io::Result<String>>,
}

impl ChunkSource {
    pub fn channel() -> (ChunkSender, ChunkSource) {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        (tx, ChunkSource { rx })
    }

    pub async fn next_chunk(&mut self) -> Option<io::Result<String>> {
        self.rx.recv().await
    }
}

/// A device link the controller can open once and close.
pub trait Transport: Send + 'static {
    fn open(&mut self, link: &LinkConfig) -> Result<ChunkSource, DeviceError>;

    /// Releases the device. Must tolerate being called after the stream ended.
    fn close(&mut self) -> Result<(), DeviceError>;

    fn describe(&self) -> String;
}

/// Operator-driven choice of which device to talk to.
pub trait PortSelector: Send {
    fn request_port(&mut self) -> Result<Box<dyn Transport>, DeviceError>;
}
