pub mod commands;
pub mod controller;
pub mod decode;
pub mod error;
pub mod extract;
pub mod framer;
pub mod port;
pub mod reader;
pub mod state;
pub mod transport;

pub use controller::{ConnectionController, ConnectionHandle};
pub use error::DeviceError;
pub use extract::{classify, extract, LineKind, Measurement, MEASUREMENT_MARKER};
pub use framer::{FramingError, LineFramer};
pub use port::{list_ports, PortEntry, SerialPortSelector, SerialTransport};
pub use reader::{reader_loop, LoopExit, ReaderOptions, ReadingSink};
pub use state::{ConnectionState, CurrentReading, DeviceSession};
pub use transport::{ChunkSender, ChunkSource, LinkConfig, PortSelector, Transport, DEFAULT_BAUD_RATE};
