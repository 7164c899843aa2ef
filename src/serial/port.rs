use std::io::{self, BufRead, Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use log::{info, warn};
use serde::Serialize;
use serialport::{SerialPort, SerialPortType};

use super::decode::Utf8Decoder;
use super::error::{classify_open_error, DeviceError};
use super::transport::{ChunkSender, ChunkSource, LinkConfig, PortSelector, Transport};

const READ_BUFFER_BYTES: usize = 1024;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortEntry {
    pub name: String,
    pub description: String,
}

pub fn list_ports() -> Result<Vec<PortEntry>, DeviceError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| PortEntry {
            description: describe_port_type(&port.port_type),
            name: port.port_name,
        })
        .collect())
}

fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.clone().unwrap_or_else(|| "USB serial".into());
            format!("{product} ({:04x}:{:04x})", usb.vid, usb.pid)
        }
        SerialPortType::BluetoothPort => "Bluetooth".into(),
        SerialPortType::PciPort => "PCI".into(),
        _ => "unknown".into(),
    }
}

struct ReaderWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Serial device read by a dedicated blocking thread.
pub struct SerialTransport {
    path: String,
    worker: Option<ReaderWorker>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            worker: None,
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, link: &LinkConfig) -> Result<ChunkSource, DeviceError> {
        if self.worker.is_some() {
            return Err(DeviceError::AlreadyConnected);
        }

        let port = serialport::new(&self.path, link.baud_rate)
            .timeout(link.read_poll)
            .open()
            .map_err(|err| classify_open_error(&self.path, &err))?;

        info!("opened {} at {} baud", self.path, link.baud_rate);

        let (tx, source) = ChunkSource::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("weighlog-serial".into())
            .spawn({
                let stop = Arc::clone(&stop);
                let path = self.path.clone();
                move || pump_port(port, tx, stop, path)
            })
            .map_err(|err| DeviceError::Unknown(format!("failed to spawn serial reader: {err}")))?;

        self.worker = Some(ReaderWorker { stop, handle });
        Ok(source)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        worker.stop.store(true, Ordering::Relaxed);
        worker
            .handle
            .join()
            .map_err(|_| DeviceError::Teardown(format!("reader thread for {} panicked", self.path)))
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("{err}");
        }
    }
}

fn pump_port(mut port: Box<dyn SerialPort>, tx: ChunkSender, stop: Arc<AtomicBool>, path: String) {
    let mut decoder = Utf8Decoder::new();
    let mut buf = [0u8; READ_BUFFER_BYTES];

    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {
                info!("{path}: device closed the stream");
                break;
            }
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if text.is_empty() {
                    continue;
                }
                if tx.blocking_send(Ok(text)).is_err() {
                    // Reader side went away; nothing left to feed.
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) => {}
            Err(err) => {
                warn!("{path}: read failed: {err}");
                let _ = tx.blocking_send(Err(err));
                return;
            }
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.try_send(Ok(tail));
    }
    // Port handle drops here, releasing the device.
}

/// Picks the configured port, or asks the operator on the terminal.
pub struct SerialPortSelector {
    preferred: Option<String>,
}

impl SerialPortSelector {
    pub fn new(preferred: Option<String>) -> Self {
        Self { preferred }
    }
}

impl PortSelector for SerialPortSelector {
    fn request_port(&mut self) -> Result<Box<dyn Transport>, DeviceError> {
        let path = match &self.preferred {
            Some(path) => path.clone(),
            None => {
                let ports = list_ports()?;
                let stdin = io::stdin();
                let mut input = stdin.lock();
                let mut output = io::stderr();
                choose_port(&ports, &mut input, &mut output)?
            }
        };

        Ok(Box::new(SerialTransport::new(path)))
    }
}

fn choose_port(
    ports: &[PortEntry],
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<String, DeviceError> {
    match ports {
        [] => Err(DeviceError::SelectionDeclined(
            "no serial ports available".into(),
        )),
        [only] => Ok(only.name.clone()),
        _ => {
            let answer =
                prompt_choice(ports, input, output).map_err(|err| DeviceError::Unknown(err.to_string()))?;
            let answer = answer.trim();
            if answer.is_empty() {
                return Err(DeviceError::SelectionDeclined("cancelled by operator".into()));
            }

            answer
                .parse::<usize>()
                .ok()
                .and_then(|choice| choice.checked_sub(1))
                .and_then(|idx| ports.get(idx))
                .map(|port| port.name.clone())
                .ok_or_else(|| DeviceError::SelectionDeclined(format!("invalid choice '{answer}'")))
        }
    }
}

fn prompt_choice(
    ports: &[PortEntry],
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> io::Result<String> {
    writeln!(output, "Available serial ports:")?;
    for (idx, port) in ports.iter().enumerate() {
        writeln!(output, "  {}) {} - {}", idx + 1, port.name, port.description)?;
    }
    write!(output, "Select a port [1-{}], empty to cancel: ", ports.len())?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer)
}
