use thiserror::Error;

use crate::events::NoticeKind;

/// Everything that can go wrong acquiring, opening or releasing a device.
///
/// None of these are fatal; the connection always falls back to
/// `Disconnected` and may be retried by the operator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no serial port was selected ({0})")]
    SelectionDeclined(String),
    #[error("serial port {port} is in use by another program; close it (e.g. the Arduino IDE) and retry")]
    PortBusy { port: String },
    #[error("serial port {port} cannot be reached ({detail}); unplug and reconnect the device")]
    PortUnreachable { port: String, detail: String },
    #[error("a device connection is already active")]
    AlreadyConnected,
    #[error("connection handle {0} does not belong to the active session")]
    UnknownHandle(String),
    #[error("device released with problems: {0}")]
    Teardown(String),
    #[error("unexpected serial error: {0}")]
    Unknown(String),
}

impl DeviceError {
    pub fn notice_kind(&self) -> NoticeKind {
        match self {
            DeviceError::SelectionDeclined(_) => NoticeKind::SelectionDeclined,
            DeviceError::PortBusy { .. } => NoticeKind::DeviceBusy,
            DeviceError::PortUnreachable { .. } => NoticeKind::DeviceAbsent,
            DeviceError::Teardown(_) => NoticeKind::TeardownIncomplete,
            DeviceError::AlreadyConnected
            | DeviceError::UnknownHandle(_)
            | DeviceError::Unknown(_) => NoticeKind::Unknown,
        }
    }
}

impl From<serialport::Error> for DeviceError {
    fn from(err: serialport::Error) -> Self {
        DeviceError::Unknown(err.to_string())
    }
}

/// Maps an open failure on `port` onto the operator-facing taxonomy.
pub fn classify_open_error(port: &str, err: &serialport::Error) -> DeviceError {
    use serialport::ErrorKind;

    let description = err.description.to_ascii_lowercase();
    let looks_busy = description.contains("busy")
        || description.contains("in use")
        || description.contains("access is denied");

    match err.kind() {
        ErrorKind::NoDevice if looks_busy => DeviceError::PortBusy {
            port: port.to_string(),
        },
        ErrorKind::NoDevice => DeviceError::PortUnreachable {
            port: port.to_string(),
            detail: err.description.clone(),
        },
        // Windows reports a port held by another program as "Access is denied".
        ErrorKind::Io(std::io::ErrorKind::PermissionDenied) if looks_busy => DeviceError::PortBusy {
            port: port.to_string(),
        },
        // POSIX EACCES: usually a missing group membership such as dialout.
        ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => DeviceError::Unknown(format!(
            "{port}: permission denied ({}); check that this user may open serial devices",
            err.description
        )),
        ErrorKind::Io(std::io::ErrorKind::NotFound) => DeviceError::PortUnreachable {
            port: port.to_string(),
            detail: err.description.clone(),
        },
        _ if looks_busy => DeviceError::PortBusy {
            port: port.to_string(),
        },
        _ => DeviceError::Unknown(format!("{port}: {}", err.description)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::ErrorKind;

    #[test]
    fn missing_device_is_unreachable() {
        let err = serialport::Error::new(ErrorKind::NoDevice, "No such file or directory");
        assert!(matches!(
            classify_open_error("/dev/ttyUSB0", &err),
            DeviceError::PortUnreachable { .. }
        ));
    }

    #[test]
    fn busy_descriptions_are_busy() {
        let err = serialport::Error::new(ErrorKind::NoDevice, "Device or resource busy");
        assert_eq!(
            classify_open_error("/dev/ttyACM0", &err),
            DeviceError::PortBusy {
                port: "/dev/ttyACM0".into()
            }
        );

        let err = serialport::Error::new(
            ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "Access is denied.",
        );
        assert_eq!(
            classify_open_error("COM3", &err).notice_kind(),
            NoticeKind::DeviceBusy
        );
    }

    #[test]
    fn posix_permission_denied_is_not_reported_as_busy() {
        let err = serialport::Error::new(
            ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "Permission denied",
        );
        match classify_open_error("/dev/ttyUSB0", &err) {
            DeviceError::Unknown(detail) => {
                assert!(detail.contains("/dev/ttyUSB0"));
                assert!(detail.contains("Permission denied"));
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn anything_else_is_unknown() {
        let err = serialport::Error::new(ErrorKind::InvalidInput, "bad baud rate");
        assert!(matches!(
            classify_open_error("COM3", &err),
            DeviceError::Unknown(_)
        ));
    }
}
