//! Named events published to whatever is presenting the session.

use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::serial::{ConnectionState, CurrentReading};

const EVENT_CAPACITY: usize = 256;

/// Display category for operator-facing messages.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NoticeKind {
    DeviceBusy,
    DeviceAbsent,
    SelectionDeclined,
    StreamFailed,
    DeviceSilent,
    FramingOverflow,
    TeardownIncomplete,
    Unknown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum AppEvent {
    ConnectionStateChanged { state: ConnectionState },
    ReadingChanged { reading: CurrentReading },
    DeviceNotice(Notice),
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::ConnectionStateChanged { .. } => "connection-state-changed",
            AppEvent::ReadingChanged { .. } => "reading-changed",
            AppEvent::DeviceNotice(_) => "device-notice",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget; nobody listening is fine.
    pub fn emit(&self, event: AppEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            debug!("no subscribers for {name}");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_their_names() {
        let event = AppEvent::DeviceNotice(Notice::new(NoticeKind::DeviceBusy, "port busy"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "device-notice");
        assert_eq!(json["payload"]["kind"], "deviceBusy");
        assert_eq!(json["payload"]["message"], "port busy");

        let event = AppEvent::ConnectionStateChanged {
            state: ConnectionState::Connected,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["state"], "connected");
    }

    #[test]
    fn emitting_without_subscribers_does_not_fail() {
        EventBus::new().emit(AppEvent::ReadingChanged {
            reading: CurrentReading::zero(),
        });
    }
}
