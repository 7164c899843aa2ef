use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::events::{AppEvent, EventBus, Notice};

use super::extract::Measurement;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Most recent valid weight and when it arrived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CurrentReading {
    pub weight: f64,
    pub received_at: Option<DateTime<Utc>>,
}

impl CurrentReading {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_measurement(measurement: Measurement, received_at: DateTime<Utc>) -> Self {
        Self {
            weight: measurement.value(),
            received_at: Some(received_at),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.received_at.is_none()
    }
}

/// The one logical device session of the process.
///
/// Writers: the active reader loop (readings, end/failure transitions) and the
/// connection controller, which only writes once that loop has been joined or
/// before it is spawned. Readers subscribe through the watch receivers or the
/// event bus.
pub struct DeviceSession {
    state_tx: watch::Sender<ConnectionState>,
    reading_tx: watch::Sender<CurrentReading>,
    events: EventBus,
}

impl DeviceSession {
    pub fn new(events: EventBus) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (reading_tx, _) = watch::channel(CurrentReading::zero());
        Self {
            state_tx,
            reading_tx,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn reading(&self) -> CurrentReading {
        *self.reading_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_reading(&self) -> watch::Receiver<CurrentReading> {
        self.reading_tx.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            self.events
                .emit(AppEvent::ConnectionStateChanged { state: next });
        }
    }

    pub(crate) fn publish_reading(&self, reading: CurrentReading) {
        self.reading_tx.send_replace(reading);
        self.events.emit(AppEvent::ReadingChanged { reading });
    }

    pub(crate) fn reset_reading(&self) {
        let previous = self.reading_tx.send_replace(CurrentReading::zero());
        if previous != CurrentReading::zero() {
            self.events.emit(AppEvent::ReadingChanged {
                reading: CurrentReading::zero(),
            });
        }
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.events.emit(AppEvent::DeviceNotice(notice));
    }
}
