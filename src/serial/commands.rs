use std::time::Duration;

use anyhow::{bail, Result};
use log::warn;
use tokio::sync::{broadcast::error::RecvError, watch};

use crate::{app::AppState, events::AppEvent};

use super::{list_ports, ConnectionState, CurrentReading};

pub fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.name, port.description);
    }
    Ok(())
}

/// Streams readings to stdout until Ctrl-C or the device goes away.
pub async fn monitor(state: &AppState) -> Result<()> {
    let mut events = state.session().events().subscribe();
    let handle = state.connection().lock().await.connect().await?;
    eprintln!("connected to {}, press Ctrl-C to stop", handle.port);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(AppEvent::ReadingChanged { reading }) if !reading.is_zero() => {
                    println!("{:.2} g", reading.weight);
                }
                Ok(AppEvent::DeviceNotice(notice)) => eprintln!("{}", notice.message),
                Ok(AppEvent::ConnectionStateChanged {
                    state: ConnectionState::Disconnected,
                }) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("monitor fell behind by {skipped} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    release(state).await;
    Ok(())
}

/// Connects, waits for the first weight, and saves it under `category`.
pub async fn capture(state: &AppState, category: &str, wait: Duration) -> Result<()> {
    let readings = state.session().subscribe_reading();
    let states = state.session().subscribe_state();
    let handle = state.connection().lock().await.connect().await?;

    let saved = match wait_for_reading(readings, states, wait).await {
        Some(reading) => {
            eprintln!("read {:.2} g from {}", reading.weight, handle.port);
            state.capture_record(category).await.map(Some)
        }
        None => Ok(None),
    };

    release(state).await;

    match saved? {
        Some(record) => {
            println!(
                "saved {:.2} g as '{}' ({})",
                record.weight, record.category, record.id
            );
            Ok(())
        }
        None => bail!("no reading from {} within {}s", handle.port, wait.as_secs()),
    }
}

/// First non-zero reading, or `None` once the session drops or `wait` runs out.
async fn wait_for_reading(
    mut readings: watch::Receiver<CurrentReading>,
    mut states: watch::Receiver<ConnectionState>,
    wait: Duration,
) -> Option<CurrentReading> {
    let first = async {
        loop {
            let reading = *readings.borrow_and_update();
            if !reading.is_zero() {
                return Some(reading);
            }
            if *states.borrow_and_update() == ConnectionState::Disconnected {
                return None;
            }

            tokio::select! {
                changed = readings.changed() => changed.ok()?,
                changed = states.changed() => changed.ok()?,
            }
        }
    };

    tokio::time::timeout(wait, first).await.ok().flatten()
}

async fn release(state: &AppState) {
    if let Err(err) = state.connection().lock().await.shutdown().await {
        eprintln!("{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::serial::{DeviceSession, Measurement};
    use chrono::Utc;

    fn connected_session() -> DeviceSession {
        let session = DeviceSession::new(EventBus::new());
        session.set_state(ConnectionState::Connected);
        session
    }

    #[tokio::test]
    async fn returns_the_first_published_weight() {
        let session = connected_session();
        let readings = session.subscribe_reading();
        let states = session.subscribe_state();

        let waiter = tokio::spawn(wait_for_reading(readings, states, Duration::from_secs(5)));
        session.publish_reading(CurrentReading::from_measurement(
            Measurement::new(10.0).unwrap(),
            Utc::now(),
        ));

        let reading = waiter.await.unwrap().unwrap();
        assert_eq!(reading.weight, 10.0);
    }

    #[tokio::test]
    async fn gives_up_when_the_session_ends() {
        let session = connected_session();
        let readings = session.subscribe_reading();
        let states = session.subscribe_state();

        let waiter = tokio::spawn(wait_for_reading(readings, states, Duration::from_secs(5)));
        session.set_state(ConnectionState::Disconnected);

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_wait() {
        let session = connected_session();
        let reading = wait_for_reading(
            session.subscribe_reading(),
            session.subscribe_state(),
            Duration::from_secs(3),
        )
        .await;
        assert_eq!(reading, None);
    }
}
