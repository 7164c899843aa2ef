use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::{Notice, NoticeKind};

use super::error::DeviceError;
use super::extract::Measurement;
use super::framer::FramingError;
use super::reader::{reader_loop, LoopExit, ReaderOptions, ReadingSink};
use super::state::{ConnectionState, CurrentReading, DeviceSession};
use super::transport::{ChunkSource, LinkConfig, PortSelector, Transport};

/// Proof of a successful `connect()`; needed to disconnect that session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHandle {
    pub id: String,
    pub port: String,
}

struct ActiveLink {
    handle: ConnectionHandle,
    cancel_token: CancellationToken,
    /// Resolves once the loop has exited and the transport has been closed.
    task: JoinHandle<Result<(), DeviceError>>,
}

/// Owns the device link: acquisition, the single reader loop, and release.
pub struct ConnectionController {
    /// Shared with the blocking task that runs selection and open.
    selector: Arc<Mutex<Box<dyn PortSelector>>>,
    link: LinkConfig,
    session: Arc<DeviceSession>,
    active: Option<ActiveLink>,
    trace_chunks: bool,
}

impl ConnectionController {
    pub fn new(selector: Box<dyn PortSelector>, link: LinkConfig, session: Arc<DeviceSession>) -> Self {
        Self {
            selector: Arc::new(Mutex::new(selector)),
            link,
            session,
            active: None,
            trace_chunks: false,
        }
    }

    pub fn with_chunk_tracing(mut self, enabled: bool) -> Self {
        self.trace_chunks = enabled;
        self
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// True while a reader loop is running.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub async fn connect(&mut self) -> Result<ConnectionHandle, DeviceError> {
        // A loop that already reported Disconnected is only releasing the port;
        // reap_finished waits for that.
        if self.is_active() && self.session.state() != ConnectionState::Disconnected {
            warn!("connect requested while a reader is already running");
            return Err(DeviceError::AlreadyConnected);
        }
        self.reap_finished().await;

        self.session.set_state(ConnectionState::Connecting);

        // Selection may prompt the operator and open blocks on the device.
        let (transport, source) = match self.acquire().await {
            Ok(acquired) => acquired,
            Err(err) => return Err(self.fail_connect(err)),
        };

        let handle = ConnectionHandle {
            id: Uuid::new_v4().to_string(),
            port: transport.describe(),
        };

        self.session.set_state(ConnectionState::Connected);
        info!(
            "connected to {} at {} baud (session {})",
            handle.port, self.link.baud_rate, handle.id
        );

        let cancel_token = CancellationToken::new();
        let options = ReaderOptions {
            max_line_bytes: self.link.max_line_bytes,
            idle_timeout: self.link.idle_timeout,
            trace_chunks: self.trace_chunks,
        };
        let sink = SessionSink {
            session: Arc::clone(&self.session),
        };
        let task = tokio::spawn(run_link(transport, source, sink, options, cancel_token.clone()));

        self.active = Some(ActiveLink {
            handle: handle.clone(),
            cancel_token,
            task,
        });

        Ok(handle)
    }

    /// Stops the reader, closes the transport, and resets the session.
    ///
    /// The session always ends `Disconnected` with a zero reading; a
    /// `Teardown` error only reports that releasing the device misbehaved.
    pub async fn disconnect(&mut self, handle: &ConnectionHandle) -> Result<(), DeviceError> {
        if let Some(active) = &self.active {
            if active.handle.id != handle.id && !active.task.is_finished() {
                return Err(DeviceError::UnknownHandle(handle.id.clone()));
            }
        }

        let outcome = match self.active.take() {
            Some(active) => {
                active.cancel_token.cancel();
                match active.task.await {
                    Ok(closed) => closed,
                    Err(err) => Err(DeviceError::Teardown(format!("reader task failed: {err}"))),
                }
            }
            None => Ok(()),
        };

        self.session.set_state(ConnectionState::Disconnected);
        self.session.reset_reading();

        match outcome {
            Ok(()) => {
                info!("disconnected from {}", handle.port);
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    DeviceError::Teardown(_) => err,
                    other => DeviceError::Teardown(other.to_string()),
                };
                warn!("disconnected from {} with errors: {err}", handle.port);
                self.session
                    .notify(Notice::new(NoticeKind::TeardownIncomplete, err.to_string()));
                Err(err)
            }
        }
    }

    /// Disconnects whatever is active; used on shutdown.
    pub async fn shutdown(&mut self) -> Result<(), DeviceError> {
        match self.active.as_ref().map(|active| active.handle.clone()) {
            Some(handle) => self.disconnect(&handle).await,
            None => Ok(()),
        }
    }

    async fn acquire(&self) -> Result<(Box<dyn Transport>, ChunkSource), DeviceError> {
        let selector = Arc::clone(&self.selector);
        let link = self.link.clone();

        tokio::task::spawn_blocking(move || {
            let mut selector = selector.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut transport = selector.request_port()?;
            let source = transport.open(&link)?;
            Ok::<_, DeviceError>((transport, source))
        })
        .await
        .map_err(|err| DeviceError::Unknown(format!("port acquisition failed: {err}")))?
    }

    async fn reap_finished(&mut self) {
        if let Some(active) = self.active.take() {
            match active.task.await {
                Ok(Ok(())) => debug!("reaped finished session {}", active.handle.id),
                Ok(Err(err)) => debug!("session {} closed with: {err}", active.handle.id),
                Err(err) => warn!("session {} reader task failed: {err}", active.handle.id),
            }
        }
    }

    fn fail_connect(&self, err: DeviceError) -> DeviceError {
        warn!("connect failed: {err}");
        self.session.set_state(ConnectionState::Disconnected);
        self.session
            .notify(Notice::new(err.notice_kind(), err.to_string()));
        err
    }
}

async fn run_link(
    mut transport: Box<dyn Transport>,
    source: ChunkSource,
    mut sink: SessionSink,
    options: ReaderOptions,
    cancel_token: CancellationToken,
) -> Result<(), DeviceError> {
    let exit = reader_loop(source, &mut sink, options, cancel_token).await;
    let port = transport.describe();
    debug!("reader for {port} exited: {exit:?}");

    let closed = tokio::task::spawn_blocking(move || transport.close())
        .await
        .map_err(|err| DeviceError::Teardown(format!("closing {port} failed: {err}")))
        .and_then(|closed| closed);

    if exit != LoopExit::Cancelled {
        if let Err(err) = &closed {
            warn!("releasing {port} after {exit:?}: {err}");
        }
    }
    closed
}

/// Publishes loop results into the shared session.
struct SessionSink {
    session: Arc<DeviceSession>,
}

impl ReadingSink for SessionSink {
    fn on_measurement(&mut self, measurement: Measurement) {
        self.session
            .publish_reading(CurrentReading::from_measurement(measurement, Utc::now()));
    }

    fn on_end(&mut self) {
        self.session.set_state(ConnectionState::Disconnected);
    }

    fn on_error(&mut self, error: io::Error) {
        self.session.set_state(ConnectionState::Failed);
        self.session.notify(Notice::new(
            NoticeKind::StreamFailed,
            format!("lost connection to the device: {error}"),
        ));
        self.session.set_state(ConnectionState::Disconnected);
    }

    fn on_framing_error(&mut self, error: FramingError) {
        warn!("{error}");
        self.session
            .notify(Notice::new(NoticeKind::FramingOverflow, error.to_string()));
    }

    fn on_idle_timeout(&mut self, silent_for: Duration) {
        self.session.notify(Notice::new(
            NoticeKind::DeviceSilent,
            format!("device sent nothing for {}s", silent_for.as_secs()),
        ));
        self.session.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AppEvent, EventBus};
    use crate::serial::transport::ChunkSender;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Bench {
        sender: Mutex<Option<ChunkSender>>,
        opens: AtomicUsize,
        closes: AtomicUsize,
        fail_close: AtomicBool,
        decline: AtomicBool,
        open_error: Mutex<Option<DeviceError>>,
        /// When set, selection waits (bounded) for a release signal.
        gate: Mutex<Option<std_mpsc::Receiver<()>>>,
    }

    impl Bench {
        fn sender(&self) -> ChunkSender {
            self.sender.lock().unwrap().clone().expect("transport not open")
        }
    }

    struct BenchSelector(Arc<Bench>);

    impl PortSelector for BenchSelector {
        fn request_port(&mut self) -> Result<Box<dyn Transport>, DeviceError> {
            let gate = self.0.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            if self.0.decline.load(Ordering::SeqCst) {
                return Err(DeviceError::SelectionDeclined("cancelled".into()));
            }
            Ok(Box::new(BenchTransport(Arc::clone(&self.0))))
        }
    }

    struct BenchTransport(Arc<Bench>);

    impl Transport for BenchTransport {
        fn open(&mut self, _link: &LinkConfig) -> Result<ChunkSource, DeviceError> {
            if let Some(err) = self.0.open_error.lock().unwrap().take() {
                return Err(err);
            }
            let (tx, source) = ChunkSource::channel();
            *self.0.sender.lock().unwrap() = Some(tx);
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            Ok(source)
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.0.sender.lock().unwrap().take();
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_close.load(Ordering::SeqCst) {
                return Err(DeviceError::Teardown("port would not close".into()));
            }
            Ok(())
        }

        fn describe(&self) -> String {
            "bench0".into()
        }
    }

    fn controller() -> (ConnectionController, Arc<Bench>) {
        let bench = Arc::new(Bench::default());
        let session = Arc::new(DeviceSession::new(EventBus::new()));
        let controller = ConnectionController::new(
            Box::new(BenchSelector(Arc::clone(&bench))),
            LinkConfig::default(),
            session,
        );
        (controller, bench)
    }

    async fn wait_for_state(session: &DeviceSession, wanted: ConnectionState) {
        let mut states = session.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == wanted))
            .await
            .expect("state never reached")
            .unwrap();
    }

    async fn next_readings(events: &mut broadcast::Receiver<AppEvent>, count: usize) -> Vec<f64> {
        let mut values = Vec::new();
        while values.len() < count {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("no reading arrived")
                .unwrap();
            if let AppEvent::ReadingChanged { reading } = event {
                values.push(reading.weight);
            }
        }
        values
    }

    fn drain(events: &mut broadcast::Receiver<AppEvent>) -> Vec<AppEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn chunks_become_readings_in_order() {
        let (mut controller, bench) = controller();
        let session = Arc::clone(controller.session());
        let mut events = session.events().subscribe();

        let handle = controller.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(handle.port, "bench0");

        let tx = bench.sender();
        tx.send(Ok("Load_c".into())).await.unwrap();
        tx.send(Ok("ell output val: 10.0\nNoise\nLoad_cell output val: 12.5\n".into()))
            .await
            .unwrap();

        assert_eq!(next_readings(&mut events, 2).await, vec![10.0, 12.5]);
        assert_eq!(session.reading().weight, 12.5);

        controller.disconnect(&handle).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.reading().is_zero());
        assert_eq!(bench.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_connect_does_not_start_another_reader() {
        let (mut controller, bench) = controller();
        let handle = controller.connect().await.unwrap();

        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, DeviceError::AlreadyConnected));
        assert_eq!(bench.opens.load(Ordering::SeqCst), 1);
        assert_eq!(controller.session().state(), ConnectionState::Connected);

        controller.disconnect(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn failed_close_still_leaves_a_clean_session() {
        let (mut controller, bench) = controller();
        let session = Arc::clone(controller.session());
        let handle = controller.connect().await.unwrap();
        bench
            .sender()
            .send(Ok("Load_cell output val: 7\n".into()))
            .await
            .unwrap();
        let mut readings = session.subscribe_reading();
        tokio::time::timeout(Duration::from_secs(5), readings.wait_for(|r| !r.is_zero()))
            .await
            .unwrap()
            .unwrap();

        bench.fail_close.store(true, Ordering::SeqCst);
        let mut events = session.events().subscribe();
        let err = controller.disconnect(&handle).await.unwrap_err();

        assert!(matches!(err, DeviceError::Teardown(_)));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.reading().is_zero());
        assert!(!controller.is_active());
        assert!(drain(&mut events).iter().any(|event| matches!(
            event,
            AppEvent::DeviceNotice(notice) if notice.kind == NoticeKind::TeardownIncomplete
        )));
    }

    #[tokio::test]
    async fn declined_selection_reports_and_returns_to_disconnected() {
        let (mut controller, bench) = controller();
        bench.decline.store(true, Ordering::SeqCst);
        let mut events = controller.session().events().subscribe();

        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, DeviceError::SelectionDeclined(_)));
        assert_eq!(bench.opens.load(Ordering::SeqCst), 0);

        let events = drain(&mut events);
        assert_eq!(
            events[..2],
            [
                AppEvent::ConnectionStateChanged {
                    state: ConnectionState::Connecting
                },
                AppEvent::ConnectionStateChanged {
                    state: ConnectionState::Disconnected
                },
            ]
        );
        assert!(matches!(
            &events[2],
            AppEvent::DeviceNotice(notice) if notice.kind == NoticeKind::SelectionDeclined
        ));
    }

    #[tokio::test]
    async fn busy_port_is_reported_as_busy() {
        let (mut controller, bench) = controller();
        *bench.open_error.lock().unwrap() = Some(DeviceError::PortBusy {
            port: "bench0".into(),
        });

        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, DeviceError::PortBusy { .. }));
        assert_eq!(err.notice_kind(), NoticeKind::DeviceBusy);
        assert_eq!(controller.session().state(), ConnectionState::Disconnected);
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn stream_end_disconnects_and_allows_reconnect() {
        let (mut controller, bench) = controller();
        let session = Arc::clone(controller.session());
        controller.connect().await.unwrap();

        let tx = bench.sender();
        tx.send(Ok("Load_cell output val: 3.5\n".into())).await.unwrap();
        drop(tx);
        bench.sender.lock().unwrap().take();

        wait_for_state(&session, ConnectionState::Disconnected).await;
        assert_eq!(session.reading().weight, 3.5);

        let handle = controller.connect().await.unwrap();
        assert_eq!(bench.opens.load(Ordering::SeqCst), 2);
        assert_eq!(bench.closes.load(Ordering::SeqCst), 1);
        controller.disconnect(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn read_failure_passes_through_failed() {
        let (mut controller, bench) = controller();
        let session = Arc::clone(controller.session());
        let mut events = session.events().subscribe();
        controller.connect().await.unwrap();

        bench
            .sender()
            .send(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")))
            .await
            .unwrap();
        wait_for_state(&session, ConnectionState::Disconnected).await;

        let states: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::ConnectionStateChanged { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Failed,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn stale_handle_is_rejected_while_connected() {
        let (mut controller, _bench) = controller();
        let handle = controller.connect().await.unwrap();
        let stale = ConnectionHandle {
            id: "not-this-one".into(),
            port: handle.port.clone(),
        };

        let err = controller.disconnect(&stale).await.unwrap_err();
        assert!(matches!(err, DeviceError::UnknownHandle(_)));
        assert_eq!(controller.session().state(), ConnectionState::Connected);

        controller.shutdown().await.unwrap();
        assert_eq!(controller.session().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn runtime_keeps_running_while_the_operator_picks_a_port() {
        let (mut controller, bench) = controller();
        let (release, gate) = std_mpsc::channel();
        *bench.gate.lock().unwrap() = Some(gate);
        let session = Arc::clone(controller.session());

        let connecting = tokio::spawn(async move {
            let handle = controller.connect().await;
            (controller, handle)
        });

        // Only reachable while selection is parked on its own thread.
        wait_for_state(&session, ConnectionState::Connecting).await;
        assert_eq!(bench.opens.load(Ordering::SeqCst), 0);
        release.send(()).unwrap();

        let (mut controller, handle) = connecting.await.unwrap();
        let handle = handle.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(bench.opens.load(Ordering::SeqCst), 1);
        controller.disconnect(&handle).await.unwrap();
    }
}
