// src/connection.rs
//
// Bus connection manager: owns at most one open CAN channel, runs its driver
// on a blocking thread, relays inbound frames to a sink, and sends frames.

use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc as std_mpsc, Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::filter::IgnoreIds;
use crate::io::types::{SourceMessage, TransmitRequest, TransmitSender};
use crate::io::{now_us, run_driver, BusConfig, BusOpener, Direction, FrameMessage, IoError};

/// Pending transmit requests per connection
const TRANSMIT_QUEUE_DEPTH: usize = 32;
/// Frames buffered between the driver thread and the relay task
const RELAY_QUEUE_DEPTH: usize = 256;
/// How long `send` waits for the driver to report the write result
const TRANSMIT_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Not connected")]
    NotConnected,

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("Connection task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("No connection!! Please connect to CAN device")]
    NotConnected,

    #[error(transparent)]
    Io(#[from] IoError),

    #[error("Transmit queue full")]
    QueueFull,

    #[error("Driver stopped; reconnect to send")]
    Stopped,

    #[error("Transmit timeout: {0}")]
    Timeout(String),

    #[error("Transmit task failed: {0}")]
    Task(String),
}

// ============================================================================
// Frame Sink
// ============================================================================

/// Receives inbound frames from the relay task, in arrival order.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: FrameMessage);

    /// The driver hit a read error and stopped.
    fn on_source_error(&self, message: String) {
        tlog!("[connection] Source error: {}", message);
    }
}

/// Stamp, filter and deliver frames until the driver ends.
async fn relay_frames(
    mut rx: mpsc::Receiver<SourceMessage>,
    ignore: IgnoreIds,
    sink: Arc<dyn FrameSink>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            SourceMessage::Frame(mut frame) => {
                frame.direction = Direction::Rx;
                if frame.timestamp_us == 0 {
                    frame.timestamp_us = now_us();
                }
                if ignore.contains(frame.frame_id) {
                    continue;
                }
                sink.on_frame(frame);
            }
            SourceMessage::Error(message) => sink.on_source_error(message),
            SourceMessage::Ended(_) => break,
        }
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

/// An open channel and the tasks serving it
struct Link {
    config: BusConfig,
    stop_flag: Arc<AtomicBool>,
    transmit_tx: TransmitSender,
    driver_task: JoinHandle<()>,
    relay_task: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

pub struct ConnectionManager {
    opener: Arc<dyn BusOpener>,
    sink: Arc<dyn FrameSink>,
    ignore: IgnoreIds,
    link: Option<Link>,
}

impl ConnectionManager {
    pub fn new(opener: Arc<dyn BusOpener>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            opener,
            sink,
            ignore: IgnoreIds::new(),
            link: None,
        }
    }

    /// True while a channel is open
    pub fn status(&self) -> bool {
        self.link.is_some()
    }

    /// Settings of the open channel
    pub fn config(&self) -> Option<&BusConfig> {
        self.link.as_ref().map(|link| &link.config)
    }

    /// Replace the ignore set; applies to frames relayed from now on
    pub fn set_ignore_ids(&self, ids: HashSet<u32>) {
        self.ignore.replace(ids);
    }

    pub fn ignore_ids(&self) -> &IgnoreIds {
        &self.ignore
    }

    /// Open a channel and start relaying its frames to the sink
    pub async fn connect(&mut self, config: BusConfig) -> Result<(), ConnectError> {
        if let Some(link) = &self.link {
            return Err(ConnectError::AlreadyConnected(link.config.device()));
        }

        let device = config.device();
        tlog!("[connection] Opening {} at {} bps", device, config.bitrate);

        let opener = self.opener.clone();
        let open_config = config.clone();
        let driver = tokio::task::spawn_blocking(move || opener.open(&open_config))
            .await
            .map_err(|e| ConnectError::Task(e.to_string()))??;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (transmit_tx, transmit_rx) =
            std_mpsc::sync_channel::<TransmitRequest>(TRANSMIT_QUEUE_DEPTH);
        let (tx, rx) = mpsc::channel(RELAY_QUEUE_DEPTH);

        let driver_stop = stop_flag.clone();
        let driver_device = device.clone();
        let driver_task = tokio::task::spawn_blocking(move || {
            run_driver(driver, driver_device, driver_stop, transmit_rx, tx)
        });
        let relay_task = tokio::spawn(relay_frames(rx, self.ignore.clone(), self.sink.clone()));

        tlog!("[connection] Connected to {}", device);
        self.link = Some(Link {
            config,
            stop_flag,
            transmit_tx,
            driver_task,
            relay_task,
        });
        Ok(())
    }

    /// Stop the driver, close the channel and wait for the relay to finish.
    pub async fn disconnect(&mut self) -> Result<(), ConnectError> {
        let mut link = self.link.take().ok_or(ConnectError::NotConnected)?;
        let device = link.config.device();

        link.stop_flag.store(true, Ordering::SeqCst);
        if let Err(e) = (&mut link.driver_task).await {
            tlog!("[connection] Driver task for {} failed: {}", device, e);
        }
        if let Err(e) = (&mut link.relay_task).await {
            tlog!("[connection] Relay task for {} failed: {}", device, e);
        }

        tlog!("[connection] Disconnected from {}", device);
        Ok(())
    }

    /// Send a frame. Returns the frame as sent (TX, timestamped).
    pub async fn send(&self, frame: FrameMessage) -> Result<FrameMessage, SendError> {
        let link = self.link.as_ref().ok_or(SendError::NotConnected)?;

        let mut frame = frame;
        frame.direction = Direction::Tx;
        frame.timestamp_us = now_us();

        let (result_tx, result_rx) = std_mpsc::sync_channel(1);
        link.transmit_tx
            .try_send(TransmitRequest {
                frame: frame.clone(),
                result_tx,
            })
            .map_err(|e| match e {
                std_mpsc::TrySendError::Full(_) => SendError::QueueFull,
                std_mpsc::TrySendError::Disconnected(_) => SendError::Stopped,
            })?;

        let result = tokio::task::spawn_blocking(move || result_rx.recv_timeout(TRANSMIT_TIMEOUT))
            .await
            .map_err(|e| SendError::Task(e.to_string()))?
            .map_err(|e| match e {
                // The driver exited with the request still queued
                std_mpsc::RecvTimeoutError::Disconnected => SendError::Stopped,
                std_mpsc::RecvTimeoutError::Timeout => SendError::Timeout(e.to_string()),
            })?;
        result?;

        Ok(frame)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::display::format_frame_line;
    use crate::io::{CanDriver, TransportKind};
    use std::sync::Mutex;

    /// In-memory bus: frames pushed into `inject` are read by the driver,
    /// written frames are recorded.
    pub(crate) struct MockBus {
        incoming: Mutex<Option<std_mpsc::Receiver<FrameMessage>>>,
        pub written: Arc<Mutex<Vec<FrameMessage>>>,
        pub fail_open: bool,
        /// How long a read blocks when no frame arrives
        read_timeout: Duration,
    }

    impl MockBus {
        pub fn new() -> (Arc<Self>, std_mpsc::Sender<FrameMessage>) {
            Self::with_read_timeout(Duration::from_millis(5))
        }

        /// A bus whose reads block as long as a real adapter's read timeout
        pub fn slow(read_timeout: Duration) -> (Arc<Self>, std_mpsc::Sender<FrameMessage>) {
            Self::with_read_timeout(read_timeout)
        }

        fn with_read_timeout(read_timeout: Duration) -> (Arc<Self>, std_mpsc::Sender<FrameMessage>) {
            let (inject, incoming) = std_mpsc::channel();
            let bus = Arc::new(Self {
                incoming: Mutex::new(Some(incoming)),
                written: Arc::new(Mutex::new(Vec::new())),
                fail_open: false,
                read_timeout,
            });
            (bus, inject)
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                incoming: Mutex::new(None),
                written: Arc::new(Mutex::new(Vec::new())),
                fail_open: true,
                read_timeout: Duration::from_millis(5),
            })
        }
    }

    struct MockDriver {
        incoming: Option<std_mpsc::Receiver<FrameMessage>>,
        written: Arc<Mutex<Vec<FrameMessage>>>,
        read_timeout: Duration,
    }

    impl CanDriver for MockDriver {
        fn read_frame(&mut self) -> Result<Option<FrameMessage>, IoError> {
            let Some(incoming) = &self.incoming else {
                std::thread::sleep(self.read_timeout);
                return Ok(None);
            };
            match incoming.recv_timeout(self.read_timeout) {
                Ok(frame) => Ok(Some(frame)),
                Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    Err(IoError::protocol("mock", "bus unplugged"))
                }
            }
        }

        fn write_frame(&mut self, frame: &FrameMessage) -> Result<(), IoError> {
            if frame.frame_id == 0x666 {
                return Err(IoError::protocol("mock", "bus-off"));
            }
            self.written.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }

    impl BusOpener for MockBus {
        fn open(&self, config: &BusConfig) -> Result<Box<dyn CanDriver>, IoError> {
            if self.fail_open {
                return Err(IoError::connection(config.device(), "No such device"));
            }
            Ok(Box::new(MockDriver {
                incoming: self.incoming.lock().unwrap().take(),
                written: self.written.clone(),
                read_timeout: self.read_timeout,
            }))
        }
    }

    /// Sink that forwards frames and errors into a channel
    pub(crate) struct ChannelSink(pub mpsc::UnboundedSender<Result<FrameMessage, String>>);

    impl FrameSink for ChannelSink {
        fn on_frame(&self, frame: FrameMessage) {
            let _ = self.0.send(Ok(frame));
        }

        fn on_source_error(&self, message: String) {
            let _ = self.0.send(Err(message));
        }
    }

    fn manager(
        bus: Arc<MockBus>,
    ) -> (
        ConnectionManager,
        mpsc::UnboundedReceiver<Result<FrameMessage, String>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionManager::new(bus, Arc::new(ChannelSink(tx))), rx)
    }

    fn can0() -> BusConfig {
        BusConfig::new("can0", 500_000, TransportKind::SocketCan)
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<Result<FrameMessage, String>>,
    ) -> Result<FrameMessage, String> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for relay")
            .expect("sink channel closed")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_send_and_log_line() {
        let (bus, _inject) = MockBus::new();
        let (mut conn, _rx) = manager(bus.clone());
        assert!(!conn.status());
        assert!(conn.config().is_none());

        conn.connect(can0()).await.unwrap();
        assert!(conn.status());
        assert_eq!(conn.config().unwrap().channel, "can0");

        let sent = conn
            .send(FrameMessage::new(0x123, &[1, 2], false))
            .await
            .unwrap();
        assert_eq!(sent.direction, Direction::Tx);
        assert!(sent.timestamp_us > 0);

        let line = format_frame_line(&sent);
        assert!(line.contains("TX:"));
        assert!(line.contains("_____123"));
        assert!(line.ends_with("data:01 02"));

        assert_eq!(bus.written.lock().unwrap()[0].frame_id, 0x123);
        conn.disconnect().await.unwrap();
        assert!(!conn.status());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_relay_filters_and_preserves_order() {
        let (bus, inject) = MockBus::new();
        let (mut conn, mut rx) = manager(bus);
        conn.set_ignore_ids(HashSet::from([0x200]));
        conn.connect(can0()).await.unwrap();

        for id in [0x100, 0x200, 0x300, 0x200, 0x400] {
            inject.send(FrameMessage::new(id, &[0], false)).unwrap();
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            let frame = next_event(&mut rx).await.unwrap();
            assert_eq!(frame.direction, Direction::Rx);
            assert!(frame.timestamp_us > 0);
            ids.push(frame.frame_id);
        }
        assert_eq!(ids, vec![0x100, 0x300, 0x400]);

        conn.set_ignore_ids(HashSet::new());
        inject.send(FrameMessage::new(0x200, &[0], false)).unwrap();
        assert_eq!(next_event(&mut rx).await.unwrap().frame_id, 0x200);

        conn.disconnect().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_error_reported_and_connection_kept() {
        let (bus, inject) = MockBus::new();
        let (mut conn, mut rx) = manager(bus);
        conn.connect(can0()).await.unwrap();

        drop(inject);
        let err = next_event(&mut rx).await.unwrap_err();
        assert!(err.contains("bus unplugged"));
        assert!(conn.status());

        let err = conn.send(FrameMessage::new(1, &[1], false)).await.unwrap_err();
        assert!(matches!(err, SendError::Stopped), "{:?}", err);
        conn.disconnect().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_twice_is_refused() {
        let (bus, _inject) = MockBus::new();
        let (mut conn, _rx) = manager(bus);
        conn.connect(can0()).await.unwrap();
        assert!(matches!(
            conn.connect(can0()).await,
            Err(ConnectError::AlreadyConnected(_))
        ));
        conn.disconnect().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_failure_leaves_disconnected() {
        let (mut conn, _rx) = manager(MockBus::failing());
        let err = conn.connect(can0()).await.unwrap_err();
        assert!(matches!(err, ConnectError::Io(_)));
        assert!(err.to_string().contains("No such device"));
        assert!(!conn.status());
    }

    #[tokio::test]
    async fn test_disconnect_and_send_without_connection() {
        let (bus, _inject) = MockBus::new();
        let (mut conn, _rx) = manager(bus);
        assert!(matches!(
            conn.disconnect().await,
            Err(ConnectError::NotConnected)
        ));
        assert!(matches!(
            conn.send(FrameMessage::new(1, &[1], false)).await,
            Err(SendError::NotConnected)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transport_rejection_surfaces_as_send_error() {
        let (bus, _inject) = MockBus::new();
        let (mut conn, _rx) = manager(bus);
        conn.connect(can0()).await.unwrap();
        let err = conn
            .send(FrameMessage::new(0x666, &[1], false))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Io(_)));
        assert!(err.to_string().contains("bus-off"));
        conn.disconnect().await.unwrap();
    }
}
