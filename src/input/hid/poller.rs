//! Fixed-cadence report polling for one device

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::{HidApiTransport, HidError, HidEvent, HidReport, HidTransport};

/// Shortest poll period; `tokio::time::interval` rejects zero
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result of a single read attempt
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing pending (short read)
    Idle,
    Report(HidReport),
    Disconnected,
    ReadError(String),
}

/// Read at most one report from `transport`
pub fn poll_once(device_path: &str, transport: &mut dyn HidTransport, buf: &mut [u8]) -> PollOutcome {
    match transport.read(buf) {
        Ok(0) => PollOutcome::Idle,
        Ok(len) => {
            let len = len.min(buf.len());
            PollOutcome::Report(HidReport::new(device_path, buf[..len].to_vec()))
        }
        Err(HidError::DeviceDisconnected(_)) => PollOutcome::Disconnected,
        Err(e) => PollOutcome::ReadError(e.to_string()),
    }
}

struct PollTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<Box<dyn HidTransport>>,
}

/// Polls one open HID device and forwards [`HidEvent`]s
pub struct HidPoller {
    path: String,
    report_len: usize,
    events: mpsc::Sender<HidEvent>,
    transport: Option<Box<dyn HidTransport>>,
    task: Option<PollTask>,
}

impl HidPoller {
    /// Open the device at `path` through hidapi
    pub fn open(path: &str, report_len: usize, events: mpsc::Sender<HidEvent>) -> Result<Self, HidError> {
        let transport = HidApiTransport::open(path)?;
        info!("Opened HID device: {}", path);
        Ok(Self::with_transport(path, Box::new(transport), report_len, events))
    }

    pub fn with_transport(
        path: impl Into<String>,
        transport: Box<dyn HidTransport>,
        report_len: usize,
        events: mpsc::Sender<HidEvent>,
    ) -> Self {
        Self {
            path: path.into(),
            report_len: report_len.max(1),
            events,
            transport: Some(transport),
            task: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the read loop is running (false after a disconnect)
    pub fn is_polling(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    /// Start reading every `interval` (at least 1 ms); no-op while already polling
    pub fn start_polling(&mut self, interval: Duration) {
        let interval = interval.max(MIN_POLL_INTERVAL);
        if self.task.is_some() {
            return;
        }
        let Some(transport) = self.transport.take() else {
            warn!("HID device {} is closed, not polling", self.path);
            return;
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(poll_loop(
            self.path.clone(),
            transport,
            self.report_len,
            interval,
            self.events.clone(),
            stop_rx,
        ));

        debug!("Polling {} every {:?}", self.path, interval);
        self.task = Some(PollTask { stop_tx, handle });
    }

    /// Stop the read loop and wait for it to finish
    ///
    /// Reads are non-blocking, so the loop exits at its next tick at the latest.
    pub async fn stop_polling(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        let _ = task.stop_tx.send(());
        match task.handle.await {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => warn!("HID poll task for {} failed: {}", self.path, e),
        }
        debug!("Stopped polling {}", self.path);
    }

    /// Stop polling and release the device handle
    pub async fn close(mut self) {
        self.stop_polling().await;
        self.transport = None;
        info!("Closed HID device: {}", self.path);
    }
}

async fn poll_loop(
    path: String,
    mut transport: Box<dyn HidTransport>,
    report_len: usize,
    interval: Duration,
    events: mpsc::Sender<HidEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Box<dyn HidTransport> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The device's declared length wins over the configured one when larger
    let buf_len = transport.report_len().map_or(report_len, |declared| declared.max(report_len));
    let mut buf = vec![0u8; buf_len];
    let mut truncation_reported = false;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let event = match poll_once(&path, transport.as_mut(), &mut buf) {
                    PollOutcome::Idle => continue,
                    PollOutcome::Report(report) => {
                        trace!("{} bytes from {}", report.payload.len(), path);
                        if report.payload.len() == buf_len && !truncation_reported {
                            truncation_reported = true;
                            warn!(
                                "Report from {} filled the {}-byte buffer and may be truncated; raise hid.report_buffer_len",
                                path, buf_len
                            );
                        }
                        HidEvent::Report(report)
                    }
                    PollOutcome::ReadError(message) => {
                        warn!("Read error on {}: {}", path, message);
                        HidEvent::ReadError { path: path.clone(), message }
                    }
                    PollOutcome::Disconnected => {
                        warn!("HID device disconnected: {}", path);
                        let _ = events.send(HidEvent::Disconnected { path: path.clone() }).await;
                        break;
                    }
                };

                if events.send(event).await.is_err() {
                    debug!("HID event receiver closed, stopping {}", path);
                    break;
                }
            }
        }
    }

    transport
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted device: each read pops the next step, then reports nothing
    struct ScriptedDevice {
        steps: VecDeque<Result<Vec<u8>, HidError>>,
    }

    impl ScriptedDevice {
        fn new(steps: Vec<Result<Vec<u8>, HidError>>) -> Box<Self> {
            Box::new(Self { steps: steps.into() })
        }
    }

    impl HidTransport for ScriptedDevice {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, HidError> {
            match self.steps.pop_front() {
                Some(Ok(data)) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    /// Scripted device that also declares its report length
    struct DeclaredDevice {
        inner: Box<ScriptedDevice>,
        report_len: usize,
    }

    impl HidTransport for DeclaredDevice {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, HidError> {
            self.inner.read(buf)
        }

        fn report_len(&self) -> Option<usize> {
            Some(self.report_len)
        }
    }

    #[test]
    fn test_poll_once_outcomes() {
        let mut device = ScriptedDevice::new(vec![
            Ok(vec![]),
            Ok(vec![0x01, 0x80]),
            Err(HidError::Read("timeout".into())),
            Err(HidError::DeviceDisconnected("gone".into())),
        ]);
        let mut buf = [0u8; 8];

        assert!(matches!(poll_once("dev", device.as_mut(), &mut buf), PollOutcome::Idle));
        match poll_once("dev", device.as_mut(), &mut buf) {
            PollOutcome::Report(r) => {
                assert_eq!(r.payload, vec![0x01, 0x80]);
                assert_eq!(r.report_id(), 0x01);
                assert_eq!(r.device_path, "dev");
            }
            other => panic!("expected report, got {:?}", other),
        }
        assert!(matches!(poll_once("dev", device.as_mut(), &mut buf), PollOutcome::ReadError(_)));
        assert!(matches!(poll_once("dev", device.as_mut(), &mut buf), PollOutcome::Disconnected));
    }

    #[tokio::test]
    async fn test_read_errors_do_not_stop_polling() {
        let (tx, mut rx) = mpsc::channel(16);
        let device = ScriptedDevice::new(vec![
            Err(HidError::Read("glitch".into())),
            Ok(vec![0x05]),
        ]);
        let mut poller = HidPoller::with_transport("dev", device, 8, tx);
        poller.start_polling(Duration::from_millis(1));

        assert!(matches!(rx.recv().await, Some(HidEvent::ReadError { .. })));
        assert!(matches!(rx.recv().await, Some(HidEvent::Report(_))));
        assert!(poller.is_polling());

        poller.close().await;
    }

    #[tokio::test]
    async fn test_disconnect_stops_only_that_device() {
        let (tx, mut rx) = mpsc::channel(64);
        let failing = ScriptedDevice::new(vec![
            Ok(vec![0x01]),
            Err(HidError::DeviceDisconnected("unplugged".into())),
            Ok(vec![0x02]),
        ]);
        let healthy = ScriptedDevice::new(vec![Ok(vec![0x10]), Ok(vec![0x11]), Ok(vec![0x12])]);

        let mut a = HidPoller::with_transport("dev-a", failing, 8, tx.clone());
        let mut b = HidPoller::with_transport("dev-b", healthy, 8, tx);
        a.start_polling(Duration::from_millis(1));
        b.start_polling(Duration::from_millis(1));

        let mut from_a = Vec::new();
        let mut from_b = Vec::new();
        let mut disconnected = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_millis(500));
        tokio::pin!(deadline);

        while from_b.len() < 3 || disconnected.is_empty() {
            tokio::select! {
                _ = &mut deadline => break,
                Some(event) = rx.recv() => match event {
                    HidEvent::Report(r) if r.device_path == "dev-a" => from_a.push(r.payload),
                    HidEvent::Report(r) => from_b.push(r.payload),
                    HidEvent::Disconnected { path } => disconnected.push(path),
                    HidEvent::ReadError { .. } => {}
                },
            }
        }

        assert_eq!(from_a, vec![vec![0x01]]);
        assert_eq!(from_b, vec![vec![0x10], vec![0x11], vec![0x12]]);
        assert_eq!(disconnected, vec!["dev-a".to_string()]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!a.is_polling());
        assert!(b.is_polling());

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_stop_and_restart_keeps_device() {
        let (tx, mut rx) = mpsc::channel(8);
        let device = ScriptedDevice::new(vec![Ok(vec![0x01])]);
        let mut poller = HidPoller::with_transport("dev", device, 8, tx);

        poller.start_polling(Duration::from_millis(1));
        assert!(matches!(rx.recv().await, Some(HidEvent::Report(_))));
        poller.stop_polling().await;
        assert!(!poller.is_polling());

        poller.start_polling(Duration::from_millis(1));
        assert!(poller.is_polling());
        poller.close().await;
    }

    #[tokio::test]
    async fn test_declared_report_length_sizes_buffer() {
        let (tx, mut rx) = mpsc::channel(8);
        let long_report: Vec<u8> = (0..100).collect();
        let device = Box::new(DeclaredDevice {
            inner: ScriptedDevice::new(vec![Ok(long_report.clone())]),
            report_len: 100,
        });
        let mut poller = HidPoller::with_transport("dev", device, 64, tx);
        poller.start_polling(Duration::from_millis(1));

        match rx.recv().await {
            Some(HidEvent::Report(r)) => assert_eq!(r.payload, long_report),
            other => panic!("expected report, got {:?}", other),
        }
        poller.close().await;
    }

    #[tokio::test]
    async fn test_zero_interval_still_polls() {
        let (tx, mut rx) = mpsc::channel(8);
        let device = ScriptedDevice::new(vec![Ok(vec![0x01])]);
        let mut poller = HidPoller::with_transport("dev", device, 8, tx);

        poller.start_polling(Duration::ZERO);
        assert!(matches!(rx.recv().await, Some(HidEvent::Report(_))));

        // The task survived, so stopping hands the transport back
        poller.stop_polling().await;
        poller.start_polling(Duration::ZERO);
        assert!(poller.is_polling());
        poller.close().await;
    }
}
