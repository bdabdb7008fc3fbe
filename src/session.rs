// Device session: owns the link and the device state, sends commands and
// runs the telemetry loop.
//
// Note: the loop pushes a SyncState frame after every received notification
// and never on a timer, so output changes reach the robot only when it has
// reported something.
// TODO: confirm with the firmware whether a periodic sync is expected instead.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{POLL_TIMEOUT, TELEMETRY_STALE_TIMEOUT};
use crate::device::{SharedState, Uid};
use crate::link::{Link, LinkError};
use crate::messages::{LinkHealth, TelemetrySnapshot};
use crate::protocol::{decode, hex, Command, FrameError, Telemetry};
use crate::stop::StopSignal;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Link lost: {0}")]
    LinkLost(#[source] LinkError),

    #[error("Could not start telemetry thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Telemetry thread panicked")]
    Panicked,
}

pub type Result<T> = std::result::Result<T, SessionError>;

struct Inner {
    link: Mutex<Box<dyn Link>>,
    state: SharedState,
    uid: OnceLock<Uid>,
    last_notification: Mutex<Option<Instant>>,
    stop: StopSignal,
}

/// Cheap to clone; all clones drive the same link and state
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(link: Box<dyn Link>) -> Self {
        Self {
            inner: Arc::new(Inner {
                link: Mutex::new(link),
                state: SharedState::new(),
                uid: OnceLock::new(),
                last_notification: Mutex::new(None),
                stop: StopSignal::new(),
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, Box<dyn Link>> {
        self.inner.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle on the device state, shared with the script bridge
    pub fn state(&self) -> SharedState {
        self.inner.state.clone()
    }

    pub fn uid(&self) -> Option<Uid> {
        self.inner.uid.get().copied()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner
            .state
            .read(|state| TelemetrySnapshot::new(state, self.uid()))
    }

    /// Ok while notifications keep arriving, Stale before the first one
    pub fn health(&self) -> LinkHealth {
        let last = *self
            .inner
            .last_notification
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match last {
            Some(at) if at.elapsed() <= TELEMETRY_STALE_TIMEOUT => LinkHealth::Ok,
            _ => LinkHealth::Stale,
        }
    }

    // === Commands ===

    pub fn send_identity_request(&self) -> Result<()> {
        debug!("Requesting device identity");
        self.link().write(&Command::RequestIdentity.encode())?;
        Ok(())
    }

    /// Push the current motors and LEDs to the device
    pub fn send_state_sync(&self) -> Result<()> {
        let frame = self.sync_frame();
        self.link().write(&frame)?;
        Ok(())
    }

    /// Upload a script to the device's onboard store
    pub fn send_script(&self, script: &str) -> Result<()> {
        let (header, body) = Command::upload_script(script)?;
        info!("Uploading {} byte script", body.len());

        // Header and text must go out back to back
        let mut link = self.link();
        link.write(&header.encode())?;
        link.write(body)?;
        Ok(())
    }

    pub fn send_test(&self) -> Result<()> {
        self.link().write(&Command::Test.encode())?;
        Ok(())
    }

    /// Zero the motors, switch the LEDs off and tell the device
    pub fn halt_outputs(&self) -> Result<()> {
        info!("Stopping motors and LEDs");
        self.inner.state.update(|state| state.reset_outputs());
        self.send_state_sync()
    }

    fn sync_frame(&self) -> Vec<u8> {
        self.inner.state.read(Command::sync_state).encode()
    }

    // === Telemetry ===

    /// Decode a notification and apply it. Invalid frames are logged and
    /// dropped without touching the device state.
    pub fn on_frame_received(&self, bytes: &[u8]) -> Option<Telemetry> {
        match decode(bytes) {
            Ok(Telemetry::State(report)) => {
                self.inner.state.update(|state| state.apply_report(&report));
                debug!(
                    "State: mode={} battery={} distances={:?}",
                    report.mode, report.battery_level, report.distances
                );
                Some(Telemetry::State(report))
            }
            Ok(Telemetry::Identity(uid)) => {
                match self.inner.uid.set(uid) {
                    Ok(()) => info!("Device UID: {}", uid),
                    Err(_) => {
                        if self.uid() != Some(uid) {
                            warn!("Ignoring second UID {} (session UID is fixed)", uid);
                        }
                    }
                }
                Some(Telemetry::Identity(uid))
            }
            Err(e) if e.is_malformed() => {
                warn!("Discarding malformed frame {}: {}", hex(bytes), e);
                None
            }
            Err(e) => {
                debug!("Ignoring frame {}: {}", hex(bytes), e);
                None
            }
        }
    }

    /// One telemetry iteration. Returns whether a notification arrived.
    pub fn poll_once(&self, timeout: Duration) -> Result<bool> {
        let received = self.link().poll_notification(timeout);

        match received {
            Ok(Some(bytes)) => {
                *self
                    .inner
                    .last_notification
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
                self.on_frame_received(&bytes);

                // Re-sync the device once per notification
                let frame = self.sync_frame();
                self.link().write(&frame).map_err(SessionError::LinkLost)?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(SessionError::LinkLost(e)),
        }
    }

    /// Poll until stopped or the link drops
    pub fn run_telemetry_loop(&self) -> Result<()> {
        info!("Telemetry loop started ({}ms poll)", POLL_TIMEOUT.as_millis());
        while !self.inner.stop.is_stopped() {
            if let Err(e) = self.poll_once(POLL_TIMEOUT) {
                error!("Telemetry loop ended: {}", e);
                return Err(e);
            }
        }
        info!("Telemetry loop stopped");
        Ok(())
    }

    /// Run the telemetry loop on its own thread
    pub fn spawn_telemetry(&self) -> Result<TelemetryHandle> {
        let session = self.clone();
        let handle = thread::Builder::new()
            .name("telemetry".into())
            .spawn(move || session.run_telemetry_loop())?;
        Ok(TelemetryHandle {
            handle,
            stop: self.inner.stop.clone(),
        })
    }

    /// Ask the telemetry loop to exit after its current poll
    pub fn stop(&self) {
        self.inner.stop.stop();
    }
}

pub struct TelemetryHandle {
    handle: JoinHandle<Result<()>>,
    stop: StopSignal,
}

impl TelemetryHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<()> {
        self.handle.join().map_err(|_| SessionError::Panicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NUS_RX_CHAR_UUID;
    use crate::link::{SimRobot, SimTransport, Transport};

    const IDENTITY: [u8; 13] = [
        0xFF, 0xFE, 0x08, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0xFD, 0xFC,
    ];

    fn session() -> (SimRobot, Session) {
        let transport = SimTransport::default();
        let robot = transport.robot();
        robot.set_report_interval(None);
        let mut link = transport.connect("sim").unwrap();
        link.enable_notifications(NUS_RX_CHAR_UUID).unwrap();
        (robot, Session::new(link))
    }

    fn state_report(battery: u8, d1: u8, d2: u8) -> [u8; 11] {
        [0xFF, 0xFE, 0x06, 0x02, 0x00, battery, 0x00, d1, d2, 0xFD, 0xFC]
    }

    #[test]
    fn test_identity_request_yields_uid() {
        let (robot, session) = session();
        session.send_identity_request().unwrap();
        assert!(session.poll_once(Duration::from_millis(100)).unwrap());

        assert_eq!(session.uid().unwrap().to_string(), "1122334455667788");
        let written = robot.written();
        assert_eq!(written[0], vec![0xFF, 0xFE, 0x01, 0x04, 0xFD, 0xFC]);
    }

    #[test]
    fn test_every_notification_triggers_sync() {
        let (robot, session) = session();
        session.state().update(|s| {
            s.motors[0].set_speed(9, Some(-1));
            s.leds[3].set_color(6);
        });

        robot.inject(&state_report(100, 3, 4));
        robot.inject(&state_report(99, 3, 4));
        assert!(session.poll_once(Duration::from_millis(50)).unwrap());
        assert!(session.poll_once(Duration::from_millis(50)).unwrap());

        let written = robot.written();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], written[1]);
        assert_eq!(robot.motors(), [-9, 0]);
        assert_eq!(robot.leds(), [0, 0, 0, 6]);
        assert_eq!(session.state().read(|s| s.battery_level), 99);
    }

    #[test]
    fn test_no_sync_without_notification() {
        let (robot, session) = session();
        assert!(!session.poll_once(Duration::from_millis(20)).unwrap());
        assert!(robot.written().is_empty());
    }

    #[test]
    fn test_malformed_frame_leaves_state_unchanged() {
        let (_robot, session) = session();
        session.on_frame_received(&state_report(50, 10, 20));
        let before = session.state().snapshot();

        let mut bad = state_report(1, 1, 1);
        bad[9] = 0x00;
        assert!(session.on_frame_received(&bad).is_none());
        assert!(session.on_frame_received(&[0xFF, 0xFE, 0x06]).is_none());
        assert_eq!(session.state().snapshot(), before);
    }

    #[test]
    fn test_uid_is_write_once() {
        let (_robot, session) = session();
        session.on_frame_received(&IDENTITY);
        let mut other = IDENTITY;
        other[3] = 0x99;
        session.on_frame_received(&other);
        assert_eq!(session.uid().unwrap().to_string(), "1122334455667788");
    }

    #[test]
    fn test_send_script_writes_header_then_text() {
        let (robot, session) = session();
        session.send_script("L(0,4)\n").unwrap();

        let written = robot.written();
        assert_eq!(written.len(), 2);
        assert_eq!(&written[0][..6], &[0xFF, 0xFE, 0x09, 0x02, 0x00, 0x07]);
        assert_eq!(written[1], b"L(0,4)\n".to_vec());
        assert_eq!(robot.uploaded_script().as_deref(), Some("L(0,4)\n"));
    }

    #[test]
    fn test_send_test_command() {
        let (robot, session) = session();
        session.send_test().unwrap();
        assert_eq!(robot.test_commands(), 1);
    }

    #[test]
    fn test_halt_outputs() {
        let (robot, session) = session();
        session.state().update(|s| {
            s.motors[1].set_speed(50, None);
            s.leds[0].set_color(1);
        });
        session.send_state_sync().unwrap();
        assert_eq!(robot.motors(), [0, 50]);

        session.halt_outputs().unwrap();
        assert_eq!(robot.motors(), [0, 0]);
        assert_eq!(robot.leds(), [0, 0, 0, 0]);
    }

    #[test]
    fn test_health_goes_ok_on_notification() {
        let (robot, session) = session();
        assert_eq!(session.health(), LinkHealth::Stale);
        robot.inject(&state_report(1, 2, 3));
        session.poll_once(Duration::from_millis(50)).unwrap();
        assert_eq!(session.health(), LinkHealth::Ok);
    }

    #[test]
    fn test_telemetry_loop_stops_promptly() {
        let (robot, session) = session();
        robot.set_report_interval(Some(Duration::from_millis(10)));
        let handle = session.spawn_telemetry().unwrap();

        thread::sleep(Duration::from_millis(100));
        let stopped_at = Instant::now();
        handle.stop();
        handle.join().unwrap();
        assert!(stopped_at.elapsed() < Duration::from_millis(500));

        // Reports flowed and each one was answered with a sync frame
        assert!(!robot.written().is_empty());
        assert!(session.state().read(|s| s.battery_level) > 0);
    }

    #[test]
    fn test_link_loss_ends_loop() {
        let (robot, session) = session();
        let handle = session.spawn_telemetry().unwrap();
        robot.disconnect();
        assert!(matches!(handle.join(), Err(SessionError::LinkLost(_))));
    }
}
