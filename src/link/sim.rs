// Simulated robot for running without hardware (and for tests)
//
// Behaves like the real device on the wire: answers identity requests,
// reports state on a fixed interval once notifications are on, and applies
// SyncState frames. Distance readings follow the motors: driving forward
// closes in on an obstacle, driving backward moves away from it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{Link, LinkError, Result, Transport};
use crate::config::{CCCD_ENABLE_NOTIFICATIONS, NUS_RX_CHAR_UUID};
use crate::device::Uid;
use crate::protocol::frame::{
    CommandCode, ControlSubtype, CONTROL_FRAME_LEN, FOOTER, HEADER, IDENTITY_REQUEST_LEN,
};
use crate::protocol::hex;

pub const DEFAULT_SIM_UID: Uid = Uid([0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(200);

const POLL_STEP: Duration = Duration::from_millis(5);
const MAX_DISTANCE: i32 = 200;
const START_DISTANCE: u8 = 40;
const START_BATTERY: u8 = 200;
const REPORTS_PER_BATTERY_STEP: u32 = 50;
/// Host writes kept for inspection; older ones are dropped
const WRITE_LOG_CAPACITY: usize = 256;

#[derive(Debug)]
struct SimDevice {
    uid: Uid,
    connected: bool,
    notifications: Option<[u8; 2]>,
    motors: [i8; 2],
    leds: [u8; 4],
    distances: [u8; 2],
    battery: u8,
    mode: u8,
    report_interval: Option<Duration>,
    next_report: Instant,
    reports_sent: u32,
    inbox: VecDeque<Vec<u8>>,
    written: VecDeque<Vec<u8>>,
    pending_upload: Option<usize>,
    uploaded_script: Option<String>,
    test_commands: u32,
}

impl SimDevice {
    fn new(uid: Uid) -> Self {
        Self {
            uid,
            connected: false,
            notifications: None,
            motors: [0; 2],
            leds: [0; 4],
            distances: [START_DISTANCE; 2],
            battery: START_BATTERY,
            mode: 1,
            report_interval: Some(DEFAULT_REPORT_INTERVAL),
            next_report: Instant::now(),
            reports_sent: 0,
            inbox: VecDeque::new(),
            written: VecDeque::with_capacity(WRITE_LOG_CAPACITY),
            pending_upload: None,
            uploaded_script: None,
            test_commands: 0,
        }
    }

    fn receive(&mut self, bytes: &[u8]) {
        if self.written.len() == WRITE_LOG_CAPACITY {
            self.written.pop_front();
        }
        self.written.push_back(bytes.to_vec());

        if let Some(len) = self.pending_upload.take() {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if text.len() != len {
                debug!("Sim: script length {} differs from header {}", text.len(), len);
            }
            info!("Sim: stored {} byte script", text.len());
            self.uploaded_script = Some(text);
            return;
        }

        let framed = bytes.len() >= 5
            && bytes[..2] == HEADER
            && bytes[bytes.len() - 2..] == FOOTER;
        if !framed {
            debug!("Sim: ignoring unframed write {}", hex(bytes));
            return;
        }

        match (bytes.len(), bytes[2]) {
            (IDENTITY_REQUEST_LEN, c) if c == CommandCode::RequestIdentity as u8 => {
                let mut reply = Vec::with_capacity(13);
                reply.extend_from_slice(&HEADER);
                reply.push(CommandCode::IdentityReport as u8);
                reply.extend_from_slice(self.uid.as_bytes());
                reply.extend_from_slice(&FOOTER);
                self.inbox.push_back(reply);
            }
            (CONTROL_FRAME_LEN, c) if c == CommandCode::Control as u8 => match bytes[3] {
                s if s == ControlSubtype::SyncState as u8 => {
                    self.motors = [bytes[5] as i8, bytes[6] as i8];
                    self.leds.copy_from_slice(&bytes[8..12]);
                }
                s if s == ControlSubtype::UploadScript as u8 => {
                    self.pending_upload = Some(usize::from(u16::from_be_bytes([bytes[4], bytes[5]])));
                }
                s if s == ControlSubtype::Test as u8 => self.test_commands += 1,
                other => debug!("Sim: unknown control subtype {}", other),
            },
            _ => debug!("Sim: unknown command {}", hex(bytes)),
        }
    }

    fn state_report(&mut self) -> Vec<u8> {
        // Positive speeds drive towards the obstacle
        let approach = (i32::from(self.motors[0]) + i32::from(self.motors[1])) / 4;
        for distance in &mut self.distances {
            *distance = (i32::from(*distance) - approach).clamp(0, MAX_DISTANCE) as u8;
        }

        self.reports_sent += 1;
        if self.reports_sent % REPORTS_PER_BATTERY_STEP == 0 {
            self.battery = self.battery.saturating_sub(1);
        }

        vec![
            HEADER[0],
            HEADER[1],
            CommandCode::StateReport as u8,
            self.mode,
            0,
            self.battery,
            0,
            self.distances[0],
            self.distances[1],
            FOOTER[0],
            FOOTER[1],
        ]
    }

    fn next_notification(&mut self) -> Option<Vec<u8>> {
        self.notifications?;
        if let Some(frame) = self.inbox.pop_front() {
            return Some(frame);
        }
        let interval = self.report_interval?;
        let now = Instant::now();
        if now >= self.next_report {
            self.next_report = now + interval;
            return Some(self.state_report());
        }
        None
    }
}

/// Shared handle on the simulated robot, for inspecting what the host sent
#[derive(Debug, Clone)]
pub struct SimRobot {
    inner: Arc<Mutex<SimDevice>>,
}

impl Default for SimRobot {
    fn default() -> Self {
        Self::new(DEFAULT_SIM_UID)
    }
}

impl SimRobot {
    pub fn new(uid: Uid) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimDevice::new(uid))),
        }
    }

    fn device(&self) -> MutexGuard<'_, SimDevice> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Periodic StateReports; None turns them off
    pub fn set_report_interval(&self, interval: Option<Duration>) {
        let mut dev = self.device();
        dev.report_interval = interval;
        dev.next_report = Instant::now();
    }

    pub fn set_distances(&self, distances: [u8; 2]) {
        self.device().distances = distances;
    }

    /// Queue a raw notification, delivered ahead of periodic reports
    pub fn inject(&self, frame: &[u8]) {
        self.device().inbox.push_back(frame.to_vec());
    }

    /// Drop the connection; the next poll or write fails
    pub fn disconnect(&self) {
        self.device().connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.device().connected
    }

    /// Value last written to the notification descriptor
    pub fn notification_config(&self) -> Option<[u8; 2]> {
        self.device().notifications
    }

    pub fn motors(&self) -> [i8; 2] {
        self.device().motors
    }

    pub fn leds(&self) -> [u8; 4] {
        self.device().leds
    }

    /// The most recent buffers the host wrote, oldest first
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.device().written.iter().cloned().collect()
    }

    pub fn uploaded_script(&self) -> Option<String> {
        self.device().uploaded_script.clone()
    }

    pub fn test_commands(&self) -> u32 {
        self.device().test_commands
    }
}

pub struct SimLink {
    robot: SimRobot,
    has_descriptor: bool,
}

impl Link for SimLink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut dev = self.robot.device();
        if !dev.connected {
            return Err(LinkError::Disconnected);
        }
        debug!("TX {}", hex(bytes));
        dev.receive(bytes);
        Ok(())
    }

    fn poll_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut dev = self.robot.device();
                if !dev.connected {
                    return Err(LinkError::Disconnected);
                }
                if let Some(frame) = dev.next_notification() {
                    debug!("RX {}", hex(&frame));
                    return Ok(Some(frame));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            sleep(remaining.min(POLL_STEP));
        }
    }

    fn enable_notifications(&mut self, characteristic: &str) -> Result<()> {
        if !self.has_descriptor || !characteristic.eq_ignore_ascii_case(NUS_RX_CHAR_UUID) {
            return Err(LinkError::DescriptorNotFound {
                characteristic: characteristic.to_string(),
            });
        }
        self.robot.device().notifications = Some(CCCD_ENABLE_NOTIFICATIONS);
        Ok(())
    }
}

/// Opens links to a SimRobot, optionally failing the first few attempts
#[derive(Debug, Default)]
pub struct SimTransport {
    robot: SimRobot,
    failures_left: AtomicU32,
    missing_descriptor: bool,
}

impl SimTransport {
    pub fn new(robot: SimRobot) -> Self {
        Self {
            robot,
            failures_left: AtomicU32::new(0),
            missing_descriptor: false,
        }
    }

    /// Fail the next `count` connection attempts
    pub fn failing_attempts(self, count: u32) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Links from this transport have no notification descriptor
    pub fn without_descriptor(mut self) -> Self {
        self.missing_descriptor = true;
        self
    }

    pub fn robot(&self) -> SimRobot {
        self.robot.clone()
    }
}

impl Transport for SimTransport {
    fn connect(&self, address: &str) -> Result<Box<dyn Link>> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LinkError::ConnectFailed {
                address: address.to_string(),
                reason: "simulated connection failure".to_string(),
            });
        }

        info!("Sim: connected as {}", address);
        self.robot.device().connected = true;
        Ok(Box::new(SimLink {
            robot: self.robot.clone(),
            has_descriptor: !self.missing_descriptor,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, Command, Telemetry};

    fn connected() -> (SimRobot, Box<dyn Link>) {
        let transport = SimTransport::default();
        let robot = transport.robot();
        robot.set_report_interval(None);
        let mut link = transport.connect("sim").unwrap();
        link.enable_notifications(NUS_RX_CHAR_UUID).unwrap();
        (robot, link)
    }

    #[test]
    fn test_identity_request_is_answered() {
        let (_robot, mut link) = connected();
        link.write(&Command::RequestIdentity.encode()).unwrap();
        let reply = link.poll_notification(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(decode(&reply).unwrap(), Telemetry::Identity(DEFAULT_SIM_UID));
    }

    #[test]
    fn test_sync_state_applies_outputs() {
        let (robot, mut link) = connected();
        let cmd = Command::SyncState {
            motors: [-9, 6],
            leds: [1, 2, 3, 4],
        };
        link.write(&cmd.encode()).unwrap();
        assert_eq!(robot.motors(), [-9, 6]);
        assert_eq!(robot.leds(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_script_upload_is_two_writes() {
        let (robot, mut link) = connected();
        let (header, body) = Command::upload_script("MS(0)").unwrap();
        link.write(&header.encode()).unwrap();
        link.write(body).unwrap();
        assert_eq!(robot.uploaded_script().as_deref(), Some("MS(0)"));
    }

    #[test]
    fn test_reports_follow_motors() {
        let (robot, mut link) = connected();
        robot.set_distances([10, 10]);
        link.write(&Command::SyncState { motors: [8, 8], leds: [0; 4] }.encode())
            .unwrap();
        robot.set_report_interval(Some(Duration::from_millis(1)));

        let frame = link.poll_notification(Duration::from_millis(50)).unwrap().unwrap();
        match decode(&frame).unwrap() {
            Telemetry::State(report) => assert_eq!(report.distances, [6, 6]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_no_notifications_before_enable() {
        let transport = SimTransport::default();
        let robot = transport.robot();
        let mut link = transport.connect("sim").unwrap();
        robot.inject(&[0xFF, 0xFE]);
        assert!(link.poll_notification(Duration::from_millis(10)).unwrap().is_none());
        assert!(robot.notification_config().is_none());
    }

    #[test]
    fn test_write_log_is_bounded() {
        let (robot, mut link) = connected();
        for i in 0..WRITE_LOG_CAPACITY + 10 {
            link.write(&[i as u8]).unwrap();
        }
        let written = robot.written();
        assert_eq!(written.len(), WRITE_LOG_CAPACITY);
        assert_eq!(written[0], vec![10u8]);
        assert_eq!(written.last().unwrap(), &vec![(WRITE_LOG_CAPACITY + 9) as u8]);
    }

    #[test]
    fn test_disconnect_fails_io() {
        let (robot, mut link) = connected();
        robot.disconnect();
        assert!(matches!(
            link.poll_notification(Duration::from_millis(10)),
            Err(LinkError::Disconnected)
        ));
        assert!(matches!(link.write(&[0]), Err(LinkError::Disconnected)));
    }
}
