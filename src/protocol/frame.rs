// Apitor frame codec
//
// Every frame: [0xFF, 0xFE, Command, Payload..., 0xFD, 0xFC]
// The header and footer are the signed bytes -1, -2 and -3, -4.
//
// Outgoing (host -> robot):
//   RequestIdentity  6 bytes   FF FE 01 04 FD FC
//   SyncState       14 bytes   FF FE 09 01 02 m0 m1 00 l0 l1 l2 l3 FD FC
//   UploadScript    14 bytes   FF FE 09 02 hi lo 00 00 00 00 00 00 FD FC
//   Test            14 bytes   FF FE 09 03 00 00 00 00 00 00 00 00 FD FC
//
// Incoming (robot -> host):
//   StateReport     11 bytes   FF FE 06 mode ?? batt ?? d1 d2 FD FC
//   IdentityReport  13 bytes   FF FE 08 uid[8] FD FC

use crate::device::{DeviceState, StateReport, Uid, LED_COUNT, MOTOR_COUNT};

/// Frame header and footer bytes
pub const HEADER: [u8; 2] = [0xFF, 0xFE];
pub const FOOTER: [u8; 2] = [0xFD, 0xFC];

pub const IDENTITY_REQUEST_LEN: usize = 6;
pub const CONTROL_FRAME_LEN: usize = 14;
pub const STATE_REPORT_LEN: usize = 11;
pub const IDENTITY_REPORT_LEN: usize = 13;

/// Command codes (byte 2)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    RequestIdentity = 0x01,
    StateReport = 0x06,
    IdentityReport = 0x08,
    Control = 0x09,
}

/// Subtypes of the control command (byte 3)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSubtype {
    SyncState = 0x01,
    UploadScript = 0x02,
    Test = 0x03,
}

/// Constant byte 3 of the identity request
const IDENTITY_REQUEST_ARG: u8 = 0x04;
/// Constant byte 4 of every SyncState frame
const SYNC_STATE_FLAGS: u8 = 0x02;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Bad frame header: {0:02X?}")]
    BadHeader([u8; 2]),

    #[error("Bad frame footer: {0:02X?}")]
    BadFooter([u8; 2]),

    #[error("Unrecognized frame length {len}")]
    UnknownLength { len: usize },

    #[error("Unknown command 0x{code:02X} in {len}-byte frame")]
    UnknownCommand { code: u8, len: usize },

    #[error("Script is {len} bytes, at most {max} fit the upload header", max = u16::MAX)]
    ScriptTooLong { len: usize },

    #[error("Script contains non-ASCII text")]
    NonAsciiScript,
}

impl FrameError {
    /// Header/footer mismatch, as opposed to a well-framed but unknown frame
    pub fn is_malformed(&self) -> bool {
        matches!(self, FrameError::BadHeader(_) | FrameError::BadFooter(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Commands the host sends to the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RequestIdentity,
    SyncState {
        motors: [i8; MOTOR_COUNT],
        leds: [u8; LED_COUNT],
    },
    UploadScript {
        length: u16,
    },
    Test,
}

impl Command {
    /// SyncState carrying the current motors and LEDs
    pub fn sync_state(state: &DeviceState) -> Self {
        Command::SyncState {
            motors: state.motor_speeds(),
            leds: state.led_colors(),
        }
    }

    /// Validate a script for upload, returning the header command and the
    /// raw text that must follow it as a separate write
    pub fn upload_script(script: &str) -> Result<(Self, &[u8])> {
        if !script.is_ascii() {
            return Err(FrameError::NonAsciiScript);
        }
        let length = u16::try_from(script.len())
            .map_err(|_| FrameError::ScriptTooLong { len: script.len() })?;
        Ok((Command::UploadScript { length }, script.as_bytes()))
    }

    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::RequestIdentity => build_frame(
                CommandCode::RequestIdentity,
                &[IDENTITY_REQUEST_ARG],
            ),
            Command::SyncState { motors, leds } => {
                // Motor speeds go out as two's-complement signed bytes,
                // LED colors as unsigned codes
                let mut payload = [0u8; CONTROL_FRAME_LEN - 5];
                payload[0] = ControlSubtype::SyncState as u8;
                payload[1] = SYNC_STATE_FLAGS;
                payload[2] = motors[0] as u8;
                payload[3] = motors[1] as u8;
                payload[4] = 0; // reserved
                payload[5..9].copy_from_slice(&leds);
                build_frame(CommandCode::Control, &payload)
            }
            Command::UploadScript { length } => {
                // Length is unsigned big-endian
                let mut payload = [0u8; CONTROL_FRAME_LEN - 5];
                payload[0] = ControlSubtype::UploadScript as u8;
                payload[1..3].copy_from_slice(&length.to_be_bytes());
                build_frame(CommandCode::Control, &payload)
            }
            Command::Test => {
                let mut payload = [0u8; CONTROL_FRAME_LEN - 5];
                payload[0] = ControlSubtype::Test as u8;
                build_frame(CommandCode::Control, &payload)
            }
        }
    }
}

/// Build a frame with header, command code and footer
fn build_frame(code: CommandCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.extend_from_slice(&HEADER);
    frame.push(code as u8);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&FOOTER);
    frame
}

/// Decoded robot -> host frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    State(StateReport),
    Identity(Uid),
}

/// Validate and decode an incoming notification.
///
/// The length selects the layout; header and footer are checked at the
/// offsets that length implies before any payload byte is read.
pub fn decode(frame: &[u8]) -> Result<Telemetry> {
    let len = frame.len();
    if len != STATE_REPORT_LEN && len != IDENTITY_REPORT_LEN {
        return Err(FrameError::UnknownLength { len });
    }

    let header = [frame[0], frame[1]];
    if header != HEADER {
        return Err(FrameError::BadHeader(header));
    }
    let footer = [frame[len - 2], frame[len - 1]];
    if footer != FOOTER {
        return Err(FrameError::BadFooter(footer));
    }

    let code = frame[2];
    match (len, code) {
        (STATE_REPORT_LEN, c) if c == CommandCode::StateReport as u8 => {
            // All telemetry bytes are unsigned 0-255. Bytes 4 and 6 are unused.
            Ok(Telemetry::State(StateReport {
                mode: frame[3],
                battery_level: frame[5],
                distances: [frame[7], frame[8]],
            }))
        }
        (IDENTITY_REPORT_LEN, c) if c == CommandCode::IdentityReport as u8 => {
            let mut uid = [0u8; 8];
            uid.copy_from_slice(&frame[3..11]);
            Ok(Telemetry::Identity(Uid(uid)))
        }
        _ => Err(FrameError::UnknownCommand { code, len }),
    }
}

/// Lowercase hex dump for logging
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
