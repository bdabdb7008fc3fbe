// Re-splits a byte stream into telemetry frames.
//
// A serial BLE-UART bridge forwards notifications as a plain byte stream,
// so frame boundaries have to be recovered from the header and footer.
// Only the two incoming layouts (11 and 13 bytes) are recognized. The
// command byte picks the layout, since a UID may itself contain the footer.

use tracing::debug;

use super::frame::{hex, CommandCode, FOOTER, HEADER, IDENTITY_REPORT_LEN, STATE_REPORT_LEN};

/// Upper bound on buffered bytes before we give up on the current data
const MAX_BUFFERED: usize = 256;

#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > MAX_BUFFERED {
            let excess = self.buffer.len() - MAX_BUFFERED;
            debug!("Frame buffer overflow, dropping {} bytes", excess);
            self.buffer.drain(..excess);
        }
    }

    /// Bytes waiting for more data
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame, skipping garbage in front of it
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Align on a header
            match self.buffer.windows(2).position(|w| w == HEADER) {
                Some(0) => {}
                Some(start) => {
                    debug!("Skipping {} stray bytes: {}", start, hex(&self.buffer[..start]));
                    self.buffer.drain(..start);
                }
                None => {
                    // Keep a trailing 0xFF, it may be the first header byte
                    let keep = usize::from(self.buffer.last() == Some(&HEADER[0]));
                    let drop = self.buffer.len() - keep;
                    if drop > 0 {
                        self.buffer.drain(..drop);
                    }
                    return None;
                }
            }

            let Some(&code) = self.buffer.get(2) else {
                return None;
            };
            let candidates: &[usize] = match code {
                c if c == CommandCode::StateReport as u8 => &[STATE_REPORT_LEN],
                c if c == CommandCode::IdentityReport as u8 => &[IDENTITY_REPORT_LEN],
                _ => &[STATE_REPORT_LEN, IDENTITY_REPORT_LEN],
            };

            for &len in candidates {
                if self.buffer.len() >= len && self.buffer[len - 2..len] == FOOTER {
                    return Some(self.buffer.drain(..len).collect());
                }
            }

            let longest = candidates.iter().copied().max().unwrap_or(IDENTITY_REPORT_LEN);
            if self.buffer.len() < longest {
                // Could still complete
                return None;
            }

            // Header with no footer where the layout puts it: resync past it
            self.buffer.drain(..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE: [u8; 11] = [0xFF, 0xFE, 0x06, 0x01, 0x00, 0x64, 0x00, 0x0A, 0x14, 0xFD, 0xFC];
    const IDENTITY: [u8; 13] = [
        0xFF, 0xFE, 0x08, 1, 2, 3, 4, 5, 6, 7, 8, 0xFD, 0xFC,
    ];

    #[test]
    fn test_split_back_to_back_frames() {
        let mut asm = FrameAssembler::new();
        asm.push(&STATE);
        asm.push(&IDENTITY);
        assert_eq!(asm.next_frame().unwrap(), STATE.to_vec());
        assert_eq!(asm.next_frame().unwrap(), IDENTITY.to_vec());
        assert!(asm.next_frame().is_none());
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut asm = FrameAssembler::new();
        asm.push(&IDENTITY[..5]);
        assert!(asm.next_frame().is_none());
        asm.push(&IDENTITY[5..]);
        assert_eq!(asm.next_frame().unwrap(), IDENTITY.to_vec());
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut asm = FrameAssembler::new();
        asm.push(&[0x00, 0x13, 0xFF]);
        assert!(asm.next_frame().is_none());
        // The kept 0xFF pairs with this 0xFE
        asm.push(&STATE[1..]);
        assert_eq!(asm.next_frame().unwrap(), STATE.to_vec());
    }

    #[test]
    fn test_identity_containing_footer_bytes() {
        let uid_with_footer = [0xFF, 0xFE, 0x08, 1, 2, 3, 4, 5, 6, 0xFD, 0xFC, 0xFD, 0xFC];
        let mut asm = FrameAssembler::new();
        asm.push(&uid_with_footer);
        let frame = asm.next_frame().unwrap();
        assert_eq!(frame.len(), IDENTITY_REPORT_LEN);
        assert_eq!(frame, uid_with_footer.to_vec());
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_unknown_code_falls_back_to_footer() {
        let odd = [0xFF, 0xFE, 0x42, 0, 0, 0, 0, 0, 0, 0xFD, 0xFC];
        let mut asm = FrameAssembler::new();
        asm.push(&odd);
        assert_eq!(asm.next_frame().unwrap(), odd.to_vec());
    }

    #[test]
    fn test_resync_after_truncated_frame() {
        let mut asm = FrameAssembler::new();
        // A header followed by junk long enough to rule out both layouts
        asm.push(&[0xFF, 0xFE, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        asm.push(&STATE);
        assert_eq!(asm.next_frame().unwrap(), STATE.to_vec());
    }
}
