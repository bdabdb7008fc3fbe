// Apitor wire protocol
//
// Provides:
// - Fixed-size frame encoding for host commands
// - Validation and decoding of robot telemetry frames
// - Reassembly of frames from an unframed byte stream

mod assembler;
pub mod frame;

pub use assembler::FrameAssembler;
pub use frame::{decode, hex, Command, FrameError, Telemetry};
