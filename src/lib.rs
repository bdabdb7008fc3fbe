// Apitor robot runtime: frame codec, device session with its telemetry loop,
// and the bridge that lets a Lua control script drive the robot.

pub mod config;
pub mod connection;
pub mod device;
pub mod link;
pub mod messages;
pub mod protocol;
pub mod runtime;
pub mod script;
pub mod session;
pub mod stop;
