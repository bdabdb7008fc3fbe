// Script execution
//
// Provides:
// - The ScriptEngine seam the interpreter plugs into
// - The bridge exposing the five robot primitives (M, MS, L, GD, DS)
// - A Lua engine implementation

mod bridge;
pub mod lua;

pub use bridge::{ExecutionState, ScriptBridge, ScriptExecution};
pub use lua::LuaEngine;

use crate::stop::StopSignal;

/// Host function callable from a script. Arguments arrive as script
/// numbers; `None` is returned to the script as nil.
pub type NativeFn = Box<dyn Fn(&[f64]) -> Result<Option<i64>, BridgeError> + Send + 'static>;

pub trait ScriptEngine {
    fn register_function(&mut self, name: &str, func: NativeFn) -> Result<(), ScriptError>;

    /// Abort the running script once `stop` fires, even between host calls
    fn set_interrupt(&mut self, stop: StopSignal);

    /// Run a script to completion
    fn execute(&mut self, source: &str) -> Result<(), ScriptError>;
}

/// Errors raised by the primitives themselves
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Script cancelled")]
    Cancelled,

    #[error("{function}: missing argument {index}")]
    MissingArgument { function: &'static str, index: usize },

    #[error("{function}: invalid {name} {value}")]
    InvalidArgument {
        function: &'static str,
        name: &'static str,
        value: i64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Script engine error: {0}")]
    Engine(String),

    #[error("Script failed: {0}")]
    Runtime(String),

    #[error("Script cancelled")]
    Cancelled,

    #[error("Script already started")]
    AlreadyStarted,

    #[error("Could not start script thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Script thread panicked")]
    Panicked,
}

/// Reference obstacle-avoidance loop: back away and go green when
/// something is close, then drive forward in red once the way is clear.
pub const EXAMPLE_SCRIPT: &str = r#"
T = 0
while true do
  if T == 0 then
    if (GD(1)) <= 5 then
      M(1,9,-1)
      L(0,4)
      DS(20)
      MS(0)
      T = 1
    end
  end
  if T == 1 then
    if (GD(1)) > 5 then
      DS(30)
      M(1,6,1)
      L(0,1)
      DS(20)
      MS(0)
      T = 0
    end
  end
end
"#;
