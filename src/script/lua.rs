// Lua 5.4 script engine (sandboxed to the table, string and math libraries)

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Value, Variadic, VmState};

use super::{BridgeError, NativeFn, ScriptEngine, ScriptError};
use crate::stop::StopSignal;

/// VM instructions between stop checks
const INTERRUPT_INTERVAL: u32 = 1000;

pub struct LuaEngine {
    lua: Lua,
}

fn engine_error(e: mlua::Error) -> ScriptError {
    ScriptError::Engine(e.to_string())
}

impl LuaEngine {
    pub fn new() -> Result<Self, ScriptError> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::new().catch_rust_panics(true),
        )
        .map_err(engine_error)?;
        Ok(Self { lua })
    }

    /// Integer value of a global, None when unset or not a number
    pub fn global_integer(&self, name: &str) -> Result<Option<i64>, ScriptError> {
        let value: Value = self.lua.globals().get(name).map_err(engine_error)?;
        Ok(match value {
            Value::Integer(v) => Some(v),
            Value::Number(v) => Some(v.trunc() as i64),
            _ => None,
        })
    }
}

impl ScriptEngine for LuaEngine {
    fn register_function(&mut self, name: &str, func: NativeFn) -> Result<(), ScriptError> {
        let function = self
            .lua
            .create_function(move |_, args: Variadic<f64>| {
                func(&args).map_err(mlua::Error::external)
            })
            .map_err(engine_error)?;
        self.lua.globals().set(name, function).map_err(engine_error)
    }

    fn set_interrupt(&mut self, stop: StopSignal) {
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(INTERRUPT_INTERVAL),
            move |_, _| {
                if stop.is_stopped() {
                    Err(mlua::Error::external(BridgeError::Cancelled))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
    }

    fn execute(&mut self, source: &str) -> Result<(), ScriptError> {
        self.lua
            .load(source)
            .set_name("script")
            .exec()
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_native_function_roundtrip() {
        let mut engine = LuaEngine::new().unwrap();
        engine
            .register_function("ADD", Box::new(|args: &[f64]| -> Result<Option<i64>, BridgeError> {
                Ok(Some(args.iter().sum::<f64>() as i64))
            }))
            .unwrap();
        engine.execute("X = ADD(2, 3.5, -1)").unwrap();
        assert_eq!(engine.global_integer("X").unwrap(), Some(4));
    }

    #[test]
    fn test_none_is_nil() {
        let mut engine = LuaEngine::new().unwrap();
        engine
            .register_function("NOTHING", Box::new(|_: &[f64]| -> Result<Option<i64>, BridgeError> { Ok(None) }))
            .unwrap();
        engine.execute("Y = (NOTHING() == nil) and 1 or 0").unwrap();
        assert_eq!(engine.global_integer("Y").unwrap(), Some(1));
    }

    #[test]
    fn test_native_error_fails_script() {
        let mut engine = LuaEngine::new().unwrap();
        engine
            .register_function("FAIL", Box::new(|_: &[f64]| -> Result<Option<i64>, BridgeError> {
                Err(BridgeError::Cancelled)
            }))
            .unwrap();
        let err = engine.execute("FAIL()").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(_)));
    }

    #[test]
    fn test_syntax_error() {
        let mut engine = LuaEngine::new().unwrap();
        assert!(matches!(
            engine.execute("while true"),
            Err(ScriptError::Runtime(_))
        ));
    }

    #[test]
    fn test_sandbox_has_no_os() {
        let mut engine = LuaEngine::new().unwrap();
        assert!(engine.execute("os.exit(1)").is_err());
    }

    #[test]
    fn test_interrupt_breaks_busy_loop() {
        let stop = StopSignal::new();
        let stopper = stop.clone();
        let worker = thread::spawn(move || {
            let mut engine = LuaEngine::new().unwrap();
            engine.set_interrupt(stop);
            engine.execute("while true do end")
        });

        thread::sleep(Duration::from_millis(50));
        let stopped_at = Instant::now();
        stopper.stop();
        let result = worker.join().unwrap();
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_interrupt_idle_until_stopped() {
        let mut engine = LuaEngine::new().unwrap();
        engine.set_interrupt(StopSignal::new());
        engine.execute("N = 0 for i = 1, 100000 do N = N + 1 end").unwrap();
        assert_eq!(engine.global_integer("N").unwrap(), Some(100000));
    }
}
