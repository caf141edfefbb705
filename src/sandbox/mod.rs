//! Sandboxed execution of a single script.
//!
//! Every call to [`SandboxExecutor::execute`] builds a brand-new Lua state,
//! binds the input document to the global `object`, runs the chunk and
//! reads `object` back. The state is dropped on every exit path, so nothing
//! a script does survives into the next invocation.

pub mod modules;
pub mod translate;

use mlua::{ChunkMode, Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value as LuaValue, VmState};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::SandboxSection;
use crate::errors::ScriptError;
use modules::{Module, ModuleSettings};

/// Name of the global the document is bound to.
pub const OBJECT_GLOBAL: &str = "object";

/// Replacement for the base `load` that only ever compiles source text.
const TEXT_ONLY_LOAD: &str = r##"
local base_load = load
return function(chunk, name, _, ...)
  if select("#", ...) > 0 then
    return base_load(chunk, name, "t", ...)
  end
  return base_load(chunk, name, "t")
end
"##;

/// How often (in VM instructions) a running script checks for cancellation.
const CANCEL_CHECK_INTERVAL: u32 = 10_000;

/// A named Lua chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub source: String,
}

impl Script {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Result of one script invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Name of the script that ran
    pub script: String,
    /// The document the script left in `object`, or why there is none
    pub result: Result<Value, ScriptError>,
    /// Wall-clock time spent, sandbox setup included
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&ScriptError> {
        self.result.as_ref().err()
    }
}

/// Settings applied to every sandbox.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub modules: Vec<Module>,
    pub module_settings: ModuleSettings,
    /// Memory cap per Lua state, in bytes
    pub memory_limit: Option<usize>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            modules: Module::all().to_vec(),
            module_settings: ModuleSettings::default(),
            memory_limit: None,
        }
    }
}

impl From<&SandboxSection> for SandboxSettings {
    fn from(section: &SandboxSection) -> Self {
        Self {
            modules: section.modules.clone(),
            module_settings: ModuleSettings {
                http_timeout: Duration::from_secs(section.http_timeout_secs),
                fs_root: section.fs_root.clone(),
            },
            memory_limit: section
                .memory_limit_mb
                .map(|mb| (mb as usize).saturating_mul(1024 * 1024)),
        }
    }
}

/// Runs scripts, one fresh Lua state per call.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    settings: SandboxSettings,
}

impl SandboxExecutor {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Run `script` against `input`.
    pub fn execute(&self, script: &Script, input: &Value) -> ExecutionOutcome {
        self.execute_with_cancel(script, input, &CancellationToken::new())
    }

    /// Run `script` against `input`, aborting if `cancel` fires mid-run.
    pub fn execute_with_cancel(
        &self,
        script: &Script,
        input: &Value,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let result = self.run(script, input, cancel);
        let duration = started.elapsed();

        match &result {
            Ok(_) => tracing::debug!(script = %script.name, ?duration, "Script succeeded"),
            Err(e) => tracing::warn!(
                script = %script.name,
                kind = e.kind(),
                ?duration,
                error = %e,
                "Script failed"
            ),
        }

        ExecutionOutcome {
            script: script.name.clone(),
            result,
            duration,
        }
    }

    fn run(
        &self,
        script: &Script,
        input: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ScriptError> {
        let name = script.name.clone();
        if cancel.is_cancelled() {
            return Err(ScriptError::Cancelled { script: name });
        }

        let lua = self
            .create_state(script, cancel)
            .map_err(|e| ScriptError::Sandbox {
                script: name.clone(),
                message: e.to_string(),
            })?;

        let object = translate::to_lua(&lua, input).map_err(|e| ScriptError::Translation {
            script: name.clone(),
            message: format!("input: {}", e),
        })?;
        lua.globals()
            .raw_set(OBJECT_GLOBAL, object)
            .map_err(|e| ScriptError::Sandbox {
                script: name.clone(),
                message: e.to_string(),
            })?;

        let chunk = lua
            .load(script.source.as_str())
            .set_name(format!("={}", script.name))
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|e| match e {
                mlua::Error::SyntaxError { message, .. } => ScriptError::Syntax {
                    script: name.clone(),
                    message,
                },
                other => ScriptError::Runtime {
                    script: name.clone(),
                    message: other.to_string(),
                },
            })?;

        if let Err(e) = chunk.call::<()>(()) {
            if cancel.is_cancelled() {
                return Err(ScriptError::Cancelled { script: name });
            }
            return Err(ScriptError::Runtime {
                script: name,
                message: e.to_string(),
            });
        }

        let output: LuaValue = lua
            .globals()
            .raw_get(OBJECT_GLOBAL)
            .map_err(|e| ScriptError::Translation {
                script: name.clone(),
                message: e.to_string(),
            })?;
        if output.is_nil() {
            return Err(ScriptError::Translation {
                script: name,
                message: format!("global '{}' was removed", OBJECT_GLOBAL),
            });
        }

        translate::from_lua(&lua, output).map_err(|e| ScriptError::Translation {
            script: name,
            message: format!("output: {}", e),
        })
    }

    /// Build a Lua state with the restricted standard library and the
    /// configured modules.
    fn create_state(&self, script: &Script, cancel: &CancellationToken) -> mlua::Result<Lua> {
        let libs = StdLib::TABLE
            | StdLib::STRING
            | StdLib::MATH
            | StdLib::UTF8
            | StdLib::COROUTINE
            | StdLib::PACKAGE;
        let lua = Lua::new_with(libs, LuaOptions::default())?;
        if let Some(limit) = self.settings.memory_limit {
            lua.set_memory_limit(limit)?;
        }

        let globals = lua.globals();
        globals.raw_set("dofile", LuaValue::Nil)?;
        globals.raw_set("loadfile", LuaValue::Nil)?;
        globals.raw_set("null", LuaValue::NULL)?;

        // Lua does not verify bytecode, so binary chunks are never loaded.
        let load: Function = lua.load(TEXT_ONLY_LOAD).set_name("=load").eval()?;
        globals.raw_set("load", load)?;
        let string: Table = globals.raw_get("string")?;
        string.raw_set("dump", LuaValue::Nil)?;

        let name = script.name.clone();
        globals.raw_set(
            "print",
            lua.create_function(move |_, args: MultiValue| {
                tracing::info!(script = %name, "{}", modules::join_args(args));
                Ok(())
            })?,
        )?;

        // Only preloaded modules are reachable through require.
        let package: Table = globals.raw_get("package")?;
        package.raw_set("path", "")?;
        package.raw_set("cpath", "")?;
        package.raw_set("loadlib", LuaValue::Nil)?;

        modules::install(
            &lua,
            &self.settings.modules,
            &self.settings.module_settings,
            &script.name,
        )?;
        translate::array_set(&lua)?;

        let token = cancel.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(CANCEL_CHECK_INTERVAL),
            move |_, _| {
                if token.is_cancelled() {
                    Err(mlua::Error::runtime("script cancelled"))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );

        Ok(lua)
    }
}
