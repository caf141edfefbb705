//! Capability modules available to scripts through `require`.
//!
//! Every enabled module is registered in `package.preload`, so nothing is
//! constructed until a script asks for it. The enabled set is fixed per
//! deployment (`[sandbox] modules`).

mod encoding;
mod fs;
mod hash;
mod http;
mod json;
mod log;
mod spew;
mod template;
mod time;
mod yaml;

use mlua::{IntoLua, Lua, MultiValue, Table, Value as LuaValue};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use spew::dump;

/// A module name usable with `require`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Json,
    Yaml,
    Base64,
    Hex,
    Hash,
    Http,
    Log,
    Spew,
    Template,
    Time,
    Fs,
}

impl Module {
    /// Every module, in registration order.
    pub fn all() -> &'static [Module] {
        &[
            Module::Json,
            Module::Yaml,
            Module::Base64,
            Module::Hex,
            Module::Hash,
            Module::Http,
            Module::Log,
            Module::Spew,
            Module::Template,
            Module::Time,
            Module::Fs,
        ]
    }

    /// The name passed to `require`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Json => "json",
            Module::Yaml => "yaml",
            Module::Base64 => "base64",
            Module::Hex => "hex",
            Module::Hash => "hash",
            Module::Http => "http",
            Module::Log => "log",
            Module::Spew => "spew",
            Module::Template => "template",
            Module::Time => "time",
            Module::Fs => "fs",
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Module {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase();
        Module::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = Module::all().iter().map(Module::as_str).collect();
                anyhow::anyhow!(
                    "Invalid module '{}'. Valid values: {}",
                    s,
                    valid.join(", ")
                )
            })
    }
}

/// Deployment-level settings shared by the modules of one sandbox.
#[derive(Debug, Clone)]
pub struct ModuleSettings {
    pub http_timeout: Duration,
    pub fs_root: Option<PathBuf>,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10),
            fs_root: None,
        }
    }
}

/// Register `modules` in `package.preload` for the script named `script`.
pub fn install(
    lua: &Lua,
    modules: &[Module],
    settings: &ModuleSettings,
    script: &str,
) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    let preload: Table = package.get("preload")?;

    for module in modules {
        let loader = match module {
            Module::Json => lua.create_function(|lua, ()| json::module(lua))?,
            Module::Yaml => lua.create_function(|lua, ()| yaml::module(lua))?,
            Module::Base64 => lua.create_function(|lua, ()| encoding::base64_module(lua))?,
            Module::Hex => lua.create_function(|lua, ()| encoding::hex_module(lua))?,
            Module::Hash => lua.create_function(|lua, ()| hash::module(lua))?,
            Module::Http => {
                let timeout = settings.http_timeout;
                lua.create_function(move |lua, ()| http::module(lua, timeout))?
            }
            Module::Log => {
                let script = script.to_string();
                lua.create_function(move |lua, ()| log::module(lua, &script))?
            }
            Module::Spew => {
                let script = script.to_string();
                lua.create_function(move |lua, ()| spew::module(lua, &script))?
            }
            Module::Template => lua.create_function(|lua, ()| template::module(lua))?,
            Module::Time => lua.create_function(|lua, ()| time::module(lua))?,
            Module::Fs => {
                let root = settings.fs_root.clone();
                lua.create_function(move |lua, ()| fs::module(lua, root.clone()))?
            }
        };
        preload.set(module.as_str(), loader)?;
    }
    Ok(())
}

/// Lua-style `value, nil` / `nil, message` return pair.
pub(crate) fn lua_pair<T: IntoLua>(
    lua: &Lua,
    result: Result<T, String>,
) -> mlua::Result<(LuaValue, LuaValue)> {
    match result {
        Ok(value) => Ok((value.into_lua(lua)?, LuaValue::Nil)),
        Err(message) => Ok((LuaValue::Nil, message.into_lua(lua)?)),
    }
}

/// Join call arguments the way `print` does, rendering tables with `dump`.
pub(crate) fn join_args(args: MultiValue) -> String {
    args.into_iter()
        .map(|value| match value {
            LuaValue::String(s) => s.to_string_lossy().to_string(),
            other => dump(&other),
        })
        .collect::<Vec<_>>()
        .join(" ")
}


#[cfg(test)]
mod tests {
    use super::test_support::lua_with_modules;
    use super::*;

    #[test]
    fn test_module_from_str() {
        assert_eq!("json".parse::<Module>().unwrap(), Module::Json);
        assert_eq!("BASE64".parse::<Module>().unwrap(), Module::Base64);
        let err = "os".parse::<Module>().unwrap_err();
        assert!(err.to_string().contains("Invalid module 'os'"));
    }

    #[test]
    fn test_display_matches_require_name() {
        for module in Module::all() {
            assert_eq!(module.to_string(), module.as_str());
        }
    }

    #[test]
    fn test_all_modules_are_requirable() {
        let lua = lua_with_modules();
        for module in Module::all() {
            let loaded: Table = lua
                .load(format!("return require('{}')", module))
                .eval()
                .unwrap();
            assert!(loaded.pairs::<LuaValue, LuaValue>().count() > 0, "{module}");
        }
    }

    #[test]
    fn test_disabled_module_cannot_be_required() {
        let lua = Lua::new();
        install(&lua, &[Module::Json], &ModuleSettings::default(), "s").unwrap();
        assert!(lua.load("return require('json')").eval::<Table>().is_ok());
        assert!(lua.load("return require('http')").eval::<Table>().is_err());
    }

    #[test]
    fn test_join_args_renders_tables() {
        let lua = Lua::new();
        let args: MultiValue = lua.load("return 'count', 3, {1}").eval().unwrap();
        assert_eq!(join_args(args), "count 3 { 1 }");
    }
}
