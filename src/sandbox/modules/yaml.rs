//! `yaml`: encode and decode YAML text.

use mlua::{Lua, Table, Value as LuaValue};

use super::lua_pair;
use crate::sandbox::translate::{from_lua, to_lua};

pub(super) fn module(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    table.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| {
            let encoded = from_lua(lua, value)
                .map_err(|e| e.to_string())
                .and_then(|doc| serde_yaml::to_string(&doc).map_err(|e| e.to_string()));
            lua_pair(lua, encoded)
        })?,
    )?;

    table.set(
        "decode",
        lua.create_function(|lua, text: String| {
            match serde_yaml::from_str::<serde_json::Value>(&text) {
                Ok(doc) => lua_pair(lua, Ok(to_lua(lua, &doc)?)),
                Err(e) => lua_pair::<LuaValue>(lua, Err(e.to_string())),
            }
        })?,
    )?;

    Ok(table)
}
