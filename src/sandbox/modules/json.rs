//! `json`: encode and decode JSON text.

use mlua::{Lua, Table, Value as LuaValue};

use super::lua_pair;
use crate::sandbox::translate::{from_lua, mark_array, to_lua};

pub(super) fn module(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    table.set(
        "encode",
        lua.create_function(|lua, (value, pretty): (LuaValue, Option<bool>)| {
            let encoded = from_lua(lua, value)
                .map_err(|e| e.to_string())
                .and_then(|doc| {
                    if pretty.unwrap_or(false) {
                        serde_json::to_string_pretty(&doc)
                    } else {
                        serde_json::to_string(&doc)
                    }
                    .map_err(|e| e.to_string())
                });
            lua_pair(lua, encoded)
        })?,
    )?;

    table.set(
        "decode",
        lua.create_function(|lua, text: String| {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(doc) => lua_pair(lua, Ok(to_lua(lua, &doc)?)),
                Err(e) => lua_pair::<LuaValue>(lua, Err(e.to_string())),
            }
        })?,
    )?;

    // Mark a table so it encodes as an array even when empty.
    table.set(
        "array",
        lua.create_function(|lua, t: Option<Table>| {
            let t = match t {
                Some(t) => t,
                None => lua.create_table()?,
            };
            mark_array(lua, &t)?;
            Ok(t)
        })?,
    )?;

    table.set("null", LuaValue::NULL)?;
    Ok(table)
}
