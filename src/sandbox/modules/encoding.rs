//! `base64` and `hex`: binary-safe string encodings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mlua::{Lua, String as LuaString, Table, Value as LuaValue};

use super::lua_pair;

pub(super) fn base64_module(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "encode",
        lua.create_function(|_, s: LuaString| Ok(STANDARD.encode(&*s.as_bytes())))?,
    )?;
    table.set(
        "decode",
        lua.create_function(|lua, s: LuaString| match STANDARD.decode(&*s.as_bytes()) {
            Ok(bytes) => lua_pair(lua, Ok(lua.create_string(bytes)?)),
            Err(e) => lua_pair::<LuaValue>(lua, Err(e.to_string())),
        })?,
    )?;
    Ok(table)
}

pub(super) fn hex_module(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "encode",
        lua.create_function(|_, s: LuaString| Ok(hex::encode(&*s.as_bytes())))?,
    )?;
    table.set(
        "decode",
        lua.create_function(|lua, s: LuaString| match hex::decode(&*s.as_bytes()) {
            Ok(bytes) => lua_pair(lua, Ok(lua.create_string(bytes)?)),
            Err(e) => lua_pair::<LuaValue>(lua, Err(e.to_string())),
        })?,
    )?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use crate::sandbox::modules::test_support::lua_with_modules;

    #[test]
    fn test_base64() {
        let lua = lua_with_modules();
        let (encoded, decoded): (String, String) = lua
            .load(r#"local b = require("base64"); return b.encode("hello"), b.decode("aGVsbG8=")"#)
            .eval()
            .unwrap();
        assert_eq!(encoded, "aGVsbG8=");
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn test_hex_decode_invalid() {
        let lua = lua_with_modules();
        let (value, err): (Option<String>, Option<String>) = lua
            .load(r#"return require("hex").decode("zz")"#)
            .eval()
            .unwrap();
        assert!(value.is_none());
        assert!(err.is_some());
    }

    #[test]
    fn test_hex_encode() {
        let lua = lua_with_modules();
        let encoded: String = lua
            .load(r#"return require("hex").encode("\x01\xff")"#)
            .eval()
            .unwrap();
        assert_eq!(encoded, "01ff");
    }
}
