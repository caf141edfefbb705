//! `hash`: SHA-2 digests as lowercase hex.

use mlua::{Lua, String as LuaString, Table};
use sha2::{Digest, Sha256, Sha512};

pub(super) fn module(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "sha256",
        lua.create_function(|_, s: LuaString| Ok(hex::encode(Sha256::digest(&*s.as_bytes()))))?,
    )?;
    table.set(
        "sha512",
        lua.create_function(|_, s: LuaString| Ok(hex::encode(Sha512::digest(&*s.as_bytes()))))?,
    )?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use crate::sandbox::modules::test_support::lua_with_modules;

    #[test]
    fn test_sha256() {
        let lua = lua_with_modules();
        let digest: String = lua
            .load(r#"return require("hash").sha256("abc")"#)
            .eval()
            .unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha512_length() {
        let lua = lua_with_modules();
        let digest: String = lua
            .load(r#"return require("hash").sha512("")"#)
            .eval()
            .unwrap();
        assert_eq!(digest.len(), 128);
    }
}
