//! `fs`: read-only file access, optionally confined to a root directory.

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::lua_pair;
use crate::sandbox::translate::to_lua;

pub(super) fn module(lua: &Lua, root: Option<PathBuf>) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    let read_root = root.clone();
    table.set(
        "read",
        lua.create_function(move |lua, path: String| {
            let content = resolve(read_root.as_deref(), &path).and_then(|p| {
                std::fs::read_to_string(&p).map_err(|e| format!("{}: {}", path, e))
            });
            lua_pair(lua, content)
        })?,
    )?;

    let exists_root = root.clone();
    table.set(
        "exists",
        lua.create_function(move |_, path: String| {
            Ok(resolve(exists_root.as_deref(), &path)
                .map(|p| p.exists())
                .unwrap_or(false))
        })?,
    )?;

    table.set(
        "list",
        lua.create_function(move |lua, path: String| {
            match resolve(root.as_deref(), &path).and_then(|p| list(&p)) {
                Ok(names) => {
                    let names = Value::Array(names.into_iter().map(Value::String).collect());
                    lua_pair(lua, Ok(to_lua(lua, &names)?))
                }
                Err(e) => lua_pair::<LuaValue>(lua, Err(e)),
            }
        })?,
    )?;

    Ok(table)
}

/// Resolve `path` against `root`, refusing anything that escapes it.
fn resolve(root: Option<&Path>, path: &str) -> Result<PathBuf, String> {
    let requested = Path::new(path);
    let Some(root) = root else {
        return Ok(requested.to_path_buf());
    };
    let root = root
        .canonicalize()
        .map_err(|e| format!("fs root {}: {}", root.display(), e))?;
    let candidate = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    let resolved = candidate
        .canonicalize()
        .map_err(|e| format!("{}: {}", path, e))?;
    if !resolved.starts_with(&root) {
        return Err(format!("{}: outside of the readable root", path));
    }
    Ok(resolved)
}

fn list(dir: &Path) -> Result<Vec<String>, String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| e.to_string())?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}
