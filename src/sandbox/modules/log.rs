//! `log`: script log lines, routed to tracing and tagged with the script name.

use mlua::{Lua, MultiValue, Table};

use super::join_args;

pub(super) fn module(lua: &Lua, script: &str) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    let name = script.to_string();
    table.set(
        "debug",
        lua.create_function(move |_, args: MultiValue| {
            tracing::debug!(script = %name, "{}", join_args(args));
            Ok(())
        })?,
    )?;

    let name = script.to_string();
    table.set(
        "info",
        lua.create_function(move |_, args: MultiValue| {
            tracing::info!(script = %name, "{}", join_args(args));
            Ok(())
        })?,
    )?;

    let name = script.to_string();
    table.set(
        "warn",
        lua.create_function(move |_, args: MultiValue| {
            tracing::warn!(script = %name, "{}", join_args(args));
            Ok(())
        })?,
    )?;

    let name = script.to_string();
    table.set(
        "error",
        lua.create_function(move |_, args: MultiValue| {
            tracing::error!(script = %name, "{}", join_args(args));
            Ok(())
        })?,
    )?;

    Ok(table)
}
