//! `time`: clock access and timestamp formatting (UTC).

use chrono::{DateTime, NaiveDateTime, Utc};
use mlua::{Lua, Table};
use std::fmt::Write;

use super::lua_pair;

pub(super) fn module(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "now",
        lua.create_function(|_, ()| Ok(Utc::now().timestamp()))?,
    )?;
    table.set(
        "now_ms",
        lua.create_function(|_, ()| Ok(Utc::now().timestamp_millis()))?,
    )?;
    table.set(
        "format",
        lua.create_function(|lua, (ts, fmt): (i64, Option<String>)| {
            lua_pair(lua, format(ts, fmt.as_deref()))
        })?,
    )?;
    table.set(
        "parse",
        lua.create_function(|lua, (text, fmt): (String, Option<String>)| {
            lua_pair(lua, parse(&text, fmt.as_deref()))
        })?,
    )?;
    Ok(table)
}

/// Format unix seconds with a strftime pattern, RFC 3339 when `fmt` is unset.
fn format(ts: i64, fmt: Option<&str>) -> Result<String, String> {
    let dt = DateTime::<Utc>::from_timestamp(ts, 0)
        .ok_or_else(|| format!("timestamp {} out of range", ts))?;
    match fmt {
        None => Ok(dt.to_rfc3339()),
        Some(fmt) => {
            let mut out = String::new();
            write!(out, "{}", dt.format(fmt))
                .map_err(|_| format!("invalid time format '{}'", fmt))?;
            Ok(out)
        }
    }
}

/// Parse into unix seconds, RFC 3339 when `fmt` is unset.
fn parse(text: &str, fmt: Option<&str>) -> Result<i64, String> {
    match fmt {
        None => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.timestamp())
            .map_err(|e| e.to_string()),
        Some(fmt) => NaiveDateTime::parse_from_str(text, fmt)
            .map(|dt| dt.and_utc().timestamp())
            .map_err(|e| e.to_string()),
    }
}
