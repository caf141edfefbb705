//! `spew`: render arbitrary Lua values for debugging.

use mlua::{Lua, MultiValue, Table, Value as LuaValue};
use std::ffi::c_void;

use super::join_args;

const MAX_DEPTH: usize = 32;

pub(super) fn module(lua: &Lua, script: &str) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "dump",
        lua.create_function(|_, value: LuaValue| Ok(dump(&value)))?,
    )?;

    let name = script.to_string();
    table.set(
        "print",
        lua.create_function(move |_, args: MultiValue| {
            tracing::info!(script = %name, "{}", join_args(args));
            Ok(())
        })?,
    )?;
    Ok(table)
}

/// Render `value` as a single-line Lua-like literal.
///
/// Table keys are sorted (integers first, then strings), sequences are
/// written positionally and repeated tables on the current path print as
/// `<cycle>`.
pub fn dump(value: &LuaValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value, &mut Vec::new());
    out
}

fn write_value(out: &mut String, value: &LuaValue, path: &mut Vec<*const c_void>) {
    match value {
        LuaValue::Nil => out.push_str("nil"),
        LuaValue::LightUserData(ud) if ud.0.is_null() => out.push_str("null"),
        LuaValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        LuaValue::Integer(i) => out.push_str(&i.to_string()),
        LuaValue::Number(n) => out.push_str(&n.to_string()),
        LuaValue::String(s) => out.push_str(&format!("{:?}", s.to_string_lossy())),
        LuaValue::Table(t) => write_table(out, t, path),
        other => {
            out.push('<');
            out.push_str(other.type_name());
            out.push('>');
        }
    }
}

fn write_table(out: &mut String, table: &Table, path: &mut Vec<*const c_void>) {
    let ptr = table.to_pointer();
    if path.contains(&ptr) {
        out.push_str("<cycle>");
        return;
    }
    if path.len() >= MAX_DEPTH {
        out.push_str("{ ... }");
        return;
    }
    let Ok(mut entries) = table
        .clone()
        .pairs::<LuaValue, LuaValue>()
        .collect::<mlua::Result<Vec<_>>>()
    else {
        out.push_str("<table>");
        return;
    };
    if entries.is_empty() {
        out.push_str("{}");
        return;
    }

    entries.sort_by(|(a, _), (b, _)| key_order(a).cmp(&key_order(b)));
    let len = entries.len() as i64;
    let sequence = entries
        .iter()
        .all(|(k, _)| matches!(k, LuaValue::Integer(i) if *i >= 1 && *i <= len));

    path.push(ptr);
    out.push_str("{ ");
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if !sequence {
            write_key(out, key);
            out.push_str(" = ");
        }
        write_value(out, value, path);
    }
    out.push_str(" }");
    path.pop();
}

fn write_key(out: &mut String, key: &LuaValue) {
    match key {
        LuaValue::String(s) => {
            let text = s.to_string_lossy().to_string();
            if is_identifier(&text) {
                out.push_str(&text);
            } else {
                out.push_str(&format!("[{:?}]", text));
            }
        }
        LuaValue::Integer(i) => out.push_str(&format!("[{}]", i)),
        other => {
            out.push('[');
            write_value(out, other, &mut Vec::new());
            out.push(']');
        }
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn key_order(key: &LuaValue) -> (u8, i64, String) {
    match key {
        LuaValue::Integer(i) => (0, *i, String::new()),
        LuaValue::String(s) => (1, 0, s.to_string_lossy().to_string()),
        other => (2, 0, other.type_name().to_string()),
    }
}
