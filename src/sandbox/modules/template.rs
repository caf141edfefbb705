//! `template`: `{{ path.to.field }}` substitution over a data table.

use mlua::{Lua, Table, Value as LuaValue};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::lua_pair;
use crate::sandbox::translate::from_lua;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").unwrap());

pub(super) fn module(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set(
        "render",
        lua.create_function(|lua, (template, data): (String, LuaValue)| {
            let rendered = from_lua(lua, data)
                .map_err(|e| e.to_string())
                .and_then(|data| render(&template, &data));
            lua_pair(lua, rendered)
        })?,
    )?;
    Ok(table)
}

/// Replace every placeholder in `template` with the value at its dotted path.
///
/// Numeric segments index arrays starting at 1. Strings are inserted as-is,
/// `null` as the empty string and anything else as JSON. `{{ . }}` is the
/// whole data value.
pub(crate) fn render(template: &str, data: &Value) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        let value = lookup(data, path.as_str())
            .ok_or_else(|| format!("template: no value at '{}'", path.as_str()))?;
        match value {
            Value::String(s) => out.push_str(s),
            Value::Null => {}
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path == "." {
        return Some(data);
    }
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(data, |current, segment| match current {
            Value::Object(fields) => fields.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| items.get(i)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::modules::test_support::lua_with_modules;
    use serde_json::json;

    #[test]
    fn test_render_paths() {
        let data = json!({
            "metadata": {"name": "web", "labels": {"tier": "frontend"}},
            "spec": {"replicas": 3, "ports": [80, 443]},
            "gone": null
        });
        let out = render(
            "{{ metadata.name }}/{{metadata.labels.tier}} x{{ spec.replicas }} :{{ spec.ports.2 }}{{ gone }}",
            &data,
        )
        .unwrap();
        assert_eq!(out, "web/frontend x3 :443");
    }

    #[test]
    fn test_render_missing_field() {
        let err = render("hello {{ who }}", &json!({})).unwrap_err();
        assert!(err.contains("'who'"));
    }

    #[test]
    fn test_render_without_placeholders() {
        assert_eq!(render("plain text", &json!(null)).unwrap(), "plain text");
    }

    #[test]
    fn test_render_from_lua() {
        let lua = lua_with_modules();
        let out: String = lua
            .load(r#"return require("template").render("app={{ app }}", {app = "api"})"#)
            .eval()
            .unwrap();
        assert_eq!(out, "app=api");
    }
}
