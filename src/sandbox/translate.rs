//! Conversion between JSON documents and Lua values.
//!
//! - `null` maps to the `mlua::Value::NULL` light userdata, so null fields
//!   survive a round trip (scripts see it as the global `null`)
//! - arrays become tables registered in a weak-keyed array set, so empty
//!   arrays come back as arrays; untagged tables keyed exactly `1..n` are
//!   arrays too
//! - integers stay integers, floats stay floats

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::{Map, Number, Value};
use std::ffi::c_void;
use thiserror::Error;

/// Registry key of the weak-keyed table that marks array tables.
const ARRAY_SET: &str = "luagate.arrays";

/// Maximum table nesting accepted when reading values back.
pub const MAX_DEPTH: usize = 256;

/// Why a Lua value could not become a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("number {0} is not finite")]
    NonFinite(String),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("a Lua {0} cannot be represented in a document")]
    Unsupported(&'static str),

    #[error("table key of type {0} cannot be an object key")]
    InvalidKey(&'static str),

    #[error("integer {0} does not fit in a Lua integer")]
    IntegerOverflow(String),

    #[error("array table has a non-index key of type {0}")]
    ArrayKey(&'static str),

    #[error("table contains a reference cycle")]
    Cycle,

    #[error("tables nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("{0}")]
    Lua(String),
}

impl From<mlua::Error> for TranslateError {
    fn from(err: mlua::Error) -> Self {
        TranslateError::Lua(err.to_string())
    }
}

/// Weak-keyed set of tables that represent arrays, created on first use.
pub fn array_set(lua: &Lua) -> mlua::Result<Table> {
    if let Some(set) = lua.named_registry_value::<Option<Table>>(ARRAY_SET)? {
        return Ok(set);
    }
    let set = lua.create_table()?;
    let mode = lua.create_table()?;
    mode.raw_set("__mode", "k")?;
    set.set_metatable(Some(mode));
    lua.set_named_registry_value(ARRAY_SET, set.clone())?;
    Ok(set)
}

/// Mark `table` as an array so it translates back as one even when empty.
pub fn mark_array(lua: &Lua, table: &Table) -> mlua::Result<()> {
    array_set(lua)?.raw_set(table.clone(), true)
}

/// Translate a document into a Lua value.
pub fn to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    let arrays = array_set(lua)?;
    push_value(lua, &arrays, value)
}

fn push_value(lua: &Lua, arrays: &Table, value: &Value) -> mlua::Result<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::NULL,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Number(n) => number_to_lua(n)?,
        Value::String(s) => LuaValue::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, push_value(lua, arrays, item)?)?;
            }
            arrays.raw_set(table.clone(), true)?;
            LuaValue::Table(table)
        }
        Value::Object(fields) => {
            let table = lua.create_table_with_capacity(0, fields.len())?;
            for (key, item) in fields {
                table.raw_set(key.as_str(), push_value(lua, arrays, item)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

/// Integers beyond `i64` are refused rather than widened to a float, which
/// would change the value on the way back.
fn number_to_lua(n: &Number) -> mlua::Result<LuaValue> {
    if let Some(i) = n.as_i64() {
        Ok(LuaValue::Integer(i))
    } else if let Some(u) = n.as_u64() {
        Err(mlua::Error::external(TranslateError::IntegerOverflow(
            u.to_string(),
        )))
    } else {
        Ok(LuaValue::Number(n.as_f64().unwrap_or(f64::NAN)))
    }
}

/// Translate a Lua value back into a document.
pub fn from_lua(lua: &Lua, value: LuaValue) -> Result<Value, TranslateError> {
    let arrays = array_set(lua)?;
    let mut reader = Reader {
        arrays,
        stack: Vec::new(),
    };
    reader.read(value)
}

struct Reader {
    arrays: Table,
    /// Tables currently being read, for cycle detection
    stack: Vec<*const c_void>,
}

impl Reader {
    fn read(&mut self, value: LuaValue) -> Result<Value, TranslateError> {
        match value {
            LuaValue::Nil => Ok(Value::Null),
            LuaValue::LightUserData(ud) if ud.0.is_null() => Ok(Value::Null),
            LuaValue::Boolean(b) => Ok(Value::Bool(b)),
            LuaValue::Integer(i) => Ok(Value::from(i)),
            LuaValue::Number(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| TranslateError::NonFinite(f.to_string())),
            LuaValue::String(s) => Ok(Value::String(
                s.to_str().map_err(|_| TranslateError::InvalidUtf8)?.to_string(),
            )),
            LuaValue::Table(table) => self.read_table(table),
            other => Err(TranslateError::Unsupported(other.type_name())),
        }
    }

    fn read_table(&mut self, table: Table) -> Result<Value, TranslateError> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(TranslateError::TooDeep(MAX_DEPTH));
        }
        let ptr = table.to_pointer();
        if self.stack.contains(&ptr) {
            return Err(TranslateError::Cycle);
        }
        self.stack.push(ptr);
        let result = self.read_entries(&table);
        self.stack.pop();
        result
    }

    fn read_entries(&mut self, table: &Table) -> Result<Value, TranslateError> {
        let tagged: bool = self.arrays.raw_get(table.clone())?;
        let entries = table
            .clone()
            .pairs::<LuaValue, LuaValue>()
            .collect::<mlua::Result<Vec<_>>>()?;

        if entries.is_empty() {
            return Ok(if tagged {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            });
        }

        if tagged {
            return self.read_array(entries);
        }

        if is_sequence(&entries) {
            let mut slots: Vec<Option<LuaValue>> = vec![None; entries.len()];
            for (key, value) in entries {
                if let LuaValue::Integer(i) = key {
                    slots[(i - 1) as usize] = Some(value);
                }
            }
            let mut items = Vec::with_capacity(slots.len());
            for value in slots.into_iter().flatten() {
                items.push(self.read(value)?);
            }
            return Ok(Value::Array(items));
        }

        let mut fields = Map::new();
        for (key, value) in entries {
            let key = match key {
                LuaValue::String(s) => s.to_str().map_err(|_| TranslateError::InvalidUtf8)?.to_string(),
                LuaValue::Integer(i) => i.to_string(),
                other => return Err(TranslateError::InvalidKey(other.type_name())),
            };
            fields.insert(key, self.read(value)?);
        }
        Ok(Value::Object(fields))
    }

    /// A table that started out as an array stays one: entries are taken in
    /// index order and holes left by `t[i] = nil` are closed up.
    fn read_array(&mut self, entries: Vec<(LuaValue, LuaValue)>) -> Result<Value, TranslateError> {
        let mut indexed = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match key {
                LuaValue::Integer(i) if i >= 1 => indexed.push((i, value)),
                other => return Err(TranslateError::ArrayKey(other.type_name())),
            }
        }
        indexed.sort_by_key(|(i, _)| *i);

        let mut items = Vec::with_capacity(indexed.len());
        for (_, value) in indexed {
            items.push(self.read(value)?);
        }
        Ok(Value::Array(items))
    }
}

/// Keys are exactly the integers `1..=len`.
fn is_sequence(entries: &[(LuaValue, LuaValue)]) -> bool {
    let len = entries.len() as i64;
    entries
        .iter()
        .all(|(key, _)| matches!(key, LuaValue::Integer(i) if *i >= 1 && *i <= len))
}
