//! Side-channel observers notified by the orchestrator.
//!
//! Observers never influence a run: their errors are logged and dropped.
//! [`ShapeRegistry`] is the one shipped here. It accumulates the field
//! shape of every document kind it sees and renders LuaLS annotations so
//! editors can complete `object.` in scripts.

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Receives every document a pipeline run starts from.
pub trait Observer: Send + Sync {
    fn observe(&self, document: &Value) -> Result<()>;
}

/// Inferred type of a document fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Only `null` was ever seen
    Null,
    Boolean,
    Integer,
    Number,
    String,
    /// Element shape; `Null` for arrays that were always empty
    Array(Box<Shape>),
    Object(BTreeMap<String, Shape>),
    /// Conflicting shapes were seen
    Any,
}

impl Shape {
    /// Infer the shape of a single value.
    pub fn of(value: &Value) -> Shape {
        match value {
            Value::Null => Shape::Null,
            Value::Bool(_) => Shape::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Shape::Integer,
            Value::Number(_) => Shape::Number,
            Value::String(_) => Shape::String,
            Value::Array(items) => Shape::Array(Box::new(
                items
                    .iter()
                    .map(Shape::of)
                    .fold(Shape::Null, Shape::merge),
            )),
            Value::Object(fields) => Shape::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Shape::of(v)))
                    .collect(),
            ),
        }
    }

    /// Combine two observations of the same location.
    pub fn merge(self, other: Shape) -> Shape {
        match (self, other) {
            (Shape::Null, other) | (other, Shape::Null) => other,
            (Shape::Integer, Shape::Number) | (Shape::Number, Shape::Integer) => Shape::Number,
            (Shape::Array(a), Shape::Array(b)) => Shape::Array(Box::new(a.merge(*b))),
            (Shape::Object(mut a), Shape::Object(b)) => {
                for (key, shape) in b {
                    let merged = match a.remove(&key) {
                        Some(existing) => existing.merge(shape),
                        None => shape,
                    };
                    a.insert(key, merged);
                }
                Shape::Object(a)
            }
            (a, b) if a == b => a,
            _ => Shape::Any,
        }
    }
}

/// Thread-safe registry of document shapes keyed by `kind`.
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    shapes: Mutex<BTreeMap<String, Shape>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the shape of `document` into the entry for its kind.
    pub fn record(&self, document: &Value) -> Result<()> {
        let kind = document_kind(document);
        let shape = Shape::of(document);
        let mut shapes = self
            .shapes
            .lock()
            .map_err(|_| anyhow::anyhow!("shape registry lock poisoned"))?;
        let merged = match shapes.remove(&kind) {
            Some(existing) => existing.merge(shape),
            None => shape,
        };
        shapes.insert(kind, merged);
        Ok(())
    }

    /// Kinds recorded so far, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.snapshot().into_keys().collect()
    }

    fn snapshot(&self) -> BTreeMap<String, Shape> {
        match self.shapes.lock() {
            Ok(shapes) => shapes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Render LuaLS annotations declaring the `object` global.
    pub fn render_stubs(&self) -> String {
        let shapes = self.snapshot();
        let mut out = String::from("---@meta\n");
        let mut roots = Vec::new();

        for (kind, shape) in &shapes {
            let class = class_name(kind);
            let ty = render_class(&mut out, &class, shape);
            roots.push(ty);
        }

        out.push('\n');
        if roots.is_empty() {
            out.push_str("---@type table<string, any>\n");
        } else {
            out.push_str(&format!("---@type {}\n", roots.join("|")));
        }
        out.push_str("object = {}\n");
        out
    }
}

impl Observer for ShapeRegistry {
    fn observe(&self, document: &Value) -> Result<()> {
        self.record(document)
    }
}

fn document_kind(document: &Value) -> String {
    document
        .get("kind")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .unwrap_or("Object")
        .to_string()
}

fn class_name(kind: &str) -> String {
    let name: String = kind
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() { "Object".to_string() } else { name }
}

/// Emit `---@class` blocks for `shape` (depth-first) and return its type.
fn render_class(out: &mut String, class: &str, shape: &Shape) -> String {
    match shape {
        Shape::Object(fields) => {
            let mut lines = Vec::with_capacity(fields.len());
            for (field, field_shape) in fields {
                let nested = format!("{}.{}", class, class_name(field));
                let ty = render_class(out, &nested, field_shape);
                lines.push(format!("---@field {} {}", field_label(field), ty));
            }
            out.push_str(&format!("\n---@class {}\n", class));
            for line in lines {
                out.push_str(&line);
                out.push('\n');
            }
            class.to_string()
        }
        Shape::Array(element) => {
            let ty = render_class(out, &format!("{}_item", class), element);
            format!("{}[]", ty)
        }
        Shape::Null | Shape::Any => "any".to_string(),
        Shape::Boolean => "boolean".to_string(),
        Shape::Integer => "integer".to_string(),
        Shape::Number => "number".to_string(),
        Shape::String => "string".to_string(),
    }
}

fn field_label(field: &str) -> String {
    let mut chars = field.chars();
    let identifier = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if identifier {
        field.to_string()
    } else {
        format!("[{:?}]", field)
    }
}
