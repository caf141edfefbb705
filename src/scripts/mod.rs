//! Script references and loading.
//!
//! Objects name their scripts in an annotation holding a comma-separated
//! list of `<namespace>/<name>` references. The loader resolves each one
//! through a [`ScriptSource`] and builds the [`ScriptSet`] for a request.

pub mod kubernetes;
pub mod source;

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{ReferenceError, SourceError};
use crate::pipeline::ScriptSet;
use crate::sandbox::Script;
pub use source::{DirectorySource, MemorySource, ScriptSource};

/// A `<namespace>/<name>` pointer to a script entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptRef {
    pub namespace: String,
    pub name: String,
}

impl ScriptRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ScriptRef {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(name), None)
                if !namespace.trim().is_empty() && !name.trim().is_empty() =>
            {
                Ok(ScriptRef::new(namespace.trim(), name.trim()))
            }
            _ => Err(ReferenceError::Malformed(trimmed.to_string())),
        }
    }
}

/// Result of parsing an annotation value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    /// Well-formed references, in annotation order, without duplicates
    pub valid: Vec<ScriptRef>,
    /// Entries that were skipped
    pub malformed: Vec<ReferenceError>,
}

/// Split an annotation value into references. Empty entries are ignored.
pub fn parse_references(value: &str) -> References {
    let mut refs = References::default();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse::<ScriptRef>() {
            Ok(reference) if !refs.valid.contains(&reference) => refs.valid.push(reference),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(entry, "Skipping malformed script reference");
                refs.malformed.push(e);
            }
        }
    }
    refs
}

/// Read the annotation `key` from an object's metadata.
///
/// A missing `metadata`, `annotations` or key is `Ok(None)`. Metadata that
/// is present but has the wrong type is an error.
pub fn annotation_value<'a>(object: &'a Value, key: &str) -> Result<Option<&'a str>, String> {
    let fields = object
        .as_object()
        .ok_or_else(|| "object is not a JSON object".to_string())?;
    let metadata = match fields.get("metadata") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(metadata)) => metadata,
        Some(_) => return Err("metadata is not an object".to_string()),
    };
    let annotations = match metadata.get("annotations") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(annotations)) => annotations,
        Some(_) => return Err("metadata.annotations is not an object".to_string()),
    };
    match annotations.get(key) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(format!("annotation '{}' is not a string", key)),
    }
}

/// Resolves references into scripts through a [`ScriptSource`].
#[derive(Clone)]
pub struct ScriptLoader {
    source: Arc<dyn ScriptSource>,
}

impl ScriptLoader {
    pub fn new(source: Arc<dyn ScriptSource>) -> Self {
        Self { source }
    }

    /// Fetch every reference. Entries without content are dropped; a
    /// reference the source cannot resolve fails the whole load.
    pub async fn load(&self, references: &[ScriptRef]) -> Result<ScriptSet, SourceError> {
        let mut scripts = ScriptSet::new();
        for reference in references {
            match self.source.fetch(reference).await? {
                Some(text) if !text.trim().is_empty() => {
                    scripts.insert(Script::new(reference.to_string(), text));
                }
                _ => {
                    tracing::warn!(
                        reference = %reference,
                        source = self.source.name(),
                        "Script entry has no content, skipping"
                    );
                }
            }
        }
        tracing::debug!(count = scripts.len(), "Scripts loaded");
        Ok(scripts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_ref_from_str() {
        let r: ScriptRef = " default/add-labels ".parse().unwrap();
        assert_eq!(r, ScriptRef::new("default", "add-labels"));
        assert_eq!(r.to_string(), "default/add-labels");
    }

    #[test]
    fn test_script_ref_malformed() {
        for bad in ["no-slash", "a/b/c", "/name", "ns/", " / "] {
            assert_eq!(
                bad.parse::<ScriptRef>(),
                Err(ReferenceError::Malformed(bad.trim().to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_parse_references() {
        let refs = parse_references(" default/a , broken,, kube-system/b ,default/a,");
        assert_eq!(
            refs.valid,
            vec![
                ScriptRef::new("default", "a"),
                ScriptRef::new("kube-system", "b")
            ]
        );
        assert_eq!(
            refs.malformed,
            vec![ReferenceError::Malformed("broken".to_string())]
        );
    }

    #[test]
    fn test_parse_references_empty() {
        assert_eq!(parse_references(""), References::default());
        assert_eq!(parse_references(" , ,"), References::default());
    }

    #[test]
    fn test_annotation_value() {
        let key = "luagate.io/scripts";
        let obj = json!({"metadata": {"annotations": {key: "default/a"}}});
        assert_eq!(annotation_value(&obj, key).unwrap(), Some("default/a"));

        assert_eq!(annotation_value(&json!({}), key).unwrap(), None);
        assert_eq!(
            annotation_value(&json!({"metadata": {"name": "x"}}), key).unwrap(),
            None
        );
        assert_eq!(
            annotation_value(&json!({"metadata": {"annotations": {}}}), key).unwrap(),
            None
        );
    }

    #[test]
    fn test_annotation_value_wrong_types() {
        let key = "luagate.io/scripts";
        assert!(annotation_value(&json!([1]), key).is_err());
        assert!(annotation_value(&json!({"metadata": "x"}), key).is_err());
        assert!(annotation_value(&json!({"metadata": {"annotations": []}}), key).is_err());
        assert!(
            annotation_value(&json!({"metadata": {"annotations": {key: 5}}}), key).is_err()
        );
    }

    #[tokio::test]
    async fn test_loader_builds_named_set() {
        let source = MemorySource::new()
            .with_script("default/b", "object.b = true")
            .with_script("default/a", "object.a = true")
            .with_script("default/blank", "   ")
            .with_empty("default/no-key");
        let loader = ScriptLoader::new(Arc::new(source));

        let scripts = loader
            .load(&[
                ScriptRef::new("default", "b"),
                ScriptRef::new("default", "a"),
                ScriptRef::new("default", "blank"),
                ScriptRef::new("default", "no-key"),
            ])
            .await
            .unwrap();
        assert_eq!(scripts.names(), vec!["default/a", "default/b"]);
    }

    #[tokio::test]
    async fn test_loader_propagates_unavailable() {
        let source = MemorySource::new().with_script("default/up", "object.x = 1");
        let loader = ScriptLoader::new(Arc::new(source));
        let err = loader
            .load(&[ScriptRef::new("default", "up"), ScriptRef::new("default", "down")])
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }
}
