//! RFC 6902 JSON Patch generation and application.
//!
//! `diff` emits per-field operations computed by `json_patch::diff`.
//! `replace` emits a single root replacement. Only the end state is
//! guaranteed: applying the patch to the original yields the final document.

use json_patch::ReplaceOperation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use json_patch::{PatchError, PatchOperation};

/// How changes are described to the API server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStrategy {
    /// Field-level operations
    #[default]
    Diff,
    /// One `replace` of the whole document
    Replace,
}

impl std::fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchStrategy::Diff => write!(f, "diff"),
            PatchStrategy::Replace => write!(f, "replace"),
        }
    }
}

impl std::str::FromStr for PatchStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "diff" => Ok(PatchStrategy::Diff),
            "replace" => Ok(PatchStrategy::Replace),
            _ => anyhow::bail!(
                "Invalid patch strategy '{}'. Valid values: diff, replace",
                s
            ),
        }
    }
}

/// Operations turning `original` into `target`. Empty when they are equal.
pub fn generate(original: &Value, target: &Value, strategy: PatchStrategy) -> Vec<PatchOperation> {
    if original == target {
        return Vec::new();
    }
    match strategy {
        PatchStrategy::Replace => vec![PatchOperation::Replace(ReplaceOperation {
            path: Default::default(),
            value: target.clone(),
        })],
        PatchStrategy::Diff => json_patch::diff(original, target).0,
    }
}

/// Apply `ops` to a copy of `document`.
pub fn apply(document: &Value, ops: &[PatchOperation]) -> Result<Value, PatchError> {
    let mut doc = document.clone();
    json_patch::patch(&mut doc, ops)?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "web",
                "labels": {"app": "web", "tier": "frontend"},
                "annotations": {"luagate.io/scripts": "default/labels"}
            },
            "spec": {
                "containers": [
                    {"name": "app", "image": "nginx:1.25"},
                    {"name": "sidecar", "image": "envoy"}
                ],
                "tolerations": []
            }
        })
    }

    fn ops_json(ops: &[PatchOperation]) -> Value {
        serde_json::to_value(ops).unwrap()
    }

    #[test]
    fn test_equal_documents_have_no_operations() {
        assert!(generate(&pod(), &pod(), PatchStrategy::Diff).is_empty());
        assert!(generate(&pod(), &pod(), PatchStrategy::Replace).is_empty());
    }

    #[test]
    fn test_diff_reaches_target() {
        let original = pod();
        let mut target = pod();
        target["metadata"]["labels"]["team"] = json!("core");
        target["metadata"]["labels"]
            .as_object_mut()
            .unwrap()
            .remove("tier");
        target["spec"]["containers"][0]["image"] = json!("nginx:1.27");

        let ops = generate(&original, &target, PatchStrategy::Diff);
        assert_eq!(ops.len(), 3);
        let paths: Vec<Value> = ops_json(&ops)
            .as_array()
            .unwrap()
            .iter()
            .map(|op| op["path"].clone())
            .collect();
        assert!(paths.contains(&json!("/metadata/labels/tier")));
        assert!(paths.contains(&json!("/metadata/labels/team")));
        assert!(paths.contains(&json!("/spec/containers/0/image")));
        assert_eq!(apply(&original, &ops).unwrap(), target);
    }

    #[test]
    fn test_keys_are_escaped() {
        let original = json!({"metadata": {"annotations": {}}});
        let target = json!({"metadata": {"annotations": {"example.com/a~b": "x"}}});
        let ops = generate(&original, &target, PatchStrategy::Diff);
        assert_eq!(
            ops_json(&ops),
            json!([{
                "op": "add",
                "path": "/metadata/annotations/example.com~1a~0b",
                "value": "x"
            }])
        );
        assert_eq!(apply(&original, &ops).unwrap(), target);
    }

    #[test]
    fn test_array_changes_reach_target() {
        let original = pod();
        let mut target = pod();
        target["spec"]["tolerations"] = json!([{"key": "dedicated", "operator": "Exists"}]);
        target["spec"]["containers"]
            .as_array_mut()
            .unwrap()
            .remove(1);
        let ops = generate(&original, &target, PatchStrategy::Diff);
        assert!(!ops.is_empty());
        assert_eq!(apply(&original, &ops).unwrap(), target);
    }

    #[test]
    fn test_type_change_reaches_target() {
        let original = json!({"a": {"b": 1}});
        let target = json!({"a": [1]});
        let ops = generate(&original, &target, PatchStrategy::Diff);
        assert_eq!(apply(&original, &ops).unwrap(), target);
    }

    #[test]
    fn test_replace_strategy_uses_root() {
        let original = pod();
        let mut target = pod();
        target["metadata"]["name"] = json!("api");
        let ops = generate(&original, &target, PatchStrategy::Replace);
        assert_eq!(
            ops_json(&ops),
            json!([{"op": "replace", "path": "", "value": target.clone()}])
        );
        assert_eq!(apply(&original, &ops).unwrap(), target);
    }

    #[test]
    fn test_apply_errors() {
        let doc = json!({"a": [1, 2]});
        let missing: Vec<PatchOperation> =
            serde_json::from_value(json!([{"op": "remove", "path": "/b"}])).unwrap();
        assert!(apply(&doc, &missing).is_err());

        let out_of_range: Vec<PatchOperation> =
            serde_json::from_value(json!([{"op": "replace", "path": "/a/5", "value": 1}]))
                .unwrap();
        assert!(apply(&doc, &out_of_range).is_err());
    }

    #[test]
    fn test_apply_array_add() {
        let doc = json!({"a": [1, 3]});
        let ops: Vec<PatchOperation> = serde_json::from_value(json!([
            {"op": "add", "path": "/a/1", "value": 2},
            {"op": "add", "path": "/a/-", "value": 4}
        ]))
        .unwrap();
        assert_eq!(apply(&doc, &ops).unwrap(), json!({"a": [1, 2, 3, 4]}));
    }

    #[test]
    fn test_patch_strategy_from_str() {
        assert_eq!("DIFF".parse::<PatchStrategy>().unwrap(), PatchStrategy::Diff);
        assert_eq!(
            "replace".parse::<PatchStrategy>().unwrap(),
            PatchStrategy::Replace
        );
        assert!("merge".parse::<PatchStrategy>().is_err());
    }
}
