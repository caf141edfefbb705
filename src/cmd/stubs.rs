//! Editor stub generation (`luagate stubs`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use luagate::pipeline::observer::ShapeRegistry;
use serde_json::Value;

pub fn cmd_stubs(documents: &[PathBuf], output: Option<&Path>) -> Result<()> {
    let registry = ShapeRegistry::new();
    for path in documents {
        let document = load_document(path)?;
        registry.record(&document)?;
    }

    let stubs = registry.render_stubs();
    match output {
        Some(path) => {
            std::fs::write(path, &stubs)
                .with_context(|| format!("Failed to write stubs: {}", path.display()))?;
            println!(
                "Wrote stubs for {} kind(s) to {}",
                registry.kinds().len(),
                path.display()
            );
        }
        None => print!("{}", stubs),
    }
    Ok(())
}

/// JSON by default; `.yaml`/`.yml` files are read as YAML.
fn load_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML document: {}", path.display()))
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON document: {}", path.display()))
    }
}
