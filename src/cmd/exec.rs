//! Local single-shot execution (`luagate exec`).
//!
//! Runs one script against one JSON document without a cluster, which is
//! how scripts are developed and tested.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use luagate::config::LuagateToml;
use luagate::pipeline::{Orchestrator, ScriptSet};
use luagate::sandbox::{SandboxExecutor, SandboxSettings, Script};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub async fn cmd_exec(
    config: &LuagateToml,
    script_path: &Path,
    input: Option<&Path>,
    output: Option<&Path>,
    fail_on_error: bool,
) -> Result<()> {
    let source = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script: {}", script_path.display()))?;
    let name = script_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "script".to_string());

    let document = read_document(input)?;

    let mut scripts = ScriptSet::new();
    scripts.insert(Script::new(name, source));

    let orchestrator =
        Orchestrator::new(SandboxExecutor::new(SandboxSettings::from(&config.sandbox)));
    let result = tokio::task::spawn_blocking(move || {
        orchestrator.run(&scripts, document, &CancellationToken::new())
    })
    .await
    .context("Script worker failed")??;

    for report in result.failures() {
        if let Some(e) = report.error() {
            eprintln!("error: {}", e);
        }
    }

    let mut rendered =
        serde_json::to_string_pretty(&result.document).context("Failed to encode document")?;
    rendered.push('\n');
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write output: {}", path.display()))?,
        None => std::io::stdout()
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?,
    }

    if fail_on_error && result.failure_count() > 0 {
        anyhow::bail!("{} script(s) failed", result.failure_count());
    }
    Ok(())
}

/// Read the input document from `path`, or stdin when absent or `-`.
fn read_document(path: Option<&Path>) -> Result<Value> {
    let content = match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input: {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read input from stdin")?;
            buf
        }
    };
    serde_json::from_str(&content).context("Input is not a valid JSON document")
}
