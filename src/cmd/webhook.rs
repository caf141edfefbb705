//! Admission webhook server command (`luagate webhook`).

use std::sync::Arc;

use anyhow::Result;
use luagate::admission::{Admission, DecisionPolicy};
use luagate::config::{LuagateToml, SourceKind};
use luagate::pipeline::Orchestrator;
use luagate::pipeline::observer::{Observer, ShapeRegistry};
use luagate::sandbox::{SandboxExecutor, SandboxSettings};
use luagate::scripts::kubernetes::ConfigMapSource;
use luagate::scripts::{DirectorySource, ScriptLoader, ScriptSource};
use luagate::server::{self, AppState, ServerConfig};

pub async fn cmd_webhook(config: &LuagateToml) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let source: Arc<dyn ScriptSource> = match config.source.kind {
        SourceKind::Kubernetes => Arc::new(ConfigMapSource::from_config(
            &config.source,
            &config.scripts.script_key,
        )?),
        SourceKind::Directory => {
            tracing::info!(directory = %config.source.directory.display(), "Using directory script source");
            Arc::new(DirectorySource::new(
                &config.source.directory,
                &config.scripts.script_key,
            ))
        }
    };

    let executor = SandboxExecutor::new(SandboxSettings::from(&config.sandbox));
    let mut orchestrator = Orchestrator::new(executor);
    let shapes = if config.server.expose_stubs {
        let registry = Arc::new(ShapeRegistry::new());
        orchestrator = orchestrator.with_observer(registry.clone() as Arc<dyn Observer>);
        Some(registry)
    } else {
        None
    };

    let policy = DecisionPolicy {
        patch_strategy: config.admission.patch_strategy,
        surface_warnings: config.admission.surface_warnings,
    };
    let admission = Admission::new(
        ScriptLoader::new(source),
        orchestrator,
        &config.scripts.annotation,
        policy,
    );

    let state = Arc::new(AppState { admission, shapes });
    server::start_server(ServerConfig::from(config), state).await
}
