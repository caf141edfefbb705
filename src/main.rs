use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use luagate::config::{self, LuagateToml};

mod cmd;

#[derive(Parser)]
#[command(name = "luagate")]
#[command(version, about = "Kubernetes admission webhook running sandboxed Lua scripts")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./luagate.toml)
    #[arg(short, long, global = true, env = "LUAGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the mutating and validating admission endpoints
    Webhook {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// PEM certificate chain; serves plain HTTP unless set with --tls-key
        #[arg(long)]
        tls_cert: Option<PathBuf>,

        #[arg(long)]
        tls_key: Option<PathBuf>,

        /// Serve GET /stubs from the shapes of reviewed objects
        #[arg(long)]
        expose_stubs: bool,
    },
    /// Run one script against one JSON document
    Exec {
        /// Lua script file
        #[arg(short, long)]
        script: PathBuf,

        /// Input document (stdin when omitted or "-")
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write the resulting document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit non-zero when the script fails
        #[arg(long)]
        fail_on_error: bool,
    },
    /// Print LuaLS annotations for the `object` global from sample documents
    Stubs {
        /// JSON or YAML documents
        #[arg(required = true)]
        documents: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
    Init,
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "luagate=debug,tower_http=debug"
    } else if matches!(cli.command, Commands::Exec { .. }) {
        "off"
    } else {
        "luagate=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    let config_path = config::config_path(cli.config.as_deref());
    let mut settings = LuagateToml::load_or_default(&config_path)?;
    settings.apply_env()?;

    match &cli.command {
        Commands::Webhook {
            host,
            port,
            tls_cert,
            tls_key,
            expose_stubs,
        } => {
            if let Some(host) = host {
                settings.server.host = host.clone();
            }
            if let Some(port) = port {
                settings.server.port = *port;
            }
            if let Some(cert) = tls_cert {
                settings.tls.cert = Some(cert.clone());
            }
            if let Some(key) = tls_key {
                settings.tls.key = Some(key.clone());
            }
            if *expose_stubs {
                settings.server.expose_stubs = true;
            }
            cmd::cmd_webhook(&settings).await?;
        }
        Commands::Exec {
            script,
            input,
            output,
            fail_on_error,
        } => {
            cmd::cmd_exec(
                &settings,
                script,
                input.as_deref(),
                output.as_deref(),
                *fail_on_error,
            )
            .await?;
        }
        Commands::Stubs { documents, output } => {
            cmd::cmd_stubs(documents, output.as_deref())?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&config_path, &settings, command.clone())?;
        }
    }

    Ok(())
}
