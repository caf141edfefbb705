//! Configuration view and validation commands (`luagate config`).

use std::path::Path;

use anyhow::{Context, Result};
use luagate::config::LuagateToml;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    effective: &LuagateToml,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("luagate configuration");
            println!("=====================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            let rendered =
                toml::to_string_pretty(effective).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No luagate.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = LuagateToml::load(config_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                anyhow::bail!(
                    "Config file already exists at {}. Remove it first to re-initialize.",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
            LuagateToml::default().save(config_path)?;
            println!("Created {}", config_path.display());
        }
    }
    Ok(())
}
