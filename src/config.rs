//! Configuration for luagate.
//!
//! Settings are read from a TOML file (`luagate.toml` by default), then
//! environment variables, then CLI flags. Every field has a default so an
//! empty or missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8443
//! mutating_path = "/mutate"
//! validating_path = "/validate"
//! request_timeout_secs = 10
//! expose_stubs = false
//!
//! [tls]
//! cert = "/etc/webhook/certs/tls.crt"
//! key = "/etc/webhook/certs/tls.key"
//!
//! [scripts]
//! annotation = "luagate.io/scripts"
//! script_key = "script.lua"
//!
//! [source]
//! kind = "kubernetes"          # or "directory"
//! directory = "/etc/luagate/scripts"
//! timeout_secs = 5
//!
//! [sandbox]
//! modules = ["json", "yaml", "base64", "hex", "hash", "http", "log", "spew", "template", "time", "fs"]
//! memory_limit_mb = 64
//! http_timeout_secs = 10
//! fs_root = "/etc/luagate/data"
//!
//! [admission]
//! patch_strategy = "diff"      # or "replace"
//! surface_warnings = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::admission::patch::PatchStrategy;
use crate::sandbox::modules::Module;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "luagate.toml";

/// Default annotation holding the comma-separated script references.
pub const DEFAULT_ANNOTATION: &str = "luagate.io/scripts";

/// Default ConfigMap data key holding the script body.
pub const DEFAULT_SCRIPT_KEY: &str = "script.lua";

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_mutating_path")]
    pub mutating_path: String,
    #[serde(default = "default_validating_path")]
    pub validating_path: String,
    /// Upper bound for a whole admission request, scripts included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Serve `GET /stubs` with LuaLS annotations for every object kind seen
    #[serde(default)]
    pub expose_stubs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_mutating_path() -> String {
    "/mutate".to_string()
}

fn default_validating_path() -> String {
    "/validate".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mutating_path: default_mutating_path(),
            validating_path: default_validating_path(),
            request_timeout_secs: default_request_timeout(),
            expose_stubs: false,
        }
    }
}

/// TLS settings. When both paths are set the server speaks HTTPS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSection {
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl TlsSection {
    /// Both certificate and key, if configured.
    pub fn paths(&self) -> Option<(&Path, &Path)> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// How scripts are referenced from objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsSection {
    /// Annotation key carrying `<namespace>/<name>` references
    #[serde(default = "default_annotation")]
    pub annotation: String,
    /// Data key holding the Lua source inside each referenced entry
    #[serde(default = "default_script_key")]
    pub script_key: String,
}

fn default_annotation() -> String {
    DEFAULT_ANNOTATION.to_string()
}

fn default_script_key() -> String {
    DEFAULT_SCRIPT_KEY.to_string()
}

impl Default for ScriptsSection {
    fn default() -> Self {
        Self {
            annotation: default_annotation(),
            script_key: default_script_key(),
        }
    }
}

/// Where script bodies are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// ConfigMaps read through the Kubernetes API
    #[default]
    Kubernetes,
    /// `<directory>/<namespace>/<name>/<script_key>` on local disk
    Directory,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Kubernetes => write!(f, "kubernetes"),
            SourceKind::Directory => write!(f, "directory"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(SourceKind::Kubernetes),
            "directory" | "dir" => Ok(SourceKind::Directory),
            _ => anyhow::bail!(
                "Invalid source kind '{}'. Valid values: kubernetes, directory",
                s
            ),
        }
    }
}

/// Script source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    #[serde(default)]
    pub kind: SourceKind,
    /// Root directory for the `directory` source
    #[serde(default = "default_source_dir")]
    pub directory: PathBuf,
    /// Kubernetes API base URL; in-cluster settings are used when unset
    #[serde(default)]
    pub api_url: Option<String>,
    /// Bearer token file; defaults to the service account token
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// CA bundle for the API server; defaults to the service account CA
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("/etc/luagate/scripts")
}

fn default_source_timeout() -> u64 {
    5
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            directory: default_source_dir(),
            api_url: None,
            token_file: None,
            ca_file: None,
            timeout_secs: default_source_timeout(),
        }
    }
}

/// Capabilities and limits of every Lua sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    /// Modules scripts may `require`
    #[serde(default = "default_modules")]
    pub modules: Vec<Module>,
    /// Per-state memory cap in MiB (unset = unlimited)
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    /// Timeout applied to every request made through the `http` module
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Restrict the `fs` module to paths below this directory
    #[serde(default)]
    pub fs_root: Option<PathBuf>,
}

fn default_modules() -> Vec<Module> {
    Module::all().to_vec()
}

fn default_http_timeout() -> u64 {
    10
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            modules: default_modules(),
            memory_limit_mb: None,
            http_timeout_secs: default_http_timeout(),
            fs_root: None,
        }
    }
}

/// Admission response shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSection {
    #[serde(default)]
    pub patch_strategy: PatchStrategy,
    /// Report failed scripts as admission warnings
    #[serde(default = "default_surface_warnings")]
    pub surface_warnings: bool,
}

fn default_surface_warnings() -> bool {
    true
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            patch_strategy: PatchStrategy::default(),
            surface_warnings: default_surface_warnings(),
        }
    }
}

/// The complete luagate.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LuagateToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub scripts: ScriptsSection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub admission: AdmissionSection,
}

impl LuagateToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse luagate.toml")
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize luagate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `LUAGATE_*` environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// | Variable               | Field                  |
    /// |------------------------|------------------------|
    /// | `LUAGATE_HOST`         | `server.host`          |
    /// | `LUAGATE_PORT`         | `server.port`          |
    /// | `LUAGATE_TLS_CERT`     | `tls.cert`             |
    /// | `LUAGATE_TLS_KEY`      | `tls.key`              |
    /// | `LUAGATE_ANNOTATION`   | `scripts.annotation`   |
    /// | `LUAGATE_SOURCE_KIND`  | `source.kind`          |
    /// | `LUAGATE_SOURCE_DIR`   | `source.directory`     |
    /// | `LUAGATE_API_URL`      | `source.api_url`       |
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("LUAGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("LUAGATE_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("LUAGATE_PORT must be a port number, got '{}'", port))?;
        }
        if let Some(cert) = lookup("LUAGATE_TLS_CERT") {
            self.tls.cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = lookup("LUAGATE_TLS_KEY") {
            self.tls.key = Some(PathBuf::from(key));
        }
        if let Some(annotation) = lookup("LUAGATE_ANNOTATION") {
            self.scripts.annotation = annotation;
        }
        if let Some(kind) = lookup("LUAGATE_SOURCE_KIND") {
            self.source.kind = kind.parse()?;
        }
        if let Some(dir) = lookup("LUAGATE_SOURCE_DIR") {
            self.source.directory = PathBuf::from(dir);
        }
        if let Some(url) = lookup("LUAGATE_API_URL") {
            self.source.api_url = Some(url);
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (label, path) in [
            ("mutating_path", &self.server.mutating_path),
            ("validating_path", &self.server.validating_path),
        ] {
            if !path.starts_with('/') {
                warnings.push(format!("server.{} '{}' should start with '/'", label, path));
            }
        }
        if self.server.mutating_path == self.server.validating_path {
            warnings.push(format!(
                "server.mutating_path and server.validating_path are both '{}'",
                self.server.mutating_path
            ));
        }
        if self.server.request_timeout_secs == 0 {
            warnings.push("server.request_timeout_secs is 0; every request will time out".into());
        }

        match (&self.tls.cert, &self.tls.key) {
            (Some(_), None) => warnings.push("tls.cert is set without tls.key".into()),
            (None, Some(_)) => warnings.push("tls.key is set without tls.cert".into()),
            _ => {}
        }

        if self.scripts.annotation.trim().is_empty() {
            warnings.push("scripts.annotation is empty".into());
        }
        if self.scripts.script_key.trim().is_empty() {
            warnings.push("scripts.script_key is empty".into());
        }

        if self.source.kind == SourceKind::Directory && !self.source.directory.is_dir() {
            warnings.push(format!(
                "source.directory '{}' does not exist",
                self.source.directory.display()
            ));
        }

        if self.sandbox.memory_limit_mb == Some(0) {
            warnings.push("sandbox.memory_limit_mb is 0; no script can run".into());
        }
        if let Some(root) = &self.sandbox.fs_root
            && !root.is_dir()
        {
            warnings.push(format!("sandbox.fs_root '{}' does not exist", root.display()));
        }

        warnings
    }
}

/// Resolve the configuration file to use: an explicit path or `./luagate.toml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}
