//! Where script bodies come from.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::ScriptRef;
use crate::errors::SourceError;

/// Resolves one reference into script text.
///
/// `Ok(None)` means the entry exists but holds no script (the reference is
/// dropped). `Err` means the reference could not be resolved at all.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn fetch(&self, reference: &ScriptRef) -> Result<Option<String>, SourceError>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}

/// In-memory entries, keyed by `<namespace>/<name>`.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: HashMap<String, Option<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, reference: &str, source: &str) -> Self {
        self.entries
            .insert(reference.to_string(), Some(source.to_string()));
        self
    }

    /// An entry that exists but has no script key.
    pub fn with_empty(mut self, reference: &str) -> Self {
        self.entries.insert(reference.to_string(), None);
        self
    }
}

#[async_trait]
impl ScriptSource for MemorySource {
    async fn fetch(&self, reference: &ScriptRef) -> Result<Option<String>, SourceError> {
        self.entries
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| SourceError::Unavailable {
                reference: reference.to_string(),
                message: "no such entry".to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Scripts on disk at `<root>/<namespace>/<name>/<key>`.
///
/// This is the layout produced by mounting one ConfigMap per directory, and
/// what local development trees use.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    key: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key: key.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, reference: &ScriptRef) -> Result<PathBuf, SourceError> {
        for part in [&reference.namespace, &reference.name] {
            if part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(SourceError::Unavailable {
                    reference: reference.to_string(),
                    message: format!("invalid path component '{}'", part),
                });
            }
        }
        Ok(self.root.join(&reference.namespace).join(&reference.name))
    }
}

#[async_trait]
impl ScriptSource for DirectorySource {
    async fn fetch(&self, reference: &ScriptRef) -> Result<Option<String>, SourceError> {
        let dir = self.entry_dir(reference)?;
        if !tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(SourceError::Unavailable {
                reference: reference.to_string(),
                message: format!("{} is not a directory", dir.display()),
            });
        }

        let file = dir.join(&self.key);
        match tokio::fs::read_to_string(&file).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SourceError::Unavailable {
                reference: reference.to_string(),
                message: format!("failed to read {}: {}", file.display(), e),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
