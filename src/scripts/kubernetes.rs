//! ConfigMap-backed script source.
//!
//! Reads `data[<key>]` of `/api/v1/namespaces/<ns>/configmaps/<name>` from
//! the Kubernetes API. Inside a cluster the service account token and CA
//! bundle are picked up automatically. A token file is re-read on every
//! fetch because the kubelet rotates projected tokens.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ScriptRef;
use super::source::ScriptSource;
use crate::config::SourceSection;
use crate::errors::SourceError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Deserialize)]
struct ConfigMap {
    #[serde(default)]
    data: Option<HashMap<String, String>>,
}

/// Where the bearer token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    None,
    Static(String),
    File(PathBuf),
}

/// Fetches scripts from ConfigMaps through the Kubernetes API.
#[derive(Debug, Clone)]
pub struct ConfigMapSource {
    client: reqwest::Client,
    api_url: String,
    token: Token,
    key: String,
}

impl ConfigMapSource {
    /// Build a source for an explicit API server.
    pub fn new(
        api_url: impl Into<String>,
        token: Option<String>,
        ca_pem: Option<&[u8]>,
        key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(pem) = ca_pem {
            let cert = reqwest::Certificate::from_pem(pem).context("Invalid API server CA bundle")?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().context("Failed to build Kubernetes API client")?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.map_or(Token::None, Token::Static),
            key: key.into(),
        })
    }

    /// Read the bearer token from `path` on every fetch.
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token = Token::File(path.into());
        self
    }

    /// Build a source from `[source]` settings, falling back to in-cluster
    /// service account credentials for anything not configured.
    pub fn from_config(section: &SourceSection, key: &str) -> Result<Self> {
        let api_url = match &section.api_url {
            Some(url) => url.clone(),
            None => in_cluster_url().context(
                "No source.api_url configured and KUBERNETES_SERVICE_HOST is not set",
            )?,
        };

        let token_file = section
            .token_file
            .clone()
            .or_else(|| service_account_file("token"));
        if let Some(path) = &token_file {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read token file: {}", path.display()))?;
        }

        let ca_file = section
            .ca_file
            .clone()
            .or_else(|| service_account_file("ca.crt"));
        let ca_pem = match ca_file {
            Some(path) => Some(
                std::fs::read(&path)
                    .with_context(|| format!("Failed to read CA file: {}", path.display()))?,
            ),
            None => None,
        };

        tracing::info!(api_url = %api_url, authenticated = token_file.is_some(), "Using ConfigMap script source");
        let source = Self::new(
            api_url,
            None,
            ca_pem.as_deref(),
            key,
            Duration::from_secs(section.timeout_secs),
        )?;
        Ok(match token_file {
            Some(path) => source.with_token_file(path),
            None => source,
        })
    }

    async fn bearer_token(&self) -> std::io::Result<Option<String>> {
        match &self.token {
            Token::None => Ok(None),
            Token::Static(token) => Ok(Some(token.clone())),
            Token::File(path) => Ok(Some(
                tokio::fs::read_to_string(path).await?.trim().to_string(),
            )),
        }
    }

    fn configmap_url(&self, reference: &ScriptRef) -> String {
        format!(
            "{}/api/v1/namespaces/{}/configmaps/{}",
            self.api_url, reference.namespace, reference.name
        )
    }
}

fn in_cluster_url() -> Option<String> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").ok()?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    if host.contains(':') {
        Some(format!("https://[{}]:{}", host, port))
    } else {
        Some(format!("https://{}:{}", host, port))
    }
}

fn service_account_file(name: &str) -> Option<PathBuf> {
    let path = Path::new(SERVICE_ACCOUNT_DIR).join(name);
    path.exists().then_some(path)
}

#[async_trait]
impl ScriptSource for ConfigMapSource {
    async fn fetch(&self, reference: &ScriptRef) -> Result<Option<String>, SourceError> {
        let unavailable = |message: String| SourceError::Unavailable {
            reference: reference.to_string(),
            message,
        };

        let token = self
            .bearer_token()
            .await
            .map_err(|e| unavailable(format!("failed to read token: {}", e)))?;
        let mut request = self.client.get(self.configmap_url(reference));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(unavailable("ConfigMap not found".to_string())),
            status if !status.is_success() => {
                return Err(unavailable(format!("API server returned {}", status)));
            }
            _ => {}
        }

        let configmap: ConfigMap = response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid ConfigMap body: {}", e)))?;

        Ok(configmap
            .data
            .and_then(|mut data| data.remove(&self.key)))
    }

    fn name(&self) -> &'static str {
        "configmap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::extract::Path as UrlPath;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use serde_json::json;

    async fn configmap(
        UrlPath((namespace, name)): UrlPath<(String, String)>,
        headers: HeaderMap,
    ) -> Response {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer secret-token");
        if !authorized {
            return HttpStatus::UNAUTHORIZED.into_response();
        }
        match (namespace.as_str(), name.as_str()) {
            ("default", "labels") => Json(json!({
                "kind": "ConfigMap",
                "data": {"script.lua": "object.x = 1", "other": "ignored"}
            }))
            .into_response(),
            ("default", "no-key") => Json(json!({"kind": "ConfigMap", "data": {}})).into_response(),
            ("default", "no-data") => Json(json!({"kind": "ConfigMap"})).into_response(),
            _ => HttpStatus::NOT_FOUND.into_response(),
        }
    }

    async fn fake_api() -> String {
        let app = axum::Router::new().route(
            "/api/v1/namespaces/{namespace}/configmaps/{name}",
            get(configmap),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn source(url: &str, token: Option<&str>) -> ConfigMapSource {
        ConfigMapSource::new(
            url,
            token.map(str::to_string),
            None,
            "script.lua",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_script_key() {
        let url = fake_api().await;
        let source = source(&url, Some("secret-token"));
        assert_eq!(
            source
                .fetch(&ScriptRef::new("default", "labels"))
                .await
                .unwrap(),
            Some("object.x = 1".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let url = fake_api().await;
        let source = source(&url, Some("secret-token"));
        for name in ["no-key", "no-data"] {
            assert_eq!(
                source.fetch(&ScriptRef::new("default", name)).await.unwrap(),
                None
            );
        }
    }

    #[tokio::test]
    async fn test_missing_configmap_is_unavailable() {
        let url = fake_api().await;
        let source = source(&url, Some("secret-token"));
        let err = source
            .fetch(&ScriptRef::new("default", "nope"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ConfigMap not found"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_unavailable() {
        let url = fake_api().await;
        let source = source(&url, None);
        let err = source
            .fetch(&ScriptRef::new("default", "labels"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_configmap_url() {
        let source = source("https://10.0.0.1:443/", None);
        assert_eq!(
            source.configmap_url(&ScriptRef::new("kube-system", "policy")),
            "https://10.0.0.1:443/api/v1/namespaces/kube-system/configmaps/policy"
        );
    }

    #[test]
    fn test_from_config_with_explicit_settings() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "abc\n").unwrap();

        let section = SourceSection {
            api_url: Some("https://api.example:6443".to_string()),
            token_file: Some(token),
            ..SourceSection::default()
        };
        let source = ConfigMapSource::from_config(&section, "script.lua").unwrap();
        assert_eq!(source.token, Token::File(dir.path().join("token")));
        assert_eq!(source.api_url, "https://api.example:6443");
    }

    #[test]
    fn test_from_config_with_unreadable_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let section = SourceSection {
            api_url: Some("https://api.example:6443".to_string()),
            token_file: Some(dir.path().join("missing")),
            ..SourceSection::default()
        };
        let err = ConfigMapSource::from_config(&section, "script.lua").unwrap_err();
        assert!(err.to_string().contains("Failed to read token file"));
    }

    #[tokio::test]
    async fn test_token_file_is_reread_per_fetch() {
        let url = fake_api().await;
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token");
        std::fs::write(&token, "secret-token\n").unwrap();
        let source = source(&url, None).with_token_file(&token);
        let reference = ScriptRef::new("default", "labels");

        assert!(source.fetch(&reference).await.unwrap().is_some());

        std::fs::write(&token, "rotated\n").unwrap();
        let err = source.fetch(&reference).await.unwrap_err();
        assert!(err.to_string().contains("401"));

        std::fs::remove_file(&token).unwrap();
        let err = source.fetch(&reference).await.unwrap_err();
        assert!(err.to_string().contains("failed to read token"));
    }
}
