//! Pass-through backend: resolves a tool identity against the registry and
//! streams the first image layer on every call.
//!
//! This is the whole registry boundary of the engine: token handshake,
//! manifest resolution (following a multi-platform index when present),
//! first-layer blob download with digest verification.

use crate::cache::{decompress_layer, ArtifactCache};
use crate::error::{Error, Result};
use crate::types::ToolIdentity;
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use sha2::{Digest, Sha256};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<PlatformDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(rename = "mediaType", default)]
    media_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PlatformDescriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
struct Platform {
    #[serde(default)]
    os: String,
    #[serde(default)]
    architecture: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct RegistryClient {
    client: reqwest::Client,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// The narrow registry contract: the decompressed tar bytes of the
    /// first filesystem layer for `id`.
    pub async fn fetch_first_layer(&self, id: &ToolIdentity) -> Result<Vec<u8>> {
        let repo = format!("{}/{}", id.repository, id.name);
        let token = self.token(&id.registry, &repo).await;

        let manifest = self
            .fetch_manifest(&id.registry, &repo, &id.version, token.as_deref())
            .await?;

        let manifest = if manifest.manifests.is_empty() {
            manifest
        } else {
            // Multi-platform index: pick the entry for the current host.
            let digest = select_platform(&manifest.manifests).ok_or_else(|| {
                Error::fetch_failure(&id.name, "no manifest for the current platform")
            })?;
            self.fetch_manifest(&id.registry, &repo, &digest, token.as_deref())
                .await?
        };

        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| Error::fetch_failure(&id.name, "image has no layers"))?;

        let bytes = self
            .fetch_blob(&id.registry, &repo, layer, token.as_deref(), &id.name)
            .await?;
        decompress_layer(bytes)
            .map_err(|e| Error::fetch_failure(&id.name, format!("decompress layer: {e}")))
    }

    async fn fetch_manifest(
        &self,
        registry: &str,
        repo: &str,
        reference: &str,
        token: Option<&str>,
    ) -> Result<Manifest> {
        let url = format!("https://{registry}/v2/{repo}/manifests/{reference}");
        tracing::debug!("Fetching manifest from {}", url);

        let mut request = self.client.get(&url).header("Accept", MANIFEST_ACCEPT);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::fetch_failure(repo, e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::fetch_failure(
                repo,
                format!("manifest request failed with {}", response.status()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| Error::fetch_failure(repo, format!("parse manifest: {e}")))
    }

    async fn fetch_blob(
        &self,
        registry: &str,
        repo: &str,
        layer: &Descriptor,
        token: Option<&str>,
        tool: &str,
    ) -> Result<Vec<u8>> {
        let url = format!("https://{registry}/v2/{repo}/blobs/{}", layer.digest);
        tracing::debug!("Fetching layer blob {} ({})", layer.digest, layer.media_type);

        let mut request = self.client.get(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::fetch_failure(tool, e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::fetch_failure(
                tool,
                format!("blob request failed with {}", response.status()),
            ));
        }

        let total = response.content_length().unwrap_or(0);
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_message(format!("Fetching {tool}"));

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::fetch_failure(tool, e.to_string()))?;
            bytes.extend_from_slice(&chunk);
            pb.set_position(bytes.len() as u64);
        }
        pb.finish_and_clear();

        let computed = format!("sha256:{:x}", Sha256::digest(&bytes));
        if computed != layer.digest {
            return Err(Error::fetch_failure(
                tool,
                format!("digest mismatch: expected {}, got {computed}", layer.digest),
            ));
        }

        Ok(bytes)
    }

    /// Anonymous (or GITHUB_TOKEN-backed) bearer token. Registries that do
    /// not run a token endpoint simply get unauthenticated requests.
    async fn token(&self, registry: &str, repo: &str) -> Option<String> {
        let url = format!(
            "https://{registry}/token?service={registry}&scope=repository:{repo}:pull"
        );
        let mut request = self.client.get(&url);
        if registry == "ghcr.io" {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                request = request.basic_auth("", Some(token));
                tracing::debug!("Using GITHUB_TOKEN for registry auth");
            }
        }
        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            tracing::debug!("Token endpoint answered {}", response.status());
            return None;
        }
        let token: TokenResponse = response.json().await.ok()?;
        Some(token.token)
    }
}

fn select_platform(manifests: &[PlatformDescriptor]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|m| {
            m.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .or_else(|| manifests.first())
        .map(|m| m.digest.clone())
}

#[async_trait]
impl ArtifactCache for RegistryClient {
    async fn get(&self, id: &ToolIdentity) -> Result<Vec<u8>> {
        self.fetch_first_layer(id).await
    }
}
