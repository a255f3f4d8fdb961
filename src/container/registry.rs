use std::collections::BTreeMap;

use eyre::{eyre, Result};
use regex::Regex;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::*;
use url::{Host, Url};

use crate::project::Project;

const MANIFEST_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, \
                              application/vnd.oci.image.manifest.v1+json";

#[derive(Debug, Deserialize)]
struct Manifest {
    config: Descriptor,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// The parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let param_regex = Regex::new(r#"(\w+)="([^"]*)""#).ok()?;
        let params: BTreeMap<&str, &str> = param_regex
            .captures_iter(params)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .collect();

        Some(Self {
            realm: params.get("realm")?.to_string(),
            service: params.get("service").map(|s| s.to_string()),
            scope: params.get("scope").map(|s| s.to_string()),
        })
    }
}

/// A read-only Docker registry (v2 API) client, just enough to fetch the
/// labels of a pushed image.
pub struct RegistryClient {
    base: Url,
    username: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Registries on the loopback interface are never reached through an
    /// HTTP proxy from the environment.
    pub fn new(base: Url, username: Option<String>, password: Option<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if is_loopback(&base) {
            builder = builder.no_proxy();
        }

        Ok(Self {
            base,
            username,
            password,
            http: builder.build()?,
        })
    }

    /// A client for `$DOCKER_REGISTRY_URL`, authenticating as
    /// `$DOCKER_REGISTRY_USER` / `$DOCKER_REGISTRY_PASSWORD`.
    pub fn from_project(project: &Project) -> Result<Self> {
        let env = project.env();
        Self::new(
            project.registry_url()?,
            env.lookup("DOCKER_REGISTRY_USER"),
            env.lookup("DOCKER_REGISTRY_PASSWORD"),
        )
    }

    /// Labels of `repository:tag`, or `None` when the registry has no such
    /// image.
    pub async fn image_labels(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let manifest_url = self
            .base
            .join(&format!("v2/{repository}/manifests/{tag}"))?;
        let response = self.get(manifest_url.clone(), MANIFEST_TYPES).await?;
        if !response.status().is_success() {
            warn!("no cached image: {} for {manifest_url}", response.status());
            return Ok(None);
        }
        let manifest: Manifest = response.json().await?;
        debug!("{repository}:{tag} config blob is {}", manifest.config.digest);

        let blob_url = self
            .base
            .join(&format!("v2/{repository}/blobs/{}", manifest.config.digest))?;
        let response = self.get(blob_url.clone(), "application/json").await?;
        if !response.status().is_success() {
            warn!("no cached image: {} for {blob_url}", response.status());
            return Ok(None);
        }
        let config: ImageConfig = response.json().await?;

        Ok(Some(
            config
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
        ))
    }

    /// GET with basic auth, answering a bearer challenge once if the
    /// registry asks for a token.
    async fn get(&self, url: Url, accept: &str) -> Result<Response> {
        let response = self.request(url.clone(), accept, None).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse);
        let Some(challenge) = challenge else {
            return Ok(response);
        };

        let token = self.token(&challenge).await?;
        self.request(url, accept, Some(&token)).await
    }

    async fn request(&self, url: Url, accept: &str, token: Option<&str>) -> Result<Response> {
        debug!("GET {url}");
        let mut request = self.http.get(url).header(ACCEPT, accept);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        } else if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }
        Ok(request.send().await?)
    }

    async fn token(&self, challenge: &BearerChallenge) -> Result<String> {
        let mut url = Url::parse(&challenge.realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }
        debug!("requesting registry token from {url}");

        let mut request = self.http.get(url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }
        let response: TokenResponse = request.send().await?.error_for_status()?.json().await?;

        response
            .token
            .or(response.access_token)
            .ok_or_else(|| eyre!("registry token response carried no token"))
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(addr)) => addr.is_loopback(),
        Some(Host::Ipv6(addr)) => addr.is_loopback(),
        None => false,
    }
}
