//! Docker Registry HTTP API v2 client
//!
//! Covers what mirroring needs: tag listing, manifest and blob download,
//! blob existence checks, monolithic blob upload and manifest upload.

use crate::config::{Credentials, SystemContext};
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, SyncError};
use crate::image::manifest::MANIFEST_ACCEPT;
use crate::registry::auth::{parse_challenge, Auth, ChallengeScheme};
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Certificate, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

#[derive(Debug, Clone)]
enum Authorization {
    Anonymous,
    Basic,
    Bearer(String),
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

pub fn pull_scope(repository: &str) -> String {
    format!("repository:{}:pull", repository)
}

pub fn push_scope(repository: &str) -> String {
    format!("repository:{}:pull,push", repository)
}

/// Client bound to one registry host and one execution context
#[derive(Debug)]
pub struct RegistryClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
    auth: Auth,
    authorizations: RwLock<HashMap<String, Authorization>>,
}

impl RegistryClient {
    /// Build a client and find out whether the registry speaks HTTPS.
    ///
    /// With TLS verification disabled an unreachable HTTPS endpoint falls
    /// back to plain HTTP.
    pub async fn connect(host: &str, ctx: &SystemContext) -> Result<Self> {
        let http = build_http_client(ctx)?;
        let base_url = probe_endpoint(&http, host, ctx.tls_verify).await?;
        tracing::debug!(registry = host, endpoint = %base_url, "Registry endpoint selected");

        Ok(Self {
            auth: Auth::new(http.clone()),
            http,
            base_url,
            credentials: ctx.credentials.clone(),
            authorizations: RwLock::new(HashMap::new()),
        })
    }

    async fn authorization(&self, scope: &str) -> Authorization {
        self.authorizations
            .read()
            .await
            .get(scope)
            .cloned()
            .unwrap_or(Authorization::Anonymous)
    }

    fn apply(&self, request: RequestBuilder, authorization: &Authorization) -> RequestBuilder {
        match (authorization, &self.credentials) {
            (Authorization::Bearer(token), _) => request.bearer_auth(token),
            (Authorization::Basic, Some(credentials)) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            _ => request,
        }
    }

    /// Send a request, answering one auth challenge if the registry asks.
    ///
    /// `build` is called again for the retried request, so it must be
    /// repeatable.
    async fn send<F>(&self, scope: &str, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let current = self.authorization(scope).await;
        let response = self
            .apply(build(&self.http), &current)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_challenge);
        let Some(challenge) = challenge else {
            return Ok(response);
        };

        let authorization = match challenge.scheme {
            ChallengeScheme::Basic if self.credentials.is_some() => Authorization::Basic,
            ChallengeScheme::Basic => return Ok(response),
            ChallengeScheme::Bearer => Authorization::Bearer(
                self.auth
                    .fetch_token(&challenge, scope, self.credentials.as_ref())
                    .await?,
            ),
        };

        self.authorizations
            .write()
            .await
            .insert(scope.to_string(), authorization.clone());

        self.apply(build(&self.http), &authorization)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, operation))
    }

    async fn fail(response: Response, operation: &str) -> SyncError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        HttpErrorHandler::handle_registry_error(status, &error_text, operation)
    }

    /// List every tag of a repository, following pagination links
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let scope = pull_scope(repository);
        let operation = format!("tag listing for {}", repository);
        let mut url = format!("{}/v2/{}/tags/list", self.base_url, repository);
        let mut tags = Vec::new();

        loop {
            let response = self.send(&scope, &operation, |c| c.get(&url)).await?;
            if !response.status().is_success() {
                return Err(Self::fail(response, &operation).await);
            }

            let next = response
                .headers()
                .get(LINK)
                .and_then(|h| h.to_str().ok())
                .and_then(|link| next_page(&self.base_url, link));

            let page: TagList = response.json().await.map_err(|e| {
                SyncError::Registry(format!("Failed to parse tags response: {}", e))
            })?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        tracing::debug!(repository, count = tags.len(), "Listed repository tags");
        Ok(tags)
    }

    /// Fetch a manifest; returns the raw body and its media type
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(Vec<u8>, String)> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, reference);
        let operation = format!("manifest fetch for {}:{}", repository, reference);
        let response = self
            .send(&pull_scope(repository), &operation, |c| {
                c.get(&url).header(ACCEPT, MANIFEST_ACCEPT)
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, &operation).await);
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
            .unwrap_or_default();
        let body = response.bytes().await?.to_vec();
        Ok((body, media_type))
    }

    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest);
        let operation = format!("blob download {}", digest);
        let response = self
            .send(&pull_scope(repository), &operation, |c| c.get(&url))
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, &operation).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn blob_exists(&self, repository: &str, digest: &str) -> Result<bool> {
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest);
        let operation = format!("blob existence check {}", digest);
        let response = self
            .send(&push_scope(repository), &operation, |c| c.head(&url))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::fail(response, &operation).await),
        }
    }

    /// Monolithic upload: POST to open a session, PUT the content with its digest
    pub async fn upload_blob(&self, repository: &str, digest: &str, data: Vec<u8>) -> Result<()> {
        let scope = push_scope(repository);
        let operation = format!("blob upload {}", digest);
        let start_url = format!("{}/v2/{}/blobs/uploads/", self.base_url, repository);

        let response = self.send(&scope, &operation, |c| c.post(&start_url)).await?;
        if !response.status().is_success() {
            return Err(Self::fail(response, &operation).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                SyncError::Registry("Upload session has no Location header".to_string())
            })?
            .to_string();

        let mut upload_url = Url::parse(&self.base_url)?.join(&location)?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let response = self
            .send(&scope, &operation, |c| {
                c.put(upload_url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, &operation).await);
        }
        Ok(())
    }

    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<()> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, reference);
        let operation = format!("manifest upload for {}:{}", repository, reference);
        let response = self
            .send(&push_scope(repository), &operation, |c| {
                c.put(&url)
                    .header(CONTENT_TYPE, content_type)
                    .body(body.to_vec())
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, &operation).await);
        }
        Ok(())
    }
}

fn build_http_client(ctx: &SystemContext) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .danger_accept_invalid_certs(!ctx.tls_verify);

    if let Some(cert_dir) = &ctx.cert_dir {
        for certificate in load_certificates(cert_dir)? {
            builder = builder.add_root_certificate(certificate);
        }
    }

    builder
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Read every `*.crt` file of a certificate directory as a trusted root
fn load_certificates(cert_dir: &Path) -> Result<Vec<Certificate>> {
    let entries = match std::fs::read_dir(cert_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut certificates = Vec::new();
    for entry in entries {
        let path = entry?.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("crt") => {
                let pem = std::fs::read(&path)?;
                let certificate = Certificate::from_pem(&pem).map_err(|e| {
                    SyncError::Config(format!("Invalid certificate {}: {}", path.display(), e))
                })?;
                certificates.push(certificate);
            }
            Some("cert") | Some("key") => {
                tracing::debug!(
                    path = %path.display(),
                    "Client certificates are not used, ignoring"
                );
            }
            _ => {}
        }
    }
    Ok(certificates)
}

async fn probe_endpoint(http: &Client, host: &str, tls_verify: bool) -> Result<String> {
    let https = format!("https://{}", host);
    match http.get(format!("{}/v2/", https)).send().await {
        Ok(_) => Ok(https),
        Err(e) if !tls_verify => {
            tracing::debug!(registry = host, error = %e, "HTTPS ping failed, trying HTTP");
            let http_url = format!("http://{}", host);
            http.get(format!("{}/v2/", http_url))
                .send()
                .await
                .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry ping"))?;
            Ok(http_url)
        }
        Err(e) => Err(NetworkErrorHandler::handle_network_error(&e, "registry ping")),
    }
}

/// Extract the `rel="next"` target of a `Link` header
fn next_page(base_url: &str, link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") && !params.contains("rel=next") {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        if target.starts_with("http://") || target.starts_with("https://") {
            Some(target.to_string())
        } else {
            Some(format!("{}{}", base_url, target))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_link() {
        let link = r#"</v2/library/busybox/tags/list?last=1.36&n=100>; rel="next""#;
        assert_eq!(
            next_page("https://registry.example.com", link).as_deref(),
            Some("https://registry.example.com/v2/library/busybox/tags/list?last=1.36&n=100")
        );
        assert_eq!(next_page("https://r", r#"</x>; rel="prev""#), None);
    }

    #[test]
    fn test_scopes() {
        assert_eq!(pull_scope("team/app"), "repository:team/app:pull");
        assert_eq!(push_scope("team/app"), "repository:team/app:pull,push");
    }

    #[test]
    fn test_missing_cert_dir_is_empty() {
        let certificates =
            load_certificates(Path::new("/nonexistent/registry-sync/certs")).unwrap();
        assert!(certificates.is_empty());
    }
}
