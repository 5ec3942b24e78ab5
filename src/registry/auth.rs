//! Authentication against Docker registries
//!
//! Registries answer an unauthenticated request with `401` and a
//! `WWW-Authenticate` challenge. Bearer challenges are exchanged for a token
//! at the realm, Basic challenges are answered with the credentials directly.

use crate::config::Credentials;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, SyncError};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeScheme {
    Basic,
    Bearer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: ChallengeScheme,
    pub realm: String,
    pub service: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parse a `WWW-Authenticate` header value
pub fn parse_challenge(header: &str) -> Option<AuthChallenge> {
    let (scheme, params_str) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "bearer" => ChallengeScheme::Bearer,
        "basic" => ChallengeScheme::Basic,
        _ => return None,
    };

    let mut params = HashMap::new();
    for param in params_str.split(',') {
        if let Some((key, value)) = param.split_once('=') {
            params.insert(
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }

    let realm = params.remove("realm").unwrap_or_default();
    if scheme == ChallengeScheme::Bearer && realm.is_empty() {
        return None;
    }

    Some(AuthChallenge {
        scheme,
        realm,
        service: params.remove("service"),
    })
}

#[derive(Debug, Clone)]
pub struct Auth {
    client: Client,
}

impl Auth {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Exchange a Bearer challenge for a token covering `scope`
    pub async fn fetch_token(
        &self,
        challenge: &AuthChallenge,
        scope: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        let mut url = Url::parse(&challenge.realm)
            .map_err(|e| {
                SyncError::Auth(format!("Invalid token realm '{}': {}", challenge.realm, e))
            })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        tracing::debug!(realm = %challenge.realm, scope, "Requesting registry token");

        let mut request = self.client.get(url);
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_auth_error(status, &error_text));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Auth(format!("Failed to parse token response: {}", e)))?;

        token_response
            .token
            .or(token_response.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Auth("Token response did not contain a token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/busybox:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.scheme, ChallengeScheme::Bearer);
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
    }

    #[test]
    fn test_parse_basic_challenge() {
        let challenge = parse_challenge(r#"Basic realm="Registry Realm""#).unwrap();
        assert_eq!(challenge.scheme, ChallengeScheme::Basic);
        assert_eq!(challenge.realm, "Registry Realm");
    }

    #[test]
    fn test_reject_unusable_challenges() {
        assert!(parse_challenge("Negotiate abc").is_none());
        assert!(parse_challenge(r#"Bearer service="x""#).is_none());
    }
}
