//! Standardized mapping of registry HTTP failures onto [`SyncError`] kinds

use crate::error::SyncError;
use reqwest::StatusCode;

/// Standard error handler for registry HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Classify a non-success registry response.
    ///
    /// 404 becomes `NotFound`, 401/403 become `Auth`, 408/429/5xx are
    /// transient `Network` errors and everything else is a plain `Registry`
    /// error.
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        operation: &str,
    ) -> SyncError {
        match status.as_u16() {
            401 => SyncError::Auth(format!(
                "Unauthorized to perform {}: {}",
                operation, error_text
            )),
            403 => SyncError::Auth(format!(
                "Forbidden: insufficient permissions for {}: {}",
                operation, error_text
            )),
            404 => SyncError::NotFound(format!("{}: {}", operation, error_text)),
            408 => SyncError::Network(format!("Request timeout during {}", operation)),
            429 => SyncError::Network(format!("Rate limited during {}: {}", operation, error_text)),
            500 => SyncError::Network(format!(
                "Registry server error during {}: {}",
                operation, error_text
            )),
            502..=504 => SyncError::Network(format!(
                "Registry unavailable during {}: {}",
                operation, error_text
            )),
            _ => SyncError::Registry(format!(
                "{} failed (status {}): {}",
                operation, status, error_text
            )),
        }
    }

    /// Handle token endpoint failures
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> SyncError {
        let error_msg = match status.as_u16() {
            400 => "Invalid token request parameters".to_string(),
            401 => "Invalid credentials provided".to_string(),
            403 => "Access denied - insufficient permissions".to_string(),
            404 => "Authentication endpoint not found".to_string(),
            _ => format!("Authentication failed (status {}): {}", status, error_text),
        };

        SyncError::Auth(error_msg)
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> SyncError {
        if error.is_timeout() {
            SyncError::Network(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            SyncError::Network(format!("Connection error during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            SyncError::Network(format!(
                "TLS certificate error during {}: {}",
                context, error
            ))
        } else if let Some(status) = error.status() {
            HttpErrorHandler::handle_registry_error(status, &error.to_string(), context)
        } else {
            SyncError::Network(format!("{} network error: {}", context, error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let not_found =
            HttpErrorHandler::handle_registry_error(
                StatusCode::NOT_FOUND,
                "unknown",
                "tag listing",
            );
        assert!(not_found.is_not_found());

        let auth = HttpErrorHandler::handle_registry_error(StatusCode::UNAUTHORIZED, "", "pull");
        assert!(matches!(auth, SyncError::Auth(_)));
        assert!(!auth.is_transient());

        let unavailable =
            HttpErrorHandler::handle_registry_error(StatusCode::SERVICE_UNAVAILABLE, "", "pull");
        assert!(unavailable.is_transient());

        let other = HttpErrorHandler::handle_registry_error(StatusCode::BAD_REQUEST, "bad", "push");
        assert!(matches!(other, SyncError::Registry(_)));
    }

    #[test]
    fn test_auth_error_messages() {
        let err = HttpErrorHandler::handle_auth_error(StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.to_string(), "Authentication error: Invalid credentials provided");
    }
}
