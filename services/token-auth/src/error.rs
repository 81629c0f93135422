use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures as the reverse proxy sees them.
///
/// Both variants render a fixed plain-text body. Unknown and expired tokens
/// share `InvalidToken` so the response never reveals which tokens exist.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Configuration error")]
    Configuration,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidToken => StatusCode::FORBIDDEN,
            ServiceError::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )],
            self.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_token_is_forbidden_plain_text() {
        let response = ServiceError::InvalidToken.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("content type"),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn configuration_fault_is_internal_error() {
        let response = ServiceError::Configuration.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
