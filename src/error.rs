use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("Authentication required")]
    Unauthorized { realm: String },

    #[error("Password authentication unavailable")]
    AuthUnavailable,

    #[error("Path is outside the served directory")]
    PathTraversal,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File '{0}' does not exist.")]
    NotFound(String),

    #[error("Cannot read a directory as a file")]
    NotAFile,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("File took too long to read")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileServerError {
    /// Translate an I/O error raised while touching `path` into the
    /// client-facing taxonomy.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FileServerError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                FileServerError::PermissionDenied(path.to_string())
            }
            std::io::ErrorKind::TimedOut => FileServerError::Timeout,
            _ => FileServerError::Io(err),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FileServerError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            FileServerError::AuthUnavailable => StatusCode::NOT_IMPLEMENTED,
            FileServerError::PathTraversal => StatusCode::FORBIDDEN,
            FileServerError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            FileServerError::NotFound(_) => StatusCode::NOT_FOUND,
            FileServerError::NotAFile => StatusCode::BAD_REQUEST,
            FileServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FileServerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FileServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FileServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            FileServerError::Io(err) => {
                error!("Internal I/O failure: {}", err);
                "Internal server error".to_string()
            }
            FileServerError::PermissionDenied(_) => "Failed to read file".to_string(),
            other => other.to_string(),
        };

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response();

        if let FileServerError::Unauthorized { realm } = &self {
            let challenge = format!("Basic realm=\"{}\"", realm.replace('"', "'"));
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }

        response
    }
}
