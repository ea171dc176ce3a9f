use thiserror::Error;

/// Failures raised by the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User '{0}' already exists")]
    DuplicateUser(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token signature does not match")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("User with given username already exists")]
    UserAlreadyExists,

    #[error("Invalid username or password")]
    UserNotFound,

    #[error("Invalid username or password")]
    IncorrectPassword,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Failures talking to the remote assistant service.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Could not create assistant session: {0}")]
    SessionCreationFailed(String),

    #[error("Assistant service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Assistant rejected session '{0}'")]
    InvalidSession(String),

    #[error("Unexpected assistant response: {0}")]
    UnexpectedResponse(String),
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        AssistantError::RemoteUnavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration failed: {}", err))
    }
}

impl AppError {
    /// Status code and machine-readable kind reported to clients.
    pub fn status_and_code(&self) -> (axum::http::StatusCode, &'static str) {
        use axum::http::StatusCode;

        match self {
            AppError::Auth(AuthError::InvalidData(_)) => (StatusCode::BAD_REQUEST, "INVALID_DATA"),
            AppError::Auth(AuthError::UserAlreadyExists) => (StatusCode::CONFLICT, "USER_ALREADY_EXISTS"),
            AppError::Auth(AuthError::Store(StoreError::DuplicateUser(_))) => {
                (StatusCode::CONFLICT, "DUPLICATE_USER")
            }
            AppError::Auth(AuthError::UserNotFound) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            AppError::Auth(AuthError::IncorrectPassword) => (StatusCode::UNAUTHORIZED, "INCORRECT_PASSWORD"),
            AppError::Auth(AuthError::AuthenticationFailed(_)) => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED")
            }
            AppError::Auth(AuthError::Token(_)) => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            AppError::Auth(_) => (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_ERROR"),
            AppError::Assistant(AssistantError::SessionCreationFailed(_)) => {
                (StatusCode::BAD_GATEWAY, "SESSION_CREATION_FAILED")
            }
            AppError::Assistant(AssistantError::RemoteUnavailable(_)) => {
                (StatusCode::BAD_GATEWAY, "REMOTE_UNAVAILABLE")
            }
            AppError::Assistant(AssistantError::InvalidSession(_)) => (StatusCode::BAD_GATEWAY, "INVALID_SESSION"),
            AppError::Assistant(_) => (StatusCode::BAD_GATEWAY, "ASSISTANT_ERROR"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

// Axum IntoResponse implementation for HTTP errors
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(code, "Request failed: {}", self);
        } else {
            tracing::debug!(code, "Request rejected: {}", self);
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
