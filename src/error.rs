use axum::{
    extract::multipart::MultipartError,
    response::{IntoResponse, Response},
};
use hyper::StatusCode;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("DB error at {path}: {source}")]
    DBInitError { path: String, source: sqlx::Error },

    #[error("DB error {message} - {source}")]
    DBError {
        message: String,
        source: sqlx::Error,
    },

    #[error("Migration error {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("No upload record found for user {user_id}")]
    RecordNotFound { user_id: String },

    #[error("Missing required field {0}")]
    MissingField(&'static str),

    #[error("Invalid upload record: {0}")]
    InvalidRecord(#[from] validator::ValidationErrors),

    #[error("Upload error {0}")]
    UploadError(#[from] std::io::Error),

    #[error("Storage backend error {message} - {source}")]
    StorageBackendError {
        message: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let res = match self {
            AppError::RecordNotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::MissingField(_) | AppError::InvalidRecord(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            _ => {
                tracing::error!("Server error: {self:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{self:?}"))
            }
        };
        res.into_response()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::UploadError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{err:?}"),
        ))
    }
}

pub(crate) trait DBErrorContext<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: ToString + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> DBErrorContext<T> for sqlx::Result<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: ToString + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|source| AppError::DBError {
            message: f().to_string(),
            source,
        })
    }
}
