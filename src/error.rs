use axum::{
    http::{Error as HttpError, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// HTTP-visible failures. Error responses carry empty bodies; the status
/// line and the global response headers are all a DLNA peer needs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("bad request")]
    BadRequest,

    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,

    #[error("forbidden")]
    Forbidden,

    #[error("not implemented")]
    NotImplemented,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest => StatusCode::BAD_REQUEST,
            AppError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            AppError::Io(_) | AppError::Internal(_) | AppError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        status.into_response()
    }
}

/// Library-level failures with the documented return codes, surfaced as
/// the process exit code by the binary.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("initialization error: {0}")]
    Init(String),

    #[error("invalid stream: {0}")]
    InvalidStream(String),

    #[error("out of memory")]
    Memory,

    #[error("share error: {0}")]
    Share(String),
}

impl ServerError {
    pub fn return_code(&self) -> i32 {
        match self {
            ServerError::Init(_) => -1,
            ServerError::InvalidStream(_) => -2,
            ServerError::Memory => -3,
            ServerError::Share(_) => -4,
        }
    }
}
