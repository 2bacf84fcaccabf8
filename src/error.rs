//! 上传错误类型与统一的 API 错误响应。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::storage::StorageError;

pub const UPLOAD_ERROR_PREFIX: &str = "Error on uploading file: ";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Uploaded file type not supported")]
    UnsupportedFileType,
    #[error("Invalid upload entity: {0}")]
    InvalidEntity(String),
    #[error("Unknown upload entity: {0}")]
    UnknownEntity(String),
    #[error("Malformed upload form: {0}")]
    MalformedForm(String),
    #[error("Could not find a free file name")]
    NameExhausted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
pub enum ApiError {
    /// 上传阶段产生的终止性拒绝。
    UploadFailed {
        controller: &'static str,
        message: String,
    },
    NotFound(String),
}

impl ApiError {
    pub fn upload_failed(controller: &'static str, err: &UploadError) -> Self {
        ApiError::UploadFailed {
            controller,
            message: format!("{UPLOAD_ERROR_PREFIX}{err}"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    controller: Option<&'static str>,
    message: String,
}

impl ErrorBody {
    fn new(controller: Option<&'static str>, message: String) -> Self {
        Self {
            success: false,
            result: Value::Null,
            controller,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            // 上传失败一律按请求被拒绝返回。
            ApiError::UploadFailed {
                controller,
                message,
            } => (
                StatusCode::FORBIDDEN,
                Json(ErrorBody::new(Some(controller), message)),
            )
                .into_response(),
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(ErrorBody::new(None, msg))).into_response()
            }
        }
    }
}
