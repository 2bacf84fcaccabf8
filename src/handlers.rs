//! 健康检查、版本信息与上传结果处理器。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::UploadedForm;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    result: T,
    message: String,
}

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

#[derive(Serialize)]
pub struct VersionInfo {
    version: &'static str,
}

pub async fn health() -> JsonResponse<HealthStatus> {
    JsonResponse(HealthStatus { status: "ok" })
}

pub async fn get_version_info() -> JsonResponse<VersionInfo> {
    JsonResponse(VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("not found".into())
}

/// 上传阶段之后的处理器，回显处理后的表单。
pub async fn accept_upload(
    Extension(form): Extension<UploadedForm>,
) -> JsonResponse<ApiResponse<UploadedForm>> {
    let message = match &form.upload {
        Some(upload) => format!("Uploaded {}", upload.generated_file_name),
        None => "No file attached".to_string(),
    };
    JsonResponse(ApiResponse {
        success: true,
        result: form,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    #[tokio::test]
    async fn health_reports_ok() {
        let JsonResponse(status) = health().await;
        assert_eq!(status.status, "ok");
    }

    #[tokio::test]
    async fn accept_upload_without_file_says_so() {
        let mut fields = Map::new();
        fields.insert("file".to_string(), Value::Null);
        let JsonResponse(response) = accept_upload(Extension(UploadedForm {
            fields,
            upload: None,
        }))
        .await;
        assert!(response.success);
        assert_eq!(response.message, "No file attached");
        assert_eq!(response.result.fields.get("file"), Some(&Value::Null));
    }
}
